//! Tracing subscriber setup for reconciliation runs
//!
//! Components log through `tracing` and the [`crate::TracingSink`]; a binary
//! or test harness calls one of the initializers below once per process.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Directive used when `RUST_LOG` is unset: run progress from the fleet
/// crates, warnings from everything else.
pub const DEFAULT_DIRECTIVE: &str = "warn,fleet_core=info,fleet_fs=info";

fn filter(default_directive: &str) -> Result<EnvFilter, tracing_subscriber::filter::ParseError> {
    EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_directive))
}

/// Install a compact stdout subscriber filtered by `RUST_LOG`, falling back
/// to [`DEFAULT_DIRECTIVE`].
///
/// # Errors
///
/// Fails on an unparsable filter or if a global subscriber is already set.
pub fn init() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .compact();

    tracing_subscriber::registry()
        .with(filter(DEFAULT_DIRECTIVE)?)
        .with(fmt_layer)
        .try_init()?;

    tracing::debug!(default = DEFAULT_DIRECTIVE, "Logging initialized");
    Ok(())
}

/// Route logs through the test harness's captured output at `debug`.
///
/// Safe to call from every test; only the first call installs a subscriber.
pub fn init_for_tests() {
    let Ok(filter) = filter("debug") else {
        return;
    };
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_test_writer().with_target(true).compact())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_directive_parses() {
        assert!(EnvFilter::try_new(DEFAULT_DIRECTIVE).is_ok());
    }

    #[test]
    fn repeated_test_init_is_harmless() {
        init_for_tests();
        init_for_tests();
        tracing::info!(key = "C02XK0AAJG5H", "Logged after init");
    }
}
