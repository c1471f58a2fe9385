//! Backoff schedules and the shared request pacing gate

use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::ExponentialBackoffBuilder;
use backoff::backoff::Backoff;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::SyncConfig;

/// Retry limits and backoff shape for remote calls.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub refresh_budget: u32,
    pub initial: Duration,
    pub multiplier: f64,
    pub max: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            refresh_budget: config.refresh_budget,
            initial: config.backoff_initial(),
            multiplier: config.backoff_multiplier,
            max: config.backoff_max(),
        }
    }

    /// A fresh delay schedule for one task or page.
    pub fn schedule(&self) -> BackoffSchedule {
        let inner = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial)
            .with_multiplier(self.multiplier)
            .with_max_interval(self.max)
            // Deterministic delays; runs must be reproducible
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(None)
            .build();
        BackoffSchedule {
            inner,
            cap: self.max,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

/// Successive exponential delays, capped.
#[derive(Debug)]
pub struct BackoffSchedule {
    inner: ExponentialBackoff,
    cap: Duration,
}

impl BackoffSchedule {
    pub fn next_delay(&mut self) -> Duration {
        self.inner.next_backoff().unwrap_or(self.cap)
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Enforces a minimum delay between remote calls.
///
/// One gate is shared by every worker of a run; the lock is held while
/// waiting so concurrent callers are released one interval apart.
#[derive(Debug)]
pub struct RateGate {
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl RateGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait until at least `interval` has passed since the previous call.
    pub async fn wait(&self) {
        let mut last = self.last.lock().await;
        if let Some(previous) = *last {
            tokio::time::sleep_until(previous + self.interval).await;
        }
        *last = Some(Instant::now());
    }
}
