//! Run configuration
//!
//! Loaded from `reconcile.toml` (or `.json`) through [`fleet_fs::ConfigStore`].
//! Every value has a default so an empty file is a valid configuration:
//!
//! ```toml
//! [sync]
//! max_attempts = 3
//! refresh_budget = 3
//! backoff_initial_ms = 1000
//! backoff_multiplier = 2.0
//! backoff_max_ms = 30000
//! min_request_interval_ms = 500
//! large_run_threshold = 200
//! large_run_interval_ms = 1000
//! token_refresh_skew_secs = 120
//! batch_size = 50
//! workers = 1
//! force = false
//!
//! [inventory]
//! min_version_count = 2
//! always_report_above = 5
//! usage_window_days = 30
//!
//! [paths]
//! checkpoint = "progress.json"
//! vendor_mapping = "vendor_mapping.json"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::usage::UsageWindow;

/// Longest accepted usage look-back: ten years.
pub const MAX_USAGE_WINDOW_DAYS: u32 = 3_650;

/// Longest accepted early-refresh window: one day.
pub const MAX_TOKEN_REFRESH_SKEW_SECS: i64 = 86_400;

/// Retry, pacing and batching for the sync orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Ordinary attempts per task before it is marked failed
    pub max_attempts: u32,
    /// Credential refreshes allowed per task (and per page fetch)
    pub refresh_budget: u32,
    pub backoff_initial_ms: u64,
    pub backoff_multiplier: f64,
    pub backoff_max_ms: u64,
    /// Minimum delay between any two remote calls, across all workers
    pub min_request_interval_ms: u64,
    /// Runs with more tasks than this use `large_run_interval_ms` as the floor
    pub large_run_threshold: usize,
    pub large_run_interval_ms: u64,
    /// Refresh proactively when the token expires within this window
    pub token_refresh_skew_secs: i64,
    /// Tasks between checkpoint saves
    pub batch_size: usize,
    /// Concurrent update workers
    pub workers: usize,
    /// Create tasks for in-sync devices too
    pub force: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            refresh_budget: 3,
            backoff_initial_ms: 1_000,
            backoff_multiplier: 2.0,
            backoff_max_ms: 30_000,
            min_request_interval_ms: 500,
            large_run_threshold: 200,
            large_run_interval_ms: 1_000,
            token_refresh_skew_secs: 120,
            batch_size: 50,
            workers: 1,
            force: false,
        }
    }
}

impl SyncConfig {
    pub fn backoff_initial(&self) -> Duration {
        Duration::from_millis(self.backoff_initial_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    /// Inter-request delay for a run of `task_count` tasks.
    pub fn request_interval(&self, task_count: usize) -> Duration {
        let base = self.min_request_interval_ms;
        let ms = if task_count > self.large_run_threshold {
            base.max(self.large_run_interval_ms)
        } else {
            base
        };
        Duration::from_millis(ms)
    }

    /// Early-refresh window, clamped to `0..=MAX_TOKEN_REFRESH_SKEW_SECS`.
    pub fn token_refresh_skew(&self) -> chrono::Duration {
        let secs = self
            .token_refresh_skew_secs
            .clamp(0, MAX_TOKEN_REFRESH_SKEW_SECS);
        chrono::Duration::try_seconds(secs).unwrap_or_else(chrono::Duration::zero)
    }

    /// Reject values that would make the run loop or never make progress.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::fatal_config("sync.max_attempts must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(Error::fatal_config("sync.batch_size must be at least 1"));
        }
        if self.workers == 0 {
            return Err(Error::fatal_config("sync.workers must be at least 1"));
        }
        if self.backoff_multiplier.is_nan() || self.backoff_multiplier < 1.0 {
            return Err(Error::fatal_config(
                "sync.backoff_multiplier must be a number >= 1.0",
            ));
        }
        if self.backoff_max_ms < self.backoff_initial_ms {
            return Err(Error::fatal_config(
                "sync.backoff_max_ms must not be below sync.backoff_initial_ms",
            ));
        }
        if !(0..=MAX_TOKEN_REFRESH_SKEW_SECS).contains(&self.token_refresh_skew_secs) {
            return Err(Error::fatal_config(format!(
                "sync.token_refresh_skew_secs must be between 0 and {MAX_TOKEN_REFRESH_SKEW_SECS}"
            )));
        }
        Ok(())
    }
}

/// Fleet application inventory reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InventoryConfig {
    /// Distinct versions needed before an application appears in the summary
    pub min_version_count: usize,
    /// Install count above which an application is always summarized
    pub always_report_above: usize,
    /// Look-back for application usage rollups, in days before the end date
    pub usage_window_days: u32,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            min_version_count: 2,
            always_report_above: 5,
            usage_window_days: 30,
        }
    }
}

impl InventoryConfig {
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_USAGE_WINDOW_DAYS).contains(&self.usage_window_days) {
            return Err(Error::fatal_config(format!(
                "inventory.usage_window_days must be between 1 and {MAX_USAGE_WINDOW_DAYS}"
            )));
        }
        Ok(())
    }

    /// Usage window of the configured length ending on `end`.
    pub fn usage_window(&self, end: chrono::NaiveDate) -> UsageWindow {
        UsageWindow::ending(end, self.usage_window_days)
    }
}

/// Local file locations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub checkpoint: Option<PathBuf>,
    pub vendor_mapping: Option<PathBuf>,
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub sync: SyncConfig,
    pub inventory: InventoryConfig,
    pub paths: PathsConfig,
}

impl ReconcileConfig {
    /// Load and validate a configuration file.
    ///
    /// # Errors
    ///
    /// Unreadable or unparsable files and invalid values are all reported as
    /// [`Error::FatalConfig`].
    pub fn load(path: &Path) -> Result<Self> {
        let config: ReconcileConfig = fleet_fs::ConfigStore::new()
            .load(path)
            .map_err(|e| Error::fatal_config(e.to_string()))?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "Loaded reconcile config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.sync.validate()?;
        self.inventory.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn empty_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reconcile.toml");
        fs::write(&path, "").unwrap();

        let config = ReconcileConfig::load(&path).unwrap();
        assert_eq!(config, ReconcileConfig::default());
        assert_eq!(config.sync.max_attempts, 3);
        assert_eq!(config.sync.request_interval(10), Duration::from_millis(500));
    }

    #[test]
    fn partial_sections_merge_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reconcile.toml");
        fs::write(
            &path,
            "[sync]\nworkers = 4\n\n[paths]\ncheckpoint = \"state/progress.json\"\n",
        )
        .unwrap();

        let config = ReconcileConfig::load(&path).unwrap();
        assert_eq!(config.sync.workers, 4);
        assert_eq!(config.sync.batch_size, 50);
        assert_eq!(
            config.paths.checkpoint.as_deref(),
            Some(Path::new("state/progress.json"))
        );
    }

    #[test]
    fn invalid_values_are_fatal() {
        let config = SyncConfig {
            max_attempts: 0,
            ..SyncConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::FatalConfig { .. })));

        let config = SyncConfig {
            backoff_multiplier: 0.5,
            ..SyncConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::FatalConfig { .. })));
    }

    #[test]
    fn out_of_range_refresh_skew_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reconcile.toml");
        fs::write(&path, "[sync]\ntoken_refresh_skew_secs = 9223372036854775807\n").unwrap();

        let err = ReconcileConfig::load(&path).unwrap_err();
        assert!(matches!(err, Error::FatalConfig { ref message } if message.contains("token_refresh_skew_secs")));

        let config = SyncConfig {
            token_refresh_skew_secs: -1,
            ..SyncConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn refresh_skew_conversion_never_panics() {
        let config = SyncConfig {
            token_refresh_skew_secs: i64::MAX,
            ..SyncConfig::default()
        };
        assert_eq!(
            config.token_refresh_skew(),
            chrono::Duration::seconds(MAX_TOKEN_REFRESH_SKEW_SECS)
        );

        let config = SyncConfig {
            token_refresh_skew_secs: i64::MIN,
            ..SyncConfig::default()
        };
        assert_eq!(config.token_refresh_skew(), chrono::Duration::zero());
    }

    #[test]
    fn usage_window_bounds_are_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reconcile.toml");
        fs::write(&path, "[inventory]\nusage_window_days = 0\n").unwrap();
        assert!(matches!(
            ReconcileConfig::load(&path),
            Err(Error::FatalConfig { ref message }) if message.contains("usage_window_days")
        ));

        fs::write(&path, "[inventory]\nusage_window_days = 7\n").unwrap();
        let config = ReconcileConfig::load(&path).unwrap();
        let end = chrono::NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let window = config.inventory.usage_window(end);
        assert_eq!(window.start(), chrono::NaiveDate::from_ymd_opt(2024, 3, 3).unwrap());
        assert_eq!(window.end(), end);
    }

    #[test]
    fn unreadable_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = ReconcileConfig::load(&dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, Error::FatalConfig { .. }));
    }

    #[test]
    fn large_runs_slow_down() {
        let config = SyncConfig::default();
        assert_eq!(config.request_interval(200), Duration::from_millis(500));
        assert_eq!(config.request_interval(201), Duration::from_millis(1_000));
    }
}
