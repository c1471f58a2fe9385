//! End-to-end runs driven by an on-disk configuration
//!
//! Exercises the full flow: config file -> vendor mapping file -> fetch both
//! systems -> diff -> sync -> checkpoint file lifecycle.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use fleet_core::{
    Error, Field, ReconcileConfig, Reconciler, RecordingSink, RunMode, TaskStatus,
};
use fleet_test_utils::{
    CountingCredentials, ScriptedApplier, VecCursorFetcher, VecOffsetFetcher, serial,
    source_b_computer, synced_fleet,
};
use pretty_assertions::assert_eq;
use serde_json::Value;
use tempfile::TempDir;

/// Write `reconcile.toml` and `vendors.json` into a fresh directory.
fn setup_workspace(with_vendor_file: bool) -> TempDir {
    fleet_core::logging::init_for_tests();
    let temp = TempDir::new().unwrap();
    let root = temp.path();

    fs::write(
        root.join("reconcile.toml"),
        format!(
            r#"
[sync]
backoff_initial_ms = 1
backoff_max_ms = 4
min_request_interval_ms = 0
large_run_interval_ms = 0
batch_size = 2
workers = 2

[paths]
checkpoint = '{}'
vendor_mapping = '{}'
"#,
            root.join("state").join("progress.json").display(),
            root.join("vendors.json").display(),
        ),
    )
    .unwrap();

    if with_vendor_file {
        fs::write(root.join("vendors.json"), r#"{"64AFCB0": "AMIRIM"}"#).unwrap();
    }
    temp
}

fn load_config(root: &Path) -> ReconcileConfig {
    ReconcileConfig::load(&root.join("reconcile.toml")).unwrap()
}

/// Every device but the first two has a stale PO number in Source B.
fn stale_po_fleet(n: usize) -> (Vec<Value>, Vec<Value>) {
    let (source, mut target) = synced_fleet(n);
    for (i, computer) in target.iter_mut().enumerate().skip(2) {
        *computer = source_b_computer(
            100 + i as u64,
            &serial(i),
            Some("AMIRIM"),
            Some("2021-11-25"),
            Some("OLD-PO"),
        );
    }
    (source, target)
}

fn reconciler(
    config: ReconcileConfig,
    source: Vec<Value>,
    target: Vec<Value>,
    applier: Arc<ScriptedApplier>,
) -> Reconciler {
    Reconciler::builder()
        .config(config)
        .source_fetcher(Arc::new(VecCursorFetcher::paged(source, 3)))
        .target_fetcher(Arc::new(VecOffsetFetcher::new(target, 4)))
        .source_credentials(Arc::new(CountingCredentials::new()))
        .target_credentials(Arc::new(CountingCredentials::new()))
        .applier(applier)
        .sink(Arc::new(RecordingSink::new()))
        .build()
        .unwrap()
}

#[test]
fn test_config_file_is_loaded_with_defaults() {
    let temp = setup_workspace(true);
    let config = load_config(temp.path());

    assert_eq!(config.sync.workers, 2);
    assert_eq!(config.sync.max_attempts, 3);
    assert_eq!(config.inventory.min_version_count, 2);
    assert!(config.paths.checkpoint.unwrap().ends_with("progress.json"));
}

#[test]
fn test_invalid_config_file_is_fatal() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("reconcile.toml");
    fs::write(&path, "[sync]\nbatch_size = 0\n").unwrap();

    let err = ReconcileConfig::load(&path).unwrap_err();
    assert!(matches!(err, Error::FatalConfig { .. }));
}

#[tokio::test]
async fn test_vendor_mapping_file_resolves_names() {
    let temp = setup_workspace(true);
    let (source, target) = synced_fleet(6);

    let report = reconciler(
        load_config(temp.path()),
        source,
        target,
        Arc::new(ScriptedApplier::new()),
    )
    .run(RunMode::Compare)
    .await
    .unwrap();

    assert_eq!(report.summary.in_sync, 6);
    assert_eq!(report.summary.discrepancy_count, 0);
}

#[tokio::test]
async fn test_missing_vendor_file_falls_back_to_ids() {
    let temp = setup_workspace(false);
    let (source, target) = synced_fleet(3);

    let report = reconciler(
        load_config(temp.path()),
        source,
        target,
        Arc::new(ScriptedApplier::new()),
    )
    .run(RunMode::Compare)
    .await
    .unwrap();

    // "64AFCB0" is now compared against "AMIRIM"
    assert_eq!(report.summary.devices_with_discrepancies, 3);
    assert!(report
        .diff
        .discrepancies()
        .all(|d| d.field == Field::Vendor && d.expected == "64AFCB0"));
}

#[tokio::test]
async fn test_sync_run_clears_checkpoint_file() {
    let temp = setup_workspace(true);
    let checkpoint = temp.path().join("state").join("progress.json");
    let applier = Arc::new(ScriptedApplier::new());
    let (source, target) = stale_po_fleet(8);

    let report = reconciler(load_config(temp.path()), source, target, applier.clone())
        .run(RunMode::Sync)
        .await
        .unwrap();

    assert_eq!(report.summary.updated_count, 6);
    assert_eq!(report.summary.in_sync, 2);
    assert_eq!(applier.call_count(), 6);
    assert!(!checkpoint.exists());
}

#[tokio::test]
async fn test_failed_sync_keeps_checkpoint_file() {
    let temp = setup_workspace(true);
    let checkpoint = temp.path().join("state").join("progress.json");
    let applier = Arc::new(
        ScriptedApplier::new()
            .script(&serial(5), [fleet_core::RemoteError::NotFound("computer 105".into())]),
    );
    let (source, target) = stale_po_fleet(8);

    let report = reconciler(load_config(temp.path()), source, target, applier)
        .run(RunMode::Sync)
        .await
        .unwrap();

    assert_eq!(report.summary.failed_count, 1);
    let saved = fleet_fs::CheckpointFile::new(&checkpoint).load().unwrap();
    assert_eq!(saved.len(), 5);
    assert!(!saved.contains(&serial(5)));

    let failed: Vec<_> = report
        .tasks
        .iter()
        .filter(|t| t.status() == TaskStatus::Failed)
        .map(|t| t.key().to_string())
        .collect();
    assert_eq!(failed, vec![serial(5)]);
}
