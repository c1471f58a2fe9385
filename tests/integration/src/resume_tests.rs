//! Interrupted sync runs resumed from the checkpoint file

use std::collections::BTreeSet;
use std::sync::Arc;

use fleet_core::{
    CancelFlag, Error, MemoryCheckpoint, ReconcileConfig, Reconciler, RunMode, SyncConfig,
};
use fleet_fs::CheckpointFile;
use fleet_test_utils::{
    CountingCredentials, ScriptedApplier, VecCursorFetcher, VecOffsetFetcher, serial,
    source_b_computer, synced_fleet,
};
use pretty_assertions::assert_eq;
use serde_json::Value;
use tempfile::TempDir;

const FLEET: usize = 10;
const INTERRUPT_AFTER: usize = 4;

fn config(checkpoint: &std::path::Path) -> ReconcileConfig {
    let mut config = ReconcileConfig {
        sync: SyncConfig {
            backoff_initial_ms: 1,
            backoff_max_ms: 4,
            min_request_interval_ms: 0,
            large_run_interval_ms: 0,
            batch_size: 3,
            ..SyncConfig::default()
        },
        ..ReconcileConfig::default()
    };
    config.paths.checkpoint = Some(checkpoint.to_path_buf());
    config
}

/// Every device carries a stale PO number in Source B.
fn fleet() -> (Vec<Value>, Vec<Value>) {
    let (source, _) = synced_fleet(FLEET);
    let target = (0..FLEET)
        .map(|i| {
            source_b_computer(
                100 + i as u64,
                &serial(i),
                Some("AMIRIM"),
                Some("2021-11-25"),
                Some("OLD-PO"),
            )
        })
        .collect();
    (source, target)
}

fn reconciler(
    config: ReconcileConfig,
    applier: Arc<ScriptedApplier>,
    cancel: CancelFlag,
) -> Reconciler {
    let (source, target) = fleet();
    Reconciler::builder()
        .config(config)
        .source_fetcher(Arc::new(VecCursorFetcher::paged(source, 4)))
        .target_fetcher(Arc::new(VecOffsetFetcher::new(target, 4)))
        .source_credentials(Arc::new(CountingCredentials::new()))
        .target_credentials(Arc::new(CountingCredentials::new()))
        .vendors(Arc::new(fleet_core::VendorMapping::new(
            [("64AFCB0".to_string(), "AMIRIM".to_string())].into(),
        )))
        .applier(applier)
        .cancel(cancel)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_interrupted_run_resumes_where_it_stopped() {
    fleet_core::logging::init_for_tests();
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("progress.json");

    // First run: operator interrupt after four confirmed updates
    let cancel = CancelFlag::new();
    let first = Arc::new(ScriptedApplier::new().cancel_after(INTERRUPT_AFTER, cancel.clone()));
    let report = reconciler(config(&path), first.clone(), cancel)
        .run(RunMode::Sync)
        .await
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.summary.updated_count, INTERRUPT_AFTER);
    let saved = CheckpointFile::new(&path).load().unwrap();
    assert_eq!(saved, first.applied_keys().into_iter().collect::<BTreeSet<_>>());

    // Second run, as after a restart: only the rest is sent
    let second = Arc::new(ScriptedApplier::new());
    let report = reconciler(config(&path), second.clone(), CancelFlag::new())
        .run(RunMode::Sync)
        .await
        .unwrap();

    assert_eq!(second.call_count(), FLEET - INTERRUPT_AFTER);
    assert_eq!(report.summary.skipped_count, INTERRUPT_AFTER);
    assert_eq!(report.summary.updated_count, FLEET - INTERRUPT_AFTER);
    assert!(!path.exists());

    // Together the two runs updated every device exactly once
    let mut applied = first.applied_keys();
    applied.extend(second.applied_keys());
    applied.sort();
    assert_eq!(applied, (0..FLEET).map(serial).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_uninterrupted_run_matches_resumed_result() {
    let temp = TempDir::new().unwrap();
    let applier = Arc::new(ScriptedApplier::new());

    let report = reconciler(config(&temp.path().join("progress.json")), applier.clone(), CancelFlag::new())
        .run(RunMode::Sync)
        .await
        .unwrap();

    assert_eq!(report.summary.updated_count, FLEET);
    let mut applied = applier.applied_keys();
    applied.sort();
    assert_eq!(applied, (0..FLEET).map(serial).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_corrupt_checkpoint_aborts_sync() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("progress.json");
    std::fs::write(&path, "{ not json").unwrap();
    let applier = Arc::new(ScriptedApplier::new());

    let err = reconciler(config(&path), applier.clone(), CancelFlag::new())
        .run(RunMode::Sync)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Fs(fleet_fs::Error::CheckpointCorrupt { .. })
    ));
    assert_eq!(applier.call_count(), 0);
}

#[tokio::test]
async fn test_explicit_store_overrides_configured_path() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("progress.json");
    let store = Arc::new(MemoryCheckpoint::with_keys([serial(0), serial(1)]));
    let applier = Arc::new(ScriptedApplier::new());
    let (source, target) = fleet();

    let report = Reconciler::builder()
        .config(config(&path))
        .source_fetcher(Arc::new(VecCursorFetcher::paged(source, 4)))
        .target_fetcher(Arc::new(VecOffsetFetcher::new(target, 4)))
        .source_credentials(Arc::new(CountingCredentials::new()))
        .target_credentials(Arc::new(CountingCredentials::new()))
        .applier(applier.clone())
        .checkpoint(store)
        .build()
        .unwrap()
        .run(RunMode::Sync)
        .await
        .unwrap();

    assert_eq!(report.summary.skipped_count, 2);
    assert_eq!(applier.call_count(), FLEET - 2);
    assert!(!path.exists());
}
