//! End-to-end reconciliation run
//!
//! ```text
//! CursorFetcher ──collect──▶ Source A records ─┐
//!                                              ├─ diff_all ──▶ DiffReport ──plan──▶ SyncTasks ──▶ Orchestrator
//! OffsetFetcher ──build────▶ LookupIndex (B) ──┘
//! ```
//!
//! A [`Reconciler`] is assembled once from its collaborators with
//! [`ReconcilerBuilder`]; missing collaborators are reported as
//! [`Error::FatalConfig`] before any remote call is made.

use std::sync::Arc;

use serde::Serialize;

use crate::config::ReconcileConfig;
use crate::diff::{DiffReport, RuleTable, diff_all};
use crate::error::{Error, Result};
use crate::events::{EventSink, TracingSink};
use crate::index::{IndexBuilder, IndexStats};
use crate::record::{Normalizer, Profile};
use crate::source::{
    CheckpointStore, CredentialProvider, CursorFetcher, CursorPages, MemoryCheckpoint,
    OffsetFetcher, OffsetPages, UpdateApplier, VendorLookup, VendorMapping,
};
use crate::sync::{CancelFlag, Orchestrator, RateGate, RetryPolicy, SharedCredentials, SyncTask};

/// What a run does after comparing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunMode {
    /// Report discrepancies only
    Compare,
    /// Plan corrective tasks without applying them
    DryRun,
    /// Plan and apply corrective tasks
    Sync,
}

/// Headline counts for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total_source: usize,
    pub found_in_target: usize,
    pub in_sync: usize,
    /// Total field mismatches
    pub discrepancy_count: usize,
    pub devices_with_discrepancies: usize,
    pub missing_count: usize,
    pub updated_count: usize,
    pub failed_count: usize,
    pub skipped_count: usize,
    /// Records dropped for lack of a key, both systems
    pub unindexable: usize,
    /// Field-level normalization and derivation failures
    pub malformed_fields: usize,
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub mode: RunMode,
    pub summary: RunSummary,
    pub diff: DiffReport,
    /// Planned or executed tasks, in Source A order
    pub tasks: Vec<SyncTask>,
    pub source_stats: IndexStats,
    pub target_stats: IndexStats,
    pub cancelled: bool,
}

/// Collaborators and configuration for reconciliation runs.
pub struct Reconciler {
    config: ReconcileConfig,
    source_fetcher: Arc<dyn CursorFetcher>,
    target_fetcher: Arc<dyn OffsetFetcher>,
    applier: Option<Arc<dyn UpdateApplier>>,
    source_credentials: Arc<SharedCredentials>,
    target_credentials: Arc<SharedCredentials>,
    rules: RuleTable,
    checkpoint: Arc<dyn CheckpointStore>,
    sink: Arc<dyn EventSink>,
    cancel: CancelFlag,
}

impl Reconciler {
    pub fn builder() -> ReconcilerBuilder {
        ReconcilerBuilder::default()
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Fetch both systems, compare, and depending on `mode` plan or apply
    /// corrective updates.
    ///
    /// # Errors
    ///
    /// Configuration problems, unrecoverable page fetches, credential
    /// failures and checkpoint failures. Per-device problems are reported in
    /// the returned [`RunReport`] instead.
    pub async fn run(&self, mode: RunMode) -> Result<RunReport> {
        self.config.validate()?;
        let applier = match (mode, &self.applier) {
            (RunMode::Sync, None) => {
                return Err(Error::fatal_config(
                    "sync mode requires an update applier",
                ));
            }
            (_, applier) => applier.clone(),
        };

        let sync = &self.config.sync;
        let policy = RetryPolicy::from_config(sync);
        let fetch_gate = RateGate::new(sync.request_interval(0));
        let sink = self.sink.as_ref();

        tracing::info!(?mode, "Starting reconciliation");

        let source = IndexBuilder::new(
            Normalizer::new(Profile::SOURCE_A),
            &policy,
            &fetch_gate,
            &self.source_credentials,
            sink,
        )
        .collect(&mut CursorPages::new("source-a", self.source_fetcher.as_ref()))
        .await?;

        let target = IndexBuilder::new(
            Normalizer::new(Profile::SOURCE_B),
            &policy,
            &fetch_gate,
            &self.target_credentials,
            sink,
        )
        .build(&mut OffsetPages::new("source-b", self.target_fetcher.as_ref()))
        .await?;

        let diff = diff_all(&source.records, &target, &self.rules, sink);

        let mut tasks = match mode {
            RunMode::Compare => Vec::new(),
            RunMode::DryRun | RunMode::Sync => diff.plan_tasks(sync.force),
        };

        let mut cancelled = false;
        if let (RunMode::Sync, Some(applier)) = (mode, applier) {
            let outcome = Orchestrator::new(
                applier,
                Arc::clone(&self.target_credentials),
                Arc::clone(&self.checkpoint),
                sync.clone(),
            )
            .with_sink(Arc::clone(&self.sink))
            .with_cancel(self.cancel.clone())
            .run(tasks)
            .await?;
            cancelled = outcome.cancelled();
            tasks = outcome.into_tasks();
        } else if mode == RunMode::DryRun {
            for task in &tasks {
                tracing::info!(
                    key = %task.key(),
                    target_id = %task.target_id(),
                    fields = task.desired_fields().len(),
                    "Dry run: would update"
                );
            }
        }

        let summary = summarize(&diff, &tasks, &source.stats, target.stats());
        tracing::info!(
            total = summary.total_source,
            found = summary.found_in_target,
            in_sync = summary.in_sync,
            missing = summary.missing_count,
            updated = summary.updated_count,
            failed = summary.failed_count,
            "Reconciliation finished"
        );

        Ok(RunReport {
            mode,
            summary,
            diff,
            tasks,
            source_stats: source.stats,
            target_stats: target.stats().clone(),
            cancelled,
        })
    }
}

fn summarize(
    diff: &DiffReport,
    tasks: &[SyncTask],
    source: &IndexStats,
    target: &IndexStats,
) -> RunSummary {
    use crate::sync::TaskStatus;
    let count = |status| tasks.iter().filter(|t| t.status() == status).count();

    RunSummary {
        total_source: source.indexed,
        found_in_target: diff.comparisons.len(),
        in_sync: diff.in_sync_count(),
        discrepancy_count: diff.discrepancy_count(),
        devices_with_discrepancies: diff.devices_with_discrepancies(),
        missing_count: diff.missing.len(),
        updated_count: count(TaskStatus::Succeeded),
        failed_count: count(TaskStatus::Failed),
        skipped_count: count(TaskStatus::Skipped),
        unindexable: source.unindexable + target.unindexable,
        malformed_fields: source.malformed.len()
            + target.malformed.len()
            + diff.malformed().count(),
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .field("rules", &self.rules)
            .field("has_applier", &self.applier.is_some())
            .finish_non_exhaustive()
    }
}

/// Assembles a [`Reconciler`].
#[derive(Default)]
pub struct ReconcilerBuilder {
    config: Option<ReconcileConfig>,
    source_fetcher: Option<Arc<dyn CursorFetcher>>,
    target_fetcher: Option<Arc<dyn OffsetFetcher>>,
    applier: Option<Arc<dyn UpdateApplier>>,
    source_credentials: Option<Arc<dyn CredentialProvider>>,
    target_credentials: Option<Arc<dyn CredentialProvider>>,
    vendors: Option<Arc<dyn VendorLookup>>,
    checkpoint: Option<Arc<dyn CheckpointStore>>,
    sink: Option<Arc<dyn EventSink>>,
    cancel: Option<CancelFlag>,
}

impl ReconcilerBuilder {
    pub fn config(mut self, config: ReconcileConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn source_fetcher(mut self, fetcher: Arc<dyn CursorFetcher>) -> Self {
        self.source_fetcher = Some(fetcher);
        self
    }

    pub fn target_fetcher(mut self, fetcher: Arc<dyn OffsetFetcher>) -> Self {
        self.target_fetcher = Some(fetcher);
        self
    }

    pub fn applier(mut self, applier: Arc<dyn UpdateApplier>) -> Self {
        self.applier = Some(applier);
        self
    }

    pub fn source_credentials(mut self, provider: Arc<dyn CredentialProvider>) -> Self {
        self.source_credentials = Some(provider);
        self
    }

    pub fn target_credentials(mut self, provider: Arc<dyn CredentialProvider>) -> Self {
        self.target_credentials = Some(provider);
        self
    }

    /// Vendor names. Defaults to the file at `paths.vendor_mapping`, or no
    /// mapping at all.
    pub fn vendors(mut self, vendors: Arc<dyn VendorLookup>) -> Self {
        self.vendors = Some(vendors);
        self
    }

    /// Progress store. Defaults to the file at `paths.checkpoint`, or an
    /// in-memory store.
    pub fn checkpoint(mut self, checkpoint: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// # Errors
    ///
    /// [`Error::FatalConfig`] if a fetcher or credential provider is missing,
    /// the configuration is invalid, or the vendor mapping file is unreadable.
    pub fn build(self) -> Result<Reconciler> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let source_fetcher = self
            .source_fetcher
            .ok_or_else(|| Error::fatal_config("no Source A fetcher configured"))?;
        let target_fetcher = self
            .target_fetcher
            .ok_or_else(|| Error::fatal_config("no Source B fetcher configured"))?;
        let source_provider = self
            .source_credentials
            .ok_or_else(|| Error::fatal_config("no Source A credential provider configured"))?;
        let target_provider = self
            .target_credentials
            .ok_or_else(|| Error::fatal_config("no Source B credential provider configured"))?;

        let vendors: Arc<dyn VendorLookup> = match (self.vendors, &config.paths.vendor_mapping) {
            (Some(vendors), _) => vendors,
            (None, Some(path)) => Arc::new(
                VendorMapping::load(path).map_err(|e| Error::fatal_config(e.to_string()))?,
            ),
            (None, None) => Arc::new(VendorMapping::default()),
        };

        let checkpoint: Arc<dyn CheckpointStore> = match (self.checkpoint, &config.paths.checkpoint)
        {
            (Some(checkpoint), _) => checkpoint,
            (None, Some(path)) => Arc::new(fleet_fs::CheckpointFile::new(path)),
            (None, None) => Arc::new(MemoryCheckpoint::new()),
        };

        let skew = config.sync.token_refresh_skew();
        Ok(Reconciler {
            source_fetcher,
            target_fetcher,
            applier: self.applier,
            source_credentials: Arc::new(SharedCredentials::new("source-a", source_provider, skew)),
            target_credentials: Arc::new(SharedCredentials::new("source-b", target_provider, skew)),
            rules: RuleTable::purchase(vendors),
            checkpoint,
            sink: self.sink.unwrap_or_else(|| Arc::new(TracingSink)),
            cancel: self.cancel.unwrap_or_default(),
            config,
        })
    }
}
