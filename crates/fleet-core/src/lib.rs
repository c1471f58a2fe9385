//! Core reconciliation layer for fleet inventory
//!
//! This crate compares device records held by two inventory systems and
//! corrects the drift, implementing:
//!
//! - **Normalization**: heterogeneous payloads become one [`DeviceRecord`] schema
//! - **Lookup index**: whole-population fetch with O(1) key lookups
//! - **Diff engine**: ordered per-field discrepancies from an explicit rule table
//! - **Sync orchestrator**: retrying, credential-refreshing, checkpointed updates
//! - **Staleness detection**: fleet-relative "latest version" per application
//! - **Usage rollups**: foreground minutes per computer, scoped by [`ComputerGroup`]
//!
//! # Architecture
//!
//! `fleet-core` sits above `fleet-fs` and below whatever binary wires in the
//! real HTTP collaborators:
//!
//! ```text
//!        CLI / scheduler (collaborators: fetchers, applier, credentials)
//!                        |
//!                   fleet-core
//!     +-------+------+---+----+-------+---------+---------+
//!     |       |      |        |       |         |         |
//!  record  index   diff     sync   version  staleness  usage/group
//!                        |
//!                    fleet-fs  (config files, atomic checkpoint)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use fleet_core::{Reconciler, RunMode, Result};
//!
//! async fn example(builder: fleet_core::ReconcilerBuilder) -> Result<()> {
//!     let report = builder.build()?.run(RunMode::Compare).await?;
//!     println!("{} devices need attention", report.summary.devices_with_discrepancies);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod diff;
pub mod error;
pub mod events;
pub mod group;
pub mod index;
pub mod logging;
pub mod reconcile;
pub mod record;
pub mod source;
pub mod staleness;
pub mod sync;
pub mod usage;
pub mod version;

pub use config::{InventoryConfig, PathsConfig, ReconcileConfig, SyncConfig};
pub use diff::{
    DeviceComparison, DeviceDiff, DiffReport, Discrepancy, FieldRule, MissingDevice, RuleTable,
    diff, diff_all,
};
pub use error::{Error, MalformedField, RemoteError, Result};
pub use events::{Event, EventSink, RecordingSink, TracingSink};
pub use group::{ComputerGroup, OnComputer};
pub use index::{IndexBuilder, IndexStats, LookupIndex, Snapshot};
pub use reconcile::{Reconciler, ReconcilerBuilder, RunMode, RunReport, RunSummary};
pub use record::{ABSENT, DeviceRecord, Field, FieldValue, Normalizer, Origin, Profile, RawRecord};
pub use source::{
    CheckpointStore, CredentialProvider, CursorFetcher, CursorPages, MemoryCheckpoint,
    OffsetFetcher, OffsetPages, PageSource, Token, UpdateApplier, VendorLookup, VendorMapping,
};
pub use staleness::{AppInstallation, AppSummary, OutdatedInstall, StalenessReport, detect};
pub use sync::{CancelFlag, Orchestrator, SharedCredentials, SyncOutcome, SyncTask, TaskStatus};
pub use usage::{
    AppMinutes, ComputerUsage, UsageReport, UsageSample, UsageWindow, aggregate_usage,
    minutes_by_app,
};
pub use version::{VersionKey, VersionToken, compare, tokenize};
