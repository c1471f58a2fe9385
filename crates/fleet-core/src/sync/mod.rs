//! Corrective updates
//!
//! [`SyncTask`]s carry the desired fields for one device. The
//! [`Orchestrator`] drives them through the [`UpdateApplier`] with retry,
//! credential refresh and a resumable checkpoint.
//!
//! [`UpdateApplier`]: crate::source::UpdateApplier

mod credentials;
mod orchestrator;
mod retry;
mod task;

pub use credentials::{Lease, SharedCredentials};
pub use orchestrator::{CancelFlag, Orchestrator, SyncOutcome};
pub use retry::{BackoffSchedule, RateGate, RetryPolicy, saturating_millis};
pub use task::{SyncTask, TaskStatus};
