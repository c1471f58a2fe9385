//! Batch runner for sync tasks
//!
//! The orchestrator loop owns the task list and the checkpoint. Workers only
//! see one task at a time and hand it back when it reaches a terminal
//! status, so checkpoint writes never race.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::task::JoinSet;

use crate::config::SyncConfig;
use crate::error::{Error, RemoteError, Result};
use crate::events::{Event, EventSink, TracingSink};
use crate::source::{CheckpointStore, UpdateApplier};
use crate::sync::credentials::SharedCredentials;
use crate::sync::retry::{RateGate, RetryPolicy, saturating_millis};
use crate::sync::task::{SyncTask, TaskStatus};

/// Shared operator interrupt.
///
/// Setting it stops the orchestrator from scheduling further tasks; tasks
/// already in flight run to completion.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Every task of a run in its final state.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOutcome {
    tasks: Vec<SyncTask>,
    cancelled: bool,
    checkpoint_cleared: bool,
}

impl SyncOutcome {
    /// Tasks in the order they were submitted.
    pub fn tasks(&self) -> &[SyncTask] {
        &self.tasks
    }

    pub fn into_tasks(self) -> Vec<SyncTask> {
        self.tasks
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status() == status).count()
    }

    pub fn succeeded(&self) -> usize {
        self.count(TaskStatus::Succeeded)
    }

    pub fn failed(&self) -> usize {
        self.count(TaskStatus::Failed)
    }

    pub fn skipped(&self) -> usize {
        self.count(TaskStatus::Skipped)
    }

    /// Tasks never scheduled because the run was cancelled.
    pub fn unscheduled(&self) -> usize {
        self.count(TaskStatus::Pending)
    }

    pub fn cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn checkpoint_cleared(&self) -> bool {
        self.checkpoint_cleared
    }
}

/// What a single worker needs; cloned into each spawned task.
struct Worker {
    applier: Arc<dyn UpdateApplier>,
    credentials: Arc<SharedCredentials>,
    sink: Arc<dyn EventSink>,
    gate: Arc<RateGate>,
    policy: RetryPolicy,
}

impl Worker {
    /// Drive one task to a terminal status.
    ///
    /// A fatal error marks the task Failed and is handed back alongside it.
    async fn drive(&self, mut task: SyncTask) -> (SyncTask, Option<Error>) {
        let fatal = match self.attempt(&mut task).await {
            Ok(()) => None,
            Err(e) => {
                if task.status() == TaskStatus::InFlight {
                    if let Err(transition) = task.fail(e.to_string()) {
                        tracing::warn!(key = %task.key(), error = %transition, "Could not mark task failed");
                    }
                }
                Some(e)
            }
        };
        self.sink.emit(Event::TaskFinished {
            key: task.key().to_string(),
            status: task.status(),
            attempts: task.attempts(),
        });
        (task, fatal)
    }

    async fn attempt(&self, task: &mut SyncTask) -> Result<()> {
        task.begin()?;
        let mut schedule = self.policy.schedule();
        let mut lease = self.credentials.current(self.sink.as_ref()).await?;

        loop {
            self.gate.wait().await;
            let result = self
                .applier
                .apply(
                    task.key(),
                    task.target_id(),
                    task.desired_fields(),
                    &lease.token,
                )
                .await;

            match result {
                Ok(()) => {
                    if task.attempts() > 0 || task.refreshes() > 0 {
                        tracing::debug!(key = %task.key(), attempts = task.attempts() + 1, "Update applied after retry");
                    }
                    task.record_attempt()?;
                    task.succeed()?;
                    return Ok(());
                }
                Err(RemoteError::AuthExpired) => {
                    if task.refreshes() >= self.policy.refresh_budget {
                        return Err(Error::RefreshBudgetExhausted {
                            key: task.key().to_string(),
                            budget: self.policy.refresh_budget,
                        });
                    }
                    task.record_refresh()?;
                    lease = self
                        .credentials
                        .refresh_after(lease.generation, self.sink.as_ref())
                        .await?;
                }
                Err(RemoteError::NotFound(detail)) => {
                    task.record_attempt()?;
                    task.fail(format!("not found: {detail}"))?;
                    return Ok(());
                }
                Err(err @ RemoteError::Transient(_)) => {
                    task.record_attempt()?;
                    task.record_error(err.to_string())?;
                    if task.attempts() >= self.policy.max_attempts {
                        task.fail(format!(
                            "gave up after {} attempts: {err}",
                            task.attempts()
                        ))?;
                        return Ok(());
                    }
                    let delay = schedule.next_delay();
                    self.sink.emit(Event::Retrying {
                        key: task.key().to_string(),
                        attempt: task.attempts(),
                        delay_ms: saturating_millis(delay),
                        reason: err.to_string(),
                    });
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Runs sync tasks in checkpointed batches over a bounded worker pool.
pub struct Orchestrator {
    applier: Arc<dyn UpdateApplier>,
    credentials: Arc<SharedCredentials>,
    checkpoint: Arc<dyn CheckpointStore>,
    sink: Arc<dyn EventSink>,
    config: SyncConfig,
    cancel: CancelFlag,
}

impl Orchestrator {
    pub fn new(
        applier: Arc<dyn UpdateApplier>,
        credentials: Arc<SharedCredentials>,
        checkpoint: Arc<dyn CheckpointStore>,
        config: SyncConfig,
    ) -> Self {
        Self {
            applier,
            credentials,
            checkpoint,
            sink: Arc::new(TracingSink),
            config,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Run `tasks` to completion, cancellation, or a fatal error.
    ///
    /// Keys already in the checkpoint are skipped. After every batch the
    /// checkpoint is saved with the keys confirmed so far. A clean run with
    /// no failures clears the checkpoint.
    ///
    /// # Errors
    ///
    /// Exhausted refresh budgets, credential provider failures and checkpoint
    /// failures abort the run. Confirmed keys are saved before returning.
    pub async fn run(&self, tasks: Vec<SyncTask>) -> Result<SyncOutcome> {
        self.config.validate()?;

        let mut confirmed: BTreeSet<String> = self.checkpoint.load()?;
        let total = tasks.len();
        let worker = Arc::new(Worker {
            applier: Arc::clone(&self.applier),
            credentials: Arc::clone(&self.credentials),
            sink: Arc::clone(&self.sink),
            gate: Arc::new(RateGate::new(self.config.request_interval(total))),
            policy: RetryPolicy::from_config(&self.config),
        });

        tracing::info!(
            tasks = total,
            resumed = confirmed.len(),
            workers = self.config.workers,
            interval_ms = saturating_millis(worker.gate.interval()),
            "Starting sync"
        );

        // Slots keep submission order regardless of completion order
        let mut slots: Vec<Option<SyncTask>> = Vec::with_capacity(total);
        let mut queue: Vec<usize> = Vec::new();
        for mut task in tasks {
            if confirmed.contains(task.key()) {
                task.skip()?;
                self.sink.emit(Event::TaskFinished {
                    key: task.key().to_string(),
                    status: task.status(),
                    attempts: 0,
                });
            } else {
                queue.push(slots.len());
            }
            slots.push(Some(task));
        }

        let mut cancelled = false;
        for batch in queue.chunks(self.config.batch_size) {
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let (newly, fatal, interrupted) = self.run_batch(batch, &mut slots, &worker).await;
            cancelled |= interrupted;

            let mut added = 0usize;
            for key in newly {
                if confirmed.insert(key) {
                    added += 1;
                }
            }
            if added > 0 {
                self.checkpoint.save(&confirmed)?;
                self.sink.emit(Event::CheckpointSaved {
                    keys: confirmed.len(),
                });
            }

            if let Some(err) = fatal {
                tracing::error!(error = %err, "Aborting sync");
                return Err(err);
            }
            if cancelled {
                break;
            }
        }

        let tasks: Vec<SyncTask> = slots.into_iter().flatten().collect();
        let failed = tasks
            .iter()
            .filter(|t| t.status() == TaskStatus::Failed)
            .count();

        let mut checkpoint_cleared = false;
        if cancelled {
            tracing::warn!(confirmed = confirmed.len(), "Sync cancelled; checkpoint kept");
        } else if failed == 0 {
            self.checkpoint.clear()?;
            checkpoint_cleared = true;
        } else {
            tracing::warn!(failed, "Sync finished with failures; checkpoint kept");
        }

        Ok(SyncOutcome {
            tasks,
            cancelled,
            checkpoint_cleared,
        })
    }

    /// Drive one batch through the worker pool.
    ///
    /// Returns the keys confirmed in this batch, the first fatal error, and
    /// whether scheduling stopped because of cancellation.
    async fn run_batch(
        &self,
        batch: &[usize],
        slots: &mut [Option<SyncTask>],
        worker: &Arc<Worker>,
    ) -> (Vec<String>, Option<Error>, bool) {
        let workers = self.config.workers.max(1);
        let mut pool: JoinSet<(usize, SyncTask, Option<Error>)> = JoinSet::new();
        let mut confirmed = Vec::new();
        let mut fatal: Option<Error> = None;
        let mut interrupted = false;

        for &slot in batch {
            while pool.len() >= workers {
                if let Some(joined) = pool.join_next().await {
                    settle(joined, slots, &mut confirmed, &mut fatal);
                }
            }
            if fatal.is_some() {
                break;
            }
            // Checked after a slot frees up so a cancel raised meanwhile is seen
            if self.cancel.is_cancelled() {
                interrupted = true;
                break;
            }

            let Some(task) = slots[slot].take() else {
                continue;
            };
            let worker = Arc::clone(worker);
            pool.spawn(async move {
                let (task, err) = worker.drive(task).await;
                (slot, task, err)
            });
        }

        while let Some(joined) = pool.join_next().await {
            settle(joined, slots, &mut confirmed, &mut fatal);
        }

        (confirmed, fatal, interrupted)
    }
}

/// Put a finished task back in its slot and note confirmation or failure.
fn settle(
    joined: std::result::Result<(usize, SyncTask, Option<Error>), tokio::task::JoinError>,
    slots: &mut [Option<SyncTask>],
    confirmed: &mut Vec<String>,
    fatal: &mut Option<Error>,
) {
    match joined {
        Ok((slot, task, err)) => {
            if task.status() == TaskStatus::Succeeded {
                confirmed.push(task.key().to_string());
            }
            slots[slot] = Some(task);
            if fatal.is_none() {
                *fatal = err;
            }
        }
        Err(e) => {
            fatal.get_or_insert(Error::Worker {
                message: e.to_string(),
            });
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_flag_is_shared() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(!clone.is_cancelled());
        flag.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn outcome_counts() {
        let mut ok = SyncTask::new("A", "1", vec![]);
        ok.begin().unwrap();
        ok.succeed().unwrap();
        let mut skipped = SyncTask::new("B", "2", vec![]);
        skipped.skip().unwrap();
        let pending = SyncTask::new("C", "3", vec![]);

        let outcome = SyncOutcome {
            tasks: vec![ok, skipped, pending],
            cancelled: true,
            checkpoint_cleared: false,
        };
        assert_eq!(outcome.succeeded(), 1);
        assert_eq!(outcome.skipped(), 1);
        assert_eq!(outcome.unscheduled(), 1);
        assert_eq!(outcome.failed(), 0);
        assert!(outcome.cancelled());
    }
}
