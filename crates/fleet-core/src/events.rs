//! Per-run reporting sink
//!
//! Components report noteworthy events to an explicit [`EventSink`] handed in
//! by the caller instead of a process-global logger. The default
//! [`TracingSink`] forwards to `tracing`; tests use [`RecordingSink`] to
//! assert on what was reported.

use std::sync::Mutex;

use crate::error::MalformedField;
use crate::sync::TaskStatus;

/// Something worth reporting during a run.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A page of records was fetched.
    PageFetched {
        source: String,
        page: usize,
        records: usize,
    },
    /// A raw record had no extractable key.
    Unindexable { source: String },
    /// A key appeared more than once; the first record was kept.
    DuplicateKey { source: String, key: String },
    /// A field was skipped during normalization or derivation.
    Malformed(MalformedField),
    /// A Source A device has no counterpart in Source B.
    Missing { key: String },
    /// A device was compared and has `count` discrepancies.
    Compared { key: String, count: usize },
    /// A remote call is about to be retried.
    Retrying {
        key: String,
        attempt: u32,
        delay_ms: u64,
        reason: String,
    },
    /// Credentials were refreshed.
    CredentialsRefreshed { source: String, generation: u64 },
    /// A sync task reached a terminal status.
    TaskFinished {
        key: String,
        status: TaskStatus,
        attempts: u32,
    },
    /// The checkpoint was persisted.
    CheckpointSaved { keys: usize },
}

/// Receives run events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

/// Forwards events to `tracing` with structured fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: Event) {
        match event {
            Event::PageFetched {
                source,
                page,
                records,
            } => tracing::info!(%source, page, records, "Fetched page"),
            Event::Unindexable { source } => {
                tracing::debug!(%source, "Dropped record without a key")
            }
            Event::DuplicateKey { source, key } => {
                tracing::warn!(%source, %key, "Duplicate key; keeping first record")
            }
            Event::Malformed(issue) => tracing::warn!(
                key = %issue.key,
                field = %issue.field,
                "Malformed field skipped: {}",
                issue.reason
            ),
            Event::Missing { key } => tracing::warn!(%key, "Device not found in target"),
            Event::Compared { key, count } => {
                tracing::debug!(%key, discrepancies = count, "Compared device")
            }
            Event::Retrying {
                key,
                attempt,
                delay_ms,
                reason,
            } => tracing::info!(%key, attempt, delay_ms, %reason, "Retrying remote call"),
            Event::CredentialsRefreshed { source, generation } => {
                tracing::info!(%source, generation, "Refreshed credentials")
            }
            Event::TaskFinished {
                key,
                status,
                attempts,
            } => match status {
                TaskStatus::Failed => tracing::error!(%key, attempts, "Update failed"),
                _ => tracing::info!(%key, ?status, attempts, "Task finished"),
            },
            Event::CheckpointSaved { keys } => tracing::debug!(keys, "Checkpoint saved"),
        }
    }
}

/// Keeps every event in memory, in emission order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Event>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
