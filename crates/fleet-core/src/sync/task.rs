//! Sync task state machine
//!
//! ```text
//! Pending ──begin──▶ InFlight ──succeed──▶ Succeeded
//!    │                 │  ▲
//!    │                 │  └─ retry (attempts += 1)
//!    │                 └────fail────▶ Failed
//!    └──skip──▶ Skipped
//! ```
//!
//! Transitions only move forward; anything else is rejected with
//! [`Error::InvalidTransition`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::record::{Field, FieldValue};

/// Lifecycle of a [`SyncTask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    InFlight,
    Succeeded,
    Failed,
    Skipped,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Skipped
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One corrective update for one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncTask {
    key: String,
    target_id: String,
    desired_fields: Vec<(Field, FieldValue)>,
    status: TaskStatus,
    attempts: u32,
    refreshes: u32,
    last_error: Option<String>,
}

impl SyncTask {
    /// A new pending task. `desired_fields` are sent in the given order.
    pub fn new(
        key: impl Into<String>,
        target_id: impl Into<String>,
        desired_fields: Vec<(Field, FieldValue)>,
    ) -> Self {
        Self {
            key: key.into(),
            target_id: target_id.into(),
            desired_fields,
            status: TaskStatus::Pending,
            attempts: 0,
            refreshes: 0,
            last_error: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    pub fn desired_fields(&self) -> &[(Field, FieldValue)] {
        &self.desired_fields
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    /// Ordinary attempts charged against the retry budget.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Credential refreshes performed on behalf of this task.
    pub fn refreshes(&self) -> u32 {
        self.refreshes
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn transition(&mut self, allowed: &[TaskStatus], to: TaskStatus) -> Result<()> {
        if !allowed.contains(&self.status) {
            return Err(Error::InvalidTransition {
                key: self.key.clone(),
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        Ok(())
    }

    /// Pending → InFlight.
    pub fn begin(&mut self) -> Result<()> {
        self.transition(&[TaskStatus::Pending], TaskStatus::InFlight)
    }

    /// Pending → Skipped.
    pub fn skip(&mut self) -> Result<()> {
        self.transition(&[TaskStatus::Pending], TaskStatus::Skipped)
    }

    /// Charge one ordinary attempt. Stays InFlight.
    pub fn record_attempt(&mut self) -> Result<()> {
        self.transition(&[TaskStatus::InFlight], TaskStatus::InFlight)?;
        self.attempts += 1;
        Ok(())
    }

    /// Note a retryable failure. Stays InFlight.
    pub fn record_error(&mut self, detail: impl Into<String>) -> Result<()> {
        self.transition(&[TaskStatus::InFlight], TaskStatus::InFlight)?;
        self.last_error = Some(detail.into());
        Ok(())
    }

    /// Note a credential refresh. Stays InFlight; not an attempt.
    pub fn record_refresh(&mut self) -> Result<()> {
        self.transition(&[TaskStatus::InFlight], TaskStatus::InFlight)?;
        self.refreshes += 1;
        Ok(())
    }

    /// InFlight → Succeeded.
    pub fn succeed(&mut self) -> Result<()> {
        self.transition(&[TaskStatus::InFlight], TaskStatus::Succeeded)?;
        self.last_error = None;
        Ok(())
    }

    /// InFlight → Failed.
    pub fn fail(&mut self, detail: impl Into<String>) -> Result<()> {
        self.transition(&[TaskStatus::InFlight], TaskStatus::Failed)?;
        self.last_error = Some(detail.into());
        Ok(())
    }
}
