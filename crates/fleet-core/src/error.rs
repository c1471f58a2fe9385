//! Error types for fleet-core
//!
//! Three families live here:
//!
//! - [`Error`]: run-level failures. Only configuration problems, exhausted
//!   credential refreshes, and unrecoverable fetches surface as `Err`.
//! - [`RemoteError`]: the typed outcome of a single remote call, returned by
//!   collaborators and turned into retry decisions by the caller.
//! - [`MalformedField`]: a per-field normalization failure. Collected into
//!   reports, never propagated.

use serde::{Deserialize, Serialize};

use crate::record::Field;

/// Result type for fleet-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that abort a reconciliation run
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Required configuration or collaborator is missing or invalid
    #[error("Fatal configuration error: {message}")]
    FatalConfig { message: String },

    /// The credential provider could not produce a token
    #[error("Credential refresh failed for {source_name}: {message}")]
    CredentialRefresh { source_name: String, message: String },

    /// A task kept hitting expired credentials after every refresh
    #[error("Credential refresh budget of {budget} exhausted while processing {key}")]
    RefreshBudgetExhausted { key: String, budget: u32 },

    /// Fetching a page of records failed after all retries
    #[error("Fetching {source_name} failed after {attempts} attempts: {source}")]
    FetchFailed {
        source_name: String,
        attempts: u32,
        #[source]
        source: RemoteError,
    },

    /// A sync task was driven through a transition the state machine forbids
    #[error("Invalid task transition for {key}: {from} -> {to}")]
    InvalidTransition {
        key: String,
        from: String,
        to: String,
    },

    /// A sync worker stopped without handing its task back
    #[error("Sync worker failed: {message}")]
    Worker { message: String },

    /// Checkpoint store failure
    #[error("Checkpoint error: {message}")]
    Checkpoint { message: String },

    // Transparent wrappers for underlying crate errors
    /// Storage error from fleet-fs
    #[error(transparent)]
    Fs(#[from] fleet_fs::Error),
}

impl Error {
    pub fn fatal_config(message: impl Into<String>) -> Self {
        Self::FatalConfig {
            message: message.into(),
        }
    }
}

/// Outcome classes of a failed remote call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// The bearer token was rejected; refresh and retry
    #[error("credentials expired")]
    AuthExpired,

    /// The record does not exist remotely; never retried
    #[error("not found: {0}")]
    NotFound(String),

    /// Network or server failure; retried with backoff
    #[error("transient failure: {0}")]
    Transient(String),
}

impl RemoteError {
    pub fn transient(detail: impl Into<String>) -> Self {
        Self::Transient(detail.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::Transient(_))
    }
}

/// A single field that could not be normalized or derived
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("malformed field {field} on {key}: {reason}")]
pub struct MalformedField {
    /// Device key the field belongs to
    pub key: String,
    /// The canonical field affected
    pub field: Field,
    /// Raw value as observed, if any
    pub raw: Option<String>,
    /// Why it was rejected
    pub reason: String,
}

impl MalformedField {
    pub fn new(
        key: impl Into<String>,
        field: Field,
        raw: Option<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            field,
            raw,
            reason: reason.into(),
        }
    }
}
