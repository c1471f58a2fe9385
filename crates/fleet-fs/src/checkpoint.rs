//! File-backed checkpoint for resumable sync runs
//!
//! The checkpoint is the set of device keys whose corrective update has been
//! confirmed by the remote system. It is persisted as JSON and replaced
//! atomically on every save, so an interrupted run leaves either the previous
//! or the new set on disk.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::io::{self, RobustnessConfig};
use crate::{Error, Result};

const FORMAT_VERSION: u32 = 1;

/// On-disk representation of a checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointDocument {
    /// Checkpoint format version for forward compatibility
    pub version: u32,
    /// When the checkpoint was last written
    pub updated_at: DateTime<Utc>,
    /// Processed keys, sorted
    pub keys: BTreeSet<String>,
}

impl CheckpointDocument {
    pub fn new(keys: BTreeSet<String>) -> Self {
        Self {
            version: FORMAT_VERSION,
            updated_at: Utc::now(),
            keys,
        }
    }
}

/// A checkpoint stored in a single JSON file.
#[derive(Debug, Clone)]
pub struct CheckpointFile {
    path: PathBuf,
    robustness: RobustnessConfig,
}

impl CheckpointFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            robustness: RobustnessConfig::default(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the processed key set. A missing file is an empty checkpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CheckpointCorrupt`] if the file exists but is not a
    /// valid checkpoint document.
    pub fn load(&self) -> Result<BTreeSet<String>> {
        if !self.path.exists() {
            return Ok(BTreeSet::new());
        }

        let content = io::read_text(&self.path)?;
        let document: CheckpointDocument =
            serde_json::from_str(&content).map_err(|e| Error::CheckpointCorrupt {
                path: self.path.clone(),
                message: e.to_string(),
            })?;

        if document.version > FORMAT_VERSION {
            return Err(Error::CheckpointCorrupt {
                path: self.path.clone(),
                message: format!("unsupported checkpoint version {}", document.version),
            });
        }

        tracing::debug!(
            path = %self.path.display(),
            keys = document.keys.len(),
            "Loaded checkpoint"
        );
        Ok(document.keys)
    }

    /// Replace the checkpoint with `keys`.
    pub fn save(&self, keys: &BTreeSet<String>) -> Result<()> {
        let document = CheckpointDocument::new(keys.clone());
        let content = serde_json::to_string_pretty(&document).map_err(|e| {
            Error::ConfigSerialize {
                path: self.path.clone(),
                format: "JSON".into(),
                message: e.to_string(),
            }
        })?;
        io::write_atomic(&self.path, content.as_bytes(), self.robustness)
    }

    /// Remove the checkpoint and its lock sidecar.
    pub fn clear(&self) -> Result<()> {
        for path in [self.path.clone(), io::lock_path(&self.path)] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::io(path, e)),
            }
        }
        Ok(())
    }
}
