//! Durable local storage for the fleet reconciler
//!
//! Provides atomic, lock-protected writes, format-agnostic configuration
//! loading, and the file-backed checkpoint used to resume interrupted runs.

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod io;

pub use checkpoint::{CheckpointDocument, CheckpointFile};
pub use config::ConfigStore;
pub use error::{Error, Result};
pub use io::RobustnessConfig;
