//! Shared test utilities for the fleet-reconcile workspace.
//!
//! Dev-dependency only, never published.
//!
//! # Modules
//!
//! - [`fakes`]: in-memory collaborators with scripted outcomes and call logs
//! - [`payloads`]: raw Source A / Source B payload builders

pub mod fakes;
pub mod payloads;

pub use fakes::{
    AppliedCall, CountingCredentials, ScriptedApplier, VecCursorFetcher, VecOffsetFetcher,
};
pub use payloads::{serial, source_a_device, source_b_computer, synced_fleet};
