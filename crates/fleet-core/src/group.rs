//! Computer groups
//!
//! A named set of computer keys used to narrow staleness and usage reports
//! to part of the fleet. Keys are normalized the same way device keys are,
//! so `c02xk0aajg5h ` and `C02XK0AAJG5H` name the same computer.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::record::{DeviceRecord, normalize_key};
use crate::staleness::AppInstallation;
use crate::usage::UsageSample;

/// Anything attributed to a single computer.
pub trait OnComputer {
    /// Raw computer key as the source reported it.
    fn computer(&self) -> &str;
}

impl OnComputer for AppInstallation {
    fn computer(&self) -> &str {
        &self.computer
    }
}

impl OnComputer for UsageSample {
    fn computer(&self) -> &str {
        &self.computer
    }
}

impl OnComputer for DeviceRecord {
    fn computer(&self) -> &str {
        self.key()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputerGroup {
    name: String,
    members: BTreeSet<String>,
}

impl ComputerGroup {
    /// Build a group from raw member keys. Blank keys are dropped.
    pub fn new<I, S>(name: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let name = name.into();
        let members: BTreeSet<String> = members
            .into_iter()
            .filter_map(|m| normalize_key(m.as_ref()))
            .collect();
        tracing::debug!(group = %name, members = members.len(), "Built computer group");
        Self { name, members }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Normalized member keys in order.
    pub fn members(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(String::as_str)
    }

    pub fn contains(&self, computer: &str) -> bool {
        normalize_key(computer).is_some_and(|key| self.members.contains(&key))
    }

    /// Items belonging to a member computer, in input order.
    pub fn scope<'a, T: OnComputer>(&self, items: &'a [T]) -> Vec<&'a T> {
        items.iter().filter(|item| self.contains(item.computer())).collect()
    }

    /// Owned copy of [`ComputerGroup::scope`], for feeding `detect` and
    /// `aggregate_usage` directly.
    pub fn scoped<T: OnComputer + Clone>(&self, items: &[T]) -> Vec<T> {
        self.scope(items).into_iter().cloned().collect()
    }
}
