//! Field-level comparison of Source A against the Source B index
//!
//! ```text
//! DeviceRecord (A) ──rules──▶ expected values ──┐
//!                                               ├──▶ Discrepancy per mismatch
//! LookupIndex (B) ──get(key)──▶ actual values ──┘
//! ```
//!
//! Values are compared on their canonical strings, so `Date(2021-11-25)` and
//! `Text("2021-11-25")` match. Absent target fields compare as [`ABSENT`].

pub mod rules;

pub use rules::{FieldRule, RuleTable};

use chrono::Days;
use serde::Serialize;

use crate::error::MalformedField;
use crate::events::{Event, EventSink};
use crate::index::LookupIndex;
use crate::record::{ABSENT, DeviceRecord, Field, FieldValue};
use crate::sync::SyncTask;

/// Asset lifetime written with every purchasing update, in years.
pub const LIFE_EXPECTANCY_YEARS: i64 = 3;

/// Warranty length counted from the date the device joined the organization.
pub const WARRANTY_DAYS: u64 = 3 * 365;

/// One field mismatch on one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Discrepancy {
    pub key: String,
    pub field: Field,
    pub expected: String,
    pub actual: String,
}

/// Result of comparing one device that exists in both systems.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceComparison {
    pub key: String,
    /// Source B identifier used to address updates
    pub target_id: Option<String>,
    /// Mismatches in rule order
    pub discrepancies: Vec<Discrepancy>,
    /// Full purchasing payload for a corrective update
    pub desired: Vec<(Field, FieldValue)>,
    pub malformed: Vec<MalformedField>,
}

impl DeviceComparison {
    pub fn is_in_sync(&self) -> bool {
        self.discrepancies.is_empty()
    }
}

/// A Source A device with no Source B counterpart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingDevice {
    pub key: String,
    pub device_model: Option<String>,
    pub added_to_org: Option<String>,
    pub order_number: Option<String>,
}

impl MissingDevice {
    fn from_source(source: &DeviceRecord) -> Self {
        let text = |field| source.get(field).map(FieldValue::canonical);
        Self {
            key: source.key().to_string(),
            device_model: text(Field::DeviceModel),
            added_to_org: text(Field::AddedToOrg),
            order_number: text(Field::OrderNumber),
        }
    }
}

/// Outcome of [`diff`] for one device.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceDiff {
    Found(DeviceComparison),
    Missing(MissingDevice),
}

/// Compare one Source A record against the index.
///
/// A rule whose input is missing or malformed contributes a
/// [`MalformedField`] and no discrepancy; the other rules still run.
pub fn diff(source: &DeviceRecord, index: &LookupIndex, rules: &RuleTable) -> DeviceDiff {
    let Some(target) = index.get(source.key()) else {
        return DeviceDiff::Missing(MissingDevice::from_source(source));
    };

    let mut discrepancies = Vec::new();
    let mut malformed = Vec::new();
    let mut desired = purchase_block(source);

    for rule in rules.iter() {
        let expected = match rule.expected(source) {
            Ok(value) => value,
            Err(issue) => {
                malformed.push(issue);
                continue;
            }
        };

        let expected_text = expected.canonical();
        let actual_text = target
            .get(rule.field())
            .map(FieldValue::canonical)
            .unwrap_or_else(|| ABSENT.to_string());
        if expected_text != actual_text {
            discrepancies.push(Discrepancy {
                key: source.key().to_string(),
                field: rule.field(),
                expected: expected_text,
                actual: actual_text,
            });
        }
        desired.push((rule.field(), expected));
    }

    DeviceDiff::Found(DeviceComparison {
        key: source.key().to_string(),
        target_id: target.get(Field::TargetId).map(FieldValue::canonical),
        discrepancies,
        desired,
        malformed,
    })
}

/// The fixed part of a purchasing update.
fn purchase_block(source: &DeviceRecord) -> Vec<(Field, FieldValue)> {
    let mut block = vec![
        (Field::Purchased, FieldValue::Flag(true)),
        (Field::LifeExpectancy, FieldValue::Number(LIFE_EXPECTANCY_YEARS)),
    ];
    let warranty = source
        .get(Field::AddedToOrg)
        .and_then(FieldValue::as_timestamp)
        .and_then(|ts| ts.date_naive().checked_add_days(Days::new(WARRANTY_DAYS)));
    if let Some(date) = warranty {
        block.push((Field::WarrantyDate, FieldValue::Date(date)));
    }
    block
}

/// All comparisons of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiffReport {
    /// Found devices in Source A order
    pub comparisons: Vec<DeviceComparison>,
    /// Missing devices in Source A order
    pub missing: Vec<MissingDevice>,
}

impl DiffReport {
    pub fn in_sync_count(&self) -> usize {
        self.comparisons.iter().filter(|c| c.is_in_sync()).count()
    }

    pub fn devices_with_discrepancies(&self) -> usize {
        self.comparisons.len() - self.in_sync_count()
    }

    pub fn discrepancy_count(&self) -> usize {
        self.comparisons.iter().map(|c| c.discrepancies.len()).sum()
    }

    /// Every discrepancy, device by device in rule order.
    pub fn discrepancies(&self) -> impl Iterator<Item = &Discrepancy> {
        self.comparisons.iter().flat_map(|c| c.discrepancies.iter())
    }

    pub fn malformed(&self) -> impl Iterator<Item = &MalformedField> {
        self.comparisons.iter().flat_map(|c| c.malformed.iter())
    }

    /// Corrective tasks for found devices.
    ///
    /// Only devices with discrepancies get a task unless `force` is set.
    /// Devices without a Source B identifier cannot be addressed and are
    /// left out with a warning.
    pub fn plan_tasks(&self, force: bool) -> Vec<SyncTask> {
        self.comparisons
            .iter()
            .filter(|c| force || !c.is_in_sync())
            .filter_map(|c| match &c.target_id {
                Some(target_id) => Some(SyncTask::new(&c.key, target_id, c.desired.clone())),
                None => {
                    tracing::warn!(key = %c.key, "No target identifier; cannot update");
                    None
                }
            })
            .collect()
    }
}

/// Compare every Source A record, in order.
pub fn diff_all(
    sources: &[DeviceRecord],
    index: &LookupIndex,
    rules: &RuleTable,
    sink: &dyn EventSink,
) -> DiffReport {
    let mut report = DiffReport::default();

    for source in sources {
        match diff(source, index, rules) {
            DeviceDiff::Found(comparison) => {
                for issue in &comparison.malformed {
                    sink.emit(Event::Malformed(issue.clone()));
                }
                sink.emit(Event::Compared {
                    key: comparison.key.clone(),
                    count: comparison.discrepancies.len(),
                });
                report.comparisons.push(comparison);
            }
            DeviceDiff::Missing(missing) => {
                sink.emit(Event::Missing {
                    key: missing.key.clone(),
                });
                report.missing.push(missing);
            }
        }
    }

    tracing::info!(
        compared = report.comparisons.len(),
        in_sync = report.in_sync_count(),
        discrepancies = report.discrepancy_count(),
        missing = report.missing.len(),
        "Diff complete"
    );
    report
}
