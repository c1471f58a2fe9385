//! Tests for the diff engine over realistic payloads

use std::collections::HashMap;
use std::sync::Arc;

use fleet_core::diff::{DiffReport, RuleTable, diff_all};
use fleet_core::record::{DeviceRecord, Field, Normalizer, Profile};
use fleet_core::{ABSENT, LookupIndex, RecordingSink, VendorLookup, VendorMapping};
use fleet_test_utils::{serial, source_a_device, source_b_computer, synced_fleet};
use pretty_assertions::assert_eq;
use serde_json::Value;

fn vendors() -> Arc<dyn VendorLookup> {
    Arc::new(VendorMapping::new(HashMap::from([(
        "64AFCB0".to_string(),
        "AMIRIM".to_string(),
    )])))
}

fn source_records(raw: &[Value]) -> Vec<DeviceRecord> {
    let normalizer = Normalizer::new(Profile::SOURCE_A);
    raw.iter()
        .filter_map(|r| normalizer.normalize(r).ok())
        .map(|n| n.record)
        .collect()
}

fn run(source: &[Value], target: &[Value]) -> DiffReport {
    let sink = RecordingSink::new();
    let index = LookupIndex::from_raw(&Normalizer::new(Profile::SOURCE_B), target, &sink);
    diff_all(&source_records(source), &index, &RuleTable::purchase(vendors()), &sink)
}

/// A fleet where every third device drifted and the last one is missing.
fn drifted_fleet() -> (Vec<Value>, Vec<Value>) {
    let (source, mut target) = synced_fleet(10);
    for i in (0..9).step_by(3) {
        target[i] = source_b_computer(100 + i as u64, &serial(i), Some("Apple"), None, Some("PO-X"));
    }
    target.pop();
    (source, target)
}

#[test]
fn test_synced_fleet_has_no_discrepancies() {
    let (source, target) = synced_fleet(5);
    let report = run(&source, &target);

    assert_eq!(report.comparisons.len(), 5);
    assert_eq!(report.in_sync_count(), 5);
    assert_eq!(report.discrepancy_count(), 0);
    assert!(report.missing.is_empty());
    assert!(report.plan_tasks(false).is_empty());
}

#[test]
fn test_drift_and_missing_are_reported_separately() {
    let (source, target) = drifted_fleet();
    let report = run(&source, &target);

    assert_eq!(report.comparisons.len(), 9);
    assert_eq!(report.devices_with_discrepancies(), 3);
    assert_eq!(report.discrepancy_count(), 9);
    assert_eq!(report.missing.len(), 1);
    assert_eq!(report.missing[0].key, serial(9));

    let first: Vec<_> = report.comparisons[0]
        .discrepancies
        .iter()
        .map(|d| (d.field, d.actual.as_str()))
        .collect();
    assert_eq!(
        first,
        vec![
            (Field::Vendor, "Apple"),
            (Field::PoDate, ABSENT),
            (Field::PoNumber, "PO-X"),
        ]
    );
}

#[test]
fn test_diff_is_deterministic() {
    let (source, target) = drifted_fleet();

    let first = run(&source, &target);
    let second = run(&source, &target);

    assert_eq!(first, second);
    let a: Vec<_> = first.discrepancies().cloned().collect();
    let b: Vec<_> = second.discrepancies().cloned().collect();
    assert_eq!(a, b);
}

#[test]
fn test_source_order_is_preserved() {
    let (mut source, target) = synced_fleet(4);
    source.reverse();
    let report = run(&source, &target);

    let keys: Vec<_> = report.comparisons.iter().map(|c| c.key.clone()).collect();
    assert_eq!(keys, vec![serial(3), serial(2), serial(1), serial(0)]);
}

#[test]
fn test_malformed_source_field_skips_only_dependent_rules() {
    let source = vec![source_a_device(&serial(0), "not a date", "PO-0000", "64AFCB0")];
    let (_, target) = synced_fleet(1);

    let report = run(&source, &target);
    let comparison = &report.comparisons[0];

    // PO date cannot be derived; vendor and PO number still compare clean
    assert!(comparison.discrepancies.is_empty());
    assert_eq!(comparison.malformed.len(), 1);
    assert_eq!(comparison.malformed[0].field, Field::AddedToOrg);
    assert!(comparison.desired.iter().all(|(f, _)| *f != Field::PoDate));
}

#[test]
fn test_unmapped_vendor_falls_back_to_identifier() {
    let source = vec![source_a_device(&serial(0), "2021-11-25T08:25:53Z", "PO-0000", "ZZZ999")];
    let (_, target) = synced_fleet(1);

    let report = run(&source, &target);
    let vendor = &report.comparisons[0].discrepancies[0];

    assert_eq!(vendor.field, Field::Vendor);
    assert_eq!(vendor.expected, "ZZZ999");
    assert_eq!(vendor.actual, "AMIRIM");
}

#[test]
fn test_tasks_carry_target_id_and_full_payload() {
    let (source, target) = drifted_fleet();
    let tasks = run(&source, &target).plan_tasks(false);

    let ids: Vec<_> = tasks.iter().map(|t| t.target_id().to_string()).collect();
    assert_eq!(ids, vec!["100", "103", "106"]);
    assert_eq!(tasks[0].desired_fields().len(), 6);
}
