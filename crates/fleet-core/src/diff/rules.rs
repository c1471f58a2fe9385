//! Field derivation rules
//!
//! Each rule derives the value a Source B field should hold from the Source A
//! record. Rules run in declaration order and that order is preserved in
//! every report.

use std::sync::Arc;

use crate::error::MalformedField;
use crate::record::{DeviceRecord, Field, FieldValue};
use crate::source::VendorLookup;

type Derive = Box<dyn Fn(&DeviceRecord) -> Result<FieldValue, MalformedField> + Send + Sync>;

/// Target field plus the function computing its expected value.
pub struct FieldRule {
    field: Field,
    derive: Derive,
}

impl FieldRule {
    pub fn new<F>(field: Field, derive: F) -> Self
    where
        F: Fn(&DeviceRecord) -> Result<FieldValue, MalformedField> + Send + Sync + 'static,
    {
        Self {
            field,
            derive: Box::new(derive),
        }
    }

    pub fn field(&self) -> Field {
        self.field
    }

    pub fn expected(&self, source: &DeviceRecord) -> Result<FieldValue, MalformedField> {
        (self.derive)(source)
    }
}

impl std::fmt::Debug for FieldRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldRule")
            .field("field", &self.field)
            .finish_non_exhaustive()
    }
}

/// Ordered set of rules.
#[derive(Debug, Default)]
pub struct RuleTable {
    rules: Vec<FieldRule>,
}

impl RuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rule(mut self, rule: FieldRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Purchasing rules: vendor, PO date, PO number.
    pub fn purchase(vendors: Arc<dyn VendorLookup>) -> Self {
        Self::new()
            .with_rule(FieldRule::new(Field::Vendor, move |source| {
                let id = require(source, Field::PurchaseSourceId)?.canonical();
                Ok(FieldValue::Text(vendors.lookup(&id).unwrap_or(id)))
            }))
            .with_rule(FieldRule::new(Field::PoDate, |source| {
                let added = require(source, Field::AddedToOrg)?;
                added
                    .as_timestamp()
                    .map(|ts| FieldValue::Date(ts.date_naive()))
                    .ok_or_else(|| {
                        MalformedField::new(
                            source.key(),
                            Field::AddedToOrg,
                            Some(added.canonical()),
                            "expected a timestamp",
                        )
                    })
            }))
            .with_rule(FieldRule::new(Field::PoNumber, |source| {
                Ok(FieldValue::Text(
                    require(source, Field::OrderNumber)?.canonical(),
                ))
            }))
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldRule> {
        self.rules.iter()
    }

    pub fn fields(&self) -> Vec<Field> {
        self.rules.iter().map(FieldRule::field).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// The value of `field`, or a malformed-field error naming it as missing.
pub fn require(source: &DeviceRecord, field: Field) -> Result<&FieldValue, MalformedField> {
    source
        .get(field)
        .ok_or_else(|| MalformedField::new(source.key(), field, None, "missing in source record"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Origin;
    use crate::source::VendorMapping;
    use chrono::{DateTime, NaiveDate};
    use std::collections::HashMap;

    fn vendors() -> Arc<dyn VendorLookup> {
        Arc::new(VendorMapping::new(HashMap::from([(
            "64AFCB0".to_string(),
            "AMIRIM".to_string(),
        )])))
    }

    fn source(fields: Vec<(Field, FieldValue)>) -> DeviceRecord {
        DeviceRecord::new("C02XK0AAJG5H", Origin::SourceA, fields)
    }

    #[test]
    fn purchase_rules_in_declaration_order() {
        let table = RuleTable::purchase(vendors());
        assert_eq!(
            table.fields(),
            vec![Field::Vendor, Field::PoDate, Field::PoNumber]
        );
    }

    #[test]
    fn vendor_maps_or_falls_back_to_id() {
        let table = RuleTable::purchase(vendors());
        let vendor = table.iter().next().unwrap();

        let mapped = source(vec![(Field::PurchaseSourceId, FieldValue::text("64AFCB0"))]);
        assert_eq!(vendor.expected(&mapped).unwrap(), FieldValue::text("AMIRIM"));

        let unmapped = source(vec![(Field::PurchaseSourceId, FieldValue::text("9999"))]);
        assert_eq!(vendor.expected(&unmapped).unwrap(), FieldValue::text("9999"));
    }

    #[test]
    fn po_date_uses_timestamp_offset() {
        let table = RuleTable::purchase(vendors());
        let po_date = table.iter().nth(1).unwrap();

        let ts = DateTime::parse_from_rfc3339("2021-11-25T23:30:00-05:00").unwrap();
        let record = source(vec![(Field::AddedToOrg, FieldValue::Timestamp(ts))]);
        assert_eq!(
            po_date.expected(&record).unwrap(),
            FieldValue::Date(NaiveDate::from_ymd_opt(2021, 11, 25).unwrap())
        );
    }

    #[test]
    fn missing_input_is_malformed_for_that_rule_only() {
        let table = RuleTable::purchase(vendors());
        let record = source(vec![(Field::OrderNumber, FieldValue::text("PO-1"))]);

        let results: Vec<_> = table.iter().map(|r| r.expected(&record)).collect();
        assert!(results[0].is_err());
        assert!(results[1].is_err());
        assert_eq!(results[2].as_ref().unwrap(), &FieldValue::text("PO-1"));
        assert_eq!(results[0].as_ref().unwrap_err().field, Field::PurchaseSourceId);
    }
}
