//! Canonical device records
//!
//! Both inventory systems are normalized into [`DeviceRecord`] at the boundary.
//! Nothing downstream of the [`normalize`] module knows which wire shape a
//! record came from.

pub mod normalize;

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};

pub use normalize::{Normalized, Normalizer, Profile, Unindexable};

/// Raw, source-specific payload for one record.
pub type RawRecord = serde_json::Value;

/// Rendering of an absent value in discrepancies and reports.
pub const ABSENT: &str = "<none>";

/// Which system of record a canonical record was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Origin {
    /// Purchasing/enrolment authority
    SourceA,
    /// Device management inventory
    SourceB,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::SourceA => write!(f, "source-a"),
            Origin::SourceB => write!(f, "source-b"),
        }
    }
}

/// Canonical field names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    // Source A
    AddedToOrg,
    OrderNumber,
    PurchaseSourceId,
    PurchaseSourceType,
    DeviceModel,
    // Source B
    TargetId,
    DeviceName,
    Purchased,
    LifeExpectancy,
    WarrantyDate,
    Vendor,
    PoDate,
    PoNumber,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::AddedToOrg => "added_to_org",
            Field::OrderNumber => "order_number",
            Field::PurchaseSourceId => "purchase_source_id",
            Field::PurchaseSourceType => "purchase_source_type",
            Field::DeviceModel => "device_model",
            Field::TargetId => "target_id",
            Field::DeviceName => "device_name",
            Field::Purchased => "purchased",
            Field::LifeExpectancy => "life_expectancy",
            Field::WarrantyDate => "warranty_date",
            Field::Vendor => "vendor",
            Field::PoDate => "po_date",
            Field::PoNumber => "po_number",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed field value.
///
/// Equality across systems is decided on [`FieldValue::canonical`], so a date
/// parsed from `"2021-11-25"` and one derived from a timestamp compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    Date(NaiveDate),
    Timestamp(DateTime<FixedOffset>),
    Number(i64),
    Flag(bool),
}

impl FieldValue {
    pub fn text(value: impl Into<String>) -> Self {
        FieldValue::Text(value.into())
    }

    /// Type-normalized string form used for comparison and display.
    pub fn canonical(&self) -> String {
        match self {
            FieldValue::Text(s) => s.clone(),
            FieldValue::Date(d) => d.format("%Y-%m-%d").to_string(),
            FieldValue::Timestamp(ts) => ts.to_rfc3339(),
            FieldValue::Number(n) => n.to_string(),
            FieldValue::Flag(b) => b.to_string(),
        }
    }

    pub fn as_timestamp(&self) -> Option<&DateTime<FixedOffset>> {
        match self {
            FieldValue::Timestamp(ts) => Some(ts),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

/// Canonical form of a device key.
///
/// Serial numbers are compared case-insensitively and without surrounding
/// whitespace. Returns `None` for blank input.
pub fn normalize_key(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_uppercase())
    }
}

/// A normalized device record. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    key: String,
    origin: Origin,
    fields: BTreeMap<Field, FieldValue>,
}

impl DeviceRecord {
    /// Build a record. The key is stored as given; callers pass keys that went
    /// through [`normalize_key`].
    pub fn new(
        key: impl Into<String>,
        origin: Origin,
        fields: impl IntoIterator<Item = (Field, FieldValue)>,
    ) -> Self {
        Self {
            key: key.into(),
            origin,
            fields: fields.into_iter().collect(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn get(&self, field: Field) -> Option<&FieldValue> {
        self.fields.get(&field)
    }

    pub fn fields(&self) -> impl Iterator<Item = (Field, &FieldValue)> {
        self.fields.iter().map(|(f, v)| (*f, v))
    }

    /// Canonical string for `field`, or [`ABSENT`].
    pub fn display(&self, field: Field) -> String {
        self.get(field)
            .map(FieldValue::canonical)
            .unwrap_or_else(|| ABSENT.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_forms() {
        let date = NaiveDate::from_ymd_opt(2021, 11, 25).unwrap();
        assert_eq!(FieldValue::Date(date).canonical(), "2021-11-25");
        assert_eq!(FieldValue::Number(3).canonical(), "3");
        assert_eq!(FieldValue::Flag(true).canonical(), "true");
        assert_eq!(FieldValue::text("AMIRIM").canonical(), "AMIRIM");
    }

    #[test]
    fn normalize_key_trims_and_uppercases() {
        assert_eq!(normalize_key("  c02xk0aajg5h "), Some("C02XK0AAJG5H".into()));
        assert_eq!(normalize_key("   "), None);
        assert_eq!(normalize_key(""), None);
    }

    #[test]
    fn record_display_uses_absent_sentinel() {
        let record = DeviceRecord::new(
            "C02XK0AAJG5H",
            Origin::SourceB,
            [(Field::Vendor, FieldValue::text("Apple"))],
        );
        assert_eq!(record.display(Field::Vendor), "Apple");
        assert_eq!(record.display(Field::PoNumber), ABSENT);
    }

    #[test]
    fn field_names_are_snake_case() {
        assert_eq!(Field::PurchaseSourceId.to_string(), "purchase_source_id");
        let json = serde_json::to_string(&Field::PoDate).unwrap();
        assert_eq!(json, "\"po_date\"");
    }
}
