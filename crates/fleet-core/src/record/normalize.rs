//! Raw payload → [`DeviceRecord`] normalization
//!
//! A [`Profile`] describes where one system of record keeps its key and each
//! canonical field. Locations are JSON pointers tried in priority order, so a
//! profile can cover several wire shapes of the same system (e.g. the classic
//! `computer.general` nesting and the flat inventory form).

use chrono::{DateTime, NaiveDate};
use serde_json::Value;

use super::{DeviceRecord, Field, FieldValue, Origin, RawRecord, normalize_key};
use crate::error::MalformedField;

/// How a raw value is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Text,
    Date,
    Timestamp,
    Integer,
    Flag,
}

/// Where to find one canonical field.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub field: Field,
    pub paths: &'static [&'static str],
    pub kind: ValueKind,
}

/// Mapping from one system's payload shapes to the canonical schema.
#[derive(Debug, Clone, Copy)]
pub struct Profile {
    pub origin: Origin,
    pub key_paths: &'static [&'static str],
    pub fields: &'static [FieldSpec],
}

impl Profile {
    /// Purchasing/enrolment authority, JSON:API style (`data[].attributes`).
    pub const SOURCE_A: Profile = Profile {
        origin: Origin::SourceA,
        key_paths: &["/attributes/serialNumber", "/serialNumber"],
        fields: &[
            FieldSpec {
                field: Field::AddedToOrg,
                paths: &["/attributes/addedToOrgDateTime", "/addedToOrgDateTime"],
                kind: ValueKind::Timestamp,
            },
            FieldSpec {
                field: Field::OrderNumber,
                paths: &["/attributes/orderNumber", "/orderNumber"],
                kind: ValueKind::Text,
            },
            FieldSpec {
                field: Field::PurchaseSourceId,
                paths: &["/attributes/purchaseSourceId", "/purchaseSourceId"],
                kind: ValueKind::Text,
            },
            FieldSpec {
                field: Field::PurchaseSourceType,
                paths: &["/attributes/purchaseSourceType", "/purchaseSourceType"],
                kind: ValueKind::Text,
            },
            FieldSpec {
                field: Field::DeviceModel,
                paths: &["/attributes/deviceModel", "/deviceModel"],
                kind: ValueKind::Text,
            },
        ],
    };

    /// Device management inventory, classic (`computer.general`) or flat shape.
    pub const SOURCE_B: Profile = Profile {
        origin: Origin::SourceB,
        key_paths: &[
            "/computer/general/serial_number",
            "/general/serial_number",
            "/hardware/serialNumber",
            "/serial_number",
            "/serialNumber",
        ],
        fields: &[
            FieldSpec {
                field: Field::TargetId,
                paths: &["/computer/general/id", "/general/id", "/id"],
                kind: ValueKind::Text,
            },
            FieldSpec {
                field: Field::DeviceName,
                paths: &["/computer/general/name", "/general/name", "/name"],
                kind: ValueKind::Text,
            },
            FieldSpec {
                field: Field::Purchased,
                paths: &["/computer/purchasing/purchased", "/purchasing/purchased"],
                kind: ValueKind::Flag,
            },
            FieldSpec {
                field: Field::LifeExpectancy,
                paths: &[
                    "/computer/purchasing/life_expectancy",
                    "/purchasing/life_expectancy",
                    "/purchasing/lifeExpectancy",
                ],
                kind: ValueKind::Integer,
            },
            FieldSpec {
                field: Field::WarrantyDate,
                paths: &[
                    "/computer/purchasing/warranty_expires",
                    "/purchasing/warranty_expires",
                    "/purchasing/warrantyDate",
                ],
                kind: ValueKind::Date,
            },
            FieldSpec {
                field: Field::Vendor,
                paths: &["/computer/purchasing/vendor", "/purchasing/vendor"],
                kind: ValueKind::Text,
            },
            FieldSpec {
                field: Field::PoDate,
                paths: &[
                    "/computer/purchasing/po_date",
                    "/purchasing/po_date",
                    "/purchasing/poDate",
                ],
                kind: ValueKind::Date,
            },
            FieldSpec {
                field: Field::PoNumber,
                paths: &[
                    "/computer/purchasing/po_number",
                    "/purchasing/po_number",
                    "/purchasing/poNumber",
                ],
                kind: ValueKind::Text,
            },
        ],
    };
}

/// A raw record with no extractable key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unindexable;

/// Output of normalizing one raw record.
#[derive(Debug, Clone)]
pub struct Normalized {
    pub record: DeviceRecord,
    /// Fields that were present but failed to parse; they are left out of
    /// `record`.
    pub malformed: Vec<MalformedField>,
}

/// Applies a [`Profile`] to raw payloads.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    profile: Profile,
}

impl Normalizer {
    pub fn new(profile: Profile) -> Self {
        Self { profile }
    }

    pub fn origin(&self) -> Origin {
        self.profile.origin
    }

    /// Extract the key from the first candidate location that holds one.
    pub fn extract_key(&self, raw: &RawRecord) -> Option<String> {
        self.profile
            .key_paths
            .iter()
            .filter_map(|path| raw.pointer(path))
            .filter_map(scalar_text)
            .find_map(|s| normalize_key(&s))
    }

    pub fn normalize(&self, raw: &RawRecord) -> Result<Normalized, Unindexable> {
        let key = self.extract_key(raw).ok_or(Unindexable)?;

        let mut fields = Vec::with_capacity(self.profile.fields.len());
        let mut malformed = Vec::new();

        for spec in self.profile.fields {
            let Some(value) = spec
                .paths
                .iter()
                .filter_map(|path| raw.pointer(path))
                .find(|v| !is_blank(v))
            else {
                continue;
            };

            match parse_value(value, spec.kind) {
                Ok(parsed) => fields.push((spec.field, parsed)),
                Err(reason) => {
                    let issue = MalformedField::new(&key, spec.field, scalar_text(value), reason);
                    tracing::debug!(
                        key = %key,
                        field = %spec.field,
                        origin = %self.profile.origin,
                        "Malformed field: {}",
                        issue.reason
                    );
                    malformed.push(issue);
                }
            }
        }

        Ok(Normalized {
            record: DeviceRecord::new(key, self.profile.origin, fields),
            malformed,
        })
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn parse_value(value: &Value, kind: ValueKind) -> Result<FieldValue, String> {
    match kind {
        ValueKind::Text => scalar_text(value)
            .map(FieldValue::Text)
            .ok_or_else(|| "expected a scalar value".to_string()),
        ValueKind::Timestamp => {
            let s = value.as_str().ok_or("expected a timestamp string")?;
            DateTime::parse_from_rfc3339(s.trim())
                .map(FieldValue::Timestamp)
                .map_err(|e| format!("not an RFC 3339 timestamp: {e}"))
        }
        ValueKind::Date => {
            let s = value.as_str().ok_or("expected a date string")?.trim();
            parse_date(s)
                .map(FieldValue::Date)
                .ok_or_else(|| format!("not a calendar date: {s}"))
        }
        ValueKind::Integer => match value {
            Value::Number(n) => n
                .as_i64()
                .map(FieldValue::Number)
                .ok_or_else(|| format!("not an integer: {n}")),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(FieldValue::Number)
                .map_err(|_| format!("not an integer: {s}")),
            _ => Err("expected an integer".to_string()),
        },
        ValueKind::Flag => match value {
            Value::Bool(b) => Ok(FieldValue::Flag(*b)),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" => Ok(FieldValue::Flag(true)),
                "false" | "no" => Ok(FieldValue::Flag(false)),
                other => Err(format!("not a boolean: {other}")),
            },
            _ => Err("expected a boolean".to_string()),
        },
    }
}

/// Accepts `YYYY-MM-DD` or a full RFC 3339 timestamp (date part kept).
fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|ts| ts.date_naive()))
}
