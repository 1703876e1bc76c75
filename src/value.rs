use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A normalized scalar cell value as it travels between the mapper, the diff
/// engine, and the storage client. `Null` and empty text are interchangeable
/// when comparing records.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

pub const NULL: FieldValue = FieldValue::Null;

impl FieldValue {
    /// Builds a text value from a raw cell, trimming whitespace and mapping
    /// empty input to `Null`.
    pub fn from_text(value: &str) -> Self {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            FieldValue::Null
        } else {
            FieldValue::Text(trimmed.to_string())
        }
    }

    pub fn from_number(value: Option<f64>) -> Self {
        value.map_or(FieldValue::Null, FieldValue::Number)
    }

    pub fn from_bool(value: Option<bool>) -> Self {
        value.map_or(FieldValue::Null, FieldValue::Bool)
    }

    /// `Null` and empty text both count as absent.
    pub fn is_absent(&self) -> bool {
        match self {
            FieldValue::Null => true,
            FieldValue::Text(text) => text.is_empty(),
            _ => false,
        }
    }

    /// The string form used when the value participates in a lookup key.
    /// Absent values and booleans never key a record.
    pub fn as_key_text(&self) -> Option<String> {
        match self {
            FieldValue::Text(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
            FieldValue::Number(number) => Some(render_number(*number)),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(text) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn as_display(&self) -> String {
        match self {
            FieldValue::Null => String::new(),
            FieldValue::Bool(flag) => flag.to_string(),
            FieldValue::Number(number) => render_number(*number),
            FieldValue::Text(text) => text.clone(),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

fn render_number(number: f64) -> String {
    if number.fract() == 0.0 {
        (number as i64).to_string()
    } else {
        number.to_string()
    }
}

/// A candidate or patch payload: field name to normalized value.
pub type Payload = BTreeMap<String, FieldValue>;

/// A record as the store returns it: durable identifier plus the field
/// payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredRow {
    pub id: String,
    #[serde(flatten)]
    pub fields: Payload,
}

impl StoredRow {
    pub fn new(id: impl Into<String>, fields: Payload) -> Self {
        StoredRow {
            id: id.into(),
            fields,
        }
    }

    pub fn field(&self, name: &str) -> &FieldValue {
        self.fields.get(name).unwrap_or(&NULL)
    }

    pub fn key_text(&self, name: &str) -> Option<String> {
        self.field(name).as_key_text()
    }
}

/// Overlays `patch` on `base`, returning the merged payload.
pub fn merge_payload(base: &Payload, patch: &Payload) -> Payload {
    let mut merged = base.clone();
    for (field, value) in patch {
        merged.insert(field.clone(), value.clone());
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_text_trims_and_maps_empty_to_null() {
        assert_eq!(
            FieldValue::from_text("  hello "),
            FieldValue::Text("hello".to_string())
        );
        assert_eq!(FieldValue::from_text("   "), FieldValue::Null);
    }

    #[test]
    fn null_and_empty_text_are_absent() {
        assert!(FieldValue::Null.is_absent());
        assert!(FieldValue::Text(String::new()).is_absent());
        assert!(!FieldValue::Bool(false).is_absent());
        assert!(!FieldValue::Number(0.0).is_absent());
    }

    #[test]
    fn key_text_covers_text_and_numbers_only() {
        assert_eq!(
            FieldValue::Text("A-17".to_string()).as_key_text(),
            Some("A-17".to_string())
        );
        assert_eq!(
            FieldValue::Number(42.0).as_key_text(),
            Some("42".to_string())
        );
        assert_eq!(FieldValue::Bool(true).as_key_text(), None);
        assert_eq!(FieldValue::Null.as_key_text(), None);
    }

    #[test]
    fn merge_overlays_patch_fields() {
        let base: Payload = [
            ("phone".to_string(), FieldValue::from_text("0601")),
            ("email".to_string(), FieldValue::from_text("a@b.fr")),
        ]
        .into();
        let patch: Payload = [("phone".to_string(), FieldValue::from_text("0699"))].into();
        let merged = merge_payload(&base, &patch);
        assert_eq!(merged["phone"], FieldValue::Text("0699".to_string()));
        assert_eq!(merged["email"], FieldValue::Text("a@b.fr".to_string()));
    }

    #[test]
    fn stored_row_round_trips_through_json() {
        let row = StoredRow::new(
            "7",
            [
                ("email".to_string(), FieldValue::from_text("a@b.fr")),
                ("labor_cost".to_string(), FieldValue::Number(120.5)),
                ("quote_requested".to_string(), FieldValue::Bool(true)),
                ("owner".to_string(), FieldValue::Null),
            ]
            .into(),
        );
        let encoded = serde_json::to_string(&row).expect("serialize row");
        let decoded: StoredRow = serde_json::from_str(&encoded).expect("parse row");
        assert_eq!(decoded, row);
    }
}
