//! In-memory multi-key lookup over the records of one entity type, built once
//! per run from a full table read and kept current by operation success
//! callbacks. Key map entries are only ever added or overwritten during a
//! run; stale removal is out of scope.

use std::collections::HashMap;

use crate::normalize::fold_key;
use crate::value::StoredRow;

/// Identifies one registered natural-key dimension of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyKind(pub &'static str);

pub const EMAIL: KeyKind = KeyKind("email");
pub const ASSOCIATE_NUMBER: KeyKind = KeyKind("associate_number");
pub const REFERENCE: KeyKind = KeyKind("reference");
pub const MANAGER_CODE: KeyKind = KeyKind("manager_code");
pub const TRADE_CODE: KeyKind = KeyKind("trade_code");
pub const TRADE_LABEL: KeyKind = KeyKind("trade_label");

/// Binds a key kind to the record field it is read from. String keys are
/// case-folded when `fold_case` is set; matching is otherwise exact.
#[derive(Debug, Clone, Copy)]
pub struct KeySpec {
    pub kind: KeyKind,
    pub field: &'static str,
    pub fold_case: bool,
}

impl KeySpec {
    pub const fn folded(kind: KeyKind, field: &'static str) -> Self {
        KeySpec {
            kind,
            field,
            fold_case: true,
        }
    }

    pub const fn exact(kind: KeyKind, field: &'static str) -> Self {
        KeySpec {
            kind,
            field,
            fold_case: false,
        }
    }

    fn key_for(&self, raw: &str) -> String {
        if self.fold_case {
            fold_key(raw)
        } else {
            raw.trim().to_string()
        }
    }
}

#[derive(Debug, Default)]
pub struct LookupIndex {
    specs: Vec<KeySpec>,
    records: HashMap<String, StoredRow>,
    keys: HashMap<KeyKind, HashMap<String, String>>,
}

impl LookupIndex {
    pub fn new(specs: Vec<KeySpec>) -> Self {
        LookupIndex {
            specs,
            records: HashMap::new(),
            keys: HashMap::new(),
        }
    }

    pub fn build(specs: Vec<KeySpec>, rows: Vec<StoredRow>) -> Self {
        let mut index = LookupIndex::new(specs);
        for row in rows {
            index.register(row);
        }
        index
    }

    /// Registers a new or updated record, refreshing every key map that has a
    /// usable value on the record.
    pub fn register(&mut self, row: StoredRow) {
        for spec in &self.specs {
            if let Some(raw) = row.key_text(spec.field) {
                let key = spec.key_for(&raw);
                if !key.is_empty() {
                    self.keys
                        .entry(spec.kind)
                        .or_default()
                        .insert(key, row.id.clone());
                }
            }
        }
        self.records.insert(row.id.clone(), row);
    }

    pub fn get(&self, kind: KeyKind, value: &str) -> Option<&StoredRow> {
        let spec = self.specs.iter().find(|spec| spec.kind == kind)?;
        let key = spec.key_for(value);
        let id = self.keys.get(&kind)?.get(&key)?;
        self.records.get(id)
    }

    pub fn by_id(&self, id: &str) -> Option<&StoredRow> {
        self.records.get(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{FieldValue, Payload};

    fn craftsman(id: &str, email: &str, number: &str) -> StoredRow {
        let fields: Payload = [
            ("email".to_string(), FieldValue::from_text(email)),
            (
                "associate_number".to_string(),
                FieldValue::from_text(number),
            ),
        ]
        .into();
        StoredRow::new(id, fields)
    }

    fn specs() -> Vec<KeySpec> {
        vec![
            KeySpec::folded(EMAIL, "email"),
            KeySpec::exact(ASSOCIATE_NUMBER, "associate_number"),
        ]
    }

    #[test]
    fn lookup_is_case_insensitive_for_folded_kinds_only() {
        let index = LookupIndex::build(specs(), vec![craftsman("1", "Marc@Atelier.fr", "A-17")]);
        assert!(index.get(EMAIL, "marc@atelier.fr").is_some());
        assert!(index.get(EMAIL, "MARC@ATELIER.FR").is_some());
        assert!(index.get(ASSOCIATE_NUMBER, "A-17").is_some());
        assert!(index.get(ASSOCIATE_NUMBER, "a-17").is_none());
    }

    #[test]
    fn register_updates_every_key_map() {
        let mut index = LookupIndex::build(specs(), vec![]);
        index.register(craftsman("1", "marc@atelier.fr", ""));
        assert!(index.get(ASSOCIATE_NUMBER, "A-17").is_none());

        index.register(craftsman("1", "marc@atelier.fr", "A-17"));
        assert_eq!(index.len(), 1);
        assert_eq!(
            index.get(ASSOCIATE_NUMBER, "A-17").map(|r| r.id.as_str()),
            Some("1")
        );
    }

    #[test]
    fn records_registered_mid_run_are_visible_to_later_lookups() {
        let mut index = LookupIndex::build(specs(), vec![]);
        assert!(index.get(EMAIL, "new@atelier.fr").is_none());
        index.register(craftsman("dryrun-craftsmen-0-0", "new@atelier.fr", ""));
        assert!(index.get(EMAIL, "new@atelier.fr").is_some());
    }
}
