//! Matches an incoming candidate against existing records using an ordered
//! list of natural-key kinds. The first kind that produces an index hit wins;
//! kinds missing from the candidate are passed over. No fuzzy matching.

use crate::index::{KeyKind, LookupIndex};
use crate::value::StoredRow;

/// One matching identifier carried by a candidate record. Used only to find
/// an existing record, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NaturalKey {
    pub kind: KeyKind,
    pub value: String,
}

impl NaturalKey {
    pub fn new(kind: KeyKind, value: impl Into<String>) -> Self {
        NaturalKey {
            kind,
            value: value.into(),
        }
    }
}

/// Fixed key-kind priority for one entity type.
#[derive(Debug, Clone)]
pub struct MatchPolicy {
    priority: Vec<KeyKind>,
}

impl MatchPolicy {
    pub fn new(priority: Vec<KeyKind>) -> Self {
        MatchPolicy { priority }
    }

    /// Returns the best existing record for the candidate's keys, or `None`.
    pub fn find<'a>(&self, index: &'a LookupIndex, keys: &[NaturalKey]) -> Option<&'a StoredRow> {
        for kind in &self.priority {
            let Some(key) = keys.iter().find(|key| key.kind == *kind) else {
                continue;
            };
            if let Some(row) = index.get(*kind, &key.value) {
                return Some(row);
            }
        }
        None
    }
}
