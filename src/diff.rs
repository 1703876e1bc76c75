//! Field-level comparison between a candidate payload and a matched existing
//! record. Only changed fields survive into the diff; an empty diff marks the
//! row as a no-op that must never reach the executor.

use crate::value::{FieldValue, NULL, Payload};

/// Minimal patch bringing an existing record in line with a candidate.
pub type Diff = Payload;

/// `Null` and empty text are interchangeable; everything else compares
/// exactly.
pub fn equivalent(a: &FieldValue, b: &FieldValue) -> bool {
    if a.is_absent() && b.is_absent() {
        return true;
    }
    a == b
}

/// Returns the fields of `candidate` whose values differ from `existing`.
pub fn compute(existing: &Payload, candidate: &Payload) -> Diff {
    let mut diff = Diff::new();
    for (field, next) in candidate {
        let current = existing.get(field).unwrap_or(&NULL);
        if !equivalent(current, next) {
            diff.insert(field.clone(), next.clone());
        }
    }
    diff
}

/// Captures the pre-change values of exactly the fields named by `diff`, for
/// later restoration during rollback.
pub fn before_values(existing: &Payload, diff: &Diff) -> Payload {
    diff.keys()
        .map(|field| {
            (
                field.clone(),
                existing.get(field).cloned().unwrap_or(FieldValue::Null),
            )
        })
        .collect()
}
