//! Classifies mapped rows into inserts, updates, and no-ops, and chunks
//! insert payloads into bounded batches.

use itertools::Itertools;

use crate::diff::{self, Diff};
use crate::value::{Payload, StoredRow};

/// What the executor should do for one mapped row.
#[derive(Debug, Clone, PartialEq)]
pub enum RowAction {
    Insert,
    Update {
        id: String,
        diff: Diff,
        before: Payload,
    },
    /// Candidate and existing record already agree; counted as skipped.
    Noop,
}

pub fn classify(existing: Option<&StoredRow>, candidate: &Payload) -> RowAction {
    match existing {
        None => RowAction::Insert,
        Some(row) => {
            let diff = diff::compute(&row.fields, candidate);
            if diff.is_empty() {
                RowAction::Noop
            } else {
                let before = diff::before_values(&row.fields, &diff);
                RowAction::Update {
                    id: row.id.clone(),
                    diff,
                    before,
                }
            }
        }
    }
}

/// Splits `items` into chunks of at most `size` elements, preserving order.
/// A zero size disables chunking and yields a single batch.
pub fn chunk<T>(items: Vec<T>, size: usize) -> Vec<Vec<T>> {
    if items.is_empty() {
        return Vec::new();
    }
    if size == 0 {
        return vec![items];
    }
    let groups = items.into_iter().chunks(size);
    let mut chunks = Vec::new();
    for group in &groups {
        chunks.push(group.collect());
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::FieldValue;

    fn payload(email: &str, phone: &str) -> Payload {
        [
            ("email".to_string(), FieldValue::from_text(email)),
            ("phone".to_string(), FieldValue::from_text(phone)),
        ]
        .into()
    }

    #[test]
    fn unmatched_rows_are_inserts() {
        assert_eq!(classify(None, &payload("a@b.fr", "0601")), RowAction::Insert);
    }

    #[test]
    fn identical_rows_are_noops() {
        let existing = StoredRow::new("1", payload("a@b.fr", "0601"));
        assert_eq!(
            classify(Some(&existing), &payload("a@b.fr", "0601")),
            RowAction::Noop
        );
    }

    #[test]
    fn changed_rows_carry_diff_and_before_values() {
        let existing = StoredRow::new("1", payload("a@b.fr", "0601"));
        match classify(Some(&existing), &payload("a@b.fr", "0699")) {
            RowAction::Update { id, diff, before } => {
                assert_eq!(id, "1");
                assert_eq!(diff.len(), 1);
                assert_eq!(diff["phone"], FieldValue::Text("0699".to_string()));
                assert_eq!(before["phone"], FieldValue::Text("0601".to_string()));
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[test]
    fn chunk_respects_the_batch_size() {
        let chunks = chunk((0..7).collect(), 3);
        assert_eq!(chunks, vec![vec![0, 1, 2], vec![3, 4, 5], vec![6]]);
    }

    #[test]
    fn chunk_size_zero_yields_a_single_batch() {
        let chunks = chunk(vec![1, 2, 3], 0);
        assert_eq!(chunks, vec![vec![1, 2, 3]]);
    }

    #[test]
    fn chunk_of_nothing_is_nothing() {
        assert!(chunk(Vec::<i32>::new(), 4).is_empty());
    }
}
