//! Idempotent maintenance of many-to-many join tables. Desired links are
//! reduced against the snapshot taken at run start plus a session-local seen
//! set, chunked, and submitted as upserts so an externally created duplicate
//! is tolerated rather than fatal.

use std::collections::HashSet;

use crate::executor::{Operation, OperationKind, SuccessHook};
use crate::plan;
use crate::value::{FieldValue, Payload, StoredRow};

/// One row of a join table. The qualifier is empty when the relation has no
/// role distinction; uniqueness is the whole triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelationLink {
    pub left: String,
    pub right: String,
    pub qualifier: String,
}

impl RelationLink {
    pub fn new(left: impl Into<String>, right: impl Into<String>) -> Self {
        RelationLink {
            left: left.into(),
            right: right.into(),
            qualifier: String::new(),
        }
    }

    pub fn with_qualifier(
        left: impl Into<String>,
        right: impl Into<String>,
        qualifier: impl Into<String>,
    ) -> Self {
        RelationLink {
            left: left.into(),
            right: right.into(),
            qualifier: qualifier.into(),
        }
    }

    pub fn composite_key(&self) -> String {
        format!("{}:{}:{}", self.left, self.right, self.qualifier)
    }
}

/// The set of links known to exist, loaded once at run start and grown as new
/// links are created.
#[derive(Debug, Default)]
pub struct RelationSet {
    keys: HashSet<String>,
}

impl RelationSet {
    pub fn from_rows(
        rows: &[StoredRow],
        left_column: &str,
        right_column: &str,
        qualifier_column: Option<&str>,
    ) -> Self {
        let mut set = RelationSet::default();
        for row in rows {
            let (Some(left), Some(right)) =
                (row.key_text(left_column), row.key_text(right_column))
            else {
                continue;
            };
            let qualifier = qualifier_column
                .and_then(|column| row.key_text(column))
                .unwrap_or_default();
            set.keys.insert(
                RelationLink::with_qualifier(left, right, qualifier).composite_key(),
            );
        }
        set
    }

    pub fn contains(&self, link: &RelationLink) -> bool {
        self.keys.contains(&link.composite_key())
    }

    pub fn insert(&mut self, link: &RelationLink) {
        self.keys.insert(link.composite_key());
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Column binding for one join table.
#[derive(Debug, Clone, Copy)]
pub struct RelationTable {
    pub table: &'static str,
    pub left_column: &'static str,
    pub right_column: &'static str,
    pub qualifier_column: Option<&'static str>,
}

impl RelationTable {
    pub fn payload(&self, link: &RelationLink) -> Payload {
        let mut payload = Payload::new();
        payload.insert(
            self.left_column.to_string(),
            FieldValue::from_text(&link.left),
        );
        payload.insert(
            self.right_column.to_string(),
            FieldValue::from_text(&link.right),
        );
        if let Some(column) = self.qualifier_column {
            payload.insert(column.to_string(), FieldValue::from_text(&link.qualifier));
        }
        payload
    }

    /// `desired − known − already seen in this call`, in first-seen order.
    /// Links with a blank side are discarded.
    pub fn missing_links(
        &self,
        desired: &[RelationLink],
        known: &RelationSet,
    ) -> Vec<RelationLink> {
        let mut seen = HashSet::new();
        let mut missing = Vec::new();
        for link in desired {
            if link.left.is_empty() || link.right.is_empty() {
                continue;
            }
            let key = link.composite_key();
            if known.contains(link) || !seen.insert(key) {
                continue;
            }
            missing.push(link.clone());
        }
        missing
    }

    /// Chunks the missing links and shapes them into upsert operations; the
    /// per-chunk hook receives the links of that chunk.
    pub fn operations<C>(
        &self,
        missing: Vec<RelationLink>,
        batch_size: usize,
        hook_for_chunk: impl Fn(Vec<RelationLink>) -> SuccessHook<C>,
    ) -> Vec<Operation<C>> {
        plan::chunk(missing, batch_size)
            .into_iter()
            .enumerate()
            .map(|(chunk_index, links)| {
                let rows = links.iter().map(|link| self.payload(link)).collect();
                Operation {
                    table: self.table,
                    kind: OperationKind::Upsert {
                        rows,
                        chunk: chunk_index,
                    },
                    on_success: Some(hook_for_chunk(links)),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRADES: RelationTable = RelationTable {
        table: "craftsman_trades",
        left_column: "craftsman_id",
        right_column: "trade_id",
        qualifier_column: None,
    };

    #[test]
    fn missing_links_drop_known_and_session_duplicates() {
        let mut known = RelationSet::default();
        known.insert(&RelationLink::new("c1", "t1"));

        let desired = vec![
            RelationLink::new("c1", "t1"),
            RelationLink::new("c1", "t2"),
            RelationLink::new("c1", "t2"),
            RelationLink::new("c2", "t1"),
        ];
        let missing = TRADES.missing_links(&desired, &known);
        assert_eq!(
            missing,
            vec![RelationLink::new("c1", "t2"), RelationLink::new("c2", "t1")]
        );
    }

    #[test]
    fn qualifier_distinguishes_links() {
        let known = RelationSet::default();
        let desired = vec![
            RelationLink::with_qualifier("w1", "c1", "primary"),
            RelationLink::with_qualifier("w1", "c1", "secondary"),
        ];
        let table = RelationTable {
            table: "work_order_craftsmen",
            left_column: "work_order_id",
            right_column: "craftsman_id",
            qualifier_column: Some("role"),
        };
        assert_eq!(table.missing_links(&desired, &known).len(), 2);
    }

    #[test]
    fn blank_sides_are_discarded() {
        let known = RelationSet::default();
        let desired = vec![RelationLink::new("", "t1"), RelationLink::new("c1", "")];
        assert!(TRADES.missing_links(&desired, &known).is_empty());
    }

    #[test]
    fn operations_chunk_and_shape_payloads() {
        let missing = vec![
            RelationLink::new("c1", "t1"),
            RelationLink::new("c1", "t2"),
            RelationLink::new("c2", "t1"),
        ];
        let operations: Vec<Operation<()>> =
            TRADES.operations(missing, 2, |links| Box::new(move |_cx, _rows, _dry| drop(links)));
        assert_eq!(operations.len(), 2);
        match &operations[0].kind {
            OperationKind::Upsert { rows, chunk } => {
                assert_eq!(*chunk, 0);
                assert_eq!(rows.len(), 2);
                assert_eq!(rows[0]["craftsman_id"], FieldValue::from_text("c1"));
            }
            other => panic!("expected upsert, got {other:?}"),
        }
    }

    #[test]
    fn relation_set_reads_snapshot_rows() {
        let rows = vec![StoredRow::new(
            "1",
            [
                ("work_order_id".to_string(), FieldValue::from_text("w1")),
                ("craftsman_id".to_string(), FieldValue::from_text("c1")),
                ("role".to_string(), FieldValue::from_text("primary")),
            ]
            .into(),
        )];
        let set = RelationSet::from_rows(&rows, "work_order_id", "craftsman_id", Some("role"));
        assert!(set.contains(&RelationLink::with_qualifier("w1", "c1", "primary")));
        assert!(!set.contains(&RelationLink::new("w1", "c1")));
    }
}
