//! Sequential operation execution with hand-rolled compensation. The backend
//! offers no multi-statement transactions, so each completed operation leaves
//! an append-only history entry; on the first failure the history is replayed
//! in reverse with a compensating action per entry, then the original error
//! surfaces to the caller.
//!
//! All effects flow through an [`EffectSink`]: [`LiveSink`] writes through a
//! storage client, [`SimulatedSink`] substitutes synthetic identifiers so a
//! dry run can drive the same callbacks without touching storage.

use log::{error, info};
use thiserror::Error;

use crate::store::{StorageClient, StoreError};
use crate::value::{Payload, StoredRow};

/// A write call failed; carries the table and the backend cause. Raised only
/// after rollback of the batch has completed.
#[derive(Debug, Error)]
#[error("storage operation failed on table '{table}': {source}")]
pub struct StorageOperationFailed {
    pub table: String,
    #[source]
    pub source: StoreError,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OperationKind {
    Insert {
        rows: Vec<Payload>,
        chunk: usize,
    },
    Update {
        id: String,
        patch: Payload,
        before: Payload,
    },
    Upsert {
        rows: Vec<Payload>,
        chunk: usize,
    },
    Delete {
        id: String,
        backup: Payload,
    },
}

impl OperationKind {
    fn name(&self) -> &'static str {
        match self {
            OperationKind::Insert { .. } => "insert",
            OperationKind::Update { .. } => "update",
            OperationKind::Upsert { .. } => "upsert",
            OperationKind::Delete { .. } => "delete",
        }
    }
}

/// Fired once after the operation succeeds, with the produced rows and a flag
/// marking simulated execution. Success callbacks are the only place the
/// lookup indexes and pending relation links are mutated.
pub type SuccessHook<C> = Box<dyn FnOnce(&mut C, &[StoredRow], bool)>;

pub struct Operation<C> {
    pub table: &'static str,
    pub kind: OperationKind,
    pub on_success: Option<SuccessHook<C>>,
}

impl<C> Operation<C> {
    pub fn new(table: &'static str, kind: OperationKind) -> Self {
        Operation {
            table,
            kind,
            on_success: None,
        }
    }

    pub fn with_hook(
        mut self,
        hook: impl FnOnce(&mut C, &[StoredRow], bool) + 'static,
    ) -> Self {
        self.on_success = Some(Box::new(hook));
        self
    }
}

/// Everything needed to reverse one completed operation.
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryEntry {
    Insert {
        table: &'static str,
        ids: Vec<String>,
    },
    Update {
        table: &'static str,
        id: String,
        before: Payload,
    },
    Upsert {
        table: &'static str,
        ids: Vec<String>,
    },
    Delete {
        table: &'static str,
        backup: Payload,
    },
}

impl HistoryEntry {
    pub fn table(&self) -> &'static str {
        match self {
            HistoryEntry::Insert { table, .. }
            | HistoryEntry::Update { table, .. }
            | HistoryEntry::Upsert { table, .. }
            | HistoryEntry::Delete { table, .. } => table,
        }
    }
}

/// Where operation effects land.
pub trait EffectSink {
    fn is_simulated(&self) -> bool {
        false
    }

    fn apply(
        &mut self,
        table: &'static str,
        kind: &OperationKind,
    ) -> Result<Vec<StoredRow>, StoreError>;

    fn compensate(&mut self, entry: &HistoryEntry) -> Result<(), StoreError>;
}

/// Writes through to a storage client.
pub struct LiveSink<'a> {
    pub client: &'a mut dyn StorageClient,
}

impl<'a> LiveSink<'a> {
    pub fn new(client: &'a mut dyn StorageClient) -> Self {
        LiveSink { client }
    }
}

impl EffectSink for LiveSink<'_> {
    fn apply(
        &mut self,
        table: &'static str,
        kind: &OperationKind,
    ) -> Result<Vec<StoredRow>, StoreError> {
        match kind {
            OperationKind::Insert { rows, .. } => self.client.insert(table, rows),
            OperationKind::Update { id, patch, .. } => self.client.update(table, id, patch),
            OperationKind::Upsert { rows, .. } => self.client.upsert(table, rows),
            OperationKind::Delete { id, .. } => self.client.delete(table, id).map(|()| Vec::new()),
        }
    }

    fn compensate(&mut self, entry: &HistoryEntry) -> Result<(), StoreError> {
        match entry {
            HistoryEntry::Insert { table, ids } => {
                if ids.is_empty() {
                    Ok(())
                } else {
                    self.client.delete_many(table, ids)
                }
            }
            HistoryEntry::Update { table, id, before } => {
                self.client.update(table, id, before).map(|_| ())
            }
            // An upsert may have replaced a pre-existing row; no reverse
            // action is safe.
            HistoryEntry::Upsert { .. } => Ok(()),
            HistoryEntry::Delete { table, backup } => self
                .client
                .insert(table, std::slice::from_ref(backup))
                .map(|_| ()),
        }
    }
}

/// Simulates every effect. Inserted and upserted rows receive synthetic
/// sequential identifiers of the form `dryrun-<table>-<chunk>-<row>`, updates
/// echo the computed patch, deletes produce nothing.
#[derive(Debug, Default)]
pub struct SimulatedSink;

impl EffectSink for SimulatedSink {
    fn is_simulated(&self) -> bool {
        true
    }

    fn apply(
        &mut self,
        table: &'static str,
        kind: &OperationKind,
    ) -> Result<Vec<StoredRow>, StoreError> {
        let rows = match kind {
            OperationKind::Insert { rows, chunk } | OperationKind::Upsert { rows, chunk } => rows
                .iter()
                .enumerate()
                .map(|(row_index, payload)| {
                    StoredRow::new(format!("dryrun-{table}-{chunk}-{row_index}"), payload.clone())
                })
                .collect(),
            OperationKind::Update { id, patch, .. } => {
                vec![StoredRow::new(id.clone(), patch.clone())]
            }
            OperationKind::Delete { .. } => Vec::new(),
        };
        Ok(rows)
    }

    fn compensate(&mut self, _entry: &HistoryEntry) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Applies `operations` strictly in order. After each success the history
/// grows by one entry (live mode only) and the operation's callback fires. On
/// the first failure the completed prefix is rolled back in reverse and the
/// failure is returned; operations after the failed one are never attempted.
pub fn apply_operations<C>(
    label: &str,
    operations: Vec<Operation<C>>,
    sink: &mut dyn EffectSink,
    cx: &mut C,
) -> Result<(), StorageOperationFailed> {
    if operations.is_empty() {
        return Ok(());
    }
    info!("{label}: executing {} operation(s)", operations.len());

    let simulated = sink.is_simulated();
    let mut history: Vec<HistoryEntry> = Vec::new();

    for operation in operations {
        let rows = match sink.apply(operation.table, &operation.kind) {
            Ok(rows) => rows,
            Err(source) => {
                error!(
                    "{label}: {} on '{}' failed ({source}), rolling back {} completed operation(s)",
                    operation.kind.name(),
                    operation.table,
                    history.len()
                );
                rollback(&mut history, sink);
                return Err(StorageOperationFailed {
                    table: operation.table.to_string(),
                    source,
                });
            }
        };
        if !simulated {
            history.push(history_entry(operation.table, &operation.kind, &rows));
        }
        if let Some(hook) = operation.on_success {
            hook(cx, &rows, simulated);
        }
    }
    Ok(())
}

fn history_entry(
    table: &'static str,
    kind: &OperationKind,
    rows: &[StoredRow],
) -> HistoryEntry {
    match kind {
        OperationKind::Insert { .. } => HistoryEntry::Insert {
            table,
            ids: rows.iter().map(|row| row.id.clone()).collect(),
        },
        OperationKind::Update { id, before, .. } => HistoryEntry::Update {
            table,
            id: id.clone(),
            before: before.clone(),
        },
        OperationKind::Upsert { .. } => HistoryEntry::Upsert {
            table,
            ids: rows.iter().map(|row| row.id.clone()).collect(),
        },
        OperationKind::Delete { backup, .. } => HistoryEntry::Delete {
            table,
            backup: backup.clone(),
        },
    }
}

/// Reverse-applies and drains the history, most recent entry first. A failed
/// compensation is logged and does not stop the remaining entries; draining
/// makes a second rollback of the same history a no-op.
pub fn rollback(history: &mut Vec<HistoryEntry>, sink: &mut dyn EffectSink) {
    while let Some(entry) = history.pop() {
        if let Err(err) = sink.compensate(&entry) {
            error!("rollback step on '{}' failed: {err}", entry.table());
        }
    }
}
