//! Storage client boundary. The engine only ever talks to a [`StorageClient`]:
//! single-call reads and writes against named tables, no multi-statement
//! transaction support. Two backends ship with the crate: [`MemoryStore`]
//! (reference backend, used throughout the test suite) and [`JsonFileStore`]
//! (a `MemoryStore` persisted to a JSON document so the CLI runs end-to-end).

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::value::{Payload, StoredRow, merge_payload};

/// Window size used when paging through a full table read.
pub const PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct StoreError {
    pub message: String,
}

impl StoreError {
    pub fn backend(message: impl Into<String>) -> Self {
        StoreError {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub offset: usize,
    pub limit: usize,
}

/// Non-transactional access to named tables. Updates and deletes against a
/// missing id succeed with no effect, matching relational REST backends;
/// compensating actions rely on that idempotence.
pub trait StorageClient {
    fn read(
        &mut self,
        table: &str,
        columns: &[&str],
        window: PageWindow,
    ) -> Result<Vec<StoredRow>, StoreError>;

    fn insert(&mut self, table: &str, rows: &[Payload]) -> Result<Vec<StoredRow>, StoreError>;

    fn update(
        &mut self,
        table: &str,
        id: &str,
        patch: &Payload,
    ) -> Result<Vec<StoredRow>, StoreError>;

    fn upsert(&mut self, table: &str, rows: &[Payload]) -> Result<Vec<StoredRow>, StoreError>;

    fn delete(&mut self, table: &str, id: &str) -> Result<(), StoreError>;

    fn delete_many(&mut self, table: &str, ids: &[String]) -> Result<(), StoreError> {
        for id in ids {
            self.delete(table, id)?;
        }
        Ok(())
    }
}

/// Reads every row of `table`, paging in fixed windows until a short page
/// signals the end of the data.
pub fn load_all_rows(
    client: &mut dyn StorageClient,
    table: &str,
    columns: &[&str],
) -> Result<Vec<StoredRow>, StoreError> {
    let mut rows = Vec::new();
    let mut offset = 0;
    loop {
        let page = client.read(
            table,
            columns,
            PageWindow {
                offset,
                limit: PAGE_SIZE,
            },
        )?;
        let fetched = page.len();
        rows.extend(page);
        if fetched < PAGE_SIZE {
            break;
        }
        offset += PAGE_SIZE;
    }
    debug!("loaded {} row(s) from '{table}'", rows.len());
    Ok(rows)
}

/// In-memory table storage with generated UUID row ids.
///
/// Column projection on reads is advisory: full rows are returned and callers
/// tolerate extra fields.
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryStore {
    tables: HashMap<String, Vec<StoredRow>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    pub fn with_table(mut self, table: &str, rows: Vec<StoredRow>) -> Self {
        self.tables.insert(table.to_string(), rows);
        self
    }

    pub fn rows(&self, table: &str) -> &[StoredRow] {
        self.tables.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    fn table_mut(&mut self, table: &str) -> &mut Vec<StoredRow> {
        self.tables.entry(table.to_string()).or_default()
    }

    fn next_id() -> String {
        Uuid::new_v4().to_string()
    }
}

impl StorageClient for MemoryStore {
    fn read(
        &mut self,
        table: &str,
        _columns: &[&str],
        window: PageWindow,
    ) -> Result<Vec<StoredRow>, StoreError> {
        let rows = self.rows(table);
        let start = window.offset.min(rows.len());
        let end = (window.offset + window.limit).min(rows.len());
        Ok(rows[start..end].to_vec())
    }

    fn insert(&mut self, table: &str, rows: &[Payload]) -> Result<Vec<StoredRow>, StoreError> {
        let inserted: Vec<StoredRow> = rows
            .iter()
            .map(|payload| StoredRow::new(Self::next_id(), payload.clone()))
            .collect();
        self.table_mut(table).extend(inserted.clone());
        Ok(inserted)
    }

    fn update(
        &mut self,
        table: &str,
        id: &str,
        patch: &Payload,
    ) -> Result<Vec<StoredRow>, StoreError> {
        let rows = self.table_mut(table);
        match rows.iter_mut().find(|row| row.id == id) {
            Some(row) => {
                row.fields = merge_payload(&row.fields, patch);
                Ok(vec![row.clone()])
            }
            None => Ok(Vec::new()),
        }
    }

    fn upsert(&mut self, table: &str, rows: &[Payload]) -> Result<Vec<StoredRow>, StoreError> {
        let mut produced = Vec::with_capacity(rows.len());
        for payload in rows {
            let existing = self
                .rows(table)
                .iter()
                .find(|row| payload.iter().all(|(field, value)| row.field(field) == value))
                .cloned();
            match existing {
                Some(row) => produced.push(row),
                None => {
                    let row = StoredRow::new(Self::next_id(), payload.clone());
                    self.table_mut(table).push(row.clone());
                    produced.push(row);
                }
            }
        }
        Ok(produced)
    }

    fn delete(&mut self, table: &str, id: &str) -> Result<(), StoreError> {
        self.table_mut(table).retain(|row| row.id != id);
        Ok(())
    }
}

/// A [`MemoryStore`] persisted to a single JSON document.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    store: MemoryStore,
}

impl JsonFileStore {
    /// Opens the store document, starting empty when the file does not exist
    /// yet.
    pub fn open(path: &Path) -> Result<Self> {
        let store = if path.exists() {
            let file =
                File::open(path).with_context(|| format!("Opening store document {path:?}"))?;
            serde_json::from_reader(BufReader::new(file))
                .with_context(|| format!("Parsing store document {path:?}"))?
        } else {
            MemoryStore::new()
        };
        Ok(JsonFileStore {
            path: path.to_path_buf(),
            store,
        })
    }

    pub fn save(&self) -> Result<()> {
        let file = File::create(&self.path)
            .with_context(|| format!("Creating store document {:?}", self.path))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &self.store)
            .context("Writing store document JSON")
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.store
    }
}

impl StorageClient for JsonFileStore {
    fn read(
        &mut self,
        table: &str,
        columns: &[&str],
        window: PageWindow,
    ) -> Result<Vec<StoredRow>, StoreError> {
        self.store.read(table, columns, window)
    }

    fn insert(&mut self, table: &str, rows: &[Payload]) -> Result<Vec<StoredRow>, StoreError> {
        self.store.insert(table, rows)
    }

    fn update(
        &mut self,
        table: &str,
        id: &str,
        patch: &Payload,
    ) -> Result<Vec<StoredRow>, StoreError> {
        self.store.update(table, id, patch)
    }

    fn upsert(&mut self, table: &str, rows: &[Payload]) -> Result<Vec<StoredRow>, StoreError> {
        self.store.upsert(table, rows)
    }

    fn delete(&mut self, table: &str, id: &str) -> Result<(), StoreError> {
        self.store.delete(table, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::FieldValue;

    fn payload(pairs: &[(&str, &str)]) -> Payload {
        pairs
            .iter()
            .map(|(field, value)| (field.to_string(), FieldValue::from_text(value)))
            .collect()
    }

    #[test]
    fn insert_assigns_distinct_ids() {
        let mut store = MemoryStore::new();
        let rows = store
            .insert("craftsmen", &[payload(&[("email", "a@b.fr")])])
            .expect("insert");
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].id.is_empty());
        assert_eq!(store.rows("craftsmen").len(), 1);
    }

    #[test]
    fn update_on_missing_id_is_a_quiet_no_op() {
        let mut store = MemoryStore::new();
        let updated = store
            .update("craftsmen", "ghost", &payload(&[("phone", "0601")]))
            .expect("update");
        assert!(updated.is_empty());
    }

    #[test]
    fn delete_is_idempotent() {
        let mut store = MemoryStore::new();
        let rows = store
            .insert("craftsmen", &[payload(&[("email", "a@b.fr")])])
            .expect("insert");
        let id = rows[0].id.clone();
        store.delete("craftsmen", &id).expect("first delete");
        store.delete("craftsmen", &id).expect("second delete");
        assert!(store.rows("craftsmen").is_empty());
    }

    #[test]
    fn upsert_returns_the_existing_row_on_duplicate_fields() {
        let mut store = MemoryStore::new();
        let link = payload(&[("craftsman_id", "c1"), ("trade_id", "t1")]);
        let first = store.upsert("craftsman_trades", &[link.clone()]).expect("upsert");
        let second = store.upsert("craftsman_trades", &[link]).expect("upsert again");
        assert_eq!(first, second);
        assert_eq!(store.rows("craftsman_trades").len(), 1);
    }

    #[test]
    fn load_all_rows_pages_until_a_short_page() {
        let seeded: Vec<StoredRow> = (0..(PAGE_SIZE + 3))
            .map(|i| StoredRow::new(i.to_string(), Payload::new()))
            .collect();
        let mut store = MemoryStore::new().with_table("work_orders", seeded);
        let rows = load_all_rows(&mut store, "work_orders", &["id"]).expect("load");
        assert_eq!(rows.len(), PAGE_SIZE + 3);
    }

    #[test]
    fn json_store_round_trips_through_disk() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("store.json");
        {
            let mut store = JsonFileStore::open(&path).expect("open empty");
            store
                .insert("trades", &[payload(&[("code", "PLOMBERIE"), ("label", "Plomberie")])])
                .expect("insert");
            store.save().expect("save");
        }
        let reopened = JsonFileStore::open(&path).expect("reopen");
        assert_eq!(reopened.memory().rows("trades").len(), 1);
    }
}
