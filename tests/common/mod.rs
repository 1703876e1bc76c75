#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::{TempDir, tempdir};

use sheet_sync::store::{MemoryStore, PageWindow, StorageClient, StoreError};
use sheet_sync::value::{FieldValue, Payload, StoredRow};

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }
}

pub fn payload(pairs: &[(&str, &str)]) -> Payload {
    pairs
        .iter()
        .map(|(field, value)| (field.to_string(), FieldValue::from_text(value)))
        .collect()
}

pub fn row(id: &str, pairs: &[(&str, &str)]) -> StoredRow {
    StoredRow::new(id, payload(pairs))
}

/// A store seeded with one manager, one trade, and one craftsman, enough for
/// reconciliation runs to resolve references.
pub fn seeded_store() -> MemoryStore {
    MemoryStore::new()
        .with_table(
            "managers",
            vec![row("m1", &[("name", "Gérald H."), ("manager_code", "GH")])],
        )
        .with_table(
            "trades",
            vec![row("t1", &[("code", "PLOMBERIE"), ("label", "Plomberie")])],
        )
        .with_table(
            "craftsmen",
            vec![row(
                "c1",
                &[
                    ("full_name", "Marc Petit"),
                    ("associate_number", "A-17"),
                    ("email", "marc@atelier.fr"),
                    ("phone", "0601020304"),
                ],
            )],
        )
}

/// Delegates to a [`MemoryStore`] but fails the nth write against one table,
/// recording every attempted write for never-attempted assertions.
pub struct FailingStore {
    pub inner: MemoryStore,
    fail_table: String,
    fail_on_write: usize,
    writes_seen: usize,
    pub attempts: Vec<String>,
}

impl FailingStore {
    pub fn new(inner: MemoryStore, fail_table: &str, fail_on_write: usize) -> Self {
        FailingStore {
            inner,
            fail_table: fail_table.to_string(),
            fail_on_write,
            writes_seen: 0,
            attempts: Vec::new(),
        }
    }

    fn gate(&mut self, action: &str, table: &str) -> Result<(), StoreError> {
        self.attempts.push(format!("{action} {table}"));
        if table == self.fail_table {
            self.writes_seen += 1;
            if self.writes_seen == self.fail_on_write {
                return Err(StoreError::backend("injected failure"));
            }
        }
        Ok(())
    }
}

impl StorageClient for FailingStore {
    fn read(
        &mut self,
        table: &str,
        columns: &[&str],
        window: PageWindow,
    ) -> Result<Vec<StoredRow>, StoreError> {
        self.inner.read(table, columns, window)
    }

    fn insert(&mut self, table: &str, rows: &[Payload]) -> Result<Vec<StoredRow>, StoreError> {
        self.gate("insert", table)?;
        self.inner.insert(table, rows)
    }

    fn update(
        &mut self,
        table: &str,
        id: &str,
        patch: &Payload,
    ) -> Result<Vec<StoredRow>, StoreError> {
        self.gate("update", table)?;
        self.inner.update(table, id, patch)
    }

    fn upsert(&mut self, table: &str, rows: &[Payload]) -> Result<Vec<StoredRow>, StoreError> {
        self.gate("upsert", table)?;
        self.inner.upsert(table, rows)
    }

    fn delete(&mut self, table: &str, id: &str) -> Result<(), StoreError> {
        self.gate("delete", table)?;
        self.inner.delete(table, id)
    }
}

/// Builds a craftsmen sheet CSV from (full_name, associate_number, email,
/// phone, manager_code, trades) tuples.
pub fn craftsmen_csv(rows: &[(&str, &str, &str, &str, &str, &str)]) -> String {
    let mut contents = String::from(
        "full_name,associate_number,company_name,company_number,legal_status,craftsman_status,\
         file_status,address,city,postal_code,email,phone,date_added,manager_code,trades\n",
    );
    for (full_name, number, email, phone, manager_code, trades) in rows {
        contents.push_str(&format!(
            "{full_name},{number},,,,,,,,,{email},{phone},,{manager_code},\"{trades}\"\n"
        ));
    }
    contents
}

/// Builds a work orders sheet CSV from (date, reference, status,
/// craftsman_number, labor_cost) tuples.
pub fn work_orders_csv(rows: &[(&str, &str, &str, &str, &str)]) -> String {
    let mut contents = String::from(
        "date,agency,address,reference,status,context,trade,manager_code,craftsman_reference,\
         labor_cost,materials_cost,craftsman_number,callout_cost,labor_share_pct,owner,\
         completion_date,client_phone,client_name,client_email,comment,review,visit_requested,\
         quote_requested,review_requested\n",
    );
    for (date, reference, status, craftsman_number, labor_cost) in rows {
        contents.push_str(&format!(
            "{date},,,{reference},{status},,,,,{labor_cost},,{craftsman_number},,,,,,,,,,,,\n"
        ));
    }
    contents
}
