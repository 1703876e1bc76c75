//! Spreadsheet source boundary. The engine asks a [`SheetSource`] for the raw
//! string rows of a named sheet; the shipped implementation reads CSV exports
//! with the usual delimiter and encoding handling.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use encoding_rs::{Encoding, UTF_8};
use log::info;
use thiserror::Error;

/// The sheet reader failed before any writes happened; fatal to the run.
#[derive(Debug, Error)]
#[error("failed to fetch sheet '{sheet}': {reason}")]
pub struct SourceFetchError {
    pub sheet: String,
    pub reason: String,
}

impl SourceFetchError {
    fn new(sheet: &str, reason: impl Into<String>) -> Self {
        SourceFetchError {
            sheet: sheet.to_string(),
            reason: reason.into(),
        }
    }
}

/// Returns the raw cell rows of a sheet, or an empty list when the sheet has
/// no data rows.
pub trait SheetSource {
    fn fetch_rows(&mut self, sheet: &str) -> Result<Vec<Vec<String>>, SourceFetchError>;
}

pub const DEFAULT_CSV_DELIMITER: u8 = b',';
pub const DEFAULT_TSV_DELIMITER: u8 = b'\t';

pub fn resolve_encoding(label: Option<&str>) -> anyhow::Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow::anyhow!("Unknown encoding '{value}'"))
    } else {
        Ok(UTF_8)
    }
}

pub fn resolve_delimiter(path: &Path, provided: Option<u8>) -> u8 {
    provided.unwrap_or_else(|| match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => DEFAULT_TSV_DELIMITER,
        _ => DEFAULT_CSV_DELIMITER,
    })
}

/// Sheet registry over CSV export files. The header row of each file is
/// skipped; data rows come back as raw strings for the mapper to normalize.
pub struct CsvSheetSource {
    files: HashMap<String, PathBuf>,
    delimiter: Option<u8>,
    encoding: &'static Encoding,
}

impl CsvSheetSource {
    pub fn new() -> Self {
        CsvSheetSource {
            files: HashMap::new(),
            delimiter: None,
            encoding: UTF_8,
        }
    }

    pub fn with_sheet(mut self, sheet: &str, path: &Path) -> Self {
        self.files.insert(sheet.to_string(), path.to_path_buf());
        self
    }

    pub fn with_delimiter(mut self, delimiter: Option<u8>) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_encoding(mut self, encoding: &'static Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    fn open_reader(&self, path: &Path, sheet: &str) -> Result<csv::Reader<Box<dyn Read>>, SourceFetchError> {
        let file = File::open(path)
            .map_err(|err| SourceFetchError::new(sheet, format!("opening {path:?}: {err}")))?;
        let reader: Box<dyn Read> = Box::new(BufReader::new(file));
        let mut builder = csv::ReaderBuilder::new();
        builder
            .has_headers(true)
            .delimiter(resolve_delimiter(path, self.delimiter))
            .double_quote(true)
            .flexible(true);
        Ok(builder.from_reader(reader))
    }

    fn decode(&self, record: &csv::ByteRecord, sheet: &str) -> Result<Vec<String>, SourceFetchError> {
        record
            .iter()
            .map(|field| {
                let (text, _, had_errors) = self.encoding.decode(field);
                if had_errors {
                    Err(SourceFetchError::new(
                        sheet,
                        format!("undecodable text with encoding {}", self.encoding.name()),
                    ))
                } else {
                    Ok(text.into_owned())
                }
            })
            .collect()
    }
}

impl Default for CsvSheetSource {
    fn default() -> Self {
        CsvSheetSource::new()
    }
}

impl SheetSource for CsvSheetSource {
    fn fetch_rows(&mut self, sheet: &str) -> Result<Vec<Vec<String>>, SourceFetchError> {
        let Some(path) = self.files.get(sheet).cloned() else {
            return Err(SourceFetchError::new(sheet, "no file registered"));
        };
        info!("reading sheet '{sheet}' from {path:?}");
        let mut reader = self.open_reader(&path, sheet)?;
        let mut rows = Vec::new();
        let mut record = csv::ByteRecord::new();
        loop {
            match reader.read_byte_record(&mut record) {
                Ok(true) => rows.push(self.decode(&record, sheet)?),
                Ok(false) => break,
                Err(err) => {
                    return Err(SourceFetchError::new(sheet, err.to_string()));
                }
            }
        }
        Ok(rows)
    }
}
