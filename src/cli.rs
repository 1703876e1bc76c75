use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about = "Reconcile spreadsheet exports with a relational store", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Reconcile the craftsmen and work orders sheets against the store
    Sync(SyncArgs),
    /// Run the field validators against source files without writing
    Validate(ValidateArgs),
}

#[derive(Debug, Args)]
pub struct SyncArgs {
    /// Craftsmen sheet exported as CSV
    #[arg(long = "craftsmen")]
    pub craftsmen: PathBuf,
    /// Work orders sheet exported as CSV
    #[arg(long = "work-orders")]
    pub work_orders: PathBuf,
    /// JSON store document to reconcile against
    #[arg(short, long)]
    pub store: PathBuf,
    /// Simulate all writes and report what would change
    #[arg(short = 'd', long = "dry-run")]
    pub dry_run: bool,
    /// Chunk size for batched inserts and relation upserts
    #[arg(long = "batch-size", default_value_t = 100)]
    pub batch_size: usize,
    /// Enable per-row tracing
    #[arg(short, long)]
    pub verbose: bool,
    /// Submit insert chunks as upserts
    #[arg(long)]
    pub upsert: bool,
    /// Count rows without any usable natural key as errors instead of skips
    #[arg(long = "strict-keys")]
    pub strict_keys: bool,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input files (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct ValidateArgs {
    /// Craftsmen sheet exported as CSV
    #[arg(long = "craftsmen")]
    pub craftsmen: Option<PathBuf>,
    /// Work orders sheet exported as CSV
    #[arg(long = "work-orders")]
    pub work_orders: Option<PathBuf>,
    /// Enable per-row tracing
    #[arg(short, long)]
    pub verbose: bool,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input files (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_delimiter_accepts_names_and_single_characters() {
        assert_eq!(parse_delimiter("tab"), Ok(b'\t'));
        assert_eq!(parse_delimiter(";"), Ok(b';'));
        assert!(parse_delimiter("ab").is_err());
        assert!(parse_delimiter("").is_err());
    }
}
