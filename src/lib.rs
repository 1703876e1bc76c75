pub mod cli;
pub mod diff;
pub mod executor;
pub mod index;
pub mod mapper;
pub mod matcher;
pub mod normalize;
pub mod plan;
pub mod relations;
pub mod report;
pub mod source;
pub mod store;
pub mod sync;
pub mod validate;
pub mod value;

use std::{env, sync::OnceLock};

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{LevelFilter, info, warn};

use crate::cli::{Cli, Commands, SyncArgs, ValidateArgs};
use crate::source::{CsvSheetSource, SheetSource};
use crate::store::JsonFileStore;
use crate::sync::SyncOptions;
use crate::validate::EntityKind;

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging(verbose: bool) {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            let level = if verbose {
                LevelFilter::Debug
            } else {
                LevelFilter::Info
            };
            builder.filter_module("sheet_sync", level);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Sync(args) => handle_sync(&args),
        Commands::Validate(args) => handle_validate(&args),
    }
}

fn handle_sync(args: &SyncArgs) -> Result<()> {
    init_logging(args.verbose);
    let encoding = source::resolve_encoding(args.input_encoding.as_deref())?;

    let mut sheets = CsvSheetSource::new()
        .with_sheet("craftsmen", &args.craftsmen)
        .with_sheet("work_orders", &args.work_orders)
        .with_delimiter(args.delimiter)
        .with_encoding(encoding);

    let mut store = JsonFileStore::open(&args.store)
        .with_context(|| format!("Opening store {:?}", args.store))?;

    let options = SyncOptions {
        dry_run: args.dry_run,
        batch_size: args.batch_size,
        verbose: args.verbose,
        upsert: args.upsert,
        strict_keys: args.strict_keys,
    };

    let outcome = sync::run_sync(&mut sheets, &mut store, &options)?;
    outcome.report.emit();

    if !options.dry_run {
        // Completed phases keep their results even when a later phase failed
        // and was rolled back.
        store
            .save()
            .with_context(|| format!("Saving store {:?}", args.store))?;
    }

    match outcome.failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn handle_validate(args: &ValidateArgs) -> Result<()> {
    init_logging(args.verbose);
    if args.craftsmen.is_none() && args.work_orders.is_none() {
        bail!("Provide at least one of --craftsmen or --work-orders");
    }
    let encoding = source::resolve_encoding(args.input_encoding.as_deref())?;

    let mut invalid = 0usize;
    if let Some(path) = &args.craftsmen {
        let mut sheets = CsvSheetSource::new()
            .with_sheet("craftsmen", path)
            .with_delimiter(args.delimiter)
            .with_encoding(encoding);
        let rows = sheets.fetch_rows("craftsmen")?;
        invalid += validate_sheet("craftsmen", mapper::CRAFTSMAN_COLUMNS, &rows, EntityKind::Craftsman);
    }
    if let Some(path) = &args.work_orders {
        let mut sheets = CsvSheetSource::new()
            .with_sheet("work_orders", path)
            .with_delimiter(args.delimiter)
            .with_encoding(encoding);
        let rows = sheets.fetch_rows("work_orders")?;
        invalid += validate_sheet(
            "work orders",
            mapper::WORK_ORDER_COLUMNS,
            &rows,
            EntityKind::WorkOrder,
        );
    }

    if invalid > 0 {
        bail!("{invalid} row(s) failed validation");
    }
    info!("all rows passed validation");
    Ok(())
}

/// Validation only needs the shaped payloads; rows are mapped against empty
/// reference indexes and resolution warnings are discarded.
fn validate_sheet(
    label: &str,
    columns: &'static [&'static str],
    rows: &[Vec<String>],
    kind: EntityKind,
) -> usize {
    use crate::index::LookupIndex;
    use crate::report::Report;

    let records = mapper::rows_to_records(columns, rows);
    let empty = LookupIndex::new(Vec::new());
    let mut scratch = Report::default();
    let mut invalid = 0usize;

    for (position, record) in records.iter().enumerate() {
        let row_number = position + 2;
        let payload = match kind {
            EntityKind::Craftsman => {
                mapper::map_craftsman(record, row_number, &empty, &empty, &mut scratch)
                    .map(|candidate| candidate.payload)
            }
            EntityKind::WorkOrder => {
                mapper::map_work_order(record, row_number, &empty, &empty, &mut scratch)
                    .map(|candidate| candidate.payload)
            }
        };
        let Some(payload) = payload else {
            warn!("{label} row {row_number}: unusable (missing identifying fields)");
            invalid += 1;
            continue;
        };
        let outcome = validate::validate(&payload, kind);
        for warning in &outcome.warnings {
            info!("{label} row {row_number}: warning: {warning}");
        }
        if !outcome.is_valid() {
            for error in &outcome.errors {
                warn!("{label} row {row_number}: {error}");
            }
            invalid += 1;
        }
    }
    info!("{label}: {} row(s) checked, {invalid} invalid", records.len());
    invalid
}
