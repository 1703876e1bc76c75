//! Run orchestration: bootstraps in-memory state from the store, ensures the
//! trade catalogue, then reconciles craftsmen and work orders in sequence.
//! All processing is single-threaded; indexes and relation sets are mutated
//! only from operation success callbacks, so a later row can match a record
//! inserted earlier in the same run.

use std::collections::HashMap;

use anyhow::{Context, Result};
use log::{debug, info};

use crate::executor::{self, EffectSink, LiveSink, Operation, OperationKind, SimulatedSink};
use crate::index::{self, KeySpec, LookupIndex};
use crate::mapper::{
    self, CRAFTSMAN_COLUMNS, CraftsmanCandidate, SourceRow, WORK_ORDER_COLUMNS,
    WorkOrderCandidate,
};
use crate::matcher::MatchPolicy;
use crate::normalize;
use crate::plan::{self, RowAction};
use crate::relations::{RelationLink, RelationSet, RelationTable};
use crate::report::Report;
use crate::source::SheetSource;
use crate::store::{StorageClient, load_all_rows};
use crate::validate::{self, EntityKind};
use crate::value::{FieldValue, Payload, StoredRow, merge_payload};

pub const MANAGERS_TABLE: &str = "managers";
pub const TRADES_TABLE: &str = "trades";
pub const CRAFTSMEN_TABLE: &str = "craftsmen";
pub const WORK_ORDERS_TABLE: &str = "work_orders";

pub const CRAFTSMAN_TRADES: RelationTable = RelationTable {
    table: "craftsman_trades",
    left_column: "craftsman_id",
    right_column: "trade_id",
    qualifier_column: None,
};

pub const WORK_ORDER_CRAFTSMEN: RelationTable = RelationTable {
    table: "work_order_craftsmen",
    left_column: "work_order_id",
    right_column: "craftsman_id",
    qualifier_column: Some("role"),
};

/// Role given to the craftsman linked from the work-order sheet itself.
pub const PRIMARY_ROLE: &str = "primary";

pub const DEFAULT_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Simulate all writes; synthetic identifiers stand in for inserted rows.
    pub dry_run: bool,
    /// Chunk size for batched inserts and relation upserts.
    pub batch_size: usize,
    pub verbose: bool,
    /// Submit insert chunks as upserts, tolerating concurrent duplicates.
    pub upsert: bool,
    /// Count rows with no usable natural key as errors instead of skips.
    pub strict_keys: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        SyncOptions {
            dry_run: false,
            batch_size: DEFAULT_BATCH_SIZE,
            verbose: false,
            upsert: false,
            strict_keys: false,
        }
    }
}

/// All mutable state of one run. Success callbacks receive it exclusively.
pub struct SyncState {
    pub managers: LookupIndex,
    pub trades: LookupIndex,
    pub craftsmen: LookupIndex,
    pub work_orders: LookupIndex,
    pub known_craftsman_trades: RelationSet,
    pub known_order_craftsmen: RelationSet,
    pub pending_trade_links: Vec<RelationLink>,
    pub pending_order_links: Vec<RelationLink>,
    pub report: Report,
}

pub fn craftsman_key_specs() -> Vec<KeySpec> {
    vec![
        KeySpec::folded(index::EMAIL, "email"),
        KeySpec::exact(index::ASSOCIATE_NUMBER, "associate_number"),
    ]
}

pub fn craftsman_match_policy() -> MatchPolicy {
    MatchPolicy::new(vec![index::EMAIL, index::ASSOCIATE_NUMBER])
}

pub fn work_order_match_policy() -> MatchPolicy {
    MatchPolicy::new(vec![index::REFERENCE])
}

const CRAFTSMAN_READ_COLUMNS: &[&str] = &[
    "id",
    "full_name",
    "associate_number",
    "company_number",
    "email",
    "phone",
    "manager_id",
];

const WORK_ORDER_READ_COLUMNS: &[&str] = &[
    "id",
    "reference",
    "date",
    "agency",
    "address",
    "status",
    "context",
    "category",
    "owner",
    "client_name",
    "client_phone",
    "client_email",
    "labor_cost",
    "materials_cost",
    "callout_cost",
    "labor_share_pct",
    "craftsman_number",
    "visit_requested",
    "quote_requested",
    "review_requested",
    "review",
    "completion_date",
    "agent_comment",
    "manager_id",
    "craftsman_id",
];

/// Loads every table the run matches against. One full read per table, paged.
pub fn bootstrap(client: &mut dyn StorageClient) -> Result<SyncState> {
    let managers = load_all_rows(client, MANAGERS_TABLE, &["id", "name", "manager_code"])
        .context("Loading managers")?;
    let trades =
        load_all_rows(client, TRADES_TABLE, &["id", "code", "label"]).context("Loading trades")?;
    let craftsmen = load_all_rows(client, CRAFTSMEN_TABLE, CRAFTSMAN_READ_COLUMNS)
        .context("Loading craftsmen")?;
    let craftsman_trades = load_all_rows(
        client,
        CRAFTSMAN_TRADES.table,
        &[CRAFTSMAN_TRADES.left_column, CRAFTSMAN_TRADES.right_column],
    )
    .context("Loading craftsman/trade links")?;
    let work_orders = load_all_rows(client, WORK_ORDERS_TABLE, WORK_ORDER_READ_COLUMNS)
        .context("Loading work orders")?;
    let order_craftsmen = load_all_rows(
        client,
        WORK_ORDER_CRAFTSMEN.table,
        &[
            WORK_ORDER_CRAFTSMEN.left_column,
            WORK_ORDER_CRAFTSMEN.right_column,
            "role",
        ],
    )
    .context("Loading work order/craftsman links")?;

    Ok(SyncState {
        managers: LookupIndex::build(
            vec![KeySpec::folded(index::MANAGER_CODE, "manager_code")],
            managers,
        ),
        trades: LookupIndex::build(
            vec![
                KeySpec::folded(index::TRADE_CODE, "code"),
                KeySpec::folded(index::TRADE_LABEL, "label"),
            ],
            trades,
        ),
        craftsmen: LookupIndex::build(craftsman_key_specs(), craftsmen),
        work_orders: LookupIndex::build(
            vec![KeySpec::exact(index::REFERENCE, "reference")],
            work_orders,
        ),
        known_craftsman_trades: RelationSet::from_rows(
            &craftsman_trades,
            CRAFTSMAN_TRADES.left_column,
            CRAFTSMAN_TRADES.right_column,
            None,
        ),
        known_order_craftsmen: RelationSet::from_rows(
            &order_craftsmen,
            WORK_ORDER_CRAFTSMEN.left_column,
            WORK_ORDER_CRAFTSMEN.right_column,
            Some("role"),
        ),
        pending_trade_links: Vec::new(),
        pending_order_links: Vec::new(),
        report: Report::default(),
    })
}

/// Inserts trade records for sheet labels the catalogue does not know yet, so
/// craftsman rows can resolve them. Generated codes are de-duplicated against
/// existing codes and within the batch.
pub fn ensure_trades(
    rows: &[SourceRow],
    state: &mut SyncState,
    sink: &mut dyn EffectSink,
) -> Result<(), executor::StorageOperationFailed> {
    let mut missing: Vec<(String, String)> = Vec::new();
    let mut batch_codes: Vec<String> = Vec::new();

    for row in rows {
        for label in normalize::split_labels(row.get("trades")) {
            if state.trades.get(index::TRADE_LABEL, &label).is_some() {
                continue;
            }
            let folded = normalize::fold_key(&label);
            if missing
                .iter()
                .any(|(_, seen)| normalize::fold_key(seen) == folded)
            {
                continue;
            }
            let base = normalize::label_code(&label);
            let mut code = base.clone();
            let mut counter = 1;
            while state.trades.get(index::TRADE_CODE, &code).is_some()
                || batch_codes.contains(&code)
            {
                code = format!("{base}_{counter}");
                counter += 1;
            }
            batch_codes.push(code.clone());
            missing.push((code, label));
        }
    }

    if missing.is_empty() {
        info!("no new trades to create");
        return Ok(());
    }
    info!("creating {} missing trade(s)", missing.len());

    let payloads: Vec<Payload> = missing
        .iter()
        .map(|(code, label)| {
            [
                ("code".to_string(), FieldValue::from_text(code)),
                ("label".to_string(), FieldValue::from_text(label)),
            ]
            .into()
        })
        .collect();

    let operation = Operation::new(
        TRADES_TABLE,
        OperationKind::Insert {
            rows: payloads,
            chunk: 0,
        },
    )
    .with_hook(|state: &mut SyncState, rows, _dry_run| {
        for row in rows {
            state.trades.register(row.clone());
        }
    });

    executor::apply_operations("trade catalogue", vec![operation], sink, state)
}

/// Reconciles the craftsmen sheet: map, validate, match, diff, then apply
/// updates and chunked inserts followed by trade-link synchronization.
pub fn sync_craftsmen(
    rows: &[SourceRow],
    state: &mut SyncState,
    sink: &mut dyn EffectSink,
    options: &SyncOptions,
) -> Result<(), executor::StorageOperationFailed> {
    if rows.is_empty() {
        info!("no craftsmen to process");
        return Ok(());
    }

    struct Update {
        existing: StoredRow,
        diff: Payload,
        before: Payload,
    }

    let mut updates: Vec<Update> = Vec::new();
    let mut inserts: Vec<CraftsmanCandidate> = Vec::new();
    let policy = craftsman_match_policy();
    // Updates planned earlier in this pass overlay the index snapshot, so a
    // second sheet row matching the same record diffs against the first
    // row's planned result instead of re-emitting its changes.
    let mut pending: HashMap<String, StoredRow> = HashMap::new();

    for (position, row) in rows.iter().enumerate() {
        let row_number = position + 2;
        let Some(candidate) =
            mapper::map_craftsman(row, row_number, &state.managers, &state.trades, &mut state.report)
        else {
            if options.strict_keys {
                state.report.craftsmen.errors += 1;
            } else {
                state.report.craftsmen.skipped += 1;
            }
            continue;
        };

        let outcome = validate::validate(&candidate.payload, EntityKind::Craftsman);
        for warning in &outcome.warnings {
            debug!("craftsman row {row_number}: {warning}");
        }
        if !outcome.is_valid() {
            state.report.warn(format!(
                "craftsman row {row_number}: validation failed: {}",
                outcome.errors.join(", ")
            ));
            state.report.craftsmen.skipped += 1;
            continue;
        }

        let existing = policy
            .find(&state.craftsmen, &candidate.keys)
            .map(|row| pending.get(&row.id).unwrap_or(row).clone());
        match plan::classify(existing.as_ref(), &candidate.payload) {
            RowAction::Noop => {
                state.report.craftsmen.skipped += 1;
                let existing = existing.expect("noop implies a match");
                queue_trade_links(state, &existing.id, &candidate.trade_ids);
            }
            RowAction::Update { diff, before, .. } => {
                let existing = existing.expect("update implies a match");
                queue_trade_links(state, &existing.id, &candidate.trade_ids);
                pending.insert(
                    existing.id.clone(),
                    StoredRow::new(existing.id.clone(), merge_payload(&existing.fields, &diff)),
                );
                updates.push(Update {
                    existing,
                    diff,
                    before,
                });
            }
            RowAction::Insert => inserts.push(candidate),
        }
    }

    let mut operations: Vec<Operation<SyncState>> = Vec::new();

    for update in updates {
        let Update {
            existing,
            diff,
            before,
        } = update;
        let id = existing.id.clone();
        let fallback = merge_payload(&existing.fields, &diff);
        operations.push(
            Operation::new(
                CRAFTSMEN_TABLE,
                OperationKind::Update {
                    id: id.clone(),
                    patch: diff,
                    before,
                },
            )
            .with_hook(move |state: &mut SyncState, rows, _dry_run| {
                let fields = match rows.first() {
                    Some(row) => merge_payload(&fallback, &row.fields),
                    None => fallback,
                };
                state.craftsmen.register(StoredRow::new(id, fields));
                state.report.craftsmen.updated += 1;
            }),
        );
    }

    for (chunk_index, chunk) in plan::chunk(inserts, options.batch_size).into_iter().enumerate() {
        let payloads: Vec<Payload> = chunk.iter().map(|item| item.payload.clone()).collect();
        let link_meta: Vec<Vec<String>> =
            chunk.iter().map(|item| item.trade_ids.clone()).collect();
        let kind = if options.upsert {
            OperationKind::Upsert {
                rows: payloads,
                chunk: chunk_index,
            }
        } else {
            OperationKind::Insert {
                rows: payloads,
                chunk: chunk_index,
            }
        };
        operations.push(Operation::new(CRAFTSMEN_TABLE, kind).with_hook(
            move |state: &mut SyncState, rows, _dry_run| {
                for (row, trade_ids) in rows.iter().zip(&link_meta) {
                    state.craftsmen.register(row.clone());
                    queue_trade_links(state, &row.id, trade_ids);
                    state.report.craftsmen.inserted += 1;
                }
            },
        ));
    }

    executor::apply_operations("craftsmen sync", operations, sink, state)?;

    let desired = std::mem::take(&mut state.pending_trade_links);
    let missing = CRAFTSMAN_TRADES.missing_links(&desired, &state.known_craftsman_trades);
    if missing.is_empty() {
        info!("no new craftsman/trade links to create");
        return Ok(());
    }
    let operations = CRAFTSMAN_TRADES.operations(missing, options.batch_size, |links| {
        Box::new(move |state: &mut SyncState, _rows, _dry_run| {
            for link in &links {
                state.known_craftsman_trades.insert(link);
                state.report.relations.craftsman_trades += 1;
            }
        })
    });
    executor::apply_operations("craftsman/trade links", operations, sink, state)
}

fn queue_trade_links(state: &mut SyncState, craftsman_id: &str, trade_ids: &[String]) {
    if craftsman_id.is_empty() {
        return;
    }
    for trade_id in trade_ids {
        state
            .pending_trade_links
            .push(RelationLink::new(craftsman_id, trade_id.clone()));
    }
}

/// Reconciles the work orders sheet against the store, then synchronizes the
/// work order ↔ craftsman links implied by the sheet.
pub fn sync_work_orders(
    rows: &[SourceRow],
    state: &mut SyncState,
    sink: &mut dyn EffectSink,
    options: &SyncOptions,
) -> Result<(), executor::StorageOperationFailed> {
    if rows.is_empty() {
        info!("no work orders to process");
        return Ok(());
    }

    struct Update {
        existing: StoredRow,
        diff: Payload,
        before: Payload,
    }

    let mut updates: Vec<Update> = Vec::new();
    let mut inserts: Vec<WorkOrderCandidate> = Vec::new();
    let policy = work_order_match_policy();
    let mut pending: HashMap<String, StoredRow> = HashMap::new();

    for (position, row) in rows.iter().enumerate() {
        let row_number = position + 2;
        let Some(candidate) = mapper::map_work_order(
            row,
            row_number,
            &state.managers,
            &state.craftsmen,
            &mut state.report,
        ) else {
            state.report.work_orders.skipped += 1;
            continue;
        };

        let outcome = validate::validate(&candidate.payload, EntityKind::WorkOrder);
        for warning in &outcome.warnings {
            debug!("work order row {row_number}: {warning}");
        }
        if !outcome.is_valid() {
            state.report.warn(format!(
                "work order row {row_number}: validation failed: {}",
                outcome.errors.join(", ")
            ));
            state.report.work_orders.skipped += 1;
            continue;
        }

        let existing = policy
            .find(&state.work_orders, &candidate.keys)
            .map(|row| pending.get(&row.id).unwrap_or(row).clone());
        match plan::classify(existing.as_ref(), &candidate.payload) {
            RowAction::Noop => {
                state.report.work_orders.skipped += 1;
                let existing = existing.expect("noop implies a match");
                queue_order_link(state, &existing.id, candidate.craftsman_id.as_deref());
            }
            RowAction::Update { diff, before, .. } => {
                let existing = existing.expect("update implies a match");
                queue_order_link(state, &existing.id, candidate.craftsman_id.as_deref());
                pending.insert(
                    existing.id.clone(),
                    StoredRow::new(existing.id.clone(), merge_payload(&existing.fields, &diff)),
                );
                updates.push(Update {
                    existing,
                    diff,
                    before,
                });
            }
            RowAction::Insert => inserts.push(candidate),
        }
    }

    let mut operations: Vec<Operation<SyncState>> = Vec::new();

    for update in updates {
        let Update {
            existing,
            diff,
            before,
        } = update;
        let id = existing.id.clone();
        let fallback = merge_payload(&existing.fields, &diff);
        operations.push(
            Operation::new(
                WORK_ORDERS_TABLE,
                OperationKind::Update {
                    id: id.clone(),
                    patch: diff,
                    before,
                },
            )
            .with_hook(move |state: &mut SyncState, rows, _dry_run| {
                let fields = match rows.first() {
                    Some(row) => merge_payload(&fallback, &row.fields),
                    None => fallback,
                };
                state.work_orders.register(StoredRow::new(id, fields));
                state.report.work_orders.updated += 1;
            }),
        );
    }

    for (chunk_index, chunk) in plan::chunk(inserts, options.batch_size).into_iter().enumerate() {
        let payloads: Vec<Payload> = chunk.iter().map(|item| item.payload.clone()).collect();
        let link_meta: Vec<Option<String>> =
            chunk.iter().map(|item| item.craftsman_id.clone()).collect();
        let kind = if options.upsert {
            OperationKind::Upsert {
                rows: payloads,
                chunk: chunk_index,
            }
        } else {
            OperationKind::Insert {
                rows: payloads,
                chunk: chunk_index,
            }
        };
        operations.push(Operation::new(WORK_ORDERS_TABLE, kind).with_hook(
            move |state: &mut SyncState, rows, _dry_run| {
                for (row, craftsman_id) in rows.iter().zip(&link_meta) {
                    state.work_orders.register(row.clone());
                    queue_order_link(state, &row.id, craftsman_id.as_deref());
                    state.report.work_orders.inserted += 1;
                }
            },
        ));
    }

    executor::apply_operations("work orders sync", operations, sink, state)?;

    let desired = std::mem::take(&mut state.pending_order_links);
    let missing = WORK_ORDER_CRAFTSMEN.missing_links(&desired, &state.known_order_craftsmen);
    if missing.is_empty() {
        info!("no new work order/craftsman links to create");
        return Ok(());
    }
    let operations = WORK_ORDER_CRAFTSMEN.operations(missing, options.batch_size, |links| {
        Box::new(move |state: &mut SyncState, _rows, _dry_run| {
            for link in &links {
                state.known_order_craftsmen.insert(link);
                state.report.relations.work_order_craftsmen += 1;
            }
        })
    });
    executor::apply_operations("work order/craftsman links", operations, sink, state)
}

fn queue_order_link(state: &mut SyncState, order_id: &str, craftsman_id: Option<&str>) {
    let Some(craftsman_id) = craftsman_id else {
        return;
    };
    if order_id.is_empty() {
        return;
    }
    state.pending_order_links.push(RelationLink::with_qualifier(
        order_id,
        craftsman_id,
        PRIMARY_ROLE,
    ));
}

/// A finished run: the report always carries accurate counts; `failure`
/// records the error that stopped the run early, if any.
pub struct SyncOutcome {
    pub report: Report,
    pub failure: Option<anyhow::Error>,
}

/// Runs a full reconciliation. Source fetch or bootstrap failures abort
/// before any write; a failed entity phase has already been rolled back by
/// the executor and surfaces in `failure` with the report intact.
pub fn run_sync(
    source: &mut dyn SheetSource,
    client: &mut dyn StorageClient,
    options: &SyncOptions,
) -> Result<SyncOutcome> {
    info!(
        "starting sync ({} mode, batch size {})",
        if options.dry_run { "dry-run" } else { "live" },
        options.batch_size
    );

    let craftsman_rows = source
        .fetch_rows("craftsmen")
        .context("Fetching the craftsmen sheet")?;
    let order_rows = source
        .fetch_rows("work_orders")
        .context("Fetching the work orders sheet")?;

    let craftsman_rows = mapper::rows_to_records(CRAFTSMAN_COLUMNS, &craftsman_rows);
    let order_rows = mapper::rows_to_records(WORK_ORDER_COLUMNS, &order_rows);

    let mut state = bootstrap(client).context("Bootstrapping store state")?;
    state.report.start();
    state.report.craftsmen.fetched = craftsman_rows.len() as u64;
    state.report.work_orders.fetched = order_rows.len() as u64;

    let mut live_sink;
    let mut simulated_sink;
    let sink: &mut dyn EffectSink = if options.dry_run {
        simulated_sink = SimulatedSink;
        &mut simulated_sink
    } else {
        live_sink = LiveSink::new(client);
        &mut live_sink
    };

    if let Err(err) = ensure_trades(&craftsman_rows, &mut state, sink) {
        state.report.finish();
        return Ok(SyncOutcome {
            report: state.report,
            failure: Some(anyhow::Error::new(err).context("Trade catalogue sync failed")),
        });
    }

    if let Err(err) = sync_craftsmen(&craftsman_rows, &mut state, sink, options) {
        // Work orders resolve craftsmen through the index this phase was
        // still building; stop here rather than produce misleading links.
        state.report.craftsmen.errors += 1;
        state.report.finish();
        return Ok(SyncOutcome {
            report: state.report,
            failure: Some(anyhow::Error::new(err).context("Craftsmen sync failed")),
        });
    }

    if let Err(err) = sync_work_orders(&order_rows, &mut state, sink, options) {
        state.report.work_orders.errors += 1;
        state.report.finish();
        return Ok(SyncOutcome {
            report: state.report,
            failure: Some(anyhow::Error::new(err).context("Work orders sync failed")),
        });
    }

    state.report.finish();
    Ok(SyncOutcome {
        report: state.report,
        failure: None,
    })
}
