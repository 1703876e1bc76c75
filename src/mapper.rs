//! Converts raw sheet rows into candidate record payloads plus the natural
//! keys used for matching and any implied relation memberships. Reference
//! resolution failures (unknown manager code, unknown craftsman reference)
//! are warnings, never errors: the dependent field stays absent.

use std::collections::HashMap;

use crate::index::{self, LookupIndex};
use crate::matcher::NaturalKey;
use crate::normalize;
use crate::report::Report;
use crate::value::{FieldValue, Payload};

/// Column order of the craftsmen sheet export.
pub const CRAFTSMAN_COLUMNS: &[&str] = &[
    "full_name",
    "associate_number",
    "company_name",
    "company_number",
    "legal_status",
    "craftsman_status",
    "file_status",
    "address",
    "city",
    "postal_code",
    "email",
    "phone",
    "date_added",
    "manager_code",
    "trades",
];

/// Column order of the work orders sheet export.
pub const WORK_ORDER_COLUMNS: &[&str] = &[
    "date",
    "agency",
    "address",
    "reference",
    "status",
    "context",
    "trade",
    "manager_code",
    "craftsman_reference",
    "labor_cost",
    "materials_cost",
    "craftsman_number",
    "callout_cost",
    "labor_share_pct",
    "owner",
    "completion_date",
    "client_phone",
    "client_name",
    "client_email",
    "comment",
    "review",
    "visit_requested",
    "quote_requested",
    "review_requested",
];

/// One sheet row keyed by column name. Cells beyond the layout are dropped;
/// missing trailing cells read as empty.
#[derive(Debug, Clone)]
pub struct SourceRow {
    values: HashMap<&'static str, String>,
}

impl SourceRow {
    pub fn from_cells(columns: &'static [&'static str], cells: &[String]) -> Self {
        let values = columns
            .iter()
            .enumerate()
            .map(|(position, column)| {
                let cell = cells
                    .get(position)
                    .map(|cell| normalize::clean_str(cell).to_string())
                    .unwrap_or_default();
                (*column, cell)
            })
            .collect();
        SourceRow { values }
    }

    pub fn get(&self, column: &str) -> &str {
        self.values.get(column).map(String::as_str).unwrap_or("")
    }
}

pub fn rows_to_records(
    columns: &'static [&'static str],
    rows: &[Vec<String>],
) -> Vec<SourceRow> {
    rows.iter()
        .map(|cells| SourceRow::from_cells(columns, cells))
        .collect()
}

#[derive(Debug)]
pub struct CraftsmanCandidate {
    pub payload: Payload,
    pub keys: Vec<NaturalKey>,
    pub trade_ids: Vec<String>,
}

#[derive(Debug)]
pub struct WorkOrderCandidate {
    pub payload: Payload,
    pub keys: Vec<NaturalKey>,
    pub craftsman_id: Option<String>,
}

/// Maps one craftsmen-sheet row. Returns `None` when the row carries neither
/// of its natural keys; `row_number` is the 1-based sheet line used in
/// warnings.
pub fn map_craftsman(
    row: &SourceRow,
    row_number: usize,
    managers: &LookupIndex,
    trades: &LookupIndex,
    report: &mut Report,
) -> Option<CraftsmanCandidate> {
    let email = normalize::fold_key(row.get("email"));
    let associate_number = row.get("associate_number").to_string();

    if email.is_empty() && associate_number.is_empty() {
        report.warn(format!(
            "craftsman row {row_number}: email and associate number both missing, row skipped"
        ));
        return None;
    }

    let display_name = display_label(&[row.get("full_name"), &email, &associate_number]);

    let manager_code = row.get("manager_code");
    let mut manager_id = FieldValue::Null;
    if !manager_code.is_empty() {
        match managers.get(index::MANAGER_CODE, manager_code) {
            Some(manager) => manager_id = FieldValue::from_text(&manager.id),
            None => report.warn(format!(
                "craftsman {display_name}: no manager found for code \"{manager_code}\""
            )),
        }
    }

    let payload: Payload = [
        ("full_name".to_string(), FieldValue::from_text(row.get("full_name"))),
        (
            "associate_number".to_string(),
            FieldValue::from_text(&associate_number),
        ),
        (
            "company_number".to_string(),
            FieldValue::from_text(row.get("company_number")),
        ),
        ("email".to_string(), FieldValue::from_text(&email)),
        ("phone".to_string(), FieldValue::from_text(row.get("phone"))),
        ("manager_id".to_string(), manager_id),
    ]
    .into();

    let mut trade_ids = Vec::new();
    for label in normalize::split_labels(row.get("trades")) {
        match trades.get(index::TRADE_LABEL, &label) {
            Some(trade) => trade_ids.push(trade.id.clone()),
            None => report.warn(format!(
                "craftsman {display_name}: trade \"{label}\" not found after catalogue sync"
            )),
        }
    }

    let mut keys = Vec::new();
    if !email.is_empty() {
        keys.push(NaturalKey::new(index::EMAIL, email));
    }
    if !associate_number.is_empty() {
        keys.push(NaturalKey::new(index::ASSOCIATE_NUMBER, associate_number));
    }

    Some(CraftsmanCandidate {
        payload,
        keys,
        trade_ids,
    })
}

/// Maps one work-orders-sheet row. Rows without a reference or a readable
/// date are unusable and return `None`.
pub fn map_work_order(
    row: &SourceRow,
    row_number: usize,
    managers: &LookupIndex,
    craftsmen: &LookupIndex,
    report: &mut Report,
) -> Option<WorkOrderCandidate> {
    let reference = row.get("reference").to_string();
    let date = normalize::iso_date(row.get("date"));
    if reference.is_empty() || date.is_none() {
        report.warn(format!(
            "work order row {row_number}: reference or date missing, row skipped"
        ));
        return None;
    }

    let manager_code = row.get("manager_code");
    let mut manager_id = FieldValue::Null;
    if !manager_code.is_empty() {
        match managers.get(index::MANAGER_CODE, manager_code) {
            Some(manager) => manager_id = FieldValue::from_text(&manager.id),
            None => report.warn(format!(
                "work order {reference}: unknown manager code \"{manager_code}\""
            )),
        }
    }

    let craftsman_number = row.get("craftsman_number");
    let craftsman_reference = row.get("craftsman_reference");
    let mut craftsman_id = None;
    if !craftsman_number.is_empty() {
        craftsman_id = craftsmen
            .get(index::ASSOCIATE_NUMBER, craftsman_number)
            .map(|row| row.id.clone());
    }
    if craftsman_id.is_none() && craftsman_reference.contains('@') {
        craftsman_id = craftsmen
            .get(index::EMAIL, craftsman_reference)
            .map(|row| row.id.clone());
    }
    let lookup_label = if craftsman_number.is_empty() {
        craftsman_reference
    } else {
        craftsman_number
    };
    if craftsman_id.is_none() && !lookup_label.is_empty() {
        report.warn(format!(
            "work order {reference}: craftsman not found (reference {lookup_label})"
        ));
    }

    let payload: Payload = [
        ("reference".to_string(), FieldValue::from_text(&reference)),
        ("date".to_string(), date.map_or(FieldValue::Null, FieldValue::Text)),
        ("agency".to_string(), FieldValue::from_text(row.get("agency"))),
        ("address".to_string(), FieldValue::from_text(row.get("address"))),
        ("status".to_string(), FieldValue::from_text(row.get("status"))),
        ("context".to_string(), FieldValue::from_text(row.get("context"))),
        ("category".to_string(), FieldValue::from_text(row.get("trade"))),
        ("owner".to_string(), FieldValue::from_text(row.get("owner"))),
        (
            "client_name".to_string(),
            FieldValue::from_text(row.get("client_name")),
        ),
        (
            "client_phone".to_string(),
            FieldValue::from_text(row.get("client_phone")),
        ),
        (
            "client_email".to_string(),
            FieldValue::from_text(row.get("client_email")),
        ),
        (
            "labor_cost".to_string(),
            FieldValue::from_number(normalize::decimal_number(row.get("labor_cost"))),
        ),
        (
            "materials_cost".to_string(),
            FieldValue::from_number(normalize::decimal_number(row.get("materials_cost"))),
        ),
        (
            "callout_cost".to_string(),
            FieldValue::from_number(normalize::decimal_number(row.get("callout_cost"))),
        ),
        (
            "labor_share_pct".to_string(),
            FieldValue::from_number(normalize::decimal_number(row.get("labor_share_pct"))),
        ),
        (
            "craftsman_number".to_string(),
            FieldValue::from_text(craftsman_number),
        ),
        (
            "visit_requested".to_string(),
            FieldValue::from_bool(normalize::symbol_bool(row.get("visit_requested"))),
        ),
        (
            "quote_requested".to_string(),
            FieldValue::from_bool(normalize::symbol_bool(row.get("quote_requested"))),
        ),
        (
            "review_requested".to_string(),
            FieldValue::from_bool(normalize::symbol_bool(row.get("review_requested"))),
        ),
        ("review".to_string(), FieldValue::from_text(row.get("review"))),
        (
            "completion_date".to_string(),
            normalize::iso_date(row.get("completion_date"))
                .map_or(FieldValue::Null, FieldValue::Text),
        ),
        (
            "agent_comment".to_string(),
            FieldValue::from_text(row.get("comment")),
        ),
        ("manager_id".to_string(), manager_id),
        (
            "craftsman_id".to_string(),
            craftsman_id
                .as_deref()
                .map_or(FieldValue::Null, FieldValue::from_text),
        ),
    ]
    .into();

    let keys = vec![NaturalKey::new(index::REFERENCE, reference)];

    Some(WorkOrderCandidate {
        payload,
        keys,
        craftsman_id,
    })
}

fn display_label(candidates: &[&str]) -> String {
    candidates
        .iter()
        .find(|value| !value.is_empty())
        .map(|value| value.to_string())
        .unwrap_or_else(|| "(unnamed)".to_string())
}
