//! Field-level validation applied before a row reaches the planner. A failing
//! outcome downgrades the row to skipped with its errors recorded; warnings
//! never block.

use std::sync::OnceLock;

use regex::Regex;

use crate::value::Payload;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Craftsman,
    WorkOrder,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

pub fn validate(payload: &Payload, kind: EntityKind) -> ValidationOutcome {
    let mut outcome = ValidationOutcome::default();
    match kind {
        EntityKind::Craftsman => validate_craftsman(payload, &mut outcome),
        EntityKind::WorkOrder => validate_work_order(payload, &mut outcome),
    }
    outcome
}

fn validate_craftsman(payload: &Payload, outcome: &mut ValidationOutcome) {
    if let Some(email) = text(payload, "email") {
        if !email_shape().is_match(email) {
            outcome.errors.push(format!("invalid email format: {email}"));
        }
    }
    if let Some(phone) = text(payload, "phone") {
        check_phone(phone, outcome);
    }
    if let Some(number) = text(payload, "company_number") {
        let digits = digit_count(number);
        if digits != 14 {
            outcome
                .errors
                .push(format!("company number must have 14 digits, got {digits}"));
        }
    }
    if text(payload, "full_name").is_none() {
        outcome.warnings.push("full name is missing".to_string());
    }
}

fn validate_work_order(payload: &Payload, outcome: &mut ValidationOutcome) {
    for field in ["reference", "date"] {
        if text(payload, field).is_none() {
            outcome.errors.push(format!("required field missing: {field}"));
        }
    }
    if let Some(reference) = text(payload, "reference") {
        check_max_len(reference, "reference", 50, outcome);
    }
    if let Some(context) = text(payload, "context") {
        check_max_len(context, "context", 10_000, outcome);
    }
    if let Some(comment) = text(payload, "agent_comment") {
        check_max_len(comment, "agent_comment", 1_000, outcome);
    }
    if let Some(address) = text(payload, "address") {
        check_max_len(address, "address", 500, outcome);
    }
    if let Some(phone) = text(payload, "client_phone") {
        check_phone(phone, outcome);
    }
    if let Some(email) = text(payload, "client_email") {
        if !email_shape().is_match(email) {
            outcome
                .errors
                .push(format!("invalid client email format: {email}"));
        }
    }
    if let Some(share) = payload.get("labor_share_pct").and_then(number) {
        if !(0.0..=100.0).contains(&share) {
            outcome
                .errors
                .push(format!("labor share must be between 0 and 100, got {share}"));
        }
    }
    for field in ["address", "category", "manager_id"] {
        if payload.get(field).is_none_or(|value| value.is_absent()) {
            outcome
                .warnings
                .push(format!("recommended field missing: {field}"));
        }
    }
}

fn check_phone(phone: &str, outcome: &mut ValidationOutcome) {
    let digits = digit_count(phone);
    if !(8..=15).contains(&digits) {
        outcome
            .errors
            .push(format!("phone must have 8-15 digits, got {digits}"));
    }
}

fn check_max_len(value: &str, field: &str, limit: usize, outcome: &mut ValidationOutcome) {
    if value.chars().count() > limit {
        outcome
            .errors
            .push(format!("{field} exceeds {limit} characters"));
    }
}

fn text<'a>(payload: &'a Payload, field: &str) -> Option<&'a str> {
    payload
        .get(field)
        .and_then(|value| value.as_text())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn number(value: &crate::value::FieldValue) -> Option<f64> {
    match value {
        crate::value::FieldValue::Number(number) => Some(*number),
        _ => None,
    }
}

fn digit_count(value: &str) -> usize {
    value.chars().filter(char::is_ascii_digit).count()
}

fn email_shape() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::FieldValue;

    fn payload(pairs: &[(&str, FieldValue)]) -> Payload {
        pairs
            .iter()
            .map(|(field, value)| (field.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn craftsman_with_sound_fields_passes() {
        let record = payload(&[
            ("full_name", FieldValue::from_text("Marc Petit")),
            ("email", FieldValue::from_text("marc@atelier.fr")),
            ("phone", FieldValue::from_text("06 01 02 03 04")),
            ("company_number", FieldValue::from_text("123 456 789 00012")),
        ]);
        let outcome = validate(&record, EntityKind::Craftsman);
        assert!(outcome.is_valid(), "unexpected errors: {:?}", outcome.errors);
    }

    #[test]
    fn craftsman_optional_fields_are_only_checked_when_present() {
        let record = payload(&[("full_name", FieldValue::from_text("Marc Petit"))]);
        assert!(validate(&record, EntityKind::Craftsman).is_valid());
    }

    #[test]
    fn malformed_email_and_short_phone_are_errors() {
        let record = payload(&[
            ("email", FieldValue::from_text("not-an-email")),
            ("phone", FieldValue::from_text("123")),
        ]);
        let outcome = validate(&record, EntityKind::Craftsman);
        assert_eq!(outcome.errors.len(), 2);
    }

    #[test]
    fn work_order_requires_reference_and_date() {
        let outcome = validate(&Payload::new(), EntityKind::WorkOrder);
        assert_eq!(outcome.errors.len(), 2);
        assert!(outcome.errors[0].contains("reference"));
        assert!(outcome.errors[1].contains("date"));
    }

    #[test]
    fn labor_share_outside_percentage_range_is_an_error() {
        let record = payload(&[
            ("reference", FieldValue::from_text("INT-100")),
            ("date", FieldValue::from_text("2024-03-15")),
            ("labor_share_pct", FieldValue::Number(130.0)),
        ]);
        let outcome = validate(&record, EntityKind::WorkOrder);
        assert_eq!(outcome.errors.len(), 1);
    }

    #[test]
    fn missing_recommended_fields_warn_without_blocking() {
        let record = payload(&[
            ("reference", FieldValue::from_text("INT-100")),
            ("date", FieldValue::from_text("2024-03-15")),
        ]);
        let outcome = validate(&record, EntityKind::WorkOrder);
        assert!(outcome.is_valid());
        assert_eq!(outcome.warnings.len(), 3);
    }
}
