//! Cell normalizers: total functions from raw spreadsheet text to canonical
//! scalar forms. Every function returns a defined "absent" value instead of
//! failing, so a malformed cell can never abort a run.

use std::sync::OnceLock;

use chrono::NaiveDate;
use heck::ToShoutySnakeCase;
use regex::Regex;

pub fn clean_str(value: &str) -> &str {
    value.trim()
}

/// Case-folded form used for lookup keys and label comparison.
pub fn fold_key(value: &str) -> String {
    value.trim().to_lowercase()
}

fn digit_groups() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\d+").expect("digit pattern"))
}

fn iso_shape() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("iso date pattern"))
}

/// Renders a date cell as ISO `YYYY-MM-DD`.
///
/// Already-ISO input passes through verbatim. Anything else must contain at
/// least three numeric groups; the group of length four fixes the year
/// position (leading or trailing). Years outside [1900, 2100] and impossible
/// calendar dates are rejected.
pub fn iso_date(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    if iso_shape().is_match(trimmed) {
        return Some(trimmed.to_string());
    }

    let groups: Vec<&str> = digit_groups()
        .find_iter(trimmed)
        .map(|m| m.as_str())
        .collect();
    if groups.len() < 3 {
        return None;
    }

    let (year, month, day) = if groups[0].len() == 4 {
        (groups[0], groups[1], groups[2])
    } else if groups[2].len() == 4 {
        (groups[2], groups[1], groups[0])
    } else {
        return None;
    };

    let year: i32 = year.parse().ok()?;
    let month: u32 = month.parse().ok()?;
    let day: u32 = day.parse().ok()?;
    if !(1900..=2100).contains(&year) {
        return None;
    }
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    Some(date.format("%Y-%m-%d").to_string())
}

/// Parses a numeric cell, tolerating spreadsheet noise: whitespace (including
/// space-grouped thousands) is stripped, the first comma acts as the decimal
/// separator, and any trailing non-numeric tail after a valid leading numeral
/// is discarded.
pub fn decimal_number(value: &str) -> Option<f64> {
    let stripped: String = value.chars().filter(|c| !c.is_whitespace()).collect();
    if stripped.is_empty() {
        return None;
    }
    let dotted = stripped.replacen(',', ".", 1);
    parse_float_prefix(&dotted)
}

/// Longest leading prefix of `value` that forms a floating-point literal:
/// optional sign, digits, at most one dot, optional exponent.
fn parse_float_prefix(value: &str) -> Option<f64> {
    let bytes = value.as_bytes();
    let mut end = 0;
    let mut seen_digit = false;
    let mut seen_dot = false;

    if end < bytes.len() && matches!(bytes[end], b'+' | b'-') {
        end += 1;
    }
    while end < bytes.len() {
        match bytes[end] {
            b'0'..=b'9' => {
                seen_digit = true;
                end += 1;
            }
            b'.' if !seen_dot => {
                seen_dot = true;
                end += 1;
            }
            _ => break,
        }
    }
    if !seen_digit {
        return None;
    }

    // Exponent only counts when at least one digit follows it.
    if end < bytes.len() && matches!(bytes[end], b'e' | b'E') {
        let mut probe = end + 1;
        if probe < bytes.len() && matches!(bytes[probe], b'+' | b'-') {
            probe += 1;
        }
        let exponent_start = probe;
        while probe < bytes.len() && bytes[probe].is_ascii_digit() {
            probe += 1;
        }
        if probe > exponent_start {
            end = probe;
        }
    }

    value[..end].parse().ok()
}

/// Maps a boolean cell to `Some(flag)` from a fixed vocabulary of symbolic
/// and bilingual tokens. Unknown text is absent, never `false`.
pub fn symbol_bool(value: &str) -> Option<bool> {
    let folded = value.trim().to_lowercase();
    match folded.as_str() {
        "" => None,
        "\u{2705}" | "\u{2611}\u{fe0f}" | "\u{2714}" | "\u{2714}\u{fe0f}" => Some(true),
        "\u{274c}" | "\u{2716}" | "\u{2716}\u{fe0f}" => Some(false),
        "oui" | "yes" | "true" | "1" | "vrai" | "y" => Some(true),
        "non" | "no" | "false" | "0" | "faux" | "n" => Some(false),
        _ => None,
    }
}

/// Splits a multi-valued cell on comma, semicolon, or newline, dropping empty
/// tokens.
pub fn split_labels(value: &str) -> Vec<String> {
    value
        .split([',', ';', '\n'])
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Derives a stable SHOUTY_SNAKE code from a human label, folding common
/// accented Latin letters to ASCII first.
pub fn label_code(label: &str) -> String {
    let folded: String = label.chars().map(fold_ascii).collect();
    let cleaned: String = folded
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { ' ' })
        .collect();
    let code = cleaned.to_shouty_snake_case();
    if code.is_empty() {
        "TRADE".to_string()
    } else {
        code
    }
}

fn fold_ascii(c: char) -> char {
    match c {
        'à' | 'á' | 'â' | 'ä' | 'ã' | 'å' => 'a',
        'À' | 'Á' | 'Â' | 'Ä' | 'Ã' | 'Å' => 'A',
        'ç' => 'c',
        'Ç' => 'C',
        'è' | 'é' | 'ê' | 'ë' => 'e',
        'È' | 'É' | 'Ê' | 'Ë' => 'E',
        'ì' | 'í' | 'î' | 'ï' => 'i',
        'Ì' | 'Í' | 'Î' | 'Ï' => 'I',
        'ñ' => 'n',
        'Ñ' => 'N',
        'ò' | 'ó' | 'ô' | 'ö' | 'õ' => 'o',
        'Ò' | 'Ó' | 'Ô' | 'Ö' | 'Õ' => 'O',
        'ù' | 'ú' | 'û' | 'ü' => 'u',
        'Ù' | 'Ú' | 'Û' | 'Ü' => 'U',
        'ý' | 'ÿ' => 'y',
        other => other,
    }
}
