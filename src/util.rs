use std::sync::OnceLock;

use chrono::{SecondsFormat, Utc};
use regex::Regex;

use crate::types::{ContactField, FieldKind, FieldValue};

/// Current UTC time as fixed-width RFC 3339 (microseconds, `Z`), so stored
/// stamps sort lexicographically.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Currency signs, a leading or trailing three-letter currency code, whitespace.
fn currency_noise() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\p{Sc}|^\s*[A-Za-z]{3}\b|\b[A-Za-z]{3}\s*$|\s").expect("static regex")
    })
}

/// Optional minus, digits with optional `,` grouping, optional fraction.
fn amount_shape() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^-?(?:\d{1,3}(?:,\d{3})+|\d+)(?:\.\d+)?$").expect("static regex")
    })
}

/// Parse a free-text amount leniently.
///
/// Currency signs and codes, whitespace and `,` thousands separators are
/// dropped. Whatever remains must be a plain decimal number or the result is
/// `None`, so exponents, inner dashes and repeated points never parse.
///
/// Example: "₱12,000" → 12000.0
pub fn parse_amount(input: &str) -> Option<f64> {
    let cleaned = currency_noise().replace_all(input, "");
    if !amount_shape().is_match(&cleaned) {
        return None;
    }
    cleaned
        .replace(',', "")
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
}

/// Normalize raw cell input for a field.
///
/// Amount fields parse text to a number (null on failure), optional text
/// fields trim and collapse blanks to null, the business name trims but stays
/// a string. Everything else passes through unchanged.
pub fn normalize_field_value(field: ContactField, raw: FieldValue) -> FieldValue {
    match (field.kind(), raw) {
        (FieldKind::Amount, FieldValue::Text(s)) => {
            parse_amount(&s).map_or(FieldValue::Null, FieldValue::Number)
        }
        (FieldKind::Amount, FieldValue::Integer(i)) => FieldValue::Number(i as f64),
        (FieldKind::Amount, FieldValue::Number(n)) if !n.is_finite() => FieldValue::Null,
        (FieldKind::Text, FieldValue::Text(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                FieldValue::Null
            } else {
                FieldValue::Text(trimmed.to_string())
            }
        }
        (FieldKind::RequiredText, FieldValue::Text(s)) => FieldValue::Text(s.trim().to_string()),
        (FieldKind::RequiredText, FieldValue::Null) => FieldValue::Text(String::new()),
        (_, other) => other,
    }
}

/// Comparison key for identity fields: trimmed and case-folded.
/// Blank values have no key and never match anything.
pub fn identity_key(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_lowercase())
    }
}

/// Append a tagged block to a note body.
///
/// The existing body is kept and the block goes after a blank line.
pub fn append_tagged_block(existing: Option<&str>, tag: &str, body: &str) -> String {
    let block = format!("[{}] {}", tag, body.trim());
    match existing.map(str::trim_end).filter(|s| !s.trim().is_empty()) {
        Some(prior) => format!("{}\n\n{}", prior, block),
        None => block,
    }
}

/// Render an amount with two decimals and thousands separators.
///
/// Example: 12000.0 → "12,000.00"
pub fn format_amount(amount: f64) -> String {
    let fixed = format!("{:.2}", amount.abs());
    let (whole, frac) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));
    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    let sign = if amount < 0.0 { "-" } else { "" };
    format!("{}{}.{}", sign, grouped, frac)
}
