//! Coercion of raw model text into a typed [`AnswerValue`].
//!
//! Returns `None` when the text cannot be read as the expected format; the
//! synthesizer then keeps the raw text so validation reports a mismatch.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use strata_core::format::{ExpectedFormat, FieldSpec, FieldType, FormatHints};
use strata_core::types::{AnswerValue, Row};

/// Default distance from a whole number still accepted as an integer.
const INTEGER_TOLERANCE: f64 = 1e-9;

pub fn coerce(raw: &str, format: &ExpectedFormat, hints: &FormatHints) -> Option<AnswerValue> {
    let text = unwrap_text(raw);
    match format {
        ExpectedFormat::Integer => to_integer(&text, hints).map(AnswerValue::Integer),
        ExpectedFormat::Float => to_float(&text, hints).map(AnswerValue::Float),
        ExpectedFormat::String | ExpectedFormat::FreeForm => {
            (!text.is_empty()).then(|| AnswerValue::Text(text))
        }
        ExpectedFormat::ListOfString => to_string_list(&text).map(AnswerValue::List),
        ExpectedFormat::ListOfRecord { fields } => to_records(&text, fields).map(AnswerValue::Records),
    }
}

/// Trim, drop code fences, and unquote a JSON string literal.
fn unwrap_text(raw: &str) -> String {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```") {
        let body = rest.find('\n').map_or("", |p| &rest[p + 1..]);
        text = body.rfind("```").map_or(body, |end| &body[..end]).trim();
    }
    if text.starts_with('"') {
        if let Ok(Value::String(s)) = serde_json::from_str::<Value>(text) {
            return s.trim().to_string();
        }
    }
    text.to_string()
}

fn number_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"-?\d{1,3}(?:,\d{3})+(?:\.\d+)?|-?\d+(?:\.\d+)?|-?\.\d+").expect("static regex")
    })
}

/// The single number in `text`, after removing the unit hint. Text with no
/// number or with several numbers is ambiguous.
fn sole_number(text: &str, hints: &FormatHints) -> Option<f64> {
    let mut text = text.to_string();
    if let Some(unit) = hints.unit.as_deref().filter(|u| !u.is_empty()) {
        text = strip_unit(&text, unit);
    }

    let mut matches = number_regex().find_iter(&text);
    let first = matches.next()?;
    if matches.next().is_some() {
        return None;
    }
    let value: f64 = first.as_str().replace(',', "").parse().ok()?;
    value.is_finite().then_some(value)
}

fn strip_unit(text: &str, unit: &str) -> String {
    let lower_text = text.to_lowercase();
    let lower_unit = unit.to_lowercase();
    let Some(pos) = lower_text.find(&lower_unit) else {
        return text.to_string();
    };
    // Offsets come from the lowercased copy; only use them when they still
    // fall on boundaries of the original.
    match (text.get(..pos), text.get(pos + lower_unit.len()..)) {
        (Some(head), Some(tail)) if lower_text.len() == text.len() => format!("{}{}", head, tail),
        _ => text.to_string(),
    }
}

fn to_integer(text: &str, hints: &FormatHints) -> Option<i64> {
    let value = sole_number(text, hints)?;
    let tolerance = hints.tolerance.unwrap_or(INTEGER_TOLERANCE).abs();
    let rounded = value.round();
    if (value - rounded).abs() > tolerance || rounded.abs() > i64::MAX as f64 {
        return None;
    }
    Some(rounded as i64)
}

fn to_float(text: &str, hints: &FormatHints) -> Option<f64> {
    let value = sole_number(text, hints)?;
    Some(match hints.decimals {
        Some(places) => {
            let factor = 10f64.powi(places.min(15) as i32);
            (value * factor).round() / factor
        }
        None => value,
    })
}

fn bullet_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(?:[-*•]|\d+[.)])\s*").expect("static regex"))
}

fn to_string_list(text: &str) -> Option<Vec<String>> {
    if text.starts_with('[') {
        let items = match serde_json::from_str::<Value>(text).ok()? {
            Value::Array(items) => items,
            _ => return None,
        };
        return items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .filter(|item| item.as_deref() != Some(""))
            .collect();
    }

    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let items: Vec<String> = if lines.len() > 1 {
        lines
            .iter()
            .map(|l| bullet_regex().replace(l, "").trim().to_string())
            .collect()
    } else {
        text.split(',').map(|s| s.trim().to_string()).collect()
    };
    Some(items.into_iter().filter(|s| !s.is_empty()).collect())
}

fn to_records(text: &str, fields: &[FieldSpec]) -> Option<Vec<Row>> {
    let records = match serde_json::from_str::<Value>(text).ok()? {
        Value::Array(items) => items,
        obj @ Value::Object(_) => vec![obj],
        _ => return None,
    };

    records
        .into_iter()
        .map(|record| {
            let Value::Object(mut row) = record else {
                return None;
            };
            for field in fields {
                if let Some(value) = row.get_mut(&field.name) {
                    *value = coerce_field(value.take(), field.field_type);
                }
            }
            Some(row)
        })
        .collect()
}

/// Best-effort conversion of one record field; unconvertible values are left
/// as they were for the validator to reject.
fn coerce_field(value: Value, field_type: FieldType) -> Value {
    let parsed = |s: &str| s.trim().replace(',', "").parse::<f64>().ok();
    match (field_type, value) {
        (FieldType::Str, Value::Number(n)) => Value::String(n.to_string()),
        (FieldType::Int, Value::Number(n)) if n.as_i64().is_none() => match n.as_f64() {
            Some(f) if f.fract() == 0.0 => Value::from(f as i64),
            _ => Value::Number(n),
        },
        (FieldType::Int, Value::String(s)) => match parsed(&s) {
            Some(f) if f.fract() == 0.0 => Value::from(f as i64),
            _ => Value::String(s),
        },
        (FieldType::Float, Value::String(s)) => match parsed(&s).and_then(serde_json::Number::from_f64) {
            Some(n) => Value::Number(n),
            None => Value::String(s),
        },
        (_, other) => other,
    }
}
