//! Coercing published attribute values to numbers

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

fn numeric_prefix() -> Option<&'static Regex> {
    static NUMERIC_PREFIX: OnceLock<Option<Regex>> = OnceLock::new();
    NUMERIC_PREFIX
        .get_or_init(|| Regex::new(r"[-+]?[0-9]*\.?[0-9]+").ok())
        .as_ref()
}

/// A finite number from a JSON number or a numeric string
///
/// `null`, booleans, non-numeric strings, NaN and infinities yield `None`.
pub fn coerce(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

/// Like [`coerce`], but also reads the first number inside a string such as
/// `"1000 lx"`
pub fn coerce_lenient(value: &Value) -> Option<f64> {
    if let Some(v) = coerce(value) {
        return Some(v);
    }
    let Value::String(s) = value else {
        return None;
    };
    numeric_prefix()?
        .find(s)
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}
