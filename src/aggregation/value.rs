//! Helpers for partial values stored in interval JSON

use serde_json::{Number, Value};

/// Separator used by distinct token lists and min/max comma-lists
pub const LIST_SEPARATOR: &str = ", ";

/// Largest integer magnitude kept as an exact JSON integer
const MAX_EXACT_INT: f64 = 9_007_199_254_740_992.0;

/// Read a numeric partial
///
/// Accepts JSON numbers, numeric strings and booleans. Returns `None`
/// for everything else.
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|x| x.is_finite()),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Read an integer partial without loss
pub fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Build a JSON number, collapsing integral floats to integers
///
/// Non-finite inputs become `null`.
pub fn number_value(x: f64) -> Value {
    if x.is_finite() && x.fract() == 0.0 && x.abs() < MAX_EXACT_INT {
        Value::from(x as i64)
    } else {
        Number::from_f64(x).map(Value::Number).unwrap_or(Value::Null)
    }
}

/// Boolean cast used by `count` inputs
pub fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|x| x != 0.0).unwrap_or(false),
        Some(Value::String(s)) => !(s.is_empty() || s == "0"),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(map)) => !map.is_empty(),
    }
}

/// Split a partial into its list tokens
///
/// Strings are split on [`LIST_SEPARATOR`] with empty tokens dropped.
/// Numbers and booleans yield a single token.
pub fn tokens(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => s
            .split(LIST_SEPARATOR)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect(),
        Value::Number(n) => vec![n.to_string()],
        Value::Bool(b) => vec![b.to_string()],
        _ => Vec::new(),
    }
}

/// Numeric tokens of a partial, see [`tokens`]
pub fn numeric_tokens(value: &Value) -> Vec<f64> {
    match value {
        Value::Number(n) => n.as_f64().into_iter().collect(),
        _ => tokens(value)
            .iter()
            .filter_map(|t| t.parse::<f64>().ok())
            .filter(|x| x.is_finite())
            .collect(),
    }
}

/// Round to `precision` decimal places
pub fn round_to(x: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision as i32);
    (x * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_number_value_collapses_integral_floats() {
        assert_eq!(number_value(4.0), json!(4));
        assert_eq!(number_value(-3.0), json!(-3));
        assert_eq!(number_value(2.5), json!(2.5));
        assert_eq!(number_value(f64::NAN), Value::Null);
    }

    #[test]
    fn test_truthy() {
        assert!(truthy(Some(&json!(1))));
        assert!(truthy(Some(&json!("yes"))));
        assert!(!truthy(Some(&json!(0))));
        assert!(!truthy(Some(&json!("0"))));
        assert!(!truthy(Some(&json!(""))));
        assert!(!truthy(None));
    }

    #[test]
    fn test_tokens() {
        assert_eq!(tokens(&json!("a, , b")), vec!["a", "b"]);
        assert_eq!(numeric_tokens(&json!("3, 7, x, 1.5")), vec![3.0, 7.0, 1.5]);
        assert_eq!(numeric_tokens(&json!(2)), vec![2.0]);
        assert!(tokens(&Value::Null).is_empty());
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(1.23456, 2), 1.23);
        assert_eq!(round_to(2.5, 0), 3.0);
    }
}
