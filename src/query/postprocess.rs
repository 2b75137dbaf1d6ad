//! Result shaping: flatten, project, sort

use serde_json::{Map, Value};
use std::cmp::Ordering;

use super::request::{FetchRequest, SortDirection};
use crate::types::Row;

/// Flatten nested objects into `<parent>_<child>` fields
pub fn flatten(row: Row) -> Row {
    let mut flat = Map::new();
    for (key, value) in row {
        flatten_into(&mut flat, key, value);
    }
    flat
}

fn flatten_into(target: &mut Row, prefix: String, value: Value) {
    match value {
        Value::Object(children) => {
            for (child, nested) in children {
                flatten_into(target, format!("{}_{}", prefix, child), nested);
            }
        }
        other => {
            target.insert(prefix, other);
        }
    }
}

/// Order two result values
///
/// Nulls first, then numbers compared numerically, then strings compared
/// case-insensitively. Booleans sort with numbers as 0/1.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) | Value::Number(_) => 1,
            Value::String(_) => 2,
            _ => 3,
        }
    }
    fn number(v: &Value) -> f64 {
        match v {
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => n.as_f64().unwrap_or(0.0),
            _ => 0.0,
        }
    }

    match (a, b) {
        (Value::String(x), Value::String(y)) => x.to_lowercase().cmp(&y.to_lowercase()),
        _ if rank(a) == 1 && rank(b) == 1 => number(a).partial_cmp(&number(b)).unwrap_or(Ordering::Equal),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Flatten, keep requested fields only, and sort
///
/// The sort is stable: rows equal on every key keep their query order.
pub fn shape_rows(request: &FetchRequest, rows: Vec<Row>) -> Vec<Row> {
    let wanted: Vec<String> = request
        .group_by
        .iter()
        .cloned()
        .chain(request.output_fields())
        .collect();

    let mut shaped: Vec<Row> = rows
        .into_iter()
        .map(|row| {
            let mut flat = flatten(row);
            let mut kept = Map::new();
            for field in &wanted {
                if let Some(value) = flat.remove(field) {
                    kept.insert(field.clone(), value);
                }
            }
            kept
        })
        .collect();

    let keys: Vec<(String, SortDirection)> = request
        .order_by
        .iter()
        .filter_map(|order| request.sort_field(&order.column).map(|f| (f, order.direction)))
        .collect();
    if keys.is_empty() {
        return shaped;
    }

    shaped.sort_by(|a, b| {
        for (field, direction) in &keys {
            let ordering = compare_values(
                a.get(field).unwrap_or(&Value::Null),
                b.get(field).unwrap_or(&Value::Null),
            );
            let ordering = match direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
    shaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(v: Value) -> Row {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn test_flatten_nested() {
        let flat = flatten(row(json!({"client": "x", "total": {"cost": {"sum": 1}, "n": 2}})));
        assert_eq!(flat["total_cost_sum"], json!(1));
        assert_eq!(flat["total_n"], json!(2));
        assert_eq!(flat["client"], json!("x"));
    }

    #[test]
    fn test_compare_values() {
        assert_eq!(compare_values(&json!("abc"), &json!("ABD")), Ordering::Less);
        assert_eq!(compare_values(&json!(10), &json!(9.5)), Ordering::Greater);
        assert_eq!(compare_values(&Value::Null, &json!(0)), Ordering::Less);
        assert_eq!(compare_values(&json!("B"), &json!("b")), Ordering::Equal);
    }

    #[test]
    fn test_shape_filters_and_sorts() {
        let request = FetchRequest::builder()
            .from("2024-01-01 00:00:00")
            .to("2024-01-02 00:00:00")
            .select("total_cost", &["sum"])
            .group_by("client")
            .group_by("carrier")
            .order_by("total_cost", "desc")
            .order_by("client", "asc")
            .build()
            .unwrap();

        let rows = vec![
            row(json!({"client": "b", "carrier": "1", "total_cost_sum": 5, "extra": 1})),
            row(json!({"client": "A", "carrier": "2", "total_cost_sum": 7})),
            row(json!({"client": "a", "carrier": "3", "total_cost_sum": 5})),
            row(json!({"client": "a", "carrier": "4", "total_cost_sum": 5})),
        ];
        let shaped = shape_rows(&request, rows);

        let order: Vec<&str> = shaped.iter().map(|r| r["carrier"].as_str().unwrap()).collect();
        assert_eq!(order, vec!["2", "3", "4", "1"]);
        assert!(shaped[3].get("extra").is_none());
    }
}
