//! Canonical cache keys for fetch requests

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::Serialize;
use serde_json::Value;

use crate::query::{Comparison, FetchColumn, FetchRequest, WherePredicate};
use crate::types::TimeRange;

/// Cache-relevant part of a request in canonical order
///
/// Ordering is left out: cached rows are re-sorted on every hit.
#[derive(Serialize)]
struct CanonicalRequest<'a> {
    range: &'a TimeRange,
    columns: Vec<FetchColumn>,
    group_by: Vec<&'a str>,
    filters: Vec<WherePredicate>,
}

/// Derive the cache key of `request`
///
/// Columns are sorted by key with each function list sorted, group-by
/// pivots are sorted, `in` operand lists are sorted, and predicates are
/// sorted by their serialized form, so requests that differ only in
/// ordering share a key.
pub fn compute_key(prefix: &str, request: &FetchRequest) -> String {
    let mut columns = request.columns.clone();
    for column in &mut columns {
        column.functions.sort();
        column.functions.dedup();
    }
    columns.sort_by(|a, b| a.key.cmp(&b.key));

    let mut group_by: Vec<&str> = request.group_by.iter().map(String::as_str).collect();
    group_by.sort_unstable();
    group_by.dedup();

    let mut filters: Vec<(String, WherePredicate)> = request
        .filters
        .iter()
        .cloned()
        .map(|mut p| {
            if let (Comparison::In, Value::Array(items)) = (p.op, &mut p.value) {
                items.sort_by_cached_key(Value::to_string);
                items.dedup();
            }
            (serde_json::to_string(&p).unwrap_or_default(), p)
        })
        .collect();
    filters.sort_by(|a, b| a.0.cmp(&b.0));

    let canonical = CanonicalRequest {
        range: &request.range,
        columns,
        group_by,
        filters: filters.into_iter().map(|(_, p)| p).collect(),
    };
    let encoded = serde_json::to_vec(&canonical).unwrap_or_default();
    format!("{}{}", prefix, URL_SAFE_NO_PAD.encode(encoded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(reverse: bool) -> FetchRequest {
        let builder = FetchRequest::builder()
            .from("2024-01-01 00:00:00")
            .to("2024-01-02 00:00:00");
        let builder = if reverse {
            builder
                .select("total_duration", &["min", "sum"])
                .select("total_cost", &["max", "sum"])
                .group_by("carrier")
                .group_by("client")
                .filter("destination", "=", json!("z"))
                .filter("client", "in", json!(["a"]))
        } else {
            builder
                .select("total_cost", &["sum", "max"])
                .select("total_duration", &["sum", "min"])
                .group_by("client")
                .group_by("carrier")
                .filter("client", "in", json!(["a"]))
                .filter("destination", "=", json!("z"))
        };
        builder.build().unwrap()
    }

    #[test]
    fn test_key_ignores_ordering() {
        let a = compute_key("rollup:", &request(false));
        let b = compute_key("rollup:", &request(true));
        assert_eq!(a, b);
        assert!(a.starts_with("rollup:"));
        assert!(!a.contains('+') && !a.contains('/') && !a.contains('='));
    }

    #[test]
    fn test_key_depends_on_range() {
        let a = request(false);
        let mut b = a.clone();
        b.range.end += chrono::Duration::hours(1);
        assert_ne!(compute_key("", &a), compute_key("", &b));
    }
}
