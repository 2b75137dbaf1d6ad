//! Cache key determinism tests
//!
//! Requests that differ only in the order of their lists must share a
//! key; requests over different windows must not.

use chrono::{Duration, TimeZone, Utc};
use kuba_rollup::cache::compute_key;
use kuba_rollup::query::{FetchRequest, FetchRequestBuilder};
use proptest::prelude::*;
use serde_json::{json, Value};

const COLUMNS: [(&str, &[&str]); 3] = [
    ("total_duration", &["sum", "max", "min"]),
    ("total_cost", &["sum", "max"]),
    ("total_records", &["sum"]),
];

const PIVOTS: [&str; 3] = ["client", "carrier", "destination"];

fn filters() -> Vec<(&'static str, &'static str, Value)> {
    vec![
        ("client", "in", json!(["acme", "bolt", "cargo"])),
        ("carrier", "!=", json!("b1")),
        ("destination", "like", json!("z%")),
    ]
}

fn base() -> FetchRequestBuilder {
    let start = Utc.with_ymd_and_hms(2024, 3, 7, 0, 0, 0).unwrap();
    FetchRequest::builder().between(start, start + Duration::days(2))
}

/// Build the reference request with every list permuted by `order`
fn permuted(order: &Permutation) -> FetchRequest {
    let mut builder = base();

    for &i in &order.columns {
        let (key, functions) = COLUMNS[i];
        let mut functions = functions.to_vec();
        let len = functions.len();
        functions.rotate_left(order.rotate % len);
        builder = builder.select(key, &functions);
    }
    for &i in &order.pivots {
        builder = builder.group_by(PIVOTS[i]);
    }
    let all = filters();
    for &i in &order.filters {
        let (column, op, mut value) = all[i].clone();
        if let Value::Array(items) = &mut value {
            let len = items.len();
            items.rotate_left(order.rotate % len);
        }
        builder = builder.filter(column, op, value);
    }

    builder.build().unwrap()
}

#[derive(Debug, Clone)]
struct Permutation {
    columns: Vec<usize>,
    pivots: Vec<usize>,
    filters: Vec<usize>,
    rotate: usize,
}

fn permutation_strategy() -> impl Strategy<Value = Permutation> {
    (
        Just(vec![0usize, 1, 2]).prop_shuffle(),
        Just(vec![0usize, 1, 2]).prop_shuffle(),
        Just(vec![0usize, 1, 2]).prop_shuffle(),
        0usize..6,
    )
        .prop_map(|(columns, pivots, filters, rotate)| Permutation {
            columns,
            pivots,
            filters,
            rotate,
        })
}

fn identity() -> Permutation {
    Permutation {
        columns: vec![0, 1, 2],
        pivots: vec![0, 1, 2],
        filters: vec![0, 1, 2],
        rotate: 0,
    }
}

proptest! {
    #[test]
    fn prop_key_ignores_list_order(order in permutation_strategy()) {
        let reference = compute_key("rollup:fetch:", &permuted(&identity()));
        prop_assert_eq!(compute_key("rollup:fetch:", &permuted(&order)), reference);
    }

    #[test]
    fn prop_key_depends_on_range(shift_minutes in 1i64..100_000) {
        let request = permuted(&identity());
        let mut shifted = request.clone();
        shifted.range.start += Duration::minutes(shift_minutes);
        shifted.range.end += Duration::minutes(shift_minutes);
        prop_assert_ne!(compute_key("", &request), compute_key("", &shifted));
    }
}

#[test]
fn test_key_ignores_order_by() {
    let plain = base().select("total_duration", &["sum"]).group_by("client").build().unwrap();
    let sorted = base()
        .select("total_duration", &["sum"])
        .group_by("client")
        .order_by("client", "desc")
        .build()
        .unwrap();
    assert_eq!(compute_key("", &plain), compute_key("", &sorted));
}

#[test]
fn test_key_depends_on_filters() {
    let a = base().select("total_duration", &["sum"]).filter("client", "=", json!("acme")).build().unwrap();
    let b = base().select("total_duration", &["sum"]).filter("client", "=", json!("bolt")).build().unwrap();
    assert_ne!(compute_key("", &a), compute_key("", &b));
}

#[test]
fn test_key_carries_prefix() {
    let request = base().select("total_cost", &["sum"]).build().unwrap();
    let key = compute_key("tenant-7:", &request);
    assert!(key.starts_with("tenant-7:"));
    assert!(key.len() > "tenant-7:".len());
}
