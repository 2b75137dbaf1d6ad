//! Property tests for aggregate merge rules
//!
//! Shard merges and repeated upserts both depend on every function
//! combining partials in any grouping and any order.

use kuba_rollup::aggregation::value::tokens;
use kuba_rollup::aggregation::AggregateFunction;
use proptest::prelude::*;
use serde_json::{json, Value};

const NUMERIC: [AggregateFunction; 4] = [
    AggregateFunction::Sum,
    AggregateFunction::Count,
    AggregateFunction::Min,
    AggregateFunction::Max,
];

// ============================================================================
// Strategies
// ============================================================================

/// Integer partials, so sums are exact
fn int_partial() -> impl Strategy<Value = Value> {
    (-1_000_000i64..1_000_000).prop_map(Value::from)
}

fn token() -> impl Strategy<Value = String> {
    "[a-z]{1,6}"
}

/// Distinct partials: comma-separated token lists
fn distinct_partial() -> impl Strategy<Value = Value> {
    prop::collection::vec(token(), 1..5).prop_map(|t| Value::String(t.join(", ")))
}

fn combine(function: AggregateFunction, a: &Value, b: &Value) -> Value {
    function.combine(a, Some(b))
}

fn token_set(value: &Value) -> Vec<String> {
    let mut t = tokens(value);
    t.sort();
    t.dedup();
    t
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn prop_numeric_combine_associative(a in int_partial(), b in int_partial(), c in int_partial()) {
        for function in NUMERIC {
            let left = combine(function, &combine(function, &a, &b), &c);
            let right = combine(function, &a, &combine(function, &b, &c));
            prop_assert_eq!(left, right, "{}", function);
        }
    }

    #[test]
    fn prop_numeric_combine_commutative(a in int_partial(), b in int_partial()) {
        for function in NUMERIC {
            prop_assert_eq!(combine(function, &a, &b), combine(function, &b, &a), "{}", function);
        }
    }

    #[test]
    fn prop_fold_many_matches_pairwise(values in prop::collection::vec(int_partial(), 1..20)) {
        for function in NUMERIC {
            let folded = function.fold_many(values.iter()).unwrap();
            let pairwise = values[1..]
                .iter()
                .fold(values[0].clone(), |acc, v| combine(function, v, &acc));
            prop_assert_eq!(folded, pairwise, "{}", function);
        }
    }

    #[test]
    fn prop_distinct_combine_associative(a in distinct_partial(), b in distinct_partial(), c in distinct_partial()) {
        let f = AggregateFunction::Distinct;
        let left = combine(f, &combine(f, &a, &b), &c);
        let right = combine(f, &a, &combine(f, &b, &c));
        prop_assert_eq!(&left, &right);
        prop_assert_eq!(combine(f, &a, &b), combine(f, &b, &a));

        // Output is the sorted set of input tokens
        let mut expected: Vec<String> = [&a, &b, &c].into_iter().flat_map(tokens).collect();
        expected.sort();
        expected.dedup();
        prop_assert_eq!(tokens(&left), expected);
    }

    #[test]
    fn prop_distinct_idempotent(a in distinct_partial()) {
        let f = AggregateFunction::Distinct;
        let once = combine(f, &a, &a);
        prop_assert_eq!(token_set(&once), token_set(&a));
    }
}

// ============================================================================
// Fixed cases
// ============================================================================

#[test]
fn test_distinct_merge_sorted_union() {
    let merged = AggregateFunction::Distinct.combine(&json!("b, a"), Some(&json!("a, c")));
    assert_eq!(merged, json!("a, b, c"));
}

#[test]
fn test_missing_existing_keeps_new() {
    for function in NUMERIC {
        assert_eq!(function.combine(&json!(7), None), json!(7));
    }
    assert_eq!(AggregateFunction::Sum.combine(&json!(7), Some(&Value::Null)), json!(7));
}

#[test]
fn test_sum_of_floats() {
    let merged = AggregateFunction::Sum.combine(&json!(2.5), Some(&json!(1.5)));
    assert_eq!(merged.as_f64(), Some(4.0));
}
