//! Batch validation and grouping into per-row interval deltas

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use xxhash_rust::xxh3::Xxh3;

use crate::aggregation::value::as_integer;
use crate::aggregation::{AggregateFunction, RECORD_COUNT_KEY};
use crate::error::UpsertError;
use crate::schema::{ConfigModel, DataType};
use crate::types::{parse_instant, scalar_to_string, Operation, Record, Row};

/// Delta for one stored row
#[derive(Debug, Clone)]
pub struct PendingRow {
    /// Shard table name
    pub table: String,
    /// First instant of the group, used to resolve the table layout
    pub anchor: DateTime<Utc>,
    /// Pivot hash (primary key)
    pub hash: String,
    /// Pivot values keyed by column
    pub pivots: Row,
    /// Folded delta per interval column
    pub deltas: BTreeMap<String, Map<String, Value>>,
    /// Records folded into this row
    pub records: usize,
}

/// Stable hash of a pivot combination
///
/// Pairs are fed to xxh3-128 in pivot name order, each name and value
/// length-prefixed and each value tagged null or present, so distinct
/// combinations never share an input.
pub fn pivot_hash(pivots: &BTreeMap<&str, Option<String>>) -> String {
    let mut hasher = Xxh3::new();
    let mut field = |bytes: &[u8]| {
        hasher.update(&(bytes.len() as u64).to_le_bytes());
        hasher.update(bytes);
    };
    for (name, value) in pivots {
        field(name.as_bytes());
        match value {
            Some(text) => {
                field(&[1]);
                field(text.as_bytes());
            }
            None => field(&[0]),
        }
    }
    format!("{:032x}", hasher.digest128())
}

struct Validated<'a> {
    record: &'a Record,
    instant: DateTime<Utc>,
    pivot_text: BTreeMap<&'a str, Option<String>>,
    pivot_values: Row,
}

/// Check every record before anything is written
fn validate<'a>(model: &'a ConfigModel, records: &'a [Record]) -> Result<Vec<Validated<'a>>, UpsertError> {
    if records.is_empty() {
        return Err(UpsertError::EmptyBatch);
    }

    let ts_field = model.timestamp_field();
    records
        .iter()
        .enumerate()
        .map(|(index, record)| {
            let raw_ts = record.get(ts_field).ok_or_else(|| UpsertError::IncompleteRecord {
                index,
                column: ts_field.to_string(),
            })?;
            let instant = parse_instant(raw_ts).ok_or_else(|| UpsertError::InvalidTimestamp {
                index,
                value: raw_ts.to_string(),
            })?;

            let mut pivot_text = BTreeMap::new();
            let mut pivot_values = Row::new();
            for pivot in model.pivots() {
                let value = match record.get(&pivot.name) {
                    Some(Value::Null) | None if pivot.nullable => Value::Null,
                    Some(Value::Null) | None => {
                        return Err(UpsertError::IncompleteRecord {
                            index,
                            column: pivot.name.clone(),
                        })
                    }
                    Some(value) => value.clone(),
                };

                let text = if value.is_null() {
                    None
                } else {
                    Some(scalar_to_string(&value).ok_or_else(|| UpsertError::InvalidPivotValue {
                        index,
                        column: pivot.name.clone(),
                    })?)
                };

                let stored = match pivot.data_type {
                    DataType::Int if !value.is_null() => as_integer(&value)
                        .map(Value::from)
                        .ok_or_else(|| UpsertError::InvalidPivotValue {
                            index,
                            column: pivot.name.clone(),
                        })?,
                    DataType::Int => Value::Null,
                    _ => text.clone().map_or(Value::Null, Value::String),
                };

                pivot_text.insert(pivot.name.as_str(), text);
                pivot_values.insert(pivot.name.clone(), stored);
            }

            Ok(Validated {
                record,
                instant,
                pivot_text,
                pivot_values,
            })
        })
        .collect()
}

/// Validate a batch and fold it into one delta per (table, hash)
///
/// Groups come back in first-seen order. Within a group, every
/// aggregate's contributions for an interval column are folded with
/// that aggregate's `fold_many`, and the hidden record counter is
/// folded alongside.
pub fn group_batch(
    model: &ConfigModel,
    op: Operation,
    records: &[Record],
) -> Result<Vec<PendingRow>, UpsertError> {
    let validated = validate(model, records)?;
    let resolver = model.resolver();

    type Contributions = BTreeMap<String, BTreeMap<String, Vec<Value>>>;
    let mut order: Vec<(PendingRow, Contributions)> = Vec::new();
    let mut index: HashMap<(String, String), usize> = HashMap::new();

    for item in validated {
        let location = resolver.locate(&item.instant)?;
        let hash = pivot_hash(&item.pivot_text);

        let slot = *index
            .entry((location.table.clone(), hash.clone()))
            .or_insert_with(|| {
                order.push((
                    PendingRow {
                        table: location.table.clone(),
                        anchor: item.instant,
                        hash,
                        pivots: item.pivot_values.clone(),
                        deltas: BTreeMap::new(),
                        records: 0,
                    },
                    BTreeMap::new(),
                ));
                order.len() - 1
            });

        let (row, contributions) = &mut order[slot];
        row.records += 1;

        let column = contributions.entry(location.column).or_default();
        column
            .entry(RECORD_COUNT_KEY.to_string())
            .or_default()
            .push(Value::from(op.sign()));
        for aggregate in model.aggregates() {
            if let Some(value) = aggregate.contribution(item.record, op) {
                column.entry(aggregate.key.clone()).or_default().push(value);
            }
        }
    }

    Ok(order
        .into_iter()
        .map(|(mut row, contributions)| {
            for (column, per_key) in contributions {
                let mut delta = Map::new();
                for (key, values) in per_key {
                    let function = model
                        .aggregate_by_key(&key)
                        .map(|a| a.function)
                        .unwrap_or(AggregateFunction::Count);
                    if let Some(folded) = function.fold_many(&values) {
                        delta.insert(key, folded);
                    }
                }
                row.deltas.insert(column, delta);
            }
            row
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use serde_json::json;

    fn record(v: Value) -> Record {
        serde_json::from_value(v).unwrap()
    }

    fn model() -> ConfigModel {
        Config::default().model().unwrap()
    }

    fn pivots<'a>(pairs: &[(&'a str, Option<&str>)]) -> BTreeMap<&'a str, Option<String>> {
        pairs
            .iter()
            .map(|(name, value)| (*name, value.map(str::to_string)))
            .collect()
    }

    #[test]
    fn test_hash_is_order_independent() {
        let a = pivots(&[("client", Some("x")), ("carrier", Some("y"))]);
        let b = pivots(&[("carrier", Some("y")), ("client", Some("x"))]);
        assert_eq!(pivot_hash(&a), pivot_hash(&b));
        assert_eq!(pivot_hash(&a).len(), 32);

        let c = pivots(&[("client", Some("x")), ("carrier", Some("z"))]);
        assert_ne!(pivot_hash(&a), pivot_hash(&c));
    }

    #[test]
    fn test_hash_separates_embedded_separators() {
        let a = pivots(&[("carrier", Some("x__y")), ("client", Some("z"))]);
        let b = pivots(&[("carrier", Some("x")), ("client", Some("y__z"))]);
        assert_ne!(pivot_hash(&a), pivot_hash(&b));

        let c = pivots(&[("carrier", Some("xy")), ("client", Some(""))]);
        let d = pivots(&[("carrier", Some("x")), ("client", Some("y"))]);
        assert_ne!(pivot_hash(&c), pivot_hash(&d));
    }

    #[test]
    fn test_hash_null_differs_from_empty() {
        let null = pivots(&[("carrier", None), ("client", Some("x"))]);
        let empty = pivots(&[("carrier", Some("")), ("client", Some("x"))]);
        assert_ne!(pivot_hash(&null), pivot_hash(&empty));
    }

    #[test]
    fn test_embedded_separator_pivots_get_separate_rows() {
        let records = vec![
            record(json!({"client": "z", "carrier": "x__y", "destination": "d",
                          "start_date": "2024-01-01 10:05:00", "duration": 1, "cost": 1})),
            record(json!({"client": "y__z", "carrier": "x", "destination": "d",
                          "start_date": "2024-01-01 10:05:00", "duration": 1, "cost": 1})),
        ];
        let rows = group_batch(&model(), Operation::Insert, &records).unwrap();
        assert_eq!(rows.len(), 2);
        assert_ne!(rows[0].hash, rows[1].hash);
    }

    #[test]
    fn test_empty_batch() {
        assert!(matches!(
            group_batch(&model(), Operation::Insert, &[]),
            Err(UpsertError::EmptyBatch)
        ));
    }

    #[test]
    fn test_missing_pivot_fails_whole_batch() {
        let records = vec![
            record(json!({"client": "x", "carrier": "y", "destination": "z", "start_date": "2024-01-01 10:00:00"})),
            record(json!({"client": "x", "destination": "z", "start_date": "2024-01-01 10:00:00"})),
        ];
        let err = group_batch(&model(), Operation::Insert, &records).unwrap_err();
        assert!(matches!(err, UpsertError::IncompleteRecord { index: 1, ref column } if column == "carrier"));
    }

    #[test]
    fn test_missing_and_bad_timestamp() {
        let records = vec![record(json!({"client": "x", "carrier": "y", "destination": "z"}))];
        assert!(matches!(
            group_batch(&model(), Operation::Insert, &records),
            Err(UpsertError::IncompleteRecord { .. })
        ));

        let records = vec![record(
            json!({"client": "x", "carrier": "y", "destination": "z", "start_date": "soon"}),
        )];
        assert!(matches!(
            group_batch(&model(), Operation::Insert, &records),
            Err(UpsertError::InvalidTimestamp { .. })
        ));
    }

    #[test]
    fn test_groups_and_folds() {
        let records = vec![
            record(json!({"client": "x", "carrier": "y", "destination": "z",
                          "start_date": "2024-01-01 10:05:00", "duration": 10, "cost": 2.5})),
            record(json!({"client": "x", "carrier": "y", "destination": "z",
                          "start_date": "2024-01-01 10:40:00", "duration": 5, "cost": 1.5})),
            record(json!({"client": "x", "carrier": "y", "destination": "z",
                          "start_date": "2024-01-01 11:00:00", "duration": 1, "cost": 1})),
            record(json!({"client": "w", "carrier": "y", "destination": "z",
                          "start_date": "2024-01-02 00:00:00", "duration": 3, "cost": 0})),
        ];
        let rows = group_batch(&model(), Operation::Insert, &records).unwrap();
        assert_eq!(rows.len(), 2);

        let first = &rows[0];
        assert_eq!(first.table, "Daily_2024_01_01");
        assert_eq!(first.records, 3);
        assert_eq!(first.pivots["client"], json!("x"));

        let bucket = &first.deltas["interval_10_11"];
        assert_eq!(bucket["total_duration"], json!(15));
        assert_eq!(bucket["total_cost"], json!(4));
        assert_eq!(bucket["total_records"], json!(2));
        assert_eq!(bucket["distinct_records"], json!("z"));
        assert_eq!(bucket[RECORD_COUNT_KEY], json!(2));
        assert_eq!(first.deltas["interval_11_12"]["total_records"], json!(1));

        assert_eq!(rows[1].table, "Daily_2024_01_02");
    }

    #[test]
    fn test_delete_contributions_are_negative() {
        let records = vec![record(json!({"client": "x", "carrier": "y", "destination": "z",
                                         "start_date": "2024-01-01 10:05:00", "duration": 10, "cost": 2.5}))];
        let rows = group_batch(&model(), Operation::Delete, &records).unwrap();
        let bucket = &rows[0].deltas["interval_10_11"];
        assert_eq!(bucket["total_duration"], json!(-10));
        assert_eq!(bucket["total_cost"], json!(-2.5));
        assert_eq!(bucket[RECORD_COUNT_KEY], json!(-1));
        assert!(bucket.get("distinct_records").is_none());
    }
}
