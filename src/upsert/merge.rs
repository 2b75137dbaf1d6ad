//! Merge of interval deltas into stored interval JSON

use serde_json::{Map, Value};
use tracing::warn;

use crate::aggregation::{AggregateFunction, RECORD_COUNT_KEY};
use crate::schema::ConfigModel;

/// Decode a stored interval cell
///
/// `NULL` is an empty interval. Backends may hand back JSON text or an
/// already decoded object.
pub fn decode_interval(cell: Option<&Value>) -> Result<Option<Map<String, Value>>, String> {
    match cell {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map.clone())),
        Some(Value::String(text)) if text.trim().is_empty() => Ok(None),
        Some(Value::String(text)) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Ok(Some(map)),
            Ok(Value::Null) => Ok(None),
            Ok(other) => Err(format!("expected an object, found {}", other)),
            Err(e) => Err(e.to_string()),
        },
        Some(other) => Err(format!("unexpected cell value {}", other)),
    }
}

/// Encode a merged interval for storage
pub fn encode_interval(interval: Option<Map<String, Value>>) -> Value {
    match interval {
        Some(map) => Value::String(Value::Object(map).to_string()),
        None => Value::Null,
    }
}

/// Merge a delta with the stored interval object
///
/// Each configured aggregate is merged with its `combine` rule and then
/// passed through its extras. The hidden record counter decides
/// emptiness: at zero or below the interval is `None` and is stored as
/// `NULL`. Keys not produced by the current configuration are dropped.
pub fn merge_interval(
    model: &ConfigModel,
    delta: &Map<String, Value>,
    existing: Option<&Map<String, Value>>,
) -> Option<Map<String, Value>> {
    let stored = |key: &str| existing.and_then(|m| m.get(key)).filter(|v| !v.is_null());

    let count = match delta.get(RECORD_COUNT_KEY) {
        Some(d) => AggregateFunction::Count.combine(d, stored(RECORD_COUNT_KEY)),
        None => stored(RECORD_COUNT_KEY).cloned().unwrap_or(Value::Null),
    };
    if count.as_i64().map_or(true, |n| n <= 0) {
        return None;
    }

    let mut merged = Map::new();
    for aggregate in model.aggregates() {
        let value = match (delta.get(&aggregate.key), stored(&aggregate.key)) {
            (Some(new), old) => aggregate.function.combine(new, old),
            (None, Some(old)) => old.clone(),
            (None, None) => continue,
        };
        if value.is_null() {
            continue;
        }
        aggregate.extras.apply(&aggregate.key, value, &mut merged);
    }

    if let Some(existing) = existing {
        for key in existing.keys() {
            if key != RECORD_COUNT_KEY && !merged.contains_key(key) && model.aggregate_by_key(key).is_none() {
                warn!(key = %key, "Dropping unconfigured key from stored interval");
            }
        }
    }

    merged.insert(RECORD_COUNT_KEY.to_string(), count);
    Some(merged)
}
