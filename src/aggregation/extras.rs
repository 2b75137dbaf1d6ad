//! Post-merge transforms applied to merged partials

use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::functions::AggregateFunction;
use super::value::{as_number, number_value, round_to, tokens};
use crate::error::ConfigError;

/// Maximum decimal places accepted by `round`
pub const MAX_ROUND_PRECISION: u32 = 12;

/// Suffix of the sibling field written by the distinct counter
pub const COUNTER_SUFFIX: &str = "_count";

/// Extras configured on one aggregate
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extras {
    /// Decimal places kept after each merge
    pub round: Option<u32>,
    /// Emit `<key>_count` with the number of distinct tokens
    pub counter: bool,
}

impl Extras {
    /// Parse the raw extras table of aggregate `key`
    pub fn parse(
        key: &str,
        function: AggregateFunction,
        raw: &BTreeMap<String, Value>,
    ) -> Result<Self, ConfigError> {
        let mut extras = Extras::default();

        for (name, value) in raw {
            match name.as_str() {
                "round" => {
                    let precision = value
                        .as_u64()
                        .and_then(|p| u32::try_from(p).ok())
                        .filter(|p| *p <= MAX_ROUND_PRECISION)
                        .ok_or_else(|| {
                            ConfigError::Invalid(format!(
                                "round precision for '{}' must be an integer in 0..={}",
                                key, MAX_ROUND_PRECISION
                            ))
                        })?;
                    if !function.is_numeric() {
                        return Err(unknown(key, name));
                    }
                    extras.round = Some(precision);
                }
                "counter" => {
                    let enabled = value.as_bool().ok_or_else(|| {
                        ConfigError::Invalid(format!("counter for '{}' must be a boolean", key))
                    })?;
                    if function != AggregateFunction::Distinct {
                        return Err(unknown(key, name));
                    }
                    extras.counter = enabled;
                }
                _ => return Err(unknown(key, name)),
            }
        }

        Ok(extras)
    }

    /// Names of fields written next to the aggregate key
    pub fn derived_keys(&self, key: &str) -> Vec<String> {
        if self.counter {
            vec![format!("{}{}", key, COUNTER_SUFFIX)]
        } else {
            Vec::new()
        }
    }

    /// Write a merged value and its derived fields into `target`
    pub fn apply(&self, key: &str, merged: Value, target: &mut Map<String, Value>) {
        let value = match (self.round, as_number(&merged)) {
            (Some(precision), Some(x)) if merged.is_number() => number_value(round_to(x, precision)),
            _ => merged,
        };

        if self.counter {
            let count = tokens(&value).len();
            target.insert(format!("{}{}", key, COUNTER_SUFFIX), Value::from(count));
        }
        target.insert(key.to_string(), value);
    }
}

fn unknown(key: &str, extra: &str) -> ConfigError {
    ConfigError::UnknownExtra {
        aggregate: key.to_string(),
        extra: extra.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(entries: &[(&str, Value)]) -> BTreeMap<String, Value> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_parse_extras() {
        let extras = Extras::parse("cost", AggregateFunction::Sum, &raw(&[("round", json!(2))])).unwrap();
        assert_eq!(extras.round, Some(2));
        assert!(!extras.counter);

        let extras = Extras::parse(
            "dests",
            AggregateFunction::Distinct,
            &raw(&[("counter", json!(true))]),
        )
        .unwrap();
        assert!(extras.counter);
    }

    #[test]
    fn test_parse_rejects_unknown_and_misplaced() {
        assert!(matches!(
            Extras::parse("cost", AggregateFunction::Sum, &raw(&[("ceil", json!(1))])),
            Err(ConfigError::UnknownExtra { .. })
        ));
        assert!(matches!(
            Extras::parse("cost", AggregateFunction::Sum, &raw(&[("counter", json!(true))])),
            Err(ConfigError::UnknownExtra { .. })
        ));
        assert!(Extras::parse("cost", AggregateFunction::Sum, &raw(&[("round", json!(-1))])).is_err());
    }

    #[test]
    fn test_apply_round() {
        let extras = Extras { round: Some(2), counter: false };
        let mut out = Map::new();
        extras.apply("cost", json!(1.23456), &mut out);
        assert_eq!(out["cost"], json!(1.23));
    }

    #[test]
    fn test_apply_counter() {
        let extras = Extras { round: None, counter: true };
        let mut out = Map::new();
        extras.apply("dests", json!("a, b, c"), &mut out);
        assert_eq!(out["dests"], json!("a, b, c"));
        assert_eq!(out["dests_count"], json!(3));
        assert_eq!(extras.derived_keys("dests"), vec!["dests_count"]);
    }
}
