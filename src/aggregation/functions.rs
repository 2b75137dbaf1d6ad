//! Aggregate and output functions
//!
//! [`AggregateFunction`] folds raw record values into interval partials
//! and merges partials with each other. Every merge rule is associative
//! and commutative, so partials can be combined in any grouping: per
//! record, per batch, against the stored row, and across shards.
//!
//! [`OutputFunction`] is what a fetch applies on top of the stored
//! partials (`sum`, `max`, `min`).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use super::value::{as_integer, as_number, number_value, numeric_tokens, tokens, truthy, LIST_SEPARATOR};
use crate::error::{ConfigError, FetchDataError};
use crate::types::Operation;

/// Input (storage-side) aggregate function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFunction {
    /// Numeric sum
    Sum,
    /// Record count, optionally of truthy inputs
    Count,
    /// Numeric minimum
    Min,
    /// Numeric maximum
    Max,
    /// Sorted set of distinct tokens
    Distinct,
}

/// Raw input of one record for one aggregate
#[derive(Debug, Clone, Copy)]
pub enum Input<'a> {
    /// The aggregate has no input field
    Unbound,
    /// The aggregate's input field is absent from the record
    Missing,
    /// The record's value for the input field
    Present(&'a Value),
}

impl AggregateFunction {
    /// All input functions
    pub const ALL: [AggregateFunction; 5] = [
        AggregateFunction::Sum,
        AggregateFunction::Count,
        AggregateFunction::Min,
        AggregateFunction::Max,
        AggregateFunction::Distinct,
    ];

    /// Lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            AggregateFunction::Sum => "sum",
            AggregateFunction::Count => "count",
            AggregateFunction::Min => "min",
            AggregateFunction::Max => "max",
            AggregateFunction::Distinct => "distinct",
        }
    }

    /// Whether a retraction can be expressed as a negated contribution
    pub fn is_invertible(self) -> bool {
        matches!(self, AggregateFunction::Sum | AggregateFunction::Count)
    }

    /// Whether partials are numeric
    pub fn is_numeric(self) -> bool {
        !matches!(self, AggregateFunction::Distinct)
    }

    /// Contribution of one record
    ///
    /// Invertible functions are multiplied by the operation's sign.
    /// Non-invertible functions contribute nothing to a retraction.
    /// `None` means the record leaves this aggregate untouched.
    pub fn contribution(self, input: Input<'_>, op: Operation) -> Option<Value> {
        let sign = op.sign();
        match self {
            AggregateFunction::Count => match input {
                Input::Unbound => Some(Value::from(sign)),
                Input::Missing => Some(Value::from(0)),
                Input::Present(v) => Some(Value::from(sign * i64::from(truthy(Some(v))))),
            },
            AggregateFunction::Sum => {
                let Input::Present(v) = input else { return None };
                if let Some(i) = as_integer(v) {
                    return i.checked_mul(sign).map(Value::from);
                }
                as_number(v).map(|x| number_value(x * sign as f64))
            }
            _ if op == Operation::Delete => None,
            AggregateFunction::Min | AggregateFunction::Max => {
                let Input::Present(v) = input else { return None };
                as_number(v).map(number_value)
            }
            AggregateFunction::Distinct => {
                let Input::Present(v) = input else { return None };
                let tokens = tokens(v);
                if tokens.is_empty() {
                    None
                } else {
                    Some(Value::String(tokens.join(LIST_SEPARATOR)))
                }
            }
        }
    }

    /// Merge a new partial into an existing one
    pub fn combine(self, new: &Value, existing: Option<&Value>) -> Value {
        self.fold_many(std::iter::once(new).chain(existing))
            .unwrap_or(Value::Null)
    }

    /// Fold any number of partials into one
    ///
    /// Returns `None` when no input carries a usable value.
    pub fn fold_many<'a, I>(self, values: I) -> Option<Value>
    where
        I: IntoIterator<Item = &'a Value>,
    {
        match self {
            AggregateFunction::Sum | AggregateFunction::Count => fold_sum(values),
            AggregateFunction::Min => fold_extreme(values, f64::min),
            AggregateFunction::Max => fold_extreme(values, f64::max),
            AggregateFunction::Distinct => fold_distinct(values),
        }
    }
}

fn fold_sum<'a, I>(values: I) -> Option<Value>
where
    I: IntoIterator<Item = &'a Value>,
{
    let mut int_total: Option<i64> = Some(0);
    let mut float_total = 0.0;
    let mut seen = false;

    for value in values {
        let Some(x) = as_number(value) else { continue };
        seen = true;
        float_total += x;
        int_total = match (int_total, as_integer(value)) {
            (Some(acc), Some(i)) => acc.checked_add(i),
            _ => None,
        };
    }

    if !seen {
        return None;
    }
    Some(match int_total {
        Some(total) => Value::from(total),
        None => number_value(float_total),
    })
}

fn fold_extreme<'a, I>(values: I, pick: fn(f64, f64) -> f64) -> Option<Value>
where
    I: IntoIterator<Item = &'a Value>,
{
    values
        .into_iter()
        .flat_map(numeric_tokens)
        .reduce(pick)
        .map(number_value)
}

fn fold_distinct<'a, I>(values: I) -> Option<Value>
where
    I: IntoIterator<Item = &'a Value>,
{
    let mut seen = false;
    let mut set = BTreeSet::new();
    for value in values {
        if value.is_null() {
            continue;
        }
        seen = true;
        set.extend(tokens(value));
    }
    seen.then(|| Value::String(set.into_iter().collect::<Vec<_>>().join(LIST_SEPARATOR)))
}

impl FromStr for AggregateFunction {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sum" => Ok(AggregateFunction::Sum),
            "count" => Ok(AggregateFunction::Count),
            "min" => Ok(AggregateFunction::Min),
            "max" => Ok(AggregateFunction::Max),
            "distinct" => Ok(AggregateFunction::Distinct),
            _ => Err(ConfigError::UnknownFunction(s.to_string())),
        }
    }
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output (fetch-side) function
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFunction {
    /// Sum across buckets and rows
    Sum,
    /// Maximum across buckets and rows
    Max,
    /// Minimum across buckets and rows
    Min,
}

impl OutputFunction {
    /// All output functions
    pub const ALL: [OutputFunction; 3] = [OutputFunction::Sum, OutputFunction::Max, OutputFunction::Min];

    /// Lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFunction::Sum => "sum",
            OutputFunction::Max => "max",
            OutputFunction::Min => "min",
        }
    }

    /// SQL aggregate applied over rows
    pub fn sql_aggregate(self) -> &'static str {
        match self {
            OutputFunction::Sum => "SUM",
            OutputFunction::Max => "MAX",
            OutputFunction::Min => "MIN",
        }
    }

    /// Literal substituted for missing partials
    ///
    /// Sums treat a missing bucket as zero. Extremes use a sentinel that
    /// can never win and is mapped back to NULL afterwards.
    pub fn null_escape(self) -> &'static str {
        match self {
            OutputFunction::Sum => "0",
            OutputFunction::Max => "-1e308",
            OutputFunction::Min => "1e308",
        }
    }

    /// Whether the result must be mapped back from the escape sentinel
    pub fn needs_sentinel(self) -> bool {
        !matches!(self, OutputFunction::Sum)
    }
}

impl FromStr for OutputFunction {
    type Err = FetchDataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sum" => Ok(OutputFunction::Sum),
            "max" => Ok(OutputFunction::Max),
            "min" => Ok(OutputFunction::Min),
            _ => Err(FetchDataError::UnknownFunction(s.to_string())),
        }
    }
}

impl fmt::Display for OutputFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
