//! Fetch requests and their validation against the column model
//!
//! A [`FetchRequest`] names a half-open time range, the aggregate keys and
//! output functions to compute, optional pivot grouping, pivot filters and
//! an ordering. Validation happens before any I/O.
//!
//! ```rust,ignore
//! let request = FetchRequest::builder()
//!     .from("2024-01-01 00:00:00")
//!     .to("2024-01-03 00:00:00")
//!     .select("total_cost", &["sum", "max"])
//!     .group_by("client")
//!     .filter("carrier", "in", json!(["a", "b"]))
//!     .order_by("total_cost_sum", "desc")
//!     .build()?;
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::aggregation::OutputFunction;
use crate::error::FetchDataError;
use crate::schema::ConfigModel;
use crate::types::{parse_instant_str, TimeRange};

/// Separator between an aggregate key and its output function in field names
pub const FIELD_SEPARATOR: &str = "_";

/// Output field name for `key` under `function`
pub fn output_field(key: &str, function: OutputFunction) -> String {
    format!("{}{}{}", key, FIELD_SEPARATOR, function.as_str())
}

// =============================================================================
// Request Parts
// =============================================================================

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    /// Ascending
    Asc,
    /// Descending
    Desc,
}

impl FromStr for SortDirection {
    type Err = FetchDataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            _ => Err(FetchDataError::InvalidOrderDirection(s.to_string())),
        }
    }
}

/// Where-clause comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Comparison {
    /// `=`
    #[serde(rename = "=")]
    Eq,
    /// `!=`
    #[serde(rename = "!=")]
    Ne,
    /// `<`
    #[serde(rename = "<")]
    Lt,
    /// `<=`
    #[serde(rename = "<=")]
    Le,
    /// `>`
    #[serde(rename = ">")]
    Gt,
    /// `>=`
    #[serde(rename = ">=")]
    Ge,
    /// Membership in a list
    #[serde(rename = "in")]
    In,
    /// SQL pattern match
    #[serde(rename = "like")]
    Like,
}

impl Comparison {
    /// SQL spelling
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::In => "IN",
            Self::Like => "LIKE",
        }
    }
}

impl FromStr for Comparison {
    type Err = FetchDataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "=" | "==" => Ok(Self::Eq),
            "!=" | "<>" => Ok(Self::Ne),
            "<" => Ok(Self::Lt),
            "<=" => Ok(Self::Le),
            ">" => Ok(Self::Gt),
            ">=" => Ok(Self::Ge),
            "in" => Ok(Self::In),
            "like" => Ok(Self::Like),
            _ => Err(FetchDataError::InvalidPredicate(format!("unknown operator '{}'", s))),
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// One requested aggregate and the output functions to compute over it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchColumn {
    /// Aggregate key
    pub key: String,
    /// Output functions
    pub functions: Vec<OutputFunction>,
    /// Round results to this many decimals
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round: Option<u32>,
}

impl FetchColumn {
    /// Request `functions` over `key`
    pub fn new(key: impl Into<String>, functions: Vec<OutputFunction>) -> Self {
        Self {
            key: key.into(),
            functions,
            round: None,
        }
    }

    /// Round results
    pub fn with_round(mut self, precision: u32) -> Self {
        self.round = Some(precision);
        self
    }

    /// Output field names produced by this column
    pub fn fields(&self) -> impl Iterator<Item = String> + '_ {
        self.functions.iter().map(|f| output_field(&self.key, *f))
    }
}

/// Pivot filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WherePredicate {
    /// Pivot column
    pub column: String,
    /// Operator
    pub op: Comparison,
    /// Scalar operand, or a list for `in`
    pub value: Value,
}

impl WherePredicate {
    /// Build a predicate
    pub fn new(column: impl Into<String>, op: Comparison, value: Value) -> Self {
        Self {
            column: column.into(),
            op,
            value,
        }
    }

    fn check_operand(&self) -> Result<(), FetchDataError> {
        let scalar = |v: &Value| matches!(v, Value::String(_) | Value::Number(_) | Value::Bool(_));
        let ok = match (&self.op, &self.value) {
            (Comparison::In, Value::Array(items)) => !items.is_empty() && items.iter().all(scalar),
            (Comparison::In, _) => false,
            (Comparison::Like, v) => v.is_string(),
            (_, v) => scalar(v),
        };
        if ok {
            Ok(())
        } else {
            Err(FetchDataError::InvalidPredicate(format!(
                "{} {} {}",
                self.column, self.op, self.value
            )))
        }
    }
}

/// Sort key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    /// Pivot, aggregate key or output field
    pub column: String,
    /// Direction
    pub direction: SortDirection,
}

// =============================================================================
// Fetch Request
// =============================================================================

/// A range query over the rollup tables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchRequest {
    /// `[start, end)`
    pub range: TimeRange,
    /// Requested aggregates
    pub columns: Vec<FetchColumn>,
    /// Pivots to group by
    #[serde(default)]
    pub group_by: Vec<String>,
    /// Pivot filters, combined with AND
    #[serde(default)]
    pub filters: Vec<WherePredicate>,
    /// Sort keys, first non-equal key decides
    #[serde(default)]
    pub order_by: Vec<OrderBy>,
}

impl FetchRequest {
    /// Start a fluent request
    pub fn builder() -> FetchRequestBuilder {
        FetchRequestBuilder::default()
    }

    /// Output field names in request order
    pub fn output_fields(&self) -> Vec<String> {
        self.columns.iter().flat_map(FetchColumn::fields).collect()
    }

    /// Check the request against the column model
    pub fn validate(&self, model: &ConfigModel) -> Result<(), FetchDataError> {
        TimeRange::new(self.range.start, self.range.end)?;
        if self.columns.is_empty() {
            return Err(FetchDataError::EmptyColumns);
        }

        let mut seen = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            let aggregate = model
                .aggregate_by_key(&column.key)
                .ok_or_else(|| FetchDataError::UnknownColumn(column.key.clone()))?;
            if seen.contains(&column.key.as_str()) {
                return Err(FetchDataError::UnknownColumn(format!("{} requested twice", column.key)));
            }
            seen.push(column.key.as_str());

            if column.functions.is_empty() {
                return Err(FetchDataError::UnknownFunction(format!("none requested for {}", column.key)));
            }
            for function in &column.functions {
                if !aggregate.allows(*function) {
                    return Err(FetchDataError::FunctionNotAllowed {
                        column: column.key.clone(),
                        function: function.as_str().to_string(),
                    });
                }
            }
        }

        for pivot in &self.group_by {
            if model.pivot_by_name(pivot).is_none() {
                return Err(FetchDataError::UnknownPivot(pivot.clone()));
            }
        }

        for predicate in &self.filters {
            if model.pivot_by_name(&predicate.column).is_none() {
                return Err(FetchDataError::UnknownPivot(predicate.column.clone()));
            }
            predicate.check_operand()?;
        }

        for order in &self.order_by {
            if self.sort_field(&order.column).is_none() {
                return Err(FetchDataError::InvalidOrderColumn(order.column.clone()));
            }
        }

        Ok(())
    }

    /// Result field an order-by column sorts on
    ///
    /// A grouped pivot and an output field name resolve to themselves. A
    /// bare aggregate key resolves to its output field when exactly one
    /// function is requested for it.
    pub fn sort_field(&self, column: &str) -> Option<String> {
        if self.group_by.iter().any(|p| p == column) {
            return Some(column.to_string());
        }
        if let Some(requested) = self.columns.iter().find(|c| c.key == column) {
            return match requested.functions.as_slice() {
                [only] => Some(output_field(column, *only)),
                _ => None,
            };
        }
        self.output_fields().into_iter().find(|field| field == column)
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Fluent builder for [`FetchRequest`]
///
/// Parse errors are held until [`build`](Self::build) so calls can be
/// chained; the first error wins.
#[derive(Debug, Default)]
pub struct FetchRequestBuilder {
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    columns: Vec<FetchColumn>,
    group_by: Vec<String>,
    filters: Vec<WherePredicate>,
    order_by: Vec<OrderBy>,
    error: Option<FetchDataError>,
}

impl FetchRequestBuilder {
    fn fail(&mut self, error: FetchDataError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    fn parse_date(&mut self, value: &str) -> Option<DateTime<Utc>> {
        let parsed = parse_instant_str(value);
        if parsed.is_none() {
            self.fail(FetchDataError::InvalidDate(value.to_string()));
        }
        parsed
    }

    /// Range start, `YYYY-MM-DD HH:MM:SS` or RFC 3339
    pub fn from(mut self, start: &str) -> Self {
        self.start = self.parse_date(start);
        self
    }

    /// Range end (exclusive)
    pub fn to(mut self, end: &str) -> Self {
        self.end = self.parse_date(end);
        self
    }

    /// Range from instants
    pub fn between(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    /// Request output functions over an aggregate key
    pub fn select(mut self, key: &str, functions: &[&str]) -> Self {
        let mut parsed = Vec::with_capacity(functions.len());
        for name in functions {
            match name.parse::<OutputFunction>() {
                Ok(function) if !parsed.contains(&function) => parsed.push(function),
                Ok(_) => {}
                Err(e) => self.fail(e),
            }
        }
        self.columns.push(FetchColumn::new(key, parsed));
        self
    }

    /// Add a prepared column
    pub fn column(mut self, column: FetchColumn) -> Self {
        self.columns.push(column);
        self
    }

    /// Filter on a pivot
    pub fn filter(mut self, column: &str, op: &str, value: Value) -> Self {
        match op.parse::<Comparison>() {
            Ok(op) => self.filters.push(WherePredicate::new(column, op, value)),
            Err(e) => self.fail(e),
        }
        self
    }

    /// Group by a pivot
    pub fn group_by(mut self, pivot: &str) -> Self {
        self.group_by.push(pivot.to_string());
        self
    }

    /// Sort by a pivot, aggregate key or output field
    pub fn order_by(mut self, column: &str, direction: &str) -> Self {
        match direction.parse::<SortDirection>() {
            Ok(direction) => self.order_by.push(OrderBy {
                column: column.to_string(),
                direction,
            }),
            Err(e) => self.fail(e),
        }
        self
    }

    /// Finish the request
    ///
    /// Checks the shape only; column names are checked against the model
    /// by [`FetchRequest::validate`].
    pub fn build(self) -> Result<FetchRequest, FetchDataError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        let start = self
            .start
            .ok_or_else(|| FetchDataError::InvalidDate("missing range start".to_string()))?;
        let end = self
            .end
            .ok_or_else(|| FetchDataError::InvalidDate("missing range end".to_string()))?;
        let range = TimeRange::new(start, end)?;
        if self.columns.is_empty() {
            return Err(FetchDataError::EmptyColumns);
        }

        Ok(FetchRequest {
            range,
            columns: self.columns,
            group_by: self.group_by,
            filters: self.filters,
            order_by: self.order_by,
        })
    }
}
