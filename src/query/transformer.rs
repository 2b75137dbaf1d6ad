//! Fetch request to SQL execution plan
//!
//! One covered shard is queried directly (select mode). Several shards
//! each write one JSON partial per group into a scratch table (insert
//! mode), and a final SELECT re-merges the partials with the same output
//! functions.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::request::{output_field, Comparison, FetchColumn, FetchRequest};
use super::{TEMP_AGGREGATE_COLUMN, TEMP_TABLE_PREFIX};
use crate::aggregation::OutputFunction;
use crate::schema::{ColumnDef, ConfigModel, DataType, IndexKind};
use crate::shard::ShardSlice;
use crate::storage::Dialect;

/// One parameterized statement against one table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardQuery {
    /// Table read from
    pub table: String,
    /// SQL text with `?` placeholders
    pub sql: String,
    /// Bound parameters
    #[serde(default)]
    pub params: Vec<Value>,
}

/// Scratch table collecting per-shard partials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TempTableSpec {
    /// Table name
    pub name: String,
    /// Grouped pivots followed by the JSON partial column
    pub columns: Vec<ColumnDef>,
}

impl TempTableSpec {
    /// Quoted column list for INSERT statements
    pub fn column_list(&self, dialect: &Dialect) -> String {
        self.columns
            .iter()
            .map(|c| dialect.quote_ident(&c.name))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Execution plan for one fetch
#[derive(Debug, Clone, PartialEq)]
pub enum FetchPlan {
    /// No covered shard holds data
    Empty,
    /// One shard, queried directly
    Single(ShardQuery),
    /// Several shards recombined through a temp table
    Multi {
        /// Scratch table
        temp: TempTableSpec,
        /// Per-shard SELECTs producing temp table rows
        shards: Vec<ShardQuery>,
        /// Final re-merge over the temp table
        finalize: ShardQuery,
    },
}

impl FetchPlan {
    /// Mode label for logs and metrics
    pub fn mode(&self) -> &'static str {
        match self {
            FetchPlan::Empty => "empty",
            FetchPlan::Single(_) => "select",
            FetchPlan::Multi { .. } => "insert",
        }
    }

    /// Number of shard queries
    pub fn shard_count(&self) -> usize {
        match self {
            FetchPlan::Empty => 0,
            FetchPlan::Single(_) => 1,
            FetchPlan::Multi { shards, .. } => shards.len(),
        }
    }
}

/// Wrap a shard SELECT so it writes into the temp table
pub fn insert_into(temp: &TempTableSpec, dialect: &Dialect, query: &ShardQuery) -> ShardQuery {
    ShardQuery {
        table: query.table.clone(),
        sql: format!(
            "INSERT INTO {} ({}) {}",
            dialect.quote_ident(&temp.name),
            temp.column_list(dialect),
            query.sql
        ),
        params: query.params.clone(),
    }
}

/// Builds fetch plans for one column model and dialect
pub struct QueryTransformer<'a> {
    model: &'a ConfigModel,
    dialect: &'a Dialect,
}

impl<'a> QueryTransformer<'a> {
    /// Create a transformer
    pub fn new(model: &'a ConfigModel, dialect: &'a Dialect) -> Self {
        Self { model, dialect }
    }

    /// Plan a validated request over the shards that exist
    pub fn plan(&self, request: &FetchRequest, slices: &[ShardSlice]) -> FetchPlan {
        match slices {
            [] => FetchPlan::Empty,
            [only] => FetchPlan::Single(self.shard_select(request, only, false)),
            many => {
                let temp = self.temp_table(request);
                let shards = many
                    .iter()
                    .map(|slice| self.shard_select(request, slice, true))
                    .collect();
                let finalize = self.final_select(request, &temp);
                FetchPlan::Multi {
                    temp,
                    shards,
                    finalize,
                }
            }
        }
    }

    fn temp_table(&self, request: &FetchRequest) -> TempTableSpec {
        let mut columns: Vec<ColumnDef> = request
            .group_by
            .iter()
            .filter_map(|name| self.model.pivot_by_name(name))
            .map(|pivot| {
                let mut column = pivot.clone();
                column.index = IndexKind::Simple;
                column
            })
            .collect();
        columns.push(ColumnDef::new(TEMP_AGGREGATE_COLUMN, DataType::Json));

        TempTableSpec {
            name: format!("{}{}", TEMP_TABLE_PREFIX, Uuid::new_v4().simple()),
            columns,
        }
    }

    /// SELECT over one shard
    ///
    /// In insert mode the aggregate expressions are packed into one JSON
    /// object per group and no rounding is applied.
    fn shard_select(&self, request: &FetchRequest, slice: &ShardSlice, insert_mode: bool) -> ShardQuery {
        let d = self.dialect;
        let mut fields: Vec<(String, String)> = Vec::new();
        for column in &request.columns {
            for function in &column.functions {
                let operands: Vec<String> = slice
                    .columns
                    .iter()
                    .map(|interval| self.escaped(&d.json_extract(interval, &column.key), *function))
                    .collect();
                let expr = self.merge_expr(*function, &operands);
                let expr = if insert_mode { expr } else { round(expr, column) };
                fields.push((output_field(&column.key, *function), expr));
            }
        }

        let mut select = self.pivot_list(request);
        if insert_mode {
            select.push(format!(
                "{} AS {}",
                d.json_object(&fields),
                d.quote_ident(TEMP_AGGREGATE_COLUMN)
            ));
        } else {
            select.extend(fields.into_iter().map(|(alias, expr)| format!("{} AS {}", expr, d.quote_ident(&alias))));
        }

        let (where_sql, params) = self.where_clause(request);
        ShardQuery {
            table: slice.table.clone(),
            sql: format!(
                "SELECT {} FROM {}{}{}",
                select.join(", "),
                d.quote_ident(&slice.table),
                where_sql,
                self.group_clause(request)
            ),
            params,
        }
    }

    /// Re-merge of shard partials over the temp table
    fn final_select(&self, request: &FetchRequest, temp: &TempTableSpec) -> ShardQuery {
        let d = self.dialect;
        let mut select = self.pivot_list(request);
        for column in &request.columns {
            for function in &column.functions {
                let alias = output_field(&column.key, *function);
                let operand = self.escaped(&d.json_extract(TEMP_AGGREGATE_COLUMN, &alias), *function);
                let expr = round(self.merge_expr(*function, &[operand]), column);
                select.push(format!("{} AS {}", expr, d.quote_ident(&alias)));
            }
        }

        ShardQuery {
            table: temp.name.clone(),
            sql: format!(
                "SELECT {} FROM {}{}",
                select.join(", "),
                d.quote_ident(&temp.name),
                self.group_clause(request)
            ),
            params: Vec::new(),
        }
    }

    fn escaped(&self, expr: &str, function: OutputFunction) -> String {
        format!("COALESCE({}, {})", expr, function.null_escape())
    }

    /// Output function applied across interval operands and rows
    fn merge_expr(&self, function: OutputFunction, operands: &[String]) -> String {
        let row_wise = match (function, operands) {
            (_, [single]) => single.clone(),
            (OutputFunction::Sum, _) => operands.join(" + "),
            (OutputFunction::Max, _) => self.dialect.greatest(operands),
            (OutputFunction::Min, _) => self.dialect.least(operands),
        };
        let aggregated = format!("{}({})", function.sql_aggregate(), row_wise);
        if function.needs_sentinel() {
            format!("NULLIF({}, {})", aggregated, function.null_escape())
        } else {
            aggregated
        }
    }

    fn pivot_list(&self, request: &FetchRequest) -> Vec<String> {
        request
            .group_by
            .iter()
            .map(|pivot| self.dialect.quote_ident(pivot))
            .collect()
    }

    fn group_clause(&self, request: &FetchRequest) -> String {
        if request.group_by.is_empty() {
            String::new()
        } else {
            format!(" GROUP BY {}", self.pivot_list(request).join(", "))
        }
    }

    fn where_clause(&self, request: &FetchRequest) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let mut terms = Vec::with_capacity(request.filters.len());
        for predicate in &request.filters {
            let column = self.dialect.quote_ident(&predicate.column);
            match (&predicate.op, &predicate.value) {
                (Comparison::In, Value::Array(items)) => {
                    let marks = vec!["?"; items.len()].join(", ");
                    terms.push(format!("{} IN ({})", column, marks));
                    params.extend(items.iter().cloned());
                }
                (op, value) => {
                    terms.push(format!("{} {} ?", column, op.as_sql()));
                    params.push(value.clone());
                }
            }
        }

        if terms.is_empty() {
            (String::new(), params)
        } else {
            (format!(" WHERE {}", terms.join(" AND ")), params)
        }
    }
}

fn round(expr: String, column: &FetchColumn) -> String {
    match column.round {
        Some(precision) => format!("ROUND({}, {})", expr, precision),
        None => expr,
    }
}
