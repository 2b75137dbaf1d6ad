//! Validated, immutable column model
//!
//! [`ConfigModel`] is built once from the raw [`ColumnsConfig`] and
//! [`CommonConfig`] sections and then shared read-only (behind an `Arc`)
//! by the upsert pipeline, the query transformer and the engine.

pub mod column;

pub use column::{validate_identifier, ColumnDef, DataType, IndexKind};

use chrono::{TimeZone, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

use crate::aggregation::{AggregateFunction, Extras, Input, OutputFunction, RESERVED_PREFIX};
use crate::config::{ColumnsConfig, CommonConfig};
use crate::error::ConfigError;
use crate::query::TEMP_AGGREGATE_COLUMN;
use crate::shard::{DataInterval, Granularity, ShardResolver};
use crate::types::{Operation, Record};

/// Role a name plays in the column layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnRole {
    /// Primary hash column
    Primary,
    /// Group-by dimension
    Pivot,
    /// Record timestamp field (not stored)
    Timestamp,
    /// Aggregate key inside interval JSON
    Aggregate,
}

/// One metric's aggregation rule
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateDef {
    /// Key the partial is stored under
    pub key: String,
    /// Record field read as input
    pub input_field: Option<String>,
    /// Input function
    pub function: AggregateFunction,
    /// Output functions enabled for fetches
    pub outputs: Vec<OutputFunction>,
    /// Post-merge transforms
    pub extras: Extras,
}

impl AggregateDef {
    /// This aggregate's input in `record`
    pub fn input<'a>(&self, record: &'a Record) -> Input<'a> {
        match &self.input_field {
            None => Input::Unbound,
            Some(field) => match record.get(field) {
                None | Some(Value::Null) => Input::Missing,
                Some(value) => Input::Present(value),
            },
        }
    }

    /// Contribution of `record` under `op`
    pub fn contribution(&self, record: &Record, op: Operation) -> Option<Value> {
        self.function.contribution(self.input(record), op)
    }

    /// Whether a fetch may request `function` on this aggregate
    pub fn allows(&self, function: OutputFunction) -> bool {
        self.outputs.contains(&function)
    }
}

/// Validated column and sharding model
#[derive(Debug, Clone)]
pub struct ConfigModel {
    resolver: ShardResolver,
    timestamp_field: String,
    primary: ColumnDef,
    pivots: Vec<ColumnDef>,
    aggregates: BTreeMap<String, AggregateDef>,
}

impl ConfigModel {
    /// Validate the raw sections and build the model
    pub fn from_config(common: &CommonConfig, columns: &ColumnsConfig) -> Result<Self, ConfigError> {
        let granularity: Granularity = common.granularity.parse()?;
        let interval = DataInterval::new(common.data_interval)?;

        let template = &columns.interval_template;
        if !template.contains("{start}") || !template.contains("{end}") {
            return Err(ConfigError::Invalid(format!(
                "interval template '{}' must contain {{start}} and {{end}}",
                template
            )));
        }
        let resolver = ShardResolver::new(granularity, interval).with_template(template.clone());

        if columns.timestamp.trim().is_empty() {
            return Err(ConfigError::Missing("timestamp column".to_string()));
        }

        validate_identifier(&columns.primary.name)?;
        let primary = ColumnDef::new(columns.primary.name.clone(), DataType::String)
            .with_index(IndexKind::Primary)
            .with_length(columns.primary.length);

        // Every name that becomes a physical column must be unique
        let mut physical: HashSet<String> = HashSet::new();
        physical.insert(primary.name.clone());
        physical.insert(TEMP_AGGREGATE_COLUMN.to_string());

        let sample = Utc.timestamp_opt(0, 0).single().ok_or_else(|| {
            ConfigError::Invalid("cannot resolve sample shard".to_string())
        })?;
        for name in resolver.interval_column_names(&sample)? {
            validate_identifier(&name)?;
            if !physical.insert(name.clone()) {
                return Err(ConfigError::DuplicateColumn(name));
            }
        }

        let mut pivots = Vec::with_capacity(columns.pivots.len());
        for pivot in &columns.pivots {
            validate_identifier(&pivot.name)?;
            if !physical.insert(pivot.name.clone()) {
                return Err(ConfigError::DuplicateColumn(pivot.name.clone()));
            }
            let index: IndexKind = pivot.index.parse()?;
            if index == IndexKind::Primary {
                return Err(ConfigError::Invalid(format!(
                    "pivot '{}' cannot be the primary key",
                    pivot.name
                )));
            }
            let mut def = ColumnDef::new(pivot.name.clone(), pivot.data_type.parse()?).with_index(index);
            def.nullable = pivot.nullable;
            def.length = pivot.length;
            pivots.push(def);
        }

        if columns.aggregates.is_empty() {
            return Err(ConfigError::Missing("aggregates".to_string()));
        }

        let mut aggregates = BTreeMap::new();
        let mut json_keys: HashSet<String> = HashSet::new();
        for (key, raw) in &columns.aggregates {
            validate_identifier(key)?;
            if key.starts_with(RESERVED_PREFIX) {
                return Err(ConfigError::Invalid(format!(
                    "aggregate key '{}' uses the reserved prefix '{}'",
                    key, RESERVED_PREFIX
                )));
            }

            let function: AggregateFunction = raw.function.parse()?;
            if raw.input.is_none() && function != AggregateFunction::Count {
                return Err(ConfigError::Missing(format!("input field for aggregate '{}'", key)));
            }

            let mut outputs = Vec::new();
            for name in &raw.output {
                let output: OutputFunction = name
                    .parse()
                    .map_err(|_| ConfigError::UnknownFunction(name.clone()))?;
                if !outputs.contains(&output) {
                    outputs.push(output);
                }
            }
            if !function.is_numeric() && !outputs.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "aggregate '{}' stores {} partials and cannot declare numeric outputs",
                    key, function
                )));
            }

            let extras = Extras::parse(key, function, &raw.extras)?;
            for name in std::iter::once(key.clone()).chain(extras.derived_keys(key)) {
                if !json_keys.insert(name.clone()) {
                    return Err(ConfigError::DuplicateColumn(name));
                }
            }

            aggregates.insert(
                key.clone(),
                AggregateDef {
                    key: key.clone(),
                    input_field: raw.input.clone(),
                    function,
                    outputs,
                    extras,
                },
            );
        }

        Ok(Self {
            resolver,
            timestamp_field: columns.timestamp.clone(),
            primary,
            pivots,
            aggregates,
        })
    }

    /// Shard resolver for this deployment
    pub fn resolver(&self) -> &ShardResolver {
        &self.resolver
    }

    /// Shard granularity
    pub fn granularity(&self) -> Granularity {
        self.resolver.granularity()
    }

    /// Bucket width in minutes
    pub fn data_interval_minutes(&self) -> u32 {
        self.resolver.data_interval().minutes()
    }

    /// Record field holding the event timestamp
    pub fn timestamp_field(&self) -> &str {
        &self.timestamp_field
    }

    /// Primary hash column
    pub fn primary(&self) -> &ColumnDef {
        &self.primary
    }

    /// Pivot columns in declaration order
    pub fn pivots(&self) -> &[ColumnDef] {
        &self.pivots
    }

    /// Pivot column by name
    pub fn pivot_by_name(&self, name: &str) -> Option<&ColumnDef> {
        self.pivots.iter().find(|p| p.name == name)
    }

    /// Aggregates ordered by key
    pub fn aggregates(&self) -> impl Iterator<Item = &AggregateDef> {
        self.aggregates.values()
    }

    /// Aggregate by key
    pub fn aggregate_by_key(&self, key: &str) -> Option<&AggregateDef> {
        self.aggregates.get(key)
    }

    /// Every configured name and the role it plays
    pub fn column_mapping(&self) -> BTreeMap<String, ColumnRole> {
        let mut mapping = BTreeMap::new();
        mapping.insert(self.primary.name.clone(), ColumnRole::Primary);
        mapping.insert(self.timestamp_field.clone(), ColumnRole::Timestamp);
        for pivot in &self.pivots {
            mapping.insert(pivot.name.clone(), ColumnRole::Pivot);
        }
        for key in self.aggregates.keys() {
            mapping.insert(key.clone(), ColumnRole::Aggregate);
        }
        mapping
    }
}
