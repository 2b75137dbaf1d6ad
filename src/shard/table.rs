//! Physical layout of a shard table

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::ShardError;
use crate::schema::{ColumnDef, ConfigModel, DataType};
use crate::shard::Granularity;

/// One physical shard table
///
/// Column order: primary hash, pivots in declaration order, then the
/// interval columns in time order. The interval column count is fixed
/// when the table is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardTable {
    /// Table name
    pub name: String,
    /// Shard span
    pub granularity: Granularity,
    /// First instant covered
    pub base: NaiveDateTime,
    /// Column layout
    pub columns: Vec<ColumnDef>,
    interval_start: usize,
}

impl ShardTable {
    /// Layout of the shard containing `instant`
    pub fn for_instant(model: &ConfigModel, instant: &DateTime<Utc>) -> Result<Self, ShardError> {
        let resolver = model.resolver();
        let base = resolver.shard_base(instant)?;
        let name = resolver.table_name(instant)?;

        let mut columns = Vec::with_capacity(1 + model.pivots().len() + resolver.interval_column_count() as usize);
        columns.push(model.primary().clone());
        columns.extend(model.pivots().iter().cloned());
        let interval_start = columns.len();
        columns.extend(
            resolver
                .interval_column_names(instant)?
                .into_iter()
                .map(|column| ColumnDef::new(column, DataType::Json).nullable()),
        );

        Ok(Self {
            name,
            granularity: resolver.granularity(),
            base,
            columns,
            interval_start,
        })
    }

    /// Interval columns in time order
    pub fn interval_columns(&self) -> &[ColumnDef] {
        &self.columns[self.interval_start..]
    }

    /// Column by name
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::schema::IndexKind;
    use chrono::TimeZone;

    #[test]
    fn test_daily_layout() {
        let model = Config::default().model().unwrap();
        let instant = Utc.with_ymd_and_hms(2024, 3, 1, 9, 15, 0).unwrap();
        let table = ShardTable::for_instant(&model, &instant).unwrap();

        assert_eq!(table.name, "Daily_2024_03_01");
        assert_eq!(table.columns.len(), 1 + 3 + 24);
        assert_eq!(table.columns[0].name, "hash_id");
        assert_eq!(table.columns[0].index, IndexKind::Primary);
        assert_eq!(table.columns[1].name, "client");

        let intervals = table.interval_columns();
        assert_eq!(intervals.len(), 24);
        assert_eq!(intervals[0].name, "interval_0_1");
        assert!(intervals.iter().all(|c| c.nullable && c.data_type == DataType::Json));
        assert!(table.column("interval_9_10").is_some());
    }
}
