//! Fetch execution: plan, dispatch, re-merge, clean up

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::postprocess::shape_rows;
use super::request::FetchRequest;
use super::transformer::{FetchPlan, QueryTransformer};
use crate::dispatch::Dispatcher;
use crate::error::FetchDataError;
use crate::metrics;
use crate::schema::ConfigModel;
use crate::shard::ShardSlice;
use crate::storage::{ReportingStore, TableCatalog};
use crate::types::Row;

/// Runs fetch requests against the shard tables
pub struct FetchExecutor {
    model: Arc<ConfigModel>,
    store: Arc<dyn ReportingStore>,
    catalog: Arc<TableCatalog>,
    dispatcher: Dispatcher,
}

impl FetchExecutor {
    /// Create an executor
    pub fn new(
        model: Arc<ConfigModel>,
        store: Arc<dyn ReportingStore>,
        catalog: Arc<TableCatalog>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            model,
            store,
            catalog,
            dispatcher,
        }
    }

    /// Dispatcher in use
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Validate, plan and run a request
    ///
    /// Never returns partial results: any failure after the temp table is
    /// created drops it and surfaces the error.
    pub async fn execute(&self, request: &FetchRequest) -> Result<Vec<Row>, FetchDataError> {
        let started = Instant::now();
        request.validate(&self.model)?;

        let slices = self.existing_slices(request).await?;
        let plan = QueryTransformer::new(&self.model, self.store.dialect()).plan(request, &slices);
        let mode = plan.mode();
        debug!(mode, shards = plan.shard_count(), "Planned fetch");

        let result = self.run_plan(plan).await;
        metrics::record_fetch(mode, result.is_ok(), started.elapsed().as_secs_f64());

        let rows = shape_rows(request, result?);
        info!(mode, rows = rows.len(), elapsed_ms = started.elapsed().as_millis() as u64, "Fetch complete");
        Ok(rows)
    }

    /// Covered shards whose table exists
    async fn existing_slices(&self, request: &FetchRequest) -> Result<Vec<ShardSlice>, FetchDataError> {
        let mut existing = Vec::new();
        for slice in self.model.resolver().slices(&request.range)? {
            if self.catalog.exists(&slice.table).await? {
                existing.push(slice);
            } else {
                debug!(table = %slice.table, "Skipping missing shard table");
            }
        }
        Ok(existing)
    }

    async fn run_plan(&self, plan: FetchPlan) -> Result<Vec<Row>, FetchDataError> {
        match plan {
            FetchPlan::Empty => Ok(Vec::new()),
            FetchPlan::Single(query) => Ok(self.store.select(&query.sql, &query.params).await?),
            FetchPlan::Multi {
                temp,
                shards,
                finalize,
            } => {
                self.store
                    .create_table(&temp.name, &temp.columns)
                    .await
                    .map_err(|source| FetchDataError::TempTable {
                        table: temp.name.clone(),
                        source,
                    })?;

                let result = async {
                    self.dispatcher.dispatch(&temp, &shards).await?;
                    Ok::<_, FetchDataError>(self.store.select(&finalize.sql, &finalize.params).await?)
                }
                .await;

                if let Err(e) = self.store.drop_table(&temp.name).await {
                    warn!(table = %temp.name, error = %e, "Failed to drop temp table");
                }
                result
            }
        }
    }
}
