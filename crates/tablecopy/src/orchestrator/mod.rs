//! Transfer coordinator - runs one batch copy per table.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{resolve, ConnectionSpec, TransferSettings};
use crate::core::factory::{ConnectionFactory, ConnectionPolicy, ConnectionRole};
use crate::core::registry::DriverRegistry;
use crate::core::schema::TableRef;
use crate::core::traits::Driver;
use crate::error::{CopyError, Result};
use crate::transfer::{BatchCopier, TransferResult};

/// Settings for one coordinator run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Rows per grouped write and commit.
    pub batch_size: usize,

    /// Upper bound on tables copied at once.
    pub max_concurrency: usize,

    pub connection_policy: ConnectionPolicy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self::from_settings(&TransferSettings::default())
    }
}

impl CoordinatorConfig {
    pub fn from_settings(settings: &TransferSettings) -> Self {
        Self {
            batch_size: settings.get_batch_size(),
            max_concurrency: settings.get_max_concurrency(),
            connection_policy: settings.get_connection_policy(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(CopyError::Config("batch size must be at least 1".into()));
        }
        if self.max_concurrency == 0 {
            return Err(CopyError::Config(
                "max concurrency must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Aggregate outcome of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferReport {
    /// One result per requested table, in request order.
    pub results: Vec<TransferResult>,

    pub started_at: DateTime<Utc>,

    pub completed_at: DateTime<Utc>,

    pub duration_seconds: f64,
}

impl TransferReport {
    /// True only when every table succeeded.
    pub fn is_success(&self) -> bool {
        self.results.iter().all(TransferResult::is_success)
    }

    pub fn failed_tables(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| !r.is_success())
            .map(|r| r.table.as_str())
            .collect()
    }

    pub fn total_rows(&self) -> u64 {
        self.results.iter().map(|r| r.rows_copied).sum()
    }

    pub fn result(&self, table: &str) -> Option<&TransferResult> {
        self.results.iter().find(|r| r.table == table)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Human-readable per-table listing.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        for r in &self.results {
            match r.failure_message() {
                None => out.push_str(&format!("  OK      {}: {} rows\n", r.table, r.rows_copied)),
                Some(message) => out.push_str(&format!(
                    "  FAILED  {}: {} rows committed - {}\n",
                    r.table, r.rows_copied, message
                )),
            }
        }
        let failed = self.failed_tables();
        out.push_str(&format!(
            "{} of {} tables copied, {} rows in {:.1}s",
            self.results.len() - failed.len(),
            self.results.len(),
            self.total_rows(),
            self.duration_seconds
        ));
        if !failed.is_empty() {
            out.push_str(&format!("\nFailed tables: {}", failed.join(", ")));
        }
        out
    }
}

/// Everything a table worker needs, shared across workers.
struct WorkerContext {
    factory: ConnectionFactory,
    source_driver: Arc<dyn Driver>,
    target_driver: Arc<dyn Driver>,
    source: ConnectionSpec,
    target: ConnectionSpec,
    batch_size: usize,
    cancel: CancellationToken,
}

/// Copies a list of tables from one connection to another, one worker
/// per table with bounded parallelism.
pub struct TransferCoordinator {
    registry: Arc<DriverRegistry>,
    config: CoordinatorConfig,
}

impl TransferCoordinator {
    pub fn new(registry: Arc<DriverRegistry>, config: CoordinatorConfig) -> Self {
        Self { registry, config }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Copy `tables` from `source` to `target`.
    ///
    /// Configuration problems (batch size, empty or malformed table list,
    /// unusable sharing policy) abort before any table starts. Everything
    /// else is recorded per table and the report is returned; a failed
    /// table never stops its siblings.
    pub async fn run(
        &self,
        tables: &[String],
        source: &ConnectionSpec,
        target: &ConnectionSpec,
        cancel: CancellationToken,
    ) -> Result<TransferReport> {
        self.config.validate()?;
        if tables.is_empty() {
            return Err(CopyError::Config("no tables to copy".into()));
        }
        let table_refs = tables
            .iter()
            .map(|t| TableRef::parse(t))
            .collect::<Result<Vec<_>>>()?;

        let started_at = Utc::now();
        let clock = Instant::now();

        let source_driver = self.registry.resolve(&resolve(source)?.db_type);
        let target_driver = self.registry.resolve(&resolve(target)?.db_type);

        let results = match (source_driver, target_driver) {
            (Ok(source_driver), Ok(target_driver)) => {
                let factory = ConnectionFactory::new(self.config.connection_policy);
                factory.sharing_for(source_driver.as_ref(), ConnectionRole::Source)?;
                factory.sharing_for(target_driver.as_ref(), ConnectionRole::Target)?;

                let ctx = Arc::new(WorkerContext {
                    factory,
                    source_driver,
                    target_driver,
                    source: source.clone(),
                    target: target.clone(),
                    batch_size: self.config.batch_size,
                    cancel,
                });
                let results = self.dispatch(&ctx, tables, table_refs).await;
                ctx.factory.close_all().await;
                results
            }
            // Every table depends on both connections.
            (Err(e), _) | (_, Err(e)) => {
                error!("Cannot copy any table: {}", e);
                tables
                    .iter()
                    .map(|t| TransferResult::failed(t, &e))
                    .collect()
            }
        };

        let report = TransferReport {
            results,
            started_at,
            completed_at: Utc::now(),
            duration_seconds: clock.elapsed().as_secs_f64(),
        };
        let failed = report.failed_tables().len();
        info!(
            "Transfer {}: {} tables ({} failed), {} rows in {:.1}s",
            if failed == 0 { "completed" } else { "failed" },
            report.results.len(),
            failed,
            report.total_rows(),
            report.duration_seconds
        );
        Ok(report)
    }

    async fn dispatch(
        &self,
        ctx: &Arc<WorkerContext>,
        names: &[String],
        tables: Vec<TableRef>,
    ) -> Vec<TransferResult> {
        let workers = self.config.max_concurrency.min(tables.len());
        let semaphore = Arc::new(Semaphore::new(workers));
        info!("Copying {} tables with {} workers", tables.len(), workers);

        let mut handles = Vec::with_capacity(tables.len());
        for (name, table) in names.iter().zip(tables) {
            let ctx = ctx.clone();
            let semaphore = semaphore.clone();
            let label = name.clone();
            let handle = tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        return TransferResult::failed(&label, &CopyError::Database(e.to_string()))
                    }
                };
                copy_one(&ctx, &label, table).await
            });
            handles.push((name.clone(), handle));
        }

        // Join barrier; results keep request order.
        let mut results = Vec::with_capacity(handles.len());
        for (name, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    error!("{}: task panicked - {}", name, e);
                    TransferResult::failed(
                        &name,
                        &CopyError::Database(format!("task panicked: {}", e)),
                    )
                }
            };
            results.push(result);
        }
        results
    }
}

async fn copy_one(ctx: &WorkerContext, name: &str, table: TableRef) -> TransferResult {
    if ctx.cancel.is_cancelled() {
        let err = CopyError::Cancelled {
            table: name.to_string(),
            row_offset: 0,
        };
        warn!("{}: skipped - {}", name, err);
        return TransferResult::failed(name, &err);
    }

    let source = match ctx
        .factory
        .acquire(ctx.source_driver.as_ref(), &ctx.source, ConnectionRole::Source)
        .await
    {
        Ok(handle) => handle,
        Err(e) => {
            error!("{}: failed - {}", name, e);
            return TransferResult::failed(name, &e);
        }
    };
    let target = match ctx
        .factory
        .acquire(ctx.target_driver.as_ref(), &ctx.target, ConnectionRole::Target)
        .await
    {
        Ok(handle) => handle,
        Err(e) => {
            error!("{}: failed - {}", name, e);
            ctx.factory.release(source).await;
            return TransferResult::failed(name, &e);
        }
    };

    let source_table = table
        .clone()
        .with_default_schema(ctx.source.schema_name.as_deref());
    let target_table = table.with_default_schema(ctx.target.schema_name.as_deref());

    let mut result = match BatchCopier::new(source.connection(), target.connection(), ctx.batch_size) {
        Ok(copier) => {
            copier
                .with_cancellation(ctx.cancel.clone())
                .copy(&source_table, &target_table)
                .await
        }
        Err(e) => TransferResult::failed(name, &e),
    };
    result.table = name.to_string();

    ctx.factory.release(source).await;
    ctx.factory.release(target).await;
    result
}
