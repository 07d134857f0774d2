//! Per-table batch copy.
//!
//! [`BatchCopier`] streams rows from a source cursor into a prepared target
//! INSERT, grouping them into batches of a fixed size. Every full batch is
//! written in one grouped call and committed before the next one starts, so
//! a failure leaves the target holding exactly the committed prefix.
//!
//! ```text
//! Opening -> Streaming -> Flushing -> Committing -> Streaming ... -> Done
//!    \           \            \            \
//!     +-----------+------------+------------+--> Failed
//! ```

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::core::schema::{SchemaInspector, TableRef};
use crate::core::statement::StatementBuilder;
use crate::core::traits::{Connection, InsertStatement};
use crate::core::value::Batch;
use crate::error::{CopyError, FailureKind, Result};

/// Lifecycle of one table copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CopierState {
    Opening,
    Streaming,
    Flushing,
    Committing,
    Done,
    Failed,
}

impl CopierState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CopierState::Done | CopierState::Failed)
    }
}

impl fmt::Display for CopierState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CopierState::Opening => "opening",
            CopierState::Streaming => "streaming",
            CopierState::Flushing => "flushing",
            CopierState::Committing => "committing",
            CopierState::Done => "done",
            CopierState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// How a table copy ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TransferOutcome {
    Success,
    Failure {
        kind: FailureKind,
        message: String,
        /// Source row offset the failure was reached at, when row-level.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        row_offset: Option<u64>,
    },
}

/// Final outcome and row count for one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResult {
    pub table: String,

    /// Rows in committed batches.
    pub rows_copied: u64,

    /// Committed batches.
    pub batches: u64,

    pub duration_ms: u64,

    pub outcome: TransferOutcome,
}

impl TransferResult {
    pub fn success(table: impl Into<String>, rows_copied: u64, batches: u64) -> Self {
        Self {
            table: table.into(),
            rows_copied,
            batches,
            duration_ms: 0,
            outcome: TransferOutcome::Success,
        }
    }

    /// Failure before any row moved (driver, connection or setup errors).
    pub fn failed(table: impl Into<String>, err: &CopyError) -> Self {
        Self {
            table: table.into(),
            rows_copied: 0,
            batches: 0,
            duration_ms: 0,
            outcome: TransferOutcome::Failure {
                kind: err.kind(),
                message: err.to_string(),
                row_offset: err.row_offset(),
            },
        }
    }

    fn with_duration(mut self, started: Instant) -> Self {
        self.duration_ms = started.elapsed().as_millis() as u64;
        self
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, TransferOutcome::Success)
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match &self.outcome {
            TransferOutcome::Success => None,
            TransferOutcome::Failure { kind, .. } => Some(*kind),
        }
    }

    pub fn failure_message(&self) -> Option<&str> {
        match &self.outcome {
            TransferOutcome::Success => None,
            TransferOutcome::Failure { message, .. } => Some(message),
        }
    }

    pub fn row_offset(&self) -> Option<u64> {
        match &self.outcome {
            TransferOutcome::Success => None,
            TransferOutcome::Failure { row_offset, .. } => *row_offset,
        }
    }
}

/// Copies one table from a source connection to a target connection.
pub struct BatchCopier<'a> {
    source: &'a dyn Connection,
    target: &'a dyn Connection,
    batch_size: usize,
    cancel: CancellationToken,
    state: CopierState,
    /// Rows pulled from the cursor so far.
    rows_read: u64,
    rows_copied: u64,
    batches: u64,
}

impl<'a> BatchCopier<'a> {
    /// Fails with a configuration error when `batch_size` is zero.
    pub fn new(
        source: &'a dyn Connection,
        target: &'a dyn Connection,
        batch_size: usize,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(CopyError::Config("batch size must be at least 1".into()));
        }
        Ok(Self {
            source,
            target,
            batch_size,
            cancel: CancellationToken::new(),
            state: CopierState::Opening,
            rows_read: 0,
            rows_copied: 0,
            batches: 0,
        })
    }

    /// Abandon the copy at the next row or batch boundary once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn state(&self) -> CopierState {
        self.state
    }

    /// Copy `source_table` into `target_table`.
    ///
    /// Never returns an error: every failure is captured in the result,
    /// along with the rows committed before it.
    pub async fn copy(&mut self, source_table: &TableRef, target_table: &TableRef) -> TransferResult {
        let started = Instant::now();
        let name = source_table.to_string();

        match self.run(source_table, target_table).await {
            Ok(()) => {
                self.transition(&name, CopierState::Done);
                info!(
                    "{}: copied {} rows in {} batches ({:.1}s)",
                    name,
                    self.rows_copied,
                    self.batches,
                    started.elapsed().as_secs_f64()
                );
                TransferResult::success(&name, self.rows_copied, self.batches)
                    .with_duration(started)
            }
            Err(e) => {
                self.transition(&name, CopierState::Failed);
                error!(
                    "{}: failed after {} rows - {}",
                    name, self.rows_copied, e
                );
                TransferResult {
                    rows_copied: self.rows_copied,
                    batches: self.batches,
                    ..TransferResult::failed(&name, &e)
                }
                .with_duration(started)
            }
        }
    }

    async fn run(&mut self, source_table: &TableRef, target_table: &TableRef) -> Result<()> {
        let table = source_table.to_string();
        self.transition(&table, CopierState::Opening);

        let source_schema = SchemaInspector::columns_of(self.source, source_table).await?;
        let target_schema = source_schema.retarget(target_table.clone());

        let source_dialect = self.source.dialect();
        let target_dialect = self.target.dialect();
        let select_sql = StatementBuilder::new(source_dialect.as_ref()).build_select(&source_schema)?;
        let insert_sql = StatementBuilder::new(target_dialect.as_ref()).build_insert(&target_schema)?;
        debug!("{}: source query: {}", table, select_sql);
        debug!("{}: target statement: {}", table, insert_sql);

        let mut cursor = self
            .source
            .open_cursor(&select_sql, &source_schema)
            .await
            .map_err(|e| {
                e.or_classify(|message| CopyError::CursorOpen {
                    table: table.clone(),
                    message,
                })
            })?;
        let mut insert = self
            .target
            .prepare_insert(&insert_sql, &target_schema)
            .await
            .map_err(|e| {
                e.or_classify(|message| CopyError::StatementPrepare {
                    table: table.clone(),
                    message,
                })
            })?;

        self.transition(&table, CopierState::Streaming);
        let mut batch = Batch::with_capacity(self.batch_size, 0);

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return Err(CopyError::Cancelled {
                        table: table.clone(),
                        row_offset: self.rows_read,
                    });
                }
                next = cursor.next() => next,
            };

            let row = match next {
                None => break,
                Some(Ok(row)) => row,
                Some(Err(e)) => {
                    let row_offset = self.rows_read;
                    return Err(e.or_classify(|message| CopyError::Read {
                        table: table.clone(),
                        row_offset,
                        message,
                    }));
                }
            };

            let row_offset = self.rows_read;
            insert.bind_row(&row).map_err(|e| {
                e.or_classify(|message| CopyError::Bind {
                    table: table.clone(),
                    row_offset,
                    message,
                })
            })?;
            batch.push(row);
            self.rows_read += 1;

            if batch.is_full() {
                self.flush(&table, insert.as_mut(), batch.take()).await?;
                self.transition(&table, CopierState::Streaming);
            }
        }

        // Trailing partial batch; nothing to do when the row count was an
        // exact multiple of the batch size.
        if !batch.is_empty() {
            self.flush(&table, insert.as_mut(), batch.take()).await?;
        }
        Ok(())
    }

    async fn flush(
        &mut self,
        table: &str,
        insert: &mut dyn InsertStatement,
        batch: Batch,
    ) -> Result<()> {
        let row_offset = batch.first_row_offset;
        self.transition(table, CopierState::Flushing);

        if let Err(e) = insert.execute_batch(&batch).await {
            rollback_quietly(table, insert).await;
            return Err(e.or_classify(|message| CopyError::Write {
                table: table.to_string(),
                row_offset,
                message,
            }));
        }

        if self.target.is_transactional() {
            self.transition(table, CopierState::Committing);
            if let Err(e) = insert.commit().await {
                rollback_quietly(table, insert).await;
                return Err(e.or_classify(|message| CopyError::Commit {
                    table: table.to_string(),
                    row_offset,
                    message,
                }));
            }
        }

        self.rows_copied += batch.len() as u64;
        self.batches += 1;
        debug!(
            "{}: batch {} committed ({} rows, {} total)",
            table,
            self.batches,
            batch.len(),
            self.rows_copied
        );
        Ok(())
    }

    fn transition(&mut self, table: &str, next: CopierState) {
        if self.state != next {
            debug!("{}: {} -> {}", table, self.state, next);
            self.state = next;
        }
    }
}

async fn rollback_quietly(table: &str, insert: &mut dyn InsertStatement) {
    if let Err(e) = insert.rollback().await {
        debug!("{}: rollback failed: {}", table, e);
    }
}
