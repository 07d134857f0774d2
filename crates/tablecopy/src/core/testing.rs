//! In-memory driver for unit tests.
//!
//! Tables live in a [`MemoryDatabase`] shared by every connection the
//! driver opens. Flushes and commits are counted, unique keys are enforced
//! on commit-visible rows, and most operations can be made to fail.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use super::cursor::RowCursor;
use super::schema::{ColumnInfo, TableRef, TableSchema};
use super::traits::{check_arity, Connection, Dialect, Driver, DriverCapabilities, InsertStatement};
use super::value::{Batch, Row, SqlNullType, SqlValue};
use crate::config::ConnectionSpec;
use crate::drivers::PostgresDialect;
use crate::error::{CopyError, Result};

#[derive(Debug, Clone, Default)]
pub struct MemoryStats {
    pub opened: usize,
    pub closed: usize,
    /// Row count of every `execute_batch` call, in order.
    pub flushes: Vec<usize>,
    pub commits: usize,
    pub rollbacks: usize,
    pub active_cursors: usize,
    pub peak_cursors: usize,
}

#[derive(Debug, Default)]
struct Faults {
    connect: Option<String>,
    schema: Option<String>,
    cursor_open: Option<String>,
    read_at: Option<u64>,
    panic_at: Option<u64>,
    prepare: Option<String>,
    /// 1-based flush number that fails.
    write_on: Option<usize>,
    /// 1-based commit number that fails.
    commit_on: Option<usize>,
    row_delay: Option<Duration>,
}

#[derive(Debug, Default)]
struct MemTable {
    columns: Vec<ColumnInfo>,
    rows: Vec<Row>,
    unique: Option<usize>,
    catalog_reversed: bool,
}

#[derive(Debug, Default)]
struct State {
    tables: HashMap<String, MemTable>,
    stats: MemoryStats,
    faults: Faults,
}

/// Shared table storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<State>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Create `name` with `(column, type)` pairs in declared order.
    pub fn create_table(&self, name: &str, columns: &[(&str, &str)]) -> &Self {
        let columns = columns
            .iter()
            .enumerate()
            .map(|(i, (c, t))| ColumnInfo::new(*c, *t, i as i32 + 1))
            .collect();
        self.lock().tables.insert(
            name.to_string(),
            MemTable {
                columns,
                ..Default::default()
            },
        );
        self
    }

    /// Enforce uniqueness of `column` in `table`.
    pub fn unique_key(&self, table: &str, column: &str) -> &Self {
        let mut state = self.lock();
        let t = state.tables.get_mut(table).unwrap();
        t.unique = t.columns.iter().position(|c| c.name == column);
        self
    }

    /// Report `table`'s catalog rows in reverse. Ordinals are unchanged.
    pub fn reverse_catalog(&self, table: &str) -> &Self {
        self.lock().tables.get_mut(table).unwrap().catalog_reversed = true;
        self
    }

    pub fn insert_rows(&self, table: &str, rows: Vec<Row>) -> &Self {
        self.lock().tables.get_mut(table).unwrap().rows.extend(rows);
        self
    }

    /// `count` rows of `(id, label)`, ids starting at 1.
    pub fn seed(&self, table: &str, count: usize) -> &Self {
        let rows = (1..=count as i64)
            .map(|i| vec![SqlValue::I64(i), SqlValue::from(format!("row-{}", i))])
            .collect();
        self.insert_rows(table, rows)
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.lock()
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> MemoryStats {
        self.lock().stats.clone()
    }

    pub fn fail_connect(&self, message: &str) {
        self.lock().faults.connect = Some(message.to_string());
    }

    pub fn fail_schema_query(&self, message: &str) {
        self.lock().faults.schema = Some(message.to_string());
    }

    pub fn fail_cursor_open(&self, message: &str) {
        self.lock().faults.cursor_open = Some(message.to_string());
    }

    /// Fail the read of the row at zero-based `offset`.
    pub fn fail_read_at(&self, offset: u64) {
        self.lock().faults.read_at = Some(offset);
    }

    /// Panic the cursor producer when it reaches zero-based `offset`.
    pub fn panic_read_at(&self, offset: u64) {
        self.lock().faults.panic_at = Some(offset);
    }

    pub fn fail_prepare(&self, message: &str) {
        self.lock().faults.prepare = Some(message.to_string());
    }

    /// Fail the `n`th (1-based) grouped write.
    pub fn fail_write_on(&self, n: usize) {
        self.lock().faults.write_on = Some(n);
    }

    /// Fail the `n`th (1-based) commit.
    pub fn fail_commit_on(&self, n: usize) {
        self.lock().faults.commit_on = Some(n);
    }

    /// Sleep before producing each row.
    pub fn row_delay(&self, delay: Duration) {
        self.lock().faults.row_delay = Some(delay);
    }
}

/// Driver over a [`MemoryDatabase`].
pub struct MemoryDriver {
    name: String,
    db: MemoryDatabase,
    capabilities: DriverCapabilities,
}

impl MemoryDriver {
    pub fn new(db: MemoryDatabase) -> Self {
        Self {
            name: "memory".to_string(),
            db,
            capabilities: DriverCapabilities {
                concurrent_reads: false,
                concurrent_writes: false,
                transactional: true,
            },
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_concurrency(mut self, reads: bool, writes: bool) -> Self {
        self.capabilities.concurrent_reads = reads;
        self.capabilities.concurrent_writes = writes;
        self
    }
}

#[async_trait]
impl Driver for MemoryDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> DriverCapabilities {
        self.capabilities
    }

    fn dialect(&self) -> Arc<dyn Dialect> {
        Arc::new(PostgresDialect::new())
    }

    async fn connect(&self, _spec: &ConnectionSpec) -> Result<Box<dyn Connection>> {
        let mut state = self.db.lock();
        if let Some(msg) = &state.faults.connect {
            return Err(CopyError::Database(msg.clone()));
        }
        state.stats.opened += 1;
        Ok(Box::new(MemoryConnection {
            db_type: self.name.clone(),
            db: self.db.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

struct MemoryConnection {
    db_type: String,
    db: MemoryDatabase,
    closed: AtomicBool,
}

/// Decrements the active cursor count when the producer ends or is aborted.
struct CursorGuard(MemoryDatabase);

impl Drop for CursorGuard {
    fn drop(&mut self) {
        self.0.lock().stats.active_cursors -= 1;
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    fn db_type(&self) -> &str {
        &self.db_type
    }

    fn dialect(&self) -> Arc<dyn Dialect> {
        Arc::new(PostgresDialect::new())
    }

    fn is_transactional(&self) -> bool {
        true
    }

    async fn ping(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CopyError::Database("connection is closed".into()));
        }
        Ok(())
    }

    async fn table_columns(&self, table: &TableRef) -> Result<Vec<ColumnInfo>> {
        let state = self.db.lock();
        if let Some(msg) = &state.faults.schema {
            return Err(CopyError::Database(msg.clone()));
        }
        Ok(state
            .tables
            .get(&table.to_string())
            .map(|t| {
                let mut columns = t.columns.clone();
                if t.catalog_reversed {
                    columns.reverse();
                }
                columns
            })
            .unwrap_or_default())
    }

    async fn open_cursor(&self, _sql: &str, schema: &TableSchema) -> Result<RowCursor> {
        let (rows, read_at, panic_at, delay) = {
            let mut state = self.db.lock();
            if let Some(msg) = &state.faults.cursor_open {
                return Err(CopyError::Database(msg.clone()));
            }
            let rows = state
                .tables
                .get(&schema.table.to_string())
                .map(|t| t.rows.clone())
                .ok_or_else(|| CopyError::Database("relation does not exist".into()))?;
            state.stats.active_cursors += 1;
            state.stats.peak_cursors = state.stats.peak_cursors.max(state.stats.active_cursors);
            (
                rows,
                state.faults.read_at,
                state.faults.panic_at,
                state.faults.row_delay,
            )
        };

        let guard = CursorGuard(self.db.clone());
        RowCursor::spawn(16, move |mut sink| async move {
            let _guard = guard;
            sink.opened();
            for (offset, row) in rows.into_iter().enumerate() {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                if panic_at == Some(offset as u64) {
                    panic!("cursor producer crashed at row {}", offset);
                }
                if read_at == Some(offset as u64) {
                    sink.fail(CopyError::Database("connection reset by peer".into()))
                        .await;
                    return;
                }
                if !sink.send(row).await {
                    return;
                }
            }
        })
        .await
    }

    async fn prepare_insert(
        &self,
        _sql: &str,
        schema: &TableSchema,
    ) -> Result<Box<dyn InsertStatement>> {
        let state = self.db.lock();
        if let Some(msg) = &state.faults.prepare {
            return Err(CopyError::Database(msg.clone()));
        }
        let key = schema.table.to_string();
        let table = state
            .tables
            .get(&key)
            .ok_or_else(|| CopyError::Database(format!("relation \"{}\" does not exist", key)))?;
        // Parameters bind by the statement's column list, not the table's
        // declared order.
        let positions: Vec<Option<usize>> = schema
            .columns
            .iter()
            .map(|c| table.columns.iter().position(|t| t.name == c.name))
            .collect();
        Ok(Box::new(MemoryInsert {
            db: self.db.clone(),
            table: key,
            types: positions
                .iter()
                .map(|p| p.map(|i| table.columns[i].data_type.clone()).unwrap_or_default())
                .collect(),
            positions,
            width: table.columns.len(),
            params: schema.column_count(),
            pending: None,
        }))
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.db.lock().stats.closed += 1;
        }
    }
}

struct MemoryInsert {
    db: MemoryDatabase,
    table: String,
    types: Vec<String>,
    /// Target column index of each parameter.
    positions: Vec<Option<usize>>,
    width: usize,
    params: usize,
    pending: Option<Vec<Row>>,
}

impl MemoryInsert {
    /// `row` rearranged into the target's declared column order.
    fn to_table_layout(&self, row: &Row) -> Result<Row> {
        let mut out = vec![SqlValue::Null(SqlNullType::String); self.width];
        for (value, position) in row.iter().zip(&self.positions) {
            let idx = position.ok_or_else(|| {
                CopyError::Database(format!("column does not exist in {}", self.table))
            })?;
            out[idx] = value.clone();
        }
        Ok(out)
    }
}

#[async_trait]
impl InsertStatement for MemoryInsert {
    fn parameter_count(&self) -> usize {
        self.params
    }

    fn bind_row(&self, row: &[SqlValue<'_>]) -> Result<()> {
        check_arity(self.params, row).map_err(CopyError::Database)?;
        for (value, ty) in row.iter().zip(&self.types) {
            if ty.starts_with("int") && matches!(value, SqlValue::Text(_)) {
                return Err(CopyError::Database(format!(
                    "cannot bind {} to column of type {}",
                    value.type_name(),
                    ty
                )));
            }
        }
        Ok(())
    }

    async fn execute_batch(&mut self, batch: &Batch) -> Result<u64> {
        let mut state = self.db.lock();
        state.stats.flushes.push(batch.len());
        if state.faults.write_on == Some(state.stats.flushes.len()) {
            return Err(CopyError::Database("write rejected".into()));
        }

        let rows = batch
            .rows
            .iter()
            .map(|r| self.to_table_layout(r))
            .collect::<Result<Vec<_>>>()?;
        let table = state
            .tables
            .get(&self.table)
            .ok_or_else(|| CopyError::Database("relation does not exist".into()))?;
        if let Some(col) = table.unique {
            let mut seen: HashSet<String> =
                table.rows.iter().map(|r| format!("{:?}", r[col])).collect();
            for row in &rows {
                if !seen.insert(format!("{:?}", row[col])) {
                    return Err(CopyError::Database(format!(
                        "duplicate key value violates unique constraint on {}",
                        table.columns[col].name
                    )));
                }
            }
        }

        self.pending = Some(rows);
        Ok(batch.len() as u64)
    }

    async fn commit(&mut self) -> Result<()> {
        let mut state = self.db.lock();
        if state.faults.commit_on == Some(state.stats.commits + 1) {
            state.stats.commits += 1;
            self.pending = None;
            return Err(CopyError::Database("could not serialize access".into()));
        }
        state.stats.commits += 1;
        if let Some(rows) = self.pending.take() {
            if let Some(table) = state.tables.get_mut(&self.table) {
                table.rows.extend(rows);
            }
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.pending = None;
        self.db.lock().stats.rollbacks += 1;
        Ok(())
    }
}
