//! Core traits at the driver seam.
//!
//! The engine is written against these traits only; the built-in
//! PostgreSQL, MySQL and SQL Server drivers and any runtime-loaded plugin
//! implement them.
//!
//! - [`Driver`]: opens connections for one database type
//! - [`Connection`]: a live session (catalog, cursor, insert statement)
//! - [`InsertStatement`]: a prepared, reusable parameterized INSERT
//! - [`Dialect`]: identifier quoting and placeholder syntax

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use super::cursor::RowCursor;
use super::schema::{ColumnInfo, TableRef, TableSchema};
use super::value::{Batch, SqlValue};
use crate::config::ConnectionSpec;
use crate::error::Result;

/// SQL syntax strategy for one database engine.
pub trait Dialect: Send + Sync {
    /// Dialect name (e.g., "postgres", "mysql").
    fn name(&self) -> &str;

    /// Validate and quote an identifier.
    fn quote_ident(&self, name: &str) -> Result<String>;

    /// Positional parameter placeholder, `index` is 1-based.
    fn param_placeholder(&self, index: usize) -> String;

    /// Expression that reads `column` in the copy cursor.
    fn select_column(&self, column: &ColumnInfo) -> Result<String> {
        self.quote_ident(&column.name)
    }

    /// Quoted, optionally schema-qualified table name.
    fn qualify(&self, table: &TableRef) -> Result<String> {
        match &table.schema {
            Some(schema) => Ok(format!(
                "{}.{}",
                self.quote_ident(schema)?,
                self.quote_ident(&table.name)?
            )),
            None => self.quote_ident(&table.name),
        }
    }
}

/// What a driver's client library guarantees about one connection handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DriverCapabilities {
    /// Several cursors may run concurrently on one handle.
    pub concurrent_reads: bool,
    /// Several insert statements (and their transactions) may run
    /// concurrently on one handle.
    pub concurrent_writes: bool,
    /// Writes happen inside transactions that must be committed.
    pub transactional: bool,
}

/// A database driver, statically linked or loaded from a plugin.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Canonical database type tag (e.g. "postgres").
    fn name(&self) -> &str;

    /// Alternative tags resolving to this driver.
    fn aliases(&self) -> &[&str] {
        &[]
    }

    fn capabilities(&self) -> DriverCapabilities;

    fn dialect(&self) -> Arc<dyn Dialect>;

    /// Open a new session. Transport and authentication failures are
    /// reported as `CopyError::Connection`.
    async fn connect(&self, spec: &ConnectionSpec) -> Result<Box<dyn Connection>>;
}

/// A live database session.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Database type tag of the driver that opened this session.
    fn db_type(&self) -> &str;

    fn dialect(&self) -> Arc<dyn Dialect>;

    /// Whether writes on this session must be committed.
    fn is_transactional(&self) -> bool;

    /// Round-trip check used by health checks.
    async fn ping(&self) -> Result<()>;

    /// Columns of `table` from the catalog, in declared order.
    ///
    /// An empty list means the catalog has no such table.
    async fn table_columns(&self, table: &TableRef) -> Result<Vec<ColumnInfo>>;

    /// Open a forward-only, read-only cursor over `sql`.
    ///
    /// Rows are decoded positionally against `schema`.
    async fn open_cursor(&self, sql: &str, schema: &TableSchema) -> Result<RowCursor>;

    /// Prepare a reusable insert statement.
    async fn prepare_insert(
        &self,
        sql: &str,
        schema: &TableSchema,
    ) -> Result<Box<dyn InsertStatement>>;

    /// Release the session. Calling it more than once is harmless.
    async fn close(&self);
}

/// A prepared parameterized INSERT, reused for every batch of one table.
#[async_trait]
pub trait InsertStatement: Send {
    /// Number of positional parameters.
    fn parameter_count(&self) -> usize;

    /// Check that `row` can be bound: arity, and type compatibility where the
    /// driver knows the parameter types.
    fn bind_row(&self, row: &[SqlValue<'_>]) -> Result<()>;

    /// Submit `batch` as one grouped write. For transactional targets this
    /// opens a transaction that stays open until [`commit`](Self::commit)
    /// or [`rollback`](Self::rollback).
    async fn execute_batch(&mut self, batch: &Batch) -> Result<u64>;

    /// Make the last grouped write durable.
    async fn commit(&mut self) -> Result<()>;

    /// Abandon an uncommitted grouped write.
    async fn rollback(&mut self) -> Result<()>;
}

/// Arity check shared by driver statements.
pub fn check_arity(expected: usize, row: &[SqlValue<'_>]) -> std::result::Result<(), String> {
    if row.len() == expected {
        Ok(())
    } else {
        Err(format!(
            "row has {} values but the statement has {} parameters",
            row.len(),
            expected
        ))
    }
}
