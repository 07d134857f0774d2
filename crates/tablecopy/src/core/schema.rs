//! Table references, column metadata and catalog inspection.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::traits::Connection;
use crate::error::{CopyError, Result};

/// A possibly schema-qualified table name.
///
/// An unqualified reference is resolved by the database itself (search path,
/// current database or default schema), both when inspecting the catalog and
/// when executing generated statements, so the two always agree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    pub schema: Option<String>,
    pub name: String,
}

impl TableRef {
    pub fn new(schema: Option<&str>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.map(str::to_string),
            name: name.into(),
        }
    }

    /// Parse `table` or `schema.table`.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let parts: Vec<&str> = s.split('.').collect();
        let table = match parts.as_slice() {
            [name] => Self::new(None, *name),
            [schema, name] => Self::new(Some(schema), *name),
            _ => {
                return Err(CopyError::Config(format!(
                    "Invalid table name '{}': expected 'table' or 'schema.table'",
                    s
                )))
            }
        };
        if table.name.is_empty() || table.schema.as_deref() == Some("") {
            return Err(CopyError::Config(format!("Invalid table name '{}'", s)));
        }
        Ok(table)
    }

    /// Fill in `schema` when the reference is unqualified.
    pub fn with_default_schema(mut self, schema: Option<&str>) -> Self {
        if self.schema.is_none() {
            self.schema = schema.map(str::to_string);
        }
        self
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Column metadata as reported by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    /// Engine-specific type name (`int4`, `varchar`, `datetime2`, ...).
    pub data_type: String,
    pub is_nullable: bool,
    /// 1-based declared position.
    pub ordinal: i32,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, ordinal: i32) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            is_nullable: true,
            ordinal,
        }
    }
}

/// Ordered column list of one table.
///
/// The column order is the positional binding contract for both the source
/// SELECT and the target INSERT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub table: TableRef,
    pub columns: Vec<ColumnInfo>,
}

impl TableSchema {
    pub fn new(table: TableRef, columns: Vec<ColumnInfo>) -> Self {
        Self { table, columns }
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Same column list, addressed at a different table reference.
    pub fn retarget(&self, table: TableRef) -> TableSchema {
        TableSchema {
            table,
            columns: self.columns.clone(),
        }
    }
}

/// Derives a table's column list from catalog metadata.
///
/// A catalog query (rather than sampling a `SELECT *`) means an empty table
/// still yields its full column list.
pub struct SchemaInspector;

impl SchemaInspector {
    /// Column list of `table` in declared order.
    ///
    /// Fails with `TableNotFound` when the catalog has no columns for the
    /// table and with `SchemaQuery` for any other inspection failure.
    pub async fn columns_of(conn: &dyn Connection, table: &TableRef) -> Result<TableSchema> {
        let mut columns = conn
            .table_columns(table)
            .await
            .map_err(|e| e.or_classify(|m| CopyError::schema_query(table.to_string(), m)))?;

        if columns.is_empty() {
            return Err(CopyError::TableNotFound {
                table: table.to_string(),
            });
        }

        // Drivers already order by ordinal position; a stable sort keeps that
        // order and protects against catalogs that do not.
        columns.sort_by_key(|c| c.ordinal);

        debug!("{}: {} columns", table, columns.len());
        Ok(TableSchema::new(table.clone(), columns))
    }
}
