//! Error types for the copy engine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Exit code for configuration errors.
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Exit code when a connection could not be opened.
pub const EXIT_CONNECTION_ERROR: u8 = 2;
/// Exit code when a driver could not be resolved or loaded.
pub const EXIT_DRIVER_ERROR: u8 = 3;
/// Exit code when at least one table transfer failed.
pub const EXIT_TRANSFER_FAILED: u8 = 4;
/// Exit code when the run was cancelled.
pub const EXIT_CANCELLED: u8 = 5;
/// Exit code for filesystem errors.
pub const EXIT_IO_ERROR: u8 = 7;

/// Main error type for copy operations.
#[derive(Error, Debug)]
pub enum CopyError {
    /// Configuration error (bad batch size, missing connection, invalid YAML content).
    #[error("Configuration error: {0}")]
    Config(String),

    /// No driver is registered for a database type tag.
    #[error("No driver registered for database type '{db_type}' (available: {available})")]
    DriverNotFound { db_type: String, available: String },

    /// A driver artifact exists but could not be initialized.
    #[error("Failed to load driver from {path}: {reason}")]
    DriverLoad { path: String, reason: String },

    /// Opening a connection failed (transport or authentication).
    #[error("Connection '{name}' failed: {message}")]
    Connection { name: String, message: String },

    /// The catalog reports no such table.
    #[error("Table {table} not found")]
    TableNotFound { table: String },

    /// Catalog inspection failed for another reason.
    #[error("Schema query failed for {table}: {message}")]
    SchemaQuery { table: String, message: String },

    /// The source cursor could not be opened.
    #[error("Failed to open cursor on {table}: {message}")]
    CursorOpen { table: String, message: String },

    /// The target INSERT could not be prepared.
    #[error("Failed to prepare insert into {table}: {message}")]
    StatementPrepare { table: String, message: String },

    /// A row value could not be bound to the target statement.
    #[error("Bind failed for {table} at row {row_offset}: {message}")]
    Bind {
        table: String,
        row_offset: u64,
        message: String,
    },

    /// Reading from the source cursor failed mid-stream.
    #[error("Read failed for {table} at row {row_offset}: {message}")]
    Read {
        table: String,
        row_offset: u64,
        message: String,
    },

    /// A grouped write was rejected by the target.
    #[error("Write failed for {table} in batch starting at row {row_offset}: {message}")]
    Write {
        table: String,
        row_offset: u64,
        message: String,
    },

    /// Committing a flushed batch failed.
    #[error("Commit failed for {table} in batch starting at row {row_offset}: {message}")]
    Commit {
        table: String,
        row_offset: u64,
        message: String,
    },

    /// The transfer was cancelled at a row or batch boundary.
    #[error("Transfer of {table} cancelled at row {row_offset}")]
    Cancelled { table: String, row_offset: u64 },

    /// Error raised by a database client library without further context.
    #[error("Database error: {0}")]
    Database(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serializable failure category recorded in transfer results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Configuration,
    DriverNotFound,
    DriverLoad,
    Connection,
    TableNotFound,
    SchemaQuery,
    CursorOpen,
    StatementPrepare,
    Bind,
    Read,
    Write,
    Commit,
    Cancelled,
    Internal,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::Configuration => "configuration",
            FailureKind::DriverNotFound => "driver_not_found",
            FailureKind::DriverLoad => "driver_load",
            FailureKind::Connection => "connection",
            FailureKind::TableNotFound => "table_not_found",
            FailureKind::SchemaQuery => "schema_query",
            FailureKind::CursorOpen => "cursor_open",
            FailureKind::StatementPrepare => "statement_prepare",
            FailureKind::Bind => "bind",
            FailureKind::Read => "read",
            FailureKind::Write => "write",
            FailureKind::Commit => "commit",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

impl CopyError {
    /// Create a Connection error for a named endpoint.
    pub fn connection(name: impl Into<String>, message: impl ToString) -> Self {
        CopyError::Connection {
            name: name.into(),
            message: message.to_string(),
        }
    }

    /// Create a DriverLoad error.
    pub fn driver_load(path: impl Into<String>, reason: impl Into<String>) -> Self {
        CopyError::DriverLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a SchemaQuery error.
    pub fn schema_query(table: impl Into<String>, message: impl ToString) -> Self {
        CopyError::SchemaQuery {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Failure category of this error.
    pub fn kind(&self) -> FailureKind {
        match self {
            CopyError::Config(_) | CopyError::Yaml(_) | CopyError::Json(_) => {
                FailureKind::Configuration
            }
            CopyError::DriverNotFound { .. } => FailureKind::DriverNotFound,
            CopyError::DriverLoad { .. } => FailureKind::DriverLoad,
            CopyError::Connection { .. } => FailureKind::Connection,
            CopyError::TableNotFound { .. } => FailureKind::TableNotFound,
            CopyError::SchemaQuery { .. } => FailureKind::SchemaQuery,
            CopyError::CursorOpen { .. } => FailureKind::CursorOpen,
            CopyError::StatementPrepare { .. } => FailureKind::StatementPrepare,
            CopyError::Bind { .. } => FailureKind::Bind,
            CopyError::Read { .. } => FailureKind::Read,
            CopyError::Write { .. } => FailureKind::Write,
            CopyError::Commit { .. } => FailureKind::Commit,
            CopyError::Cancelled { .. } => FailureKind::Cancelled,
            CopyError::Database(_) | CopyError::Io(_) => FailureKind::Internal,
        }
    }

    /// Row offset at which a row-level failure occurred, if any.
    pub fn row_offset(&self) -> Option<u64> {
        match self {
            CopyError::Bind { row_offset, .. }
            | CopyError::Read { row_offset, .. }
            | CopyError::Write { row_offset, .. }
            | CopyError::Commit { row_offset, .. }
            | CopyError::Cancelled { row_offset, .. } => Some(*row_offset),
            _ => None,
        }
    }

    /// Keep already-classified errors, and turn generic client errors into
    /// the classified error built by `f`.
    pub fn or_classify(self, f: impl FnOnce(String) -> CopyError) -> CopyError {
        match self {
            CopyError::Database(message) => f(message),
            CopyError::Io(e) => f(e.to_string()),
            other => other,
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self.kind() {
            FailureKind::Configuration => EXIT_CONFIG_ERROR,
            FailureKind::Connection => EXIT_CONNECTION_ERROR,
            FailureKind::DriverNotFound | FailureKind::DriverLoad => EXIT_DRIVER_ERROR,
            FailureKind::Cancelled => EXIT_CANCELLED,
            FailureKind::Internal if matches!(self, CopyError::Io(_)) => EXIT_IO_ERROR,
            _ => EXIT_TRANSFER_FAILED,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

impl From<tokio_postgres::Error> for CopyError {
    fn from(e: tokio_postgres::Error) -> Self {
        // The top-level Display of a server error is just "db error"; the
        // useful text lives in the DbError source.
        match e.as_db_error() {
            Some(db) => CopyError::Database(format!("{}: {}", db.code().code(), db.message())),
            None => CopyError::Database(e.to_string()),
        }
    }
}

#[cfg(feature = "mysql")]
impl From<mysql_async::Error> for CopyError {
    fn from(e: mysql_async::Error) -> Self {
        CopyError::Database(e.to_string())
    }
}

#[cfg(feature = "mssql")]
impl From<tiberius::error::Error> for CopyError {
    fn from(e: tiberius::error::Error) -> Self {
        CopyError::Database(e.to_string())
    }
}

/// Result type alias for copy operations.
pub type Result<T> = std::result::Result<T, CopyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        let e = CopyError::TableNotFound {
            table: "public.ghost_table".into(),
        };
        assert_eq!(e.kind(), FailureKind::TableNotFound);
        assert_eq!(e.row_offset(), None);

        let e = CopyError::Write {
            table: "orders".into(),
            row_offset: 20_000,
            message: "duplicate key".into(),
        };
        assert_eq!(e.kind(), FailureKind::Write);
        assert_eq!(e.row_offset(), Some(20_000));
    }

    #[test]
    fn test_or_classify_wraps_only_generic_errors() {
        let generic = CopyError::Database("boom".into());
        let classified = generic.or_classify(|m| CopyError::schema_query("t", m));
        assert_eq!(classified.kind(), FailureKind::SchemaQuery);
        assert!(classified.to_string().contains("boom"));

        let specific = CopyError::TableNotFound { table: "t".into() };
        let kept = specific.or_classify(|m| CopyError::schema_query("t", m));
        assert_eq!(kept.kind(), FailureKind::TableNotFound);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(CopyError::Config("x".into()).exit_code(), EXIT_CONFIG_ERROR);
        assert_eq!(
            CopyError::connection("source", "refused").exit_code(),
            EXIT_CONNECTION_ERROR
        );
        assert_eq!(
            CopyError::DriverNotFound {
                db_type: "oracle".into(),
                available: "postgres".into()
            }
            .exit_code(),
            EXIT_DRIVER_ERROR
        );
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert_eq!(CopyError::Io(io).exit_code(), EXIT_IO_ERROR);
    }

    #[test]
    fn test_format_detailed_includes_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "config.yaml missing");
        let err = CopyError::Io(io);
        let detailed = err.format_detailed();
        assert!(detailed.starts_with("Error: IO error"));
        assert!(detailed.contains("config.yaml missing"));
    }

    #[test]
    fn test_failure_kind_serializes_snake_case() {
        let json = serde_json::to_string(&FailureKind::TableNotFound).unwrap();
        assert_eq!(json, "\"table_not_found\"");
    }
}
