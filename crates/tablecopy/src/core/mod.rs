//! Core abstractions for database-agnostic table copying.
//!
//! - [`traits`]: the driver seam (`Driver`, `Connection`, `InsertStatement`, `Dialect`)
//! - [`registry`] and [`plugin`]: driver lookup by type tag, static and dynamic
//! - [`factory`]: connection acquisition and sharing policy
//! - [`schema`]: table references, column metadata, catalog inspection
//! - [`statement`]: SELECT/INSERT generation
//! - [`cursor`] and [`value`]: row streaming and value representation
//!
//! Driver modules (`drivers/postgres`, `drivers/mysql`, `drivers/mssql`)
//! implement the traits; nothing here names a concrete database.

pub mod cursor;
pub mod factory;
pub mod identifier;
pub mod plugin;
pub mod registry;
pub mod schema;
pub mod statement;
pub mod traits;
pub mod value;

#[cfg(test)]
pub(crate) mod testing;

pub use cursor::{CursorSink, RowCursor};
pub use factory::{ConnectionFactory, ConnectionHandle, ConnectionPolicy, ConnectionRole};
pub use plugin::{DriverRegistrar, PluginDeclaration, PluginLoader};
pub use registry::{DriverRegistry, SkippedArtifact};
pub use schema::{ColumnInfo, SchemaInspector, TableRef, TableSchema};
pub use statement::StatementBuilder;
pub use traits::{Connection, Dialect, Driver, DriverCapabilities, InsertStatement};
pub use value::{Batch, Row, SqlNullType, SqlValue};
