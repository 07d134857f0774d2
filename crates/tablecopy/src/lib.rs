//! # tablecopy
//!
//! Batch-copy engine for moving table contents between heterogeneous
//! databases.
//!
//! For each requested table the engine reads the column list from the
//! source catalog, streams every row through a forward-only cursor and
//! writes it into the same-named target table with a parameterized INSERT,
//! committing once per batch. Tables are copied in parallel with bounded
//! concurrency and each table succeeds or fails on its own.
//!
//! - **Drivers** for PostgreSQL, MySQL/MariaDB and SQL Server, plus
//!   runtime-loaded driver plugins
//! - **Capability-gated connection sharing** between table workers
//! - **Row-offset failure reporting** so failed tables can be audited or
//!   re-run
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tablecopy::{
//!     ConnectionRegistry, CoordinatorConfig, DriverRegistry, TransferCoordinator,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> tablecopy::Result<()> {
//!     let connections = ConnectionRegistry::load("connections.yaml")?;
//!     let (source, target) = connections.require_pair("source", "target")?;
//!     let drivers = Arc::new(DriverRegistry::with_builtins());
//!     let coordinator = TransferCoordinator::new(
//!         drivers,
//!         CoordinatorConfig::from_settings(connections.settings()),
//!     );
//!     let tables = vec!["orders".to_string(), "customers".to_string()];
//!     let report = coordinator
//!         .run(&tables, source, target, CancellationToken::new())
//!         .await?;
//!     println!("{}", report.summary());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod drivers;
pub mod error;
pub mod orchestrator;
pub mod transfer;

// Re-exports for convenient access
pub use config::{ConnectionRegistry, ConnectionSpec, TransferSettings};
pub use crate::core::{
    ConnectionFactory, ConnectionPolicy, DriverRegistry, SchemaInspector, StatementBuilder,
    TableRef, TableSchema,
};
pub use error::{CopyError, FailureKind, Result};
pub use orchestrator::{CoordinatorConfig, TransferCoordinator, TransferReport};
pub use transfer::{BatchCopier, CopierState, TransferOutcome, TransferResult};
