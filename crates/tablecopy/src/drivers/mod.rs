//! Database driver implementations.
//!
//! Each driver module provides a `Dialect` (always compiled, so statements
//! can be built and tested without a client library) and a `Driver` that
//! opens `Connection`s.
//!
//! - [`postgres`]: PostgreSQL via tokio-postgres
//! - [`mysql`]: MySQL/MariaDB via mysql_async (feature `mysql`)
//! - [`mssql`]: SQL Server via Tiberius (feature `mssql`)
//! - [`common`]: shared TLS handling
//!
//! # Adding New Databases
//!
//! 1. Create a module under `drivers/` with a `Dialect` and a `Driver`
//! 2. Register the driver in `DriverRegistry::with_builtins()`, or build it
//!    as a plugin with `export_driver_plugin!`
//! 3. Gate the client library with a feature flag in `Cargo.toml`

pub mod common;
pub mod mssql;
pub mod mysql;
pub mod postgres;

pub use common::{SslMode, TlsBuilder};

#[cfg(feature = "mssql")]
pub use mssql::MssqlDriver;
pub use mssql::MssqlDialect;
#[cfg(feature = "mysql")]
pub use mysql::MysqlDriver;
pub use mysql::MysqlDialect;
pub use postgres::{PostgresDialect, PostgresDriver};
