//! MySQL/MariaDB connections over mysql_async.

use std::borrow::Cow;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{
    from_value_opt, Conn, FromValueError, Opts, OptsBuilder, Params, SslOpts, Statement, Value,
};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::dialect::MysqlDialect;
use crate::config::{resolve, ConnectionSpec};
use crate::core::cursor::{RowCursor, DEFAULT_CURSOR_BUFFER};
use crate::core::schema::{ColumnInfo, TableRef, TableSchema};
use crate::core::traits::{
    check_arity, Connection, Dialect, Driver, DriverCapabilities, InsertStatement,
};
use crate::core::value::{Batch, Row, SqlNullType, SqlValue};
use crate::drivers::common::SslMode;
use crate::error::{CopyError, Result};

// CAST to CHAR avoids binary-collation surprises on information_schema.
// DATA_TYPE drops the signedness, so unsigned columns get a suffix.
const COLUMNS_QUERY: &str = r#"
    SELECT
        CAST(COLUMN_NAME AS CHAR(255)) AS COLUMN_NAME,
        CAST(CASE WHEN COLUMN_TYPE LIKE '%unsigned%'
                  THEN CONCAT(DATA_TYPE, ' unsigned')
                  ELSE DATA_TYPE END AS CHAR(255)) AS DATA_TYPE,
        CAST(IS_NULLABLE AS CHAR(3)) AS IS_NULLABLE,
        CAST(ORDINAL_POSITION AS SIGNED) AS ORDINAL_POSITION
    FROM INFORMATION_SCHEMA.COLUMNS
    WHERE TABLE_SCHEMA = COALESCE(?, DATABASE()) AND TABLE_NAME = ?
    ORDER BY ORDINAL_POSITION
"#;

/// MySQL/MariaDB driver. A connection runs one statement at a time.
#[derive(Debug, Default)]
pub struct MysqlDriver;

impl MysqlDriver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Driver for MysqlDriver {
    fn name(&self) -> &str {
        "mysql"
    }

    fn aliases(&self) -> &[&str] {
        &["mariadb"]
    }

    fn capabilities(&self) -> DriverCapabilities {
        DriverCapabilities {
            concurrent_reads: false,
            concurrent_writes: false,
            transactional: true,
        }
    }

    fn dialect(&self) -> Arc<dyn Dialect> {
        Arc::new(MysqlDialect::new())
    }

    async fn connect(&self, spec: &ConnectionSpec) -> Result<Box<dyn Connection>> {
        Ok(Box::new(MysqlConnection::connect(spec).await?))
    }
}

type SharedConn = Arc<Mutex<Option<Conn>>>;

pub struct MysqlConnection {
    conn: SharedConn,
}

fn ssl_opts(mode: SslMode) -> Option<SslOpts> {
    match mode {
        SslMode::Disable => None,
        SslMode::Require => Some(SslOpts::default().with_danger_accept_invalid_certs(true)),
        SslMode::VerifyCa => Some(SslOpts::default().with_danger_skip_domain_validation(true)),
        SslMode::VerifyFull => Some(SslOpts::default()),
    }
}

fn closed() -> CopyError {
    CopyError::Database("MySQL connection is closed".into())
}

impl MysqlConnection {
    pub async fn connect(spec: &ConnectionSpec) -> Result<Self> {
        let endpoint = resolve(spec)?;
        let ssl_mode = SslMode::from_endpoint(&endpoint)?;
        if !ssl_mode.requires_tls() {
            warn!(
                "MySQL TLS is disabled for '{}'. Credentials will be transmitted in plaintext.",
                spec.name
            );
        }

        let builder = OptsBuilder::default()
            .ip_or_hostname(endpoint.host.clone())
            .tcp_port(endpoint.port.unwrap_or(3306))
            .db_name(endpoint.database.clone())
            .user(endpoint.user.clone())
            .pass(endpoint.password.clone())
            // Use utf8mb4 for full Unicode support
            .init(vec!["SET NAMES utf8mb4"])
            .ssl_opts(ssl_opts(ssl_mode));

        let conn = Conn::new(Opts::from(builder))
            .await
            .map_err(|e| CopyError::connection(&spec.name, e))?;

        info!("Connected to MySQL: {}", endpoint.display_target());
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }
}

#[async_trait]
impl Connection for MysqlConnection {
    fn db_type(&self) -> &str {
        "mysql"
    }

    fn dialect(&self) -> Arc<dyn Dialect> {
        Arc::new(MysqlDialect::new())
    }

    fn is_transactional(&self) -> bool {
        true
    }

    async fn ping(&self) -> Result<()> {
        let mut guard = self.conn.lock().await;
        guard.as_mut().ok_or_else(closed)?.ping().await?;
        Ok(())
    }

    async fn table_columns(&self, table: &TableRef) -> Result<Vec<ColumnInfo>> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or_else(closed)?;
        let rows: Vec<(String, String, String, i64)> = conn
            .exec(COLUMNS_QUERY, (table.schema.clone(), table.name.clone()))
            .await?;

        Ok(rows
            .into_iter()
            .map(|(name, data_type, nullable, ordinal)| ColumnInfo {
                name,
                data_type: data_type.to_ascii_lowercase(),
                is_nullable: nullable.eq_ignore_ascii_case("YES"),
                ordinal: ordinal as i32,
            })
            .collect())
    }

    async fn open_cursor(&self, sql: &str, schema: &TableSchema) -> Result<RowCursor> {
        let conn = self.conn.clone();
        let sql = sql.to_string();
        let types: Vec<String> = schema.columns.iter().map(|c| c.data_type.clone()).collect();

        RowCursor::spawn(DEFAULT_CURSOR_BUFFER, move |mut sink| async move {
            // The connection stays locked until the result set is drained.
            let mut guard = conn.lock_owned().await;
            let Some(conn) = guard.as_mut() else {
                sink.fail(closed()).await;
                return;
            };
            let mut result = match conn.query_iter(sql).await {
                Ok(result) => result,
                Err(e) => {
                    sink.fail(e.into()).await;
                    return;
                }
            };
            sink.opened();

            loop {
                let row = match result.next().await {
                    Ok(Some(row)) => row,
                    Ok(None) => break,
                    Err(e) => {
                        sink.fail(e.into()).await;
                        return;
                    }
                };
                match decode_row(row, &types) {
                    Ok(values) => {
                        if !sink.send(values).await {
                            return;
                        }
                    }
                    Err(e) => {
                        sink.fail(e).await;
                        return;
                    }
                }
            }
        })
        .await
    }

    async fn prepare_insert(
        &self,
        sql: &str,
        schema: &TableSchema,
    ) -> Result<Box<dyn InsertStatement>> {
        let mut guard = self.conn.lock().await;
        let statement = guard.as_mut().ok_or_else(closed)?.prep(sql).await?;
        debug!(
            "Prepared insert into {} with {} parameters",
            schema.table,
            statement.num_params()
        );
        Ok(Box::new(MysqlInsert {
            conn: self.conn.clone(),
            statement,
            in_transaction: false,
        }))
    }

    async fn close(&self) {
        if let Some(conn) = self.conn.lock().await.take() {
            if let Err(e) = conn.disconnect().await {
                debug!("MySQL disconnect failed: {}", e);
            }
        }
    }
}

struct MysqlInsert {
    conn: SharedConn,
    statement: Statement,
    in_transaction: bool,
}

#[async_trait]
impl InsertStatement for MysqlInsert {
    fn parameter_count(&self) -> usize {
        self.statement.num_params() as usize
    }

    fn bind_row(&self, row: &[SqlValue<'_>]) -> Result<()> {
        // Parameter types are not reported by the server; the arity is all
        // that can be checked before execution.
        check_arity(self.parameter_count(), row).map_err(CopyError::Database)
    }

    async fn execute_batch(&mut self, batch: &Batch) -> Result<u64> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or_else(closed)?;
        if !self.in_transaction {
            conn.query_drop("START TRANSACTION").await?;
            self.in_transaction = true;
        }

        let params = batch.rows.iter().map(|row| {
            Params::Positional(row.iter().map(sql_value_to_mysql).collect::<Vec<Value>>())
        });
        conn.exec_batch(&self.statement, params).await?;
        Ok(batch.len() as u64)
    }

    async fn commit(&mut self) -> Result<()> {
        if self.in_transaction {
            self.in_transaction = false;
            let mut guard = self.conn.lock().await;
            guard.as_mut().ok_or_else(closed)?.query_drop("COMMIT").await?;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        if self.in_transaction {
            self.in_transaction = false;
            let mut guard = self.conn.lock().await;
            guard.as_mut().ok_or_else(closed)?.query_drop("ROLLBACK").await?;
        }
        Ok(())
    }
}

/// Value type for a catalog type. Unsigned integers widen to the next type
/// that holds their full range.
fn null_type_for(data_type: &str) -> SqlNullType {
    let (base, unsigned) = match data_type.strip_suffix(" unsigned") {
        Some(base) => (base, true),
        None => (data_type, false),
    };
    match (base, unsigned) {
        ("tinyint", _) | ("smallint", false) | ("year", _) => SqlNullType::I16,
        ("smallint", true) | ("mediumint", _) | ("int" | "integer", false) => SqlNullType::I32,
        ("int" | "integer", true) | ("bigint", false) => SqlNullType::I64,
        ("bigint", true) => SqlNullType::Decimal,
        (base, _) => null_type_for_base(base),
    }
}

fn null_type_for_base(base: &str) -> SqlNullType {
    match base {
        "float" => SqlNullType::F32,
        "double" | "real" => SqlNullType::F64,
        "decimal" | "numeric" => SqlNullType::Decimal,
        "date" => SqlNullType::Date,
        "time" => SqlNullType::Time,
        "datetime" | "timestamp" => SqlNullType::DateTime,
        "binary" | "varbinary" | "blob" | "tinyblob" | "mediumblob" | "longblob" | "bit" => {
            SqlNullType::Bytes
        }
        _ => SqlNullType::String,
    }
}

fn decode_row(mut row: mysql_async::Row, types: &[String]) -> Result<Row> {
    types
        .iter()
        .enumerate()
        .map(|(idx, ty)| {
            let value = row.take::<Value, _>(idx).unwrap_or(Value::NULL);
            decode_value(value, ty)
        })
        .collect()
}

/// Decode one text-protocol value by its catalog type.
fn decode_value(value: Value, data_type: &str) -> Result<SqlValue<'static>> {
    if value == Value::NULL {
        return Ok(SqlValue::Null(null_type_for(data_type)));
    }

    let bad = |e: FromValueError| {
        CopyError::Database(format!("cannot decode {} value: {:?}", data_type, e.0))
    };

    Ok(match null_type_for(data_type) {
        SqlNullType::I16 => SqlValue::I16(from_value_opt(value).map_err(bad)?),
        SqlNullType::I32 => SqlValue::I32(from_value_opt(value).map_err(bad)?),
        SqlNullType::I64 => SqlValue::I64(from_value_opt(value).map_err(bad)?),
        SqlNullType::F32 => SqlValue::F32(from_value_opt(value).map_err(bad)?),
        SqlNullType::F64 => SqlValue::F64(from_value_opt(value).map_err(bad)?),
        SqlNullType::Decimal => {
            let text = match value {
                Value::UInt(u) => return Ok(SqlValue::Decimal(Decimal::from(u))),
                Value::Int(i) => return Ok(SqlValue::Decimal(Decimal::from(i))),
                other => from_value_opt::<String>(other).map_err(bad)?,
            };
            SqlValue::Decimal(Decimal::from_str(&text).map_err(|e| {
                CopyError::Database(format!("cannot decode decimal '{}': {}", text, e))
            })?)
        }
        SqlNullType::Date => SqlValue::Date(from_value_opt(value).map_err(bad)?),
        SqlNullType::Time => SqlValue::Time(from_value_opt(value).map_err(bad)?),
        SqlNullType::DateTime => SqlValue::DateTime(from_value_opt(value).map_err(bad)?),
        SqlNullType::Bytes => {
            SqlValue::Bytes(Cow::Owned(from_value_opt::<Vec<u8>>(value).map_err(bad)?))
        }
        _ => SqlValue::Text(Cow::Owned(from_value_opt::<String>(value).map_err(bad)?)),
    })
}

/// Convert SqlValue to mysql_async::Value.
fn sql_value_to_mysql(value: &SqlValue<'_>) -> Value {
    match value {
        SqlValue::Null(_) => Value::NULL,
        SqlValue::Bool(b) => Value::from(*b),
        SqlValue::I16(i) => Value::from(*i),
        SqlValue::I32(i) => Value::from(*i),
        SqlValue::I64(i) => Value::from(*i),
        SqlValue::F32(f) => Value::from(*f),
        SqlValue::F64(f) => Value::from(*f),
        SqlValue::Text(s) => Value::from(s.as_ref()),
        SqlValue::Bytes(b) => Value::from(b.as_ref()),
        SqlValue::Uuid(u) => Value::from(u.to_string()),
        SqlValue::Decimal(d) => Value::from(d.to_string()),
        SqlValue::DateTime(dt) => Value::from(*dt),
        SqlValue::DateTimeOffset(dto) => Value::from(dto.naive_utc()),
        SqlValue::Date(d) => Value::from(*d),
        SqlValue::Time(t) => Value::from(*t),
    }
}
