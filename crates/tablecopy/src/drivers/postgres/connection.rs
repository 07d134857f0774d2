//! PostgreSQL connections over tokio-postgres.

use std::borrow::Cow;
use std::error::Error as StdError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use tokio_postgres::{Client, Config as PgConfig, NoTls, Row as PgRow, Statement};
use tracing::{debug, info, warn};

use super::dialect::PostgresDialect;
use crate::config::{resolve, ConnectionSpec};
use crate::core::cursor::{RowCursor, DEFAULT_CURSOR_BUFFER};
use crate::core::schema::{ColumnInfo, TableRef, TableSchema};
use crate::core::traits::{
    check_arity, Connection, Dialect, Driver, DriverCapabilities, InsertStatement,
};
use crate::core::value::{Batch, Row, SqlNullType, SqlValue};
use crate::drivers::common::{SslMode, TlsBuilder};
use crate::error::{CopyError, Result};

const COLUMNS_QUERY: &str = r#"
    SELECT column_name::text, udt_name::text, is_nullable::text, ordinal_position::int4
    FROM information_schema.columns
    WHERE table_schema::text = COALESCE($1::text, current_schema()::text)
      AND table_name::text = $2::text
    ORDER BY ordinal_position
"#;

/// PostgreSQL driver.
///
/// One client pipelines independent queries, so several cursors may share a
/// connection. Writes run inside an explicit transaction and may not.
///
/// Column types outside the binary-decoded set (`interval`, `inet`, `money`,
/// arrays, enums and the like) travel as their text representation in both
/// directions.
#[derive(Debug, Default)]
pub struct PostgresDriver;

impl PostgresDriver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Driver for PostgresDriver {
    fn name(&self) -> &str {
        "postgres"
    }

    fn aliases(&self) -> &[&str] {
        &["postgresql", "pg"]
    }

    fn capabilities(&self) -> DriverCapabilities {
        DriverCapabilities {
            concurrent_reads: true,
            concurrent_writes: false,
            transactional: true,
        }
    }

    fn dialect(&self) -> Arc<dyn Dialect> {
        Arc::new(PostgresDialect::new())
    }

    async fn connect(&self, spec: &ConnectionSpec) -> Result<Box<dyn Connection>> {
        Ok(Box::new(PostgresConnection::connect(spec).await?))
    }
}

/// A tokio-postgres client plus its spawned connection task.
pub struct PostgresConnection {
    client: Arc<Client>,
    task: JoinHandle<()>,
    closed: AtomicBool,
}

impl PostgresConnection {
    pub async fn connect(spec: &ConnectionSpec) -> Result<Self> {
        let endpoint = resolve(spec)?;

        let mut pg_config = PgConfig::new();
        pg_config.host(&endpoint.host);
        pg_config.port(endpoint.port.unwrap_or(5432));
        if let Some(db) = &endpoint.database {
            pg_config.dbname(db);
        }
        if let Some(user) = &endpoint.user {
            pg_config.user(user);
        }
        if let Some(password) = &endpoint.password {
            pg_config.password(password);
        }
        if let Some(secs) = endpoint
            .param("connect_timeout")
            .and_then(|v| v.parse::<u64>().ok())
        {
            pg_config.connect_timeout(Duration::from_secs(secs));
        }
        pg_config.application_name("tablecopy");

        let failed = |e: tokio_postgres::Error| {
            CopyError::from(e).or_classify(|m| CopyError::connection(&spec.name, m))
        };

        let (client, task) = match TlsBuilder::new(SslMode::from_endpoint(&endpoint)?).build()? {
            Some(tls) => {
                let (client, connection) = pg_config.connect(tls).await.map_err(failed)?;
                let name = spec.name.clone();
                let task = tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        warn!("PostgreSQL connection '{}' ended with error: {}", name, e);
                    }
                });
                (client, task)
            }
            None => {
                warn!(
                    "PostgreSQL TLS is disabled for '{}'. Credentials will be transmitted in plaintext.",
                    spec.name
                );
                let (client, connection) = pg_config.connect(NoTls).await.map_err(failed)?;
                let name = spec.name.clone();
                let task = tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        warn!("PostgreSQL connection '{}' ended with error: {}", name, e);
                    }
                });
                (client, task)
            }
        };

        info!("Connected to PostgreSQL: {}", endpoint.display_target());
        Ok(Self {
            client: Arc::new(client),
            task,
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl Connection for PostgresConnection {
    fn db_type(&self) -> &str {
        "postgres"
    }

    fn dialect(&self) -> Arc<dyn Dialect> {
        Arc::new(PostgresDialect::new())
    }

    fn is_transactional(&self) -> bool {
        true
    }

    async fn ping(&self) -> Result<()> {
        self.client.simple_query("SELECT 1").await?;
        Ok(())
    }

    async fn table_columns(&self, table: &TableRef) -> Result<Vec<ColumnInfo>> {
        let rows = self
            .client
            .query(COLUMNS_QUERY, &[&table.schema.as_deref(), &table.name.as_str()])
            .await?;

        rows.iter()
            .map(|row| -> Result<ColumnInfo> {
                Ok(ColumnInfo {
                    name: row.try_get(0)?,
                    data_type: row.try_get(1)?,
                    is_nullable: row.try_get::<_, String>(2)? == "YES",
                    ordinal: row.try_get(3)?,
                })
            })
            .collect()
    }

    async fn open_cursor(&self, sql: &str, schema: &TableSchema) -> Result<RowCursor> {
        let client = self.client.clone();
        let sql = sql.to_string();
        let types: Vec<String> = schema
            .columns
            .iter()
            .map(|c| c.data_type.to_ascii_lowercase())
            .collect();

        RowCursor::spawn(DEFAULT_CURSOR_BUFFER, move |mut sink| async move {
            let stream = match client.query_raw(sql.as_str(), std::iter::empty::<i32>()).await {
                Ok(stream) => stream,
                Err(e) => {
                    sink.fail(e.into()).await;
                    return;
                }
            };
            sink.opened();
            futures::pin_mut!(stream);

            while let Some(next) = stream.next().await {
                let decoded = next
                    .map_err(CopyError::from)
                    .and_then(|row| decode_row(&row, &types));
                match decoded {
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
        let mut statement = self.client.prepare(sql).await?;
        // Columns whose types have no binary encoding here take text and
        // let the server parse it.
        if let Some(cast_sql) = cast_text_params(sql, statement.params()) {
            debug!("{}: binding text for non-native columns: {}", schema.table, cast_sql);
            statement = self.client.prepare(&cast_sql).await?;
        }
        debug!(
            "Prepared insert into {} with {} parameters",
            schema.table,
            statement.params().len()
        );
        Ok(Box::new(PostgresInsert {
            client: self.client.clone(),
            statement,
            in_transaction: false,
        }))
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.task.abort();
        }
    }
}

struct PostgresInsert {
    client: Arc<Client>,
    statement: Statement,
    in_transaction: bool,
}

#[async_trait]
impl InsertStatement for PostgresInsert {
    fn parameter_count(&self) -> usize {
        self.statement.params().len()
    }

    fn bind_row(&self, row: &[SqlValue<'_>]) -> Result<()> {
        check_arity(self.parameter_count(), row).map_err(CopyError::Database)?;
        for (idx, (value, ty)) in row.iter().zip(self.statement.params()).enumerate() {
            if !value_fits(value, ty) {
                return Err(CopyError::Database(format!(
                    "parameter ${} expects {} but the value is {}",
                    idx + 1,
                    ty.name(),
                    value.type_name()
                )));
            }
        }
        Ok(())
    }

    async fn execute_batch(&mut self, batch: &Batch) -> Result<u64> {
        if !self.in_transaction {
            self.client.batch_execute("BEGIN").await?;
            self.in_transaction = true;
        }

        // Independent executes on one client are pipelined: the whole batch
        // goes out before the first response is awaited.
        let client = &self.client;
        let statement = &self.statement;
        let writes = batch.rows.iter().map(|row| {
            let params: Vec<&(dyn ToSql + Sync)> =
                row.iter().map(|v| v as &(dyn ToSql + Sync)).collect();
            async move { client.execute(statement, &params).await }
        });
        let counts = futures::future::try_join_all(writes).await?;
        Ok(counts.into_iter().sum())
    }

    async fn commit(&mut self) -> Result<()> {
        if self.in_transaction {
            self.in_transaction = false;
            self.client.batch_execute("COMMIT").await?;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        if self.in_transaction {
            self.in_transaction = false;
            self.client.batch_execute("ROLLBACK").await?;
        }
        Ok(())
    }
}

fn decode_row(row: &PgRow, types: &[String]) -> Result<Row> {
    types
        .iter()
        .enumerate()
        .map(|(idx, ty)| decode_value(row, idx, ty))
        .collect()
}

/// Decode column `idx` by its catalog type. NULLs keep their type hint.
fn decode_value(row: &PgRow, idx: usize, data_type: &str) -> Result<SqlValue<'static>> {
    fn get<'r, T, F>(row: &'r PgRow, idx: usize, null: SqlNullType, wrap: F) -> Result<SqlValue<'static>>
    where
        T: tokio_postgres::types::FromSql<'r>,
        F: FnOnce(T) -> SqlValue<'static>,
    {
        Ok(row
            .try_get::<_, Option<T>>(idx)?
            .map(wrap)
            .unwrap_or(SqlValue::Null(null)))
    }

    match data_type {
        "bool" => get(row, idx, SqlNullType::Bool, SqlValue::Bool),
        "int2" => get(row, idx, SqlNullType::I16, SqlValue::I16),
        "int4" => get(row, idx, SqlNullType::I32, SqlValue::I32),
        "int8" => get(row, idx, SqlNullType::I64, SqlValue::I64),
        "float4" => get(row, idx, SqlNullType::F32, SqlValue::F32),
        "float8" => get(row, idx, SqlNullType::F64, SqlValue::F64),
        "numeric" => get(row, idx, SqlNullType::Decimal, SqlValue::Decimal),
        "uuid" => get(row, idx, SqlNullType::Uuid, SqlValue::Uuid),
        "timestamp" => get(row, idx, SqlNullType::DateTime, SqlValue::DateTime),
        "timestamptz" => get(row, idx, SqlNullType::DateTimeOffset, |v: chrono::DateTime<chrono::FixedOffset>| {
            SqlValue::DateTimeOffset(v)
        }),
        "date" => get(row, idx, SqlNullType::Date, SqlValue::Date),
        "time" => get(row, idx, SqlNullType::Time, SqlValue::Time),
        "bytea" => get(row, idx, SqlNullType::Bytes, |v: Vec<u8>| {
            SqlValue::Bytes(Cow::Owned(v))
        }),
        "json" | "jsonb" => get(row, idx, SqlNullType::String, |v: serde_json::Value| {
            SqlValue::Text(Cow::Owned(v.to_string()))
        }),
        _ => get(row, idx, SqlNullType::String, |v: String| {
            SqlValue::Text(Cow::Owned(v))
        }),
    }
}

/// Parameter types `SqlValue` encodes in binary form.
fn encodes_binary(ty: &Type) -> bool {
    [
        Type::BOOL,
        Type::INT2,
        Type::INT4,
        Type::INT8,
        Type::FLOAT4,
        Type::FLOAT8,
        Type::TEXT,
        Type::VARCHAR,
        Type::BPCHAR,
        Type::NAME,
        Type::UNKNOWN,
        Type::JSON,
        Type::JSONB,
        Type::BYTEA,
        Type::UUID,
        Type::NUMERIC,
        Type::TIMESTAMP,
        Type::TIMESTAMPTZ,
        Type::DATE,
        Type::TIME,
    ]
    .contains(ty)
}

/// `sql` with `$n` rewritten to `$n::text::<type>` for every parameter
/// whose type has no binary encoding, or `None` when there is none.
fn cast_text_params(sql: &str, params: &[Type]) -> Option<String> {
    if params.iter().all(encodes_binary) {
        return None;
    }
    let (head, _) = sql.rsplit_once(" VALUES (")?;
    let values = params
        .iter()
        .enumerate()
        .map(|(i, ty)| {
            if encodes_binary(ty) {
                format!("${}", i + 1)
            } else {
                format!(
                    "${}::text::\"{}\".\"{}\"",
                    i + 1,
                    ty.schema().replace('"', "\"\""),
                    ty.name().replace('"', "\"\"")
                )
            }
        })
        .collect::<Vec<_>>()
        .join(", ");
    Some(format!("{} VALUES ({})", head, values))
}

/// Whether `value` can be sent for a parameter of type `ty` without the
/// server rejecting the binary encoding. Integer and float values may widen.
fn value_fits(value: &SqlValue<'_>, ty: &Type) -> bool {
    let any = |types: &[Type]| types.contains(ty);
    match value {
        SqlValue::Null(_) => true,
        SqlValue::Bool(_) => any(&[Type::BOOL]),
        SqlValue::I16(_) => any(&[Type::INT2, Type::INT4, Type::INT8]),
        SqlValue::I32(_) => any(&[Type::INT4, Type::INT8]),
        SqlValue::I64(_) => any(&[Type::INT8]),
        SqlValue::F32(_) => any(&[Type::FLOAT4, Type::FLOAT8]),
        SqlValue::F64(_) => any(&[Type::FLOAT8]),
        SqlValue::Text(_) => any(&[
            Type::TEXT,
            Type::VARCHAR,
            Type::BPCHAR,
            Type::NAME,
            Type::UNKNOWN,
            Type::JSON,
            Type::JSONB,
        ]),
        SqlValue::Bytes(_) => any(&[Type::BYTEA]),
        SqlValue::Uuid(_) => any(&[Type::UUID]),
        SqlValue::Decimal(_) => any(&[Type::NUMERIC]),
        SqlValue::DateTime(_) => any(&[Type::TIMESTAMP]),
        SqlValue::DateTimeOffset(_) => any(&[Type::TIMESTAMPTZ]),
        SqlValue::Date(_) => any(&[Type::DATE]),
        SqlValue::Time(_) => any(&[Type::TIME]),
    }
}

impl ToSql for SqlValue<'_> {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn StdError + Sync + Send>> {
        match self {
            SqlValue::Null(_) => Ok(IsNull::Yes),
            SqlValue::Bool(v) => v.to_sql(ty, out),
            SqlValue::I16(v) if *ty == Type::INT4 => i32::from(*v).to_sql(ty, out),
            SqlValue::I16(v) if *ty == Type::INT8 => i64::from(*v).to_sql(ty, out),
            SqlValue::I16(v) => v.to_sql(ty, out),
            SqlValue::I32(v) if *ty == Type::INT8 => i64::from(*v).to_sql(ty, out),
            SqlValue::I32(v) => v.to_sql(ty, out),
            SqlValue::I64(v) => v.to_sql(ty, out),
            SqlValue::F32(v) if *ty == Type::FLOAT8 => f64::from(*v).to_sql(ty, out),
            SqlValue::F32(v) => v.to_sql(ty, out),
            SqlValue::F64(v) => v.to_sql(ty, out),
            SqlValue::Text(v) if *ty == Type::JSON || *ty == Type::JSONB => {
                serde_json::from_str::<serde_json::Value>(v)?.to_sql(ty, out)
            }
            SqlValue::Text(v) => {
                let s: &str = v;
                s.to_sql(ty, out)
            }
            SqlValue::Bytes(v) => {
                let b: &[u8] = v;
                b.to_sql(ty, out)
            }
            SqlValue::Uuid(v) => v.to_sql(ty, out),
            SqlValue::Decimal(v) => v.to_sql(ty, out),
            SqlValue::DateTime(v) => v.to_sql(ty, out),
            SqlValue::DateTimeOffset(v) => v.to_sql(ty, out),
            SqlValue::Date(v) => v.to_sql(ty, out),
            SqlValue::Time(v) => v.to_sql(ty, out),
        }
    }

    // Compatibility is checked per value in `bind_row`.
    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}
