//! SQL Server connections over Tiberius (TDS 7.3+).

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use futures::TryStreamExt;
use rust_decimal::Decimal;
use tiberius::{AuthMethod, Client, Config, EncryptionLevel, ToSql};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::dialect::MssqlDialect;
use crate::config::{resolve, ConnectionSpec, Endpoint};
use crate::core::cursor::{RowCursor, DEFAULT_CURSOR_BUFFER};
use crate::core::schema::{ColumnInfo, TableRef, TableSchema};
use crate::core::traits::{
    check_arity, Connection, Dialect, Driver, DriverCapabilities, InsertStatement,
};
use crate::core::value::{Batch, Row, SqlNullType, SqlValue};
use crate::drivers::common::SslMode;
use crate::error::{CopyError, Result};

const DEFAULT_PORT: u16 = 1433;
const TCP_KEEPALIVE_TIME: Duration = Duration::from_secs(60);
const TCP_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

const COLUMNS_QUERY: &str = r#"
    SELECT
        CAST(COLUMN_NAME AS NVARCHAR(128)) AS COLUMN_NAME,
        CAST(DATA_TYPE AS NVARCHAR(128)) AS DATA_TYPE,
        CAST(IS_NULLABLE AS NVARCHAR(3)) AS IS_NULLABLE,
        CAST(ORDINAL_POSITION AS INT) AS ORDINAL_POSITION
    FROM INFORMATION_SCHEMA.COLUMNS
    WHERE TABLE_SCHEMA = COALESCE(NULLIF(@P1, ''), SCHEMA_NAME()) AND TABLE_NAME = @P2
    ORDER BY ORDINAL_POSITION
"#;

/// SQL Server driver. TDS allows one active request per connection.
#[derive(Debug, Default)]
pub struct MssqlDriver;

impl MssqlDriver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Driver for MssqlDriver {
    fn name(&self) -> &str {
        "mssql"
    }

    fn aliases(&self) -> &[&str] {
        &["sqlserver", "sql_server"]
    }

    fn capabilities(&self) -> DriverCapabilities {
        DriverCapabilities {
            concurrent_reads: false,
            concurrent_writes: false,
            transactional: true,
        }
    }

    fn dialect(&self) -> Arc<dyn Dialect> {
        Arc::new(MssqlDialect::new())
    }

    async fn connect(&self, spec: &ConnectionSpec) -> Result<Box<dyn Connection>> {
        Ok(Box::new(MssqlConnection::connect(spec).await?))
    }
}

type TdsClient = Client<Compat<TcpStream>>;
type SharedClient = Arc<Mutex<Option<TdsClient>>>;

pub struct MssqlConnection {
    client: SharedClient,
}

fn closed() -> CopyError {
    CopyError::Database("SQL Server connection is closed".into())
}

/// `encrypt=false` is accepted alongside `sslmode` since it is the usual
/// SQL Server spelling.
fn ssl_mode_for(endpoint: &Endpoint) -> Result<SslMode> {
    match endpoint.param("encrypt") {
        Some(v) if v.eq_ignore_ascii_case("false") || v == "0" => Ok(SslMode::Disable),
        _ => SslMode::from_endpoint(endpoint),
    }
}

fn build_config(endpoint: &Endpoint, ssl_mode: SslMode) -> Config {
    let mut config = Config::new();
    config.host(&endpoint.host);
    config.port(endpoint.port.unwrap_or(DEFAULT_PORT));
    if let Some(database) = &endpoint.database {
        config.database(database);
    }
    config.application_name("tablecopy");
    config.authentication(AuthMethod::sql_server(
        endpoint.user.as_deref().unwrap_or_default(),
        endpoint.password.as_deref().unwrap_or_default(),
    ));

    match ssl_mode {
        SslMode::Disable => config.encryption(EncryptionLevel::NotSupported),
        SslMode::Require => {
            config.trust_cert();
            config.encryption(EncryptionLevel::Required);
        }
        SslMode::VerifyCa | SslMode::VerifyFull => {
            config.encryption(EncryptionLevel::Required);
        }
    }
    config
}

async fn open_tcp(config: &Config) -> std::io::Result<TcpStream> {
    let tcp = TcpStream::connect(config.get_addr()).await?;
    tcp.set_nodelay(true).ok();

    // Long idle gaps between batches must not let a NAT drop the session.
    let std_tcp = tcp.into_std()?;
    let socket = socket2::Socket::from(std_tcp);
    let keepalive = socket2::TcpKeepalive::new()
        .with_time(TCP_KEEPALIVE_TIME)
        .with_interval(TCP_KEEPALIVE_INTERVAL);
    if let Err(e) = socket.set_tcp_keepalive(&keepalive) {
        debug!("Failed to set TCP keepalive: {}", e);
    }
    let std_tcp: std::net::TcpStream = socket.into();
    TcpStream::from_std(std_tcp)
}

impl MssqlConnection {
    pub async fn connect(spec: &ConnectionSpec) -> Result<Self> {
        let endpoint = resolve(spec)?;
        let ssl_mode = ssl_mode_for(&endpoint)?;
        if !ssl_mode.requires_tls() {
            warn!(
                "SQL Server encryption is disabled for '{}'. Credentials will be transmitted in plaintext.",
                spec.name
            );
        }

        let config = build_config(&endpoint, ssl_mode);
        let tcp = open_tcp(&config)
            .await
            .map_err(|e| CopyError::connection(&spec.name, e))?;
        let client = Client::connect(config, tcp.compat_write())
            .await
            .map_err(|e| CopyError::connection(&spec.name, e))?;

        info!("Connected to SQL Server: {}", endpoint.display_target());
        Ok(Self {
            client: Arc::new(Mutex::new(Some(client))),
        })
    }
}

/// Run a statement outside `sp_executesql` so that transaction control
/// applies to the session rather than a nested batch.
async fn simple(client: &mut TdsClient, sql: &str) -> Result<()> {
    client.simple_query(sql).await?.into_results().await?;
    Ok(())
}

#[async_trait]
impl Connection for MssqlConnection {
    fn db_type(&self) -> &str {
        "mssql"
    }

    fn dialect(&self) -> Arc<dyn Dialect> {
        Arc::new(MssqlDialect::new())
    }

    fn is_transactional(&self) -> bool {
        true
    }

    async fn ping(&self) -> Result<()> {
        let mut guard = self.client.lock().await;
        simple(guard.as_mut().ok_or_else(closed)?, "SELECT 1").await
    }

    async fn table_columns(&self, table: &TableRef) -> Result<Vec<ColumnInfo>> {
        let mut guard = self.client.lock().await;
        let client = guard.as_mut().ok_or_else(closed)?;
        let schema = table.schema.clone().unwrap_or_default();
        let params: [&dyn ToSql; 2] = [&schema, &table.name];
        let rows = client
            .query(COLUMNS_QUERY, &params)
            .await?
            .into_first_result()
            .await?;

        rows.iter()
            .map(|row| -> Result<ColumnInfo> {
                let name: &str = row.try_get(0usize)?.unwrap_or_default();
                let data_type: &str = row.try_get(1usize)?.unwrap_or_default();
                let nullable: &str = row.try_get(2usize)?.unwrap_or("YES");
                let ordinal: i32 = row.try_get(3usize)?.unwrap_or_default();
                Ok(ColumnInfo {
                    name: name.to_string(),
                    data_type: data_type.to_ascii_lowercase(),
                    is_nullable: nullable.eq_ignore_ascii_case("YES"),
                    ordinal,
                })
            })
            .collect()
    }

    async fn open_cursor(&self, sql: &str, schema: &TableSchema) -> Result<RowCursor> {
        let client = self.client.clone();
        let sql = sql.to_string();
        let types: Vec<String> = schema.columns.iter().map(|c| c.data_type.clone()).collect();

        RowCursor::spawn(DEFAULT_CURSOR_BUFFER, move |mut sink| async move {
            // The session stays locked until the result set is drained.
            let mut guard = client.lock_owned().await;
            let Some(client) = guard.as_mut() else {
                sink.fail(closed()).await;
                return;
            };
            let stream = match client.simple_query(sql).await {
                Ok(stream) => stream,
                Err(e) => {
                    sink.fail(e.into()).await;
                    return;
                }
            };
            sink.opened();

            let mut rows = stream.into_row_stream();
            loop {
                let row = match rows.try_next().await {
                    Ok(Some(row)) => row,
                    Ok(None) => break,
                    Err(e) => {
                        sink.fail(e.into()).await;
                        return;
                    }
                };
                match decode_row(&row, &types) {
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
        // Tiberius prepares through sp_executesql on first use; only the
        // session is checked here.
        if self.client.lock().await.is_none() {
            return Err(closed());
        }
        debug!(
            "Prepared insert into {} with {} parameters",
            schema.table,
            schema.column_count()
        );
        Ok(Box::new(MssqlInsert {
            client: self.client.clone(),
            sql: sql.to_string(),
            params: schema.column_count(),
            in_transaction: false,
        }))
    }

    async fn close(&self) {
        if let Some(client) = self.client.lock().await.take() {
            if let Err(e) = client.close().await {
                debug!("SQL Server disconnect failed: {}", e);
            }
        }
    }
}

struct MssqlInsert {
    client: SharedClient,
    sql: String,
    params: usize,
    in_transaction: bool,
}

#[async_trait]
impl InsertStatement for MssqlInsert {
    fn parameter_count(&self) -> usize {
        self.params
    }

    fn bind_row(&self, row: &[SqlValue<'_>]) -> Result<()> {
        check_arity(self.params, row).map_err(CopyError::Database)
    }

    async fn execute_batch(&mut self, batch: &Batch) -> Result<u64> {
        let mut guard = self.client.lock().await;
        let client = guard.as_mut().ok_or_else(closed)?;
        if !self.in_transaction {
            simple(client, "BEGIN TRAN").await?;
            self.in_transaction = true;
        }

        let mut written = 0u64;
        for row in &batch.rows {
            let params: Vec<Box<dyn ToSql>> = row.iter().map(sql_value_to_sql_param).collect();
            let refs: Vec<&dyn ToSql> = params.iter().map(|p| &**p).collect();
            let result = client.execute(self.sql.as_str(), &refs).await?;
            written += result.total();
        }
        Ok(written)
    }

    async fn commit(&mut self) -> Result<()> {
        if self.in_transaction {
            self.in_transaction = false;
            let mut guard = self.client.lock().await;
            simple(guard.as_mut().ok_or_else(closed)?, "COMMIT TRAN").await?;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        if self.in_transaction {
            self.in_transaction = false;
            let mut guard = self.client.lock().await;
            simple(
                guard.as_mut().ok_or_else(closed)?,
                "IF @@TRANCOUNT > 0 ROLLBACK TRAN",
            )
            .await?;
        }
        Ok(())
    }
}

fn null_type_for(data_type: &str) -> SqlNullType {
    match data_type {
        "bit" => SqlNullType::Bool,
        "tinyint" | "smallint" => SqlNullType::I16,
        "int" => SqlNullType::I32,
        "bigint" => SqlNullType::I64,
        "real" => SqlNullType::F32,
        "float" => SqlNullType::F64,
        "decimal" | "numeric" | "money" | "smallmoney" => SqlNullType::Decimal,
        "uniqueidentifier" => SqlNullType::Uuid,
        "date" => SqlNullType::Date,
        "time" => SqlNullType::Time,
        "datetime" | "datetime2" | "smalldatetime" => SqlNullType::DateTime,
        "datetimeoffset" => SqlNullType::DateTimeOffset,
        "binary" | "varbinary" | "image" | "timestamp" | "rowversion" => SqlNullType::Bytes,
        _ => SqlNullType::String,
    }
}

fn decode_row(row: &tiberius::Row, types: &[String]) -> Result<Row> {
    types
        .iter()
        .enumerate()
        .map(|(idx, ty)| decode_value(row, idx, ty))
        .collect()
}

fn decode_value(row: &tiberius::Row, idx: usize, data_type: &str) -> Result<SqlValue<'static>> {
    let null_type = null_type_for(data_type);
    let value = match null_type {
        SqlNullType::Bool => row.try_get::<bool, _>(idx)?.map(SqlValue::Bool),
        SqlNullType::I16 if data_type == "tinyint" => {
            row.try_get::<u8, _>(idx)?.map(|v| SqlValue::I16(v as i16))
        }
        SqlNullType::I16 => row.try_get::<i16, _>(idx)?.map(SqlValue::I16),
        SqlNullType::I32 => row.try_get::<i32, _>(idx)?.map(SqlValue::I32),
        SqlNullType::I64 => row.try_get::<i64, _>(idx)?.map(SqlValue::I64),
        SqlNullType::F32 => row.try_get::<f32, _>(idx)?.map(SqlValue::F32),
        SqlNullType::F64 => row.try_get::<f64, _>(idx)?.map(SqlValue::F64),
        SqlNullType::Decimal => row.try_get::<Decimal, _>(idx)?.map(SqlValue::Decimal),
        SqlNullType::Uuid => row.try_get::<Uuid, _>(idx)?.map(SqlValue::Uuid),
        SqlNullType::Date => row.try_get::<NaiveDate, _>(idx)?.map(SqlValue::Date),
        SqlNullType::Time => row.try_get::<NaiveTime, _>(idx)?.map(SqlValue::Time),
        SqlNullType::DateTime => row.try_get::<NaiveDateTime, _>(idx)?.map(SqlValue::DateTime),
        SqlNullType::DateTimeOffset => row
            .try_get::<DateTime<FixedOffset>, _>(idx)?
            .map(SqlValue::DateTimeOffset),
        SqlNullType::Bytes => row
            .try_get::<&[u8], _>(idx)?
            .map(|b| SqlValue::Bytes(Cow::Owned(b.to_vec()))),
        SqlNullType::String => row
            .try_get::<&str, _>(idx)?
            .map(|s| SqlValue::Text(Cow::Owned(s.to_string()))),
    };
    Ok(value.unwrap_or(SqlValue::Null(null_type)))
}

/// Convert SqlValue to a boxed Tiberius parameter. Typed NULLs keep their
/// SQL type so the server does not have to guess.
fn sql_value_to_sql_param(value: &SqlValue<'_>) -> Box<dyn ToSql> {
    match value {
        SqlValue::Null(null_type) => match null_type {
            SqlNullType::Bool => Box::new(Option::<bool>::None),
            SqlNullType::I16 => Box::new(Option::<i16>::None),
            SqlNullType::I32 => Box::new(Option::<i32>::None),
            SqlNullType::I64 => Box::new(Option::<i64>::None),
            SqlNullType::F32 => Box::new(Option::<f32>::None),
            SqlNullType::F64 => Box::new(Option::<f64>::None),
            SqlNullType::Decimal => Box::new(Option::<Decimal>::None),
            SqlNullType::Uuid => Box::new(Option::<Uuid>::None),
            SqlNullType::Date => Box::new(Option::<NaiveDate>::None),
            SqlNullType::Time => Box::new(Option::<NaiveTime>::None),
            SqlNullType::DateTime => Box::new(Option::<NaiveDateTime>::None),
            SqlNullType::DateTimeOffset => Box::new(Option::<DateTime<FixedOffset>>::None),
            SqlNullType::Bytes => Box::new(Option::<Vec<u8>>::None),
            SqlNullType::String => Box::new(Option::<String>::None),
        },
        SqlValue::Bool(b) => Box::new(*b),
        SqlValue::I16(i) => Box::new(*i),
        SqlValue::I32(i) => Box::new(*i),
        SqlValue::I64(i) => Box::new(*i),
        SqlValue::F32(f) => Box::new(*f),
        SqlValue::F64(f) => Box::new(*f),
        SqlValue::Text(s) => Box::new(s.to_string()),
        SqlValue::Bytes(b) => Box::new(b.to_vec()),
        SqlValue::Uuid(u) => Box::new(*u),
        SqlValue::Decimal(d) => Box::new(*d),
        SqlValue::DateTime(dt) => Box::new(*dt),
        SqlValue::DateTimeOffset(dto) => Box::new(*dto),
        SqlValue::Date(d) => Box::new(*d),
        SqlValue::Time(t) => Box::new(*t),
    }
}
