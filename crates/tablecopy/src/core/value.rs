//! Row values moved between source cursor and target statement.
//!
//! Values are produced by a driver's cursor and consumed by another driver's
//! insert statement, so they carry only what every client library can
//! marshal natively. No type coercion happens between the two sides.

use std::borrow::Cow;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use uuid::Uuid;

/// Type hint for NULL values.
///
/// Some targets (PostgreSQL in particular) check parameter types even for
/// NULL, so a cursor records what kind of NULL it read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlNullType {
    Bool,
    I16,
    I32,
    I64,
    F32,
    F64,
    String,
    Bytes,
    Uuid,
    Decimal,
    DateTime,
    DateTimeOffset,
    Date,
    Time,
}

/// A single column value.
///
/// `Cow` lets drivers hand out borrowed text and bytes while decoding; rows
/// stored in a [`Batch`] are always `'static`.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue<'a> {
    Null(SqlNullType),
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Text(Cow<'a, str>),
    Bytes(Cow<'a, [u8]>),
    Uuid(Uuid),
    Decimal(Decimal),
    /// Timestamp without timezone.
    DateTime(NaiveDateTime),
    /// Timestamp with timezone offset.
    DateTimeOffset(DateTime<FixedOffset>),
    Date(NaiveDate),
    Time(NaiveTime),
}

/// One row, positionally aligned with a [`TableSchema`](super::TableSchema).
pub type Row = Vec<SqlValue<'static>>;

impl<'a> SqlValue<'a> {
    /// Convert to a fully owned value with `'static` lifetime.
    #[must_use]
    pub fn into_owned(self) -> SqlValue<'static> {
        match self {
            SqlValue::Null(t) => SqlValue::Null(t),
            SqlValue::Bool(v) => SqlValue::Bool(v),
            SqlValue::I16(v) => SqlValue::I16(v),
            SqlValue::I32(v) => SqlValue::I32(v),
            SqlValue::I64(v) => SqlValue::I64(v),
            SqlValue::F32(v) => SqlValue::F32(v),
            SqlValue::F64(v) => SqlValue::F64(v),
            SqlValue::Text(v) => SqlValue::Text(Cow::Owned(v.into_owned())),
            SqlValue::Bytes(v) => SqlValue::Bytes(Cow::Owned(v.into_owned())),
            SqlValue::Uuid(v) => SqlValue::Uuid(v),
            SqlValue::Decimal(v) => SqlValue::Decimal(v),
            SqlValue::DateTime(v) => SqlValue::DateTime(v),
            SqlValue::DateTimeOffset(v) => SqlValue::DateTimeOffset(v),
            SqlValue::Date(v) => SqlValue::Date(v),
            SqlValue::Time(v) => SqlValue::Time(v),
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null(_))
    }

    /// The value's type, or the NULL's type hint.
    #[must_use]
    pub fn null_type(&self) -> SqlNullType {
        match self {
            SqlValue::Null(t) => *t,
            SqlValue::Bool(_) => SqlNullType::Bool,
            SqlValue::I16(_) => SqlNullType::I16,
            SqlValue::I32(_) => SqlNullType::I32,
            SqlValue::I64(_) => SqlNullType::I64,
            SqlValue::F32(_) => SqlNullType::F32,
            SqlValue::F64(_) => SqlNullType::F64,
            SqlValue::Text(_) => SqlNullType::String,
            SqlValue::Bytes(_) => SqlNullType::Bytes,
            SqlValue::Uuid(_) => SqlNullType::Uuid,
            SqlValue::Decimal(_) => SqlNullType::Decimal,
            SqlValue::DateTime(_) => SqlNullType::DateTime,
            SqlValue::DateTimeOffset(_) => SqlNullType::DateTimeOffset,
            SqlValue::Date(_) => SqlNullType::Date,
            SqlValue::Time(_) => SqlNullType::Time,
        }
    }

    /// Short type name used in bind error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self.null_type() {
            SqlNullType::Bool => "bool",
            SqlNullType::I16 => "i16",
            SqlNullType::I32 => "i32",
            SqlNullType::I64 => "i64",
            SqlNullType::F32 => "f32",
            SqlNullType::F64 => "f64",
            SqlNullType::String => "text",
            SqlNullType::Bytes => "bytes",
            SqlNullType::Uuid => "uuid",
            SqlNullType::Decimal => "decimal",
            SqlNullType::DateTime => "timestamp",
            SqlNullType::DateTimeOffset => "timestamptz",
            SqlNullType::Date => "date",
            SqlNullType::Time => "time",
        }
    }
}

impl From<bool> for SqlValue<'static> {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<i16> for SqlValue<'static> {
    fn from(v: i16) -> Self {
        SqlValue::I16(v)
    }
}

impl From<i32> for SqlValue<'static> {
    fn from(v: i32) -> Self {
        SqlValue::I32(v)
    }
}

impl From<i64> for SqlValue<'static> {
    fn from(v: i64) -> Self {
        SqlValue::I64(v)
    }
}

impl From<f64> for SqlValue<'static> {
    fn from(v: f64) -> Self {
        SqlValue::F64(v)
    }
}

impl From<String> for SqlValue<'static> {
    fn from(v: String) -> Self {
        SqlValue::Text(Cow::Owned(v))
    }
}

impl<'a> From<&'a str> for SqlValue<'a> {
    fn from(v: &'a str) -> Self {
        SqlValue::Text(Cow::Borrowed(v))
    }
}

impl From<Vec<u8>> for SqlValue<'static> {
    fn from(v: Vec<u8>) -> Self {
        SqlValue::Bytes(Cow::Owned(v))
    }
}

impl From<Uuid> for SqlValue<'static> {
    fn from(v: Uuid) -> Self {
        SqlValue::Uuid(v)
    }
}

impl From<Decimal> for SqlValue<'static> {
    fn from(v: Decimal) -> Self {
        SqlValue::Decimal(v)
    }
}

impl From<NaiveDateTime> for SqlValue<'static> {
    fn from(v: NaiveDateTime) -> Self {
        SqlValue::DateTime(v)
    }
}

impl From<NaiveDate> for SqlValue<'static> {
    fn from(v: NaiveDate) -> Self {
        SqlValue::Date(v)
    }
}

/// Rows accumulated for one grouped write.
///
/// `first_row_offset` is the zero-based position of `rows[0]` in the source
/// cursor, so a rejected flush can be reported against the table.
#[derive(Debug)]
pub struct Batch {
    pub rows: Vec<Row>,
    pub first_row_offset: u64,
    capacity: usize,
}

impl Batch {
    /// Create an empty batch that holds at most `capacity` rows.
    pub fn with_capacity(capacity: usize, first_row_offset: u64) -> Self {
        Self {
            rows: Vec::with_capacity(capacity),
            first_row_offset,
            capacity,
        }
    }

    /// Append a row. Callers flush before the batch would exceed capacity.
    pub fn push(&mut self, row: Row) {
        debug_assert!(self.rows.len() < self.capacity);
        self.rows.push(row);
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.rows.len() >= self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Take the accumulated rows, leaving an empty batch that starts after them.
    pub fn take(&mut self) -> Batch {
        let next = Batch::with_capacity(
            self.capacity,
            self.first_row_offset + self.rows.len() as u64,
        );
        std::mem::replace(self, next)
    }
}
