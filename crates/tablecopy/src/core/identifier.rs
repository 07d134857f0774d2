//! Identifier validation and quoting.
//!
//! Table and column names come from configuration and from the source
//! catalog, and they end up spliced into generated SQL because identifiers
//! cannot be bound as parameters. Every identifier is validated and quoted
//! with the target engine's delimiters, with the closing delimiter doubled
//! inside the name. Reserved words such as `order` or `select` are therefore
//! always safe to use as column names.

use crate::error::{CopyError, Result};

/// Maximum identifier length (conservative limit across databases).
/// - PostgreSQL: 63 bytes
/// - SQL Server: 128 characters
/// - MySQL: 64 characters
pub const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Reject empty identifiers, NUL bytes and over-long names.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CopyError::Config("Identifier cannot be empty".to_string()));
    }

    if name.contains('\0') {
        return Err(CopyError::Config(format!(
            "Identifier contains null byte: {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(CopyError::Config(format!(
            "Identifier exceeds maximum length of {} bytes (got {} bytes): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// Wrap `name` in `open`/`close`, doubling any `close` inside it.
pub fn quote_delimited(name: &str, open: char, close: char) -> Result<String> {
    validate_identifier(name)?;
    let mut out = String::with_capacity(name.len() + 2);
    out.push(open);
    for ch in name.chars() {
        if ch == close {
            out.push(close);
        }
        out.push(ch);
    }
    out.push(close);
    Ok(out)
}

/// Quote a PostgreSQL identifier: `"name"`.
pub fn quote_pg(name: &str) -> Result<String> {
    quote_delimited(name, '"', '"')
}

/// Quote a MySQL identifier: `` `name` ``.
pub fn quote_mysql(name: &str) -> Result<String> {
    quote_delimited(name, '`', '`')
}

/// Quote a SQL Server identifier: `[name]`.
pub fn quote_mssql(name: &str) -> Result<String> {
    quote_delimited(name, '[', ']')
}
