//! PostgreSQL SQL dialect.

use crate::core::identifier::quote_pg;
use crate::core::schema::ColumnInfo;
use crate::core::traits::Dialect;
use crate::error::Result;

/// Catalog types the driver decodes in binary form. Any other column is
/// read through its text output.
const BINARY_DECODED: &[&str] = &[
    "bool", "int2", "int4", "int8", "float4", "float8", "numeric", "uuid", "timestamp",
    "timestamptz", "date", "time", "bytea", "json", "jsonb", "text", "varchar", "bpchar",
    "name", "citext",
];

pub(crate) fn decodes_binary(data_type: &str) -> bool {
    BINARY_DECODED.contains(&data_type)
}

/// Double-quoted identifiers and `$n` placeholders.
#[derive(Debug, Clone, Default)]
pub struct PostgresDialect;

impl PostgresDialect {
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for PostgresDialect {
    fn name(&self) -> &str {
        "postgres"
    }

    fn quote_ident(&self, name: &str) -> Result<String> {
        quote_pg(name)
    }

    fn param_placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn select_column(&self, column: &ColumnInfo) -> Result<String> {
        let quoted = quote_pg(&column.name)?;
        if decodes_binary(&column.data_type) {
            Ok(quoted)
        } else {
            Ok(format!("{}::text", quoted))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::TableRef;

    #[test]
    fn test_quote_ident() {
        let dialect = PostgresDialect::new();
        assert_eq!(dialect.quote_ident("name").unwrap(), "\"name\"");
        assert_eq!(dialect.quote_ident("table\"name").unwrap(), "\"table\"\"name\"");
        assert_eq!(dialect.quote_ident("select").unwrap(), "\"select\"");
        assert!(dialect.quote_ident("").is_err());
    }

    #[test]
    fn test_param_placeholder() {
        let dialect = PostgresDialect::new();
        assert_eq!(dialect.param_placeholder(1), "$1");
        assert_eq!(dialect.param_placeholder(12), "$12");
    }

    #[test]
    fn test_select_column_casts_other_types() {
        let dialect = PostgresDialect::new();
        let col = |ty: &str| ColumnInfo::new("c", ty, 1);
        assert_eq!(dialect.select_column(&col("int4")).unwrap(), "\"c\"");
        assert_eq!(dialect.select_column(&col("varchar")).unwrap(), "\"c\"");
        assert_eq!(dialect.select_column(&col("inet")).unwrap(), "\"c\"::text");
        assert_eq!(dialect.select_column(&col("money")).unwrap(), "\"c\"::text");
        assert_eq!(dialect.select_column(&col("_int4")).unwrap(), "\"c\"::text");
    }

    #[test]
    fn test_qualify() {
        let dialect = PostgresDialect::new();
        let table = TableRef::new(Some("public"), "users");
        assert_eq!(dialect.qualify(&table).unwrap(), "\"public\".\"users\"");
    }
}
