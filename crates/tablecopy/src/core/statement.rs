//! SQL synthesis for the copy cursor and the target INSERT.

use super::schema::TableSchema;
use super::traits::Dialect;
use crate::error::{CopyError, Result};

/// Builds the two statements a table copy needs.
///
/// Both statements list the columns explicitly, in the schema's order, so
/// cursor positions and placeholder positions line up one-to-one.
pub struct StatementBuilder<'a> {
    dialect: &'a dyn Dialect,
}

impl<'a> StatementBuilder<'a> {
    pub fn new(dialect: &'a dyn Dialect) -> Self {
        Self { dialect }
    }

    /// Unfiltered, unordered full-table scan.
    pub fn build_select(&self, schema: &TableSchema) -> Result<String> {
        check_columns(schema)?;
        let columns = schema
            .columns
            .iter()
            .map(|c| self.dialect.select_column(c))
            .collect::<Result<Vec<_>>>()?
            .join(", ");
        Ok(format!(
            "SELECT {} FROM {}",
            columns,
            self.dialect.qualify(&schema.table)?
        ))
    }

    /// Parameterized INSERT with one placeholder per column.
    pub fn build_insert(&self, schema: &TableSchema) -> Result<String> {
        let placeholders = (1..=schema.column_count())
            .map(|i| self.dialect.param_placeholder(i))
            .collect::<Vec<_>>()
            .join(", ");

        Ok(format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.dialect.qualify(&schema.table)?,
            self.column_list(schema)?,
            placeholders
        ))
    }

    fn column_list(&self, schema: &TableSchema) -> Result<String> {
        check_columns(schema)?;
        Ok(schema
            .columns
            .iter()
            .map(|c| self.dialect.quote_ident(&c.name))
            .collect::<Result<Vec<_>>>()?
            .join(", "))
    }
}

fn check_columns(schema: &TableSchema) -> Result<()> {
    if schema.columns.is_empty() {
        return Err(CopyError::Config(format!(
            "Cannot build statements for {} without columns",
            schema.table
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::{ColumnInfo, TableRef};
    use crate::drivers::{MssqlDialect, MysqlDialect, PostgresDialect};

    fn orders() -> TableSchema {
        TableSchema::new(
            TableRef::parse("sales.orders").unwrap(),
            vec![
                ColumnInfo::new("id", "int", 1),
                ColumnInfo::new("order", "varchar", 2),
                ColumnInfo::new("total", "numeric", 3),
            ],
        )
    }

    #[test]
    fn test_postgres_statements() {
        let dialect = PostgresDialect::new();
        let builder = StatementBuilder::new(&dialect);
        assert_eq!(
            builder.build_select(&orders()).unwrap(),
            r#"SELECT "id", "order", "total" FROM "sales"."orders""#
        );
        assert_eq!(
            builder.build_insert(&orders()).unwrap(),
            r#"INSERT INTO "sales"."orders" ("id", "order", "total") VALUES ($1, $2, $3)"#
        );
    }

    #[test]
    fn test_mysql_statements() {
        let dialect = MysqlDialect::new();
        let builder = StatementBuilder::new(&dialect);
        assert_eq!(
            builder.build_insert(&orders()).unwrap(),
            "INSERT INTO `sales`.`orders` (`id`, `order`, `total`) VALUES (?, ?, ?)"
        );
    }

    #[test]
    fn test_mssql_statements() {
        let dialect = MssqlDialect::new();
        let builder = StatementBuilder::new(&dialect);
        assert_eq!(
            builder.build_select(&orders()).unwrap(),
            "SELECT [id], [order], [total] FROM [sales].[orders]"
        );
        assert_eq!(
            builder.build_insert(&orders()).unwrap(),
            "INSERT INTO [sales].[orders] ([id], [order], [total]) VALUES (@P1, @P2, @P3)"
        );
    }

    #[test]
    fn test_unqualified_table() {
        let dialect = PostgresDialect::new();
        let builder = StatementBuilder::new(&dialect);
        let schema = TableSchema::new(
            TableRef::parse("items").unwrap(),
            vec![ColumnInfo::new("sku", "text", 1)],
        );
        assert_eq!(
            builder.build_select(&schema).unwrap(),
            r#"SELECT "sku" FROM "items""#
        );
    }

    #[test]
    fn test_postgres_select_reads_other_types_as_text() {
        let dialect = PostgresDialect::new();
        let builder = StatementBuilder::new(&dialect);
        let schema = TableSchema::new(
            TableRef::parse("sessions").unwrap(),
            vec![
                ColumnInfo::new("id", "int8", 1),
                ColumnInfo::new("idle", "interval", 2),
                ColumnInfo::new("tags", "_text", 3),
            ],
        );
        assert_eq!(
            builder.build_select(&schema).unwrap(),
            r#"SELECT "id", "idle"::text, "tags"::text FROM "sessions""#
        );
        assert_eq!(
            builder.build_insert(&schema).unwrap(),
            r#"INSERT INTO "sessions" ("id", "idle", "tags") VALUES ($1, $2, $3)"#
        );
    }

    #[test]
    fn test_empty_column_list_is_rejected() {
        let dialect = PostgresDialect::new();
        let builder = StatementBuilder::new(&dialect);
        let schema = TableSchema::new(TableRef::parse("items").unwrap(), vec![]);
        assert!(builder.build_insert(&schema).is_err());
        assert!(builder.build_select(&schema).is_err());
    }
}
