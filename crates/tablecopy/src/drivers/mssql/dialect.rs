//! SQL Server SQL dialect.

use crate::core::identifier::quote_mssql;
use crate::core::traits::Dialect;
use crate::error::Result;

/// Bracketed identifiers and `@Pn` placeholders.
#[derive(Debug, Clone, Default)]
pub struct MssqlDialect;

impl MssqlDialect {
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for MssqlDialect {
    fn name(&self) -> &str {
        "mssql"
    }

    fn quote_ident(&self, name: &str) -> Result<String> {
        quote_mssql(name)
    }

    fn param_placeholder(&self, index: usize) -> String {
        format!("@P{}", index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        let dialect = MssqlDialect::new();
        assert_eq!(dialect.quote_ident("name").unwrap(), "[name]");
        assert_eq!(dialect.quote_ident("col]x").unwrap(), "[col]]x]");
    }

    #[test]
    fn test_param_placeholder() {
        let dialect = MssqlDialect::new();
        assert_eq!(dialect.param_placeholder(1), "@P1");
        assert_eq!(dialect.param_placeholder(3), "@P3");
    }
}
