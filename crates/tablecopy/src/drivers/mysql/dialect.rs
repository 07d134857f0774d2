//! MySQL/MariaDB SQL dialect.

use crate::core::identifier::quote_mysql;
use crate::core::traits::Dialect;
use crate::error::Result;

/// Backtick identifiers and `?` placeholders.
///
/// Compatible with MySQL 5.7+, 8.0+ and MariaDB 10.2+.
#[derive(Debug, Clone, Default)]
pub struct MysqlDialect;

impl MysqlDialect {
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for MysqlDialect {
    fn name(&self) -> &str {
        "mysql"
    }

    fn quote_ident(&self, name: &str) -> Result<String> {
        quote_mysql(name)
    }

    fn param_placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        let dialect = MysqlDialect::new();
        assert_eq!(dialect.quote_ident("name").unwrap(), "`name`");
        assert_eq!(dialect.quote_ident("table`name").unwrap(), "`table``name`");
    }

    #[test]
    fn test_param_placeholder_is_positional() {
        let dialect = MysqlDialect::new();
        assert_eq!(dialect.param_placeholder(1), "?");
        assert_eq!(dialect.param_placeholder(7), "?");
    }
}
