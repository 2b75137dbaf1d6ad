//! SQL spelling differences between backends

use crate::schema::{ColumnDef, DataType};

/// SQL dialect used to render DDL and fetch expressions
///
/// Only the constructs the rollup engine emits are covered: identifier
/// quoting, column types, JSON field extraction and construction, and
/// row-wise greatest/least.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dialect {
    /// Dialect name
    pub name: &'static str,
    quote: char,
    greatest: &'static str,
    least: &'static str,
    json_extract: &'static str,
    json_object: &'static str,
}

impl Dialect {
    /// SQLite with JSON1 (multi-argument MAX/MIN are scalar greatest/least)
    pub const SQLITE: Dialect = Dialect {
        name: "sqlite",
        quote: '"',
        greatest: "MAX",
        least: "MIN",
        json_extract: "json_extract",
        json_object: "json_object",
    };

    /// MySQL 5.7+
    pub const MYSQL: Dialect = Dialect {
        name: "mysql",
        quote: '`',
        greatest: "GREATEST",
        least: "LEAST",
        json_extract: "JSON_EXTRACT",
        json_object: "JSON_OBJECT",
    };

    /// Quote an identifier, doubling embedded quote characters
    pub fn quote_ident(&self, name: &str) -> String {
        let q = self.quote.to_string();
        format!("{q}{}{q}", name.replace(self.quote, &format!("{q}{q}")))
    }

    /// Extract `key` from the JSON document in `column`
    ///
    /// `key` must be a validated identifier.
    pub fn json_extract(&self, column: &str, key: &str) -> String {
        format!("{}({}, '$.{}')", self.json_extract, self.quote_ident(column), key)
    }

    /// Build a JSON object from `(key, expression)` pairs
    pub fn json_object(&self, pairs: &[(String, String)]) -> String {
        let body = pairs
            .iter()
            .map(|(key, expr)| format!("'{}', {}", key, expr))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{}({})", self.json_object, body)
    }

    /// Row-wise maximum of several expressions
    pub fn greatest(&self, operands: &[String]) -> String {
        format!("{}({})", self.greatest, operands.join(", "))
    }

    /// Row-wise minimum of several expressions
    pub fn least(&self, operands: &[String]) -> String {
        format!("{}({})", self.least, operands.join(", "))
    }

    /// Column type for a definition
    pub fn column_type(&self, column: &ColumnDef) -> String {
        let is_sqlite = self.name == Self::SQLITE.name;
        match column.data_type {
            DataType::String => format!("VARCHAR({})", column.length.unwrap_or(255)),
            DataType::Int if is_sqlite => "INTEGER".to_string(),
            DataType::Int => "BIGINT".to_string(),
            DataType::Json if is_sqlite => "TEXT".to_string(),
            DataType::Json => "JSON".to_string(),
            DataType::Datetime if is_sqlite => "TEXT".to_string(),
            DataType::Datetime => "DATETIME".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(Dialect::SQLITE.quote_ident("client"), "\"client\"");
        assert_eq!(Dialect::SQLITE.quote_ident("a\"b"), "\"a\"\"b\"");
        assert_eq!(Dialect::MYSQL.quote_ident("client"), "`client`");
    }

    #[test]
    fn test_json_helpers() {
        assert_eq!(
            Dialect::SQLITE.json_extract("interval_0_1", "total"),
            "json_extract(\"interval_0_1\", '$.total')"
        );
        assert_eq!(
            Dialect::MYSQL.json_object(&[("a".to_string(), "1".to_string())]),
            "JSON_OBJECT('a', 1)"
        );
        assert_eq!(
            Dialect::MYSQL.greatest(&["x".to_string(), "y".to_string()]),
            "GREATEST(x, y)"
        );
    }

    #[test]
    fn test_column_types() {
        let json = ColumnDef::new("interval_0_1", DataType::Json);
        assert_eq!(Dialect::SQLITE.column_type(&json), "TEXT");
        assert_eq!(Dialect::MYSQL.column_type(&json), "JSON");
        let name = ColumnDef::new("client", DataType::String).with_length(64);
        assert_eq!(Dialect::SQLITE.column_type(&name), "VARCHAR(64)");
    }
}
