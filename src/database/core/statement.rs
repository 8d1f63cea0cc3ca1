//! SQL statement text
//!
//! A statement is finished SQL text plus the dialect used to quote values
//! appended through [`SqlStatement::add_where_cond`].

use crate::database::core::Dialect;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlStatement {
    sql: String,
    dialect: Dialect,
}

impl SqlStatement {
    pub fn new(sql: &str, dialect: Dialect) -> Self {
        Self {
            sql: sql.to_string(),
            dialect,
        }
    }

    /// Append `WHERE col1 = 'v1' AND col2 = 'v2' ...`
    ///
    /// Values are quoted for the statement's dialect. An empty list leaves
    /// the statement unchanged.
    pub fn add_where_cond(&mut self, conditions: &[(&str, &str)]) {
        for (i, (column, value)) in conditions.iter().enumerate() {
            self.sql.push_str(if i == 0 { " WHERE " } else { " AND " });
            self.sql.push_str(column);
            self.sql.push_str(" = ");
            self.sql.push_str(&self.dialect.quote_string(value));
        }
    }

    pub fn to_sql(&self) -> &str {
        &self.sql
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn is_blank(&self) -> bool {
        self.sql.trim().is_empty()
    }
}

impl std::fmt::Display for SqlStatement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.sql)
    }
}
