//! SQL dialect providers
//!
//! Every syntax difference between the supported engines lives here: column
//! type names, autoincrement spelling, catalog queries for tables and
//! indexes, and the shape of `DROP INDEX`.
//!
//! | Dialect | 64-bit int | autoincrement     | index token      |
//! |---------|------------|-------------------|------------------|
//! | SQLite  | `bigint`   | `AUTOINCREMENT`   | `index`          |
//! | MySQL   | `bigint`   | `AUTO_INCREMENT`  | `index table`    |
//! | PgSQL   | `int8`     | `serial` type     | `index`          |

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::database::core::DbiConnection;
use crate::error::BackendError;

/// Supported SQL engines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Embedded file database (SQLite 3)
    Sqlite,
    /// MySQL / MariaDB server
    Mysql,
    /// PostgreSQL server
    Pgsql,
}

impl Dialect {
    pub fn all() -> [Dialect; 3] {
        [Dialect::Sqlite, Dialect::Mysql, Dialect::Pgsql]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite3",
            Dialect::Mysql => "mysql",
            Dialect::Pgsql => "pgsql",
        }
    }

    pub fn from_name(s: &str) -> Option<Dialect> {
        match s.to_lowercase().as_str() {
            "sqlite" | "sqlite3" | "file" => Some(Dialect::Sqlite),
            "mysql" | "mariadb" => Some(Dialect::Mysql),
            "pgsql" | "postgres" | "postgresql" => Some(Dialect::Pgsql),
            _ => None,
        }
    }

    /// Default server port, `None` for the embedded engine
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Dialect::Sqlite => None,
            Dialect::Mysql => Some(3306),
            Dialect::Pgsql => Some(5432),
        }
    }

    /// Database to connect to when the target database must be created
    pub fn admin_database(&self) -> Option<&'static str> {
        match self {
            Dialect::Sqlite => None,
            Dialect::Mysql => Some("mysql"),
            Dialect::Pgsql => Some("postgres"),
        }
    }

    /// Get the DDL/catalog provider for this dialect
    pub fn provider(&self) -> &'static dyn DialectProvider {
        match self {
            Dialect::Sqlite => &SqliteProvider,
            Dialect::Mysql => &MysqlProvider,
            Dialect::Pgsql => &PgsqlProvider,
        }
    }

    /// Quote a string literal for this dialect
    ///
    /// Single quotes are doubled everywhere. MySQL treats backslash as an
    /// escape character inside literals, so it is doubled as well.
    pub fn quote_string(&self, unquoted: &str) -> String {
        let mut quoted = String::with_capacity(unquoted.len() + 2);
        quoted.push('\'');
        for c in unquoted.chars() {
            match c {
                '\'' => quoted.push_str("''"),
                '\\' if *self == Dialect::Mysql => quoted.push_str("\\\\"),
                _ => quoted.push(c),
            }
        }
        quoted.push('\'');
        quoted
    }

    /// strftime-style layout used when writing timestamps as literals
    pub fn timespec_format(&self) -> &'static str {
        match self {
            Dialect::Sqlite | Dialect::Mysql => "%Y%m%d%H%M%S",
            Dialect::Pgsql => "%Y%m%d %H%M%S",
        }
    }

    pub fn format_timespec(&self, ts: &DateTime<Utc>) -> String {
        ts.format(self.timespec_format()).to_string()
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Logical column types understood by the DDL generator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Int,
    Int64,
    Double,
    String,
    Date,
    DateTime,
}

impl ColumnType {
    pub fn from_name(s: &str) -> Option<ColumnType> {
        match s.to_lowercase().as_str() {
            "int" | "integer" => Some(ColumnType::Int),
            "int64" | "bigint" => Some(ColumnType::Int64),
            "double" | "float" => Some(ColumnType::Double),
            "string" | "text" | "varchar" => Some(ColumnType::String),
            "date" => Some(ColumnType::Date),
            "datetime" | "timestamp" => Some(ColumnType::DateTime),
            _ => None,
        }
    }
}

/// Description of one column for DDL generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub col_type: ColumnType,
    /// Only honoured for string columns
    pub size: Option<u32>,
    pub primary_key: bool,
    pub autoinc: bool,
    pub not_null: bool,
    pub unicode: bool,
}

impl ColumnInfo {
    pub fn new(name: &str, col_type: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            col_type,
            size: None,
            primary_key: false,
            autoinc: false,
            not_null: false,
            unicode: false,
        }
    }

    pub fn size(mut self, size: u32) -> Self {
        self.size = Some(size);
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn autoinc(mut self) -> Self {
        self.autoinc = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn unicode(mut self) -> Self {
        self.unicode = true;
        self
    }

    fn string_size(&self) -> Option<u32> {
        match (self.col_type, self.size) {
            (ColumnType::String, Some(n)) if n > 0 => Some(n),
            _ => None,
        }
    }
}

/// A table name with its ordered columns, the input of
/// [`DialectProvider::create_table_ddl`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
}

impl TableSchema {
    pub fn new(name: &str, columns: Vec<ColumnInfo>) -> Self {
        Self {
            name: name.to_string(),
            columns,
        }
    }
}

/// A secondary index to create
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
}

impl IndexDescriptor {
    pub fn new(name: &str, table: &str, columns: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            table: table.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        }
    }
}

/// Build `CREATE INDEX <name> ON <table>(<col>, ...)`
pub fn create_index_ddl(index: &IndexDescriptor) -> String {
    format!(
        "CREATE INDEX {} ON {}({})",
        index.name,
        index.table,
        index.columns.join(", ")
    )
}

/// Per-dialect DDL generation and catalog introspection
///
/// Implementations hold no state; catalog operations run through the
/// connection they are given so they share its retry and error handling.
pub trait DialectProvider: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Append one column definition (`name type [size] [flags]`) to `ddl`
    fn append_col_def(&self, ddl: &mut String, info: &ColumnInfo);

    fn create_table_ddl(&self, table: &TableSchema) -> String {
        let mut ddl = format!("CREATE TABLE {}(", table.name);
        for (i, info) in table.columns.iter().enumerate() {
            if i != 0 {
                ddl.push_str(", ");
            }
            self.append_col_def(&mut ddl, info);
        }
        ddl.push(')');
        ddl
    }

    /// Statements adding `columns` to an existing table
    fn add_columns_ddl(&self, table_name: &str, columns: &[ColumnInfo]) -> Vec<String> {
        if columns.is_empty() {
            return vec![];
        }
        let mut ddl = format!("ALTER TABLE {} ", table_name);
        for (i, info) in columns.iter().enumerate() {
            if i != 0 {
                ddl.push_str(", ");
            }
            ddl.push_str("ADD COLUMN ");
            self.append_col_def(&mut ddl, info);
        }
        vec![ddl]
    }

    /// Catalog query whose first column lists every table of `dbname`
    fn table_list_sql(&self, dbname: &str) -> String;

    /// Tables the engine keeps for its own use
    fn is_housekeeping_table(&self, _name: &str) -> bool {
        false
    }

    /// List application tables, engine housekeeping tables removed
    fn get_table_list(
        &self,
        conn: &mut DbiConnection,
        dbname: &str,
    ) -> Result<Vec<String>, BackendError> {
        let stmt = conn.create_statement(&self.table_list_sql(dbname));
        let result = conn.execute_select(&stmt)?;
        let mut tables = vec![];
        for row in result {
            let name = row?.get_string_at(0)?;
            if !self.is_housekeeping_table(&name) {
                tables.push(name);
            }
        }
        Ok(tables)
    }

    /// List secondary (non-primary-key, non-automatic) index tokens
    ///
    /// The token shape is dialect specific; the only guarantee is that
    /// [`DialectProvider::drop_index`] of the same dialect accepts it.
    fn get_index_list(&self, conn: &mut DbiConnection) -> Result<Vec<String>, BackendError>;

    fn drop_index(&self, conn: &mut DbiConnection, token: &str) -> Result<(), BackendError> {
        conn.execute(&format!("DROP INDEX {}", token)).map(|_| ())
    }
}

fn collect_first_column(
    conn: &mut DbiConnection,
    sql: &str,
) -> Result<Vec<String>, BackendError> {
    let stmt = conn.create_statement(sql);
    let result = conn.execute_select(&stmt)?;
    let mut values = vec![];
    for row in result {
        values.push(row?.get_string_at(0)?);
    }
    Ok(values)
}

fn append_flags(ddl: &mut String, info: &ColumnInfo, autoinc_keyword: Option<&str>) {
    if info.primary_key {
        ddl.push_str(" PRIMARY KEY");
    }
    if info.autoinc {
        if let Some(keyword) = autoinc_keyword {
            ddl.push(' ');
            ddl.push_str(keyword);
        }
    }
    if info.not_null {
        ddl.push_str(" NOT NULL");
    }
}

/// SQLite: typeless storage, datetimes kept as text
pub struct SqliteProvider;

impl DialectProvider for SqliteProvider {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn append_col_def(&self, ddl: &mut String, info: &ColumnInfo) {
        let type_name = match info.col_type {
            ColumnType::Int => "integer",
            ColumnType::Int64 => "bigint",
            ColumnType::Double => "float8",
            ColumnType::String | ColumnType::Date | ColumnType::DateTime => "text",
        };
        ddl.push_str(&info.name);
        ddl.push(' ');
        ddl.push_str(type_name);
        if let Some(size) = info.string_size() {
            ddl.push_str(&format!("({})", size));
        }
        append_flags(ddl, info, Some("AUTOINCREMENT"));
    }

    fn add_columns_ddl(&self, table_name: &str, columns: &[ColumnInfo]) -> Vec<String> {
        // one ADD COLUMN per ALTER TABLE
        columns
            .iter()
            .map(|info| {
                let mut ddl = format!("ALTER TABLE {} ADD COLUMN ", table_name);
                self.append_col_def(&mut ddl, info);
                ddl
            })
            .collect()
    }

    fn table_list_sql(&self, _dbname: &str) -> String {
        "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name".to_string()
    }

    fn is_housekeeping_table(&self, name: &str) -> bool {
        name == "sqlite_sequence" || name.starts_with("sqlite_stat")
    }

    fn get_index_list(&self, conn: &mut DbiConnection) -> Result<Vec<String>, BackendError> {
        collect_first_column(
            conn,
            "SELECT name FROM sqlite_master WHERE type = 'index' AND name NOT LIKE 'sqlite_autoindex%'",
        )
    }
}

/// MySQL: indexes are scoped to their table
pub struct MysqlProvider;

impl MysqlProvider {
    /// Split an `index table` token; `None` unless it has exactly one space
    pub fn split_index_token(token: &str) -> Option<(&str, &str)> {
        if token.matches(' ').count() != 1 {
            return None;
        }
        let (index, table) = token.split_once(' ')?;
        if index.is_empty() || table.is_empty() {
            return None;
        }
        Some((index, table))
    }
}

impl DialectProvider for MysqlProvider {
    fn dialect(&self) -> Dialect {
        Dialect::Mysql
    }

    fn append_col_def(&self, ddl: &mut String, info: &ColumnInfo) {
        let type_name = match info.col_type {
            ColumnType::Int => "integer",
            ColumnType::Int64 => "bigint",
            ColumnType::Double => "double",
            ColumnType::String => "varchar",
            ColumnType::Date => "date",
            ColumnType::DateTime => "TIMESTAMP NULL DEFAULT 0",
        };
        ddl.push_str(&info.name);
        ddl.push(' ');
        ddl.push_str(type_name);
        if let Some(size) = info.string_size() {
            ddl.push_str(&format!("({})", size));
        }
        // the character set must directly follow the type
        if info.unicode {
            ddl.push_str(" CHARACTER SET utf8");
        }
        append_flags(ddl, info, Some("AUTO_INCREMENT"));
    }

    fn table_list_sql(&self, dbname: &str) -> String {
        format!("SHOW TABLES FROM {}", dbname)
    }

    fn get_index_list(&self, conn: &mut DbiConnection) -> Result<Vec<String>, BackendError> {
        let dbname = conn.dbname().to_string();
        let tables = self.get_table_list(conn, &dbname)?;
        let mut seen = HashSet::new();
        let mut tokens = vec![];
        for table in tables {
            let sql = format!("SHOW INDEXES IN {} WHERE Key_name != 'PRIMARY'", table);
            let stmt = conn.create_statement(&sql);
            let result = match conn.execute_select(&stmt) {
                Ok(result) => result,
                Err(e) => {
                    warn!("Index table retrieval error on table {}: {}", table, e);
                    continue;
                }
            };
            for row in result {
                // Key_name is the third column; one row per indexed column
                let index_name = row?.get_string_at(2)?;
                let token = format!("{} {}", index_name, table);
                if seen.insert(token.clone()) {
                    tokens.push(token);
                }
            }
        }
        Ok(tokens)
    }

    fn drop_index(&self, conn: &mut DbiConnection, token: &str) -> Result<(), BackendError> {
        match Self::split_index_token(token) {
            Some((index, table)) => conn
                .execute(&format!("DROP INDEX {} ON {}", index, table))
                .map(|_| ()),
            None => {
                warn!(
                    "Drop index error: invalid MySQL index format (<index> <table>): {}",
                    token
                );
                Ok(())
            }
        }
    }
}

/// PostgreSQL: `serial` instead of an autoincrement keyword
pub struct PgsqlProvider;

const PGSQL_HOUSEKEEPING_TABLES: &[&str] = &[
    "sql_features",
    "sql_implementation_info",
    "sql_languages",
    "sql_packages",
    "sql_parts",
    "sql_sizing",
    "sql_sizing_profiles",
];

impl DialectProvider for PgsqlProvider {
    fn dialect(&self) -> Dialect {
        Dialect::Pgsql
    }

    fn append_col_def(&self, ddl: &mut String, info: &ColumnInfo) {
        let type_name = match info.col_type {
            ColumnType::Int if info.autoinc => "serial",
            ColumnType::Int => "integer",
            ColumnType::Int64 => "int8",
            ColumnType::Double => "double precision",
            ColumnType::String => "varchar",
            ColumnType::Date => "date",
            ColumnType::DateTime => "timestamp without time zone",
        };
        ddl.push_str(&info.name);
        ddl.push(' ');
        ddl.push_str(type_name);
        if let Some(size) = info.string_size() {
            ddl.push_str(&format!("({})", size));
        }
        append_flags(ddl, info, None);
    }

    fn table_list_sql(&self, _dbname: &str) -> String {
        "SELECT relname FROM pg_class WHERE relname !~ '^pg_' AND relkind = 'r' ORDER BY relname"
            .to_string()
    }

    fn is_housekeeping_table(&self, name: &str) -> bool {
        PGSQL_HOUSEKEEPING_TABLES.contains(&name)
    }

    fn get_index_list(&self, conn: &mut DbiConnection) -> Result<Vec<String>, BackendError> {
        debug!("Retrieving postgres index list");
        collect_first_column(
            conn,
            "SELECT relname FROM pg_class AS a INNER JOIN pg_index AS b ON (b.indexrelid = a.oid) \
             INNER JOIN pg_namespace AS c ON (a.relnamespace = c.oid) \
             WHERE reltype = '0' AND indisprimary = 'f' AND nspname = 'public'",
        )
    }
}
