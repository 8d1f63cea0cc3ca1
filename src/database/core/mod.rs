//! Core database infrastructure
//!
//! This module provides the foundational components every session uses:
//! - `DbiConnection`: resilient connection with bounded retry
//! - `DialectProvider`: per-dialect DDL and catalog introspection
//! - `Driver` / `DriverContext`: engine handles and their owned registry
//! - `SqlStatement` / `SqlResult`: statement text and typed result rows
//! - `SchemaManager`: schema version marker
//! - `run_self_test`: large number capability check

pub mod classify;
mod connection;
mod dialect;
mod driver;
mod result;
mod schema;
mod selftest;
mod sqlite;
mod statement;

#[cfg(test)]
pub(crate) mod testing;

pub use classify::{classify, ErrorClass};
pub use connection::{DbiConnection, DEFAULT_BACKOFF, MAX_CONNECT_ATTEMPTS};
pub use dialect::{
    create_index_ddl, ColumnInfo, ColumnType, Dialect, DialectProvider, IndexDescriptor,
    MysqlProvider, PgsqlProvider, SqliteProvider, TableSchema,
};
pub use driver::{
    BufferedCursor, ColumnMeta, Driver, DriverContext, DriverFactory, FieldType, FieldValue,
    RawCursor,
};
pub use result::{SqlResult, SqlRow};
pub use schema::{
    SchemaManager, SchemaStatus, APP_VERSION_KEY, RESAVE_VERSION, RESAVE_VERSION_KEY,
    SCHEMA_VERSION, VERSION_TABLE,
};
pub use selftest::{
    run_self_test, LibraryTestResult, DOUBLE_TEST_VALUE, DOUBLE_TOLERANCE, INT64_TEST_VALUE,
    UINT64_TEST_VALUE,
};
pub use sqlite::{SqliteDriver, SqliteDriverFactory};
pub use statement::SqlStatement;
