#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! dbikit - A resilient multi-dialect SQL backend
//!
//! dbikit persists an application's data into SQLite, MySQL or PostgreSQL
//! through one connection abstraction. It can be used as both a library and
//! a small command-line tool for inspecting a store.
//!
//! # Feature Flags
//!
//! | Feature | Description | Key Dependencies |
//! |---------|-------------|------------------|
//! | (none)  | Library: connections, dialects, sessions | `rusqlite`, `config` |
//! | `cli`   | The `dbikit` binary | `clap`, `tracing-subscriber` |
//!
//! # Architecture
//!
//! - **[`database`]**: all database functionality
//!   - `core`: connections with bounded retry, dialect DDL, statements and
//!     typed results, drivers, schema version marker, self-test
//!   - `session`: session lifecycle, advisory lock, safe resync
//! - **[`config`]**: configuration file and connection options
//! - **[`error`]**: the `BackendError` taxonomy
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use dbikit::{ConnectionOptions, DbiBackend, Dialect, DriverContext, SessionMode};
//!
//! let ctx = DriverContext::new();
//! let options = ConnectionOptions::sqlite(Path::new("/tmp"), "books.sqlite");
//!
//! let mut backend = DbiBackend::new(Dialect::Sqlite);
//! backend.session_begin(&ctx, &options, SessionMode::create())?;
//!
//! backend.safe_sync(&mut |conn: &mut DbiConnection| {
//!     conn.execute("CREATE TABLE accounts (name text)")?;
//!     Ok(())
//! })?;
//!
//! backend.session_end();
//! ```

pub mod config;
pub mod database;
pub mod error;

// =============================================================================
// Configuration
// =============================================================================

pub use config::{ConnectionOptions, DbikitConfig};

// =============================================================================
// Errors
// =============================================================================

pub use error::{BackendError, DriverError, ErrorKind};

// =============================================================================
// Database
// =============================================================================

pub use database::{
    ColumnInfo, ColumnType, DbiConnection, Dialect, DialectProvider, Driver, DriverContext,
    DriverFactory, IndexDescriptor, SchemaManager, SchemaStatus, SqlResult, SqlRow, SqlStatement,
    TableSchema, SCHEMA_VERSION,
};

pub use database::{DbiBackend, LockManager, LockRecord, SafeSync, SchemaRebuilder, SessionMode};
