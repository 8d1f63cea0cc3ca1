//! Database module
//!
//! This module provides all database functionality for dbikit, organized into:
//!
//! - **core**: connection handling, dialects, drivers, statements and results
//! - **session**: one session over a store, with its lock and resync
//!
//! # Architecture
//!
//! ```text
//! database/
//! ├── core/             # Foundation
//! │   ├── classify      # driver error -> error class
//! │   ├── connection    # DbiConnection with bounded retry
//! │   ├── dialect       # per-dialect DDL and catalog queries
//! │   ├── driver        # Driver / RawCursor / DriverContext
//! │   ├── sqlite        # bundled rusqlite driver
//! │   ├── statement     # SqlStatement
//! │   ├── result        # SqlResult / SqlRow
//! │   ├── schema        # versions table
//! │   └── selftest      # large number round trip check
//! │
//! └── session/          # One open store
//!     ├── lock          # dbilock advisory lock
//!     └── safe_sync     # backup / rebuild / rollback
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use dbikit::database::{DbiConnection, Dialect, DriverContext};
//! use dbikit::ConnectionOptions;
//!
//! let ctx = DriverContext::new();
//! let mut conn = DbiConnection::open(&ctx, Dialect::Sqlite, &ConnectionOptions::in_memory())?;
//!
//! conn.execute("CREATE TABLE books (title text)")?;
//! let stmt = conn.create_statement("SELECT title FROM books");
//! for row in conn.execute_select(&stmt)? {
//!     println!("{}", row?.get_string("title")?);
//! }
//! ```

pub mod core;
pub mod session;

// =============================================================================
// Core Types
// =============================================================================

// Connections and drivers
pub use core::{
    classify, BufferedCursor, ColumnMeta, DbiConnection, Driver, DriverContext, DriverFactory,
    ErrorClass, FieldType, FieldValue, RawCursor, SqliteDriver, SqliteDriverFactory,
    DEFAULT_BACKOFF, MAX_CONNECT_ATTEMPTS,
};

// Dialects and DDL
pub use core::{
    create_index_ddl, ColumnInfo, ColumnType, Dialect, DialectProvider, IndexDescriptor,
    MysqlProvider, PgsqlProvider, SqliteProvider, TableSchema,
};

// Statements and results
pub use core::{SqlResult, SqlRow, SqlStatement};

// Schema version marker and self-test
pub use core::{
    run_self_test, LibraryTestResult, SchemaManager, SchemaStatus, RESAVE_VERSION,
    SCHEMA_VERSION, VERSION_TABLE,
};

// =============================================================================
// Session Types
// =============================================================================

pub use session::{
    backup_name, table_operation, DbiBackend, LockManager, LockRecord, SafeSync,
    SchemaRebuilder, SessionMode, SyncPhase, TableOp, BACKUP_SUFFIX, LOCK_TABLE,
};
