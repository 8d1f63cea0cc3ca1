//! Schema version marker
//!
//! A `versions` table records one version number per table name. Two
//! reserved entries describe the store as a whole: [`APP_VERSION_KEY`] is the
//! version of the library that last wrote the store and
//! [`RESAVE_VERSION_KEY`] is the oldest library version able to read it.

use tracing::info;

use crate::database::core::dialect::{ColumnInfo, ColumnType, TableSchema};
use crate::database::core::DbiConnection;
use crate::error::BackendError;

/// Current schema version written by [`SchemaManager::stamp`]
pub const SCHEMA_VERSION: i64 = 3;

/// Oldest stored schema version this library loads without a resave
pub const RESAVE_VERSION: i64 = 2;

pub const VERSION_TABLE: &str = "versions";
pub const APP_VERSION_KEY: &str = "dbikit";
pub const RESAVE_VERSION_KEY: &str = "dbikit-resave";

/// Manages the `versions` table through a connection
pub struct SchemaManager<'a> {
    conn: &'a mut DbiConnection,
}

impl<'a> SchemaManager<'a> {
    pub fn new(conn: &'a mut DbiConnection) -> Self {
        Self { conn }
    }

    fn table() -> TableSchema {
        TableSchema::new(VERSION_TABLE, vec![
            ColumnInfo::new("table_name", ColumnType::String)
                .size(50)
                .primary_key()
                .not_null(),
            ColumnInfo::new("table_version", ColumnType::Int).not_null(),
        ])
    }

    /// Create the versions table if it does not exist
    pub fn initialize(&mut self) -> Result<(), BackendError> {
        if !self.conn.does_table_exist(VERSION_TABLE)? {
            info!("creating {} table", VERSION_TABLE);
            self.conn.create_table(&Self::table())?;
        }
        Ok(())
    }

    /// Stored version of `table_name`, 0 when absent
    pub fn get_table_version(&mut self, table_name: &str) -> Result<i64, BackendError> {
        let mut stmt = self
            .conn
            .create_statement(&format!("SELECT table_version FROM {}", VERSION_TABLE));
        stmt.add_where_cond(&[("table_name", table_name)]);
        let mut result = self.conn.execute_select(&stmt)?;
        match result.next() {
            Some(row) => row?.get_int_at(0),
            None => Ok(0),
        }
    }

    pub fn set_table_version(
        &mut self,
        table_name: &str,
        version: i64,
    ) -> Result<(), BackendError> {
        let quoted = self.conn.quote_string(table_name);
        let sql = if self.get_table_version(table_name)? == 0 {
            format!(
                "INSERT INTO {} VALUES({}, {})",
                VERSION_TABLE, quoted, version
            )
        } else {
            format!(
                "UPDATE {} SET table_version = {} WHERE table_name = {}",
                VERSION_TABLE, version, quoted
            )
        };
        self.conn.execute(&sql).map(|_| ())
    }

    /// Record the library version and resave version of the store
    pub fn stamp(&mut self, app_version: i64, resave_version: i64) -> Result<(), BackendError> {
        self.initialize()?;
        self.set_table_version(APP_VERSION_KEY, app_version)?;
        self.set_table_version(RESAVE_VERSION_KEY, resave_version)
    }

    /// Compare the stored versions against `resave_version`
    pub fn check_status(&mut self, resave_version: i64) -> Result<SchemaStatus, BackendError> {
        if !self.conn.does_table_exist(VERSION_TABLE)? {
            return Ok(SchemaStatus::NotInitialized);
        }
        let stored = self.get_table_version(APP_VERSION_KEY)?;
        if stored == 0 {
            return Ok(SchemaStatus::NotInitialized);
        }
        if resave_version > stored {
            return Ok(SchemaStatus::TooOld {
                stored,
                required: resave_version,
            });
        }
        let stored_resave = self.get_table_version(RESAVE_VERSION_KEY)?;
        if resave_version < stored_resave {
            return Ok(SchemaStatus::TooNew {
                stored: stored_resave,
                supported: resave_version,
            });
        }
        Ok(SchemaStatus::Current)
    }
}

/// Status of the stored schema relative to this library
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SchemaStatus {
    /// No version marker (fresh or foreign database)
    NotInitialized,

    /// Stored schema can be used as is
    Current,

    /// Store was written by a library older than the resave version
    TooOld { stored: i64, required: i64 },

    /// Store requires a newer library
    TooNew { stored: i64, supported: i64 },
}

impl SchemaStatus {
    pub fn into_result(self) -> Result<(), BackendError> {
        match self {
            SchemaStatus::NotInitialized | SchemaStatus::Current => Ok(()),
            SchemaStatus::TooOld { stored, required } => {
                Err(BackendError::SchemaTooOld { stored, required })
            }
            SchemaStatus::TooNew { stored, supported } => {
                Err(BackendError::SchemaTooNew { stored, supported })
            }
        }
    }
}
