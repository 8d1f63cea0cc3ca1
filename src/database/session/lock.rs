//! Cross-process advisory lock
//!
//! The lock is a row in a dedicated table holding the hostname and process id
//! of the owner. Checking for an existing row and inserting ours happen in one
//! transaction, so the engine's isolation makes the sequence race free.

use serde::Serialize;
use tracing::{info, warn};

use crate::database::core::{ColumnInfo, ColumnType, DbiConnection, TableSchema};
use crate::error::BackendError;

pub const LOCK_TABLE: &str = "dbilock";

/// Longest hostname stored in the lock table
pub const HOST_NAME_MAX: usize = 255;

/// One row of the lock table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockRecord {
    pub hostname: String,
    pub pid: i64,
}

impl LockRecord {
    pub fn new(hostname: &str, pid: i64) -> Self {
        let mut hostname = hostname.to_string();
        if hostname.len() > HOST_NAME_MAX {
            let mut end = HOST_NAME_MAX;
            while !hostname.is_char_boundary(end) {
                end -= 1;
            }
            hostname.truncate(end);
        }
        Self { hostname, pid }
    }

    /// Record for the running process
    pub fn current() -> Self {
        Self::new(&host_name(), std::process::id() as i64)
    }
}

fn host_name() -> String {
    gethostname::gethostname().to_string_lossy().into_owned()
}

impl std::fmt::Display for LockRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.hostname, self.pid)
    }
}

/// Takes and releases the lock on behalf of one owner
pub struct LockManager {
    owner: LockRecord,
}

impl LockManager {
    pub fn new(owner: LockRecord) -> Self {
        Self { owner }
    }

    pub fn for_current_process() -> Self {
        Self::new(LockRecord::current())
    }

    pub fn owner(&self) -> &LockRecord {
        &self.owner
    }

    fn lock_table() -> TableSchema {
        TableSchema::new(LOCK_TABLE, vec![
            ColumnInfo::new("hostname", ColumnType::String).size(HOST_NAME_MAX as u32),
            ColumnInfo::new("pid", ColumnType::Int),
        ])
    }

    /// Acquire the lock
    ///
    /// Fails with [`BackendError::Locked`] if another record exists, unless
    /// `ignore_lock` is set, in which case existing records are removed.
    pub fn lock(&self, conn: &mut DbiConnection, ignore_lock: bool) -> Result<(), BackendError> {
        if !conn.does_table_exist(LOCK_TABLE)? {
            conn.create_table(&Self::lock_table())?;
        }
        conn.begin()?;

        match self.lock_in_transaction(conn, ignore_lock) {
            Ok(()) => self.commit_or_rollback(conn),
            Err(e) => {
                self.rollback_quietly(conn);
                match e {
                    BackendError::Locked(_) => Err(e),
                    other => Err(BackendError::server(other.to_string())),
                }
            }
        }
    }

    fn lock_in_transaction(
        &self,
        conn: &mut DbiConnection,
        ignore_lock: bool,
    ) -> Result<(), BackendError> {
        let holders = self.holders(conn)?;
        if !holders.is_empty() {
            if !ignore_lock {
                let held_by: Vec<String> = holders.iter().map(|h| h.to_string()).collect();
                return Err(BackendError::Locked(held_by.join(", ")));
            }
            info!("ignoring lock held by {} record(s)", holders.len());
            conn.execute(&format!("DELETE FROM {}", LOCK_TABLE))?;
        }
        let insert = format!(
            "INSERT INTO {} VALUES ({}, {})",
            LOCK_TABLE,
            conn.quote_string(&self.owner.hostname),
            self.owner.pid
        );
        conn.execute(&insert)?;
        Ok(())
    }

    /// All records currently in the lock table
    pub fn holders(&self, conn: &mut DbiConnection) -> Result<Vec<LockRecord>, BackendError> {
        let stmt = conn.create_statement(&format!("SELECT hostname, pid FROM {}", LOCK_TABLE));
        let mut records = vec![];
        for row in conn.execute_select(&stmt)? {
            let row = row?;
            records.push(LockRecord::new(&row.get_string_at(0)?, row.get_int_at(1)?));
        }
        Ok(records)
    }

    /// Release our lock record
    ///
    /// Returns `false` when there was nothing to release: no lock table, or
    /// no row matching this owner (stolen or already released).
    pub fn unlock(&self, conn: &mut DbiConnection) -> Result<bool, BackendError> {
        if !conn.does_table_exist(LOCK_TABLE)? {
            warn!("no lock table in database, so not unlocking it");
            return Ok(false);
        }
        conn.begin()?;

        let mut stmt = conn.create_statement(&format!("SELECT * FROM {}", LOCK_TABLE));
        let pid = self.owner.pid.to_string();
        stmt.add_where_cond(&[("hostname", self.owner.hostname.as_str()), ("pid", pid.as_str())]);

        let found = match conn.execute_select(&stmt) {
            Ok(result) => result.num_rows() > 0,
            Err(e) => {
                self.rollback_quietly(conn);
                return Err(BackendError::server(e.to_string()));
            }
        };
        if !found {
            self.rollback_quietly(conn);
            warn!("there was no lock entry for {} in the database", self.owner);
            return Ok(false);
        }

        let delete = stmt.to_sql().replacen("SELECT *", "DELETE", 1);
        if let Err(e) = conn.execute(&delete) {
            self.rollback_quietly(conn);
            return Err(BackendError::server(e.to_string()));
        }
        self.commit_or_rollback(conn)?;
        Ok(true)
    }

    /// Delete every lock record regardless of owner
    pub fn clear(&self, conn: &mut DbiConnection) -> Result<u64, BackendError> {
        if !conn.does_table_exist(LOCK_TABLE)? {
            return Ok(0);
        }
        conn.execute(&format!("DELETE FROM {}", LOCK_TABLE))
    }

    // A failed COMMIT can leave the transaction open, e.g. SQLITE_BUSY
    fn commit_or_rollback(&self, conn: &mut DbiConnection) -> Result<(), BackendError> {
        conn.commit().map_err(|e| {
            self.rollback_quietly(conn);
            BackendError::server(e.to_string())
        })
    }

    fn rollback_quietly(&self, conn: &mut DbiConnection) {
        if let Err(e) = conn.rollback() {
            warn!("rollback failed: {}", e);
        }
    }
}
