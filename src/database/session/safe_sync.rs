//! Safe whole-database resynchronization
//!
//! Rebuilding a live schema in place: every table is renamed to
//! `<name>_back`, secondary indexes are dropped, and a [`SchemaRebuilder`]
//! recreates and repopulates the tables under their original names. On
//! success the backups are dropped; on any failure [`SafeSync`] restores the
//! backups so each original name again holds its original data.
//!
//! ```text
//! BackingUp -> DroppingIndexes -> Rebuilding -> Committing -> Done
//!     |              |                |
//!     +--------------+----------------+--> RollingBack
//! ```

use serde::Serialize;
use tracing::{error, info, warn};

use crate::database::core::DbiConnection;
use crate::database::session::lock::LOCK_TABLE;
use crate::error::BackendError;

pub const BACKUP_SUFFIX: &str = "_back";

/// Recreates and repopulates the application tables
pub trait SchemaRebuilder {
    fn rebuild(&mut self, conn: &mut DbiConnection) -> Result<(), BackendError>;
}

impl<F> SchemaRebuilder for F
where
    F: FnMut(&mut DbiConnection) -> Result<(), BackendError>,
{
    fn rebuild(&mut self, conn: &mut DbiConnection) -> Result<(), BackendError> {
        self(conn)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    BackingUp,
    DroppingIndexes,
    Rebuilding,
    Committing,
    RollingBack,
    Done,
}

/// Bulk operation applied by [`table_operation`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableOp {
    /// Rename `t` to `t_back`
    Backup,
    /// Drop `t` if present and rename `t_back` to `t`
    Rollback,
    /// Drop `t_back`
    DropBackup,
    /// Drop `t`
    Drop,
    /// Delete every row of `t`
    Empty,
}

pub fn backup_name(table: &str) -> String {
    format!("{}{}", table, BACKUP_SUFFIX)
}

/// Apply `op` to every table except the lock table
///
/// `Rollback` keeps going past individual failures and reports the first one;
/// every other operation stops at the first failure.
pub fn table_operation(
    conn: &mut DbiConnection,
    tables: &[String],
    op: TableOp,
) -> Result<(), BackendError> {
    let mut first_error = None;
    for table in tables.iter().filter(|t| t.as_str() != LOCK_TABLE) {
        let backup = backup_name(table);
        let result = match op {
            TableOp::Backup => conn.rename_table(table, &backup),
            TableOp::DropBackup => conn.drop_table(&backup),
            TableOp::Drop => conn.drop_table(table),
            TableOp::Empty => conn
                .execute(&format!("DELETE FROM {}", table))
                .map(|_| ()),
            TableOp::Rollback => restore_table(conn, table, &backup),
        };
        if let Err(e) = result {
            error!("{:?} of table {} failed: {}", op, table, e);
            if op != TableOp::Rollback {
                return Err(e);
            }
            first_error.get_or_insert(e);
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn restore_table(conn: &mut DbiConnection, table: &str, backup: &str) -> Result<(), BackendError> {
    let existing = conn.get_table_list()?;
    if !existing.iter().any(|t| t == backup) {
        warn!("no backup {} to restore", backup);
        return Ok(());
    }
    if existing.iter().any(|t| t == table) {
        conn.drop_table(table)?;
    }
    conn.rename_table(backup, table)
}

/// One resync attempt over a connection
pub struct SafeSync<'a> {
    conn: &'a mut DbiConnection,
    tables: Vec<String>,
    renamed: Vec<String>,
    phase: SyncPhase,
}

impl<'a> SafeSync<'a> {
    /// Snapshot the table set to operate on
    pub fn new(conn: &'a mut DbiConnection) -> Result<Self, BackendError> {
        let tables = conn
            .get_table_list()?
            .into_iter()
            .filter(|t| t != LOCK_TABLE)
            .collect();
        Ok(Self {
            conn,
            tables,
            renamed: vec![],
            phase: SyncPhase::BackingUp,
        })
    }

    pub fn tables(&self) -> &[String] {
        &self.tables
    }

    fn enter(&mut self, next: SyncPhase) {
        info!("safe sync: {:?} -> {:?}", self.phase, next);
        self.phase = next;
    }

    /// Run the resync with `rebuilder`
    pub fn run(mut self, rebuilder: &mut dyn SchemaRebuilder) -> Result<(), BackendError> {
        if let Some(stale) = self
            .tables
            .iter()
            .find(|t| self.tables.contains(&backup_name(t)))
        {
            return Err(BackendError::server(format!(
                "backup table {} already exists, refusing to resync",
                backup_name(stale)
            )));
        }

        if self.tables.is_empty() {
            self.enter(SyncPhase::Rebuilding);
            rebuilder.rebuild(self.conn)?;
            self.enter(SyncPhase::Done);
            return Ok(());
        }

        info!("backing up {} tables", self.tables.len());
        let tables = self.tables.clone();
        for table in &tables {
            if let Err(e) = self.conn.rename_table(table, &backup_name(table)) {
                self.roll_back();
                return Err(BackendError::server(format!(
                    "failed to back up table {}: {}",
                    table, e
                )));
            }
            self.renamed.push(table.clone());
        }

        self.enter(SyncPhase::DroppingIndexes);
        if let Err(e) = self.drop_indexes() {
            self.roll_back();
            return Err(BackendError::server(format!("failed to drop indexes: {}", e)));
        }

        self.enter(SyncPhase::Rebuilding);
        if let Err(e) = rebuilder.rebuild(self.conn) {
            error!("rebuild failed, restoring backups: {}", e);
            self.roll_back();
            return Err(e);
        }

        self.enter(SyncPhase::Committing);
        let renamed = std::mem::take(&mut self.renamed);
        if let Err(e) = table_operation(self.conn, &renamed, TableOp::DropBackup) {
            return Err(BackendError::server(format!(
                "rebuild succeeded but backups could not be dropped: {}",
                e
            )));
        }
        self.enter(SyncPhase::Done);
        info!("resync of {} tables complete", tables.len());
        Ok(())
    }

    fn drop_indexes(&mut self) -> Result<(), BackendError> {
        for index in self.conn.get_index_list()? {
            self.conn.drop_index(&index)?;
        }
        Ok(())
    }

    /// Restore every renamed table, newest first
    fn roll_back(&mut self) {
        self.enter(SyncPhase::RollingBack);
        let mut renamed = std::mem::take(&mut self.renamed);
        renamed.reverse();
        if let Err(e) = table_operation(self.conn, &renamed, TableOp::Rollback) {
            error!("rollback incomplete: {}", e);
        }
    }
}
