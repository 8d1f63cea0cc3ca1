//! Backend sessions
//!
//! A [`DbiBackend`] owns the connection for one session: it opens (and when
//! asked, creates) the store, runs the capability self-test, takes the
//! advisory lock, and releases everything when the session ends.
//!
//! - `lock`: SQL-row based advisory lock
//! - `safe_sync`: backup/rebuild/rollback resync orchestrator

pub mod lock;
pub mod safe_sync;

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};

use crate::config::ConnectionOptions;
use crate::database::core::{
    run_self_test, DbiConnection, Dialect, DriverContext, SchemaManager, SchemaStatus,
    SqliteDriver, DEFAULT_BACKOFF, RESAVE_VERSION, SCHEMA_VERSION,
};
use crate::error::BackendError;

pub use lock::{LockManager, LockRecord, HOST_NAME_MAX, LOCK_TABLE};
pub use safe_sync::{
    backup_name, table_operation, SafeSync, SchemaRebuilder, SyncPhase, TableOp, BACKUP_SUFFIX,
};

/// How a session opens its store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionMode {
    /// Take the lock even if another process holds it
    pub ignore_lock: bool,
    /// Create the store if it does not exist
    pub create: bool,
    /// Allow `create` to reuse a store that already holds data
    pub force: bool,
}

impl SessionMode {
    pub fn open() -> Self {
        Self::default()
    }

    pub fn create() -> Self {
        Self {
            create: true,
            ..Self::default()
        }
    }
}

/// Store brought into existence by `session_begin`
enum Created {
    Nothing,
    File(PathBuf),
    Database(String),
}

/// One backend session over a single connection
pub struct DbiBackend {
    dialect: Dialect,
    conn: Option<DbiConnection>,
    lock: LockManager,
    backoff: Duration,
}

impl DbiBackend {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            conn: None,
            lock: LockManager::for_current_process(),
            backoff: DEFAULT_BACKOFF,
        }
    }

    /// Lock on behalf of `owner` instead of the running process
    pub fn with_lock_owner(mut self, owner: LockRecord) -> Self {
        self.lock = LockManager::new(owner);
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    /// Connection of the open session
    pub fn connection(&mut self) -> Result<&mut DbiConnection, BackendError> {
        self.conn
            .as_mut()
            .ok_or_else(|| BackendError::ConnectFailed("no open session".to_string()))
    }

    /// Open the store described by `options`
    ///
    /// Nothing is left behind when creating the store fails: a database file
    /// or server database created by this call is removed again.
    pub fn session_begin(
        &mut self,
        ctx: &DriverContext,
        options: &ConnectionOptions,
        mode: SessionMode,
    ) -> Result<(), BackendError> {
        if self.conn.is_some() {
            self.session_end();
        }
        let (mut conn, created) = match self.dialect {
            Dialect::Sqlite => self.begin_embedded(ctx, options, mode)?,
            Dialect::Mysql | Dialect::Pgsql => self.begin_server(ctx, options, mode)?,
        };
        if let Err(e) = self.lock.lock(&mut conn, mode.ignore_lock) {
            self.discard(conn, created);
            return Err(e);
        }
        info!("session opened on {} database {}", self.dialect, conn.dbname());
        self.conn = Some(conn);
        Ok(())
    }

    fn begin_embedded(
        &self,
        ctx: &DriverContext,
        options: &ConnectionOptions,
        mode: SessionMode,
    ) -> Result<(DbiConnection, Created), BackendError> {
        let path = SqliteDriver::database_path(options);
        let existed = path.as_deref().map(Path::exists).unwrap_or(false);
        if let Some(path) = &path {
            if !existed && !mode.create {
                return Err(BackendError::FileNotFound(path.display().to_string()));
            }
            if existed && mode.create && !mode.force {
                return Err(BackendError::StoreExists(path.display().to_string()));
            }
        }

        let driver = ctx.new_driver(Dialect::Sqlite, options)?;
        let mut conn = DbiConnection::new(Dialect::Sqlite, driver).with_backoff(self.backoff);
        let checked = conn
            .connect()
            .and_then(|_| run_self_test(&mut conn).into_result());
        if let Err(e) = checked {
            conn.close();
            if let (Some(path), false) = (&path, existed) {
                remove_database_files(path);
            }
            return Err(e);
        }
        let created = match path {
            Some(path) if !existed => Created::File(path),
            _ => Created::Nothing,
        };
        Ok((conn, created))
    }

    fn begin_server(
        &self,
        ctx: &DriverContext,
        options: &ConnectionOptions,
        mode: SessionMode,
    ) -> Result<(DbiConnection, Created), BackendError> {
        let mut options = options.clone();
        if self.dialect == Dialect::Pgsql {
            options.dbname = options.dbname.to_lowercase();
        }
        let dbname = options.dbname.clone();
        let driver = ctx.new_driver(self.dialect, &options)?;
        let mut conn = DbiConnection::new(self.dialect, driver).with_backoff(self.backoff);

        let created = match conn.connect() {
            Ok(()) => {
                self.prepare_server_session(&mut conn)?;
                run_self_test(&mut conn).into_result()?;
                if mode.create && !mode.force {
                    let tables = conn.get_table_list()?;
                    if tables.iter().any(|t| t != LOCK_TABLE) {
                        return Err(BackendError::StoreExists(dbname));
                    }
                }
                Created::Nothing
            }
            Err(BackendError::NoSuchDatabase(msg)) => {
                if !mode.create {
                    return Err(BackendError::NoSuchDatabase(msg));
                }
                self.create_database(&mut conn, &dbname)?;
                conn.switch_database(&dbname)?;
                let checked = self
                    .prepare_server_session(&mut conn)
                    .and_then(|_| run_self_test(&mut conn).into_result());
                if let Err(e) = checked {
                    self.drop_database(&mut conn, &dbname);
                    return Err(e);
                }
                Created::Database(dbname)
            }
            Err(e) => return Err(e),
        };
        Ok((conn, created))
    }

    /// Close `conn` and remove the store this session just created
    fn discard(&self, mut conn: DbiConnection, created: Created) {
        match created {
            Created::Nothing => conn.close(),
            Created::File(path) => {
                conn.close();
                remove_database_files(&path);
            }
            Created::Database(dbname) => self.drop_database(&mut conn, &dbname),
        }
    }

    fn admin_database(&self) -> Result<&'static str, BackendError> {
        self.dialect.admin_database().ok_or_else(|| {
            BackendError::server(format!("{} has no administrative database", self.dialect))
        })
    }

    fn create_database(&self, conn: &mut DbiConnection, dbname: &str) -> Result<(), BackendError> {
        conn.switch_database(self.admin_database()?)?;
        info!("creating database {}", dbname);
        match self.dialect {
            Dialect::Mysql => {
                conn.execute(&format!("CREATE DATABASE {} CHARACTER SET utf8", dbname))?;
            }
            Dialect::Pgsql => {
                conn.execute(&format!(
                    "CREATE DATABASE {} WITH TEMPLATE template0 ENCODING 'UTF8'",
                    dbname
                ))?;
                conn.execute(&format!(
                    "ALTER DATABASE {} SET standard_conforming_strings TO on",
                    dbname
                ))?;
            }
            Dialect::Sqlite => {}
        }
        Ok(())
    }

    fn drop_database(&self, conn: &mut DbiConnection, dbname: &str) {
        let dropped = self
            .admin_database()
            .and_then(|admin| conn.switch_database(admin))
            .and_then(|_| conn.execute(&format!("DROP DATABASE {}", dbname)));
        if let Err(e) = dropped {
            warn!("failed to drop database {} after failed setup: {}", dbname, e);
        }
        conn.close();
    }

    /// Per-session server settings
    ///
    /// MySQL rejects zero dates under `NO_ZERO_DATE`, which the datetime
    /// column default relies on, so the mode is removed for this session.
    fn prepare_server_session(&self, conn: &mut DbiConnection) -> Result<(), BackendError> {
        if self.dialect != Dialect::Mysql {
            return Ok(());
        }
        let stmt = conn.create_statement("SELECT @@sql_mode");
        let current = match conn.execute_select(&stmt)?.next() {
            Some(row) => row?.get_string_at(0)?,
            None => return Ok(()),
        };
        let modes: Vec<&str> = current
            .split(',')
            .filter(|m| !m.is_empty() && *m != "NO_ZERO_DATE")
            .collect();
        let adjusted = modes.join(",");
        if adjusted != current {
            conn.execute(&format!("SET sql_mode = {}", conn.quote_string(&adjusted)))?;
        }
        Ok(())
    }

    /// Release the lock and close the connection
    ///
    /// Calling it again, or on a backend that never opened, is a no-op.
    pub fn session_end(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        match self.lock.unlock(&mut conn) {
            Ok(true) => {}
            Ok(false) => warn!("session lock was already released"),
            Err(e) => warn!("failed to release session lock: {}", e),
        }
        conn.close();
        info!("session on {} closed", self.dialect);
    }

    /// Whether saving into this store would overwrite existing tables
    pub fn save_may_clobber_data(&mut self) -> Result<bool, BackendError> {
        let tables = self.connection()?.get_table_list()?;
        Ok(tables.iter().any(|t| t != LOCK_TABLE))
    }

    /// Check the stored schema against `resave_version`
    pub fn load(&mut self, resave_version: i64) -> Result<SchemaStatus, BackendError> {
        let conn = self.connection()?;
        let status = SchemaManager::new(conn).check_status(resave_version)?;
        status.clone().into_result()?;
        Ok(status)
    }

    /// Rebuild a live store in place, restoring it if the rebuild fails
    pub fn safe_sync(&mut self, rebuilder: &mut dyn SchemaRebuilder) -> Result<(), BackendError> {
        let conn = self.connection()?;
        let mut stamped = |conn: &mut DbiConnection| -> Result<(), BackendError> {
            rebuilder.rebuild(conn)?;
            SchemaManager::new(conn).stamp(SCHEMA_VERSION, RESAVE_VERSION)
        };
        SafeSync::new(conn)?.run(&mut stamped)
    }

    /// Write a complete store, replacing whatever it held
    ///
    /// The old tables are kept as backups until the rebuild succeeds, so a
    /// failed sync leaves the store as it was.
    pub fn sync(&mut self, rebuilder: &mut dyn SchemaRebuilder) -> Result<(), BackendError> {
        self.safe_sync(rebuilder)
    }
}

impl Drop for DbiBackend {
    fn drop(&mut self) {
        self.session_end();
    }
}

fn remove_database_files(path: &Path) {
    let mut candidates = vec![path.to_path_buf()];
    for suffix in ["-wal", "-shm", "-journal"] {
        let mut name = path.as_os_str().to_owned();
        name.push(suffix);
        candidates.push(PathBuf::from(name));
    }
    for candidate in candidates {
        if candidate.exists() {
            if let Err(e) = std::fs::remove_file(&candidate) {
                warn!("failed to remove {}: {}", candidate.display(), e);
            }
        }
    }
}
