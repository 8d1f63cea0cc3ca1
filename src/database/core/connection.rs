//! Database connection management
//!
//! `DbiConnection` owns one driver handle and routes every statement and
//! transaction boundary through a bounded retry loop: a transient failure
//! (connection lost, can't connect) triggers a sleep, a reconnect and a new
//! attempt, up to [`MAX_CONNECT_ATTEMPTS`] consecutive attempts. Every other
//! failure is classified and returned immediately.

use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::ConnectionOptions;
use crate::database::core::classify::{classify, ErrorClass};
use crate::database::core::dialect::{
    create_index_ddl, ColumnInfo, Dialect, DialectProvider, IndexDescriptor, TableSchema,
};
use crate::database::core::driver::{Driver, DriverContext};
use crate::database::core::result::SqlResult;
use crate::database::core::statement::SqlStatement;
use crate::error::{BackendError, DriverError};

/// Consecutive attempts before a transient failure is escalated
pub const MAX_CONNECT_ATTEMPTS: u32 = 5;

/// Delay before the first retry; doubled for each further retry
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(100);

/// A resilient connection to one database
pub struct DbiConnection {
    dialect: Dialect,
    provider: &'static dyn DialectProvider,
    driver: Box<dyn Driver>,
    conn_ok: bool,
    last_error: Option<BackendError>,
    retry_enabled: bool,
    error_repeat: u32,
    backoff_base: Duration,
}

impl DbiConnection {
    /// Wrap an unconnected driver
    pub fn new(dialect: Dialect, driver: Box<dyn Driver>) -> Self {
        Self {
            dialect,
            provider: dialect.provider(),
            driver,
            conn_ok: false,
            last_error: None,
            retry_enabled: true,
            error_repeat: 0,
            backoff_base: DEFAULT_BACKOFF,
        }
    }

    /// Create a driver from `ctx` and connect it
    pub fn open(
        ctx: &DriverContext,
        dialect: Dialect,
        options: &ConnectionOptions,
    ) -> Result<Self, BackendError> {
        let driver = ctx.new_driver(dialect, options)?;
        let mut conn = Self::new(dialect, driver);
        conn.connect()?;
        Ok(conn)
    }

    /// Set the first retry delay
    pub fn with_backoff(mut self, backoff_base: Duration) -> Self {
        self.backoff_base = backoff_base;
        self
    }

    /// Enable or disable retrying of transient failures
    pub fn set_retry(&mut self, enabled: bool) {
        self.retry_enabled = enabled;
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn provider(&self) -> &'static dyn DialectProvider {
        self.provider
    }

    pub fn dbname(&self) -> &str {
        &self.driver.options().dbname
    }

    pub fn options(&self) -> &ConnectionOptions {
        self.driver.options()
    }

    /// Health flag: true only after a successful engine round trip
    pub fn is_healthy(&self) -> bool {
        self.conn_ok
    }

    /// Sticky error of the last failed operation, cleared on success
    pub fn last_error(&self) -> Option<&BackendError> {
        self.last_error.as_ref()
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    /// Consecutive transient failures seen by the current operation
    pub fn error_repeat(&self) -> u32 {
        self.error_repeat
    }

    /// Connect, retrying transient failures
    pub fn connect(&mut self) -> Result<(), BackendError> {
        self.run("connect", false, MAX_CONNECT_ATTEMPTS, |driver| {
            driver.connect()
        })
    }

    /// Point the connection at another database and connect to it
    pub fn switch_database(&mut self, dbname: &str) -> Result<(), BackendError> {
        info!("switching connection to database {}", dbname);
        self.driver.close();
        self.conn_ok = false;
        self.driver.set_dbname(dbname);
        self.connect()
    }

    /// Return health, making exactly one reconnect attempt when unhealthy
    pub fn verify(&mut self) -> bool {
        if self.conn_ok && self.driver.is_connected() {
            return true;
        }
        self.last_error = None;
        info!("connection to {} is not healthy, reconnecting", self.dbname());
        match self.driver.connect() {
            Ok(()) => {
                self.conn_ok = true;
                self.error_repeat = 0;
            }
            Err(e) => {
                warn!("reconnect failed: {}", e);
                self.conn_ok = false;
                self.last_error = Some(classify(self.dialect, &e).into_error(&e.message));
            }
        }
        self.conn_ok
    }

    /// Run `op` against the live handle with bounded retrying
    ///
    /// Each retry sleeps, reconnects and re-runs `op`. After
    /// [`MAX_CONNECT_ATTEMPTS`] transient failures the connection is marked
    /// unhealthy and [`BackendError::GaveUp`] is returned.
    pub fn retry<T, F>(&mut self, what: &str, op: F) -> Result<T, BackendError>
    where
        F: FnMut(&mut dyn Driver) -> Result<T, DriverError>,
    {
        self.run(what, true, MAX_CONNECT_ATTEMPTS, op)
    }

    fn run<T, F>(
        &mut self,
        what: &str,
        reconnect: bool,
        max_attempts: u32,
        mut op: F,
    ) -> Result<T, BackendError>
    where
        F: FnMut(&mut dyn Driver) -> Result<T, DriverError>,
    {
        self.error_repeat = 0;
        let mut last: Option<(ErrorClass, String)> = None;

        for attempt in 0..max_attempts {
            if attempt > 0 {
                if !self.retry_enabled {
                    break;
                }
                let delay = self.backoff_base.saturating_mul(1 << (attempt - 1));
                info!(
                    "{}: attempt {} of {} after {:?}",
                    what,
                    attempt + 1,
                    max_attempts,
                    delay
                );
                thread::sleep(delay);
                if reconnect {
                    if let Err(e) = self.driver.connect() {
                        let class = classify(self.dialect, &e);
                        if !class.is_retryable() {
                            return Err(self.fail(class.into_error(&e.message)));
                        }
                        self.error_repeat += 1;
                        last = Some((class, e.message));
                        continue;
                    }
                }
            }

            match op(self.driver.as_mut()) {
                Ok(value) => {
                    self.conn_ok = true;
                    self.error_repeat = 0;
                    self.last_error = None;
                    return Ok(value);
                }
                Err(e) => {
                    let class = classify(self.dialect, &e);
                    if !class.is_retryable() {
                        error!("{} failed: {}", what, e);
                        if class == ErrorClass::NoSuchDatabase {
                            self.conn_ok = false;
                        }
                        return Err(self.fail(class.into_error(&e.message)));
                    }
                    warn!("{} failed with a transient error: {}", what, e);
                    self.error_repeat += 1;
                    last = Some((class, e.message));
                }
            }
        }

        self.conn_ok = false;
        let (class, message) = last.unwrap_or((ErrorClass::CantConnect, String::new()));
        let err = if self.error_repeat >= MAX_CONNECT_ATTEMPTS {
            error!(
                "{}: giving up after {} consecutive attempts",
                what, self.error_repeat
            );
            BackendError::GaveUp {
                kind: class.into_error("").kind(),
                attempts: self.error_repeat,
                message,
            }
        } else {
            class.into_error(&message)
        };
        Err(self.fail(err))
    }

    fn fail(&mut self, err: BackendError) -> BackendError {
        self.last_error = Some(err.clone());
        err
    }

    pub fn begin(&mut self) -> Result<(), BackendError> {
        debug!("BEGIN");
        self.verify();
        self.retry("begin transaction", |driver| driver.execute("BEGIN"))
            .map(|_| ())
    }

    /// Commit; a failed commit is reported, never retried
    pub fn commit(&mut self) -> Result<(), BackendError> {
        debug!("COMMIT");
        self.run("commit transaction", false, 1, |driver| {
            driver.execute("COMMIT")
        })
        .map(|_| ())
    }

    pub fn rollback(&mut self) -> Result<(), BackendError> {
        debug!("ROLLBACK");
        self.run("rollback transaction", false, 1, |driver| {
            driver.execute("ROLLBACK")
        })
        .map(|_| ())
    }

    pub fn create_statement(&self, sql: &str) -> SqlStatement {
        SqlStatement::new(sql, self.dialect)
    }

    pub fn quote_string(&self, unquoted: &str) -> String {
        self.dialect.quote_string(unquoted)
    }

    pub fn execute_select(&mut self, stmt: &SqlStatement) -> Result<SqlResult, BackendError> {
        let sql = stmt.to_sql();
        debug!("SQL: {}", sql);
        self.retry("select", |driver| driver.query(sql))
            .map(SqlResult::new)
    }

    /// Execute a statement, returning the number of affected rows
    ///
    /// Blank statements are not sent to the engine and affect 0 rows.
    pub fn execute_nonselect(&mut self, stmt: &SqlStatement) -> Result<u64, BackendError> {
        if stmt.is_blank() {
            return Ok(0);
        }
        let sql = stmt.to_sql();
        debug!("SQL: {}", sql);
        self.retry("statement", |driver| driver.execute(sql))
    }

    pub fn execute(&mut self, sql: &str) -> Result<u64, BackendError> {
        let stmt = self.create_statement(sql);
        self.execute_nonselect(&stmt)
    }

    pub fn get_table_list(&mut self) -> Result<Vec<String>, BackendError> {
        let provider = self.provider;
        let dbname = self.dbname().to_string();
        provider.get_table_list(self, &dbname)
    }

    pub fn does_table_exist(&mut self, table_name: &str) -> Result<bool, BackendError> {
        Ok(self.get_table_list()?.iter().any(|t| t == table_name))
    }

    pub fn get_index_list(&mut self) -> Result<Vec<String>, BackendError> {
        let provider = self.provider;
        provider.get_index_list(self)
    }

    pub fn drop_index(&mut self, token: &str) -> Result<(), BackendError> {
        let provider = self.provider;
        provider.drop_index(self, token)
    }

    pub fn create_table(&mut self, table: &TableSchema) -> Result<(), BackendError> {
        let ddl = self.provider.create_table_ddl(table);
        self.execute(&ddl).map(|_| ())
    }

    pub fn create_index(&mut self, index: &IndexDescriptor) -> Result<(), BackendError> {
        self.execute(&create_index_ddl(index)).map(|_| ())
    }

    pub fn add_columns_to_table(
        &mut self,
        table_name: &str,
        columns: &[ColumnInfo],
    ) -> Result<(), BackendError> {
        for ddl in self.provider.add_columns_ddl(table_name, columns) {
            self.execute(&ddl)?;
        }
        Ok(())
    }

    pub fn rename_table(&mut self, from: &str, to: &str) -> Result<(), BackendError> {
        self.execute(&format!("ALTER TABLE {} RENAME TO {}", from, to))
            .map(|_| ())
    }

    pub fn drop_table(&mut self, table_name: &str) -> Result<(), BackendError> {
        self.execute(&format!("DROP TABLE {}", table_name))
            .map(|_| ())
    }

    /// Close the handle; the connection is unhealthy until reconnected
    pub fn close(&mut self) {
        self.driver.close();
        self.conn_ok = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::core::classify::{MYSQL_BAD_DB, MYSQL_SERVER_GONE};
    use crate::database::core::dialect::ColumnType;
    use crate::database::core::testing::ScriptedDriver;
    use crate::error::ErrorKind;

    fn sqlite_conn() -> DbiConnection {
        let ctx = DriverContext::new();
        DbiConnection::open(&ctx, Dialect::Sqlite, &ConnectionOptions::in_memory()).unwrap()
    }

    #[test]
    fn test_retry_gives_up_after_five_attempts() {
        let (driver, script) = ScriptedDriver::new(Dialect::Mysql);
        script
            .borrow_mut()
            .always_fail(DriverError::with_code(MYSQL_SERVER_GONE, "MySQL server has gone away"));
        let mut conn = DbiConnection::new(Dialect::Mysql, Box::new(driver))
            .with_backoff(Duration::ZERO);

        let err = conn.execute("UPDATE t SET a = 1").unwrap_err();
        assert_eq!(script.borrow().statement_calls, 5);
        assert_eq!(
            err,
            BackendError::GaveUp {
                kind: ErrorKind::ConnectionLost,
                attempts: 5,
                message: "MySQL server has gone away".to_string(),
            }
        );
        assert!(!conn.is_healthy());
        assert_eq!(conn.last_error(), Some(&err));
    }

    #[test]
    fn test_retry_stops_on_success() {
        let (driver, script) = ScriptedDriver::new(Dialect::Mysql);
        {
            let mut script = script.borrow_mut();
            script.fail_next(DriverError::with_code(MYSQL_SERVER_GONE, "gone"));
            script.fail_next(DriverError::with_code(MYSQL_SERVER_GONE, "gone"));
            script.affect_next(3);
        }
        let mut conn = DbiConnection::new(Dialect::Mysql, Box::new(driver))
            .with_backoff(Duration::ZERO);

        assert_eq!(conn.execute("DELETE FROM t").unwrap(), 3);
        let script = script.borrow();
        assert_eq!(script.statement_calls, 3);
        // one reconnect before each retry
        assert_eq!(script.connects, 2);
        assert!(conn.is_healthy());
        assert!(conn.last_error().is_none());
    }

    #[test]
    fn test_non_retryable_failure_is_immediate() {
        let (driver, script) = ScriptedDriver::new(Dialect::Mysql);
        script
            .borrow_mut()
            .fail_next(DriverError::with_code(MYSQL_BAD_DB, "Unknown database 'books'"));
        let mut conn = DbiConnection::new(Dialect::Mysql, Box::new(driver))
            .with_backoff(Duration::ZERO);

        let err = conn.execute("SELECT 1").unwrap_err();
        assert!(matches!(err, BackendError::NoSuchDatabase(_)));
        assert_eq!(script.borrow().statement_calls, 1);
    }

    #[test]
    fn test_retry_disabled_surfaces_transient_error() {
        let (driver, script) = ScriptedDriver::new(Dialect::Pgsql);
        script
            .borrow_mut()
            .always_fail(DriverError::new("server closed the connection unexpectedly"));
        let mut conn = DbiConnection::new(Dialect::Pgsql, Box::new(driver))
            .with_backoff(Duration::ZERO);
        conn.set_retry(false);

        let err = conn.execute("SELECT 1").unwrap_err();
        assert!(matches!(err, BackendError::ConnectionLost(_)));
        assert_eq!(script.borrow().statement_calls, 1);
    }

    #[test]
    fn test_commit_is_not_retried() {
        let (driver, script) = ScriptedDriver::new(Dialect::Mysql);
        script
            .borrow_mut()
            .always_fail(DriverError::with_code(MYSQL_SERVER_GONE, "gone"));
        let mut conn = DbiConnection::new(Dialect::Mysql, Box::new(driver))
            .with_backoff(Duration::ZERO);

        let err = conn.commit().unwrap_err();
        assert!(matches!(err, BackendError::ConnectionLost(_)));
        assert_eq!(script.borrow().statement_calls, 1);
    }

    #[test]
    fn test_verify_reconnects_once() {
        let (driver, script) = ScriptedDriver::new(Dialect::Pgsql);
        script
            .borrow_mut()
            .fail_connect(DriverError::new("could not connect to server"));
        let mut conn = DbiConnection::new(Dialect::Pgsql, Box::new(driver));

        assert!(!conn.verify());
        assert!(matches!(
            conn.last_error(),
            Some(BackendError::CantConnect(_))
        ));
        assert!(conn.verify());
        assert!(conn.last_error().is_none());
        assert_eq!(script.borrow().connects, 2);
    }

    #[test]
    fn test_blank_statement_affects_nothing() {
        let (driver, script) = ScriptedDriver::new(Dialect::Sqlite);
        let mut conn = DbiConnection::new(Dialect::Sqlite, Box::new(driver));
        assert_eq!(conn.execute("   ").unwrap(), 0);
        assert_eq!(script.borrow().statement_calls, 0);
    }

    #[test]
    fn test_sqlite_ddl_round_trip() {
        let mut conn = sqlite_conn();
        let splits = TableSchema::new("splits", vec![
            ColumnInfo::new("id", ColumnType::Int)
                .primary_key()
                .autoinc()
                .not_null(),
            ColumnInfo::new("amount", ColumnType::Int64),
            ColumnInfo::new("rate", ColumnType::Double),
            ColumnInfo::new("name", ColumnType::String).size(64),
            ColumnInfo::new("post_date", ColumnType::Date),
            ColumnInfo::new("enter_date", ColumnType::DateTime),
        ]);
        conn.create_table(&splits).unwrap();
        conn.add_columns_to_table(
            "splits",
            &[
                ColumnInfo::new("memo", ColumnType::String),
                ColumnInfo::new("flags", ColumnType::Int),
            ],
        )
        .unwrap();
        conn.create_index(&IndexDescriptor::new("splits_name", "splits", &["name"]))
            .unwrap();

        assert!(conn.does_table_exist("splits").unwrap());
        assert!(!conn.does_table_exist("sqlite_sequence").unwrap());
        assert_eq!(conn.get_index_list().unwrap(), vec!["splits_name".to_string()]);

        let stmt = conn.create_statement("SELECT * FROM splits");
        let result = conn.execute_select(&stmt).unwrap();
        let names: Vec<&str> = result.columns().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["id", "amount", "rate", "name", "post_date", "enter_date", "memo", "flags"]
        );

        conn.drop_index("splits_name").unwrap();
        assert!(conn.get_index_list().unwrap().is_empty());
    }

    #[test]
    fn test_transaction_rollback() {
        let mut conn = sqlite_conn();
        conn.execute("CREATE TABLE t (n integer)").unwrap();
        conn.begin().unwrap();
        assert_eq!(conn.execute("INSERT INTO t VALUES (1)").unwrap(), 1);
        conn.rollback().unwrap();

        let stmt = conn.create_statement("SELECT n FROM t");
        assert_eq!(conn.execute_select(&stmt).unwrap().count(), 0);
    }

    #[test]
    fn test_sql_error_is_server_error() {
        let mut conn = sqlite_conn();
        let err = conn.execute("INSERT INTO missing VALUES (1)").unwrap_err();
        assert!(matches!(err, BackendError::ServerError(_)));
        assert!(conn.last_error().is_some());
        // still healthy: the engine answered
        assert!(conn.is_healthy());
    }
}
