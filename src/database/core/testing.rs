//! Scripted drivers for unit tests
//!
//! `ScriptedDriver` never talks to an engine: it records every statement and
//! replays queued outcomes, which lets the client/server dialects and the
//! retry loop be exercised without a server. `TruncatingDriver` wraps a real
//! driver and degrades doubles to single precision on the way out;
//! `FailingDriver` wraps one and refuses statements with a given prefix.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::config::ConnectionOptions;
use crate::database::core::driver::{
    BufferedCursor, ColumnMeta, Driver, DriverFactory, FieldType, FieldValue, RawCursor,
};
use crate::database::core::sqlite::SqliteDriverFactory;
use crate::database::core::Dialect;
use crate::error::DriverError;

enum Outcome {
    Rows(BufferedCursor),
    Affected(u64),
    Fail(DriverError),
}

/// Shared state of a [`ScriptedDriver`], inspected by the test
#[derive(Default)]
pub(crate) struct Script {
    /// Every SQL text received, in order
    pub executed: Vec<String>,
    /// Calls to `query` and `execute`
    pub statement_calls: u32,
    pub connects: u32,
    outcomes: VecDeque<Outcome>,
    responders: Vec<(String, BufferedCursor)>,
    connect_failures: VecDeque<DriverError>,
    always: Option<DriverError>,
    fail_on: Vec<(String, DriverError)>,
}

impl Script {
    pub fn fail_next(&mut self, err: DriverError) {
        self.outcomes.push_back(Outcome::Fail(err));
    }

    pub fn affect_next(&mut self, rows: u64) {
        self.outcomes.push_back(Outcome::Affected(rows));
    }

    pub fn rows_next(&mut self, cursor: BufferedCursor) {
        self.outcomes.push_back(Outcome::Rows(cursor));
    }

    pub fn fail_connect(&mut self, err: DriverError) {
        self.connect_failures.push_back(err);
    }

    /// Fail every statement from now on
    pub fn always_fail(&mut self, err: DriverError) {
        self.always = Some(err);
    }

    /// Answer every query starting with `prefix` with `cursor`
    pub fn respond(&mut self, prefix: &str, cursor: BufferedCursor) {
        self.responders.push((prefix.to_string(), cursor));
    }

    /// Fail every statement starting with `prefix`
    pub fn fail_on(&mut self, prefix: &str, err: DriverError) {
        self.fail_on.push((prefix.to_string(), err));
    }

    fn next_outcome(&mut self, sql: &str) -> Option<Outcome> {
        self.executed.push(sql.to_string());
        self.statement_calls += 1;
        if let Some(err) = &self.always {
            return Some(Outcome::Fail(err.clone()));
        }
        if let Some((_, err)) = self.fail_on.iter().find(|(p, _)| sql.starts_with(p.as_str())) {
            return Some(Outcome::Fail(err.clone()));
        }
        if let Some(outcome) = self.outcomes.pop_front() {
            return Some(outcome);
        }
        self.responders
            .iter()
            .find(|(p, _)| sql.starts_with(p.as_str()))
            .map(|(_, cursor)| Outcome::Rows(cursor.clone()))
    }
}

/// Build a single string column cursor
pub(crate) fn string_rows(column: &str, values: &[&str]) -> BufferedCursor {
    BufferedCursor::new(
        vec![ColumnMeta::new(column, FieldType::String)],
        values
            .iter()
            .map(|v| vec![FieldValue::Text(v.to_string())])
            .collect(),
    )
}

pub(crate) struct ScriptedDriver {
    options: ConnectionOptions,
    script: Rc<RefCell<Script>>,
    connected: bool,
}

impl ScriptedDriver {
    pub fn new(dialect: Dialect) -> (Self, Rc<RefCell<Script>>) {
        let script = Rc::new(RefCell::new(Script::default()));
        let options = ConnectionOptions {
            host: Some("db.example.org".to_string()),
            dbname: "books".to_string(),
            port: dialect.default_port(),
            ..ConnectionOptions::default()
        };
        let driver = Self {
            options,
            script: Rc::clone(&script),
            connected: false,
        };
        (driver, script)
    }
}

impl Driver for ScriptedDriver {
    fn connect(&mut self) -> Result<(), DriverError> {
        let mut script = self.script.borrow_mut();
        script.connects += 1;
        if let Some(err) = script.connect_failures.pop_front() {
            self.connected = false;
            return Err(err);
        }
        self.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn close(&mut self) {
        self.connected = false;
    }

    fn query(&mut self, sql: &str) -> Result<Box<dyn RawCursor>, DriverError> {
        match self.script.borrow_mut().next_outcome(sql) {
            Some(Outcome::Rows(cursor)) => Ok(Box::new(cursor)),
            Some(Outcome::Fail(err)) => Err(err),
            Some(Outcome::Affected(_)) | None => {
                Ok(Box::new(BufferedCursor::empty(vec![ColumnMeta::new(
                    "value",
                    FieldType::String,
                )])))
            }
        }
    }

    fn execute(&mut self, sql: &str) -> Result<u64, DriverError> {
        match self.script.borrow_mut().next_outcome(sql) {
            Some(Outcome::Affected(n)) => Ok(n),
            Some(Outcome::Fail(err)) => Err(err),
            Some(Outcome::Rows(_)) | None => Ok(0),
        }
    }

    fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    fn set_dbname(&mut self, dbname: &str) {
        self.options.dbname = dbname.to_string();
    }
}

/// Wraps a driver and returns doubles at single precision
pub(crate) struct TruncatingDriver {
    inner: Box<dyn Driver>,
}

impl TruncatingDriver {
    pub fn new(inner: Box<dyn Driver>) -> Self {
        Self { inner }
    }
}

impl Driver for TruncatingDriver {
    fn connect(&mut self) -> Result<(), DriverError> {
        self.inner.connect()
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    fn close(&mut self) {
        self.inner.close()
    }

    fn query(&mut self, sql: &str) -> Result<Box<dyn RawCursor>, DriverError> {
        let mut cursor = self.inner.query(sql)?;
        let columns = cursor.columns().to_vec();
        let mut rows = vec![];
        while let Some(row) = cursor.next_row()? {
            rows.push(
                row.into_iter()
                    .map(|v| match v {
                        FieldValue::Double(d) => FieldValue::Double(d as f32 as f64),
                        other => other,
                    })
                    .collect(),
            );
        }
        Ok(Box::new(BufferedCursor::new(columns, rows)))
    }

    fn execute(&mut self, sql: &str) -> Result<u64, DriverError> {
        self.inner.execute(sql)
    }

    fn options(&self) -> &ConnectionOptions {
        self.inner.options()
    }

    fn set_dbname(&mut self, dbname: &str) {
        self.inner.set_dbname(dbname)
    }
}

/// Factory handing out scripted drivers that share one script
pub(crate) struct ScriptedFactory {
    pub dialect: Dialect,
    pub script: Rc<RefCell<Script>>,
}

impl ScriptedFactory {
    pub fn new(dialect: Dialect) -> (Self, Rc<RefCell<Script>>) {
        let script = Rc::new(RefCell::new(Script::default()));
        let factory = Self {
            dialect,
            script: Rc::clone(&script),
        };
        (factory, script)
    }
}

impl DriverFactory for ScriptedFactory {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn create(&self, options: &ConnectionOptions) -> Result<Box<dyn Driver>, DriverError> {
        Ok(Box::new(ScriptedDriver {
            options: options.clone(),
            script: Rc::clone(&self.script),
            connected: false,
        }))
    }
}

/// Factory wrapping SQLite drivers in [`TruncatingDriver`]
pub(crate) struct TruncatingSqliteFactory;

impl DriverFactory for TruncatingSqliteFactory {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn create(&self, options: &ConnectionOptions) -> Result<Box<dyn Driver>, DriverError> {
        let inner = SqliteDriverFactory.create(options)?;
        Ok(Box::new(TruncatingDriver::new(inner)))
    }
}

/// Wraps a driver and fails every statement starting with `prefix`
pub(crate) struct FailingDriver {
    inner: Box<dyn Driver>,
    prefix: &'static str,
}

impl Driver for FailingDriver {
    fn connect(&mut self) -> Result<(), DriverError> {
        self.inner.connect()
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    fn close(&mut self) {
        self.inner.close()
    }

    fn query(&mut self, sql: &str) -> Result<Box<dyn RawCursor>, DriverError> {
        if sql.starts_with(self.prefix) {
            return Err(DriverError::new(format!("refused: {}", sql)));
        }
        self.inner.query(sql)
    }

    fn execute(&mut self, sql: &str) -> Result<u64, DriverError> {
        if sql.starts_with(self.prefix) {
            return Err(DriverError::new(format!("refused: {}", sql)));
        }
        self.inner.execute(sql)
    }

    fn options(&self) -> &ConnectionOptions {
        self.inner.options()
    }

    fn set_dbname(&mut self, dbname: &str) {
        self.inner.set_dbname(dbname)
    }
}

/// Factory wrapping SQLite drivers in [`FailingDriver`]
pub(crate) struct FailingSqliteFactory {
    prefix: &'static str,
}

impl FailingSqliteFactory {
    pub fn new(prefix: &'static str) -> Self {
        Self { prefix }
    }
}

impl DriverFactory for FailingSqliteFactory {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn create(&self, options: &ConnectionOptions) -> Result<Box<dyn Driver>, DriverError> {
        let inner = SqliteDriverFactory.create(options)?;
        Ok(Box::new(FailingDriver {
            inner,
            prefix: self.prefix,
        }))
    }
}
