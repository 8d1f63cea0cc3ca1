//! Engine driver abstraction
//!
//! A [`Driver`] is one live handle to an SQL engine. Drivers are produced by
//! a [`DriverFactory`] registered in an explicitly owned [`DriverContext`];
//! there is no process-wide driver state.

use std::collections::HashMap;
use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::ConnectionOptions;
use crate::database::core::sqlite::SqliteDriverFactory;
use crate::database::core::Dialect;
use crate::error::{BackendError, DriverError};

/// Declared type of a result column as reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Integer,
    Float,
    Double,
    String,
    DateTime,
    Binary,
}

/// Name and declared type of one result column
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnMeta {
    pub name: String,
    pub field_type: FieldType,
}

impl ColumnMeta {
    pub fn new(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
        }
    }
}

/// One field value of a fetched row
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Integer(i64),
    Float(f32),
    Double(f64),
    Text(String),
    DateTime(DateTime<Utc>),
    Binary(Vec<u8>),
}

/// Forward-only cursor over a query result
pub trait RawCursor {
    fn columns(&self) -> &[ColumnMeta];

    fn num_rows(&self) -> u64;

    /// Next row, `Ok(None)` once exhausted
    fn next_row(&mut self) -> Result<Option<Vec<FieldValue>>, DriverError>;
}

/// Fully materialized cursor
#[derive(Debug, Clone)]
pub struct BufferedCursor {
    columns: Vec<ColumnMeta>,
    rows: VecDeque<Vec<FieldValue>>,
    total: u64,
}

impl BufferedCursor {
    pub fn new(columns: Vec<ColumnMeta>, rows: Vec<Vec<FieldValue>>) -> Self {
        let total = rows.len() as u64;
        Self {
            columns,
            rows: rows.into(),
            total,
        }
    }

    pub fn empty(columns: Vec<ColumnMeta>) -> Self {
        Self::new(columns, vec![])
    }
}

impl RawCursor for BufferedCursor {
    fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    fn num_rows(&self) -> u64 {
        self.total
    }

    fn next_row(&mut self) -> Result<Option<Vec<FieldValue>>, DriverError> {
        Ok(self.rows.pop_front())
    }
}

/// One live handle to an SQL engine
///
/// Every call blocks until the engine answers. Implementations report raw
/// failures; classification and retrying are the connection's job.
pub trait Driver {
    /// (Re)establish the handle, dropping any previous one
    fn connect(&mut self) -> Result<(), DriverError>;

    fn is_connected(&self) -> bool;

    fn close(&mut self);

    /// Run a row-returning statement
    fn query(&mut self, sql: &str) -> Result<Box<dyn RawCursor>, DriverError>;

    /// Run a statement, returning the number of affected rows
    fn execute(&mut self, sql: &str) -> Result<u64, DriverError>;

    fn options(&self) -> &ConnectionOptions;

    /// Point the handle at another database; takes effect on the next connect
    fn set_dbname(&mut self, dbname: &str);
}

/// Produces unconnected drivers for one dialect
pub trait DriverFactory {
    fn dialect(&self) -> Dialect;

    fn create(&self, options: &ConnectionOptions) -> Result<Box<dyn Driver>, DriverError>;
}

/// Owned registry of driver factories
///
/// Constructed once by the application and passed to every session. After
/// [`DriverContext::shutdown`] no new driver can be created.
pub struct DriverContext {
    factories: HashMap<Dialect, Box<dyn DriverFactory>>,
    active: bool,
}

impl DriverContext {
    /// Create a context with the bundled SQLite driver registered
    pub fn new() -> Self {
        let mut ctx = Self::empty();
        ctx.register(Box::new(SqliteDriverFactory));
        ctx
    }

    /// Create a context with no drivers registered
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
            active: true,
        }
    }

    /// Register (or replace) the factory for its dialect
    pub fn register(&mut self, factory: Box<dyn DriverFactory>) {
        debug!("registering driver for {}", factory.dialect());
        self.factories.insert(factory.dialect(), factory);
    }

    /// Dialects a driver can currently be created for
    pub fn available(&self) -> Vec<Dialect> {
        if !self.active {
            return vec![];
        }
        Dialect::all()
            .into_iter()
            .filter(|d| self.factories.contains_key(d))
            .collect()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Create an unconnected driver for `dialect`
    pub fn new_driver(
        &self,
        dialect: Dialect,
        options: &ConnectionOptions,
    ) -> Result<Box<dyn Driver>, BackendError> {
        if !self.active {
            return Err(BackendError::DriverUnavailable(
                "driver context has been shut down".to_string(),
            ));
        }
        let factory = self.factories.get(&dialect).ok_or_else(|| {
            BackendError::DriverUnavailable(format!("no driver registered for {}", dialect))
        })?;
        factory
            .create(options)
            .map_err(|e| BackendError::DriverUnavailable(format!("{}: {}", dialect, e)))
    }

    /// Release all factories; calling it again is a no-op
    pub fn shutdown(&mut self) {
        if !self.active {
            return;
        }
        info!("shutting down driver context");
        self.factories.clear();
        self.active = false;
    }
}

impl Default for DriverContext {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DriverContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffered_cursor() {
        let mut cursor = BufferedCursor::new(
            vec![ColumnMeta::new("n", FieldType::Integer)],
            vec![vec![FieldValue::Integer(1)], vec![FieldValue::Integer(2)]],
        );
        assert_eq!(cursor.num_rows(), 2);
        assert_eq!(cursor.next_row().unwrap(), Some(vec![FieldValue::Integer(1)]));
        assert_eq!(cursor.next_row().unwrap(), Some(vec![FieldValue::Integer(2)]));
        assert_eq!(cursor.next_row().unwrap(), None);
        // total is unaffected by consumption
        assert_eq!(cursor.num_rows(), 2);
    }

    #[test]
    fn test_context_registers_sqlite() {
        let ctx = DriverContext::new();
        assert_eq!(ctx.available(), vec![Dialect::Sqlite]);
        let options = ConnectionOptions::in_memory();
        assert!(ctx.new_driver(Dialect::Sqlite, &options).is_ok());
        let err = ctx.new_driver(Dialect::Mysql, &options).err().unwrap();
        assert!(matches!(err, BackendError::DriverUnavailable(_)));
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let mut ctx = DriverContext::new();
        ctx.shutdown();
        ctx.shutdown();
        assert!(!ctx.is_active());
        assert!(ctx.available().is_empty());
        let err = ctx
            .new_driver(Dialect::Sqlite, &ConnectionOptions::in_memory())
            .err()
            .unwrap();
        assert!(matches!(err, BackendError::DriverUnavailable(_)));
    }
}
