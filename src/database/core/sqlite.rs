//! Bundled SQLite driver
//!
//! Wraps a rusqlite [`Connection`]. The database file lives at
//! `<dbdir>/<dbname>`; an empty name or `:memory:` opens an in-memory
//! database (lost on reconnect).
//!
//! `query` reads the whole result set before returning and hands out a
//! [`BufferedCursor`]. A rusqlite `Rows` borrows its `Statement`, which
//! borrows the `Connection`, so a cursor cannot outlive the call. Column
//! types of expression columns are inferred from the buffered rows.
//!
//! Text that does not parse in a numeric or date column is passed through
//! as text, so the typed row accessors report it as an invalid column type
//! instead of reading it as zero.

use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rusqlite::types::Value;
use rusqlite::Connection;
use tracing::debug;

use crate::config::ConnectionOptions;
use crate::database::core::driver::{
    BufferedCursor, ColumnMeta, Driver, DriverFactory, FieldType, FieldValue, RawCursor,
};
use crate::database::core::Dialect;
use crate::error::DriverError;

const DATETIME_FORMATS: &[&str] = &[
    "%Y%m%d%H%M%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y%m%d %H%M%S",
    "%Y-%m-%dT%H:%M:%S",
];

pub struct SqliteDriverFactory;

impl DriverFactory for SqliteDriverFactory {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn create(&self, options: &ConnectionOptions) -> Result<Box<dyn Driver>, DriverError> {
        Ok(Box::new(SqliteDriver::new(options.clone())))
    }
}

/// SQLite engine handle
pub struct SqliteDriver {
    options: ConnectionOptions,
    conn: Option<Connection>,
}

impl SqliteDriver {
    pub fn new(options: ConnectionOptions) -> Self {
        Self {
            options,
            conn: None,
        }
    }

    /// Path of the database file, `None` for an in-memory database
    pub fn database_path(options: &ConnectionOptions) -> Option<PathBuf> {
        if options.dbname.is_empty() || options.dbname == ":memory:" {
            return None;
        }
        Some(match &options.dbdir {
            Some(dir) => dir.join(&options.dbname),
            None => PathBuf::from(&options.dbname),
        })
    }

    fn configure(conn: &Connection) -> Result<(), rusqlite::Error> {
        let _: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        conn.execute("PRAGMA synchronous=NORMAL", [])?;
        conn.execute("PRAGMA temp_store=MEMORY", [])?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(())
    }

    fn conn(&self) -> Result<&Connection, DriverError> {
        self.conn.as_ref().ok_or_else(DriverError::not_connected)
    }
}

fn driver_error(e: rusqlite::Error) -> DriverError {
    // prepare errors (syntax, unknown table) come as SqlInputError
    let code = match &e {
        rusqlite::Error::SqlInputError { error, .. } => Some(error.extended_code),
        other => other.sqlite_error().map(|err| err.extended_code),
    };
    match code {
        Some(code) => DriverError::with_code(code as i64, e.to_string()),
        None => DriverError::new(e.to_string()),
    }
}

/// Map an SQLite declared column type to a field type
fn field_type_from_decl(decl: &str) -> FieldType {
    let decl = decl.to_lowercase();
    if decl.contains("int") {
        FieldType::Integer
    } else if decl.contains("float4") {
        FieldType::Float
    } else if decl.contains("real") || decl.contains("floa") || decl.contains("doub") {
        FieldType::Double
    } else if decl.contains("date") || decl.contains("time") {
        FieldType::DateTime
    } else if decl.contains("blob") {
        FieldType::Binary
    } else {
        FieldType::String
    }
}

fn field_type_from_value(value: &Value) -> Option<FieldType> {
    match value {
        Value::Null => None,
        Value::Integer(_) => Some(FieldType::Integer),
        Value::Real(_) => Some(FieldType::Double),
        Value::Text(_) => Some(FieldType::String),
        Value::Blob(_) => Some(FieldType::Binary),
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

fn convert(value: Value, field_type: FieldType) -> FieldValue {
    match (field_type, value) {
        (_, Value::Null) => FieldValue::Null,
        (FieldType::Integer, Value::Integer(i)) => FieldValue::Integer(i),
        (FieldType::Integer, Value::Real(f)) => FieldValue::Integer(f as i64),
        (FieldType::Integer, Value::Text(s)) => match s.trim().parse() {
            Ok(v) => FieldValue::Integer(v),
            Err(_) => FieldValue::Text(s),
        },
        (FieldType::Double, Value::Integer(i)) => FieldValue::Double(i as f64),
        (FieldType::Double, Value::Real(f)) => FieldValue::Double(f),
        (FieldType::Double, Value::Text(s)) => match s.trim().parse() {
            Ok(v) => FieldValue::Double(v),
            Err(_) => FieldValue::Text(s),
        },
        (FieldType::Float, Value::Integer(i)) => FieldValue::Float(i as f32),
        (FieldType::Float, Value::Real(f)) => FieldValue::Float(f as f32),
        (FieldType::Float, Value::Text(s)) => match s.trim().parse() {
            Ok(v) => FieldValue::Float(v),
            Err(_) => FieldValue::Text(s),
        },
        (FieldType::DateTime, Value::Text(s)) => match parse_datetime(&s) {
            Some(dt) => FieldValue::DateTime(dt),
            None => FieldValue::Text(s),
        },
        (FieldType::DateTime, Value::Integer(i)) => DateTime::from_timestamp(i, 0)
            .map(FieldValue::DateTime)
            .unwrap_or(FieldValue::Null),
        (FieldType::String, Value::Text(s)) => FieldValue::Text(s),
        (FieldType::String, Value::Integer(i)) => FieldValue::Text(i.to_string()),
        (FieldType::String, Value::Real(f)) => FieldValue::Text(f.to_string()),
        (FieldType::String, Value::Blob(b)) => {
            FieldValue::Text(String::from_utf8_lossy(&b).into_owned())
        }
        (FieldType::Binary, Value::Blob(b)) => FieldValue::Binary(b),
        (FieldType::Binary, Value::Text(s)) => FieldValue::Binary(s.into_bytes()),
        (_, _) => FieldValue::Null,
    }
}

impl Driver for SqliteDriver {
    fn connect(&mut self) -> Result<(), DriverError> {
        self.close();
        let conn = match Self::database_path(&self.options) {
            Some(path) => {
                debug!("opening sqlite database at {}", path.display());
                Connection::open(&path).map_err(driver_error)?
            }
            None => Connection::open_in_memory().map_err(driver_error)?,
        };
        Self::configure(&conn).map_err(driver_error)?;
        self.conn = Some(conn);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err((_, e)) = conn.close() {
                debug!("error closing sqlite connection: {}", e);
            }
        }
    }

    fn query(&mut self, sql: &str) -> Result<Box<dyn RawCursor>, DriverError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql).map_err(driver_error)?;
        let declared: Vec<(String, Option<FieldType>)> = stmt
            .columns()
            .iter()
            .map(|c| (c.name().to_string(), c.decl_type().map(field_type_from_decl)))
            .collect();
        let count = declared.len();

        let mut raw_rows: Vec<Vec<Value>> = vec![];
        let mut rows = stmt.query([]).map_err(driver_error)?;
        while let Some(row) = rows.next().map_err(driver_error)? {
            let mut values = Vec::with_capacity(count);
            for i in 0..count {
                values.push(row.get::<_, Value>(i).map_err(driver_error)?);
            }
            raw_rows.push(values);
        }

        // expression columns carry no declared type: infer from the data
        let columns: Vec<ColumnMeta> = declared
            .into_iter()
            .enumerate()
            .map(|(i, (name, field_type))| {
                let field_type = field_type
                    .or_else(|| raw_rows.iter().find_map(|r| field_type_from_value(&r[i])))
                    .unwrap_or(FieldType::String);
                ColumnMeta { name, field_type }
            })
            .collect();

        let rows = raw_rows
            .into_iter()
            .map(|values| {
                values
                    .into_iter()
                    .zip(columns.iter())
                    .map(|(v, c)| convert(v, c.field_type))
                    .collect()
            })
            .collect();

        Ok(Box::new(BufferedCursor::new(columns, rows)))
    }

    fn execute(&mut self, sql: &str) -> Result<u64, DriverError> {
        let conn = self.conn()?;
        match conn.execute(sql, []) {
            Ok(n) => Ok(n as u64),
            Err(rusqlite::Error::ExecuteReturnedResults) => {
                let mut stmt = conn.prepare(sql).map_err(driver_error)?;
                let mut rows = stmt.query([]).map_err(driver_error)?;
                while rows.next().map_err(driver_error)?.is_some() {}
                Ok(0)
            }
            Err(e) => Err(driver_error(e)),
        }
    }

    fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    fn set_dbname(&mut self, dbname: &str) {
        self.options.dbname = dbname.to_string();
    }
}
