//! Query results and typed row access

use std::iter::FusedIterator;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use tracing::error;

use crate::database::core::driver::{ColumnMeta, FieldType, FieldValue, RawCursor};
use crate::error::BackendError;

/// Forward-only, single-pass result of a SELECT
///
/// Iteration yields `Ok(row)` per row in engine order and then `None`. A
/// cursor fault yields one `Err(ServerError)` and ends the iteration.
pub struct SqlResult {
    cursor: Box<dyn RawCursor>,
    columns: Rc<[ColumnMeta]>,
    num_rows: u64,
    finished: bool,
}

impl SqlResult {
    pub(crate) fn new(cursor: Box<dyn RawCursor>) -> Self {
        let columns: Rc<[ColumnMeta]> = cursor.columns().to_vec().into();
        let num_rows = cursor.num_rows();
        Self {
            cursor,
            columns,
            num_rows,
            finished: false,
        }
    }

    /// Number of rows the engine reported for this result
    pub fn num_rows(&self) -> u64 {
        self.num_rows
    }

    pub fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows == 0
    }
}

impl Iterator for SqlResult {
    type Item = Result<SqlRow, BackendError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.cursor.next_row() {
            Ok(Some(values)) => Some(Ok(SqlRow {
                columns: Rc::clone(&self.columns),
                values,
            })),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                error!("error fetching result row: {}", e);
                Some(Err(BackendError::server(e.message)))
            }
        }
    }
}

impl FusedIterator for SqlResult {}

/// One fetched row with typed column accessors
#[derive(Debug, Clone)]
pub struct SqlRow {
    columns: Rc<[ColumnMeta]>,
    values: Vec<FieldValue>,
}

impl SqlRow {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[FieldValue] {
        &self.values
    }

    fn index_of(&self, col: &str) -> Result<usize, BackendError> {
        self.columns
            .iter()
            .position(|c| c.name == col)
            .ok_or_else(|| BackendError::InvalidColumnType(format!("no such column: {}", col)))
    }

    fn field(&self, idx: usize, expected: FieldType) -> Result<&FieldValue, BackendError> {
        let meta = self.columns.get(idx).ok_or_else(|| {
            BackendError::InvalidColumnType(format!("column index {} out of range", idx))
        })?;
        if meta.field_type != expected {
            return Err(BackendError::InvalidColumnType(format!(
                "column '{}' is {:?}, not {:?}",
                meta.name, meta.field_type, expected
            )));
        }
        self.values.get(idx).ok_or_else(|| {
            BackendError::InvalidColumnType(format!("column '{}' has no value", meta.name))
        })
    }

    // a value the driver could not convert to the column's type
    fn unreadable(&self, idx: usize, value: &FieldValue) -> BackendError {
        BackendError::InvalidColumnType(format!(
            "column '{}' holds {:?}, not a {:?} value",
            self.columns[idx].name, value, self.columns[idx].field_type
        ))
    }

    pub fn get_int_at(&self, idx: usize) -> Result<i64, BackendError> {
        match self.field(idx, FieldType::Integer)? {
            FieldValue::Integer(i) => Ok(*i),
            FieldValue::Null => Ok(0),
            other => Err(self.unreadable(idx, other)),
        }
    }

    pub fn get_float_at(&self, idx: usize) -> Result<f32, BackendError> {
        match self.field(idx, FieldType::Float)? {
            FieldValue::Float(f) => Ok(*f),
            FieldValue::Null => Ok(0.0),
            other => Err(self.unreadable(idx, other)),
        }
    }

    pub fn get_double_at(&self, idx: usize) -> Result<f64, BackendError> {
        match self.field(idx, FieldType::Double)? {
            FieldValue::Double(d) => Ok(*d),
            FieldValue::Null => Ok(0.0),
            other => Err(self.unreadable(idx, other)),
        }
    }

    /// String value; a NULL is an error since there is nothing to return
    pub fn get_string_at(&self, idx: usize) -> Result<String, BackendError> {
        match self.field(idx, FieldType::String)? {
            FieldValue::Text(s) => Ok(s.clone()),
            _ => Err(BackendError::InvalidColumnType(format!(
                "column '{}' has no string value",
                self.columns[idx].name
            ))),
        }
    }

    /// Datetime value, the epoch when NULL
    pub fn get_datetime_at(&self, idx: usize) -> Result<DateTime<Utc>, BackendError> {
        match self.field(idx, FieldType::DateTime)? {
            FieldValue::DateTime(dt) => Ok(*dt),
            FieldValue::Null => Ok(DateTime::<Utc>::UNIX_EPOCH),
            other => Err(self.unreadable(idx, other)),
        }
    }

    pub fn get_int(&self, col: &str) -> Result<i64, BackendError> {
        self.get_int_at(self.index_of(col)?)
    }

    pub fn get_float(&self, col: &str) -> Result<f32, BackendError> {
        self.get_float_at(self.index_of(col)?)
    }

    pub fn get_double(&self, col: &str) -> Result<f64, BackendError> {
        self.get_double_at(self.index_of(col)?)
    }

    pub fn get_string(&self, col: &str) -> Result<String, BackendError> {
        self.get_string_at(self.index_of(col)?)
    }

    pub fn get_datetime(&self, col: &str) -> Result<DateTime<Utc>, BackendError> {
        self.get_datetime_at(self.index_of(col)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::core::driver::BufferedCursor;
    use crate::error::DriverError;

    fn sample() -> SqlResult {
        let columns = vec![
            ColumnMeta::new("id", FieldType::Integer),
            ColumnMeta::new("name", FieldType::String),
            ColumnMeta::new("rate", FieldType::Double),
            ColumnMeta::new("ratio", FieldType::Float),
            ColumnMeta::new("stamp", FieldType::DateTime),
        ];
        let ts = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let rows = vec![
            vec![
                FieldValue::Integer(1),
                FieldValue::Text("one".to_string()),
                FieldValue::Double(1.25),
                FieldValue::Float(0.5),
                FieldValue::DateTime(ts),
            ],
            vec![
                FieldValue::Null,
                FieldValue::Null,
                FieldValue::Null,
                FieldValue::Null,
                FieldValue::Null,
            ],
        ];
        SqlResult::new(Box::new(BufferedCursor::new(columns, rows)))
    }

    #[test]
    fn test_empty_result_ends_immediately() {
        let mut result = SqlResult::new(Box::new(BufferedCursor::empty(vec![ColumnMeta::new(
            "id",
            FieldType::Integer,
        )])));
        assert!(result.is_empty());
        assert!(result.next().is_none());
        assert!(result.next().is_none());
    }

    #[test]
    fn test_row_count_matches_num_rows() {
        let result = sample();
        let expected = result.num_rows();
        let rows: Vec<SqlRow> = result.map(|r| r.unwrap()).collect();
        assert_eq!(rows.len() as u64, expected);
    }

    #[test]
    fn test_typed_accessors() {
        let mut result = sample();
        let row = result.next().unwrap().unwrap();
        assert_eq!(row.get_int("id").unwrap(), 1);
        assert_eq!(row.get_string("name").unwrap(), "one");
        assert_eq!(row.get_double("rate").unwrap(), 1.25);
        assert_eq!(row.get_float("ratio").unwrap(), 0.5);
        assert_eq!(row.get_datetime("stamp").unwrap().timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_wrong_accessor_is_invalid_column_type() {
        let row = sample().next().unwrap().unwrap();
        assert!(matches!(
            row.get_string("id"),
            Err(BackendError::InvalidColumnType(_))
        ));
        assert!(matches!(
            row.get_int("rate"),
            Err(BackendError::InvalidColumnType(_))
        ));
        assert!(matches!(
            row.get_int("missing"),
            Err(BackendError::InvalidColumnType(_))
        ));
    }

    #[test]
    fn test_null_values() {
        let row = sample().nth(1).unwrap().unwrap();
        assert_eq!(row.get_int("id").unwrap(), 0);
        assert_eq!(row.get_double("rate").unwrap(), 0.0);
        assert_eq!(row.get_datetime("stamp").unwrap(), DateTime::<Utc>::UNIX_EPOCH);
        assert!(matches!(
            row.get_string("name"),
            Err(BackendError::InvalidColumnType(_))
        ));
    }

    #[test]
    fn test_unconverted_value_is_invalid_column_type() {
        let columns = vec![
            ColumnMeta::new("id", FieldType::Integer),
            ColumnMeta::new("rate", FieldType::Double),
            ColumnMeta::new("stamp", FieldType::DateTime),
        ];
        let rows = vec![vec![
            FieldValue::Text("many".to_string()),
            FieldValue::Text("lots".to_string()),
            FieldValue::Text("someday".to_string()),
        ]];
        let mut result = SqlResult::new(Box::new(BufferedCursor::new(columns, rows)));
        let row = result.next().unwrap().unwrap();

        let err = row.get_int("id").unwrap_err();
        assert!(matches!(err, BackendError::InvalidColumnType(_)));
        assert!(err.to_string().contains("many"));
        assert!(matches!(
            row.get_double("rate"),
            Err(BackendError::InvalidColumnType(_))
        ));
        assert!(matches!(
            row.get_datetime("stamp"),
            Err(BackendError::InvalidColumnType(_))
        ));
    }

    struct FaultyCursor {
        columns: Vec<ColumnMeta>,
        served: bool,
    }

    impl RawCursor for FaultyCursor {
        fn columns(&self) -> &[ColumnMeta] {
            &self.columns
        }

        fn num_rows(&self) -> u64 {
            2
        }

        fn next_row(&mut self) -> Result<Option<Vec<FieldValue>>, DriverError> {
            if self.served {
                return Err(DriverError::new("cursor fault"));
            }
            self.served = true;
            Ok(Some(vec![FieldValue::Integer(1)]))
        }
    }

    #[test]
    fn test_cursor_fault_is_server_error_then_end() {
        let mut result = SqlResult::new(Box::new(FaultyCursor {
            columns: vec![ColumnMeta::new("id", FieldType::Integer)],
            served: false,
        }));
        assert!(result.next().unwrap().is_ok());
        assert_eq!(
            result.next().unwrap().unwrap_err(),
            BackendError::ServerError("cursor fault".to_string())
        );
        assert!(result.next().is_none());
    }
}
