//! Capability self-test
//!
//! Some engine client libraries silently lose precision on extreme 64-bit
//! integers or doubles. Before a store is trusted, extreme values are written
//! to a temporary table and read back.

use serde::Serialize;
use tracing::{info, warn};

use crate::database::core::dialect::{ColumnInfo, ColumnType, TableSchema};
use crate::database::core::DbiConnection;
use crate::error::BackendError;

const TEST_TABLE: &str = "numtest";

pub const INT64_TEST_VALUE: i64 = -9_223_372_036_854_775_807;
pub const UINT64_TEST_VALUE: u64 = 9_223_372_036_854_775_807;
pub const DOUBLE_TEST_VALUE: f64 = 1.797_692_134_862_315_7E307;
/// Allowed absolute error on the double round trip
pub const DOUBLE_TOLERANCE: f64 = 0.000_001E307;

/// Outcome of the self-test
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", content = "detail", rename_all = "snake_case")]
pub enum LibraryTestResult {
    Pass,
    /// The test table could not be created, filled or read
    FailSetup(String),
    /// Values did not survive the round trip
    FailTest(String),
}

impl LibraryTestResult {
    pub fn is_pass(&self) -> bool {
        matches!(self, LibraryTestResult::Pass)
    }

    pub fn into_result(self) -> Result<(), BackendError> {
        match self {
            LibraryTestResult::Pass => Ok(()),
            LibraryTestResult::FailSetup(msg) => Err(BackendError::LibraryUntestable(msg)),
            LibraryTestResult::FailTest(msg) => Err(BackendError::LibraryIncompatible(msg)),
        }
    }
}

fn test_table() -> TableSchema {
    TableSchema::new(TEST_TABLE, vec![
        ColumnInfo::new("test_int", ColumnType::Int64),
        ColumnInfo::new("test_unsigned", ColumnType::Int64),
        ColumnInfo::new("test_double", ColumnType::Double),
    ])
}

/// Run the large number round trip on `conn`
///
/// The temporary table is dropped on every exit path.
pub fn run_self_test(conn: &mut DbiConnection) -> LibraryTestResult {
    let ddl = conn
        .provider()
        .create_table_ddl(&test_table())
        .replacen("CREATE TABLE", "CREATE TEMPORARY TABLE", 1);
    if let Err(e) = conn.execute(&ddl) {
        return LibraryTestResult::FailSetup(format!("cannot create test table: {}", e));
    }

    let result = check_round_trip(conn);

    if let Err(e) = conn.execute(&format!("DROP TABLE {}", TEST_TABLE)) {
        warn!("failed to drop self-test table: {}", e);
    }
    match &result {
        LibraryTestResult::Pass => info!("large number self-test passed"),
        other => warn!("large number self-test failed: {:?}", other),
    }
    result
}

fn check_round_trip(conn: &mut DbiConnection) -> LibraryTestResult {
    let insert = format!(
        "INSERT INTO {} VALUES ({}, {}, {:E})",
        TEST_TABLE, INT64_TEST_VALUE, UINT64_TEST_VALUE, DOUBLE_TEST_VALUE
    );
    if let Err(e) = conn.execute(&insert) {
        return LibraryTestResult::FailSetup(format!("cannot insert test values: {}", e));
    }

    let stmt = conn.create_statement(&format!(
        "SELECT test_int, test_unsigned, test_double FROM {}",
        TEST_TABLE
    ));
    let mut result = match conn.execute_select(&stmt) {
        Ok(result) => result,
        Err(e) => {
            return LibraryTestResult::FailSetup(format!("cannot read test values: {}", e))
        }
    };
    let row = match result.next() {
        Some(Ok(row)) => row,
        Some(Err(e)) => {
            return LibraryTestResult::FailSetup(format!("cannot read test values: {}", e))
        }
        None => return LibraryTestResult::FailSetup("test row missing".to_string()),
    };

    let values = row.get_int_at(0).and_then(|i| {
        let unsigned = row.get_int_at(1)?;
        let double = row.get_double_at(2)?;
        Ok((i, unsigned, double))
    });
    let (int_value, unsigned_value, double_value) = match values {
        Ok(values) => values,
        Err(e) => return LibraryTestResult::FailTest(e.to_string()),
    };

    if int_value != INT64_TEST_VALUE {
        return LibraryTestResult::FailTest(format!(
            "64-bit integer mismatch: {} != {}",
            int_value, INT64_TEST_VALUE
        ));
    }
    if u64::try_from(unsigned_value).ok() != Some(UINT64_TEST_VALUE) {
        return LibraryTestResult::FailTest(format!(
            "unsigned 64-bit integer mismatch: {} != {}",
            unsigned_value, UINT64_TEST_VALUE
        ));
    }
    let delta = (double_value - DOUBLE_TEST_VALUE).abs();
    if delta.is_nan() || delta > DOUBLE_TOLERANCE {
        return LibraryTestResult::FailTest(format!(
            "double mismatch: {:E} != {:E}",
            double_value, DOUBLE_TEST_VALUE
        ));
    }
    LibraryTestResult::Pass
}
