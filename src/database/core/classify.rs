//! Driver error classification
//!
//! A pure function from a raw [`DriverError`] to an [`ErrorClass`]. MySQL
//! signals failures by numeric error code, PostgreSQL only by message text,
//! and SQLite failures are never transient.

use crate::database::core::Dialect;
use crate::error::{BackendError, DriverError};

/// MySQL `ER_BAD_DB_ERROR`
pub const MYSQL_BAD_DB: i64 = 1049;
/// MySQL `CR_SERVER_GONE_ERROR`
pub const MYSQL_SERVER_GONE: i64 = 2006;
/// MySQL `CR_CONN_HOST_ERROR`
pub const MYSQL_CONN_HOST: i64 = 2003;

/// Classification of a raw driver failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    ConnectionLost,
    CantConnect,
    NoSuchDatabase,
    Misc,
}

impl ErrorClass {
    /// Whether the connection retry loop should absorb this failure
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorClass::ConnectionLost | ErrorClass::CantConnect)
    }

    /// Turn the class into the surfaced error, keeping the driver message
    pub fn into_error(self, message: &str) -> BackendError {
        match self {
            ErrorClass::ConnectionLost => BackendError::ConnectionLost(message.to_string()),
            ErrorClass::CantConnect => BackendError::CantConnect(message.to_string()),
            ErrorClass::NoSuchDatabase => BackendError::NoSuchDatabase(message.to_string()),
            ErrorClass::Misc => BackendError::ServerError(message.to_string()),
        }
    }
}

/// Classify a driver error for the given dialect
pub fn classify(dialect: Dialect, err: &DriverError) -> ErrorClass {
    match dialect {
        Dialect::Sqlite => ErrorClass::Misc,
        Dialect::Mysql => match err.code {
            Some(MYSQL_BAD_DB) => ErrorClass::NoSuchDatabase,
            Some(MYSQL_SERVER_GONE) => ErrorClass::ConnectionLost,
            Some(MYSQL_CONN_HOST) => ErrorClass::CantConnect,
            _ => ErrorClass::Misc,
        },
        Dialect::Pgsql => classify_pgsql_message(&err.message),
    }
}

fn classify_pgsql_message(message: &str) -> ErrorClass {
    let trimmed = message.trim_end_matches('\n');
    if trimmed.starts_with("FATAL:  database") && trimmed.ends_with("does not exist") {
        ErrorClass::NoSuchDatabase
    } else if message.contains("server closed the connection unexpectedly") {
        ErrorClass::ConnectionLost
    } else if message.starts_with("connection pointer is NULL")
        || message.starts_with("could not connect to server")
    {
        ErrorClass::CantConnect
    } else {
        ErrorClass::Misc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mysql_codes() {
        let cases = [
            (MYSQL_BAD_DB, ErrorClass::NoSuchDatabase),
            (MYSQL_SERVER_GONE, ErrorClass::ConnectionLost),
            (MYSQL_CONN_HOST, ErrorClass::CantConnect),
            (1064, ErrorClass::Misc),
        ];
        for (code, expected) in cases {
            let err = DriverError::with_code(code, "whatever");
            assert_eq!(classify(Dialect::Mysql, &err), expected, "code {}", code);
        }
        assert_eq!(
            classify(Dialect::Mysql, &DriverError::new("no code")),
            ErrorClass::Misc
        );
    }

    #[test]
    fn test_pgsql_messages() {
        let missing = DriverError::new("FATAL:  database \"books\" does not exist\n");
        assert_eq!(classify(Dialect::Pgsql, &missing), ErrorClass::NoSuchDatabase);

        let lost = DriverError::new(
            "FATAL: terminating connection\nserver closed the connection unexpectedly\n",
        );
        assert_eq!(classify(Dialect::Pgsql, &lost), ErrorClass::ConnectionLost);

        let refused = DriverError::new("could not connect to server: Connection refused");
        assert_eq!(classify(Dialect::Pgsql, &refused), ErrorClass::CantConnect);
        assert_eq!(
            classify(Dialect::Pgsql, &DriverError::not_connected()),
            ErrorClass::CantConnect
        );

        let syntax = DriverError::new("ERROR:  syntax error at or near \"SELEC\"");
        assert_eq!(classify(Dialect::Pgsql, &syntax), ErrorClass::Misc);
    }

    #[test]
    fn test_sqlite_never_retryable() {
        let err = DriverError::with_code(MYSQL_SERVER_GONE, "database is locked");
        let class = classify(Dialect::Sqlite, &err);
        assert_eq!(class, ErrorClass::Misc);
        assert!(!class.is_retryable());
    }

    #[test]
    fn test_into_error() {
        let err = ErrorClass::CantConnect.into_error("refused");
        assert!(err.is_retryable());
        assert_eq!(
            ErrorClass::Misc.into_error("boom"),
            BackendError::ServerError("boom".to_string())
        );
    }
}
