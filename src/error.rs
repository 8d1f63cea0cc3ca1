//! Backend error taxonomy
//!
//! Every fallible operation in the database core returns a [`BackendError`].
//! Low-level engine failures arrive as [`DriverError`] and are classified per
//! dialect (see [`crate::database::core::classify`]) before being surfaced.

use serde::Serialize;
use thiserror::Error;

/// Plain discriminant of a [`BackendError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ConnectFailed,
    ConnectionLost,
    CantConnect,
    NoSuchDatabase,
    FileNotFound,
    StoreExists,
    Locked,
    SchemaTooOld,
    SchemaTooNew,
    LibraryIncompatible,
    LibraryUntestable,
    InvalidColumnType,
    DriverUnavailable,
    ServerError,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::ConnectFailed => "connect failed",
            ErrorKind::ConnectionLost => "connection lost",
            ErrorKind::CantConnect => "can't connect",
            ErrorKind::NoSuchDatabase => "no such database",
            ErrorKind::FileNotFound => "file not found",
            ErrorKind::StoreExists => "store exists",
            ErrorKind::Locked => "locked",
            ErrorKind::SchemaTooOld => "schema too old",
            ErrorKind::SchemaTooNew => "schema too new",
            ErrorKind::LibraryIncompatible => "library incompatible",
            ErrorKind::LibraryUntestable => "library untestable",
            ErrorKind::InvalidColumnType => "invalid column type",
            ErrorKind::DriverUnavailable => "driver unavailable",
            ErrorKind::ServerError => "server error",
        };
        write!(f, "{}", name)
    }
}

/// Errors reported by the backend
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackendError {
    #[error("unable to connect to database: {0}")]
    ConnectFailed(String),

    /// The engine dropped an established connection (retryable)
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// The engine could not be reached (retryable)
    #[error("can't connect to server: {0}")]
    CantConnect(String),

    #[error("database '{0}' not found")]
    NoSuchDatabase(String),

    #[error("database file '{0}' not found")]
    FileNotFound(String),

    /// Creating the store would overwrite existing data without `force`
    #[error("store already exists, might clobber it: {0}")]
    StoreExists(String),

    #[error("database is locked: {0}")]
    Locked(String),

    #[error("database schema is too old (stored version {stored}, required {required})")]
    SchemaTooOld { stored: i64, required: i64 },

    #[error("database schema is too new (stored version {stored}, supported {supported})")]
    SchemaTooNew { stored: i64, supported: i64 },

    #[error("database library fails large number test: {0}")]
    LibraryIncompatible(String),

    #[error("database library large number test incomplete: {0}")]
    LibraryUntestable(String),

    /// A typed accessor was used on a column of a different type
    #[error("invalid column type: {0}")]
    InvalidColumnType(String),

    /// A transient failure outlived the retry budget
    #[error("{kind}: giving up after {attempts} consecutive attempts: {message}")]
    GaveUp {
        kind: ErrorKind,
        attempts: u32,
        message: String,
    },

    #[error("no driver available: {0}")]
    DriverUnavailable(String),

    #[error("server error: {0}")]
    ServerError(String),
}

impl BackendError {
    /// Get the taxonomy entry for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            BackendError::ConnectFailed(_) => ErrorKind::ConnectFailed,
            BackendError::ConnectionLost(_) => ErrorKind::ConnectionLost,
            BackendError::CantConnect(_) => ErrorKind::CantConnect,
            BackendError::NoSuchDatabase(_) => ErrorKind::NoSuchDatabase,
            BackendError::FileNotFound(_) => ErrorKind::FileNotFound,
            BackendError::StoreExists(_) => ErrorKind::StoreExists,
            BackendError::Locked(_) => ErrorKind::Locked,
            BackendError::SchemaTooOld { .. } => ErrorKind::SchemaTooOld,
            BackendError::SchemaTooNew { .. } => ErrorKind::SchemaTooNew,
            BackendError::LibraryIncompatible(_) => ErrorKind::LibraryIncompatible,
            BackendError::LibraryUntestable(_) => ErrorKind::LibraryUntestable,
            BackendError::InvalidColumnType(_) => ErrorKind::InvalidColumnType,
            BackendError::GaveUp { kind, .. } => *kind,
            BackendError::DriverUnavailable(_) => ErrorKind::DriverUnavailable,
            BackendError::ServerError(_) => ErrorKind::ServerError,
        }
    }

    /// Whether the retry loop absorbs this error
    ///
    /// A `GaveUp` error is never retryable: the budget is already spent.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BackendError::ConnectionLost(_) | BackendError::CantConnect(_)
        )
    }

    pub(crate) fn server<S: Into<String>>(msg: S) -> Self {
        BackendError::ServerError(msg.into())
    }
}

/// Raw failure reported by an engine driver
///
/// `code` is the engine's numeric error code when it has one (MySQL error
/// numbers, SQLite extended result codes); PostgreSQL failures are
/// identified by message text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct DriverError {
    pub code: Option<i64>,
    pub message: String,
}

impl DriverError {
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code<S: Into<String>>(code: i64, message: S) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }

    pub(crate) fn not_connected() -> Self {
        Self::new("connection pointer is NULL")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_of_gave_up_is_transient_kind() {
        let err = BackendError::GaveUp {
            kind: ErrorKind::ConnectionLost,
            attempts: 5,
            message: "server has gone away".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::ConnectionLost);
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("5 consecutive attempts"));
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(BackendError::ConnectionLost("x".into()).is_retryable());
        assert!(BackendError::CantConnect("x".into()).is_retryable());
        assert!(!BackendError::NoSuchDatabase("x".into()).is_retryable());
        assert!(!BackendError::ServerError("x".into()).is_retryable());
    }

    #[test]
    fn test_driver_error_display() {
        let err = DriverError::with_code(2006, "MySQL server has gone away");
        assert_eq!(err.to_string(), "MySQL server has gone away");
        assert_eq!(err.code, Some(2006));
    }
}
