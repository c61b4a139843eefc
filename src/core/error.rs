/// dbbridge Error Module
///
/// This module defines the error types shared by every backend, the row model
/// and the transfer orchestrator. Native driver failures keep their original
/// message so callers (and transfer logs) can report exactly what the engine said.
use thiserror::Error;

/// Comprehensive error type for dbbridge.
///
/// The variants fall into three groups:
/// - native database failures (`Sqlite`, `Odbc`, `Driver`), the "database errors"
///   a transfer may tolerate per row
/// - capability and usage failures (`NotSupported`, `State`, `Schema`)
/// - ambient failures (configuration, I/O, JSON, malformed xbase files)
#[derive(Error, Debug)]
pub enum DbError {
    /// Native failure reported by the embedded SQLite engine
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Native failure reported through the ODBC driver manager
    #[cfg(feature = "odbc")]
    #[error("Database error: {0}")]
    Odbc(#[from] odbc_api::Error),

    /// Any other driver-level failure (lost session, failed conversion)
    #[error("Database error: {0}")]
    Driver(String),

    /// The backend's native engine has no such capability
    #[error("Operation not supported: {0}")]
    NotSupported(String),

    /// The connection was used in a way its current state does not allow
    #[error("Invalid connection state: {0}")]
    State(String),

    /// Row model invariant violations (duplicate columns, row arity)
    #[error("Schema error: {0}")]
    Schema(String),

    /// Configuration loading and validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File system and I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed or unsupported xbase (.dbf) file
    #[error("Xbase error: {0}")]
    Xbase(String),
}

impl DbError {
    /// Creates a `NotSupported` error naming the backend and the operation.
    pub fn not_supported(backend: &str, operation: &str) -> Self {
        DbError::NotSupported(format!("{}.{}", backend, operation))
    }

    /// True for failures raised by a native driver.
    ///
    /// These are the errors tolerant transfers catch per row; everything else
    /// is a misuse or environment problem and always propagates.
    pub fn is_database_error(&self) -> bool {
        match self {
            DbError::Sqlite(_) | DbError::Driver(_) => true,
            #[cfg(feature = "odbc")]
            DbError::Odbc(_) => true,
            _ => false,
        }
    }
}

/// Type alias for Result to use DbError as the error type.
pub type Result<T> = std::result::Result<T, DbError>;
