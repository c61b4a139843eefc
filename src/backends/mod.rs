/// Backend Implementations
///
/// One `Connection` implementation per supported engine, and the factory
/// that builds the right one from a `BackendConfig`.
///
/// | Capability         | sqlite      | access      | oracle      | xbase        | memory |
/// |--------------------|-------------|-------------|-------------|--------------|--------|
/// | create_database    | create file | unsupported | unsupported | convert .dbf | no-op  |
/// | drop_database      | delete file | unsupported | unsupported | no-op        | no-op  |
/// | chunked reads      | yes         | yes         | yes         | yes          | yes    |
/// | query_stored_proc  | unsupported | unsupported | yes         | unsupported  | unsupported |
#[cfg(feature = "odbc")]
pub mod access;
pub mod dbf;
pub mod memory;
#[cfg(feature = "odbc")]
pub mod oracle;
pub mod sqlite;
pub mod xbase;

pub use memory::MemoryConnection;
pub use sqlite::SqliteConnection;
pub use xbase::XbaseConnection;

use crate::config::BackendConfig;
use crate::core::db::{BackendKind, Connection};
use crate::core::{DbError, Result};
use tracing::debug;

/// Builds an unopened connection for `config`.
///
/// # Errors
///
/// Returns `DbError::Config` when required settings are missing, and
/// `DbError::NotSupported` for ODBC backends in builds without the `odbc`
/// feature.
pub fn connect(config: &BackendConfig) -> Result<Box<dyn Connection>> {
    config.validate()?;
    debug!("Creating {} connection", config.kind);
    let options = config.options();
    match config.kind {
        BackendKind::Sqlite => {
            let path = config
                .path
                .clone()
                .ok_or_else(|| DbError::Config("sqlite backend requires 'path'".to_string()))?;
            Ok(Box::new(SqliteConnection::new(path, options)))
        }
        BackendKind::Memory => Ok(Box::new(MemoryConnection::new(options))),
        BackendKind::Xbase => Ok(Box::new(XbaseConnection::new(
            config.files.clone(),
            config.path.clone(),
            options,
        ))),
        #[cfg(feature = "odbc")]
        BackendKind::Access => Ok(Box::new(access::AccessConnection::from_config(config)?)),
        #[cfg(feature = "odbc")]
        BackendKind::Oracle => Ok(Box::new(oracle::OracleConnection::from_config(config)?)),
        #[cfg(not(feature = "odbc"))]
        BackendKind::Access | BackendKind::Oracle => Err(DbError::NotSupported(format!(
            "{}: built without the `odbc` feature",
            config.kind
        ))),
    }
}

/// `insert into <table> <columns> values` prefix shared by the batch builders.
pub(crate) fn insert_prefix(table: &str, columns: Option<&str>) -> String {
    match columns {
        Some(columns) if !columns.trim().is_empty() => {
            format!("insert into {} {} values ", table, columns.trim())
        }
        _ => format!("insert into {} values ", table),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::ConnectionState;

    #[test]
    fn test_factory_builds_unopened_connections() {
        let conn = connect(&BackendConfig::new(BackendKind::Memory)).unwrap();
        assert_eq!(conn.kind(), BackendKind::Memory);
        assert_eq!(conn.state(), ConnectionState::Unopened);

        let conn = connect(&BackendConfig::with_path(BackendKind::Sqlite, "/tmp/never-opened.db")).unwrap();
        assert_eq!(conn.kind(), BackendKind::Sqlite);
    }

    #[test]
    fn test_factory_validates() {
        assert!(matches!(
            connect(&BackendConfig::new(BackendKind::Sqlite)),
            Err(DbError::Config(_))
        ));
    }

    #[cfg(not(feature = "odbc"))]
    #[test]
    fn test_odbc_backends_need_feature() {
        let result = connect(&BackendConfig::with_path(BackendKind::Access, "/tmp/x.mdb"));
        assert!(matches!(result, Err(DbError::NotSupported(_))));
    }

    #[test]
    fn test_insert_prefix() {
        assert_eq!(insert_prefix("t", Some("(a,b)")), "insert into t (a,b) values ");
        assert_eq!(insert_prefix("t", None), "insert into t values ");
        assert_eq!(insert_prefix("t", Some("  ")), "insert into t values ");
    }
}
