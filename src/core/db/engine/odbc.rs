/// ODBC Engine
///
/// Request loop serving a session over an ODBC connection. Used by the
/// Access and Oracle backends. The driver manager environment is created
/// once per process.
use crate::core::db::connection::ConnectionOptions;
use crate::core::db::session::{Reply, Request, Session, Worker};
use crate::core::db::table::ColumnInfo;
use crate::core::{DbError, Result};
use odbc_api::buffers::TextRowSet;
use odbc_api::{
    Connection, ConnectionOptions as OdbcOptions, Cursor, DataType, Environment, Preallocated,
    ResultSetMetadata,
};
use once_cell::sync::OnceCell;
use std::collections::VecDeque;
use tracing::{debug, info};

/// Rows fetched per round trip while a cursor is open.
const FETCH_BATCH: usize = 256;
/// Upper bound for a single text value. Longer values fail the fetch
/// instead of being cut short.
const MAX_TEXT_LEN: usize = 65536;

static ENVIRONMENT: OnceCell<Environment> = OnceCell::new();

/// One-time, process-wide driver manager bootstrap.
pub fn ensure_driver_registered() -> Result<&'static Environment> {
    ENVIRONMENT.get_or_try_init(|| {
        let env = Environment::new().map_err(|e| {
            DbError::Driver(format!(
                "Failed to create ODBC environment: {}. Make sure an ODBC driver manager is installed.",
                e
            ))
        })?;
        info!("ODBC environment initialized");
        Ok(env)
    })
}

/// Starts a session worker connected through `connection_string`.
///
/// `redacted` is what gets logged in place of the connection string.
pub fn spawn(
    label: &str,
    connection_string: String,
    redacted: String,
    options: ConnectionOptions,
) -> Result<Session> {
    let env = ensure_driver_registered()?;
    debug!("Opening ODBC session: {}", redacted);
    let timeout = statement_timeout(&options);
    Session::spawn(
        label,
        move || {
            let odbc_options = OdbcOptions {
                login_timeout_sec: options.timeout.map(|t| t.as_secs() as u32),
                ..OdbcOptions::default()
            };
            Ok(env.connect_with_connection_string(&connection_string, odbc_options)?)
        },
        move |conn: Connection<'static>, worker: &mut Worker| serve(conn, timeout, worker),
    )
}

/// Query timeout in seconds for every statement; `None` keeps the driver default.
fn statement_timeout(options: &ConnectionOptions) -> Option<usize> {
    options.timeout.map(|t| t.as_secs() as usize)
}

/// Serves requests until the session shuts down. `timeout` (seconds) is
/// applied to every statement executed.
pub fn serve(conn: Connection<'static>, timeout: Option<usize>, worker: &mut Worker) {
    while let Some(request) = worker.next() {
        match request {
            Request::OpenCursor(sql) => serve_cursor(&conn, timeout, &sql, worker),
            other => serve_simple(&conn, timeout, other, worker),
        }
    }
}

/// A statement handle carrying the per-statement timeout.
fn statement<'c>(conn: &'c Connection<'static>, timeout: Option<usize>) -> Result<Preallocated<'c>> {
    let mut statement = conn.preallocate()?;
    if let Some(secs) = timeout {
        statement.set_query_timeout_sec(secs)?;
    }
    Ok(statement)
}

fn serve_cursor(conn: &Connection<'static>, timeout: Option<usize>, sql: &str, worker: &mut Worker) {
    let mut handle = match statement(conn, timeout) {
        Ok(handle) => handle,
        Err(e) => return worker.reply(Reply::Failed(e)),
    };
    let mut cursor = match handle.execute(sql, ()) {
        Ok(Some(cursor)) => cursor,
        Ok(None) => {
            return worker.reply(Reply::Failed(DbError::Driver(
                "statement did not produce a result set".to_string(),
            )))
        }
        Err(e) => return worker.reply(Reply::Failed(e.into())),
    };
    let columns = match result_columns(&mut cursor) {
        Ok(columns) => columns,
        Err(e) => return worker.reply(Reply::Failed(e)),
    };
    let width = columns.len();
    let buffer = match TextRowSet::for_cursor(FETCH_BATCH, &mut cursor, Some(MAX_TEXT_LEN)) {
        Ok(buffer) => buffer,
        Err(e) => return worker.reply(Reply::Failed(e.into())),
    };
    let mut block = match cursor.bind_buffer(buffer) {
        Ok(block) => block,
        Err(e) => return worker.reply(Reply::Failed(e.into())),
    };
    worker.reply(Reply::Columns(columns));

    let mut pending: VecDeque<Vec<String>> = VecDeque::new();
    let mut exhausted = false;
    while let Some(request) = worker.next() {
        match request {
            Request::Fetch => {
                if pending.is_empty() && !exhausted {
                    match block.fetch_with_truncation_check(true) {
                        Ok(Some(batch)) => {
                            for row in 0..batch.num_rows() {
                                pending.push_back(
                                    (0..width)
                                        .map(|col| {
                                            batch
                                                .at(col, row)
                                                .map(|bytes| String::from_utf8_lossy(bytes).to_string())
                                                .unwrap_or_default()
                                        })
                                        .collect(),
                                );
                            }
                        }
                        Ok(None) => exhausted = true,
                        Err(e) => {
                            worker.reply(Reply::Failed(e.into()));
                            continue;
                        }
                    }
                }
                worker.reply(Reply::Row(pending.pop_front()));
            }
            Request::CloseCursor => return worker.reply(Reply::Done),
            Request::OpenCursor(_) => worker.reply(Reply::Failed(DbError::State(
                "a cursor is already open on this connection".to_string(),
            ))),
            other => serve_simple(conn, timeout, other, worker),
        }
    }
}

fn serve_simple(conn: &Connection<'static>, timeout: Option<usize>, request: Request, worker: &mut Worker) {
    match request {
        Request::Execute(sql) => worker.finish(execute(conn, timeout, &sql)),
        Request::Batch(statements) => worker.finish(run_batch(conn, timeout, &statements)),
        Request::Scalar(sql) => match scalar(conn, timeout, &sql) {
            Ok(value) => worker.reply(Reply::Scalar(value)),
            Err(e) => worker.reply(Reply::Failed(e)),
        },
        Request::Describe(sql) => match describe(conn, &sql) {
            Ok(columns) => worker.reply(Reply::Columns(columns)),
            Err(e) => worker.reply(Reply::Failed(e)),
        },
        Request::Fetch => worker.reply(Reply::Failed(DbError::State(
            "no cursor is open on this connection".to_string(),
        ))),
        Request::CloseCursor | Request::OpenCursor(_) | Request::Shutdown => {
            worker.reply(Reply::Done)
        }
    }
}

fn execute(conn: &Connection<'static>, timeout: Option<usize>, sql: &str) -> Result<()> {
    statement(conn, timeout)?.execute(sql, ())?;
    Ok(())
}

fn run_batch(conn: &Connection<'static>, timeout: Option<usize>, statements: &[String]) -> Result<()> {
    conn.set_autocommit(false)?;
    let mut outcome = Ok(());
    for sql in statements {
        if let Err(e) = execute(conn, timeout, sql) {
            outcome = Err(e);
            break;
        }
    }
    let finished = match outcome {
        Ok(()) => conn.commit().map_err(DbError::from),
        Err(e) => {
            let _ = conn.rollback();
            Err(e)
        }
    };
    conn.set_autocommit(true)?;
    finished
}

fn scalar(conn: &Connection<'static>, timeout: Option<usize>, sql: &str) -> Result<String> {
    let mut handle = statement(conn, timeout)?;
    let mut cursor = match handle.execute(sql, ())? {
        Some(cursor) => cursor,
        None => return Ok(String::new()),
    };
    let mut buffer = TextRowSet::for_cursor(1, &mut cursor, Some(MAX_TEXT_LEN))?;
    let mut block = cursor.bind_buffer(&mut buffer)?;
    match block.fetch_with_truncation_check(true)? {
        Some(batch) if batch.num_rows() > 0 => Ok(batch
            .at(0, 0)
            .map(|bytes| String::from_utf8_lossy(bytes).to_string())
            .unwrap_or_default()),
        _ => Ok(String::new()),
    }
}

fn describe(conn: &Connection<'static>, sql: &str) -> Result<Vec<ColumnInfo>> {
    let mut prepared = conn.prepare(sql)?;
    result_columns(&mut prepared)
}

fn result_columns(metadata: &mut impl ResultSetMetadata) -> Result<Vec<ColumnInfo>> {
    let count = metadata.num_result_cols()? as u16;
    let mut columns = Vec::with_capacity(count as usize);
    for index in 1..=count {
        let name = metadata.col_name(index)?;
        let data_type = metadata.col_data_type(index)?;
        columns.push(ColumnInfo::new(name, type_name(&data_type)));
    }
    Ok(columns)
}

fn type_name(data_type: &DataType) -> &'static str {
    match data_type {
        DataType::Char { .. } | DataType::WChar { .. } => "CHAR",
        DataType::Varchar { .. } | DataType::WVarchar { .. } => "VARCHAR",
        DataType::LongVarchar { .. } => "LONGVARCHAR",
        DataType::Numeric { .. } | DataType::Decimal { .. } => "NUMERIC",
        DataType::Integer | DataType::SmallInt | DataType::TinyInt | DataType::BigInt => "INTEGER",
        DataType::Float { .. } | DataType::Real | DataType::Double => "FLOAT",
        DataType::Date => "DATE",
        DataType::Time { .. } => "TIME",
        DataType::Timestamp { .. } => "TIMESTAMP",
        DataType::Bit => "BIT",
        DataType::Binary { .. } | DataType::Varbinary { .. } | DataType::LongVarbinary { .. } => {
            "BINARY"
        }
        _ => "OTHER",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_statement_timeout_follows_options() {
        assert_eq!(statement_timeout(&ConnectionOptions::default()), None);
        assert_eq!(statement_timeout(&ConnectionOptions::new(-1, false)), None);
        let options = ConnectionOptions {
            timeout: Some(Duration::from_secs(45)),
            execute_security: false,
        };
        assert_eq!(statement_timeout(&options), Some(45));
    }

    #[test]
    fn test_type_names() {
        assert_eq!(type_name(&DataType::Integer), "INTEGER");
        assert_eq!(type_name(&DataType::Date), "DATE");
    }
}
