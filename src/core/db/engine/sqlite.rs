/// Embedded SQLite Engine
///
/// Request loop serving a session over one `rusqlite::Connection`. Used by
/// the file, in-memory and xbase backends.
use crate::core::db::connection::ConnectionOptions;
use crate::core::db::session::{Reply, Request, Session, Worker};
use crate::core::db::table::ColumnInfo;
use crate::core::{DbError, Result};
use once_cell::sync::OnceCell;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, Row, Statement};
use std::fmt::Write as _;
use std::path::PathBuf;
use tracing::{debug, info};

/// Type name reported for result columns without a declared type.
pub const UNDECLARED_TYPE: &str = "TEXT";

static DRIVER: OnceCell<()> = OnceCell::new();

/// One-time, process-wide engine bootstrap.
pub fn ensure_driver_registered() {
    DRIVER.get_or_init(|| {
        info!("SQLite engine {} registered", rusqlite::version());
    });
}

/// Where the engine keeps its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqliteTarget {
    File(PathBuf),
    Memory,
}

impl SqliteTarget {
    pub fn describe(&self) -> String {
        match self {
            SqliteTarget::File(path) => path.display().to_string(),
            SqliteTarget::Memory => ":memory:".to_string(),
        }
    }
}

/// Opens a native connection and applies the configured timeout.
pub fn connect(target: &SqliteTarget, options: &ConnectionOptions) -> Result<Connection> {
    let conn = match target {
        SqliteTarget::File(path) => Connection::open(path)?,
        SqliteTarget::Memory => Connection::open_in_memory()?,
    };
    if let Some(timeout) = options.timeout {
        conn.busy_timeout(timeout)?;
    }
    Ok(conn)
}

/// Starts a session worker owning a connection to `target`.
pub fn spawn(label: &str, target: SqliteTarget, options: ConnectionOptions) -> Result<Session> {
    ensure_driver_registered();
    debug!("Opening SQLite session on {}", target.describe());
    Session::spawn(label, move || connect(&target, &options), serve)
}

/// Serves requests until the session shuts down.
pub fn serve(conn: Connection, worker: &mut Worker) {
    while let Some(request) = worker.next() {
        match request {
            Request::OpenCursor(sql) => serve_cursor(&conn, &sql, worker),
            other => serve_simple(&conn, other, worker),
        }
    }
}

/// Keeps a cursor open across `Fetch` requests until `CloseCursor`.
fn serve_cursor(conn: &Connection, sql: &str, worker: &mut Worker) {
    let mut stmt = match conn.prepare(sql) {
        Ok(stmt) => stmt,
        Err(e) => return worker.reply(Reply::Failed(e.into())),
    };
    let columns = statement_columns(&stmt);
    let width = columns.len();
    let mut rows = match stmt.query([]) {
        Ok(rows) => rows,
        Err(e) => return worker.reply(Reply::Failed(e.into())),
    };
    worker.reply(Reply::Columns(columns));

    while let Some(request) = worker.next() {
        match request {
            Request::Fetch => {
                let reply = match rows.next() {
                    Ok(Some(row)) => match row_values(row, width) {
                        Ok(values) => Reply::Row(Some(values)),
                        Err(e) => Reply::Failed(e.into()),
                    },
                    Ok(None) => Reply::Row(None),
                    Err(e) => Reply::Failed(e.into()),
                };
                worker.reply(reply);
            }
            Request::CloseCursor => return worker.reply(Reply::Done),
            Request::OpenCursor(_) => worker.reply(Reply::Failed(DbError::State(
                "a cursor is already open on this connection".to_string(),
            ))),
            other => serve_simple(conn, other, worker),
        }
    }
}

fn serve_simple(conn: &Connection, request: Request, worker: &mut Worker) {
    match request {
        Request::Execute(sql) => worker.finish(conn.execute_batch(&sql).map_err(DbError::from)),
        Request::Batch(statements) => worker.finish(run_batch(conn, &statements)),
        Request::Scalar(sql) => match scalar(conn, &sql) {
            Ok(value) => worker.reply(Reply::Scalar(value)),
            Err(e) => worker.reply(Reply::Failed(e)),
        },
        Request::Describe(sql) => match conn.prepare(&sql) {
            Ok(stmt) => worker.reply(Reply::Columns(statement_columns(&stmt))),
            Err(e) => worker.reply(Reply::Failed(e.into())),
        },
        // Without an open cursor there is nothing to fetch or release.
        Request::Fetch => worker.reply(Reply::Failed(DbError::State(
            "no cursor is open on this connection".to_string(),
        ))),
        Request::CloseCursor | Request::OpenCursor(_) | Request::Shutdown => {
            worker.reply(Reply::Done)
        }
    }
}

fn run_batch(conn: &Connection, statements: &[String]) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    for statement in statements {
        tx.execute_batch(statement)?;
    }
    tx.commit()?;
    Ok(())
}

fn scalar(conn: &Connection, sql: &str) -> Result<String> {
    let mut stmt = conn.prepare(sql)?;
    if stmt.column_count() == 0 {
        stmt.execute([])?;
        return Ok(String::new());
    }
    let mut rows = stmt.query([])?;
    match rows.next()? {
        Some(row) => Ok(value_to_text(row.get_ref(0)?)),
        None => Ok(String::new()),
    }
}

fn statement_columns(stmt: &Statement<'_>) -> Vec<ColumnInfo> {
    stmt.columns()
        .iter()
        .map(|column| ColumnInfo::new(column.name(), column.decl_type().unwrap_or(UNDECLARED_TYPE)))
        .collect()
}

fn row_values(row: &Row<'_>, width: usize) -> rusqlite::Result<Vec<String>> {
    (0..width).map(|i| row.get_ref(i).map(value_to_text)).collect()
}

/// Converts a native value to row model text. NULL becomes an empty string
/// and blobs are rendered as lowercase hex.
pub fn value_to_text(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => String::new(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(t) => String::from_utf8_lossy(t).to_string(),
        ValueRef::Blob(b) => {
            let mut hex = String::with_capacity(b.len() * 2);
            for byte in b {
                let _ = write!(hex, "{:02x}", byte);
            }
            hex
        }
    }
}
