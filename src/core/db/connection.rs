/// Connection Contract Module
///
/// This module defines the uniform operation set every backend implements,
/// together with the small value types that flow through it: backend kinds,
/// connection options, the lifecycle state, chunk windows and scan results.
///
/// ## Lifecycle
///
/// A connection starts `Unopened`. `open` moves it to `Idle`; a chunked read
/// (`query_block` or a windowed transfer) moves it to `Chunking` until the
/// underlying result set is exhausted; `close` moves it to `Closed` from any
/// state. A closed connection may be reopened.
///
/// ## Ownership
///
/// A connection holds mutable cursor state and is meant to be owned by one
/// caller at a time. All operations take `&mut self`, so the borrow checker
/// rules out two chunked reads interleaving on the same connection.
use crate::core::db::table::{ColumnInfo, DataTable};
use crate::core::{DbError, Result};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Timeout value meaning "leave the driver default alone".
pub const TIMEOUT_UNSET: i64 = -1;

/// Supported backend engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Embedded file-based SQL engine
    Sqlite,
    /// Legacy office-document database engine (.mdb/.accdb)
    Access,
    /// Client-server RDBMS
    Oracle,
    /// Legacy xbase (.dbf) files converted into an embedded engine
    #[serde(alias = "dbf")]
    Xbase,
    /// In-memory embedded engine
    Memory,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Sqlite => "sqlite",
            BackendKind::Access => "access",
            BackendKind::Oracle => "oracle",
            BackendKind::Xbase => "xbase",
            BackendKind::Memory => "memory",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sqlite" => Ok(BackendKind::Sqlite),
            "access" => Ok(BackendKind::Access),
            "oracle" => Ok(BackendKind::Oracle),
            "xbase" | "dbf" => Ok(BackendKind::Xbase),
            "memory" => Ok(BackendKind::Memory),
            other => Err(DbError::Config(format!("Unknown backend kind: '{}'", other))),
        }
    }
}

/// Per-connection behaviour switches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Statement timeout applied by the native driver (`None` = driver default)
    pub timeout: Option<Duration>,
    /// Sanitize executed statements and bound template values
    pub execute_security: bool,
}

impl ConnectionOptions {
    /// Builds options from a timeout in seconds, where `-1` means unset.
    pub fn new(timeout_secs: i64, execute_security: bool) -> Self {
        ConnectionOptions {
            timeout: timeout_from_secs(timeout_secs),
            execute_security,
        }
    }
}

/// Maps the `-1` sentinel (or any negative value) to "no timeout".
pub fn timeout_from_secs(secs: i64) -> Option<Duration> {
    if secs <= TIMEOUT_UNSET {
        None
    } else {
        Some(Duration::from_secs(secs as u64))
    }
}

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No native connection has been created yet
    Unopened,
    /// Open, no cursor kept between calls
    Idle,
    /// Open with a chunked-read cursor kept between calls
    Chunking,
    /// Torn down by `close`
    Closed,
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Idle | ConnectionState::Chunking)
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState::Unopened
    }
}

/// Inclusive, zero-based row range over a whole result set.
///
/// Row indices count every row the cursor has read since the query started,
/// not just the rows of the current chunk. Windows passed to successive
/// chunked calls must continue exactly where the previous one ended
/// (`[0,k-1]`, `[k,2k-1]`, ...). The cursor cannot rewind: a window that
/// starts behind the cursor silently yields fewer rows, and one that starts
/// ahead of it consumes and discards the rows in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowWindow {
    pub start_row: u64,
    pub end_row: u64,
}

impl RowWindow {
    pub fn new(start_row: u64, end_row: u64) -> Self {
        RowWindow { start_row, end_row }
    }

    /// The `index`-th window of `size` rows (`size` of 0 is treated as 1).
    pub fn chunk(index: u64, size: u64) -> Self {
        let size = size.max(1);
        let start_row = index * size;
        RowWindow {
            start_row,
            end_row: start_row + size - 1,
        }
    }

    pub fn contains(&self, row: u64) -> bool {
        row >= self.start_row && row <= self.end_row
    }

    /// The window of the same size directly after this one.
    pub fn next(&self) -> Self {
        let size = self.end_row.saturating_sub(self.start_row) + 1;
        RowWindow {
            start_row: self.end_row + 1,
            end_row: self.end_row + size,
        }
    }
}

/// Result of a cursor scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanOutcome {
    /// Sanitized result columns
    pub columns: Vec<ColumnInfo>,
    /// Chunked scans: at least one row was read during this call
    pub has_more_data: bool,
    /// Rows read from the cursor during this call, including discarded ones
    pub rows_read: u64,
}

/// Callback receiving each in-window row. Returning an error stops the scan.
pub type RowVisitor<'a> = dyn FnMut(&[ColumnInfo], Vec<String>) -> Result<()> + 'a;

/// The uniform operation set of every backend.
pub trait Connection: Send {
    /// Which engine this connection talks to.
    fn kind(&self) -> BackendKind;

    fn options(&self) -> &ConnectionOptions;

    fn options_mut(&mut self) -> &mut ConnectionOptions;

    fn state(&self) -> ConnectionState;

    /// Establishes the native connection. Opening an open connection is a no-op.
    fn open(&mut self) -> Result<()>;

    /// Tears down cursor and connection. Idempotent.
    fn close(&mut self) -> Result<()>;

    /// Creates the database. Backends without the capability return
    /// `DbError::NotSupported`.
    fn create_database(&mut self, name: Option<&str>) -> Result<()>;

    /// Drops the database. Backends without the capability return
    /// `DbError::NotSupported`.
    fn drop_database(&mut self, name: Option<&str>) -> Result<()>;

    /// Runs a non-query statement.
    ///
    /// An unopened connection is opened for the call and closed again. With
    /// `execute_security` set, the text is sanitized first.
    fn execute(&mut self, sql: &str) -> Result<()>;

    /// First column of the first row as text; empty for NULL or no rows.
    fn execute_scalar(&mut self, sql: &str) -> Result<String>;

    /// Inserts pre-rendered value tuples (`"(1,'a')"`) in one native call.
    ///
    /// `columns` is an optional column list such as `"(id,val)"`.
    fn insert_block(&mut self, table: &str, rows: &[String], columns: Option<&str>) -> Result<()>;

    /// Drives the cursor over `sql`, handing every in-window row to `visit`.
    ///
    /// With `window` absent the whole result is read and the cursor is
    /// always released. With a window the connection must be open; the
    /// cursor is kept between calls until a call reads no rows.
    fn scan(
        &mut self,
        sql: &str,
        window: Option<RowWindow>,
        visit: &mut RowVisitor<'_>,
    ) -> Result<ScanOutcome>;

    /// Sanitized result column names, without reading data.
    fn column_names(&mut self, sql: &str) -> Result<Vec<String>>;

    /// Sanitized result column names with native type names.
    fn column_names_and_types(&mut self, sql: &str) -> Result<Vec<ColumnInfo>>;

    /// Runs a stored procedure returning a cursor through `out_param`.
    ///
    /// ODBC hands REF CURSOR outputs back as ordinary result sets (the
    /// Oracle driver is opened with `RST=T`), so `out_param` only names the
    /// cursor for logging; the procedure's own signature decides what is
    /// returned.
    fn query_stored_proc(&mut self, sql: &str, table: &str, out_param: &str) -> Result<DataTable> {
        let _ = (sql, table, out_param);
        Err(DbError::not_supported(self.kind().as_str(), "query_stored_proc"))
    }

    /// Runs a query and materializes the whole result.
    fn query(&mut self, sql: &str, table: &str) -> Result<DataTable> {
        self.query_with_progress(sql, table, &mut |_| {})
    }

    /// Runs a query and renders the result as an HTML table.
    ///
    /// See [`DataTable::to_html`] for the markup and escaping rules.
    fn query_html(&mut self, sql: &str, id: &str, options: &str) -> Result<String> {
        Ok(self.query(sql, id)?.to_html(id, options))
    }

    /// Like [`Connection::query`], reporting 0 first and then the running
    /// row count after each row.
    fn query_with_progress(
        &mut self,
        sql: &str,
        table: &str,
        progress: &mut dyn FnMut(u64),
    ) -> Result<DataTable> {
        let mut result: Option<DataTable> = None;
        let mut counter = 0u64;
        progress(counter);
        let outcome = self.scan(sql, None, &mut |columns, row| {
            if result.is_none() {
                result = Some(DataTable::with_columns(table, columns)?);
            }
            if let Some(data) = result.as_mut() {
                data.push_row(row)?;
            }
            counter += 1;
            progress(counter);
            Ok(())
        })?;
        match result {
            Some(data) => Ok(data),
            None => DataTable::with_columns(table, &outcome.columns),
        }
    }

    /// Reads the rows of one window from a cursor kept open between calls.
    ///
    /// Returns the materialized rows and whether this call read any row.
    /// Callers keep advancing the window until the flag is false, at which
    /// point the cursor has been released.
    fn query_block(
        &mut self,
        sql: &str,
        table: &str,
        start_row: u64,
        end_row: u64,
    ) -> Result<(DataTable, bool)> {
        let mut result: Option<DataTable> = None;
        let outcome = self.scan(sql, Some(RowWindow::new(start_row, end_row)), &mut |columns, row| {
            if result.is_none() {
                result = Some(DataTable::with_columns(table, columns)?);
            }
            if let Some(data) = result.as_mut() {
                data.push_row(row)?;
            }
            Ok(())
        })?;
        let data = match result {
            Some(data) => data,
            None => DataTable::with_columns(table, &outcome.columns)?,
        };
        Ok((data, outcome.has_more_data))
    }
}
