/// Connection State Machine
///
/// `Link` carries the engine-independent half of every backend: the
/// `Unopened → Idle ⇄ Chunking → Closed` lifecycle, ephemeral versus
/// persistent sessions, the chunked-read row counter and the cursor
/// handling shared by whole and windowed scans. Backends wrap a `Link` and
/// add only what their engine does differently.
use crate::core::db::command::remove_unwanted_chars_execute;
use crate::core::db::connection::{
    ConnectionOptions, ConnectionState, RowVisitor, RowWindow, ScanOutcome,
};
use crate::core::db::session::Session;
use crate::core::db::table::ColumnInfo;
use crate::core::{DbError, Result};
use tracing::{debug, info, warn};

/// Creates a fresh session from the current options.
pub type Opener = Box<dyn Fn(&ConnectionOptions) -> Result<Session> + Send>;

pub struct Link {
    backend: &'static str,
    opener: Opener,
    options: ConnectionOptions,
    /// Keep the session open after the first call instead of opening one
    /// per call
    persistent: bool,
    session: Option<Session>,
    state: ConnectionState,
    current_row: u64,
    cursor_sql: Option<String>,
    cursor_columns: Vec<ColumnInfo>,
}

impl Link {
    pub fn new(backend: &'static str, options: ConnectionOptions, opener: Opener) -> Self {
        Link {
            backend,
            opener,
            options,
            persistent: false,
            session: None,
            state: ConnectionState::Unopened,
            current_row: 0,
            cursor_sql: None,
            cursor_columns: Vec::new(),
        }
    }

    /// Keeps the first session alive for every later call.
    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }

    /// Points the link at a different native target. Any open session is
    /// closed first.
    pub fn set_opener(&mut self, opener: Opener) -> Result<()> {
        self.close()?;
        self.opener = opener;
        Ok(())
    }

    pub fn backend(&self) -> &'static str {
        self.backend
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut ConnectionOptions {
        &mut self.options
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Zero-based count of rows read by the current chunked cursor.
    pub fn current_row(&self) -> u64 {
        self.current_row
    }

    pub fn open(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Ok(());
        }
        let session = (self.opener)(&self.options)?;
        info!("Opened {} connection (session {})", self.backend, session.id());
        self.session = Some(session);
        self.state = ConnectionState::Idle;
        Ok(())
    }

    pub fn close(&mut self) -> Result<()> {
        if let Some(session) = self.session.take() {
            if self.state == ConnectionState::Chunking {
                if let Err(e) = session.close_cursor() {
                    warn!("Failed to release {} cursor on close: {}", self.backend, e);
                }
            }
            info!("Closed {} connection (session {})", self.backend, session.id());
        }
        self.state = ConnectionState::Closed;
        self.current_row = 0;
        self.cursor_sql = None;
        self.cursor_columns.clear();
        Ok(())
    }

    /// Runs `f` on the open session, or on one opened just for this call.
    pub fn with_session<T>(&mut self, f: impl FnOnce(&Session) -> Result<T>) -> Result<T> {
        if self.session.is_none() && self.persistent {
            self.open()?;
        }
        match self.session.as_ref() {
            Some(session) => f(session),
            None => {
                let session = (self.opener)(&self.options)?;
                debug!("Ephemeral {} session {}", self.backend, session.id());
                f(&session)
            }
        }
    }

    fn prepare_sql(&self, sql: &str) -> String {
        if self.options.execute_security {
            remove_unwanted_chars_execute(sql)
        } else {
            sql.to_string()
        }
    }

    pub fn execute(&mut self, sql: &str) -> Result<()> {
        let sql = self.prepare_sql(sql);
        debug!("{}.execute: {}", self.backend, sql);
        self.with_session(|session| session.execute(&sql))
    }

    /// Runs all statements as one transaction.
    pub fn batch(&mut self, statements: Vec<String>) -> Result<()> {
        let statements: Vec<String> = statements.iter().map(|s| self.prepare_sql(s)).collect();
        debug!("{}.batch: {} statements", self.backend, statements.len());
        self.with_session(|session| session.batch(statements))
    }

    pub fn scalar(&mut self, sql: &str) -> Result<String> {
        let sql = self.prepare_sql(sql);
        debug!("{}.execute_scalar: {}", self.backend, sql);
        self.with_session(|session| session.scalar(&sql))
    }

    /// Sanitized result metadata for `sql`.
    pub fn describe(&mut self, sql: &str) -> Result<Vec<ColumnInfo>> {
        let columns = self.with_session(|session| session.describe(sql))?;
        Ok(columns.iter().map(ColumnInfo::sanitized).collect())
    }

    pub fn scan(
        &mut self,
        sql: &str,
        window: Option<RowWindow>,
        visit: &mut RowVisitor<'_>,
    ) -> Result<ScanOutcome> {
        match window {
            None => self.scan_all(sql, visit),
            Some(window) => self.scan_window(sql, window, visit),
        }
    }

    fn scan_all(&mut self, sql: &str, visit: &mut RowVisitor<'_>) -> Result<ScanOutcome> {
        if self.state == ConnectionState::Chunking {
            return Err(DbError::State(format!(
                "{} connection is in the middle of a chunked read",
                self.backend
            )));
        }
        debug!("{}.query: {}", self.backend, sql);
        let backend = self.backend;
        self.with_session(|session| {
            let columns: Vec<ColumnInfo> = session
                .open_cursor(sql)?
                .iter()
                .map(ColumnInfo::sanitized)
                .collect();

            let mut rows_read = 0u64;
            let read = (|| -> Result<()> {
                while let Some(row) = session.fetch()? {
                    rows_read += 1;
                    visit(&columns, row)?;
                }
                Ok(())
            })();

            let released = session.close_cursor();
            match (read, released) {
                (Ok(()), Ok(())) => Ok(ScanOutcome {
                    columns,
                    has_more_data: false,
                    rows_read,
                }),
                (Ok(()), Err(e)) => Err(e),
                (Err(e), released) => {
                    if let Err(cleanup) = released {
                        warn!("Failed to release {} cursor: {}", backend, cleanup);
                    }
                    Err(e)
                }
            }
        })
    }

    fn scan_window(
        &mut self,
        sql: &str,
        window: RowWindow,
        visit: &mut RowVisitor<'_>,
    ) -> Result<ScanOutcome> {
        let session = match self.session.as_ref() {
            Some(session) => session,
            None => {
                return Err(DbError::State(format!(
                    "chunked reads need an open {} connection",
                    self.backend
                )))
            }
        };

        if self.state == ConnectionState::Chunking {
            if self.cursor_sql.as_deref() != Some(sql) {
                warn!(
                    "{} chunked read continues the open cursor; ignoring new statement: {}",
                    self.backend, sql
                );
            }
        } else {
            debug!("{}.query_block: {}", self.backend, sql);
            let columns = session.open_cursor(sql)?;
            self.cursor_columns = columns.iter().map(ColumnInfo::sanitized).collect();
            self.cursor_sql = Some(sql.to_string());
            self.current_row = 0;
            self.state = ConnectionState::Chunking;
        }

        let mut has_more_data = false;
        let mut rows_read = 0u64;
        loop {
            let row = match session.fetch() {
                Ok(Some(row)) => row,
                Ok(None) => break,
                Err(e) => {
                    if let Err(cleanup) = session.close_cursor() {
                        warn!("Failed to release {} cursor: {}", self.backend, cleanup);
                    }
                    self.state = ConnectionState::Idle;
                    self.cursor_sql = None;
                    return Err(e);
                }
            };
            has_more_data = true;
            rows_read += 1;
            let index = self.current_row;
            self.current_row += 1;
            if window.contains(index) {
                visit(&self.cursor_columns, row)?;
            }
            if self.current_row > window.end_row {
                break;
            }
        }

        let outcome = ScanOutcome {
            columns: self.cursor_columns.clone(),
            has_more_data,
            rows_read,
        };

        if !has_more_data {
            debug!(
                "{} cursor exhausted after {} rows",
                self.backend, self.current_row
            );
            self.state = ConnectionState::Idle;
            self.cursor_sql = None;
            session.close_cursor()?;
        }
        Ok(outcome)
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::engine::sqlite::{self, SqliteTarget};

    fn memory_link() -> Link {
        Link::new(
            "memory",
            ConnectionOptions::default(),
            Box::new(|options: &ConnectionOptions| sqlite::spawn("link-test", SqliteTarget::Memory, options.clone())),
        )
        .persistent()
    }

    fn seeded(rows: u64) -> Link {
        let mut link = memory_link();
        link.execute("CREATE TABLE n (v INTEGER)").unwrap();
        for v in 0..rows {
            link.execute(&format!("INSERT INTO n VALUES ({})", v)).unwrap();
        }
        link
    }

    fn collect_window(link: &mut Link, start: u64, end: u64) -> (Vec<String>, bool) {
        let mut seen = Vec::new();
        let outcome = link
            .scan("SELECT v FROM n ORDER BY v", Some(RowWindow::new(start, end)), &mut |_, row| {
                seen.push(row[0].clone());
                Ok(())
            })
            .unwrap();
        (seen, outcome.has_more_data)
    }

    #[test]
    fn test_lifecycle_states() {
        let mut link = memory_link();
        assert_eq!(link.state(), ConnectionState::Unopened);
        link.open().unwrap();
        assert_eq!(link.state(), ConnectionState::Idle);
        link.open().unwrap();
        link.close().unwrap();
        assert_eq!(link.state(), ConnectionState::Closed);
        link.close().unwrap();
        assert_eq!(link.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_windowed_scan_requires_open_connection() {
        let mut link = Link::new(
            "sqlite",
            ConnectionOptions::default(),
            Box::new(|options: &ConnectionOptions| sqlite::spawn("link-test", SqliteTarget::Memory, options.clone())),
        );
        let result = link.scan("SELECT 1", Some(RowWindow::new(0, 9)), &mut |_, _| Ok(()));
        assert!(matches!(result, Err(DbError::State(_))));
    }

    #[test]
    fn test_chunked_scan_walks_cursor() {
        let mut link = seeded(5);
        assert_eq!(collect_window(&mut link, 0, 1), (vec!["0".into(), "1".into()], true));
        assert_eq!(link.state(), ConnectionState::Chunking);
        assert_eq!(collect_window(&mut link, 2, 3), (vec!["2".into(), "3".into()], true));
        assert_eq!(collect_window(&mut link, 4, 5), (vec!["4".into()], true));
        assert_eq!(collect_window(&mut link, 6, 7), (vec![], false));
        assert_eq!(link.state(), ConnectionState::Idle);

        // A fresh call starts a new query.
        assert_eq!(collect_window(&mut link, 0, 0), (vec!["0".into()], true));
    }

    #[test]
    fn test_window_behind_cursor_discards_rows() {
        let mut link = seeded(6);
        assert_eq!(collect_window(&mut link, 0, 1).0.len(), 2);
        // The cursor sits at row 2; a window starting at 0 reads one row
        // past its end and materializes nothing.
        assert_eq!(collect_window(&mut link, 0, 1), (vec![], true));
        assert_eq!(link.current_row(), 3);
    }

    #[test]
    fn test_window_ahead_of_cursor_skips_rows() {
        let mut link = seeded(6);
        assert_eq!(collect_window(&mut link, 3, 4), (vec!["3".into(), "4".into()], true));
        assert_eq!(link.current_row(), 5);
    }

    #[test]
    fn test_whole_scan_rejected_while_chunking() {
        let mut link = seeded(3);
        collect_window(&mut link, 0, 0);
        let result = link.scan("SELECT v FROM n", None, &mut |_, _| Ok(()));
        assert!(matches!(result, Err(DbError::State(_))));
        link.close().unwrap();
        assert_eq!(link.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_whole_scan_releases_cursor_after_visitor_error() {
        let mut link = seeded(3);
        let result = link.scan("SELECT v FROM n", None, &mut |_, _| {
            Err(DbError::Driver("stop".to_string()))
        });
        assert!(matches!(result, Err(DbError::Driver(_))));
        let mut count = 0;
        link.scan("SELECT v FROM n", None, &mut |_, _| {
            count += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(count, 3);
    }

    #[test]
    fn test_execute_security_strips_control_chars() {
        let mut link = memory_link();
        link.options_mut().execute_security = true;
        link.execute("CREATE TABLE s (v TEXT);\0").unwrap();
        assert_eq!(link.scalar("SELECT count(*) FROM s").unwrap(), "0");
    }
}
