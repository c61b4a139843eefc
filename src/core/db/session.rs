/// Session Worker Module
///
/// Native cursors borrow the native connection that produced them, which
/// makes "keep a cursor open between calls" awkward to express as plain
/// struct fields. Each open connection therefore gets a dedicated worker
/// thread that owns the native handle and any open cursor, and serves
/// requests sent over a channel. Calls stay synchronous: every request
/// blocks until its reply arrives.
use crate::core::db::table::ColumnInfo;
use crate::core::{DbError, Result};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};
use uuid::Uuid;

/// Work sent to a session worker.
#[derive(Debug)]
pub enum Request {
    /// Run a non-query statement (or several, separated by `;`)
    Execute(String),
    /// Run statements inside one transaction
    Batch(Vec<String>),
    /// First column of the first row
    Scalar(String),
    /// Result column metadata without reading rows
    Describe(String),
    /// Start a cursor kept open until `CloseCursor`
    OpenCursor(String),
    /// Next row of the open cursor
    Fetch,
    /// Release the open cursor
    CloseCursor,
    /// Stop the worker
    Shutdown,
}

/// Answer from a session worker.
#[derive(Debug)]
pub enum Reply {
    /// Native connection established
    Ready,
    Done,
    Scalar(String),
    Columns(Vec<ColumnInfo>),
    /// `None` once the cursor is exhausted
    Row(Option<Vec<String>>),
    Failed(DbError),
}

/// Worker-side end of a session.
pub struct Worker {
    requests: Receiver<Request>,
    replies: Sender<Reply>,
    stopped: bool,
}

impl Worker {
    /// Blocks for the next request. Returns `None` once the session is
    /// shutting down; every later call returns `None` too.
    pub fn next(&mut self) -> Option<Request> {
        if self.stopped {
            return None;
        }
        match self.requests.recv() {
            Ok(Request::Shutdown) | Err(_) => {
                self.stopped = true;
                None
            }
            Ok(request) => Some(request),
        }
    }

    pub fn reply(&self, reply: Reply) {
        // The caller side only disappears while shutting down.
        let _ = self.replies.send(reply);
    }

    /// Replies `Done` or `Failed` depending on `result`.
    pub fn finish(&self, result: Result<()>) {
        match result {
            Ok(()) => self.reply(Reply::Done),
            Err(e) => self.reply(Reply::Failed(e)),
        }
    }
}

/// Caller-side handle to a worker owning one native connection.
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    label: String,
    requests: Sender<Request>,
    replies: Receiver<Reply>,
    handle: Option<JoinHandle<()>>,
}

impl Session {
    /// Spawns a worker, connects inside it and waits for the outcome.
    ///
    /// # Arguments
    ///
    /// * `label` - Name used for the thread and in log lines
    /// * `connect` - Creates the native connection on the worker thread
    /// * `serve` - Request loop run with the connection until shutdown
    ///
    /// # Errors
    ///
    /// Returns the error raised by `connect`, or `DbError::Driver` if the
    /// worker could not be started.
    pub fn spawn<C, F, S>(label: &str, connect: F, serve: S) -> Result<Session>
    where
        F: FnOnce() -> Result<C> + Send + 'static,
        S: FnOnce(C, &mut Worker) + Send + 'static,
    {
        let id = Uuid::new_v4();
        let (request_tx, request_rx) = mpsc::channel();
        let (reply_tx, reply_rx) = mpsc::channel();
        let mut worker = Worker {
            requests: request_rx,
            replies: reply_tx,
            stopped: false,
        };

        let handle = thread::Builder::new()
            .name(format!("dbbridge-{}", label))
            .spawn(move || match connect() {
                Ok(native) => {
                    worker.reply(Reply::Ready);
                    serve(native, &mut worker);
                }
                Err(e) => worker.reply(Reply::Failed(e)),
            })?;

        let mut session = Session {
            id,
            label: label.to_string(),
            requests: request_tx,
            replies: reply_rx,
            handle: Some(handle),
        };

        match session.replies.recv() {
            Ok(Reply::Ready) => {
                debug!("Session {} ({}) started", session.id, session.label);
                Ok(session)
            }
            Ok(Reply::Failed(e)) => {
                session.join();
                Err(e)
            }
            Ok(other) => {
                session.join();
                Err(DbError::Driver(format!("unexpected session reply: {:?}", other)))
            }
            Err(_) => {
                session.join();
                Err(DbError::Driver(format!(
                    "session worker '{}' stopped before connecting",
                    label
                )))
            }
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    fn call(&self, request: Request) -> Result<Reply> {
        self.requests
            .send(request)
            .map_err(|_| self.lost())?;
        match self.replies.recv() {
            Ok(Reply::Failed(e)) => Err(e),
            Ok(reply) => Ok(reply),
            Err(_) => Err(self.lost()),
        }
    }

    fn lost(&self) -> DbError {
        DbError::Driver(format!("session {} ({}) is no longer running", self.id, self.label))
    }

    fn unexpected(&self, reply: Reply) -> DbError {
        DbError::Driver(format!("unexpected session reply: {:?}", reply))
    }

    fn expect_done(&self, request: Request) -> Result<()> {
        match self.call(request)? {
            Reply::Done => Ok(()),
            other => Err(self.unexpected(other)),
        }
    }

    pub fn execute(&self, sql: &str) -> Result<()> {
        self.expect_done(Request::Execute(sql.to_string()))
    }

    /// Runs all statements in one transaction; any failure rolls back.
    pub fn batch(&self, statements: Vec<String>) -> Result<()> {
        self.expect_done(Request::Batch(statements))
    }

    pub fn scalar(&self, sql: &str) -> Result<String> {
        match self.call(Request::Scalar(sql.to_string()))? {
            Reply::Scalar(value) => Ok(value),
            other => Err(self.unexpected(other)),
        }
    }

    pub fn describe(&self, sql: &str) -> Result<Vec<ColumnInfo>> {
        match self.call(Request::Describe(sql.to_string()))? {
            Reply::Columns(columns) => Ok(columns),
            other => Err(self.unexpected(other)),
        }
    }

    /// Starts a cursor and returns its columns.
    pub fn open_cursor(&self, sql: &str) -> Result<Vec<ColumnInfo>> {
        match self.call(Request::OpenCursor(sql.to_string()))? {
            Reply::Columns(columns) => Ok(columns),
            other => Err(self.unexpected(other)),
        }
    }

    pub fn fetch(&self) -> Result<Option<Vec<String>>> {
        match self.call(Request::Fetch)? {
            Reply::Row(row) => Ok(row),
            other => Err(self.unexpected(other)),
        }
    }

    pub fn close_cursor(&self) -> Result<()> {
        self.expect_done(Request::CloseCursor)
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Session {} ({}) worker panicked", self.id, self.label);
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = self.requests.send(Request::Shutdown);
        self.join();
        debug!("Session {} ({}) stopped", self.id, self.label);
    }
}
