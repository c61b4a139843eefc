/// Transfer Orchestrator
///
/// Moves rows from a source connection's query to a destination connection,
/// rendering each source row through an insert `Command`. One algorithm
/// covers every variant; a transfer is described by three independent
/// choices:
///
/// - whole result or a [`RowWindow`] of a chunked read
/// - [`FailurePolicy`]: abort, collect a log, or report through callbacks
/// - [`WriteMode`]: one statement per row, or one `insert_block` per call
///
/// The destination is expected to be open and is never closed here. Nothing
/// is rolled back: rows written before a failure stay written.
use crate::core::db::command::Command;
use crate::core::db::connection::{Connection, RowWindow};
use crate::core::db::table::ColumnInfo;
use crate::core::{DbError, Result};
use tracing::{debug, error, info};

/// What happens when the destination rejects a write.
pub enum FailurePolicy<'a> {
    /// Propagate the first destination error
    Abort,
    /// Record `statement\nmessage\n` in the outcome log and continue
    CollectLog,
    /// Report progress after every success and failures as they happen
    Callbacks {
        progress: Box<dyn FnMut(u64) + 'a>,
        error: Box<dyn FnMut(&str) + 'a>,
    },
}

/// How rendered rows reach the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteMode {
    /// Execute each rendered statement
    PerRow,
    /// Collect rendered value tuples and issue one `insert_block`
    Batched {
        table: String,
        /// Column list such as `(id,val)`; derived from the source when absent
        columns: Option<String>,
    },
}

/// Result of one transfer call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferOutcome {
    /// Rows written to the destination by this call
    pub transferred: u64,
    /// Rows (or, batched, rows of the batch) the destination rejected
    pub failed: u64,
    /// Chunked transfers: whether this call read any source row
    pub has_more_data: bool,
    /// Failure log collected under `FailurePolicy::CollectLog`
    pub log: String,
}

/// A configured transfer, built up and then run once.
pub struct Transfer<'a> {
    query: String,
    window: Option<RowWindow>,
    policy: FailurePolicy<'a>,
    mode: WriteMode,
}

impl<'a> Transfer<'a> {
    /// Whole-result, per-row, fail-fast transfer of `query`.
    pub fn new(query: impl Into<String>) -> Self {
        Transfer {
            query: query.into(),
            window: None,
            policy: FailurePolicy::Abort,
            mode: WriteMode::PerRow,
        }
    }

    /// Restricts this call to one window of a chunked read.
    pub fn window(mut self, start_row: u64, end_row: u64) -> Self {
        self.window = Some(RowWindow::new(start_row, end_row));
        self
    }

    pub fn in_window(mut self, window: Option<RowWindow>) -> Self {
        self.window = window;
        self
    }

    pub fn collect_log(mut self) -> Self {
        self.policy = FailurePolicy::CollectLog;
        self
    }

    pub fn with_events(
        mut self,
        progress: impl FnMut(u64) + 'a,
        error: impl FnMut(&str) + 'a,
    ) -> Self {
        self.policy = FailurePolicy::Callbacks {
            progress: Box::new(progress),
            error: Box::new(error),
        };
        self
    }

    pub fn policy(mut self, policy: FailurePolicy<'a>) -> Self {
        self.policy = policy;
        self
    }

    /// Writes each call's rows with a single `insert_block` into `table`.
    pub fn batched(mut self, table: impl Into<String>, columns: Option<&str>) -> Self {
        self.mode = WriteMode::Batched {
            table: table.into(),
            columns: columns.map(str::to_string),
        };
        self
    }

    /// Runs the transfer.
    ///
    /// Source column names are lower-cased and bound into `insert`; values
    /// are sanitized when the source has `execute_security` set.
    ///
    /// # Errors
    ///
    /// Source failures always propagate. Destination failures propagate
    /// under `FailurePolicy::Abort`, and for every policy when they are not
    /// native database errors.
    pub fn run<S, D>(
        self,
        source: &mut S,
        insert: &mut Command,
        destination: &mut D,
    ) -> Result<TransferOutcome>
    where
        S: Connection + ?Sized,
        D: Connection + ?Sized,
    {
        let Transfer {
            query,
            window,
            mut policy,
            mode,
        } = self;
        let sanitize = source.options().execute_security;
        let batched = matches!(mode, WriteMode::Batched { .. });
        let mut transferred = 0u64;
        let mut failed = 0u64;
        let mut log = String::new();
        let mut pending: Vec<String> = Vec::new();

        debug!(
            "Transfer from {} to {}: {} (window {:?})",
            source.kind(),
            destination.kind(),
            query,
            window
        );

        if let FailurePolicy::Callbacks { progress, .. } = &mut policy {
            progress(0);
        }

        let scanned = source.scan(&query, window, &mut |columns, row| {
            for (column, value) in columns.iter().zip(&row) {
                insert.set_value(&column.name.to_lowercase(), value, sanitize);
            }
            let statement = insert.updated_text();
            if batched {
                pending.push(statement);
                return Ok(());
            }
            match destination.execute(&statement) {
                Ok(()) => {
                    transferred += 1;
                    if let FailurePolicy::Callbacks { progress, .. } = &mut policy {
                        progress(transferred);
                    }
                    Ok(())
                }
                Err(e) => {
                    if !tolerates(&policy, &e) {
                        return Err(e);
                    }
                    failed += 1;
                    record_failure(&mut policy, &mut log, Some(&statement), &e);
                    Ok(())
                }
            }
        });

        let scanned = match scanned {
            Ok(scanned) => scanned,
            Err(e) => {
                error!("Transfer aborted after {} rows: {}", transferred, e);
                return Err(e);
            }
        };

        if let WriteMode::Batched { table, columns } = &mode {
            if !pending.is_empty() {
                let column_list = match columns {
                    Some(columns) => columns.clone(),
                    None => column_list(&scanned.columns),
                };
                match destination.insert_block(table, &pending, Some(&column_list)) {
                    Ok(()) => {
                        transferred = pending.len() as u64;
                        if let FailurePolicy::Callbacks { progress, .. } = &mut policy {
                            progress(transferred);
                        }
                    }
                    Err(e) => {
                        if !tolerates(&policy, &e) {
                            error!("Batched transfer into {} failed: {}", table, e);
                            return Err(e);
                        }
                        failed = pending.len() as u64;
                        record_failure(&mut policy, &mut log, None, &e);
                    }
                }
            }
        }

        info!(
            "Transfer finished: {} rows transferred, {} failed{}",
            transferred,
            failed,
            if scanned.has_more_data { ", more data pending" } else { "" }
        );

        Ok(TransferOutcome {
            transferred,
            failed,
            has_more_data: scanned.has_more_data,
            log,
        })
    }
}

fn tolerates(policy: &FailurePolicy<'_>, error: &DbError) -> bool {
    !matches!(policy, FailurePolicy::Abort) && error.is_database_error()
}

fn record_failure(
    policy: &mut FailurePolicy<'_>,
    log: &mut String,
    statement: Option<&str>,
    failure: &DbError,
) {
    match policy {
        FailurePolicy::Abort => {}
        FailurePolicy::CollectLog => {
            if let Some(statement) = statement {
                log.push_str(statement);
                log.push('\n');
            }
            log.push_str(&failure.to_string());
            log.push('\n');
        }
        FailurePolicy::Callbacks { error, .. } => match statement {
            Some(statement) => error(&format!("{}\n{}", statement, failure)),
            None => error(&failure.to_string()),
        },
    }
}

/// `(a,b,c)` from the source result columns.
pub fn column_list(columns: &[ColumnInfo]) -> String {
    let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
    format!("({})", names.join(","))
}

/// Named entry points for the transfer variants callers use.
pub trait TransferExt: Connection {
    /// Whole result, fail-fast. Returns the number of rows transferred.
    fn transfer<D: Connection + ?Sized>(
        &mut self,
        query: &str,
        insert: &mut Command,
        destination: &mut D,
    ) -> Result<u64> {
        Ok(Transfer::new(query).run(self, insert, destination)?.transferred)
    }

    /// Whole result, continuing past destination failures.
    fn transfer_with_log<D: Connection + ?Sized>(
        &mut self,
        query: &str,
        insert: &mut Command,
        destination: &mut D,
    ) -> Result<(u64, String)> {
        let outcome = Transfer::new(query)
            .collect_log()
            .run(self, insert, destination)?;
        Ok((outcome.transferred, outcome.log))
    }

    /// One window of a chunked transfer, fail-fast.
    fn transfer_block<D: Connection + ?Sized>(
        &mut self,
        query: &str,
        insert: &mut Command,
        destination: &mut D,
        start_row: u64,
        end_row: u64,
    ) -> Result<(u64, bool)> {
        let outcome = Transfer::new(query)
            .window(start_row, end_row)
            .run(self, insert, destination)?;
        Ok((outcome.transferred, outcome.has_more_data))
    }

    /// One window of a chunked transfer, appending failures to `log`.
    fn transfer_block_with_log<D: Connection + ?Sized>(
        &mut self,
        query: &str,
        insert: &mut Command,
        destination: &mut D,
        log: &mut String,
        start_row: u64,
        end_row: u64,
    ) -> Result<(u64, bool)> {
        let outcome = Transfer::new(query)
            .window(start_row, end_row)
            .collect_log()
            .run(self, insert, destination)?;
        log.push_str(&outcome.log);
        Ok((outcome.transferred, outcome.has_more_data))
    }

    /// One window of a chunked transfer written with a single `insert_block`.
    #[allow(clippy::too_many_arguments)]
    fn transfer_insert_block<D: Connection + ?Sized>(
        &mut self,
        query: &str,
        table: &str,
        columns: Option<&str>,
        insert: &mut Command,
        destination: &mut D,
        start_row: u64,
        end_row: u64,
    ) -> Result<(u64, bool)> {
        let outcome = Transfer::new(query)
            .window(start_row, end_row)
            .batched(table, columns)
            .run(self, insert, destination)?;
        Ok((outcome.transferred, outcome.has_more_data))
    }

    /// Batched window whose `insert_block` failure is appended to `log`.
    #[allow(clippy::too_many_arguments)]
    fn transfer_insert_block_with_log<D: Connection + ?Sized>(
        &mut self,
        query: &str,
        table: &str,
        columns: Option<&str>,
        insert: &mut Command,
        destination: &mut D,
        log: &mut String,
        start_row: u64,
        end_row: u64,
    ) -> Result<(u64, bool)> {
        let outcome = Transfer::new(query)
            .window(start_row, end_row)
            .batched(table, columns)
            .collect_log()
            .run(self, insert, destination)?;
        log.push_str(&outcome.log);
        Ok((outcome.transferred, outcome.has_more_data))
    }

    /// Whole result, reporting progress and failures through callbacks.
    fn transfer_with_events<D: Connection + ?Sized>(
        &mut self,
        query: &str,
        insert: &mut Command,
        destination: &mut D,
        progress: &mut dyn FnMut(u64),
        error: &mut dyn FnMut(&str),
    ) -> Result<u64> {
        let outcome = Transfer::new(query)
            .with_events(|count| progress(count), |message| error(message))
            .run(self, insert, destination)?;
        Ok(outcome.transferred)
    }
}

impl<C: Connection + ?Sized> TransferExt for C {}
