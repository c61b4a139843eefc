/// Access backend (.mdb/.accdb through ODBC)
///
/// Each call without an explicit `open` gets its own short-lived session.
/// The engine has no multi-row `values` syntax, so `insert_block` runs one
/// insert per row inside a single transaction.
use crate::backends::insert_prefix;
use crate::config::BackendConfig;
use crate::core::db::engine::odbc as engine;
use crate::core::db::link::Link;
use crate::core::db::{
    BackendKind, ColumnInfo, Connection, ConnectionOptions, ConnectionState, RowVisitor,
    RowWindow, ScanOutcome,
};
use crate::core::{DbError, Result};
use std::path::{Path, PathBuf};

pub const DEFAULT_DRIVER: &str = "Microsoft Access Driver (*.mdb, *.accdb)";

pub struct AccessConnection {
    path: PathBuf,
    link: Link,
}

impl AccessConnection {
    pub fn new(path: impl Into<PathBuf>, driver: Option<&str>, options: ConnectionOptions) -> Result<Self> {
        engine::ensure_driver_registered()?;
        let path = path.into();
        let connection_string = connection_string(driver.unwrap_or(DEFAULT_DRIVER), &path);
        let link = Link::new(
            "access",
            options,
            Box::new(move |options: &ConnectionOptions| {
                engine::spawn(
                    "access",
                    connection_string.clone(),
                    connection_string.clone(),
                    options.clone(),
                )
            }),
        );
        Ok(AccessConnection { path, link })
    }

    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        let path = config
            .path
            .clone()
            .ok_or_else(|| DbError::Config("access backend requires 'path'".to_string()))?;
        Self::new(path, config.driver.as_deref(), config.options())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn connection_string(driver: &str, path: &Path) -> String {
    format!("Driver={{{}}};Dbq={};", driver, path.display())
}

/// One `insert` statement per row, run together in one transaction.
fn row_inserts(table: &str, rows: &[String], columns: Option<&str>) -> Vec<String> {
    let prefix = insert_prefix(table, columns);
    rows.iter().map(|row| format!("{}{}", prefix, row)).collect()
}

impl Connection for AccessConnection {
    fn kind(&self) -> BackendKind {
        BackendKind::Access
    }

    fn options(&self) -> &ConnectionOptions {
        self.link.options()
    }

    fn options_mut(&mut self) -> &mut ConnectionOptions {
        self.link.options_mut()
    }

    fn state(&self) -> ConnectionState {
        self.link.state()
    }

    fn open(&mut self) -> Result<()> {
        self.link.open()
    }

    fn close(&mut self) -> Result<()> {
        self.link.close()
    }

    fn create_database(&mut self, _name: Option<&str>) -> Result<()> {
        Err(DbError::not_supported("access", "create_database"))
    }

    fn drop_database(&mut self, _name: Option<&str>) -> Result<()> {
        Err(DbError::not_supported("access", "drop_database"))
    }

    fn execute(&mut self, sql: &str) -> Result<()> {
        self.link.execute(sql)
    }

    fn execute_scalar(&mut self, sql: &str) -> Result<String> {
        self.link.scalar(sql)
    }

    fn insert_block(&mut self, table: &str, rows: &[String], columns: Option<&str>) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        self.link.batch(row_inserts(table, rows, columns))
    }

    fn scan(
        &mut self,
        sql: &str,
        window: Option<RowWindow>,
        visit: &mut RowVisitor<'_>,
    ) -> Result<ScanOutcome> {
        self.link.scan(sql, window, visit)
    }

    fn column_names(&mut self, sql: &str) -> Result<Vec<String>> {
        Ok(self.link.describe(sql)?.into_iter().map(|c| c.name).collect())
    }

    fn column_names_and_types(&mut self, sql: &str) -> Result<Vec<ColumnInfo>> {
        self.link.describe(sql)
    }
}
