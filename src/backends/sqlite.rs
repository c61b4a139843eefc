/// SQLite file backend
use crate::backends::insert_prefix;
use crate::core::db::engine::sqlite::{self as engine, SqliteTarget};
use crate::core::db::link::Link;
use crate::core::db::{
    BackendKind, ColumnInfo, Connection, ConnectionOptions, ConnectionState, RowVisitor,
    RowWindow, ScanOutcome,
};
use crate::core::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// A database kept in one SQLite file.
pub struct SqliteConnection {
    path: PathBuf,
    link: Link,
}

impl SqliteConnection {
    pub fn new(path: impl Into<PathBuf>, options: ConnectionOptions) -> Self {
        engine::ensure_driver_registered();
        let path = path.into();
        let target = SqliteTarget::File(path.clone());
        let link = Link::new(
            "sqlite",
            options,
            Box::new(move |options: &ConnectionOptions| engine::spawn("sqlite", target.clone(), options.clone())),
        );
        SqliteConnection { path, link }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// One multi-row `insert ... values (..),(..)` statement.
pub fn values_block(table: &str, rows: &[String], columns: Option<&str>) -> String {
    let mut block = insert_prefix(table, columns);
    block.push_str(&rows.join(",\n"));
    block
}

/// Creates an empty database file at `path` unless one exists.
pub(crate) fn create_file(path: &Path) -> Result<()> {
    if path.exists() {
        info!("Database file {} already exists", path.display());
        return Ok(());
    }
    let conn = engine::connect(&SqliteTarget::File(path.to_path_buf()), &ConnectionOptions::default())?;
    // Forces SQLite to write the header so the file is a valid empty database.
    conn.execute_batch("PRAGMA user_version = 0; VACUUM;")?;
    info!("Created database file {}", path.display());
    Ok(())
}

impl Connection for SqliteConnection {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
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

    fn create_database(&mut self, name: Option<&str>) -> Result<()> {
        let path = name.map(PathBuf::from).unwrap_or_else(|| self.path.clone());
        create_file(&path)
    }

    /// Deletes the database file. Dropping this connection's own file
    /// closes the connection first.
    fn drop_database(&mut self, name: Option<&str>) -> Result<()> {
        let path = name.map(PathBuf::from).unwrap_or_else(|| self.path.clone());
        if path == self.path {
            self.link.close()?;
        }
        fs::remove_file(&path)?;
        info!("Deleted database file {}", path.display());
        Ok(())
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
        self.link.execute(&values_block(table, rows, columns))
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
