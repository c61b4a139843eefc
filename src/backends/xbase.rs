/// xbase backend
///
/// Legacy .dbf files are not queried in place: `create_database(name)`
/// converts every configured file into a table of a new SQLite database at
/// `name`, and all later calls run against that database.
use crate::backends::dbf::{read_dbf, DbfTable};
use crate::backends::sqlite::{create_file, values_block};
use crate::core::db::engine::sqlite::{self as engine, SqliteTarget};
use crate::core::db::link::{Link, Opener};
use crate::core::db::{
    BackendKind, ColumnInfo, Connection, ConnectionOptions, ConnectionState, RowVisitor,
    RowWindow, ScanOutcome,
};
use crate::core::{DbError, Result};
use rusqlite::params_from_iter;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub struct XbaseConnection {
    files: Vec<PathBuf>,
    database: Option<PathBuf>,
    link: Link,
}

impl XbaseConnection {
    /// `database` names an already converted database, if there is one.
    pub fn new(files: Vec<PathBuf>, database: Option<PathBuf>, options: ConnectionOptions) -> Self {
        engine::ensure_driver_registered();
        let link = Link::new("xbase", options, opener_for(database.clone()));
        XbaseConnection {
            files,
            database,
            link,
        }
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// The converted database, once there is one.
    pub fn database(&self) -> Option<&Path> {
        self.database.as_deref()
    }
}

fn opener_for(database: Option<PathBuf>) -> Opener {
    match database {
        Some(path) => Box::new(move |options: &ConnectionOptions| {
            engine::spawn("xbase", SqliteTarget::File(path.clone()), options.clone())
        }),
        None => Box::new(|_: &ConnectionOptions| {
            Err(DbError::State(
                "xbase files have not been converted; call create_database first".to_string(),
            ))
        }),
    }
}

/// Lower-cased file stem, used as the table name.
fn table_name(file: &Path) -> Result<String> {
    file.file_stem()
        .and_then(|stem| stem.to_str())
        .map(|stem| stem.to_lowercase())
        .ok_or_else(|| DbError::Xbase(format!("cannot derive a table name from {}", file.display())))
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Loads one decoded .dbf table into `conn` as an all-text table.
fn load_table(conn: &rusqlite::Connection, table: &str, dbf: &DbfTable) -> Result<()> {
    let columns: Vec<String> = dbf
        .fields
        .iter()
        .map(|f| format!("{} text", quote_identifier(&f.name.to_lowercase())))
        .collect();
    conn.execute_batch(&format!(
        "create table {} ({});",
        quote_identifier(table),
        columns.join(", ")
    ))?;

    let placeholders = vec!["?"; dbf.fields.len()].join(", ");
    let tx = conn.unchecked_transaction()?;
    {
        let mut insert = tx.prepare(&format!(
            "insert into {} values ({})",
            quote_identifier(table),
            placeholders
        ))?;
        for record in &dbf.records {
            insert.execute(params_from_iter(record.iter()))?;
        }
    }
    tx.commit()?;
    Ok(())
}

impl Connection for XbaseConnection {
    fn kind(&self) -> BackendKind {
        BackendKind::Xbase
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

    /// Converts every source file into a table of a new database at `name`.
    /// Without a name this is a no-op.
    fn create_database(&mut self, name: Option<&str>) -> Result<()> {
        let name = match name {
            Some(name) => PathBuf::from(name),
            None => return Ok(()),
        };
        create_file(&name)?;
        let conn = engine::connect(&SqliteTarget::File(name.clone()), self.link.options())?;
        for file in &self.files {
            let table = table_name(file)?;
            let dbf = read_dbf(file)?;
            debug!(
                "Converting {} into table {} ({} records)",
                file.display(),
                table,
                dbf.records.len()
            );
            load_table(&conn, &table, &dbf)?;
        }
        drop(conn);
        info!(
            "Converted {} xbase files into {}",
            self.files.len(),
            name.display()
        );
        self.link.set_opener(opener_for(Some(name.clone())))?;
        self.database = Some(name);
        Ok(())
    }

    fn drop_database(&mut self, _name: Option<&str>) -> Result<()> {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::write_dbf;
    use tempfile::TempDir;

    #[test]
    fn test_table_name_from_file() {
        assert_eq!(table_name(Path::new("/data/CLIENTS.DBF")).unwrap(), "clients");
        assert_eq!(table_name(Path::new("orders.dbf")).unwrap(), "orders");
    }

    #[test]
    fn test_use_before_conversion_is_a_state_error() {
        let mut conn = XbaseConnection::new(vec![], None, ConnectionOptions::default());
        assert!(matches!(conn.open(), Err(DbError::State(_))));
        assert!(matches!(conn.execute_scalar("select 1"), Err(DbError::State(_))));
    }

    #[test]
    fn test_create_database_converts_files() {
        let dir = TempDir::new().unwrap();
        let clients = dir.path().join("CLIENTS.DBF");
        write_dbf(
            &clients,
            &[("CODE", 'C', 4), ("NAME", 'C', 10)],
            &[
                (false, vec!["1", "Ada"]),
                (true, vec!["2", "Gone"]),
                (false, vec!["3", "O'Brien"]),
            ],
        );

        let mut conn = XbaseConnection::new(vec![clients], None, ConnectionOptions::default());
        conn.create_database(None).unwrap();
        assert!(conn.database().is_none());

        let target = dir.path().join("legacy.db");
        conn.create_database(Some(target.to_str().unwrap())).unwrap();
        assert_eq!(conn.database(), Some(target.as_path()));

        let columns = conn.column_names_and_types("select * from clients").unwrap();
        assert_eq!(
            columns,
            vec![ColumnInfo::new("code", "text"), ColumnInfo::new("name", "text")]
        );
        let table = conn.query("select * from clients order by code", "clients").unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.value(1, "name"), Some("O'Brien"));
        conn.drop_database(None).unwrap();
        assert!(target.exists());
    }
}
