/// # Test Utilities Module
///
/// Shared testing infrastructure for dbbridge unit and integration tests.
///
/// This module provides:
/// - In-memory database fixtures with sample schemas
/// - A recording `Connection` wrapper that counts native calls
/// - Builders for xbase (.dbf) files
/// - Error assertion helpers
use crate::backends::MemoryConnection;
use crate::core::db::{
    BackendKind, ColumnInfo, Connection, ConnectionOptions, ConnectionState, RowVisitor,
    RowWindow, ScanOutcome,
};
use crate::core::Result;
use std::fs;
use std::path::Path;

/// Isolated in-memory database fixture.
pub struct DatabaseFixture {
    pub name: String,
    pub connection: MemoryConnection,
}

impl DatabaseFixture {
    /// Creates an empty, already open in-memory database.
    pub fn new(name: &str) -> Result<Self> {
        let mut connection = MemoryConnection::new(ConnectionOptions::default());
        connection.open()?;
        Ok(DatabaseFixture {
            name: name.to_string(),
            connection,
        })
    }

    /// Fixture with `t(id, val)` holding `(1,'a'), (2,'b'), (3,'c')`.
    pub fn with_sample_data(name: &str) -> Result<Self> {
        let mut fixture = Self::new(name)?;
        fixture.connection.execute(
            "CREATE TABLE t (id INTEGER PRIMARY KEY, val TEXT);
             INSERT INTO t VALUES (1, 'a'), (2, 'b'), (3, 'c');",
        )?;
        Ok(fixture)
    }

    /// Fixture with `numbers(id)` holding `1..=count`.
    pub fn with_numbers(name: &str, count: u64) -> Result<Self> {
        let mut fixture = Self::new(name)?;
        fixture.connection.execute(
            "CREATE TABLE numbers (id INTEGER PRIMARY KEY, label TEXT)",
        )?;
        if count > 0 {
            let rows: Vec<String> = (1..=count).map(|i| format!("({}, 'n{}')", i, i)).collect();
            fixture.connection.insert_block("numbers", &rows, Some("(id, label)"))?;
        }
        Ok(fixture)
    }

    /// Runs `sql` and returns every row of the result.
    pub fn rows(&mut self, sql: &str) -> Result<Vec<Vec<String>>> {
        Ok(self.connection.query(sql, &self.name)?.into_rows())
    }
}

/// Connection wrapper recording every statement sent to the inner
/// connection. `insert_block` calls are recorded as a single entry.
pub struct RecordingConnection<C: Connection> {
    pub inner: C,
    pub statements: Vec<String>,
    pub block_calls: usize,
}

impl<C: Connection> RecordingConnection<C> {
    pub fn new(inner: C) -> Self {
        RecordingConnection {
            inner,
            statements: Vec::new(),
            block_calls: 0,
        }
    }

    /// Number of native statements issued through this wrapper.
    pub fn native_calls(&self) -> usize {
        self.statements.len()
    }
}

impl<C: Connection> Connection for RecordingConnection<C> {
    fn kind(&self) -> BackendKind {
        self.inner.kind()
    }

    fn options(&self) -> &ConnectionOptions {
        self.inner.options()
    }

    fn options_mut(&mut self) -> &mut ConnectionOptions {
        self.inner.options_mut()
    }

    fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    fn open(&mut self) -> Result<()> {
        self.inner.open()
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }

    fn create_database(&mut self, name: Option<&str>) -> Result<()> {
        self.inner.create_database(name)
    }

    fn drop_database(&mut self, name: Option<&str>) -> Result<()> {
        self.inner.drop_database(name)
    }

    fn execute(&mut self, sql: &str) -> Result<()> {
        self.statements.push(sql.to_string());
        self.inner.execute(sql)
    }

    fn execute_scalar(&mut self, sql: &str) -> Result<String> {
        self.statements.push(sql.to_string());
        self.inner.execute_scalar(sql)
    }

    fn insert_block(&mut self, table: &str, rows: &[String], columns: Option<&str>) -> Result<()> {
        self.block_calls += 1;
        self.statements.push(format!("insert_block {} ({} rows)", table, rows.len()));
        self.inner.insert_block(table, rows, columns)
    }

    fn scan(
        &mut self,
        sql: &str,
        window: Option<RowWindow>,
        visit: &mut RowVisitor<'_>,
    ) -> Result<ScanOutcome> {
        self.statements.push(sql.to_string());
        self.inner.scan(sql, window, visit)
    }

    fn column_names(&mut self, sql: &str) -> Result<Vec<String>> {
        self.inner.column_names(sql)
    }

    fn column_names_and_types(&mut self, sql: &str) -> Result<Vec<ColumnInfo>> {
        self.inner.column_names_and_types(sql)
    }
}

/// Builds a dBase III file image.
///
/// `fields` are `(name, type, length)`; `records` are `(deleted, values)`.
/// Text is written as latin-1 and padded with spaces.
pub fn dbf_bytes(fields: &[(&str, char, u8)], records: &[(bool, Vec<&str>)]) -> Vec<u8> {
    let header_len = 32 + fields.len() * 32 + 1;
    let record_len = 1 + fields.iter().map(|f| f.2 as usize).sum::<usize>();

    let mut bytes = vec![0u8; 32];
    bytes[0] = 0x03;
    bytes[1] = 124;
    bytes[2] = 1;
    bytes[3] = 1;
    bytes[4..8].copy_from_slice(&(records.len() as u32).to_le_bytes());
    bytes[8..10].copy_from_slice(&(header_len as u16).to_le_bytes());
    bytes[10..12].copy_from_slice(&(record_len as u16).to_le_bytes());

    for (name, kind, length) in fields {
        let mut descriptor = [0u8; 32];
        for (i, b) in name.bytes().take(10).enumerate() {
            descriptor[i] = b;
        }
        descriptor[11] = *kind as u8;
        descriptor[16] = *length;
        bytes.extend_from_slice(&descriptor);
    }
    bytes.push(0x0D);

    for (deleted, values) in records {
        bytes.push(if *deleted { b'*' } else { b' ' });
        for ((_, _, length), value) in fields.iter().zip(values) {
            let mut cell: Vec<u8> = value.chars().map(|c| c as u32 as u8).collect();
            cell.resize(*length as usize, b' ');
            bytes.extend_from_slice(&cell);
        }
    }
    bytes.push(0x1A);
    bytes
}

/// Writes a dBase III file built by [`dbf_bytes`] to `path`.
pub fn write_dbf(path: &Path, fields: &[(&str, char, u8)], records: &[(bool, Vec<&str>)]) {
    fs::write(path, dbf_bytes(fields, records)).expect("Failed to write dbf fixture");
}

/// Error testing utilities specific to DbError patterns
pub mod error_testing {
    use std::fmt::Display;

    /// Asserts that `result` failed with a message containing `fragment`.
    pub fn assert_error_message<T, E: Display>(
        result: &std::result::Result<T, E>,
        fragment: &str,
        context: &str,
    ) {
        match result {
            Ok(_) => panic!("Expected error but got Ok in {}", context),
            Err(e) => {
                let message = e.to_string();
                assert!(
                    message.to_lowercase().contains(&fragment.to_lowercase()),
                    "Expected '{}' in error message '{}' context: {}",
                    fragment,
                    message,
                    context
                );
            }
        }
    }
}

/// Asserts that an expression failed with the given `DbError` variant.
#[macro_export]
macro_rules! assert_db_error {
    ($result:expr, $variant:ident, $context:expr) => {
        match $result {
            Err($crate::core::DbError::$variant(..)) => {}
            Ok(_) => panic!("Expected {} error but got Ok in {}", stringify!($variant), $context),
            Err(other) => panic!(
                "Expected {} but got {:?} in {}",
                stringify!($variant),
                other,
                $context
            ),
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_data_fixture() {
        let mut fixture = DatabaseFixture::with_sample_data("sample").unwrap();
        let rows = fixture.rows("SELECT id, val FROM t ORDER BY id").unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2], vec!["3".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_numbers_fixture() {
        let mut fixture = DatabaseFixture::with_numbers("numbers", 25).unwrap();
        assert_eq!(
            fixture.connection.execute_scalar("SELECT count(*) FROM numbers").unwrap(),
            "25"
        );
    }

    #[test]
    fn test_recording_connection_counts_calls() {
        let fixture = DatabaseFixture::new("rec").unwrap();
        let mut conn = RecordingConnection::new(fixture.connection);
        conn.execute("CREATE TABLE r (x)").unwrap();
        conn.insert_block("r", &["(1)".to_string(), "(2)".to_string()], None).unwrap();
        assert_eq!(conn.native_calls(), 2);
        assert_eq!(conn.block_calls, 1);
        assert_eq!(conn.execute_scalar("SELECT count(*) FROM r").unwrap(), "2");
    }

    #[test]
    fn test_dbf_builder_layout() {
        let bytes = dbf_bytes(&[("A", 'C', 2)], &[(false, vec!["x"])]);
        assert_eq!(bytes.len(), 32 + 32 + 1 + 3 + 1);
        assert_eq!(&bytes[66..68], b"x ");
    }

    #[test]
    fn test_error_macro() {
        let result: Result<()> = Err(crate::core::DbError::State("closed".to_string()));
        assert_db_error!(result, State, "macro self-test");
    }
}
