/// In-memory SQLite backend
///
/// The database lives only as long as its session, so the connection opens
/// itself on first use and stays open until `close`; closing discards every
/// table.
use crate::backends::sqlite::values_block;
use crate::core::db::engine::sqlite::{self as engine, SqliteTarget};
use crate::core::db::link::Link;
use crate::core::db::{
    BackendKind, ColumnInfo, Connection, ConnectionOptions, ConnectionState, RowVisitor,
    RowWindow, ScanOutcome,
};
use crate::core::Result;

pub struct MemoryConnection {
    link: Link,
}

impl MemoryConnection {
    pub fn new(options: ConnectionOptions) -> Self {
        engine::ensure_driver_registered();
        let link = Link::new(
            "memory",
            options,
            Box::new(|options: &ConnectionOptions| {
                engine::spawn("memory", SqliteTarget::Memory, options.clone())
            }),
        )
        .persistent();
        MemoryConnection { link }
    }
}

impl Default for MemoryConnection {
    fn default() -> Self {
        MemoryConnection::new(ConnectionOptions::default())
    }
}

impl Connection for MemoryConnection {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
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
    use crate::core::DbError;

    #[test]
    fn test_opens_on_first_use_and_keeps_data() {
        let mut conn = MemoryConnection::default();
        conn.execute("CREATE TABLE t (x)").unwrap();
        assert_eq!(conn.state(), ConnectionState::Idle);
        conn.execute("INSERT INTO t VALUES ('kept')").unwrap();
        assert_eq!(conn.execute_scalar("SELECT x FROM t").unwrap(), "kept");
    }

    #[test]
    fn test_close_discards_database() {
        let mut conn = MemoryConnection::default();
        conn.execute("CREATE TABLE t (x)").unwrap();
        conn.close().unwrap();
        assert!(matches!(
            conn.execute_scalar("SELECT count(*) FROM t"),
            Err(DbError::Sqlite(_))
        ));
    }

    #[test]
    fn test_create_and_drop_are_no_ops() {
        let mut conn = MemoryConnection::default();
        conn.create_database(Some("anything")).unwrap();
        conn.drop_database(None).unwrap();
        assert_eq!(conn.state(), ConnectionState::Unopened);
    }

    #[test]
    fn test_stored_procedures_unsupported() {
        let mut conn = MemoryConnection::default();
        match conn.query_stored_proc("p", "t", "cur") {
            Err(DbError::NotSupported(msg)) => assert_eq!(msg, "memory.query_stored_proc"),
            other => panic!("Expected NotSupported, got {:?}", other.map(|t| t.len())),
        }
    }
}
