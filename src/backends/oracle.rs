/// Oracle backend (through ODBC)
///
/// The only backend with stored-procedure cursors. The driver is asked to
/// return `REF CURSOR` output parameters as result sets (`RST=T`), so a
/// procedure call is read like any other query.
use crate::config::BackendConfig;
use crate::core::db::engine::odbc as engine;
use crate::core::db::link::Link;
use crate::core::db::{
    BackendKind, ColumnInfo, Connection, ConnectionOptions, ConnectionState, DataTable,
    RowVisitor, RowWindow, ScanOutcome,
};
use crate::core::{DbError, Result};
use tracing::debug;

pub const DEFAULT_DRIVER: &str = "Oracle ODBC Driver";
pub const DEFAULT_PORT: u16 = 1521;

/// Where and as whom to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleTarget {
    pub driver: String,
    pub host: String,
    pub port: u16,
    pub service: String,
    pub user: String,
    pub password: String,
}

impl OracleTarget {
    pub fn connection_string(&self) -> String {
        format!(
            "Driver={{{}}};Dbq=//{}:{}/{};Uid={};Pwd={};RST=T;",
            self.driver, self.host, self.port, self.service, self.user, self.password
        )
    }

    /// Connection string with the password masked, for logs.
    pub fn redacted(&self) -> String {
        format!(
            "Driver={{{}}};Dbq=//{}:{}/{};Uid={};Pwd=***;RST=T;",
            self.driver, self.host, self.port, self.service, self.user
        )
    }
}

pub struct OracleConnection {
    target: OracleTarget,
    link: Link,
}

impl OracleConnection {
    pub fn new(target: OracleTarget, options: ConnectionOptions) -> Result<Self> {
        engine::ensure_driver_registered()?;
        let connection_string = target.connection_string();
        let redacted = target.redacted();
        let link = Link::new(
            "oracle",
            options,
            Box::new(move |options: &ConnectionOptions| {
                engine::spawn(
                    "oracle",
                    connection_string.clone(),
                    redacted.clone(),
                    options.clone(),
                )
            }),
        );
        Ok(OracleConnection { target, link })
    }

    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        let required = |value: &Option<String>, field: &str| {
            value
                .clone()
                .ok_or_else(|| DbError::Config(format!("oracle backend requires '{}'", field)))
        };
        let target = OracleTarget {
            driver: config
                .driver
                .clone()
                .unwrap_or_else(|| DEFAULT_DRIVER.to_string()),
            host: required(&config.host, "host")?,
            port: config.port.unwrap_or(DEFAULT_PORT),
            service: required(&config.service, "service")?,
            user: required(&config.user, "user")?,
            password: config.password.clone().unwrap_or_default(),
        };
        Self::new(target, config.options())
    }

    pub fn target(&self) -> &OracleTarget {
        &self.target
    }
}

/// `insert all into t (cols) values (..) ... select * from dual`
fn insert_all(table: &str, rows: &[String], columns: Option<&str>) -> String {
    let into = match columns {
        Some(columns) if !columns.trim().is_empty() => format!(" into {} {} values ", table, columns.trim()),
        _ => format!(" into {} values ", table),
    };
    let mut statement = String::from("insert all\n");
    for row in rows {
        statement.push_str(&into);
        statement.push_str(row);
        statement.push('\n');
    }
    statement.push_str("select * from dual");
    statement
}

/// Wraps a procedure invocation in the ODBC call escape unless it already is one.
fn call_escape(sql: &str) -> String {
    let trimmed = sql.trim();
    if trimmed.starts_with('{') {
        trimmed.to_string()
    } else {
        format!("{{CALL {}}}", trimmed)
    }
}

impl Connection for OracleConnection {
    fn kind(&self) -> BackendKind {
        BackendKind::Oracle
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
        Err(DbError::not_supported("oracle", "create_database"))
    }

    fn drop_database(&mut self, _name: Option<&str>) -> Result<()> {
        Err(DbError::not_supported("oracle", "drop_database"))
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
        self.link.execute(&insert_all(table, rows, columns))
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

    /// Calls a procedure whose `out_param` is a `REF CURSOR` and reads the
    /// cursor it returns.
    ///
    /// With `RST=T` in the connection string the driver surfaces the
    /// cursor as the statement's result set, so no parameter is bound and
    /// `out_param` is only logged.
    fn query_stored_proc(&mut self, sql: &str, table: &str, out_param: &str) -> Result<DataTable> {
        let call = call_escape(sql);
        debug!("oracle.query_stored_proc: {} (cursor parameter {})", call, out_param);
        self.query(&call, table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> OracleTarget {
        OracleTarget {
            driver: DEFAULT_DRIVER.to_string(),
            host: "db.local".to_string(),
            port: DEFAULT_PORT,
            service: "ORCL".to_string(),
            user: "scott".to_string(),
            password: "tiger".to_string(),
        }
    }

    #[test]
    fn test_connection_strings() {
        assert_eq!(
            target().connection_string(),
            "Driver={Oracle ODBC Driver};Dbq=//db.local:1521/ORCL;Uid=scott;Pwd=tiger;RST=T;"
        );
        assert!(!target().redacted().contains("tiger"));
    }

    #[test]
    fn test_insert_all() {
        let rows = vec!["(1,'a')".to_string(), "(2,'b')".to_string()];
        insta::assert_snapshot!(insert_all("t2", &rows, Some("(id,val)")), @r###"
        insert all
         into t2 (id,val) values (1,'a')
         into t2 (id,val) values (2,'b')
        select * from dual
        "###);
        assert_eq!(
            insert_all("t2", &rows[..1], None),
            "insert all\n into t2 values (1,'a')\nselect * from dual"
        );
    }

    #[test]
    fn test_call_escape() {
        assert_eq!(call_escape("pkg.list_orders(?)"), "{CALL pkg.list_orders(?)}");
        assert_eq!(call_escape(" {call p} "), "{call p}");
    }

    #[test]
    fn test_from_config_requires_host() {
        let config = BackendConfig::new(BackendKind::Oracle);
        assert!(matches!(
            OracleConnection::from_config(&config),
            Err(DbError::Config(_))
        ));
    }
}
