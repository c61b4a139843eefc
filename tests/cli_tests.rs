#[cfg(test)]
mod cli_tests {
    use assert_cmd::Command;
    use dbbridge::backends::SqliteConnection;
    use dbbridge::core::db::{Connection, ConnectionOptions};
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn seed(path: &Path, sql: &str) {
        let mut conn = SqliteConnection::new(path, ConnectionOptions::default());
        conn.create_database(None).unwrap();
        conn.execute(sql).unwrap();
    }

    fn write_config(dir: &TempDir, body: &str) -> std::path::PathBuf {
        let path = dir.path().join("dbbridge.toml");
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_query_prints_csv() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("source.db");
        seed(
            &db,
            "CREATE TABLE t (id INTEGER, val TEXT); INSERT INTO t VALUES (1, 'a'), (2, 'b, c');",
        );
        let config = write_config(
            &dir,
            &format!("[source]\nkind = \"sqlite\"\npath = {:?}\n", db.to_string_lossy()),
        );

        Command::cargo_bin("dbbridge")
            .unwrap()
            .arg(&config)
            .args(["--query", "SELECT id, val FROM t ORDER BY id"])
            .assert()
            .success()
            .stdout("id,val\n1,a\n2,\"b, c\"\n");
    }

    #[test]
    fn test_jobs_copy_between_files() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("source.db");
        let target = dir.path().join("target.db");
        seed(
            &source,
            "CREATE TABLE t (id INTEGER, val TEXT); INSERT INTO t VALUES (1,'a'),(2,'b'),(3,'c');",
        );
        seed(&target, "CREATE TABLE t2 (id INTEGER PRIMARY KEY, val TEXT); INSERT INTO t2 VALUES (2, 'old');");

        let config = write_config(
            &dir,
            &format!(
                r#"
[source]
kind = "sqlite"
path = {:?}

[destination]
kind = "sqlite"
path = {:?}

[[jobs]]
name = "copy"
query = "SELECT id, val FROM t ORDER BY id"
insert = "insert into t2 values (#id#, '#val#')"
chunk_size = 2
policy = "log"
"#,
                source.to_string_lossy(),
                target.to_string_lossy()
            ),
        );

        Command::cargo_bin("dbbridge").unwrap().arg(&config).assert().success();

        let mut check = SqliteConnection::new(&target, ConnectionOptions::default());
        assert_eq!(check.execute_scalar("SELECT count(*) FROM t2").unwrap(), "3");
        assert_eq!(check.execute_scalar("SELECT val FROM t2 WHERE id = 3").unwrap(), "c");
    }

    #[test]
    fn test_missing_config_fails() {
        let dir = TempDir::new().unwrap();
        Command::cargo_bin("dbbridge")
            .unwrap()
            .arg(dir.path().join("absent.toml"))
            .assert()
            .failure();
    }
}
