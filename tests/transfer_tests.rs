#[cfg(test)]
mod transfer_tests {
    use dbbridge::backends::{MemoryConnection, SqliteConnection, XbaseConnection};
    use dbbridge::core::db::{
        Command, Connection, ConnectionOptions, ConnectionState, RowWindow, Transfer, TransferExt,
    };
    use dbbridge::core::DbError;
    use dbbridge::test_utils::{write_dbf, DatabaseFixture, RecordingConnection};
    use tempfile::TempDir;

    fn destination(pre_existing: &[u64]) -> MemoryConnection {
        let mut conn = MemoryConnection::default();
        conn.execute("CREATE TABLE t2 (id INTEGER PRIMARY KEY, val TEXT)").unwrap();
        for id in pre_existing {
            conn.execute(&format!("INSERT INTO t2 VALUES ({}, 'old')", id)).unwrap();
        }
        conn
    }

    fn numbers_insert() -> Command {
        Command::new("insert into t2 values (#id#,'#label#')")
    }

    #[test]
    fn test_full_transfer_copies_rows_in_order() {
        let mut source = DatabaseFixture::with_sample_data("t").unwrap();
        let mut dest = destination(&[]);
        let mut insert = Command::new("insert into t2 values (#id#,'#val#')");

        let count = source
            .connection
            .transfer("SELECT id, val FROM t ORDER BY id", &mut insert, &mut dest)
            .unwrap();
        assert_eq!(count, 3);

        let copied = dest.query("SELECT id, val FROM t2 ORDER BY rowid", "t2").unwrap();
        assert_eq!(
            copied.rows(),
            &[
                vec!["1".to_string(), "a".to_string()],
                vec!["2".to_string(), "b".to_string()],
                vec!["3".to_string(), "c".to_string()],
            ]
        );
    }

    #[test]
    fn test_fail_fast_keeps_rows_before_the_failure() {
        let mut source = DatabaseFixture::with_numbers("src", 10).unwrap();
        let mut dest = destination(&[4]);
        let mut insert = numbers_insert();

        let result = source.connection.transfer(
            "SELECT id, label FROM numbers ORDER BY id",
            &mut insert,
            &mut dest,
        );
        assert!(matches!(result, Err(DbError::Sqlite(_))));
        assert_eq!(
            dest.execute_scalar("SELECT count(*) FROM t2 WHERE val <> 'old'").unwrap(),
            "3"
        );
        assert_eq!(dest.execute_scalar("SELECT max(id) FROM t2").unwrap(), "4");
    }

    #[test]
    fn test_tolerant_transfer_logs_each_failure() {
        let mut source = DatabaseFixture::with_numbers("src", 10).unwrap();
        let mut dest = destination(&[3, 7]);
        let mut insert = numbers_insert();

        let (count, log) = source
            .connection
            .transfer_with_log("SELECT id, label FROM numbers ORDER BY id", &mut insert, &mut dest)
            .unwrap();
        assert_eq!(count, 8);

        let statements: Vec<&str> = log.lines().filter(|l| l.starts_with("insert into")).collect();
        assert_eq!(
            statements,
            vec!["insert into t2 values (3,'n3')", "insert into t2 values (7,'n7')"]
        );
        assert_eq!(log.lines().count(), 4);
        assert!(log.contains("UNIQUE constraint failed"));
        assert_eq!(dest.execute_scalar("SELECT count(*) FROM t2").unwrap(), "10");
    }

    #[test]
    fn test_events_report_progress_and_failures() {
        let mut source = DatabaseFixture::with_numbers("src", 5).unwrap();
        let mut dest = destination(&[2]);
        let mut insert = numbers_insert();
        let mut progress = Vec::new();
        let mut errors = Vec::new();

        let count = source
            .connection
            .transfer_with_events(
                "SELECT id, label FROM numbers ORDER BY id",
                &mut insert,
                &mut dest,
                &mut |n| progress.push(n),
                &mut |message| errors.push(message.to_string()),
            )
            .unwrap();
        assert_eq!(count, 4);
        assert_eq!(progress, vec![0, 1, 2, 3, 4]);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("insert into t2 values (2,'n2')\n"));
    }

    #[test]
    fn test_chunked_transfer_covers_every_row_once() {
        let mut source = DatabaseFixture::with_numbers("src", 7).unwrap();
        let mut dest = destination(&[]);
        let mut insert = numbers_insert();
        let query = "SELECT id, label FROM numbers ORDER BY id";

        let mut total = 0;
        let mut calls = 0;
        let size = 3;
        loop {
            let start = calls * size;
            let (count, more) = source
                .connection
                .transfer_block(query, &mut insert, &mut dest, start, start + size - 1)
                .unwrap();
            total += count;
            calls += 1;
            if !more {
                break;
            }
        }
        assert_eq!(total, 7);
        assert_eq!(calls, 4);
        assert_eq!(dest.execute_scalar("SELECT count(*) FROM t2").unwrap(), "7");
    }

    #[test]
    fn test_chunked_transfer_with_log_accumulates_failures() {
        let mut source = DatabaseFixture::with_numbers("src", 6).unwrap();
        let mut dest = destination(&[2, 5]);
        let mut insert = numbers_insert();
        let query = "SELECT id, label FROM numbers ORDER BY id";
        let mut log = String::new();

        let mut results = Vec::new();
        let mut window = RowWindow::chunk(0, 3);
        loop {
            let (count, more) = source
                .connection
                .transfer_block_with_log(
                    query,
                    &mut insert,
                    &mut dest,
                    &mut log,
                    window.start_row,
                    window.end_row,
                )
                .unwrap();
            results.push((count, more));
            if !more {
                break;
            }
            window = window.next();
        }
        assert_eq!(results, vec![(2, true), (2, true), (0, false)]);
        let statements: Vec<&str> = log.lines().filter(|l| l.starts_with("insert into")).collect();
        assert_eq!(
            statements,
            vec!["insert into t2 values (2,'n2')", "insert into t2 values (5,'n5')"]
        );
        assert_eq!(source.connection.state(), ConnectionState::Idle);
        assert_eq!(dest.execute_scalar("SELECT count(*) FROM t2").unwrap(), "6");
    }

    #[test]
    fn test_chunked_fail_fast_leaves_cursor_open() {
        let mut source = DatabaseFixture::with_numbers("src", 10).unwrap();
        let mut dest = destination(&[5]);
        let mut insert = numbers_insert();
        let query = "SELECT id, label FROM numbers ORDER BY id";

        let first = source
            .connection
            .transfer_block(query, &mut insert, &mut dest, 0, 2)
            .unwrap();
        assert_eq!(first, (3, true));

        let failed = source.connection.transfer_block(query, &mut insert, &mut dest, 3, 7);
        assert!(matches!(failed, Err(DbError::Sqlite(_))));
        assert_eq!(source.connection.state(), ConnectionState::Chunking);
        assert_eq!(
            dest.execute_scalar("SELECT group_concat(id) FROM t2 WHERE val <> 'old'")
                .unwrap(),
            "1,2,3,4"
        );

        source.connection.close().unwrap();
        assert_eq!(source.connection.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_batched_window_is_one_native_statement() {
        let mut source = DatabaseFixture::with_numbers("src", 12).unwrap();
        let mut dest = RecordingConnection::new(destination(&[]));
        let mut insert = Command::new("(#id#,'#label#')");

        let (count, more) = source
            .connection
            .transfer_insert_block(
                "SELECT id, label FROM numbers ORDER BY id",
                "t2",
                Some("(id,val)"),
                &mut insert,
                &mut dest,
                0,
                4,
            )
            .unwrap();
        assert_eq!((count, more), (5, true));
        assert_eq!(dest.block_calls, 1);
        assert_eq!(dest.native_calls(), 1);
        assert_eq!(dest.inner.execute_scalar("SELECT count(*) FROM t2").unwrap(), "5");
    }

    #[test]
    fn test_batched_failure_is_logged_as_one_entry() {
        let mut source = DatabaseFixture::with_numbers("src", 4).unwrap();
        let mut dest = destination(&[2]);
        let mut insert = Command::new("(#id#,'#label#')");
        let mut log = String::new();

        let (count, more) = source
            .connection
            .transfer_insert_block_with_log(
                "SELECT id, label FROM numbers ORDER BY id",
                "t2",
                Some("(id,val)"),
                &mut insert,
                &mut dest,
                &mut log,
                0,
                3,
            )
            .unwrap();
        assert_eq!((count, more), (0, true));
        assert_eq!(log.lines().count(), 1);
        assert_eq!(dest.execute_scalar("SELECT count(*) FROM t2").unwrap(), "1");
    }

    #[test]
    fn test_execute_security_sanitizes_bound_values() {
        let mut source = MemoryConnection::new(ConnectionOptions::new(-1, true));
        source
            .execute("CREATE TABLE people (name TEXT); INSERT INTO people VALUES ('O''Brien; --x');")
            .unwrap();
        let mut dest = MemoryConnection::default();
        dest.execute("CREATE TABLE copy (name TEXT)").unwrap();
        let mut insert = Command::new("insert into copy values ('#NAME#')");

        let outcome = Transfer::new("SELECT name FROM people")
            .run(&mut source, &mut insert, &mut dest)
            .unwrap();
        assert_eq!(outcome.transferred, 1);
        assert_eq!(dest.execute_scalar("SELECT name FROM copy").unwrap(), "OBrien -x");
    }

    #[test]
    fn test_xbase_files_to_sqlite_file() {
        let dir = TempDir::new().unwrap();
        let dbf = dir.path().join("ITEMS.DBF");
        write_dbf(
            &dbf,
            &[("CODE", 'C', 3), ("PRICE", 'N', 6)],
            &[(false, vec!["A", "1.50"]), (true, vec!["B", "2"]), (false, vec!["C", "3"])],
        );
        let mut source = XbaseConnection::new(vec![dbf], None, ConnectionOptions::default());
        source
            .create_database(Some(dir.path().join("items.db").to_str().unwrap()))
            .unwrap();

        let target = dir.path().join("target.db");
        let mut dest = SqliteConnection::new(&target, ConnectionOptions::default());
        dest.create_database(None).unwrap();
        dest.execute("CREATE TABLE items (code TEXT, price REAL)").unwrap();

        let mut insert = Command::new("insert into items values ('#code#', #price#)");
        let count = source
            .transfer("SELECT code, price FROM items ORDER BY code", &mut insert, &mut dest)
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(dest.execute_scalar("SELECT sum(price) FROM items").unwrap(), "4.5");
    }
}
