use rusqlite::{ffi, params_from_iter, Connection, Row as SqlRow};

use crate::core::types::{ExecResult, Row, Value};

pub fn run_query(conn: &Connection, sql: &str, params: &[Value]) -> rusqlite::Result<Vec<Row>> {
    let mut stmt = conn.prepare(sql)?;
    let col_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();

    let mut rows = Vec::new();
    let mut r = stmt.query(params_from_iter(params.iter()))?;
    while let Some(row) = r.next()? {
        rows.push(materialize(row, &col_names)?);
    }
    Ok(rows)
}

/// Steps the statement to completion, so row-returning statements are accepted
/// too. `changes` is 0 unless the statement itself modified rows; SQLite's own
/// counter keeps the value of the last DML statement otherwise.
pub fn run_execute(conn: &Connection, sql: &str, params: &[Value]) -> rusqlite::Result<ExecResult> {
    let before = total_changes(conn);
    let mut stmt = conn.prepare(sql)?;
    let mut r = stmt.query(params_from_iter(params.iter()))?;
    while r.next()?.is_some() {}
    drop(r);

    let changes = if total_changes(conn) == before {
        0
    } else {
        conn.changes() as u64
    };
    Ok(ExecResult {
        changes,
        last_insert_rowid: conn.last_insert_rowid(),
    })
}

fn total_changes(conn: &Connection) -> i64 {
    // SAFETY: the handle stays valid for as long as `conn` is borrowed.
    unsafe { ffi::sqlite3_total_changes64(conn.handle()) }
}

/// Runs every statement inside one native transaction. A failed rollback is
/// logged and the statement's own error is returned.
pub fn run_batch(conn: &Connection, statements: &[String]) -> rusqlite::Result<()> {
    conn.execute_batch("BEGIN")?;

    for (i, sql) in statements.iter().enumerate() {
        if let Err(e) = conn.execute_batch(sql) {
            tracing::debug!(index = i, error = %e, "batch statement failed; rolling back");
            rollback_quietly(conn);
            return Err(e);
        }
    }

    if let Err(e) = conn.execute_batch("COMMIT") {
        rollback_quietly(conn);
        return Err(e);
    }
    Ok(())
}

fn rollback_quietly(conn: &Connection) {
    if let Err(e) = conn.execute_batch("ROLLBACK") {
        tracing::warn!(error = %e, "rollback after failed batch also failed");
    }
}

fn materialize(row: &SqlRow<'_>, col_names: &[String]) -> rusqlite::Result<Row> {
    let mut out = Row::with_capacity(col_names.len());
    for (i, name) in col_names.iter().enumerate() {
        out.insert(name.as_str(), Value::from(row.get_ref(i)?));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE t(id INTEGER PRIMARY KEY, v INTEGER CHECK (v < 1000), name TEXT, data BLOB)",
        )
        .unwrap();
        conn
    }

    #[test]
    fn query_materializes_every_storage_class() {
        let conn = mem();
        run_execute(
            &conn,
            "INSERT INTO t(v, name, data) VALUES (?, ?, ?)",
            &[Value::Integer(3), Value::from("x"), Value::Blob(vec![9])],
        )
        .unwrap();

        let rows = run_query(&conn, "SELECT id, v, name, data, 1.5 AS r, NULL AS n FROM t", &[]).unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.get("id"), Some(&Value::Integer(1)));
        assert_eq!(row.get("name"), Some(&Value::Text("x".into())));
        assert_eq!(row.get("data"), Some(&Value::Blob(vec![9])));
        assert_eq!(row.get("r"), Some(&Value::Real(1.5)));
        assert_eq!(row.get("n"), Some(&Value::Null));
        assert_eq!(row.columns()[0], "id");
    }

    #[test]
    fn execute_reports_changes_and_rowid() {
        let conn = mem();
        let first = run_execute(&conn, "INSERT INTO t(v) VALUES (?)", &[Value::Integer(1)]).unwrap();
        assert_eq!(first, ExecResult { changes: 1, last_insert_rowid: 1 });
        run_execute(&conn, "INSERT INTO t(v) VALUES (2)", &[]).unwrap();

        let upd = run_execute(&conn, "UPDATE t SET v = v + 1", &[]).unwrap();
        assert_eq!(upd.changes, 2);
    }

    #[test]
    fn statements_that_change_nothing_report_zero() {
        let conn = mem();
        let insert = run_execute(&conn, "INSERT INTO t(v) VALUES (1), (2), (3)", &[]).unwrap();
        assert_eq!(insert.changes, 3);

        let ddl = run_execute(&conn, "CREATE TABLE other(x)", &[]).unwrap();
        assert_eq!(ddl.changes, 0);

        let select = run_execute(&conn, "SELECT * FROM t", &[]).unwrap();
        assert_eq!(select.changes, 0);

        let none = run_execute(&conn, "UPDATE t SET v = 0 WHERE id = 99", &[]).unwrap();
        assert_eq!(none.changes, 0);
    }

    #[test]
    fn parameter_count_mismatch_is_an_error() {
        let conn = mem();
        assert!(run_execute(&conn, "INSERT INTO t(v) VALUES (?)", &[]).is_err());
    }

    #[test]
    fn failed_batch_leaves_no_partial_effects() {
        let conn = mem();
        run_execute(&conn, "INSERT INTO t(v) VALUES (10)", &[]).unwrap();

        let err = run_batch(
            &conn,
            &[
                "UPDATE t SET v = v - 5 WHERE id = 1".to_string(),
                "UPDATE t SET v = v + 999999999999 WHERE id = 1".to_string(),
            ],
        )
        .unwrap_err();
        assert!(err.to_string().contains("CHECK"));

        let rows = run_query(&conn, "SELECT v FROM t WHERE id = 1", &[]).unwrap();
        assert_eq!(rows[0].get("v"), Some(&Value::Integer(10)));
        assert!(conn.is_autocommit());
    }

    #[test]
    fn successful_batch_commits() {
        let conn = mem();
        run_batch(
            &conn,
            &[
                "INSERT INTO t(v) VALUES (1)".to_string(),
                "INSERT INTO t(v) VALUES (2)".to_string(),
            ],
        )
        .unwrap();
        let rows = run_query(&conn, "SELECT COUNT(*) AS n FROM t", &[]).unwrap();
        assert_eq!(rows[0].get("n"), Some(&Value::Integer(2)));
        assert!(conn.is_autocommit());
    }
}
