//! Integration tests for the connection lifecycle on SQLite files.
//!
//! Tests verify that:
//! - Writes stay invisible to other connections until committed
//! - `transaction` commits on success and rolls back on failure
//! - A transaction cancelled by a timeout leaves nothing behind
//! - Raw COMMIT / ROLLBACK statements move the session's boundaries
//! - Table existence follows DDL
//! - Closing is idempotent and closed handles refuse work

use sql_session::db::{Connection, PhysicalConnection};
use sql_session::error::DbError;
use sqlx::ConnectOptions;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

fn options(path: &Path) -> SqliteConnectOptions {
    SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
}

/// Open a managed handle on the database file.
async fn open(path: &Path) -> Connection {
    let physical = PhysicalConnection::SQLite(options(path).connect().await.unwrap());
    Connection::establish(physical).await.unwrap()
}

/// Count rows through an independent, plain driver connection.
async fn count_rows(path: &Path, table: &str) -> i64 {
    let mut conn = options(path).connect().await.unwrap();
    let sql = format!("SELECT COUNT(*) FROM {table}");
    let count: i64 = sqlx::query_scalar(&sql).fetch_one(&mut conn).await.unwrap();
    sqlx::Connection::close(conn).await.unwrap();
    count
}

/// Create a database file with an empty `items` table.
async fn setup() -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("session.db");

    let mut conn = open(&path).await;
    conn.execute("CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT NOT NULL)")
        .await
        .unwrap();
    conn.commit().await.unwrap();
    conn.close().await;

    (dir, path)
}

#[derive(Debug)]
#[allow(dead_code)]
enum AppError {
    Db(DbError),
    Validation(String),
}

impl From<DbError> for AppError {
    fn from(err: DbError) -> Self {
        AppError::Db(err)
    }
}

#[tokio::test]
async fn test_liveness_query_after_open() {
    let (_dir, path) = setup().await;
    let mut conn = open(&path).await;
    assert!(conn.execute("SELECT 1;").await.unwrap());
    conn.close().await;
}

#[tokio::test]
async fn test_uncommitted_insert_is_invisible() {
    let (_dir, path) = setup().await;
    let mut writer = open(&path).await;

    writer
        .execute("INSERT INTO items (id, name) VALUES (1, 'pending')")
        .await
        .unwrap();
    assert_eq!(
        count_rows(&path, "items").await,
        0,
        "Data should NOT be visible before commit"
    );

    writer.commit().await.unwrap();
    assert_eq!(
        count_rows(&path, "items").await,
        1,
        "Data SHOULD be visible after commit"
    );
    writer.close().await;
}

#[tokio::test]
async fn test_close_discards_uncommitted_work() {
    let (_dir, path) = setup().await;
    let mut writer = open(&path).await;

    writer
        .execute("INSERT INTO items (id, name) VALUES (1, 'lost')")
        .await
        .unwrap();
    writer.close().await;

    assert_eq!(count_rows(&path, "items").await, 0);
}

#[tokio::test]
async fn test_transaction_commit_is_visible() {
    let (_dir, path) = setup().await;
    let mut conn = open(&path).await;

    conn.transaction(async |c| {
        c.execute("INSERT INTO items (id, name) VALUES (1, 'a')").await?;
        c.execute("INSERT INTO items (id, name) VALUES (2, 'b')").await?;
        Ok::<_, DbError>(())
    })
    .await
    .unwrap();

    assert_eq!(count_rows(&path, "items").await, 2);
    conn.close().await;
}

#[tokio::test]
async fn test_transaction_rollback_leaves_no_partial_writes() {
    let (_dir, path) = setup().await;
    let mut conn = open(&path).await;

    let result = conn
        .transaction(async |c| {
            c.execute("INSERT INTO items (id, name) VALUES (1, 'a')").await?;
            c.execute("INSERT INTO items (id, name) VALUES (2, 'b')").await?;
            Err::<(), _>(AppError::Validation("name taken".to_string()))
        })
        .await;

    match result {
        Err(AppError::Validation(msg)) => assert_eq!(msg, "name taken"),
        other => panic!("expected the work's own error, got {other:?}"),
    }
    assert_eq!(
        count_rows(&path, "items").await,
        0,
        "Data should NOT exist after rollback!"
    );

    // The handle stays usable after a rollback.
    conn.transaction(async |c| {
        c.execute("INSERT INTO items (id, name) VALUES (3, 'c')").await?;
        Ok::<_, DbError>(())
    })
    .await
    .unwrap();
    assert_eq!(count_rows(&path, "items").await, 1);
    conn.close().await;
}

#[tokio::test]
async fn test_transaction_driver_error_is_returned_after_rollback() {
    let (_dir, path) = setup().await;
    let mut conn = open(&path).await;

    let result = conn
        .transaction(async |c| {
            c.execute("INSERT INTO items (id, name) VALUES (1, 'a')").await?;
            // Duplicate primary key.
            c.execute("INSERT INTO items (id, name) VALUES (1, 'b')").await?;
            Ok::<_, DbError>(())
        })
        .await;

    let err = result.unwrap_err();
    assert!(matches!(err, DbError::Execution { .. }), "got {err:?}");
    assert_eq!(count_rows(&path, "items").await, 0);
    assert_eq!(conn.database().rollbacks(), 1);
    conn.close().await;
}

#[tokio::test]
async fn test_cancelled_transaction_leaves_no_partial_writes() {
    let (_dir, path) = setup().await;
    let mut conn = open(&path).await;

    let cancelled = tokio::time::timeout(
        Duration::from_millis(50),
        conn.transaction(async |c| {
            c.execute("INSERT INTO items (id, name) VALUES (1, 'half done')")
                .await?;
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, DbError>(())
        }),
    )
    .await;
    assert!(cancelled.is_err(), "the timeout should have fired");
    assert!(!conn.database().in_scope());

    // The next transaction runs normally and does not inherit the cancelled work.
    conn.transaction(async |c| {
        c.execute("INSERT INTO items (id, name) VALUES (2, 'kept')")
            .await?;
        Ok::<_, DbError>(())
    })
    .await
    .unwrap();

    assert_eq!(count_rows(&path, "items").await, 1);
    assert_eq!(conn.database().rollbacks(), 1);
    conn.close().await;
}

#[tokio::test]
async fn test_raw_commit_and_rollback_statements() {
    let (_dir, path) = setup().await;
    let mut conn = open(&path).await;

    conn.execute("INSERT INTO items (id, name) VALUES (1, 'a')")
        .await
        .unwrap();
    conn.execute("COMMIT").await.unwrap();
    assert_eq!(count_rows(&path, "items").await, 1);
    assert!(!conn.database().in_transaction());

    // The session opens a fresh transaction after the raw COMMIT.
    conn.execute("INSERT INTO items (id, name) VALUES (2, 'b')")
        .await
        .unwrap();
    assert_eq!(count_rows(&path, "items").await, 1);
    conn.execute("ROLLBACK").await.unwrap();
    conn.commit().await.unwrap();
    assert_eq!(count_rows(&path, "items").await, 1);
    conn.close().await;
}

#[tokio::test]
async fn test_does_table_exist_follows_ddl() {
    let (_dir, path) = setup().await;
    let mut conn = open(&path).await;

    assert!(conn.does_table_exist("items").await.unwrap());
    assert!(!conn.does_table_exist("nonexistent_xyz").await.unwrap());

    conn.execute("CREATE TABLE nonexistent_xyz (id INTEGER)")
        .await
        .unwrap();
    assert!(conn.does_table_exist("nonexistent_xyz").await.unwrap());
    conn.commit().await.unwrap();

    let mut other = open(&path).await;
    assert!(other.does_table_exist("nonexistent_xyz").await.unwrap());

    other.close().await;
    conn.close().await;
}

#[tokio::test]
async fn test_execute_select_on_populated_table() {
    let (_dir, path) = setup().await;
    let mut conn = open(&path).await;

    conn.execute("INSERT INTO items (id, name) VALUES (1, 'a'), (2, 'b'), (3, 'c')")
        .await
        .unwrap();
    conn.execute_select("SELECT id, name FROM items").await.unwrap();

    let err = conn
        .execute_select("SELECT * FROM missing")
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Execution { .. }));
    conn.close().await;
}

#[tokio::test]
async fn test_close_twice_and_use_after_close() {
    let (_dir, path) = setup().await;
    let mut conn = open(&path).await;

    conn.close().await;
    conn.close().await;
    assert!(conn.is_closed());

    let err = conn.execute("SELECT 1;").await.unwrap_err();
    assert!(matches!(err, DbError::ConnectionClosed { .. }));
    let err = conn.does_table_exist("items").await.unwrap_err();
    assert!(matches!(err, DbError::ConnectionClosed { .. }));
}
