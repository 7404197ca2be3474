//! Physical connections.
//!
//! A [`PhysicalConnection`] is one driver connection (not a pool). It is wrapped
//! in an [`IsolationShield`] before anything else touches it; the shield
//! forwards every operation except isolation-level changes.

use crate::db::statement::{ColumnKind, StatementOutcome, inspected_columns};
use crate::error::{DbError, DbResult};
use crate::models::{EngineKind, IsolationLevel};
use futures_util::TryStreamExt;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::sqlite::SqliteConnection;
use sqlx::{Column, ConnectOptions, Connection, Either, Row, TypeInfo};
use std::str::FromStr;
use tracing::{debug, trace, warn};
use url::Url;

/// Connection string options understood by the manager but not by the driver.
const MANAGER_OPTION_KEYS: &[&str] = &["autoreconnect"];

/// Dispatch over the physical connection variants.
///
/// The body is expanded once per variant with `$c` bound to the concrete
/// sqlx connection, so driver-specific types flow through unchanged.
macro_rules! with_physical {
    ($conn:expr, $c:ident => $body:expr) => {
        match $conn {
            PhysicalConnection::Postgres($c) => $body,
            PhysicalConnection::MySql($c) => $body,
            PhysicalConnection::SQLite($c) => $body,
        }
    };
}

/// Engine-specific driver connection.
#[derive(Debug)]
pub enum PhysicalConnection {
    Postgres(PgConnection),
    MySql(MySqlConnection),
    SQLite(SqliteConnection),
}

impl PhysicalConnection {
    /// Dial a server from a generated connection string plus credentials.
    pub async fn dial(
        engine: EngineKind,
        connection_string: &str,
        user: &str,
        password: &str,
    ) -> DbResult<Self> {
        let driver_url = strip_manager_options(connection_string)?;

        match engine {
            EngineKind::PostgreSQL => {
                let options = PgConnectOptions::from_str(&driver_url)
                    .map_err(DbError::from)?
                    .username(user)
                    .password(password);
                Ok(Self::Postgres(options.connect().await?))
            }
            EngineKind::MySQL => {
                let options = MySqlConnectOptions::from_str(&driver_url)
                    .map_err(DbError::from)?
                    .username(user)
                    .password(password);
                Ok(Self::MySql(options.connect().await?))
            }
            EngineKind::SQLite | EngineKind::Oracle => Err(DbError::unsupported_engine(engine)),
        }
    }

    /// Get the engine this connection talks to.
    pub fn engine(&self) -> EngineKind {
        match self {
            Self::Postgres(_) => EngineKind::PostgreSQL,
            Self::MySql(_) => EngineKind::MySQL,
            Self::SQLite(_) => EngineKind::SQLite,
        }
    }

    /// Run raw SQL (possibly several statements) and drain every result.
    ///
    /// The result stream is dropped before returning on every path, which
    /// releases the statement on the driver side.
    pub async fn execute(&mut self, sql: &str) -> DbResult<StatementOutcome> {
        with_physical!(self, c => {
            let mut outcome = StatementOutcome::default();
            let mut stream = sqlx::raw_sql(sql).fetch_many(&mut *c);
            while let Some(item) = stream.try_next().await? {
                match item {
                    Either::Left(done) => outcome.rows_affected += done.rows_affected(),
                    Either::Right(_) => outcome.rows_returned += 1,
                }
            }
            Ok(outcome)
        })
    }

    /// Walk a query's cursor to the end, inspecting column types row by row.
    ///
    /// No value is decoded. Returns the number of rows visited.
    pub async fn drain_select(&mut self, sql: &str) -> DbResult<u64> {
        with_physical!(self, c => {
            let mut visited = 0u64;
            let mut rows = sqlx::raw_sql(sql).fetch(&mut *c);
            while let Some(row) = rows.try_next().await? {
                let columns = row.columns();
                for index in inspected_columns(columns.len()) {
                    let kind = ColumnKind::from_type_name(columns[index].type_info().name());
                    trace!(index, kind = ?kind, "Inspected column");
                }
                visited += 1;
            }
            Ok(visited)
        })
    }

    /// Look up a table or view by exact name in any schema.
    pub async fn table_exists(&mut self, table_name: &str) -> DbResult<bool> {
        let found = match self {
            Self::Postgres(c) => sqlx::query(queries::postgres::TABLE_EXISTS)
                .bind(table_name)
                .fetch_optional(&mut *c)
                .await?
                .is_some(),
            Self::MySql(c) => sqlx::query(queries::mysql::TABLE_EXISTS)
                .bind(table_name)
                .fetch_optional(&mut *c)
                .await?
                .is_some(),
            Self::SQLite(c) => sqlx::query(queries::sqlite::TABLE_EXISTS)
                .bind(table_name)
                .bind(table_name)
                .fetch_optional(&mut *c)
                .await?
                .is_some(),
        };
        Ok(found)
    }

    /// Switch the server session to manual commit where the server supports it.
    ///
    /// Returns true if the server now holds the setting. MySQL does, and
    /// afterwards opens a new transaction by itself after every commit,
    /// rollback or implicit DDL commit. PostgreSQL and SQLite have no such
    /// setting and rely on explicit `BEGIN`.
    pub async fn disable_auto_commit(&mut self) -> DbResult<bool> {
        match self {
            Self::MySql(_) => {
                self.execute("SET autocommit = 0").await?;
                Ok(true)
            }
            Self::Postgres(_) | Self::SQLite(_) => Ok(false),
        }
    }

    /// Open an explicit transaction.
    pub async fn begin(&mut self) -> DbResult<()> {
        let sql = match self {
            Self::MySql(_) => "START TRANSACTION",
            Self::Postgres(_) | Self::SQLite(_) => "BEGIN",
        };
        self.execute(sql).await.map(|_| ())
    }

    pub async fn commit(&mut self) -> DbResult<()> {
        self.execute("COMMIT").await.map(|_| ())
    }

    pub async fn rollback(&mut self) -> DbResult<()> {
        self.execute("ROLLBACK").await.map(|_| ())
    }

    /// Close the connection, consuming it.
    pub async fn close(self) -> DbResult<()> {
        with_physical!(self, c => c.close().await.map_err(DbError::from))
    }
}

/// Remove options the manager owns from a connection string before the driver sees it.
///
/// sqlx connections never reconnect on their own, so `autoReconnect` is
/// recognised and dropped rather than forwarded.
fn strip_manager_options(connection_string: &str) -> DbResult<String> {
    let mut url = Url::parse(connection_string)
        .map_err(|e| DbError::invalid_input(format!("Invalid connection string: {e}")))?;

    let remaining: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !MANAGER_OPTION_KEYS.contains(&k.to_ascii_lowercase().as_str()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if remaining.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(remaining);
    }
    Ok(url.to_string())
}

/// A physical connection that silently refuses isolation-level changes.
///
/// Some servers and proxies reject isolation changes once a session is
/// established. Callers (and libraries layered on top) are shielded from that
/// failure: [`set_transaction_isolation`](Self::set_transaction_isolation)
/// accepts any level and does nothing. This is the one deliberate silent
/// failure of the manager. Every other operation is forwarded unchanged.
#[derive(Debug)]
pub struct IsolationShield {
    inner: PhysicalConnection,
}

impl IsolationShield {
    pub fn new(inner: PhysicalConnection) -> Self {
        Self { inner }
    }

    pub fn engine(&self) -> EngineKind {
        self.inner.engine()
    }

    /// Accept and discard an isolation-level request.
    pub fn set_transaction_isolation(&mut self, level: IsolationLevel) {
        debug!(
            engine = %self.engine(),
            level = ?level,
            "Discarding isolation level change"
        );
    }

    pub async fn execute(&mut self, sql: &str) -> DbResult<StatementOutcome> {
        self.inner.execute(sql).await
    }

    pub async fn drain_select(&mut self, sql: &str) -> DbResult<u64> {
        self.inner.drain_select(sql).await
    }

    pub async fn table_exists(&mut self, table_name: &str) -> DbResult<bool> {
        self.inner.table_exists(table_name).await
    }

    pub async fn disable_auto_commit(&mut self) -> DbResult<bool> {
        self.inner.disable_auto_commit().await
    }

    pub async fn begin(&mut self) -> DbResult<()> {
        self.inner.begin().await
    }

    pub async fn commit(&mut self) -> DbResult<()> {
        self.inner.commit().await
    }

    pub async fn rollback(&mut self) -> DbResult<()> {
        self.inner.rollback().await
    }

    /// Close the underlying connection, logging instead of raising on failure.
    pub async fn close(self) {
        let engine = self.engine();
        if let Err(e) = self.inner.close().await {
            warn!(engine = %engine, error = %e, "Failed to close connection cleanly");
        }
    }
}

// =============================================================================
// Metadata Queries
// =============================================================================

mod queries {
    pub mod postgres {
        /// Reads the catalog directly so relations the current role holds no
        /// privileges on are found too.
        pub const TABLE_EXISTS: &str = r#"
            SELECT 1
            FROM pg_catalog.pg_class c
            JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
            WHERE c.relname = $1
              AND c.relkind IN ('r', 'v', 'p', 'm', 'f')
            LIMIT 1
            "#;
    }

    pub mod mysql {
        pub const TABLE_EXISTS: &str = r#"
            SELECT 1
            FROM information_schema.tables
            WHERE table_name = ?
            LIMIT 1
            "#;
    }

    pub mod sqlite {
        pub const TABLE_EXISTS: &str = r#"
            SELECT 1 FROM sqlite_master
            WHERE type IN ('table', 'view') AND name = ?
            UNION ALL
            SELECT 1 FROM sqlite_temp_master
            WHERE type IN ('table', 'view') AND name = ?
            LIMIT 1
            "#;
    }
}
