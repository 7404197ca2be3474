//! Data source registry.
//!
//! Named data sources for the lookup acquisition strategy. A registry is built
//! by the embedding application and handed to
//! [`ConnectionManager::with_registry`](crate::db::ConnectionManager::with_registry);
//! there is no process-wide instance.

use crate::db::physical::PhysicalConnection;
use crate::error::{DbError, DbResult};
use crate::models::EngineKind;
use sqlx::ConnectOptions;
use sqlx::mysql::MySqlConnectOptions;
use sqlx::postgres::PgConnectOptions;
use sqlx::sqlite::SqliteConnectOptions;
use std::collections::HashMap;

/// Preconfigured driver options, credentials included.
#[derive(Debug, Clone)]
pub enum DataSource {
    Postgres(PgConnectOptions),
    MySql(MySqlConnectOptions),
    SQLite(SqliteConnectOptions),
}

impl DataSource {
    /// Get the engine this data source connects to.
    pub fn engine(&self) -> EngineKind {
        match self {
            DataSource::Postgres(_) => EngineKind::PostgreSQL,
            DataSource::MySql(_) => EngineKind::MySQL,
            DataSource::SQLite(_) => EngineKind::SQLite,
        }
    }

    /// Open a fresh physical connection from this data source.
    pub async fn connect(&self) -> DbResult<PhysicalConnection> {
        let conn = match self {
            DataSource::Postgres(o) => PhysicalConnection::Postgres(o.connect().await?),
            DataSource::MySql(o) => PhysicalConnection::MySql(o.connect().await?),
            DataSource::SQLite(o) => PhysicalConnection::SQLite(o.connect().await?),
        };
        Ok(conn)
    }
}

/// Registry that maps names to data sources.
#[derive(Debug, Default)]
pub struct DataSourceRegistry {
    sources: HashMap<String, DataSource>,
}

impl DataSourceRegistry {
    /// Creates a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a data source under `name`, replacing any previous binding.
    pub fn bind(&mut self, name: impl Into<String>, source: DataSource) {
        self.sources.insert(name.into(), source);
    }

    /// Gets a data source by name
    pub fn lookup(&self, name: &str) -> DbResult<&DataSource> {
        self.sources
            .get(name)
            .ok_or_else(|| DbError::data_source_not_found(name))
    }
}
