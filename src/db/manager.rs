//! Connection establishment.
//!
//! The [`ConnectionManager`] turns a [`ConnectionConfig`] into a ready
//! [`Connection`]. It owns no connections itself; it only knows how to
//! acquire them, either by dialing the server directly or by looking up a
//! data source in a registry that was injected at construction.

use crate::db::connection::Connection;
use crate::db::physical::PhysicalConnection;
use crate::db::registry::DataSourceRegistry;
use crate::error::{DbError, DbResult};
use crate::models::ConnectionConfig;
use std::sync::Arc;
use tracing::{debug, info};

/// How physical connections are acquired.
#[derive(Debug, Clone)]
pub enum Acquisition {
    /// Dial the server with the connection string and the config's credentials.
    Direct,
    /// Look up a data source bound under the connection string.
    Lookup(Arc<DataSourceRegistry>),
}

#[derive(Debug, Clone)]
pub struct ConnectionManager {
    acquisition: Acquisition,
}

impl ConnectionManager {
    /// Create a manager that dials servers directly.
    pub fn new() -> Self {
        Self {
            acquisition: Acquisition::Direct,
        }
    }

    /// Create a manager that resolves connection strings through `registry`.
    ///
    /// Credentials come from the bound data source; the config's user and
    /// password are not used on this path.
    pub fn with_registry(registry: Arc<DataSourceRegistry>) -> Self {
        Self {
            acquisition: Acquisition::Lookup(registry),
        }
    }

    pub fn acquisition(&self) -> &Acquisition {
        &self.acquisition
    }

    /// Open a ready-to-use connection.
    ///
    /// Fails with [`DbError::UnsupportedEngine`] before any I/O for engines
    /// without a connection string mapping, and with [`DbError::Unreachable`]
    /// if the liveness probe fails (the connection is released first).
    pub async fn open(&self, config: &ConnectionConfig) -> DbResult<Connection> {
        let connection_string = config.to_connection_string()?;

        info!(
            engine = %config.engine,
            host = %config.host,
            port = config.port,
            database = %config.database_name,
            "Opening connection"
        );

        let physical = self.acquire(config, &connection_string).await?;
        Connection::establish(physical).await
    }

    /// Open a connection, run `work`, and close the connection afterwards.
    ///
    /// The connection is closed whether `work` succeeds or fails; the result
    /// of `work` is returned unchanged.
    pub async fn with_connection<T, E, F>(&self, config: &ConnectionConfig, work: F) -> Result<T, E>
    where
        F: AsyncFnOnce(&mut Connection) -> Result<T, E>,
        E: From<DbError>,
    {
        let mut conn = self.open(config).await?;
        let result = work(&mut conn).await;
        conn.close().await;
        result
    }

    async fn acquire(
        &self,
        config: &ConnectionConfig,
        connection_string: &str,
    ) -> DbResult<PhysicalConnection> {
        match &self.acquisition {
            Acquisition::Direct => {
                debug!(engine = %config.engine, "Dialing server");
                PhysicalConnection::dial(
                    config.engine,
                    connection_string,
                    &config.user,
                    &config.password,
                )
                .await
            }
            Acquisition::Lookup(registry) => {
                debug!(name = %connection_string, "Looking up data source");
                let source = registry.lookup(connection_string)?;
                if source.engine() != config.engine {
                    return Err(DbError::invalid_input(format!(
                        "Data source '{}' is {}, but the configuration asks for {}",
                        connection_string,
                        source.engine(),
                        config.engine
                    )));
                }
                source.connect().await
            }
        }
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}
