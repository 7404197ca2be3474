//! Connection handles.
//!
//! A [`Connection`] owns exactly one physical connection plus the logical
//! [`Session`] derived from it. Once established, the connection no longer
//! commits per statement. On PostgreSQL and SQLite the first statement after
//! open, commit or rollback sends `BEGIN`, and that transaction stays open
//! until an explicit boundary. On MySQL the server session itself is switched
//! to manual commit, so a transaction is always open there, including right
//! after DDL commits implicitly.
//!
//! # Concurrency
//!
//! Every operation takes `&mut self` and runs to completion on the single
//! underlying connection. A handle is meant for one task at a time; share it
//! only behind external synchronization, or open one handle per worker.
//!
//! Operations are not timed out by this module. Wrap calls in
//! `tokio::time::timeout` if a bound is needed. A [`transaction`] future that
//! is dropped before it finishes leaves its work uncommitted; the next
//! operation on the handle rolls that work back first.
//!
//! [`transaction`]: Connection::transaction

use crate::db::physical::{IsolationShield, PhysicalConnection};
use crate::db::session::Session;
use crate::db::statement::{self, ControlScan, TransactionControl};
use crate::error::{DbError, DbResult};
use crate::models::{EngineKind, IsolationLevel};
use tracing::{debug, info, warn};

#[derive(Debug)]
pub struct Connection {
    /// `None` once closed.
    physical: Option<IsolationShield>,
    database: Session,
}

impl Connection {
    /// Turn an acquired physical connection into a ready handle.
    ///
    /// Shields isolation-level changes, runs the liveness probe, then switches
    /// off per-statement commit. If either step fails the physical connection
    /// is closed before the error is returned.
    pub async fn establish(physical: PhysicalConnection) -> DbResult<Self> {
        let mut shield = IsolationShield::new(physical);
        let engine = shield.engine();

        let probe = engine.liveness_probe();
        if let Err(e) = shield.execute(probe).await {
            warn!(engine = %engine, error = %e, "Liveness probe failed");
            shield.close().await;
            return Err(DbError::unreachable(engine, e.to_string()));
        }

        let on_server = match shield.disable_auto_commit().await {
            Ok(on_server) => on_server,
            Err(e) => {
                warn!(engine = %engine, error = %e, "Failed to disable autocommit");
                shield.close().await;
                return Err(e);
            }
        };

        let mut database = Session::new(engine);
        database.disable_auto_commit(on_server);

        info!(engine = %engine, server_manual_commit = on_server, "Connection established");

        Ok(Self {
            physical: Some(shield),
            database,
        })
    }

    /// Get the engine behind this handle.
    pub fn engine(&self) -> EngineKind {
        self.database.engine()
    }

    /// The logical session used for transaction scoping.
    pub fn database(&self) -> &Session {
        &self.database
    }

    /// Check whether the physical connection has been released.
    pub fn is_closed(&self) -> bool {
        self.physical.is_none()
    }

    /// Request an isolation level. Accepted and ignored.
    ///
    /// See [`IsolationShield`]. Fails only if the handle is closed.
    pub fn set_transaction_isolation(&mut self, level: IsolationLevel) -> DbResult<()> {
        self.physical_mut("set transaction isolation")?
            .set_transaction_isolation(level);
        Ok(())
    }

    /// Execute raw SQL.
    ///
    /// Returns `true` if the statement produces a result set and `false` if it
    /// only reports an update count. No parameter binding or escaping is done.
    ///
    /// A lone `BEGIN`, `COMMIT` or `ROLLBACK` is applied through the handle's
    /// own boundaries, the same as [`commit`](Self::commit) and
    /// [`rollback`](Self::rollback), and returns `false`. Boundaries mixed with
    /// other statements, or issued inside a [`transaction`](Self::transaction)
    /// scope, fail with [`DbError::InvalidInput`].
    ///
    /// The result set flag comes from the rows streamed back, or else from
    /// parsing the first statement. A query that returns no rows and that the
    /// parser does not understand (some vendor-specific syntax) is reported
    /// as `false`.
    pub async fn execute(&mut self, sql: &str) -> DbResult<bool> {
        let engine = self.engine();
        debug!(engine = %engine, sql = %sql, "Executing statement");

        match statement::scan_transaction_control(sql, engine) {
            ControlScan::None => {}
            ControlScan::Only(control) => {
                self.apply_control(control).await?;
                return Ok(false);
            }
            ControlScan::Mixed => {
                return Err(DbError::invalid_input(
                    "Transaction control statements must be executed on their own",
                ));
            }
        }

        let outcome = self.ready("execute").await?.execute(sql).await?;

        debug!(
            rows_returned = outcome.rows_returned,
            rows_affected = outcome.rows_affected,
            "Statement finished"
        );
        Ok(outcome.produced_rows() || statement::yields_result_set(sql, engine))
    }

    /// Run a query and walk its cursor to the end without decoding anything.
    ///
    /// Column driver types are inspected for every column but the last; the
    /// cursor is always drained and released.
    pub async fn execute_select(&mut self, sql: &str) -> DbResult<()> {
        debug!(engine = %self.engine(), sql = %sql, "Draining query");
        let visited = self.ready("execute select").await?.drain_select(sql).await?;
        debug!(rows = visited, "Query drained");
        Ok(())
    }

    /// Check whether a table or view named exactly `table_name` exists in any schema.
    pub async fn does_table_exist(&mut self, table_name: &str) -> DbResult<bool> {
        let exists = self
            .ready("check table existence")
            .await?
            .table_exists(table_name)
            .await?;
        debug!(table = %table_name, exists, "Checked table existence");
        Ok(exists)
    }

    /// Commit the open transaction, if any.
    ///
    /// Work left behind by a cancelled [`transaction`](Self::transaction) is
    /// rolled back instead of committed.
    pub async fn commit(&mut self) -> DbResult<()> {
        self.physical_mut("commit")?;
        self.settle_abandoned_scope().await?;

        let open = self.database.in_transaction();
        let physical = self.physical_mut("commit")?;
        if !open {
            return Ok(());
        }
        physical.commit().await?;
        self.database.mark_committed();
        debug!(engine = %self.engine(), "Transaction committed");
        Ok(())
    }

    /// Roll back the open transaction, if any.
    ///
    /// The session treats the transaction as finished even if the server
    /// reports an error; a failed rollback leaves nothing worth keeping.
    pub async fn rollback(&mut self) -> DbResult<()> {
        self.physical_mut("rollback")?;
        self.database.take_abandoned_scope();
        self.rollback_open().await
    }

    /// Run `work` as one flat transaction.
    ///
    /// On `Ok` the transaction is committed; on `Err` it is rolled back and
    /// the error is returned exactly as `work` produced it. A failed rollback
    /// is logged and never replaces the original error. If the commit itself
    /// fails, a rollback is attempted and the commit error is returned.
    ///
    /// Calling `transaction` from inside `work` fails with
    /// [`DbError::NestedTransaction`] without touching the outer transaction.
    /// There is no retry.
    ///
    /// If the returned future is dropped early, for instance by a timeout,
    /// nothing is committed and the next operation on the handle rolls the
    /// partial work back.
    pub async fn transaction<T, E, F>(&mut self, work: F) -> Result<T, E>
    where
        F: AsyncFnOnce(&mut Connection) -> Result<T, E>,
        E: From<DbError>,
    {
        self.physical_mut("run transaction")?;
        self.settle_abandoned_scope().await?;
        let scope = self.database.enter_scope()?;

        let outcome = work(&mut *self).await;
        let result = match outcome {
            Ok(value) => match self.commit().await {
                Ok(()) => Ok(value),
                Err(commit_err) => {
                    warn!(engine = %self.engine(), error = %commit_err, "Commit failed, rolling back");
                    self.rollback_quietly().await;
                    Err(commit_err.into())
                }
            },
            Err(e) => {
                self.rollback_quietly().await;
                warn!(engine = %self.engine(), rolled_back = true, "Transaction failed");
                Err(e)
            }
        };

        self.database.exit_scope(scope);
        result
    }

    /// Release the physical connection. Calling this again is a no-op.
    ///
    /// An open transaction is discarded; the server rolls it back when the
    /// session ends. Close failures are logged, never raised.
    pub async fn close(&mut self) {
        let engine = self.engine();
        let Some(physical) = self.physical.take() else {
            debug!(engine = %engine, "Connection already closed");
            return;
        };

        if self.database.in_transaction() {
            debug!(engine = %engine, "Closing with an open transaction");
        }
        physical.close().await;
        info!(engine = %engine, "Connection closed");
    }

    async fn apply_control(&mut self, control: TransactionControl) -> DbResult<()> {
        if self.database.in_scope() {
            return Err(DbError::invalid_input(
                "Transaction boundaries inside a transaction scope are managed by the scope",
            ));
        }
        match control {
            TransactionControl::Begin => self.ready("begin").await.map(|_| ()),
            TransactionControl::Commit => self.commit().await,
            TransactionControl::Rollback => self.rollback().await,
        }
    }

    async fn rollback_open(&mut self) -> DbResult<()> {
        let open = self.database.in_transaction();
        let physical = self.physical_mut("rollback")?;
        if !open {
            return Ok(());
        }
        let result = physical.rollback().await;
        self.database.mark_rolled_back();
        debug!(engine = %self.engine(), ok = result.is_ok(), "Transaction rolled back");
        result
    }

    async fn rollback_quietly(&mut self) {
        if let Err(e) = self.rollback().await {
            warn!(engine = %self.engine(), error = %e, "Rollback failed");
        }
    }

    /// Roll back whatever a cancelled `transaction` scope left open.
    async fn settle_abandoned_scope(&mut self) -> DbResult<()> {
        if self.database.take_abandoned_scope() {
            warn!(engine = %self.engine(), "Discarding work of a cancelled transaction");
            self.rollback_open().await?;
        }
        Ok(())
    }

    fn physical_mut(&mut self, operation: &str) -> DbResult<&mut IsolationShield> {
        self.physical
            .as_mut()
            .ok_or_else(|| DbError::connection_closed(operation))
    }

    /// Get the physical connection, opening a transaction first if the
    /// session requires one.
    async fn ready(&mut self, operation: &str) -> DbResult<&mut IsolationShield> {
        self.physical_mut(operation)?;
        self.settle_abandoned_scope().await?;

        let engine = self.engine();
        let physical = self
            .physical
            .as_mut()
            .ok_or_else(|| DbError::connection_closed(operation))?;

        if self.database.needs_begin() {
            physical.begin().await?;
            debug!(engine = %engine, "Transaction opened");
        }
        self.database.mark_begun();
        Ok(physical)
    }
}
