//! Logical session.
//!
//! The session is the bookkeeping half of a connection handle: whether the
//! connection commits per statement, whether a transaction is currently open
//! on the server, and whether a declarative `transaction` scope is running.
//! It never touches the wire itself.
//!
//! A scope is tracked through a [`ScopeToken`] owned by the running
//! `transaction` future. If that future is dropped before it finishes, the
//! token goes with it and the session sees the scope as abandoned; the
//! connection then rolls back the scope's work before doing anything else.

use crate::error::{DbError, DbResult};
use crate::models::EngineKind;
use std::sync::{Arc, Weak};

/// Proof that a `transaction` scope is running.
#[must_use]
#[derive(Debug)]
pub(crate) struct ScopeToken(Arc<()>);

#[derive(Debug)]
pub struct Session {
    engine: EngineKind,
    auto_commit: bool,
    /// The server itself is in manual-commit mode and opens transactions on its own.
    server_manual_commit: bool,
    open_transaction: bool,
    scope: Option<Weak<()>>,
    commits: u64,
    rollbacks: u64,
}

impl Session {
    /// A session over a connection that still commits every statement itself.
    pub(crate) fn new(engine: EngineKind) -> Self {
        Self {
            engine,
            auto_commit: true,
            server_manual_commit: false,
            open_transaction: false,
            scope: None,
            commits: 0,
            rollbacks: 0,
        }
    }

    pub fn engine(&self) -> EngineKind {
        self.engine
    }

    /// True while every statement commits individually.
    pub fn auto_commit(&self) -> bool {
        self.auto_commit
    }

    /// True while a server-side transaction is open and undecided.
    pub fn in_transaction(&self) -> bool {
        self.open_transaction
    }

    /// True while a `transaction` scope is running.
    pub fn in_scope(&self) -> bool {
        self.scope.as_ref().is_some_and(|scope| scope.strong_count() > 0)
    }

    /// Number of commits issued through this session.
    pub fn commits(&self) -> u64 {
        self.commits
    }

    /// Number of rollbacks issued through this session.
    pub fn rollbacks(&self) -> u64 {
        self.rollbacks
    }

    /// Stop committing per statement.
    ///
    /// `on_server` is true when the server session was switched to manual
    /// commit as well. Such a server starts a new transaction by itself after
    /// every boundary, including the implicit commits some DDL performs, so no
    /// explicit `BEGIN` is ever sent.
    pub(crate) fn disable_auto_commit(&mut self, on_server: bool) {
        self.auto_commit = false;
        self.server_manual_commit = on_server;
    }

    /// An explicit `BEGIN` must be sent before the next statement.
    pub(crate) fn needs_begin(&self) -> bool {
        !self.auto_commit && !self.server_manual_commit && !self.open_transaction
    }

    /// Record that a statement is about to run inside the current transaction.
    pub(crate) fn mark_begun(&mut self) {
        if !self.auto_commit {
            self.open_transaction = true;
        }
    }

    pub(crate) fn mark_committed(&mut self) {
        self.open_transaction = false;
        self.commits += 1;
    }

    pub(crate) fn mark_rolled_back(&mut self) {
        self.open_transaction = false;
        self.rollbacks += 1;
    }

    /// Enter a declarative scope. Scopes do not nest.
    ///
    /// An abandoned scope must be cleared with
    /// [`take_abandoned_scope`](Self::take_abandoned_scope) first.
    pub(crate) fn enter_scope(&mut self) -> DbResult<ScopeToken> {
        if self.in_scope() {
            return Err(DbError::NestedTransaction);
        }
        let token = Arc::new(());
        self.scope = Some(Arc::downgrade(&token));
        Ok(ScopeToken(token))
    }

    pub(crate) fn exit_scope(&mut self, token: ScopeToken) {
        let current = Arc::downgrade(&token.0);
        if self.scope.as_ref().is_some_and(|scope| scope.ptr_eq(&current)) {
            self.scope = None;
        }
    }

    /// Clear a scope whose token was dropped without exiting.
    ///
    /// Returns true exactly once per abandoned scope.
    pub(crate) fn take_abandoned_scope(&mut self) -> bool {
        if self.scope.as_ref().is_some_and(|scope| scope.strong_count() == 0) {
            self.scope = None;
            return true;
        }
        false
    }
}
