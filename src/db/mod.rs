//! Database access layer.
//!
//! This module provides the connection lifecycle:
//! - Physical driver connections and the isolation-level shield
//! - Named data sources for lookup-based acquisition
//! - The logical session that tracks transaction boundaries
//! - Connection handles (execute, transaction, introspection, close)
//! - The manager that opens handles from configuration

pub mod connection;
pub mod manager;
pub mod physical;
pub mod registry;
pub mod session;
pub mod statement;

pub use connection::Connection;
pub use manager::{Acquisition, ConnectionManager};
pub use physical::{IsolationShield, PhysicalConnection};
pub use registry::{DataSource, DataSourceRegistry};
pub use session::Session;
pub use statement::{ColumnKind, StatementOutcome, TransactionControl};
