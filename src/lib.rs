//! SQL Session Library
//!
//! One connection-and-transaction lifecycle over PostgreSQL, MySQL and SQLite:
//! open a handle from configuration, execute raw SQL, run work inside a
//! transaction that commits or rolls back, check for tables, and close.

pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use config::Config;
pub use db::{Connection, ConnectionManager};
pub use error::{DbError, DbResult};
pub use models::{ConnectionConfig, EngineKind};
