//! Data models for the SQL session manager.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod engine;

// Re-export commonly used types
pub use connection::{AUTO_RECONNECT_OPTION, ConnectionConfig};
pub use engine::{EngineKind, IsolationLevel};
