//! Engine kinds and engine-specific SQL dialect facts.

use serde::{Deserialize, Serialize};

/// Supported database engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    PostgreSQL,
    /// Includes MariaDB
    MySQL,
    SQLite,
    Oracle,
}

impl EngineKind {
    /// Parse the engine from a URL scheme.
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Some(Self::PostgreSQL),
            "mysql" | "mariadb" => Some(Self::MySQL),
            "sqlite" => Some(Self::SQLite),
            "oracle" => Some(Self::Oracle),
            _ => None,
        }
    }

    /// Get the display name for this engine.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "PostgreSQL",
            Self::MySQL => "MySQL",
            Self::SQLite => "SQLite",
            Self::Oracle => "Oracle",
        }
    }

    /// Get the default port for this engine.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::PostgreSQL => Some(5432),
            Self::MySQL => Some(3306),
            Self::Oracle => Some(1521),
            Self::SQLite => None,
        }
    }

    /// The trivial statement used to confirm a fresh connection is usable.
    ///
    /// Oracle has no FROM-less SELECT and needs the `DUAL` table.
    pub fn liveness_probe(&self) -> &'static str {
        match self {
            Self::Oracle => "SELECT 1 FROM DUAL;",
            _ => "SELECT 1;",
        }
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Transaction isolation levels a caller may request.
///
/// Requests are accepted and discarded by the connection; see
/// [`IsolationShield`](crate::db::IsolationShield).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}
