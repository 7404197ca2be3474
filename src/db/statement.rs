//! Statement classification and column inspection.
//!
//! `execute` reports whether a statement produced a result set. Rows seen on
//! the wire settle it, but a query that matches nothing yields no rows, so the
//! SQL is also parsed with [sqlparser](https://docs.rs/sqlparser/) to recognise
//! result-producing statements.

use crate::models::EngineKind;
use sqlparser::ast::Statement;
use sqlparser::dialect::{Dialect, GenericDialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::parser::Parser;
use std::ops::Range;

/// What a raw statement did on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatementOutcome {
    /// Rows streamed back across all result sets.
    pub rows_returned: u64,
    /// Update counts summed across all statements.
    pub rows_affected: u64,
}

impl StatementOutcome {
    pub fn produced_rows(&self) -> bool {
        self.rows_returned > 0
    }
}

/// Get the appropriate SQL dialect for the given engine.
fn get_dialect(engine: EngineKind) -> Box<dyn Dialect> {
    match engine {
        EngineKind::PostgreSQL => Box::new(PostgreSqlDialect {}),
        EngineKind::MySQL => Box::new(MySqlDialect {}),
        EngineKind::SQLite => Box::new(SQLiteDialect {}),
        EngineKind::Oracle => Box::new(GenericDialect {}),
    }
}

/// A statement that opens or ends a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionControl {
    Begin,
    Commit,
    Rollback,
}

/// Transaction boundaries found in a piece of raw SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlScan {
    /// No boundary statement, or the SQL could not be parsed.
    None,
    /// The SQL is exactly one boundary statement.
    Only(TransactionControl),
    /// A boundary statement is mixed with other statements.
    Mixed,
}

/// Look for `BEGIN`, `COMMIT` or `ROLLBACK` in `sql`.
///
/// `ROLLBACK TO SAVEPOINT` stays inside the transaction and is not a boundary.
pub fn scan_transaction_control(sql: &str, engine: EngineKind) -> ControlScan {
    let dialect = get_dialect(engine);
    let Ok(statements) = Parser::parse_sql(dialect.as_ref(), sql) else {
        return ControlScan::None;
    };

    let controls: Vec<TransactionControl> =
        statements.iter().filter_map(transaction_control).collect();
    match (controls.as_slice(), statements.len()) {
        ([], _) => ControlScan::None,
        ([control], 1) => ControlScan::Only(*control),
        _ => ControlScan::Mixed,
    }
}

fn transaction_control(stmt: &Statement) -> Option<TransactionControl> {
    match stmt {
        Statement::StartTransaction { .. } => Some(TransactionControl::Begin),
        Statement::Commit { .. } => Some(TransactionControl::Commit),
        Statement::Rollback {
            savepoint: None, ..
        } => Some(TransactionControl::Rollback),
        _ => None,
    }
}

/// Check whether the first statement in `sql` is one that yields a result set.
///
/// Unparseable SQL is reported as not producing one; the caller then relies on
/// what the driver actually streamed back.
pub fn yields_result_set(sql: &str, engine: EngineKind) -> bool {
    let dialect = get_dialect(engine);
    match Parser::parse_sql(dialect.as_ref(), sql) {
        Ok(statements) => statements.first().is_some_and(is_result_statement),
        Err(_) => false,
    }
}

fn is_result_statement(stmt: &Statement) -> bool {
    matches!(
        stmt,
        Statement::Query(_)
            | Statement::ShowTables { .. }
            | Statement::ShowColumns { .. }
            | Statement::ShowDatabases { .. }
            | Statement::ShowSchemas { .. }
            | Statement::ShowCreate { .. }
            | Statement::ShowFunctions { .. }
            | Statement::ShowVariable { .. }
            | Statement::ShowVariables { .. }
            | Statement::ShowStatus { .. }
            | Statement::ShowCollation { .. }
            | Statement::ExplainTable { .. }
            | Statement::Explain { .. }
    )
}

/// Coarse driver-type categories recognised while walking a cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Date,
    BigInt,
    Binary,
    Bit,
    Other,
}

impl ColumnKind {
    /// Classify a driver type name (`TypeInfo::name()`), e.g. `INT8` or `BIGINT`.
    pub fn from_type_name(name: &str) -> Self {
        match name.to_ascii_uppercase().as_str() {
            "DATE" => Self::Date,
            "BIGINT" | "INT8" | "BIGINT UNSIGNED" => Self::BigInt,
            "BINARY" | "VARBINARY" | "BYTEA" | "BLOB" => Self::Binary,
            "BIT" | "VARBIT" => Self::Bit,
            _ => Self::Other,
        }
    }
}

/// Column indices inspected per row by `execute_select`.
///
/// The final column is never inspected.
pub fn inspected_columns(column_count: usize) -> Range<usize> {
    0..column_count.saturating_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_yields_result_set() {
        assert!(yields_result_set("SELECT 1;", EngineKind::PostgreSQL));
        assert!(yields_result_set(
            "SELECT * FROM users WHERE id = 42",
            EngineKind::MySQL
        ));
        assert!(yields_result_set(
            "WITH t AS (SELECT 1) SELECT * FROM t",
            EngineKind::SQLite
        ));
    }

    #[test]
    fn test_show_and_explain_yield_result_set() {
        assert!(yields_result_set("SHOW TABLES", EngineKind::MySQL));
        assert!(yields_result_set(
            "EXPLAIN SELECT * FROM users",
            EngineKind::PostgreSQL
        ));
    }

    #[test]
    fn test_writes_do_not_yield_result_set() {
        assert!(!yields_result_set(
            "INSERT INTO users (id) VALUES (1)",
            EngineKind::PostgreSQL
        ));
        assert!(!yields_result_set(
            "CREATE TABLE t (id INTEGER)",
            EngineKind::SQLite
        ));
        assert!(!yields_result_set("DELETE FROM t", EngineKind::MySQL));
    }

    #[test]
    fn test_unparseable_sql_does_not_yield_result_set() {
        assert!(!yields_result_set("THIS IS NOT SQL", EngineKind::PostgreSQL));
        assert!(!yields_result_set("", EngineKind::PostgreSQL));
    }

    #[test]
    fn test_first_statement_decides() {
        assert!(!yields_result_set(
            "UPDATE t SET a = 1; SELECT * FROM t",
            EngineKind::SQLite
        ));
    }

    #[test]
    fn test_scan_single_boundary() {
        assert_eq!(
            scan_transaction_control("COMMIT", EngineKind::PostgreSQL),
            ControlScan::Only(TransactionControl::Commit)
        );
        assert_eq!(
            scan_transaction_control("ROLLBACK;", EngineKind::SQLite),
            ControlScan::Only(TransactionControl::Rollback)
        );
        assert_eq!(
            scan_transaction_control("START TRANSACTION", EngineKind::MySQL),
            ControlScan::Only(TransactionControl::Begin)
        );
        assert_eq!(
            scan_transaction_control("BEGIN", EngineKind::PostgreSQL),
            ControlScan::Only(TransactionControl::Begin)
        );
    }

    #[test]
    fn test_scan_mixed_boundary() {
        assert_eq!(
            scan_transaction_control("INSERT INTO t VALUES (1); COMMIT", EngineKind::SQLite),
            ControlScan::Mixed
        );
    }

    #[test]
    fn test_scan_ignores_ordinary_sql() {
        assert_eq!(
            scan_transaction_control("SELECT 1;", EngineKind::PostgreSQL),
            ControlScan::None
        );
        assert_eq!(
            scan_transaction_control("ROLLBACK TO SAVEPOINT sp", EngineKind::PostgreSQL),
            ControlScan::None
        );
        assert_eq!(
            scan_transaction_control("THIS IS NOT SQL", EngineKind::MySQL),
            ControlScan::None
        );
    }

    #[test]
    fn test_column_kind_from_type_name() {
        assert_eq!(ColumnKind::from_type_name("DATE"), ColumnKind::Date);
        assert_eq!(ColumnKind::from_type_name("INT8"), ColumnKind::BigInt);
        assert_eq!(ColumnKind::from_type_name("BIGINT"), ColumnKind::BigInt);
        assert_eq!(ColumnKind::from_type_name("bytea"), ColumnKind::Binary);
        assert_eq!(ColumnKind::from_type_name("BIT"), ColumnKind::Bit);
        assert_eq!(ColumnKind::from_type_name("TEXT"), ColumnKind::Other);
    }

    #[test]
    fn test_inspected_columns_skip_last() {
        assert_eq!(inspected_columns(3), 0..2);
        assert_eq!(inspected_columns(1), 0..0);
        assert_eq!(inspected_columns(0), 0..0);
    }

    #[test]
    fn test_outcome_produced_rows() {
        assert!(!StatementOutcome::default().produced_rows());
        let outcome = StatementOutcome {
            rows_returned: 2,
            rows_affected: 0,
        };
        assert!(outcome.produced_rows());
    }
}
