//! sql-session - Main entry point.
//!
//! Opens one connection, runs the given SQL in a single transaction, reports
//! on the requested tables, and closes the connection.

use sql_session::config::Config;
use sql_session::db::{Connection, ConnectionManager};
use sql_session::error::{DbError, DbResult};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

async fn run_statements(conn: &mut Connection, statements: &[String]) -> DbResult<()> {
    for sql in statements {
        let result_set = conn.execute(sql).await?;
        println!("ok\tresult_set={result_set}\t{sql}");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse_args();

    // Initialize logging
    init_tracing(&config);

    let conn_config = config.connection_config()?;
    info!(
        database = %conn_config.masked(),
        "Starting sql-session v{}",
        env!("CARGO_PKG_VERSION")
    );

    let manager = ConnectionManager::new();
    let result = manager
        .with_connection(&conn_config, async |conn| {
            if !config.execute.is_empty() {
                if config.commit {
                    conn.transaction(async |c| run_statements(c, &config.execute).await)
                        .await?;
                    println!("committed");
                } else {
                    // Roll back on success too; the session never commits on its own.
                    let outcome = run_statements(conn, &config.execute).await;
                    conn.rollback().await?;
                    outcome?;
                    println!("rolled back (pass --commit to keep changes)");
                }
            }

            for table in &config.check_tables {
                let exists = conn.does_table_exist(table).await?;
                println!("table\t{table}\texists={exists}");
            }
            Ok::<_, DbError>(())
        })
        .await;

    if let Err(e) = result {
        error!(
            error = %e,
            suggestion = ?e.suggestion(),
            retryable = e.is_retryable(),
            "sql-session failed"
        );
        return Err(e.into());
    }

    info!("Connection closed");
    Ok(())
}
