use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use common::config::DatabaseConfig;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::sqlite::{self, SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::info;

use crate::error::LedgerError;
use crate::ledger::LedgerStore;
use crate::repositories::{PostgresLedger, SqliteLedger};

const SQLITE_SCHEMA: &str = include_str!("../../../sql/sqlite_schema.sql");
const POSTGRES_SCHEMA: &str = include_str!("../../../sql/postgres_schema.sql");

/// Opens the configured backend, applies its schema and returns it behind the common interface.
pub async fn connect_ledger(config: &DatabaseConfig) -> Result<Arc<dyn LedgerStore>, LedgerError> {
    info!("Initializing {} ledger store...", config.kind().to_uppercase());
    let store: Arc<dyn LedgerStore> = match config {
        DatabaseConfig::Sqlite { path } => Arc::new(SqliteLedger::new(get_sqlite_pool(path).await?)),
        DatabaseConfig::Postgres {
            host,
            port,
            name,
            user,
            password,
        } => {
            let options = PgConnectOptions::new()
                .host(host)
                .port(*port)
                .database(name)
                .username(user)
                .password(password);
            Arc::new(PostgresLedger::new(get_postgres_pool(options).await?))
        }
    };
    Ok(store)
}

pub async fn get_sqlite_pool(path: &Path) -> Result<SqlitePool, LedgerError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlite::SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(30))
        .statement_cache_capacity(100);

    let pool = SqlitePool::connect_with(options).await?;
    sqlx::raw_sql(SQLITE_SCHEMA).execute(&pool).await?;
    info!("Using SQLite ledger at {}", path.display());
    Ok(pool)
}

/// Private in-memory database. One connection that never expires, so the data lives as long as the pool.
pub async fn get_sqlite_memory_pool() -> Result<SqlitePool, LedgerError> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;
    sqlx::raw_sql(SQLITE_SCHEMA).execute(&pool).await?;
    Ok(pool)
}

pub async fn get_postgres_pool(options: PgConnectOptions) -> Result<PgPool, LedgerError> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(options)
        .await?;
    sqlx::raw_sql(POSTGRES_SCHEMA).execute(&pool).await?;
    info!("Successfully connected to PostgreSQL ledger");
    Ok(pool)
}
