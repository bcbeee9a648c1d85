//! SQLite schema bootstrap.

use anyhow::Result;
use sqlx::SqlitePool;

/// Schema applied by `--migrate` and by tests on in-memory databases.
const INIT_SQL: &str = include_str!("../migrations/0001_init.sql");

/// Run SQLite migrations manually from the embedded SQL file.
pub async fn run_migrations(db: &SqlitePool) -> Result<()> {
    let statements = INIT_SQL
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::info!("Running {} migration statements...", statements.len());

    for stmt in statements {
        tracing::debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(db).await?;
    }

    Ok(())
}

#[cfg(test)]
pub async fn memory_pool() -> SqlitePool {
    use sqlx::sqlite::SqlitePoolOptions;

    // One connection: every connection to `sqlite::memory:` is its own database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    run_migrations(&pool).await.unwrap();
    pool
}

/// File-backed pool with several connections, for tests that race writers.
#[cfg(test)]
pub async fn file_pool(path: &std::path::Path) -> SqlitePool {
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use std::time::Duration;

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(5));
    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
        .unwrap();
    run_migrations(&pool).await.unwrap();
    pool
}
