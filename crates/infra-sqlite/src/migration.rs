// Migration Runner

use jobpool_core::error::{AppError, Result};
use sqlx::SqlitePool;
use tracing::info;

/// Ordered schema migrations; each file records its own version row
const MIGRATIONS: &[(i64, &str, &str)] = &[(
    1,
    "Initial schema",
    include_str!("../migrations/001_initial_schema.sql"),
)];

/// Run database migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    info!("Running database migrations...");

    let current_version = current_version(pool).await?;
    info!(current_version, "Current schema version");

    for (version, name, sql) in MIGRATIONS {
        if current_version < *version {
            info!(version, name, "Applying migration");
            apply_migration(pool, sql)
                .await
                .map_err(|e| AppError::Database(format!("migration {} failed: {}", version, e)))?;
        }
    }

    info!("All migrations applied successfully");
    Ok(())
}

async fn current_version(pool: &SqlitePool) -> Result<i64> {
    let table_exists: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='schema_version'",
    )
    .fetch_one(pool)
    .await
    .map_err(|e| AppError::Database(e.to_string()))?;

    if table_exists == 0 {
        return Ok(0);
    }

    let version: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
        .fetch_one(pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;
    Ok(version.unwrap_or(0))
}

/// Statements of a migration script, with `--` comment lines stripped
fn sql_statements(script: &str) -> impl Iterator<Item = String> + '_ {
    script
        .split(';')
        .map(|chunk| {
            chunk
                .lines()
                .filter(|line| !line.trim_start().starts_with("--"))
                .collect::<Vec<_>>()
                .join("\n")
                .trim()
                .to_string()
        })
        .filter(|statement| !statement.is_empty())
}

/// All statements of one migration commit together or not at all
async fn apply_migration(pool: &SqlitePool, script: &str) -> std::result::Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    for statement in sql_statements(script) {
        sqlx::query(&statement).execute(&mut *tx).await?;
    }
    tx.commit().await
}
