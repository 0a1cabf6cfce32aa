//! # Database Migrations
//!
//! The punchsync schema (device registry, sync cursor, employee mapping,
//! attendance, quarantine, sync log) ships as numbered SQL files under
//! `migrations/sqlite/`, embedded at compile time so a fresh daemon
//! bootstraps its database on first start with no files to install.
//!
//! Schema changes get a new `NNN_description.sql` file with the next
//! number (e.g. `002_add_shift_table.sql`); applied files are never edited.

use sqlx::SqlitePool;
use tracing::info;

use crate::error::DbResult;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/sqlite");

/// Applies pending migrations in filename order.
///
/// Idempotent: already-applied files are skipped, and each migration runs
/// in its own transaction.
pub async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    info!("Checking for pending migrations");

    MIGRATOR.run(pool).await?;

    info!("All migrations applied successfully");
    Ok(())
}

/// Returns `(total, applied)` migration counts for diagnostics.
pub async fn migration_status(pool: &SqlitePool) -> DbResult<(usize, usize)> {
    let total = MIGRATOR.migrations.len();

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
        .fetch_one(pool)
        .await
        .unwrap_or(0);

    Ok((total, applied as usize))
}
