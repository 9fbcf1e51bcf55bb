//! PostgreSQL migration runner.
//!
//! Each entry of [`POSTGRES_MIGRATIONS`] is applied once inside a transaction
//! and recorded in `_migrations` together with a SHA-256 of its SQL. A
//! recorded migration whose SQL has since changed is reported as drift
//! instead of being silently skipped.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use thiserror::Error;

use super::schema::POSTGRES_MIGRATIONS;

/// Errors that can occur during migration operations.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration script failed to execute.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// A recorded migration no longer matches the SQL shipped with this build.
    #[error("Migration {name} was applied with checksum {recorded}, current SQL hashes to {current}")]
    ChecksumMismatch {
        name: String,
        recorded: String,
        current: String,
    },
}

/// Record of an applied migration.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct AppliedMigration {
    pub name: String,
    pub checksum: String,
    pub applied_at: DateTime<Utc>,
}

/// Hex SHA-256 of a migration's SQL, ignoring surrounding whitespace.
pub fn migration_checksum(sql: &str) -> String {
    hex::encode(Sha256::digest(sql.trim().as_bytes()))
}

/// Migrations from `catalog` that are not yet in `applied`.
///
/// Fails on the first applied migration whose checksum differs from the
/// catalog's SQL.
pub fn pending_migrations<'a>(
    catalog: &'a [(&'a str, &'a str)],
    applied: &[AppliedMigration],
) -> Result<Vec<(&'a str, &'a str)>, MigrationError> {
    let mut pending = Vec::new();
    for &(name, sql) in catalog {
        match applied.iter().find(|m| m.name == name) {
            Some(recorded) => {
                let current = migration_checksum(sql);
                if recorded.checksum != current {
                    return Err(MigrationError::ChecksumMismatch {
                        name: name.to_string(),
                        recorded: recorded.checksum.clone(),
                        current,
                    });
                }
            }
            None => pending.push((name, sql)),
        }
    }
    Ok(pending)
}

/// Applies the report schema to a PostgreSQL pool.
pub struct MigrationRunner {
    pool: PgPool,
}

impl MigrationRunner {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply every pending migration and return the names applied by this call.
    pub async fn run_migrations(&self) -> Result<Vec<String>, MigrationError> {
        self.ensure_migrations_table().await?;

        let applied = self.list_applied_migrations().await?;
        let pending = pending_migrations(&POSTGRES_MIGRATIONS, &applied)?;
        if pending.is_empty() {
            tracing::debug!(recorded = applied.len(), "Schema is up to date");
            return Ok(Vec::new());
        }

        let mut names = Vec::with_capacity(pending.len());
        for (name, sql) in pending {
            self.apply_migration(name, sql).await?;
            tracing::info!(migration = name, "Applied migration");
            names.push(name.to_string());
        }
        Ok(names)
    }

    async fn ensure_migrations_table(&self) -> Result<(), MigrationError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                name VARCHAR(255) PRIMARY KEY,
                checksum CHAR(64) NOT NULL,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn apply_migration(&self, name: &str, sql: &str) -> Result<(), MigrationError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(sql)
            .execute(&mut *tx)
            .await
            .map_err(|e| MigrationError::MigrationFailed(format!("{}: {}", name, e)))?;

        sqlx::query("INSERT INTO _migrations (name, checksum) VALUES ($1, $2)")
            .bind(name)
            .bind(migration_checksum(sql))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Recorded migrations, oldest first.
    pub async fn list_applied_migrations(&self) -> Result<Vec<AppliedMigration>, MigrationError> {
        self.ensure_migrations_table().await?;

        let migrations = sqlx::query_as::<_, AppliedMigration>(
            "SELECT name, checksum, applied_at FROM _migrations ORDER BY applied_at, name",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(migrations)
    }
}
