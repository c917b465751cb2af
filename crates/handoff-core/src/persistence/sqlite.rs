//! SQLite-backed correlation store.

use std::path::Path;

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::warn;

use crate::error::HandoffError;
use crate::migrations;

use super::{CorrelationRecord, CorrelationStore, SWEEP_CHUNK_SIZE};

/// SQLite-backed correlation store.
#[derive(Clone)]
pub struct SqliteCorrelationStore {
    pool: SqlitePool,
}

impl SqliteCorrelationStore {
    /// Create a new store from an existing pool.
    ///
    /// The pool must already have the schema applied (see [`crate::migrations`]).
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create and initialize a store from a file path.
    ///
    /// Creates parent directories and the database file when missing, then runs
    /// all migrations.
    ///
    /// ```ignore
    /// let store = SqliteCorrelationStore::from_path(".data/handoff.db").await?;
    /// ```
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, HandoffError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    HandoffError::store(
                        "create_dir",
                        format!("Failed to create directory {:?}: {}", parent, e),
                    )
                })?;
            }
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| {
                HandoffError::store(
                    "connect",
                    format!("Failed to connect to SQLite at {:?}: {}", path, e),
                )
            })?;

        migrations::run_sqlite(&pool).await?;

        Ok(Self { pool })
    }

    /// The underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl CorrelationStore for SqliteCorrelationStore {
    async fn register_pending(&self, correlation_id: &str) -> Result<(), HandoffError> {
        sqlx::query(
            r#"
            INSERT INTO correlations (correlation_id, connection_id, created_at, updated_at)
            VALUES (?, NULL, CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)
            ON CONFLICT(correlation_id) DO NOTHING
            "#,
        )
        .bind(correlation_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn bind_connection(
        &self,
        correlation_id: &str,
        connection_id: &str,
    ) -> Result<(), HandoffError> {
        sqlx::query(
            r#"
            INSERT INTO correlations (correlation_id, connection_id, created_at, updated_at)
            VALUES (?, ?, CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)
            ON CONFLICT(correlation_id) DO UPDATE SET
                connection_id=excluded.connection_id,
                updated_at=excluded.updated_at
            "#,
        )
        .bind(correlation_id)
        .bind(connection_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_correlation(
        &self,
        correlation_id: &str,
    ) -> Result<Option<CorrelationRecord>, HandoffError> {
        let record = sqlx::query_as::<_, CorrelationRecord>(
            r#"
            SELECT correlation_id, connection_id, created_at, updated_at
            FROM correlations
            WHERE correlation_id = ?
            "#,
        )
        .bind(correlation_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn list_by_connection(&self, connection_id: &str) -> Result<Vec<String>, HandoffError> {
        let ids = sqlx::query_scalar::<_, String>(
            r#"
            SELECT correlation_id
            FROM correlations
            WHERE connection_id = ?
            ORDER BY correlation_id
            "#,
        )
        .bind(connection_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    async fn delete_bound(
        &self,
        connection_id: &str,
        correlation_ids: &[String],
    ) -> Result<u64, HandoffError> {
        let mut deleted = 0;
        let mut failure = None;

        for chunk in correlation_ids.chunks(SWEEP_CHUNK_SIZE) {
            let mut builder: QueryBuilder<Sqlite> =
                QueryBuilder::new("DELETE FROM correlations WHERE connection_id = ");
            builder.push_bind(connection_id);
            builder.push(" AND correlation_id IN (");
            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(id.as_str());
            }
            separated.push_unseparated(")");

            match builder.build().execute(&self.pool).await {
                Ok(result) => deleted += result.rows_affected(),
                Err(e) => {
                    warn!(
                        connection_id,
                        chunk_len = chunk.len(),
                        error = %e,
                        "Failed to delete correlation chunk"
                    );
                    failure = Some(e);
                }
            }
        }

        match failure {
            Some(e) if deleted == 0 => Err(e.into()),
            _ => Ok(deleted),
        }
    }

    async fn health_check_db(&self) -> Result<bool, HandoffError> {
        let row: (i64,) = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await?;
        Ok(row.0 == 1)
    }
}
