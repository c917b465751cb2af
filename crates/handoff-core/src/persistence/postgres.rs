// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL-backed correlation store.
//!
//! Functions take the pool directly so they can be reused by tooling that does
//! not go through the trait object.

use sqlx::PgPool;
use tracing::warn;

use crate::error::HandoffError;

use super::{CorrelationRecord, CorrelationStore, SWEEP_CHUNK_SIZE};

/// PostgreSQL-backed correlation store.
#[derive(Clone)]
pub struct PostgresCorrelationStore {
    pool: PgPool,
}

impl PostgresCorrelationStore {
    /// Create a new Postgres-backed store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ============================================================================
// Correlation Operations
// ============================================================================

/// Insert a pending record, leaving an existing one untouched.
pub async fn insert_pending(pool: &PgPool, correlation_id: &str) -> Result<(), HandoffError> {
    sqlx::query(
        r#"
        INSERT INTO correlations (correlation_id, connection_id, created_at, updated_at)
        VALUES ($1, NULL, NOW(), NOW())
        ON CONFLICT (correlation_id) DO NOTHING
        "#,
    )
    .bind(correlation_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Upsert the connection bound to a correlation id.
pub async fn upsert_binding(
    pool: &PgPool,
    correlation_id: &str,
    connection_id: &str,
) -> Result<(), HandoffError> {
    sqlx::query(
        r#"
        INSERT INTO correlations (correlation_id, connection_id, created_at, updated_at)
        VALUES ($1, $2, NOW(), NOW())
        ON CONFLICT (correlation_id) DO UPDATE SET
            connection_id = EXCLUDED.connection_id,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(correlation_id)
    .bind(connection_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get a correlation record by id.
pub async fn get_correlation(
    pool: &PgPool,
    correlation_id: &str,
) -> Result<Option<CorrelationRecord>, HandoffError> {
    let record = sqlx::query_as::<_, CorrelationRecord>(
        r#"
        SELECT correlation_id, connection_id, created_at, updated_at
        FROM correlations
        WHERE correlation_id = $1
        "#,
    )
    .bind(correlation_id)
    .fetch_optional(pool)
    .await?;

    Ok(record)
}

/// List correlation ids bound to a connection.
pub async fn list_by_connection(
    pool: &PgPool,
    connection_id: &str,
) -> Result<Vec<String>, HandoffError> {
    let ids = sqlx::query_scalar::<_, String>(
        r#"
        SELECT correlation_id
        FROM correlations
        WHERE connection_id = $1
        ORDER BY correlation_id
        "#,
    )
    .bind(connection_id)
    .fetch_all(pool)
    .await?;

    Ok(ids)
}

/// Delete records still bound to `connection_id`.
///
/// A failed chunk is logged and skipped. Errors only when nothing was deleted.
pub async fn delete_bound(
    pool: &PgPool,
    connection_id: &str,
    correlation_ids: &[String],
) -> Result<u64, HandoffError> {
    let mut deleted = 0;
    let mut failure = None;

    for chunk in correlation_ids.chunks(SWEEP_CHUNK_SIZE) {
        let result = sqlx::query(
            r#"
            DELETE FROM correlations
            WHERE connection_id = $1 AND correlation_id = ANY($2)
            "#,
        )
        .bind(connection_id)
        .bind(chunk)
        .execute(pool)
        .await;

        match result {
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

#[async_trait::async_trait]
impl CorrelationStore for PostgresCorrelationStore {
    async fn register_pending(&self, correlation_id: &str) -> Result<(), HandoffError> {
        insert_pending(&self.pool, correlation_id).await
    }

    async fn bind_connection(
        &self,
        correlation_id: &str,
        connection_id: &str,
    ) -> Result<(), HandoffError> {
        upsert_binding(&self.pool, correlation_id, connection_id).await
    }

    async fn get_correlation(
        &self,
        correlation_id: &str,
    ) -> Result<Option<CorrelationRecord>, HandoffError> {
        get_correlation(&self.pool, correlation_id).await
    }

    async fn list_by_connection(&self, connection_id: &str) -> Result<Vec<String>, HandoffError> {
        list_by_connection(&self.pool, connection_id).await
    }

    async fn delete_bound(
        &self,
        connection_id: &str,
        correlation_ids: &[String],
    ) -> Result<u64, HandoffError> {
        delete_bound(&self.pool, connection_id, correlation_ids).await
    }

    async fn health_check_db(&self) -> Result<bool, HandoffError> {
        let row: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await?;
        Ok(row.0 == 1)
    }
}
