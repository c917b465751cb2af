// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and backends for the correlation store.
//!
//! The store is the single source of truth for which connection should receive
//! the result of which execution. Every operation is a single-key upsert, a
//! single-key read, or a scan by connection; there are no multi-key
//! transactions and no in-process caching.

pub mod postgres;
pub mod sqlite;

pub use self::postgres::PostgresCorrelationStore;
pub use self::sqlite::SqliteCorrelationStore;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use crate::error::HandoffError;
use crate::migrations;

/// Maximum number of keys removed by a single delete statement during a sweep.
pub const SWEEP_CHUNK_SIZE: usize = 256;

/// Correlation record from the persistence layer.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct CorrelationRecord {
    /// Execution id assigned by the orchestrator.
    pub correlation_id: String,
    /// Connection currently bound to the execution, `None` while pending.
    pub connection_id: Option<String>,
    /// When the record was first written.
    pub created_at: DateTime<Utc>,
    /// When the binding last changed.
    pub updated_at: DateTime<Utc>,
}

impl CorrelationRecord {
    /// Whether a connection has been bound to this record.
    pub fn is_bound(&self) -> bool {
        self.connection_id.is_some()
    }
}

/// Durable correlation id to connection id mapping.
#[allow(missing_docs)]
#[async_trait]
pub trait CorrelationStore: Send + Sync {
    /// Create a pending record unless one already exists.
    ///
    /// Never clears a connection bound by an earlier connect event.
    async fn register_pending(&self, correlation_id: &str) -> Result<(), HandoffError>;

    /// Bind `connection_id` to `correlation_id`, creating the record if needed.
    ///
    /// Last write wins.
    async fn bind_connection(
        &self,
        correlation_id: &str,
        connection_id: &str,
    ) -> Result<(), HandoffError>;

    async fn get_correlation(
        &self,
        correlation_id: &str,
    ) -> Result<Option<CorrelationRecord>, HandoffError>;

    /// Correlation ids currently bound to `connection_id`.
    async fn list_by_connection(&self, connection_id: &str) -> Result<Vec<String>, HandoffError>;

    /// Delete the given records, skipping any no longer bound to `connection_id`.
    ///
    /// Returns the number of rows removed. Deletes run in chunks of
    /// [`SWEEP_CHUNK_SIZE`]; a failed chunk is logged and the rest still run,
    /// so rows removed before a failure are counted. Errors only when no row
    /// was removed and at least one chunk failed.
    async fn delete_bound(
        &self,
        connection_id: &str,
        correlation_ids: &[String],
    ) -> Result<u64, HandoffError>;

    /// Cheap connectivity probe.
    async fn health_check_db(&self) -> Result<bool, HandoffError>;
}

/// Open a store for `database_url` and apply migrations.
///
/// `postgres://` and `postgresql://` select PostgreSQL, `sqlite:` selects
/// SQLite (the file is created when missing). In-memory SQLite is held on one
/// connection that is never idled out or recycled, so every query sees the
/// same database for the life of the pool.
pub async fn connect(
    database_url: &str,
    max_connections: u32,
    acquire_timeout: Duration,
) -> Result<Arc<dyn CorrelationStore>, HandoffError> {
    if database_url.starts_with("postgres://") || database_url.starts_with("postgresql://") {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await
            .map_err(|e| HandoffError::store("connect", e))?;
        migrations::run_postgres(&pool).await?;
        return Ok(Arc::new(PostgresCorrelationStore::new(pool)));
    }

    if database_url.starts_with("sqlite:") {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| HandoffError::store("connect", e))?
            .create_if_missing(true);
        let pool = sqlite_pool_options(database_url, max_connections, acquire_timeout)
            .connect_with(options)
            .await
            .map_err(|e| HandoffError::store("connect", e))?;
        migrations::run_sqlite(&pool).await?;
        return Ok(Arc::new(SqliteCorrelationStore::new(pool)));
    }

    Err(HandoffError::ValidationError {
        field: "database_url".to_string(),
        message: "expected a postgres:// or sqlite: URL".to_string(),
    })
}

fn sqlite_pool_options(
    database_url: &str,
    max_connections: u32,
    acquire_timeout: Duration,
) -> SqlitePoolOptions {
    let options = SqlitePoolOptions::new().acquire_timeout(acquire_timeout);
    // The database lives only as long as its single connection
    if database_url.contains(":memory:") {
        options
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        options.max_connections(max_connections)
    }
}
