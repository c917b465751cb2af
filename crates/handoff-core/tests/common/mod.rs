// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for handoff-core integration tests.
//!
//! Provides TestContext wiring a runtime to in-memory SQLite and recording
//! doubles for the orchestrator and transport.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;

use handoff_core::migrations;
use handoff_core::orchestrator::{OrchestratorError, WorkflowOrchestrator, WorkflowStart};
use handoff_core::persistence::{CorrelationStore, SqliteCorrelationStore};
use handoff_core::runtime::HandoffRuntime;
use handoff_core::transport::{PushTarget, Transport, TransportError};

pub const DELIVERY_ADDRESS: &str = "wss://host/stage";

/// Orchestrator that hands out ids from a queue, then sequential ones.
#[derive(Default)]
pub struct FakeOrchestrator {
    queued: Mutex<Vec<String>>,
    counter: AtomicU32,
    pub fail: std::sync::atomic::AtomicBool,
    pub starts: AtomicU32,
}

impl FakeOrchestrator {
    /// Make the next start return `id`.
    pub fn queue_id(&self, id: &str) {
        self.queued.lock().unwrap().insert(0, id.to_string());
    }
}

#[async_trait]
impl WorkflowOrchestrator for FakeOrchestrator {
    async fn start_execution(
        &self,
        _input: serde_json::Value,
    ) -> Result<WorkflowStart, OrchestratorError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(OrchestratorError::Unreachable("connection refused".to_string()));
        }

        let execution_id = self.queued.lock().unwrap().pop().unwrap_or_else(|| {
            format!("exec-{}", self.counter.fetch_add(1, Ordering::SeqCst) + 1)
        });
        Ok(WorkflowStart {
            execution_id,
            workflow_address: None,
        })
    }
}

/// Transport that records every push.
#[derive(Default)]
pub struct RecordingTransport {
    pushes: Mutex<Vec<(String, Vec<u8>)>>,
    gone: Mutex<HashSet<String>>,
    broken: Mutex<HashSet<String>>,
}

impl RecordingTransport {
    /// Report `connection_id` as gone from now on.
    pub fn mark_gone(&self, connection_id: &str) {
        self.gone.lock().unwrap().insert(connection_id.to_string());
    }

    /// Fail pushes to `connection_id` with a transport error.
    pub fn mark_broken(&self, connection_id: &str) {
        self.broken.lock().unwrap().insert(connection_id.to_string());
    }

    /// (connection id, payload) of every push so far.
    pub fn pushes(&self) -> Vec<(String, Vec<u8>)> {
        self.pushes.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn push(&self, target: &PushTarget, payload: &[u8]) -> Result<(), TransportError> {
        self.pushes
            .lock()
            .unwrap()
            .push((target.connection_id.clone(), payload.to_vec()));

        if self.gone.lock().unwrap().contains(&target.connection_id) {
            return Err(TransportError::Gone);
        }
        if self.broken.lock().unwrap().contains(&target.connection_id) {
            return Err(TransportError::Failed("socket reset".to_string()));
        }
        Ok(())
    }
}

/// In-memory SQLite store with migrations applied.
pub async fn memory_store() -> Arc<SqliteCorrelationStore> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to open in-memory SQLite");
    migrations::run_sqlite(&pool)
        .await
        .expect("Failed to run migrations");
    Arc::new(SqliteCorrelationStore::new(pool))
}

/// Test context with a runtime over in-memory SQLite.
pub struct TestContext {
    pub store: Arc<SqliteCorrelationStore>,
    pub orchestrator: Arc<FakeOrchestrator>,
    pub transport: Arc<RecordingTransport>,
    pub runtime: Arc<HandoffRuntime>,
}

impl TestContext {
    pub async fn new() -> Self {
        let store = memory_store().await;
        let orchestrator = Arc::new(FakeOrchestrator::default());
        let transport = Arc::new(RecordingTransport::default());

        let runtime = HandoffRuntime::builder()
            .store(store.clone())
            .orchestrator(orchestrator.clone())
            .transport(transport.clone())
            .delivery_address(DELIVERY_ADDRESS)
            .build()
            .expect("Failed to build runtime");

        Self {
            store,
            orchestrator,
            transport,
            runtime: Arc::new(runtime),
        }
    }

    /// Connection currently bound to `correlation_id`.
    pub async fn bound_connection(&self, correlation_id: &str) -> Option<String> {
        self.store
            .get_correlation(correlation_id)
            .await
            .expect("Failed to read correlation")
            .and_then(|r| r.connection_id)
    }
}

/// Helper macro to skip tests if TEST_DATABASE_URL is not set.
#[macro_export]
macro_rules! skip_if_no_db {
    () => {
        if std::env::var("TEST_DATABASE_URL").is_err() {
            eprintln!("Skipping test: TEST_DATABASE_URL not set");
            return;
        }
    };
}
