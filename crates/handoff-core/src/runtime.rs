// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for handoff-core.
//!
//! [`HandoffRuntime`] wires the initiator, lifecycle manager, sweeper and
//! dispatcher to one set of injected collaborators. Embed it in an existing
//! tokio application or hand it to the HTTP server.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use handoff_core::orchestrator::HttpOrchestrator;
//! use handoff_core::persistence::PostgresCorrelationStore;
//! use handoff_core::runtime::HandoffRuntime;
//! use handoff_core::transport::ManagementApiTransport;
//!
//! let pool = sqlx::PgPool::connect("postgres://...").await?;
//! let runtime = HandoffRuntime::builder()
//!     .store(Arc::new(PostgresCorrelationStore::new(pool)))
//!     .orchestrator(Arc::new(HttpOrchestrator::new(url, Duration::from_secs(30))?))
//!     .transport(Arc::new(ManagementApiTransport::new(Duration::from_secs(30))?))
//!     .delivery_address("wss://host/stage")
//!     .build()?;
//!
//! let started = runtime.start(&TriggerRequest::get("/executions")).await?;
//! ```

use std::sync::Arc;

use tracing::info;

use crate::dispatcher::{DeliveryAttempt, DeliveryDispatcher, DeliveryRoute};
use crate::error::{HandoffError, Result};
use crate::initiator::{ExecutionInitiator, StartedExecution, TriggerRequest};
use crate::lifecycle::ConnectionLifecycleManager;
use crate::orchestrator::WorkflowOrchestrator;
use crate::persistence::CorrelationStore;
use crate::transport::Transport;

/// Builder for creating a [`HandoffRuntime`].
#[derive(Default)]
pub struct HandoffRuntimeBuilder {
    store: Option<Arc<dyn CorrelationStore>>,
    orchestrator: Option<Arc<dyn WorkflowOrchestrator>>,
    transport: Option<Arc<dyn Transport>>,
    delivery_address: Option<String>,
    result_target: Option<String>,
}

impl std::fmt::Debug for HandoffRuntimeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandoffRuntimeBuilder")
            .field("store", &self.store.as_ref().map(|_| "..."))
            .field("orchestrator", &self.orchestrator.as_ref().map(|_| "..."))
            .field("transport", &self.transport.as_ref().map(|_| "..."))
            .field("delivery_address", &self.delivery_address)
            .field("result_target", &self.result_target)
            .finish()
    }
}

impl HandoffRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the correlation store (required).
    pub fn store(mut self, store: Arc<dyn CorrelationStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the workflow orchestrator (required).
    pub fn orchestrator(mut self, orchestrator: Arc<dyn WorkflowOrchestrator>) -> Self {
        self.orchestrator = Some(orchestrator);
        self
    }

    /// Set the push transport (required).
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Set the client-facing delivery address (required), e.g. `wss://host/stage`.
    pub fn delivery_address(mut self, address: impl Into<String>) -> Self {
        self.delivery_address = Some(address.into());
        self
    }

    /// Set where workflows should publish their result.
    pub fn result_target(mut self, target: impl Into<String>) -> Self {
        self.result_target = Some(target.into());
        self
    }

    /// Build the runtime.
    ///
    /// Returns a validation error if a required collaborator is missing or the
    /// delivery address cannot be routed.
    pub fn build(self) -> Result<HandoffRuntime> {
        let store = self.store.ok_or_else(|| required("store"))?;
        let orchestrator = self.orchestrator.ok_or_else(|| required("orchestrator"))?;
        let transport = self.transport.ok_or_else(|| required("transport"))?;
        let delivery_address = self
            .delivery_address
            .ok_or_else(|| required("delivery_address"))?;

        let route = DeliveryRoute::parse(&delivery_address)?;

        info!(
            delivery_address = %delivery_address,
            stage = route.stage().unwrap_or(""),
            "HandoffRuntime built"
        );

        Ok(HandoffRuntime {
            initiator: ExecutionInitiator::new(
                orchestrator,
                store.clone(),
                delivery_address,
                self.result_target,
            ),
            lifecycle: ConnectionLifecycleManager::new(store.clone()),
            dispatcher: DeliveryDispatcher::new(store.clone(), transport, route),
            store,
        })
    }
}

fn required(field: &str) -> HandoffError {
    HandoffError::ValidationError {
        field: field.to_string(),
        message: "is required".to_string(),
    }
}

/// The correlation and delivery layer, assembled.
///
/// Every method is an independent invocation; the runtime holds no per-call
/// state and can be shared behind an `Arc`.
pub struct HandoffRuntime {
    store: Arc<dyn CorrelationStore>,
    initiator: ExecutionInitiator,
    lifecycle: ConnectionLifecycleManager,
    dispatcher: DeliveryDispatcher,
}

impl std::fmt::Debug for HandoffRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandoffRuntime")
            .field("store", &"...")
            .field("delivery_address", &self.initiator.delivery_address())
            .finish()
    }
}

impl HandoffRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> HandoffRuntimeBuilder {
        HandoffRuntimeBuilder::new()
    }

    /// Start a workflow execution.
    pub async fn start(&self, request: &TriggerRequest) -> Result<StartedExecution> {
        self.initiator.start(request).await
    }

    /// Bind a connection to a correlation id.
    pub async fn connect(&self, connection_id: &str, correlation_id: &str) -> Result<()> {
        self.lifecycle.connect(connection_id, correlation_id).await
    }

    /// Sweep a departed connection. Never fails.
    pub async fn disconnect(&self, connection_id: &str) -> usize {
        self.lifecycle.disconnect(connection_id).await
    }

    /// Deliver a payload to the connection bound to `correlation_id`.
    pub async fn deliver(&self, correlation_id: &str, payload: &[u8]) -> Result<DeliveryAttempt> {
        self.dispatcher.deliver(correlation_id, payload).await
    }

    /// Lifecycle manager, for transports that track connection state in-process.
    pub fn lifecycle(&self) -> &ConnectionLifecycleManager {
        &self.lifecycle
    }

    /// Get a reference to the correlation store.
    pub fn store(&self) -> &Arc<dyn CorrelationStore> {
        &self.store
    }

    /// Client-facing delivery address.
    pub fn delivery_address(&self) -> &str {
        self.initiator.delivery_address()
    }

    /// Management endpoint routing derived from the delivery address.
    pub fn route(&self) -> &DeliveryRoute {
        self.dispatcher.route()
    }

    /// Whether the correlation store answers.
    pub async fn health_check(&self) -> bool {
        self.store.health_check_db().await.unwrap_or(false)
    }
}
