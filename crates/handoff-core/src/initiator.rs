// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Execution initiator.
//!
//! Starts one workflow execution per trigger, records a pending correlation
//! for it, and tells the caller which id to present when it opens its
//! persistent connection.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, instrument, warn};

use crate::error::{HandoffError, Result};
use crate::orchestrator::WorkflowOrchestrator;
use crate::persistence::CorrelationStore;

/// The only request method the initiator accepts.
pub const SUPPORTED_METHOD: &str = "GET";

/// Incoming trigger as seen by the initiator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerRequest {
    /// Request method, e.g. `GET`.
    pub method: String,
    /// Request path, used for logging only.
    pub path: String,
}

impl TriggerRequest {
    /// Build a trigger with an arbitrary method.
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
        }
    }

    /// Build a `GET` trigger.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(SUPPORTED_METHOD, path)
    }

    fn is_supported(&self) -> bool {
        self.method.eq_ignore_ascii_case(SUPPORTED_METHOD)
    }
}

/// Handle to a started execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionHandle {
    /// Join key between initiation and delivery.
    pub correlation_id: String,
    /// Orchestrator handle to the running execution.
    pub workflow_address: String,
    /// Where the produced artifact will be published, if configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_target: Option<String>,
}

/// Envelope returned to the triggering client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    /// Id to pass in the connection handshake.
    pub correlation_id: String,
    /// Address of the persistent-connection transport.
    pub delivery_address: String,
}

/// A successfully started execution.
#[derive(Debug, Clone)]
pub struct StartedExecution {
    /// The execution handle.
    pub handle: ExecutionHandle,
    /// Transport address the client should connect to.
    pub delivery_address: String,
}

impl StartedExecution {
    /// Response envelope for the caller.
    pub fn response(&self) -> StartResponse {
        StartResponse {
            correlation_id: self.handle.correlation_id.clone(),
            delivery_address: self.delivery_address.clone(),
        }
    }
}

/// Starts workflows and writes their pending correlation records.
pub struct ExecutionInitiator {
    orchestrator: Arc<dyn WorkflowOrchestrator>,
    store: Arc<dyn CorrelationStore>,
    delivery_address: String,
    result_target: Option<String>,
}

impl ExecutionInitiator {
    /// Create an initiator with injected collaborators.
    pub fn new(
        orchestrator: Arc<dyn WorkflowOrchestrator>,
        store: Arc<dyn CorrelationStore>,
        delivery_address: impl Into<String>,
        result_target: Option<String>,
    ) -> Self {
        Self {
            orchestrator,
            store,
            delivery_address: delivery_address.into(),
            result_target,
        }
    }

    /// Address handed back to clients.
    pub fn delivery_address(&self) -> &str {
        &self.delivery_address
    }

    /// Start a workflow execution for `request`.
    ///
    /// # Errors
    ///
    /// - [`HandoffError::UnsupportedOperation`] for any method other than `GET`
    /// - [`HandoffError::WorkflowStartFailed`] if the orchestrator is unreachable
    ///   or refuses; nothing is written in that case
    /// - [`HandoffError::StoreUnavailable`] if the pending record cannot be written
    #[instrument(skip(self, request), fields(method = %request.method, path = %request.path))]
    pub async fn start(&self, request: &TriggerRequest) -> Result<StartedExecution> {
        if !request.is_supported() {
            error!("HTTP method {} not supported", request.method);
            return Err(HandoffError::UnsupportedOperation {
                method: request.method.clone(),
            });
        }

        let mut input = json!({ "deliveryAddress": self.delivery_address });
        if let Some(target) = &self.result_target {
            input["resultTarget"] = json!(target);
        }

        let started = self
            .orchestrator
            .start_execution(input)
            .await
            .map_err(|e| {
                warn!(error = %e, "Workflow start failed");
                HandoffError::WorkflowStartFailed {
                    reason: e.to_string(),
                }
            })?;

        let correlation_id = started.execution_id;
        info!(correlation_id = %correlation_id, "Workflow execution started");

        self.store.register_pending(&correlation_id).await?;
        info!(correlation_id = %correlation_id, "Pending correlation recorded");

        let workflow_address = started
            .workflow_address
            .unwrap_or_else(|| correlation_id.clone());

        Ok(StartedExecution {
            handle: ExecutionHandle {
                correlation_id,
                workflow_address,
                result_target: self.result_target.clone(),
            },
            delivery_address: self.delivery_address.clone(),
        })
    }
}
