// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workflow orchestrator boundary.
//!
//! Only one orchestrator operation is used: start an execution and learn its
//! id. The id doubles as the correlation id joining initiation and delivery.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

/// Result of starting a workflow execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStart {
    /// Execution id assigned by the orchestrator.
    pub execution_id: String,
    /// Orchestrator-specific handle to the running execution, if it differs from the id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_address: Option<String>,
}

/// Errors reported by an orchestrator adapter.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// The orchestrator could not be reached.
    #[error("orchestrator unreachable: {0}")]
    Unreachable(String),

    /// The orchestrator answered but refused to start the execution.
    #[error("orchestrator rejected start with status {status}: {body}")]
    Rejected {
        /// HTTP status returned.
        status: u16,
        /// Response body, possibly empty.
        body: String,
    },

    /// The orchestrator answered with something that is not a start result.
    #[error("invalid orchestrator response: {0}")]
    InvalidResponse(String),
}

/// Starts workflow executions.
#[async_trait]
pub trait WorkflowOrchestrator: Send + Sync {
    /// Start one execution with the given input document.
    async fn start_execution(
        &self,
        input: serde_json::Value,
    ) -> Result<WorkflowStart, OrchestratorError>;
}

#[derive(Serialize)]
struct StartExecutionBody<'a> {
    input: &'a serde_json::Value,
}

/// Orchestrator reached over HTTP.
///
/// `POST {url}` with `{"input": ...}`; expects `{"executionId": "..."}` back.
#[derive(Debug, Clone)]
pub struct HttpOrchestrator {
    client: reqwest::Client,
    url: String,
}

impl HttpOrchestrator {
    /// Create an adapter for the given start URL with a request timeout.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, OrchestratorError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OrchestratorError::Unreachable(format!("failed to build client: {e}")))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// The start URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl WorkflowOrchestrator for HttpOrchestrator {
    #[instrument(skip(self, input), fields(url = %self.url))]
    async fn start_execution(
        &self,
        input: serde_json::Value,
    ) -> Result<WorkflowStart, OrchestratorError> {
        let response = self
            .client
            .post(&self.url)
            .json(&StartExecutionBody { input: &input })
            .send()
            .await
            .map_err(|e| OrchestratorError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %body, "Orchestrator refused start");
            return Err(OrchestratorError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let start: WorkflowStart = response
            .json()
            .await
            .map_err(|e| OrchestratorError::InvalidResponse(e.to_string()))?;

        if start.execution_id.trim().is_empty() {
            return Err(OrchestratorError::InvalidResponse(
                "executionId is empty".to_string(),
            ));
        }

        debug!(execution_id = %start.execution_id, "Execution started");
        Ok(start)
    }
}
