// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP surface for handoff-core.
//!
//! | Route | Method | Purpose |
//! |-------|--------|---------|
//! | `/health` | GET | Store connectivity probe |
//! | `/executions` | GET | Start a workflow; other methods get 405 |
//! | `/deliveries` | POST | Deliver a result payload to its connection |
//! | `/connections/{connection_id}` | PUT / DELETE | Connect / disconnect events from an external gateway |
//! | `/{stage}` | GET | WebSocket handshake for the in-process gateway |

pub mod gateway;

use std::future::Future;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{any, get, post, put};
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::dispatcher::DeliveryOutcome;
use crate::error::HandoffError;
use crate::initiator::TriggerRequest;
use crate::lifecycle::ConnectionState;
use crate::runtime::HandoffRuntime;

pub use self::gateway::GatewayRegistry;

/// Header carrying the correlation id on connect.
pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// Shared state passed to handlers.
#[derive(Clone)]
pub struct AppState {
    /// The assembled correlation and delivery layer.
    pub runtime: Arc<HandoffRuntime>,
    /// In-process gateway, when it is the configured transport.
    pub gateway: Option<Arc<GatewayRegistry>>,
}

/// [`HandoffError`] rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub HandoffError);

impl From<HandoffError> for ApiError {
    fn from(err: HandoffError) -> Self {
        Self(err)
    }
}

/// HTTP status for an error.
pub fn status_for(err: &HandoffError) -> StatusCode {
    match err {
        HandoffError::UnsupportedOperation { .. } => StatusCode::METHOD_NOT_ALLOWED,
        HandoffError::WorkflowStartFailed { .. } | HandoffError::TransportFailed { .. } => {
            StatusCode::BAD_GATEWAY
        }
        HandoffError::StoreUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        HandoffError::ValidationError { .. } => StatusCode::BAD_REQUEST,
        HandoffError::InvalidTransition { .. } => StatusCode::CONFLICT,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (status_for(&self.0), Json(self.0.to_error_body())).into_response()
    }
}

/// Build the router.
///
/// The WebSocket route is mounted only when `state.gateway` is set.
pub fn router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/health", get(health_handler))
        .route("/executions", any(start_handler))
        .route("/deliveries", post(deliver_handler))
        .route(
            "/connections/{connection_id}",
            put(connect_handler).delete(disconnect_handler),
        );

    if state.gateway.is_some() {
        let path = match state.runtime.route().stage() {
            Some(stage) => format!("/{stage}"),
            None => "/".to_string(),
        };
        if matches!(path.as_str(), "/health" | "/executions" | "/deliveries") {
            warn!(path = %path, "Delivery stage collides with an API route, gateway not mounted");
        } else {
            router = router.route(&path, get(gateway::ws_handler));
        }
    }

    router.with_state(state)
}

/// Serve `router(state)` on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    info!(addr = %addr, "HTTP server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("HTTP server stopped");
    Ok(())
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Response {
    let healthy = state.runtime.health_check().await;
    let connections = match &state.gateway {
        Some(gateway) => Some(gateway.connection_count().await),
        None => None,
    };

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = json!({
        "status": if healthy { "ok" } else { "unavailable" },
        "connections": connections,
    });
    (status, Json(body)).into_response()
}

/// ANY /executions
async fn start_handler(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
) -> Result<Response, ApiError> {
    let request = TriggerRequest::new(method.as_str(), uri.path());
    let started = state.runtime.start(&request).await?;
    Ok(Json(started.response()).into_response())
}

/// Body of `POST /deliveries`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRequest {
    /// Correlation id the result belongs to.
    pub correlation_id: String,
    /// Opaque result handle; strings are pushed verbatim, anything else as JSON text.
    pub payload: serde_json::Value,
}

impl DeliveryRequest {
    fn payload_bytes(&self) -> Vec<u8> {
        match &self.payload {
            serde_json::Value::String(s) => s.as_bytes().to_vec(),
            other => other.to_string().into_bytes(),
        }
    }
}

/// Response of `POST /deliveries`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryResponse {
    /// Correlation id the payload was addressed to.
    pub correlation_id: String,
    /// Wire name of the outcome.
    pub outcome: String,
    /// Connection the payload was pushed to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    /// Set when the outcome is non-fatal but the payload did not arrive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// POST /deliveries
async fn deliver_handler(
    State(state): State<AppState>,
    Json(request): Json<DeliveryRequest>,
) -> Result<Response, ApiError> {
    let attempt = state
        .runtime
        .deliver(&request.correlation_id, &request.payload_bytes())
        .await?
        .into_result()?;

    let (status, warning) = match attempt.outcome {
        DeliveryOutcome::Delivered => (StatusCode::OK, None),
        DeliveryOutcome::ConnectionStale => (
            StatusCode::OK,
            Some("connection is stale, payload dropped".to_string()),
        ),
        DeliveryOutcome::ConnectionMissing => (StatusCode::NOT_FOUND, None),
        // into_result already turned this into an error
        DeliveryOutcome::TransportError => (StatusCode::BAD_GATEWAY, None),
    };

    let body = DeliveryResponse {
        correlation_id: attempt.correlation_id,
        outcome: attempt.outcome.as_str().to_string(),
        connection_id: attempt.connection_id,
        warning,
    };
    Ok((status, Json(body)).into_response())
}

/// PUT /connections/{connection_id}
async fn connect_handler(
    State(state): State<AppState>,
    Path(connection_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let correlation_id = headers
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    state.runtime.connect(&connection_id, correlation_id).await?;

    Ok(Json(json!({
        "connectionId": connection_id,
        "correlationId": correlation_id,
        "state": ConnectionState::Open,
    }))
    .into_response())
}

/// DELETE /connections/{connection_id}
async fn disconnect_handler(
    State(state): State<AppState>,
    Path(connection_id): Path<String>,
) -> Response {
    let swept = state.runtime.disconnect(&connection_id).await;
    if swept == 0 {
        warn!(connection_id = %connection_id, "Disconnect swept nothing");
    }

    Json(json!({
        "connectionId": connection_id,
        "state": ConnectionState::Closed,
        "swept": swept,
    }))
    .into_response()
}
