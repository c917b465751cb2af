// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-process WebSocket gateway.
//!
//! Accepts client sockets on the delivery route, binds each to the
//! correlation id presented in the handshake, and acts as the [`Transport`]
//! for pushes to those sockets.

use std::collections::HashMap;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{ApiError, AppState, CORRELATION_HEADER};
use crate::error::HandoffError;
use crate::lifecycle::Connection;
use crate::transport::{PushTarget, Transport, TransportError};

/// Default number of undelivered frames buffered per socket.
pub const DEFAULT_SEND_QUEUE: usize = 32;

/// Send channels of the sockets currently held by this process.
pub struct GatewayRegistry {
    sockets: RwLock<HashMap<String, mpsc::Sender<Message>>>,
    max_send_queue: usize,
}

impl GatewayRegistry {
    /// Create an empty registry with the given per-socket queue size.
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            sockets: RwLock::new(HashMap::new()),
            max_send_queue: max_send_queue.max(1),
        }
    }

    /// Register a socket and return the receiving end of its send queue.
    pub async fn register(&self, connection_id: &str) -> mpsc::Receiver<Message> {
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        let _ = self
            .sockets
            .write()
            .await
            .insert(connection_id.to_string(), tx);
        rx
    }

    /// Forget a socket. Pushes to it report gone from now on.
    pub async fn unregister(&self, connection_id: &str) {
        let _ = self.sockets.write().await.remove(connection_id);
    }

    /// Number of registered sockets.
    pub async fn connection_count(&self) -> usize {
        self.sockets.read().await.len()
    }
}

impl Default for GatewayRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_SEND_QUEUE)
    }
}

#[async_trait]
impl Transport for GatewayRegistry {
    async fn push(&self, target: &PushTarget, payload: &[u8]) -> Result<(), TransportError> {
        let sockets = self.sockets.read().await;
        let Some(tx) = sockets.get(&target.connection_id) else {
            return Err(TransportError::Gone);
        };

        match tx.try_send(frame(payload)) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(connection_id = %target.connection_id, "Send queue full");
                Err(TransportError::Failed("send queue full".to_string()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(TransportError::Gone),
        }
    }
}

/// Text frame for UTF-8 payloads, binary frame for anything else.
fn frame(payload: &[u8]) -> Message {
    match std::str::from_utf8(payload) {
        Ok(text) => Message::Text(text.to_owned().into()),
        Err(_) => Message::Binary(payload.to_vec().into()),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct HandshakeParams {
    correlation_id: Option<String>,
}

/// Correlation id from the `X-Correlation-Id` header, falling back to the
/// `correlationId` query parameter.
pub(super) fn handshake_correlation_id(
    headers: &HeaderMap,
    params: &HandshakeParams,
) -> Option<String> {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .or(params.correlation_id.as_deref())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// GET /{stage}: bind, then upgrade.
///
/// The binding is written before the upgrade completes so a failed bind
/// refuses the handshake.
pub(super) async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HandshakeParams>,
) -> Response {
    let Some(gateway) = state.gateway.clone() else {
        return ApiError(HandoffError::ValidationError {
            field: "transport".to_string(),
            message: "in-process gateway is disabled".to_string(),
        })
        .into_response();
    };

    let mut connection = Connection::new(Uuid::new_v4().to_string());
    let Some(correlation_id) = handshake_correlation_id(&headers, &params) else {
        state.runtime.lifecycle().close(&mut connection).await;
        return ApiError(HandoffError::ValidationError {
            field: "correlation_id".to_string(),
            message: format!("handshake must carry {CORRELATION_HEADER} or correlationId"),
        })
        .into_response();
    };

    let rx = gateway.register(connection.id()).await;
    if let Err(e) = state
        .runtime
        .lifecycle()
        .open(&mut connection, &correlation_id)
        .await
    {
        gateway.unregister(connection.id()).await;
        state.runtime.lifecycle().close(&mut connection).await;
        return ApiError(e).into_response();
    }

    info!(
        connection_id = %connection.id(),
        correlation_id = %correlation_id,
        "WebSocket handshake accepted"
    );

    let failed_id = connection.id().to_string();
    let failed_state = state.clone();
    ws.on_failed_upgrade(move |e| {
        warn!(connection_id = %failed_id, error = %e, "WebSocket upgrade failed");
        tokio::spawn(async move {
            if let Some(gateway) = &failed_state.gateway {
                gateway.unregister(&failed_id).await;
            }
            failed_state.runtime.disconnect(&failed_id).await;
        });
    })
    .on_upgrade(move |socket| run_session(socket, connection, rx, state))
}

async fn run_session(
    socket: WebSocket,
    mut connection: Connection,
    mut rx: mpsc::Receiver<Message>,
    state: AppState,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer = async {
        while let Some(frame) = rx.recv().await {
            if ws_tx.send(frame).await.is_err() {
                break;
            }
        }
    };

    let reader = async {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                Message::Close(_) => break,
                // Clients only listen
                Message::Text(_) | Message::Binary(_) => {
                    debug!(connection_id = %connection.id(), "Ignoring inbound frame");
                }
                _ => {}
            }
        }
    };

    tokio::select! {
        _ = writer => {},
        _ = reader => {},
    }

    if let Some(gateway) = &state.gateway {
        gateway.unregister(connection.id()).await;
    }
    let swept = state.runtime.lifecycle().close(&mut connection).await;
    info!(connection_id = %connection.id(), swept, "WebSocket closed");
}
