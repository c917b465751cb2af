// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistent-connection transport boundary.
//!
//! A transport pushes an opaque payload to a connection and reports one of
//! three outcomes: accepted, gone (the remote end no longer exists), or a
//! failure worth retrying. Addressing is resolved by the delivery dispatcher
//! before the push; transports only consume a [`PushTarget`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use tracing::{debug, instrument, warn};

/// Fully resolved destination of a push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushTarget {
    /// Connection the payload is for.
    pub connection_id: String,
    /// Management endpoint for the connection, with any routing segment applied.
    pub url: Url,
}

/// Errors reported by a transport push.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The connection no longer exists on the transport.
    #[error("connection is gone")]
    Gone,

    /// Any other push failure.
    #[error("push failed: {0}")]
    Failed(String),
}

/// Pushes payloads to live connections.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Push `payload` to the connection named by `target`.
    async fn push(&self, target: &PushTarget, payload: &[u8]) -> Result<(), TransportError>;
}

/// Transport that talks to a remote connection gateway's management API.
///
/// Posts the payload to `{target.url}`; `410 Gone` means the connection closed.
#[derive(Debug, Clone)]
pub struct ManagementApiTransport {
    client: reqwest::Client,
}

impl ManagementApiTransport {
    /// Create a transport with the given request timeout.
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Failed(format!("failed to build client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ManagementApiTransport {
    #[instrument(skip(self, payload), fields(connection_id = %target.connection_id, url = %target.url))]
    async fn push(&self, target: &PushTarget, payload: &[u8]) -> Result<(), TransportError> {
        let response = self
            .client
            .post(target.url.clone())
            .body(payload.to_vec())
            .send()
            .await
            .map_err(|e| TransportError::Failed(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::GONE {
            return Err(TransportError::Gone);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %body, "Management API push failed");
            return Err(TransportError::Failed(format!(
                "status {}: {}",
                status.as_u16(),
                body
            )));
        }

        debug!(bytes = payload.len(), "Payload pushed");
        Ok(())
    }
}
