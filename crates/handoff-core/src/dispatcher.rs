// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Delivery dispatcher.
//!
//! Resolves the live connection for a correlation id and pushes a payload to
//! it exactly once. Outcomes that are part of normal operation (no connection
//! yet, connection went away, transport hiccup) are reported as a
//! [`DeliveryOutcome`] rather than an error; only a store failure is an `Err`.

use std::sync::Arc;

use reqwest::Url;
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use crate::error::{HandoffError, Result};
use crate::persistence::CorrelationStore;
use crate::transport::{PushTarget, Transport, TransportError};

/// Result of a single delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeliveryOutcome {
    /// The transport accepted the payload.
    Delivered,
    /// No connection is bound to the correlation id.
    ConnectionMissing,
    /// The bound connection no longer exists on the transport.
    ConnectionStale,
    /// The push failed for another reason; the caller may retry.
    TransportError,
}

impl DeliveryOutcome {
    /// Wire name of the outcome.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::ConnectionMissing => "connection-missing",
            Self::ConnectionStale => "connection-stale",
            Self::TransportError => "transport-error",
        }
    }
}

/// Record of one call to [`DeliveryDispatcher::deliver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryAttempt {
    /// Correlation id the payload was addressed to.
    pub correlation_id: String,
    /// Connection the correlation resolved to, if any.
    pub connection_id: Option<String>,
    /// The payload, unchanged.
    pub payload: Vec<u8>,
    /// What happened.
    pub outcome: DeliveryOutcome,
    /// Transport failure reason for `TransportError`.
    pub error: Option<String>,
}

impl DeliveryAttempt {
    /// Only transport errors are worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.outcome == DeliveryOutcome::TransportError
    }

    /// Convert a transport error outcome into [`HandoffError::TransportFailed`].
    ///
    /// Every other outcome, including missing and stale connections, is `Ok`.
    pub fn into_result(self) -> Result<DeliveryAttempt> {
        if self.outcome != DeliveryOutcome::TransportError {
            return Ok(self);
        }
        Err(HandoffError::TransportFailed {
            connection_id: self.connection_id.unwrap_or_default(),
            reason: self.error.unwrap_or_else(|| "unknown transport error".to_string()),
        })
    }
}

/// Management endpoint derived from a client-facing delivery address.
///
/// `wss://host/stage` becomes `https://host/stage/@connections/<id>`; `ws`
/// maps to `http`. The last non-empty path segment of the address is the
/// routing segment and is kept as the endpoint prefix, so `wss://host/a/b`
/// pushes through `https://host/b/@connections/<id>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRoute {
    base: Url,
    stage: Option<String>,
}

impl DeliveryRoute {
    /// Parse a delivery address.
    pub fn parse(address: &str) -> Result<Self> {
        let invalid = |message: String| HandoffError::ValidationError {
            field: "delivery_address".to_string(),
            message,
        };

        let url = Url::parse(address).map_err(|e| invalid(format!("'{address}': {e}")))?;

        let scheme = match url.scheme() {
            "wss" | "https" => "https",
            "ws" | "http" => "http",
            other => return Err(invalid(format!("unsupported scheme '{other}'"))),
        };
        if url.host_str().is_none() {
            return Err(invalid(format!("'{address}' has no host")));
        }

        let stage = url
            .path_segments()
            .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
            .map(str::to_string);

        let mut base = url.clone();
        base.set_scheme(scheme)
            .map_err(|_| invalid(format!("cannot rewrite scheme of '{address}'")))?;
        base.set_path("");
        base.set_query(None);
        base.set_fragment(None);

        Ok(Self { base, stage })
    }

    /// Routing segment (API stage), if the address has one.
    pub fn stage(&self) -> Option<&str> {
        self.stage.as_deref()
    }

    /// Push target for `connection_id`.
    pub fn target(&self, connection_id: &str) -> Result<PushTarget> {
        let mut url = self.base.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                HandoffError::ValidationError {
                    field: "delivery_address".to_string(),
                    message: format!("'{}' cannot carry a path", self.base),
                }
            })?;
            segments
                .clear()
                .extend(self.stage.as_deref())
                .push("@connections")
                .push(connection_id);
        }

        Ok(PushTarget {
            connection_id: connection_id.to_string(),
            url,
        })
    }
}

/// Pushes payloads to whichever connection currently owns a correlation id.
pub struct DeliveryDispatcher {
    store: Arc<dyn CorrelationStore>,
    transport: Arc<dyn Transport>,
    route: DeliveryRoute,
}

impl DeliveryDispatcher {
    /// Create a dispatcher.
    pub fn new(
        store: Arc<dyn CorrelationStore>,
        transport: Arc<dyn Transport>,
        route: DeliveryRoute,
    ) -> Self {
        Self {
            store,
            transport,
            route,
        }
    }

    /// Route used to address pushes.
    pub fn route(&self) -> &DeliveryRoute {
        &self.route
    }

    /// Deliver `payload` to the connection bound to `correlation_id`.
    ///
    /// At most one push per call. A record that exists but has no connection
    /// yet counts as missing.
    #[instrument(skip(self, payload), fields(bytes = payload.len()))]
    pub async fn deliver(&self, correlation_id: &str, payload: &[u8]) -> Result<DeliveryAttempt> {
        if correlation_id.trim().is_empty() {
            return Err(HandoffError::ValidationError {
                field: "correlation_id".to_string(),
                message: "must not be empty".to_string(),
            });
        }

        let mut attempt = DeliveryAttempt {
            correlation_id: correlation_id.to_string(),
            connection_id: None,
            payload: payload.to_vec(),
            outcome: DeliveryOutcome::ConnectionMissing,
            error: None,
        };

        let record = self
            .store
            .get_correlation(correlation_id)
            .await
            .inspect_err(|e| error!(error = %e, "Failed to resolve connection"))?;

        let Some(connection_id) = record.and_then(|r| r.connection_id) else {
            info!("No connection bound to correlation");
            return Ok(attempt);
        };

        let target = self.route.target(&connection_id)?;
        attempt.connection_id = Some(connection_id);

        match self.transport.push(&target, payload).await {
            Ok(()) => {
                info!(connection_id = %target.connection_id, "Payload delivered");
                attempt.outcome = DeliveryOutcome::Delivered;
            }
            Err(TransportError::Gone) => {
                warn!(connection_id = %target.connection_id, "Found stale connection");
                attempt.outcome = DeliveryOutcome::ConnectionStale;
            }
            Err(TransportError::Failed(reason)) => {
                error!(connection_id = %target.connection_id, reason = %reason, "Push failed");
                attempt.outcome = DeliveryOutcome::TransportError;
                attempt.error = Some(reason);
            }
        }

        Ok(attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations;
    use crate::persistence::SqliteCorrelationStore;
    use async_trait::async_trait;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Transport that records pushes and fails for configured connections.
    #[derive(Default)]
    struct RecordingTransport {
        pushes: Mutex<Vec<(PushTarget, Vec<u8>)>>,
        gone: HashSet<String>,
        broken: HashSet<String>,
    }

    impl RecordingTransport {
        fn pushed(&self) -> Vec<(PushTarget, Vec<u8>)> {
            self.pushes.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn push(
            &self,
            target: &PushTarget,
            payload: &[u8],
        ) -> std::result::Result<(), TransportError> {
            self.pushes
                .lock()
                .unwrap()
                .push((target.clone(), payload.to_vec()));
            if self.gone.contains(&target.connection_id) {
                return Err(TransportError::Gone);
            }
            if self.broken.contains(&target.connection_id) {
                return Err(TransportError::Failed("socket reset".to_string()));
            }
            Ok(())
        }
    }

    async fn test_store() -> Arc<SqliteCorrelationStore> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrations::run_sqlite(&pool).await.unwrap();
        Arc::new(SqliteCorrelationStore::new(pool))
    }

    fn dispatcher(
        store: Arc<SqliteCorrelationStore>,
        transport: Arc<RecordingTransport>,
    ) -> DeliveryDispatcher {
        DeliveryDispatcher::new(
            store,
            transport,
            DeliveryRoute::parse("wss://host/stage").unwrap(),
        )
    }

    #[test]
    fn test_route_rewrites_secure_websocket() {
        let route = DeliveryRoute::parse("wss://abc.execute-api.example.com/prod").unwrap();
        assert_eq!(route.stage(), Some("prod"));

        let target = route.target("conn-1").unwrap();
        assert_eq!(target.connection_id, "conn-1");
        assert_eq!(
            target.url.as_str(),
            "https://abc.execute-api.example.com/prod/@connections/conn-1"
        );
    }

    #[test]
    fn test_route_keeps_port_and_plain_scheme() {
        let route = DeliveryRoute::parse("ws://localhost:8080/dev?x=1").unwrap();
        let target = route.target("c-2").unwrap();
        assert_eq!(
            target.url.as_str(),
            "http://localhost:8080/dev/@connections/c-2"
        );
    }

    #[test]
    fn test_route_uses_last_path_segment() {
        let route = DeliveryRoute::parse("wss://host/a/b/").unwrap();
        assert_eq!(route.stage(), Some("b"));
        assert_eq!(
            route.target("c").unwrap().url.as_str(),
            "https://host/b/@connections/c"
        );
    }

    #[test]
    fn test_route_without_stage() {
        let route = DeliveryRoute::parse("wss://host").unwrap();
        assert_eq!(route.stage(), None);
        assert_eq!(
            route.target("c").unwrap().url.as_str(),
            "https://host/@connections/c"
        );
    }

    #[test]
    fn test_route_encodes_connection_id() {
        let route = DeliveryRoute::parse("wss://host/stage").unwrap();
        let target = route.target("a/b").unwrap();
        assert_eq!(
            target.url.as_str(),
            "https://host/stage/@connections/a%2Fb"
        );
    }

    #[test]
    fn test_route_rejects_invalid_addresses() {
        for address in ["not a url", "ftp://host/stage", "mailto:someone@example.com"] {
            let err = DeliveryRoute::parse(address).unwrap_err();
            assert_eq!(err.error_code(), "VALIDATION_ERROR", "address: {address}");
        }
    }

    #[tokio::test]
    async fn test_deliver_to_bound_connection() {
        let store = test_store().await;
        store.bind_connection("abc", "conn-1").await.unwrap();
        let transport = Arc::new(RecordingTransport::default());

        let attempt = dispatcher(store, transport.clone())
            .deliver("abc", b"payload")
            .await
            .unwrap();

        assert_eq!(attempt.outcome, DeliveryOutcome::Delivered);
        assert_eq!(attempt.connection_id.as_deref(), Some("conn-1"));
        assert!(!attempt.is_retryable());

        let pushed = transport.pushed();
        assert_eq!(pushed.len(), 1);
        assert_eq!(
            pushed[0].0.url.as_str(),
            "https://host/stage/@connections/conn-1"
        );
        assert_eq!(pushed[0].1, b"payload");
    }

    #[tokio::test]
    async fn test_deliver_without_record_is_missing() {
        let store = test_store().await;
        let transport = Arc::new(RecordingTransport::default());

        let attempt = dispatcher(store, transport.clone())
            .deliver("unknown", b"payload")
            .await
            .unwrap();

        assert_eq!(attempt.outcome, DeliveryOutcome::ConnectionMissing);
        assert_eq!(attempt.connection_id, None);
        assert!(transport.pushed().is_empty());
    }

    #[tokio::test]
    async fn test_deliver_to_pending_record_is_missing() {
        let store = test_store().await;
        store.register_pending("abc").await.unwrap();
        let transport = Arc::new(RecordingTransport::default());

        let attempt = dispatcher(store, transport.clone())
            .deliver("abc", b"payload")
            .await
            .unwrap();

        assert_eq!(attempt.outcome, DeliveryOutcome::ConnectionMissing);
        assert!(transport.pushed().is_empty());
    }

    #[tokio::test]
    async fn test_deliver_to_stale_connection() {
        let store = test_store().await;
        store.bind_connection("abc", "conn-gone").await.unwrap();
        let transport = Arc::new(RecordingTransport {
            gone: HashSet::from(["conn-gone".to_string()]),
            ..Default::default()
        });

        let attempt = dispatcher(store, transport.clone())
            .deliver("abc", b"payload")
            .await
            .unwrap();

        assert_eq!(attempt.outcome, DeliveryOutcome::ConnectionStale);
        assert!(!attempt.is_retryable());
        assert!(attempt.into_result().is_ok());
        assert_eq!(transport.pushed().len(), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_is_retryable() {
        let store = test_store().await;
        store.bind_connection("abc", "conn-1").await.unwrap();
        let transport = Arc::new(RecordingTransport {
            broken: HashSet::from(["conn-1".to_string()]),
            ..Default::default()
        });

        let attempt = dispatcher(store, transport.clone())
            .deliver("abc", b"payload")
            .await
            .unwrap();

        assert_eq!(attempt.outcome, DeliveryOutcome::TransportError);
        assert_eq!(attempt.error.as_deref(), Some("socket reset"));
        assert!(attempt.is_retryable());
        // No internal retry
        assert_eq!(transport.pushed().len(), 1);

        let err = attempt.into_result().unwrap_err();
        assert_eq!(err.error_code(), "TRANSPORT_ERROR");
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_newest_connection_wins() {
        let store = test_store().await;
        store.bind_connection("abc", "conn-old").await.unwrap();
        store.bind_connection("abc", "conn-new").await.unwrap();
        let transport = Arc::new(RecordingTransport::default());

        dispatcher(store, transport.clone())
            .deliver("abc", b"payload")
            .await
            .unwrap();

        let pushed = transport.pushed();
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].0.connection_id, "conn-new");
    }

    #[tokio::test]
    async fn test_store_failure_is_not_masked() {
        let store = test_store().await;
        store.pool().close().await;
        let transport = Arc::new(RecordingTransport::default());

        let err = dispatcher(store, transport.clone())
            .deliver("abc", b"payload")
            .await
            .unwrap_err();

        assert_eq!(err.error_code(), "STORE_UNAVAILABLE");
        assert!(transport.pushed().is_empty());
    }

    #[tokio::test]
    async fn test_empty_correlation_id_rejected() {
        let store = test_store().await;
        let transport = Arc::new(RecordingTransport::default());

        let err = dispatcher(store, transport)
            .deliver("", b"payload")
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_outcome_wire_names() {
        assert_eq!(
            serde_json::to_value(DeliveryOutcome::ConnectionStale).unwrap(),
            serde_json::json!("connection-stale")
        );
        assert_eq!(DeliveryOutcome::TransportError.as_str(), "transport-error");
    }
}
