// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Connection lifecycle management.
//!
//! Each transport connection moves through a one-way state machine:
//!
//! ```text
//!   ┌────────────┐  connect   ┌──────┐  disconnect  ┌────────┐
//!   │ CONNECTING │───────────►│ OPEN │─────────────►│ CLOSED │
//!   └─────┬──────┘            └──────┘              └────────┘
//!         │        handshake rejected                    ▲
//!         └──────────────────────────────────────────────┘
//! ```
//!
//! Opening binds the connection to the correlation id from the handshake.
//! Closing an open connection sweeps every binding that still points at it.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::error::{HandoffError, Result};
use crate::persistence::CorrelationStore;
use crate::sweeper::DisconnectionSweeper;

/// Lifecycle state of a transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    /// Handshake in progress, not yet bound.
    Connecting,
    /// Bound and able to receive pushes.
    Open,
    /// Terminal.
    Closed,
}

impl ConnectionState {
    /// Upper-case name used in logs and errors.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "CONNECTING",
            Self::Open => "OPEN",
            Self::Closed => "CLOSED",
        }
    }

    /// Whether moving from `self` to `next` is allowed.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        matches!(
            (self, next),
            (Self::Connecting, Self::Open)
                | (Self::Connecting, Self::Closed)
                | (Self::Open, Self::Closed)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single connection tracked by a transport that holds sockets in-process.
#[derive(Debug, Clone)]
pub struct Connection {
    connection_id: String,
    correlation_id: Option<String>,
    state: ConnectionState,
}

impl Connection {
    /// A new connection in `CONNECTING`.
    pub fn new(connection_id: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
            correlation_id: None,
            state: ConnectionState::Connecting,
        }
    }

    /// Transport-assigned id.
    pub fn id(&self) -> &str {
        &self.connection_id
    }

    /// Correlation id presented in the handshake, once open.
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    fn transition(&mut self, next: ConnectionState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(HandoffError::InvalidTransition {
                connection_id: self.connection_id.clone(),
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        Ok(())
    }
}

/// Reacts to transport connect/disconnect events.
pub struct ConnectionLifecycleManager {
    store: Arc<dyn CorrelationStore>,
    sweeper: DisconnectionSweeper,
}

impl ConnectionLifecycleManager {
    /// Create a manager writing to `store`.
    pub fn new(store: Arc<dyn CorrelationStore>) -> Self {
        Self {
            sweeper: DisconnectionSweeper::new(store.clone()),
            store,
        }
    }

    /// Handle a connect event: bind `connection_id` to `correlation_id`.
    ///
    /// Creates the record if the initiator has not written it yet, and
    /// overwrites any older connection bound to the same id.
    #[instrument(skip(self))]
    pub async fn connect(&self, connection_id: &str, correlation_id: &str) -> Result<()> {
        validate_id("connection_id", connection_id)?;
        validate_id("correlation_id", correlation_id)?;

        self.store
            .bind_connection(correlation_id, connection_id)
            .await
            .inspect_err(|e| warn!(error = %e, "Failed to bind connection"))?;

        info!("Connection bound");
        Ok(())
    }

    /// Handle a disconnect event. Never fails; returns the number of bindings removed.
    #[instrument(skip(self))]
    pub async fn disconnect(&self, connection_id: &str) -> usize {
        self.sweeper.sweep(connection_id).await
    }

    /// Drive `connection` from `CONNECTING` to `OPEN`.
    ///
    /// On failure the connection stays in `CONNECTING` and should be closed.
    pub async fn open(&self, connection: &mut Connection, correlation_id: &str) -> Result<()> {
        if !connection.state.can_transition_to(ConnectionState::Open) {
            return connection.transition(ConnectionState::Open);
        }

        self.connect(&connection.connection_id, correlation_id).await?;
        connection.correlation_id = Some(correlation_id.to_string());
        connection.transition(ConnectionState::Open)
    }

    /// Drive `connection` to `CLOSED`, sweeping its bindings if it was open.
    ///
    /// Closing twice is a no-op.
    pub async fn close(&self, connection: &mut Connection) -> usize {
        match connection.state {
            ConnectionState::Closed => {
                debug!(connection_id = %connection.connection_id, "Connection already closed");
                0
            }
            ConnectionState::Connecting => {
                connection.state = ConnectionState::Closed;
                0
            }
            ConnectionState::Open => {
                connection.state = ConnectionState::Closed;
                self.disconnect(&connection.connection_id).await
            }
        }
    }
}

fn validate_id(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(HandoffError::ValidationError {
            field: field.to_string(),
            message: "must not be empty".to_string(),
        });
    }
    Ok(())
}
