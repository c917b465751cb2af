// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Handoff Core - Correlation and Delivery Layer
//!
//! Joins an asynchronously started workflow execution to the client
//! connection that should receive its result. A client triggers a long job,
//! gets back a correlation id, opens a persistent connection carrying that
//! id, and later receives the result over that connection.
//!
//! # Architecture
//!
//! ```text
//!   client ──GET /executions──► Execution Initiator ──start──► Workflow Orchestrator
//!     │                               │                                │
//!     │                               │ pending record                 │ completion
//!     │                               ▼                                ▼
//!     │                        ┌───────────────┐             Delivery Dispatcher
//!     │   connect(id)          │  Correlation  │◄──resolve──────────┤
//!     ├──────────────────────► │     Store     │                     │ push
//!     │   Lifecycle Manager    │ (SQL, sqlx)   │                     ▼
//!     │                        └───────────────┘              Transport ──► client
//!     │   disconnect                  ▲
//!     └──────────────────────► Disconnection Sweeper
//! ```
//!
//! Arrival order of "execution started" and "connection opened" is not
//! assumed; both paths converge on the same record.
//!
//! # Components
//!
//! | Component | Entry point | Purpose |
//! |-----------|-------------|---------|
//! | Correlation Store | [`persistence::CorrelationStore`] | Durable correlation id → connection id map |
//! | Execution Initiator | [`initiator::ExecutionInitiator::start`] | Start one workflow, record a pending correlation |
//! | Lifecycle Manager | [`lifecycle::ConnectionLifecycleManager`] | Bind on connect, sweep on disconnect |
//! | Delivery Dispatcher | [`dispatcher::DeliveryDispatcher::deliver`] | Push a result to the bound connection once |
//! | Disconnection Sweeper | [`sweeper::DisconnectionSweeper::sweep`] | Bulk-remove a departed connection's records |
//!
//! # Connection State Machine
//!
//! ```text
//!   ┌────────────┐  connect   ┌──────┐  disconnect  ┌────────┐
//!   │ CONNECTING │───────────►│ OPEN │─────────────►│ CLOSED │
//!   └────────────┘            └──────┘              └────────┘
//! ```
//!
//! No re-open. A second connect for the same correlation id overwrites the
//! binding; the older connection becomes stale.
//!
//! # Delivery Outcomes
//!
//! | Outcome | Meaning | HTTP |
//! |---------|---------|------|
//! | `delivered` | Transport accepted the payload | 200 |
//! | `connection-missing` | Nothing bound to the id | 404 |
//! | `connection-stale` | Bound connection is gone | 200 + `warning` |
//! | `transport-error` | Push failed, retryable | 502 |
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `HANDOFF_DATABASE_URL` | Yes | - | PostgreSQL or SQLite connection string |
//! | `HANDOFF_DELIVERY_ADDRESS` | Yes | - | Client-facing connection address |
//! | `HANDOFF_ORCHESTRATOR_URL` | Yes | - | Orchestrator start endpoint |
//! | `HANDOFF_HTTP_PORT` | No | `8080` | HTTP server port |
//! | `HANDOFF_TRANSPORT` | No | `gateway` | `gateway` or `management-api` |
//! | `HANDOFF_REQUEST_TIMEOUT_MS` | No | `30000` | Outbound request and pool acquire timeout |
//! | `HANDOFF_MAX_DB_CONNECTIONS` | No | `10` | Database pool size |
//! | `HANDOFF_RESULT_TARGET` | No | - | Result location forwarded to workflows |

#![deny(missing_docs)]

/// Server configuration loaded from environment variables.
pub mod config;

/// Delivery dispatcher and management endpoint routing.
pub mod dispatcher;

/// Error types with stable machine-readable codes.
pub mod error;

/// Execution initiator.
pub mod initiator;

/// Connection lifecycle state machine and event handling.
pub mod lifecycle;

/// Embedded database migrations.
pub mod migrations;

/// Workflow orchestrator boundary and HTTP adapter.
pub mod orchestrator;

/// Correlation store trait and SQL backends.
pub mod persistence;

/// Assembled runtime facade.
pub mod runtime;

/// HTTP routes and the in-process WebSocket gateway.
#[cfg(feature = "server")]
pub mod server;

/// Disconnection sweeper.
pub mod sweeper;

/// Push transport boundary and management API adapter.
pub mod transport;

pub use error::{HandoffError, Result};
pub use runtime::{HandoffRuntime, HandoffRuntimeBuilder};
