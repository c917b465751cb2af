// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Which transport pushes payloads to connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Sockets are accepted and held by this process.
    Gateway,
    /// Sockets live in a remote gateway reached through its management API.
    ManagementApi,
}

impl FromStr for TransportKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gateway" => Ok(Self::Gateway),
            "management-api" => Ok(Self::ManagementApi),
            _ => Err(ConfigError::Invalid(
                "HANDOFF_TRANSPORT",
                "must be 'gateway' or 'management-api'",
            )),
        }
    }
}

/// Handoff configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL or SQLite connection URL
    pub database_url: String,
    /// HTTP server address
    pub http_addr: SocketAddr,
    /// Client-facing address returned by the initiator
    pub delivery_address: String,
    /// Start endpoint of the workflow orchestrator
    pub orchestrator_url: String,
    /// Transport used for pushes
    pub transport: TransportKind,
    /// Upper bound for orchestrator, transport and pool acquire waits
    pub request_timeout: Duration,
    /// Database pool size
    pub max_db_connections: u32,
    /// Where workflows publish their result, forwarded in the start input
    pub result_target: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `HANDOFF_DATABASE_URL`: PostgreSQL or SQLite connection string
    /// - `HANDOFF_DELIVERY_ADDRESS`: client-facing connection address, e.g. `wss://host/stage`
    /// - `HANDOFF_ORCHESTRATOR_URL`: orchestrator start endpoint
    ///
    /// Optional (with defaults):
    /// - `HANDOFF_HTTP_PORT`: HTTP server port (default: 8080)
    /// - `HANDOFF_TRANSPORT`: `gateway` or `management-api` (default: gateway)
    /// - `HANDOFF_REQUEST_TIMEOUT_MS`: request timeout (default: 30000)
    /// - `HANDOFF_MAX_DB_CONNECTIONS`: pool size (default: 10)
    /// - `HANDOFF_RESULT_TARGET`: result location forwarded to workflows (default: unset)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = required("HANDOFF_DATABASE_URL")?;
        let delivery_address = required("HANDOFF_DELIVERY_ADDRESS")?;
        let orchestrator_url = required("HANDOFF_ORCHESTRATOR_URL")?;

        let http_port: u16 = std::env::var("HANDOFF_HTTP_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("HANDOFF_HTTP_PORT", "must be a valid port number")
            })?;

        let transport: TransportKind = std::env::var("HANDOFF_TRANSPORT")
            .unwrap_or_else(|_| "gateway".to_string())
            .parse()?;

        let timeout_ms: u64 = std::env::var("HANDOFF_REQUEST_TIMEOUT_MS")
            .unwrap_or_else(|_| "30000".to_string())
            .parse()
            .ok()
            .filter(|ms| *ms > 0)
            .ok_or(ConfigError::Invalid(
                "HANDOFF_REQUEST_TIMEOUT_MS",
                "must be a positive number of milliseconds",
            ))?;

        let max_db_connections: u32 = std::env::var("HANDOFF_MAX_DB_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .ok()
            .filter(|n| *n > 0)
            .ok_or(ConfigError::Invalid(
                "HANDOFF_MAX_DB_CONNECTIONS",
                "must be a positive integer",
            ))?;

        let result_target = std::env::var("HANDOFF_RESULT_TARGET")
            .ok()
            .filter(|v| !v.trim().is_empty());

        Ok(Self {
            database_url,
            http_addr: SocketAddr::from(([0, 0, 0, 0], http_port)),
            delivery_address,
            orchestrator_url,
            transport,
            request_timeout: Duration::from_millis(timeout_ms),
            max_db_connections,
            result_target,
        })
    }
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::Missing(key))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
