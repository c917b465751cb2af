// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Handoff Core - Correlation and Delivery Layer
//!
//! Serves the trigger, delivery and connection-event API, and optionally the
//! in-process WebSocket gateway clients connect to.

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};

use handoff_core::config::{Config, TransportKind};
use handoff_core::orchestrator::HttpOrchestrator;
use handoff_core::persistence;
use handoff_core::runtime::HandoffRuntime;
use handoff_core::server::{self, AppState, GatewayRegistry};
use handoff_core::transport::{ManagementApiTransport, Transport};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("handoff_core=info".parse()?),
        )
        .init();

    info!("Starting Handoff Core");

    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        http_addr = %config.http_addr,
        delivery_address = %config.delivery_address,
        transport = ?config.transport,
        timeout_ms = config.request_timeout.as_millis() as u64,
        "Configuration loaded"
    );

    info!("Connecting to correlation store...");
    let store = persistence::connect(
        &config.database_url,
        config.max_db_connections,
        config.request_timeout,
    )
    .await?;
    if !store.health_check_db().await? {
        anyhow::bail!("correlation store health check failed");
    }
    info!("Correlation store ready");

    let orchestrator = Arc::new(HttpOrchestrator::new(
        config.orchestrator_url.clone(),
        config.request_timeout,
    )?);

    let gateway = match config.transport {
        TransportKind::Gateway => Some(Arc::new(GatewayRegistry::default())),
        TransportKind::ManagementApi => None,
    };
    let transport: Arc<dyn Transport> = match &gateway {
        Some(gateway) => gateway.clone(),
        None => Arc::new(ManagementApiTransport::new(config.request_timeout)?),
    };

    let mut builder = HandoffRuntime::builder()
        .store(store)
        .orchestrator(orchestrator)
        .transport(transport)
        .delivery_address(config.delivery_address.clone());
    if let Some(target) = &config.result_target {
        builder = builder.result_target(target.clone());
    }
    let runtime = Arc::new(builder.build()?);

    let listener = tokio::net::TcpListener::bind(config.http_addr).await?;
    let state = AppState { runtime, gateway };

    server::serve(listener, state, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Shutting down...");
    })
    .await?;

    info!("Shutdown complete");
    Ok(())
}
