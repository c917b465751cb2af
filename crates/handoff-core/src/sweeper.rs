// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Disconnection sweeper.
//!
//! Removes every correlation still bound to a connection that went away.

use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use crate::persistence::CorrelationStore;

/// Deletes correlation records bound to a departed connection.
pub struct DisconnectionSweeper {
    store: Arc<dyn CorrelationStore>,
}

impl DisconnectionSweeper {
    /// Create a sweeper over `store`.
    pub fn new(store: Arc<dyn CorrelationStore>) -> Self {
        Self { store }
    }

    /// Sweep all records bound to `connection_id`.
    ///
    /// Returns the number of records deleted. A partially failed delete
    /// reports the rows it did remove. Other store failures are logged and
    /// reported as zero; disconnect handling never fails.
    #[instrument(skip(self))]
    pub async fn sweep(&self, connection_id: &str) -> usize {
        let correlation_ids = match self.store.list_by_connection(connection_id).await {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "Failed to scan correlations for connection");
                return 0;
            }
        };

        if correlation_ids.is_empty() {
            debug!("No correlations bound to connection");
            return 0;
        }

        match self.store.delete_bound(connection_id, &correlation_ids).await {
            Ok(deleted) if (deleted as usize) < correlation_ids.len() => {
                warn!(
                    matched = correlation_ids.len(),
                    deleted, "Swept correlations for disconnected connection, some remain"
                );
                deleted as usize
            }
            Ok(deleted) => {
                info!(
                    matched = correlation_ids.len(),
                    deleted, "Swept correlations for disconnected connection"
                );
                deleted as usize
            }
            Err(e) => {
                error!(
                    error = %e,
                    matched = correlation_ids.len(),
                    "Failed to delete correlations for connection"
                );
                0
            }
        }
    }
}
