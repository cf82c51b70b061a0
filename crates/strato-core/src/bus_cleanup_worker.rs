// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker purging acknowledged messages from the SQLite bus.
//!
//! Every message stays in `bus_messages` after it is acked. Acked messages
//! older than the retention period are deleted on each sweep; unacked ones are
//! never touched.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, error, info};

use crate::bus::SqliteBus;
use crate::config::Config;
use crate::error::Result;

/// Configuration for the bus cleanup worker.
#[derive(Debug, Clone)]
pub struct BusCleanupWorkerConfig {
    /// How often to purge.
    pub poll_interval: Duration,
    /// How long acked messages are kept.
    pub retention: Duration,
}

impl Default for BusCleanupWorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3600), // 1 hour
            retention: Duration::from_secs(24 * 3600), // 1 day
        }
    }
}

impl From<&Config> for BusCleanupWorkerConfig {
    fn from(config: &Config) -> Self {
        Self {
            poll_interval: config.bus_cleanup_interval,
            retention: config.bus_retention,
        }
    }
}

/// Periodically deletes acked bus messages past their retention.
pub struct BusCleanupWorker {
    bus: Arc<SqliteBus>,
    config: BusCleanupWorkerConfig,
    shutdown: Arc<Notify>,
}

impl BusCleanupWorker {
    /// Create a new worker.
    pub fn new(bus: Arc<SqliteBus>, config: BusCleanupWorkerConfig) -> Self {
        Self {
            bus,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the purge loop until shutdown is signalled.
    pub async fn run(&self) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            retention_secs = self.config.retention.as_secs(),
            "Bus cleanup worker started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Bus cleanup worker received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.run_once().await {
                        error!(error = %e, "Failed to purge acked bus messages");
                    }
                }
            }
        }

        info!("Bus cleanup worker stopped");
    }

    /// One purge. Returns the number of messages deleted.
    pub async fn run_once(&self) -> Result<u64> {
        let purged = self.bus.purge_acked(self.config.retention).await?;
        if purged > 0 {
            info!(purged, "Purged acked bus messages");
        } else {
            debug!("No acked bus messages past retention");
        }
        Ok(purged)
    }
}
