// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker re-sending stale dispatches.
//!
//! A resource stays `in_queue` until its agent reports back. If the dispatch
//! never left (bus failure after the store write) or the agent never answered,
//! this worker sends the current desired state again once the resource has
//! been waiting longer than `stale_after`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::control_plane::ControlPlane;
use crate::error::Result;

/// Configuration for the stale sync worker.
#[derive(Debug, Clone)]
pub struct StaleSyncWorkerConfig {
    /// How often to sweep.
    pub poll_interval: Duration,
    /// How long a resource may wait in the queue before it is re-sent.
    pub stale_after: Duration,
}

impl Default for StaleSyncWorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            stale_after: Duration::from_secs(300),
        }
    }
}

impl From<&Config> for StaleSyncWorkerConfig {
    fn from(config: &Config) -> Self {
        Self {
            poll_interval: config.stale_sync_interval,
            stale_after: config.stale_sync_after,
        }
    }
}

/// Periodically re-dispatches resources stuck in `in_queue`.
pub struct StaleSyncWorker {
    control_plane: Arc<ControlPlane>,
    config: StaleSyncWorkerConfig,
    shutdown: Arc<Notify>,
}

impl StaleSyncWorker {
    /// Create a new worker.
    pub fn new(control_plane: Arc<ControlPlane>, config: StaleSyncWorkerConfig) -> Self {
        Self {
            control_plane,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the sweep loop until shutdown is signalled.
    pub async fn run(&self) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            stale_after_secs = self.config.stale_after.as_secs(),
            "Stale sync worker started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Stale sync worker received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.run_once().await {
                        error!(error = %e, "Stale sync sweep failed");
                    }
                }
            }
        }

        info!("Stale sync worker stopped");
    }

    /// One sweep. Returns the number of resources re-sent.
    pub async fn run_once(&self) -> Result<usize> {
        let dispatched = self
            .control_plane
            .resync_stale(self.config.stale_after)
            .await?;
        debug!(dispatched, "Stale sync sweep finished");
        Ok(dispatched)
    }
}
