// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Agent report consumer.
//!
//! Subscribes to the shared report topic and feeds every delivery to the
//! control plane. A delivery is acked once handled, including reports that
//! could not be decoded or matched: redelivering them would not help. Only
//! transient failures (database, bus) are nacked for redelivery, up to
//! `max_attempts` deliveries.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::bus::{Delivery, MessageBus, Subscription};
use crate::control_plane::ControlPlane;
use crate::error::Result;

/// Default number of deliveries before a transiently failing report is dropped.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Pause after the subscription itself fails.
const SUBSCRIPTION_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Background task consuming agent reports.
pub struct IngestConsumer {
    control_plane: Arc<ControlPlane>,
    bus: Arc<dyn MessageBus>,
    topic: String,
    max_attempts: u32,
    shutdown: Arc<Notify>,
}

impl IngestConsumer {
    /// Create a consumer of `topic`.
    pub fn new(
        control_plane: Arc<ControlPlane>,
        bus: Arc<dyn MessageBus>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            control_plane,
            bus,
            topic: topic.into(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Set how many deliveries a transiently failing report gets.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Get a handle that can be used to signal shutdown.
    ///
    /// Use `notify_one` so a signal sent while a report is being processed is
    /// not lost.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Consume until shutdown is signalled or the topic ends.
    pub async fn run(&self) -> Result<()> {
        let mut subscription = self.bus.subscribe(&self.topic).await?;
        info!(topic = %self.topic, "Ingest consumer started");

        loop {
            let next = tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Ingest consumer received shutdown signal");
                    break;
                }

                next = subscription.next() => next,
            };

            match next {
                Ok(Some(delivery)) => self.process(subscription.as_mut(), &delivery).await,
                Ok(None) => {
                    info!(topic = %self.topic, "Report topic closed");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Failed to receive report");
                    tokio::time::sleep(SUBSCRIPTION_RETRY_DELAY).await;
                }
            }
        }

        info!("Ingest consumer stopped");
        Ok(())
    }

    async fn process(&self, subscription: &mut dyn Subscription, delivery: &Delivery) {
        let settled = match self.control_plane.ingest(delivery.payload.clone()).await {
            Ok(outcome) => {
                debug!(offset = delivery.offset, outcome = ?outcome, "Report processed");
                subscription.ack(delivery).await
            }
            Err(e) if e.is_transient() && delivery.attempt < self.max_attempts => {
                warn!(
                    offset = delivery.offset,
                    attempt = delivery.attempt,
                    error = %e,
                    "Report processing failed, will retry"
                );
                subscription.nack(delivery).await
            }
            Err(e) => {
                error!(
                    offset = delivery.offset,
                    attempt = delivery.attempt,
                    error_code = e.error_code(),
                    error = %e,
                    "Dropping report"
                );
                subscription.ack(delivery).await
            }
        };

        if let Err(e) = settled {
            error!(offset = delivery.offset, error = %e, "Failed to settle delivery");
        }
    }
}
