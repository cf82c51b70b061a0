// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Strato control-plane daemon.
//!
//! Runs the background half of the control plane:
//! - the ingest consumer applying agent reports from the report topic
//! - the stale sync worker re-sending dispatches nobody answered
//! - the bus cleanup worker purging acked messages past retention
//!
//! Mutations come from an embedding API layer through the library.

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};

use strato_core::bus::{MessageBus, SqliteBus};
use strato_core::bus_cleanup_worker::{BusCleanupWorker, BusCleanupWorkerConfig};
use strato_core::config::Config;
use strato_core::consumer::IngestConsumer;
use strato_core::control_plane::ControlPlane;
use strato_core::db;
use strato_core::dispatch::DispatchGateway;
use strato_core::engine::EngineDeps;
use strato_core::events::EventPublisher;
use strato_core::iam::AllowAll;
use strato_core::mapping::SqliteMappingIndex;
use strato_core::migrations;
use strato_core::resync_worker::{StaleSyncWorker, StaleSyncWorkerConfig};
use strato_core::store::{DocumentStore, SqliteStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("strato_core=info".parse()?),
        )
        .init();

    info!("Starting Strato control plane");

    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        agent_topic = %config.agent_topic,
        cluster_topic_suffix = %config.cluster_topic_suffix,
        stale_sync_after_secs = config.stale_sync_after.as_secs(),
        "Configuration loaded"
    );

    info!("Connecting to database...");
    let pool = db::connect(&config.database_url).await?;

    info!("Running database migrations...");
    migrations::run_sqlite(&pool).await?;
    info!("Migrations completed");

    let sqlite_bus =
        Arc::new(SqliteBus::new(pool.clone()).with_poll_interval(config.bus_poll_interval));
    let bus: Arc<dyn MessageBus> = sqlite_bus.clone();
    let mappings = Arc::new(SqliteMappingIndex::new(pool.clone()));
    let deps = EngineDeps {
        store: Arc::new(SqliteStore::new(pool.clone())),
        mappings: mappings.clone(),
        dispatcher: Arc::new(DispatchGateway::with_topic_suffix(
            bus.clone(),
            mappings,
            config.cluster_topic_suffix.clone(),
        )),
        events: EventPublisher::new(config.event_channel_capacity),
        permissions: Arc::new(AllowAll),
    };

    if !deps.store.health_check().await? {
        anyhow::bail!("Database health check failed");
    }
    info!("Database health check passed");

    let control_plane = Arc::new(ControlPlane::new(deps));
    info!(
        resource_types = ?control_plane.resource_types(),
        "Control plane initialized"
    );

    let consumer = Arc::new(IngestConsumer::new(
        control_plane.clone(),
        bus.clone(),
        config.agent_topic.clone(),
    ));
    let consumer_shutdown = consumer.shutdown_handle();
    let consumer_handle = tokio::spawn({
        let consumer = consumer.clone();
        async move {
            if let Err(e) = consumer.run().await {
                error!("Ingest consumer error: {}", e);
            }
        }
    });

    let worker = Arc::new(StaleSyncWorker::new(
        control_plane.clone(),
        StaleSyncWorkerConfig::from(&config),
    ));
    let worker_shutdown = worker.shutdown_handle();
    let worker_handle = tokio::spawn({
        let worker = worker.clone();
        async move { worker.run().await }
    });

    let cleanup = Arc::new(BusCleanupWorker::new(
        sqlite_bus,
        BusCleanupWorkerConfig::from(&config),
    ));
    let cleanup_shutdown = cleanup.shutdown_handle();
    let cleanup_handle = tokio::spawn({
        let cleanup = cleanup.clone();
        async move { cleanup.run().await }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    consumer_shutdown.notify_one();
    worker_shutdown.notify_one();
    cleanup_shutdown.notify_one();
    for (name, handle) in [
        ("consumer", consumer_handle),
        ("stale sync worker", worker_handle),
        ("bus cleanup worker", cleanup_handle),
    ] {
        if tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .is_err()
        {
            error!(task = name, "Task did not stop in time");
        }
    }

    pool.close().await;
    info!("Shutdown complete");

    Ok(())
}
