// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for scope-wide operations: resync, detach and the stale sync sweep.

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use common::*;
use strato_core::control_plane::ControlPlane;
use strato_core::engine::DeleteOutcome;
use strato_core::ingest::IngestOutcome;
use strato_core::kinds::{App, Config, ConfigSpec, Environment, Project, VpnDevice, VpnDeviceSpec};
use strato_core::mapping::MappingIndex;
use strato_core::model::{ResourceInput, SyncState};
use strato_core::resync_worker::{StaleSyncWorker, StaleSyncWorkerConfig};
use strato_protocol::ResourceType;

async fn create_config(ctx: &TestContext) {
    let spec = ConfigSpec {
        data: BTreeMap::from([("LOG_LEVEL".to_string(), "debug".to_string())]),
    };
    ctx.engine::<Config>()
        .create(
            &ctx.user,
            &ctx.env_scope(),
            ResourceInput::new("settings", env_namespace(), spec),
        )
        .await
        .expect("Failed to create config");
}

async fn create_vpn_device(ctx: &TestContext) {
    ctx.engine::<VpnDevice>()
        .create(
            &ctx.user,
            &ctx.project_scope(),
            ResourceInput::new("laptop", format!("{ACCOUNT}-{PROJECT}"), VpnDeviceSpec::default()),
        )
        .await
        .expect("Failed to create VPN device");
}

fn stale_worker(ctx: &TestContext, stale_after: Duration) -> StaleSyncWorker {
    StaleSyncWorker::new(
        ctx.control_plane.clone(),
        StaleSyncWorkerConfig {
            poll_interval: Duration::from_secs(3600),
            stale_after,
        },
    )
}

// ============================================================================
// Resync
// ============================================================================

#[tokio::test]
async fn test_resync_environment_scope() {
    let ctx = TestContext::new().await;
    let app = ctx.attached_app().await;
    create_vpn_device(&ctx).await;
    ctx.report(&status_update(&app, 1)).await;

    let dispatched = ctx
        .control_plane
        .resync_scope(&ctx.user, &ctx.env_scope())
        .await
        .unwrap();
    // the environment itself and its app; project-level kinds stay out
    assert_eq!(dispatched, 2);

    let app = ctx.engine::<App>().get(&ctx.env_scope(), "web").await.unwrap();
    assert_eq!(app.sync_status.state, SyncState::InQueue);
    assert_eq!(app.sync_status.record_version, 1);
    assert_eq!(app.record_version, 1);

    assert_eq!(ctx.dispatched(CLUSTER_TOPIC, ResourceType::App).await.len(), 2);
    assert_eq!(
        ctx.dispatched(CLUSTER_TOPIC, ResourceType::VpnDevice).await.len(),
        1
    );
}

#[tokio::test]
async fn test_resync_scope_validates_scope() {
    let ctx = TestContext::new().await;
    let err = ctx
        .control_plane
        .resync_scope(&ctx.user, &strato_core::Scope::project("", PROJECT))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "VALIDATION_ERROR");
}

// ============================================================================
// Detach
// ============================================================================

#[tokio::test]
async fn test_detach_project_keeps_resources() {
    let ctx = TestContext::new().await;
    let app = ctx.attached_app().await;
    create_config(&ctx).await;

    let summary = ctx
        .control_plane
        .detach_scope(&ctx.user, &ctx.project_scope(), false)
        .await
        .unwrap();
    assert_eq!(summary.mappings_removed, 4);
    assert_eq!(summary.detached, 4);
    assert_eq!(summary.purged, 0);

    assert!(
        ctx.mappings
            .list_for_scope(&ctx.project_scope())
            .await
            .unwrap()
            .is_empty()
    );

    let project = ctx
        .engine::<Project>()
        .get(&ctx.project_scope(), PROJECT)
        .await
        .unwrap();
    assert_eq!(project.cluster_name, None);
    assert_eq!(project.spec.cluster_name, None);
    let stored = ctx.engine::<App>().get(&ctx.env_scope(), "web").await.unwrap();
    assert_eq!(stored.cluster_name, None);
    assert_eq!(stored.spec, app.spec);

    // the old cluster can no longer report on it
    assert_eq!(ctx.report(&status_update(&app, 1)).await, IngestOutcome::Ignored);

    // and nothing is dispatched until the project is attached again
    let before = ctx.bus.published(CLUSTER_TOPIC).await.len();
    let dispatched = ctx
        .control_plane
        .resync_scope(&ctx.user, &ctx.project_scope())
        .await
        .unwrap();
    assert_eq!(dispatched, 0);
    assert_eq!(ctx.bus.published(CLUSTER_TOPIC).await.len(), before);
}

#[tokio::test]
async fn test_detach_environment_with_purge() {
    let ctx = TestContext::new().await;
    ctx.attached_app().await;
    create_config(&ctx).await;
    create_vpn_device(&ctx).await;

    let summary = ctx
        .control_plane
        .detach_scope(&ctx.user, &ctx.env_scope(), true)
        .await
        .unwrap();
    assert_eq!(summary.mappings_removed, 3);
    assert_eq!(summary.detached, 1);
    assert_eq!(summary.purged, 2);

    assert_eq!(ctx.count("apps").await, 0);
    assert_eq!(ctx.count("configs").await, 0);

    // the scope owner survives, without a cluster
    let env = ctx
        .engine::<Environment>()
        .get(&ctx.project_scope(), ENVIRONMENT)
        .await
        .unwrap();
    assert_eq!(env.cluster_name, None);

    // project-level resources are untouched
    let project = ctx
        .engine::<Project>()
        .get(&ctx.project_scope(), PROJECT)
        .await
        .unwrap();
    assert_eq!(project.cluster_name.as_deref(), Some(CLUSTER));
    let device = ctx
        .engine::<VpnDevice>()
        .get(&ctx.project_scope(), "laptop")
        .await
        .unwrap();
    assert_eq!(device.cluster_name.as_deref(), Some(CLUSTER));
    assert!(
        ctx.mappings
            .find_for_resource(&device.mapping_key())
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn test_detach_project_with_purge_keeps_only_the_project() {
    let ctx = TestContext::new().await;
    ctx.attached_app().await;
    create_config(&ctx).await;
    create_vpn_device(&ctx).await;

    let summary = ctx
        .control_plane
        .detach_scope(&ctx.user, &ctx.project_scope(), true)
        .await
        .unwrap();
    assert_eq!(summary.mappings_removed, 5);
    assert_eq!(summary.detached, 1);
    assert_eq!(summary.purged, 4);

    for collection in ["environments", "apps", "configs", "vpn_devices"] {
        assert_eq!(ctx.count(collection).await, 0, "{collection} left behind");
    }
    let project = ctx
        .engine::<Project>()
        .get(&ctx.project_scope(), PROJECT)
        .await
        .unwrap();
    assert_eq!(project.cluster_name, None);
}

// ============================================================================
// Stale sync sweep
// ============================================================================

#[tokio::test]
async fn test_stale_sweep_resends_unanswered_dispatches() {
    let ctx = TestContext::new().await;
    let app = ctx.attached_app().await;
    tokio::time::sleep(Duration::from_millis(5)).await;

    let fresh = stale_worker(&ctx, Duration::from_secs(3600));
    assert_eq!(fresh.run_once().await.unwrap(), 0);

    let worker = stale_worker(&ctx, Duration::ZERO);
    // project, environment and app were never confirmed
    assert_eq!(worker.run_once().await.unwrap(), 3);

    let envelopes = ctx.dispatched(CLUSTER_TOPIC, ResourceType::App).await;
    assert_eq!(envelopes.len(), 2);
    assert_eq!(envelopes[1].record_version, 1);

    // re-sending leaves the status alone
    let stored = ctx.engine::<App>().get(&ctx.env_scope(), "web").await.unwrap();
    assert_eq!(stored.sync_status, app.sync_status);

    assert_eq!(ctx.report(&status_update(&app, 1)).await, IngestOutcome::Applied);
    assert_eq!(worker.run_once().await.unwrap(), 2);
    assert_eq!(ctx.dispatched(CLUSTER_TOPIC, ResourceType::App).await.len(), 2);
}

#[tokio::test]
async fn test_stale_sweep_removes_orphaned_tombstone() {
    let ctx = TestContext::new().await;
    ctx.attached_app().await;
    let outcome = ctx
        .engine::<App>()
        .delete(&ctx.user, &ctx.env_scope(), "web")
        .await
        .unwrap();
    assert_eq!(outcome, DeleteOutcome::PendingConfirmation);

    ctx.control_plane
        .detach_scope(&ctx.user, &ctx.project_scope(), false)
        .await
        .unwrap();
    assert_eq!(ctx.count("apps").await, 1);

    tokio::time::sleep(Duration::from_millis(5)).await;
    let dispatched = stale_worker(&ctx, Duration::ZERO).run_once().await.unwrap();
    assert_eq!(dispatched, 0);
    assert_eq!(ctx.count("apps").await, 0);
}

#[tokio::test]
async fn test_stale_worker_stops_on_shutdown() {
    let ctx = TestContext::new().await;
    let worker = Arc::new(stale_worker(&ctx, Duration::from_secs(300)));
    let shutdown = worker.shutdown_handle();

    let handle = tokio::spawn({
        let worker = worker.clone();
        async move { worker.run().await }
    });

    shutdown.notify_one();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("worker did not stop")
        .unwrap();
}

// ============================================================================
// Routing
// ============================================================================

#[tokio::test]
async fn test_unregistered_type_is_ignored() {
    let ctx = TestContext::new().await;
    let app = ctx.attached_app().await;

    let mut control_plane = ControlPlane::empty(ctx.control_plane.deps().clone());
    assert!(control_plane.handle(ResourceType::App).is_none());
    assert_eq!(
        control_plane.route(&status_update(&app, 1)).await.unwrap(),
        IngestOutcome::Ignored
    );

    control_plane.register::<App>();
    assert_eq!(control_plane.resource_types(), vec![ResourceType::App]);
    assert_eq!(
        control_plane.route(&status_update(&app, 1)).await.unwrap(),
        IngestOutcome::Applied
    );
}
