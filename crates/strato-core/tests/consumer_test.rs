// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for the ingest consumer over both bus backends.

mod common;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use common::*;
use strato_core::bus::{MessageBus, SqliteBus};
use strato_core::consumer::IngestConsumer;
use strato_core::kinds::App;
use strato_core::model::SyncState;
use strato_protocol::Frame;

const REPORT_TOPIC: &str = "agent-reports";

async fn wait_for_state(ctx: &TestContext, state: SyncState) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let app = ctx.engine::<App>().get(&ctx.env_scope(), "web").await.unwrap();
        if app.sync_status.state == state {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "app never reached {state:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_consumer_applies_reports_and_skips_garbage() {
    let ctx = TestContext::new().await;
    let app = ctx.attached_app().await;

    let bus: Arc<dyn MessageBus> = Arc::new(ctx.bus.clone());
    bus.publish(REPORT_TOPIC, "acme-shop-dev", Bytes::from_static(b"garbage"))
        .await
        .unwrap();
    let frame = Frame::report(&status_update(&app, 1)).unwrap();
    bus.publish(REPORT_TOPIC, "acme-shop-dev", frame.encode())
        .await
        .unwrap();

    let consumer = Arc::new(IngestConsumer::new(
        ctx.control_plane.clone(),
        bus,
        REPORT_TOPIC,
    ));
    let shutdown = consumer.shutdown_handle();
    let handle = tokio::spawn({
        let consumer = consumer.clone();
        async move { consumer.run().await }
    });

    wait_for_state(&ctx, SyncState::UpdatedAtAgent).await;

    shutdown.notify_one();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("consumer did not stop")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_consumer_over_sqlite_bus_acks_everything() {
    let ctx = TestContext::new().await;
    let app = ctx.attached_app().await;

    let sqlite_bus = Arc::new(
        SqliteBus::new(ctx.pool.clone()).with_poll_interval(Duration::from_millis(10)),
    );
    let bus: Arc<dyn MessageBus> = sqlite_bus.clone();

    let consumer = Arc::new(
        IngestConsumer::new(ctx.control_plane.clone(), bus.clone(), REPORT_TOPIC)
            .with_max_attempts(3),
    );
    let shutdown = consumer.shutdown_handle();
    let handle = tokio::spawn({
        let consumer = consumer.clone();
        async move { consumer.run().await }
    });

    bus.publish(REPORT_TOPIC, "acme-shop-dev", Bytes::from_static(b"\x00"))
        .await
        .unwrap();
    let frame = Frame::report(&apply_error(&app, 1, "CrashLoopBackOff")).unwrap();
    bus.publish(REPORT_TOPIC, "acme-shop-dev", frame.encode())
        .await
        .unwrap();

    wait_for_state(&ctx, SyncState::ErroredAtAgent).await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while sqlite_bus.pending(REPORT_TOPIC).await.unwrap() > 0 {
        assert!(tokio::time::Instant::now() < deadline, "reports left unacked");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    shutdown.notify_one();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("consumer did not stop")
        .unwrap()
        .unwrap();

    let stored = ctx.engine::<App>().get(&ctx.env_scope(), "web").await.unwrap();
    assert_eq!(stored.sync_status.error.as_deref(), Some("CrashLoopBackOff"));
}
