// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for strato-core integration tests.
//!
//! Provides TestContext wiring a control plane over an in-memory SQLite
//! database and an in-process bus, plus builders for agent reports.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use sqlx::SqlitePool;

use strato_core::bus::InMemoryBus;
use strato_core::control_plane::ControlPlane;
use strato_core::dispatch::DispatchGateway;
use strato_core::engine::{EngineDeps, SyncEngine};
use strato_core::events::EventPublisher;
use strato_core::iam::{AllowAll, PermissionChecker};
use strato_core::ingest::IngestOutcome;
use strato_core::kinds::{App, AppSpec, Container, Environment, Project, ProjectSpec};
use strato_core::mapping::SqliteMappingIndex;
use strato_core::model::{Resource, ResourceInput, ResourceKind, Scope, UserContext};
use strato_core::store::SqliteStore;
use strato_protocol::{
    AgentObject, AgentReport, DispatchEnvelope, Frame, ReportKind, ResourceType,
};

pub const ACCOUNT: &str = "acme";
pub const PROJECT: &str = "shop";
pub const ENVIRONMENT: &str = "dev";
pub const CLUSTER: &str = "eu-1";
pub const CLUSTER_TOPIC: &str = "eu-1-incoming";

/// Test context: control plane, its database and the bus it dispatches to.
pub struct TestContext {
    pub pool: SqlitePool,
    pub bus: InMemoryBus,
    pub mappings: Arc<SqliteMappingIndex>,
    pub control_plane: Arc<ControlPlane>,
    pub user: UserContext,
}

impl TestContext {
    /// Context that permits every operation.
    pub async fn new() -> Self {
        Self::with_permissions(Arc::new(AllowAll)).await
    }

    /// Context with a custom permission checker.
    pub async fn with_permissions(permissions: Arc<dyn PermissionChecker>) -> Self {
        let pool = strato_core::db::connect("sqlite::memory:")
            .await
            .expect("Failed to open in-memory database");
        strato_core::migrations::run_sqlite(&pool)
            .await
            .expect("Failed to run migrations");

        let bus = InMemoryBus::new();
        let mappings = Arc::new(SqliteMappingIndex::new(pool.clone()));
        let deps = EngineDeps {
            store: Arc::new(SqliteStore::new(pool.clone())),
            mappings: mappings.clone(),
            dispatcher: Arc::new(DispatchGateway::new(
                Arc::new(bus.clone()),
                mappings.clone(),
            )),
            events: EventPublisher::new(256),
            permissions,
        };

        Self {
            pool,
            bus,
            mappings,
            control_plane: Arc::new(ControlPlane::new(deps)),
            user: UserContext::new("u-1", "Ada", "ada@example.com"),
        }
    }

    pub fn engine<K: ResourceKind>(&self) -> SyncEngine<K> {
        self.control_plane.engine::<K>()
    }

    pub fn project_scope(&self) -> Scope {
        Scope::project(ACCOUNT, PROJECT)
    }

    pub fn env_scope(&self) -> Scope {
        Scope::environment(ACCOUNT, PROJECT, ENVIRONMENT)
    }

    /// Create the test project, attached to `cluster` if given.
    pub async fn create_project(&self, cluster: Option<&str>) -> Resource<Project> {
        let spec = ProjectSpec {
            cluster_name: cluster.map(str::to_string),
            target_namespace: Some(format!("{ACCOUNT}-{PROJECT}")),
            display_name: Some("Shop".to_string()),
        };
        self.engine::<Project>()
            .create(
                &self.user,
                &self.project_scope(),
                ResourceInput::new(PROJECT, format!("{ACCOUNT}-{PROJECT}"), spec),
            )
            .await
            .expect("Failed to create project")
    }

    /// Create the test environment inside the test project.
    pub async fn create_environment(&self) -> Resource<Environment> {
        self.engine::<Environment>()
            .create(
                &self.user,
                &self.project_scope(),
                ResourceInput::new(ENVIRONMENT, env_namespace(), Default::default()),
            )
            .await
            .expect("Failed to create environment")
    }

    /// Create an app inside the test environment.
    pub async fn create_app(&self, name: &str) -> Resource<App> {
        self.engine::<App>()
            .create(&self.user, &self.env_scope(), app_input(name, "nginx:1.27"))
            .await
            .expect("Failed to create app")
    }

    /// Attached project, environment and one app named `web`.
    pub async fn attached_app(&self) -> Resource<App> {
        self.create_project(Some(CLUSTER)).await;
        self.create_environment().await;
        self.create_app("web").await
    }

    /// Envelopes published to `topic` about resources of `resource_type`.
    pub async fn dispatched(
        &self,
        topic: &str,
        resource_type: ResourceType,
    ) -> Vec<DispatchEnvelope> {
        self.bus
            .published(topic)
            .await
            .into_iter()
            .map(|delivery| {
                Frame::decode_from_bytes(delivery.payload)
                    .expect("Failed to decode frame")
                    .decode_dispatch()
                    .expect("Failed to decode dispatch")
            })
            .filter(|envelope| envelope.object.kind == resource_type)
            .collect()
    }

    /// Send a report through the framed ingest path.
    pub async fn report(&self, report: &AgentReport) -> IngestOutcome {
        let frame = Frame::report(report).expect("Failed to encode report");
        self.control_plane
            .ingest(frame.encode())
            .await
            .expect("Failed to ingest report")
    }

    /// Number of documents in `collection`.
    pub async fn count(&self, collection: &str) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE collection = ?")
            .bind(collection)
            .fetch_one(&self.pool)
            .await
            .expect("Failed to count documents")
    }
}

pub fn env_namespace() -> String {
    format!("{ACCOUNT}-{PROJECT}-{ENVIRONMENT}")
}

pub fn app_input(name: &str, image: &str) -> ResourceInput<App> {
    ResourceInput::new(
        name,
        env_namespace(),
        AppSpec {
            replicas: 2,
            containers: vec![Container {
                name: name.to_string(),
                image: image.to_string(),
                env: BTreeMap::new(),
                ports: vec![8080],
            }],
        },
    )
    .with_label("app", name)
}

/// A report about `resource` as its agent on `cluster` would send it.
pub fn report_on<K: ResourceKind>(
    resource: &Resource<K>,
    cluster: &str,
    record_version: i64,
    kind: ReportKind,
) -> AgentReport {
    let mut labels = resource.labels.clone();
    labels.insert("agent.strato.io/managed".to_string(), "true".to_string());

    AgentReport {
        account_name: resource.account_name.clone(),
        cluster_name: cluster.to_string(),
        resource_type: K::RESOURCE_TYPE,
        record_version,
        timestamp: Utc::now(),
        object: AgentObject {
            name: resource.name.clone(),
            namespace: resource.namespace.clone(),
            labels,
            annotations: resource.annotations.clone(),
            generation: record_version,
            creation_timestamp: Some(Utc::now()),
            deletion_timestamp: None,
            status: Some(json!({"isReady": true, "message": "running"})),
        },
        kind,
    }
}

pub fn status_update<K: ResourceKind>(resource: &Resource<K>, record_version: i64) -> AgentReport {
    report_on(resource, CLUSTER, record_version, ReportKind::StatusUpdate)
}

pub fn delete_confirmation<K: ResourceKind>(
    resource: &Resource<K>,
    record_version: i64,
) -> AgentReport {
    report_on(resource, CLUSTER, record_version, ReportKind::DeleteConfirmation)
}

pub fn apply_error<K: ResourceKind>(
    resource: &Resource<K>,
    record_version: i64,
    error: &str,
) -> AgentReport {
    report_on(
        resource,
        CLUSTER,
        record_version,
        ReportKind::ApplyError {
            error: error.to_string(),
        },
    )
}
