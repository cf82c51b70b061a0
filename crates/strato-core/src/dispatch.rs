// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Dispatch gateway.
//!
//! Turns a stored resource into a [`DispatchEnvelope`] and publishes it on the
//! topic of the cluster the resource is attached to. Resources without a
//! cluster are not an error: the caller gets [`DispatchOutcome::NoClusterAttached`]
//! and decides what that means for the operation at hand.

use std::sync::Arc;

use strato_protocol::{DispatchEnvelope, Frame, SyncAction};
use tracing::{debug, instrument};

use crate::bus::MessageBus;
use crate::error::Result;
use crate::mapping::MappingIndex;
use crate::model::{ClusterBinding, Resource, ResourceKind};

/// Default suffix appended to a cluster name to form its topic.
pub const DEFAULT_TOPIC_SUFFIX: &str = "-incoming";

/// Result of a dispatch attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The envelope was published.
    Dispatched {
        /// Cluster the envelope was sent to.
        cluster_name: String,
        /// Topic it was published on.
        topic: String,
        /// Bus offset of the message.
        offset: u64,
    },
    /// Neither the resource nor its scope is attached to a cluster.
    NoClusterAttached,
}

impl DispatchOutcome {
    /// Cluster the envelope went to, if it was published.
    pub fn cluster_name(&self) -> Option<&str> {
        match self {
            DispatchOutcome::Dispatched { cluster_name, .. } => Some(cluster_name),
            DispatchOutcome::NoClusterAttached => None,
        }
    }
}

/// Publishes desired state to cluster topics.
pub struct DispatchGateway {
    bus: Arc<dyn MessageBus>,
    mappings: Arc<dyn MappingIndex>,
    topic_suffix: String,
}

impl DispatchGateway {
    /// Create a gateway with the default topic suffix.
    pub fn new(bus: Arc<dyn MessageBus>, mappings: Arc<dyn MappingIndex>) -> Self {
        Self::with_topic_suffix(bus, mappings, DEFAULT_TOPIC_SUFFIX)
    }

    /// Create a gateway publishing to `<cluster><topic_suffix>`.
    pub fn with_topic_suffix(
        bus: Arc<dyn MessageBus>,
        mappings: Arc<dyn MappingIndex>,
        topic_suffix: impl Into<String>,
    ) -> Self {
        Self {
            bus,
            mappings,
            topic_suffix: topic_suffix.into(),
        }
    }

    /// Topic owned by `cluster_name`.
    pub fn topic_for(&self, cluster_name: &str) -> String {
        format!("{}{}", cluster_name, self.topic_suffix)
    }

    /// Cluster `resource` should be synchronized to right now.
    ///
    /// Explicitly bound kinds answer from their spec; everything else follows
    /// the mapping row of its scope owner.
    pub async fn resolve_cluster<K: ResourceKind>(
        &self,
        resource: &Resource<K>,
    ) -> Result<Option<String>> {
        match K::cluster_binding(&resource.spec) {
            ClusterBinding::Explicit(cluster) => Ok(cluster.filter(|c| !c.is_empty())),
            ClusterBinding::Inherited => self.mappings.resolve_cluster(&resource.scope()).await,
        }
    }

    /// Publish `resource` with `action` to the cluster it resolves to.
    #[instrument(
        skip(self, resource),
        fields(resource_type = %K::RESOURCE_TYPE, name = %resource.name, action = %action)
    )]
    pub async fn dispatch<K: ResourceKind>(
        &self,
        resource: &Resource<K>,
        action: SyncAction,
    ) -> Result<DispatchOutcome> {
        let Some(cluster_name) = self.resolve_cluster(resource).await? else {
            debug!("No cluster attached, nothing dispatched");
            return Ok(DispatchOutcome::NoClusterAttached);
        };

        let envelope = DispatchEnvelope {
            account_name: resource.account_name.clone(),
            cluster_name: cluster_name.clone(),
            action,
            record_version: resource.record_version,
            object: resource.to_wire_object()?,
        };
        let frame = Frame::dispatch(&envelope)?;
        let topic = self.topic_for(&cluster_name);
        let offset = self
            .bus
            .publish(&topic, &resource.namespace, frame.encode())
            .await?;

        debug!(
            cluster_name = %cluster_name,
            topic = %topic,
            offset,
            record_version = resource.record_version,
            "Dispatched"
        );

        Ok(DispatchOutcome::Dispatched {
            cluster_name,
            topic,
            offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryBus;
    use crate::kinds::{App, AppSpec, Environment, Project, ProjectSpec};
    use crate::mapping::SqliteMappingIndex;
    use crate::model::{Scope, SyncStatus, UserContext};
    use chrono::Utc;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::collections::BTreeMap;

    async fn test_gateway() -> (DispatchGateway, InMemoryBus, Arc<SqliteMappingIndex>) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory SQLite pool");
        crate::migrations::SQLITE
            .run(&pool)
            .await
            .expect("Failed to run migrations");
        let bus = InMemoryBus::new();
        let mappings = Arc::new(SqliteMappingIndex::new(pool));
        let gateway = DispatchGateway::new(Arc::new(bus.clone()), mappings.clone());
        (gateway, bus, mappings)
    }

    fn resource<K: ResourceKind>(scope: &Scope, name: &str, spec: K::Spec) -> Resource<K> {
        let now = Utc::now();
        Resource {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            namespace: "acme-shop".to_string(),
            account_name: scope.account_name().to_string(),
            project_name: scope.project_name().to_string(),
            environment_name: scope.environment_name().map(str::to_string),
            cluster_name: None,
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            spec,
            status: None,
            generation: 0,
            agent_creation_timestamp: None,
            record_version: 3,
            sync_status: SyncStatus::default(),
            marked_for_deletion: false,
            created_by: UserContext::system(),
            last_updated_by: UserContext::system(),
            creation_time: now,
            update_time: now,
        }
    }

    #[tokio::test]
    async fn test_topic_naming() {
        let (gateway, _, _) = test_gateway().await;
        assert_eq!(gateway.topic_for("eu-1"), "eu-1-incoming");
    }

    #[tokio::test]
    async fn test_unattached_scope_is_not_an_error() {
        let (gateway, bus, _) = test_gateway().await;
        let scope = Scope::environment("acme", "shop", "dev");
        let app = resource::<App>(&scope, "web", AppSpec::default());

        let outcome = gateway.dispatch(&app, SyncAction::Apply).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::NoClusterAttached);
        assert!(bus.topics().await.is_empty());
    }

    #[tokio::test]
    async fn test_explicit_binding_dispatches_with_typed_version() {
        let (gateway, bus, _) = test_gateway().await;
        let scope = Scope::project("acme", "shop");
        let spec = ProjectSpec {
            cluster_name: Some("eu-1".to_string()),
            ..Default::default()
        };
        let project = resource::<Project>(&scope, "shop", spec);

        let outcome = gateway.dispatch(&project, SyncAction::Apply).await.unwrap();
        assert_eq!(outcome.cluster_name(), Some("eu-1"));

        let published = bus.published("eu-1-incoming").await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].key, "acme-shop");

        let envelope = Frame::decode_from_bytes(published[0].payload.clone())
            .unwrap()
            .decode_dispatch()
            .unwrap();
        assert_eq!(envelope.record_version, 3);
        assert_eq!(envelope.action, SyncAction::Apply);
        assert_eq!(envelope.object.name, "shop");
        assert!(envelope.object.annotations.is_empty());
    }

    #[tokio::test]
    async fn test_inherited_binding_follows_owner_mapping() {
        let (gateway, bus, mappings) = test_gateway().await;
        let project_scope = Scope::project("acme", "shop");
        let env = resource::<Environment>(&project_scope, "dev", Default::default());
        mappings.upsert(&env.mapping("us-2")).await.unwrap();

        let env_scope = Scope::environment("acme", "shop", "dev");
        let app = resource::<App>(&env_scope, "web", AppSpec::default());
        let outcome = gateway.dispatch(&app, SyncAction::Delete).await.unwrap();

        match outcome {
            DispatchOutcome::Dispatched { cluster_name, topic, .. } => {
                assert_eq!(cluster_name, "us-2");
                assert_eq!(topic, "us-2-incoming");
            }
            other => panic!("expected dispatch, got {other:?}"),
        }
        let published = bus.published("us-2-incoming").await;
        let envelope = Frame::decode_from_bytes(published[0].payload.clone())
            .unwrap()
            .decode_dispatch()
            .unwrap();
        assert_eq!(envelope.action, SyncAction::Delete);
    }
}
