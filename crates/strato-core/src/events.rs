// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Resource lifecycle events.
//!
//! Fan-out over a tokio broadcast channel. Publishing never fails and never
//! waits: with no subscribers the event is dropped, and a subscriber that
//! falls behind by more than the channel capacity sees `Lagged`.

use std::fmt;

use serde::{Deserialize, Serialize};
use strato_protocol::ResourceType;
use tokio::sync::broadcast;
use tracing::debug;

use crate::model::{Resource, ResourceKind};

/// Default capacity of the event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// What happened to a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Created.
    Added,
    /// Desired or observed state changed.
    Updated,
    /// Physically removed.
    Deleted,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventKind::Added => "added",
            EventKind::Updated => "updated",
            EventKind::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

/// One lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceEvent {
    /// What happened.
    pub kind: EventKind,
    /// Type of the resource.
    pub resource_type: ResourceType,
    /// Tenant.
    pub account_name: String,
    /// Project.
    pub project_name: String,
    /// Environment, for environment-scoped resources.
    pub environment_name: Option<String>,
    /// Cluster the resource was attached to at the time.
    pub cluster_name: Option<String>,
    /// Resource name.
    pub name: String,
    /// Resource namespace.
    pub namespace: String,
}

impl ResourceEvent {
    /// Event about `resource`.
    pub fn of<K: ResourceKind>(kind: EventKind, resource: &Resource<K>) -> Self {
        Self {
            kind,
            resource_type: K::RESOURCE_TYPE,
            account_name: resource.account_name.clone(),
            project_name: resource.project_name.clone(),
            environment_name: resource.environment_name.clone(),
            cluster_name: resource.cluster_name.clone(),
            name: resource.name.clone(),
            namespace: resource.namespace.clone(),
        }
    }
}

/// Broadcasts [`ResourceEvent`]s.
#[derive(Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<ResourceEvent>,
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventPublisher {
    /// Create a publisher whose subscribers buffer up to `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ResourceEvent> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publish an event.
    pub fn publish(&self, event: ResourceEvent) {
        let kind = event.kind;
        let resource_type = event.resource_type;
        if self.sender.send(event).is_err() {
            debug!(
                kind = %kind,
                resource_type = %resource_type,
                "No event subscribers, event dropped"
            );
        }
    }

    /// Publish an event about `resource`.
    pub fn emit<K: ResourceKind>(&self, kind: EventKind, resource: &Resource<K>) {
        self.publish(ResourceEvent::of(kind, resource));
    }
}
