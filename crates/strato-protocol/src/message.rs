// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Messages exchanged between the control plane and cluster agents.
//!
//! Outbound: [`DispatchEnvelope`] (control plane -> agent, on `<cluster><suffix>`).
//! Inbound: [`AgentReport`] (agent -> control plane, on the agent report topic).
//!
//! The record version travels as a typed field in both directions. The agent
//! echoes the version it applied back in every report.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Resource types known to the synchronization protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    /// Project (scope owner, explicitly attached to a cluster).
    Project,
    /// Environment inside a project (scope owner for environment resources).
    Environment,
    /// Application workload.
    App,
    /// Config map.
    Config,
    /// Secret.
    Secret,
    /// HTTP router / ingress.
    Router,
    /// Resource of a managed service (database, cache, ...).
    ManagedResource,
    /// VPN device.
    VpnDevice,
}

impl ResourceType {
    /// All resource types, in registration order.
    pub const ALL: [ResourceType; 8] = [
        ResourceType::Project,
        ResourceType::Environment,
        ResourceType::App,
        ResourceType::Config,
        ResourceType::Secret,
        ResourceType::Router,
        ResourceType::ManagedResource,
        ResourceType::VpnDevice,
    ];

    /// Canonical snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Project => "project",
            ResourceType::Environment => "environment",
            ResourceType::App => "app",
            ResourceType::Config => "config",
            ResourceType::Secret => "secret",
            ResourceType::Router => "router",
            ResourceType::ManagedResource => "managed_resource",
            ResourceType::VpnDevice => "vpn_device",
        }
    }

    /// Name of the document collection holding resources of this type.
    pub fn collection(&self) -> &'static str {
        match self {
            ResourceType::Project => "projects",
            ResourceType::Environment => "environments",
            ResourceType::App => "apps",
            ResourceType::Config => "configs",
            ResourceType::Secret => "secrets",
            ResourceType::Router => "routers",
            ResourceType::ManagedResource => "managed_resources",
            ResourceType::VpnDevice => "vpn_devices",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown resource type name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown resource type: {0}")]
pub struct UnknownResourceType(pub String);

impl FromStr for ResourceType {
    type Err = UnknownResourceType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceType::ALL
            .iter()
            .copied()
            .find(|rt| rt.as_str() == s)
            .ok_or_else(|| UnknownResourceType(s.to_string()))
    }
}

/// Operation the agent is asked to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
    /// Create or update the remote object.
    #[default]
    Apply,
    /// Tear the remote object down.
    Delete,
}

impl SyncAction {
    /// Lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncAction::Apply => "apply",
            SyncAction::Delete => "delete",
        }
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serialized desired state sent to the agent.
///
/// Carries spec and metadata only; control-plane bookkeeping (sync status, audit
/// fields, record version) stays out of the object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireObject {
    /// Resource type of the object.
    pub kind: ResourceType,
    /// Object name.
    pub name: String,
    /// Kubernetes namespace.
    pub namespace: String,
    /// Labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Annotations.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Type-specific desired state.
    pub spec: serde_json::Value,
}

/// Outbound message placed on a cluster topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchEnvelope {
    /// Tenant owning the object.
    pub account_name: String,
    /// Target cluster.
    pub cluster_name: String,
    /// What the agent should do with the object.
    pub action: SyncAction,
    /// Record version of the desired state; echoed back in reports.
    pub record_version: i64,
    /// The object itself.
    pub object: WireObject,
}

/// Object as observed by the agent.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AgentObject {
    /// Object name.
    pub name: String,
    /// Kubernetes namespace.
    pub namespace: String,
    /// Labels as present on the remote object.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Annotations as present on the remote object.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Kubernetes generation.
    #[serde(default)]
    pub generation: i64,
    /// When the remote object was created.
    #[serde(default)]
    pub creation_timestamp: Option<DateTime<Utc>>,
    /// Set while the remote object is being torn down.
    #[serde(default)]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    /// Observed status, type-specific.
    #[serde(default)]
    pub status: Option<serde_json::Value>,
}

/// What an agent report is about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReportKind {
    /// The agent applied (or is tearing down) the object and reports its status.
    StatusUpdate,
    /// The remote object is gone.
    DeleteConfirmation,
    /// Applying the object failed.
    ApplyError {
        /// Human-readable error message.
        error: String,
    },
}

/// Inbound message from an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentReport {
    /// Tenant owning the object.
    pub account_name: String,
    /// Cluster the report originates from.
    pub cluster_name: String,
    /// Resource type of the object.
    pub resource_type: ResourceType,
    /// Record version the agent operated on.
    pub record_version: i64,
    /// When the agent produced the report.
    pub timestamp: DateTime<Utc>,
    /// Reported object.
    pub object: AgentObject,
    /// Report kind.
    pub kind: ReportKind,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resource_type_parse_and_display() {
        for rt in ResourceType::ALL {
            let parsed: ResourceType = rt.as_str().parse().unwrap();
            assert_eq!(parsed, rt);
            assert_eq!(rt.to_string(), rt.as_str());
        }
        assert!("deployment".parse::<ResourceType>().is_err());
    }

    #[test]
    fn test_resource_type_serde_matches_as_str() {
        let value = serde_json::to_value(ResourceType::ManagedResource).unwrap();
        assert_eq!(value, json!("managed_resource"));
        let value = serde_json::to_value(ResourceType::VpnDevice).unwrap();
        assert_eq!(value, json!("vpn_device"));
    }

    #[test]
    fn test_collections_are_distinct() {
        let mut names: Vec<_> = ResourceType::ALL.iter().map(|rt| rt.collection()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), ResourceType::ALL.len());
    }

    #[test]
    fn test_report_kind_tagging() {
        let value = serde_json::to_value(ReportKind::ApplyError {
            error: "image pull failed".to_string(),
        })
        .unwrap();
        assert_eq!(value, json!({"type": "apply_error", "error": "image pull failed"}));

        let value = serde_json::to_value(ReportKind::DeleteConfirmation).unwrap();
        assert_eq!(value, json!({"type": "delete_confirmation"}));
    }

    #[test]
    fn test_agent_object_defaults() {
        let object: AgentObject =
            serde_json::from_value(json!({"name": "web", "namespace": "env-dev"})).unwrap();
        assert_eq!(object.generation, 0);
        assert!(object.labels.is_empty());
        assert!(object.status.is_none());
        assert!(object.deletion_timestamp.is_none());
    }

    #[test]
    fn test_sync_action_wire_names() {
        assert_eq!(serde_json::to_value(SyncAction::Apply).unwrap(), json!("apply"));
        assert_eq!(serde_json::to_value(SyncAction::Delete).unwrap(), json!("delete"));
        assert_eq!(SyncAction::default(), SyncAction::Apply);
    }
}
