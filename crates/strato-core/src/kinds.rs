// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Built-in resource kinds.
//!
//! The payloads are plain data: the control plane stores and forwards them
//! but never interprets fields beyond [`Project::cluster_binding`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strato_protocol::ResourceType;

use crate::model::{ClusterBinding, ResourceKind, ScopeLevel};

/// Observed state shared by every built-in kind.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservedStatus {
    /// Whether the remote object is ready.
    #[serde(default, alias = "ready")]
    pub is_ready: bool,
    /// Human-readable summary from the agent.
    #[serde(default)]
    pub message: Option<String>,
    /// Free-form readiness checks.
    #[serde(default)]
    pub checks: Option<serde_json::Value>,
    /// When the agent last reconciled the object.
    #[serde(default)]
    pub last_reconcile_time: Option<DateTime<Utc>>,
}

macro_rules! resource_kind {
    ($(#[$meta:meta])* $kind:ident, $rt:expr, $level:expr, $spec:ty) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $kind;

        impl ResourceKind for $kind {
            const RESOURCE_TYPE: ResourceType = $rt;
            const SCOPE_LEVEL: ScopeLevel = $level;
            type Spec = $spec;
            type Status = ObservedStatus;
        }
    };
}

// ============================================================================
// Project
// ============================================================================

/// A project; owns a namespace on the cluster it is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Project;

/// Desired state of a project.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProjectSpec {
    /// Cluster the project is attached to; `None` while detached.
    #[serde(default)]
    pub cluster_name: Option<String>,
    /// Namespace created for the project on the cluster.
    #[serde(default)]
    pub target_namespace: Option<String>,
    /// Human-friendly name.
    #[serde(default)]
    pub display_name: Option<String>,
}

impl ResourceKind for Project {
    const RESOURCE_TYPE: ResourceType = ResourceType::Project;
    const SCOPE_LEVEL: ScopeLevel = ScopeLevel::Project;
    type Spec = ProjectSpec;
    type Status = ObservedStatus;

    fn cluster_binding(spec: &ProjectSpec) -> ClusterBinding {
        ClusterBinding::Explicit(spec.cluster_name.clone())
    }

    fn clear_cluster_binding(spec: &mut ProjectSpec) {
        spec.cluster_name = None;
    }
}

// ============================================================================
// Project-scoped kinds
// ============================================================================

/// Desired state of an environment.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EnvironmentSpec {
    /// Namespace created for the environment on the cluster.
    #[serde(default)]
    pub target_namespace: Option<String>,
    /// Ingress routing mode (e.g. `subdomain`, `path`).
    #[serde(default)]
    pub routing_mode: Option<String>,
}

resource_kind!(
    /// An environment (dev, staging, prod, ...) inside a project.
    Environment,
    ResourceType::Environment,
    ScopeLevel::Project,
    EnvironmentSpec
);

/// A forwarded port of a VPN device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VpnPort {
    /// Port on the device.
    pub port: u16,
    /// `tcp` or `udp`.
    #[serde(default = "default_protocol")]
    pub protocol: String,
}

fn default_protocol() -> String {
    "tcp".to_string()
}

/// Desired state of a VPN device.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VpnDeviceSpec {
    /// Namespace the device is currently routed into.
    #[serde(default)]
    pub active_namespace: Option<String>,
    /// Ports exposed from the device.
    #[serde(default)]
    pub ports: Vec<VpnPort>,
}

resource_kind!(
    /// A developer device joined to the project network.
    VpnDevice,
    ResourceType::VpnDevice,
    ScopeLevel::Project,
    VpnDeviceSpec
);

// ============================================================================
// Environment-scoped kinds
// ============================================================================

/// One container of an app.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
    /// Container name.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Environment variables.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Exposed ports.
    #[serde(default)]
    pub ports: Vec<u16>,
}

/// Desired state of an app.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AppSpec {
    /// Replica count.
    #[serde(default = "default_replicas")]
    pub replicas: u32,
    /// Containers.
    #[serde(default)]
    pub containers: Vec<Container>,
}

fn default_replicas() -> u32 {
    1
}

resource_kind!(
    /// A long-running workload.
    App,
    ResourceType::App,
    ScopeLevel::Environment,
    AppSpec
);

/// Desired state of a config map.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConfigSpec {
    /// Key/value data.
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

resource_kind!(
    /// Plain configuration data.
    Config,
    ResourceType::Config,
    ScopeLevel::Environment,
    ConfigSpec
);

/// Desired state of a secret.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SecretSpec {
    /// Secret values in clear text; the agent encodes them.
    #[serde(default)]
    pub string_data: BTreeMap<String, String>,
    /// Kubernetes secret type.
    #[serde(default)]
    pub secret_type: Option<String>,
}

resource_kind!(
    /// Sensitive configuration data.
    Secret,
    ResourceType::Secret,
    ScopeLevel::Environment,
    SecretSpec
);

/// One route of a router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    /// Path prefix.
    pub path: String,
    /// Backend app name.
    pub app_name: String,
    /// Backend port.
    pub port: u16,
}

/// Desired state of a router.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RouterSpec {
    /// Served domains.
    #[serde(default)]
    pub domains: Vec<String>,
    /// Routes.
    #[serde(default)]
    pub routes: Vec<Route>,
    /// Whether TLS is terminated at the router.
    #[serde(default)]
    pub https: bool,
}

resource_kind!(
    /// HTTP ingress for the apps of an environment.
    Router,
    ResourceType::Router,
    ScopeLevel::Environment,
    RouterSpec
);

/// Desired state of a managed resource.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ManagedResourceSpec {
    /// Catalog entry the resource was created from.
    pub managed_service_name: String,
    /// Rendered template; opaque to the control plane.
    #[serde(default)]
    pub resource_template: serde_json::Value,
}

resource_kind!(
    /// An instance of a managed service (database, cache, queue, ...).
    ManagedResource,
    ResourceType::ManagedResource,
    ScopeLevel::Environment,
    ManagedResourceSpec
);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_observed_status_accepts_ready_alias() {
        let status: ObservedStatus =
            serde_json::from_value(json!({"ready": true, "message": "ok"})).unwrap();
        assert!(status.is_ready);
        assert_eq!(status.message.as_deref(), Some("ok"));

        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["isReady"], true);
    }

    #[test]
    fn test_observed_status_tolerates_empty_object() {
        let status: ObservedStatus = serde_json::from_value(json!({})).unwrap();
        assert_eq!(status, ObservedStatus::default());
    }

    #[test]
    fn test_project_binding_is_explicit() {
        let mut spec = ProjectSpec {
            cluster_name: Some("eu-1".to_string()),
            ..Default::default()
        };
        assert_eq!(
            Project::cluster_binding(&spec),
            ClusterBinding::Explicit(Some("eu-1".to_string()))
        );

        Project::clear_cluster_binding(&mut spec);
        assert_eq!(Project::cluster_binding(&spec), ClusterBinding::Explicit(None));
    }

    #[test]
    fn test_other_kinds_inherit_cluster() {
        assert_eq!(
            App::cluster_binding(&AppSpec::default()),
            ClusterBinding::Inherited
        );
        assert_eq!(
            Environment::cluster_binding(&EnvironmentSpec::default()),
            ClusterBinding::Inherited
        );
    }

    #[test]
    fn test_scope_levels() {
        assert_eq!(Environment::SCOPE_LEVEL, ScopeLevel::Project);
        assert_eq!(VpnDevice::SCOPE_LEVEL, ScopeLevel::Project);
        assert_eq!(App::SCOPE_LEVEL, ScopeLevel::Environment);
        assert_eq!(ManagedResource::SCOPE_LEVEL, ScopeLevel::Environment);
    }

    #[test]
    fn test_app_spec_defaults() {
        let spec: AppSpec = serde_json::from_value(json!({})).unwrap();
        assert_eq!(spec.replicas, 1);
        assert!(spec.containers.is_empty());
    }
}
