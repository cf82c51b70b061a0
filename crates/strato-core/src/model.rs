// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Resource envelope, sync status and scope types.
//!
//! Every resource type shares the same [`Resource`] envelope; the per-type
//! payload (spec and observed status) is supplied by a [`ResourceKind`].

use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Debug;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use strato_protocol::{ResourceType, SyncAction, WireObject};

use crate::error::{Result, SyncError};
use crate::mapping::{MappingKey, ResourceHeirarchy, ResourceMapping};

/// Level of the ownership chain a resource type is filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeLevel {
    /// Directly inside a project.
    Project,
    /// Inside an environment of a project.
    Environment,
}

/// How a resource type finds the cluster it is synchronized to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterBinding {
    /// The cluster is resolved from the owning scope through the mapping index.
    Inherited,
    /// The resource names its cluster itself (`None` = detached).
    Explicit(Option<String>),
}

/// Per-type payload definition.
///
/// Implementors are marker types; the protocol machinery is generic over them.
pub trait ResourceKind: Clone + Debug + Send + Sync + 'static {
    /// Wire tag of this type.
    const RESOURCE_TYPE: ResourceType;
    /// Scope level resources of this type live at.
    const SCOPE_LEVEL: ScopeLevel;

    /// Desired state.
    type Spec: Serialize + DeserializeOwned + Clone + Debug + PartialEq + Send + Sync;
    /// Observed state reported by the agent.
    type Status: Serialize + DeserializeOwned + Clone + Debug + PartialEq + Send + Sync;

    /// Where the target cluster comes from.
    fn cluster_binding(_spec: &Self::Spec) -> ClusterBinding {
        ClusterBinding::Inherited
    }

    /// Drop an explicit cluster binding from the spec. Used when a scope is
    /// detached from its cluster.
    fn clear_cluster_binding(_spec: &mut Self::Spec) {}
}

/// Ownership chain a resource is filed under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "level", rename_all = "snake_case")]
pub enum Scope {
    /// A project of an account.
    Project {
        /// Tenant.
        account_name: String,
        /// Project.
        project_name: String,
    },
    /// An environment inside a project.
    Environment {
        /// Tenant.
        account_name: String,
        /// Project.
        project_name: String,
        /// Environment.
        environment_name: String,
    },
}

impl Scope {
    /// Project scope shorthand.
    pub fn project(account_name: impl Into<String>, project_name: impl Into<String>) -> Self {
        Scope::Project {
            account_name: account_name.into(),
            project_name: project_name.into(),
        }
    }

    /// Environment scope shorthand.
    pub fn environment(
        account_name: impl Into<String>,
        project_name: impl Into<String>,
        environment_name: impl Into<String>,
    ) -> Self {
        Scope::Environment {
            account_name: account_name.into(),
            project_name: project_name.into(),
            environment_name: environment_name.into(),
        }
    }

    /// Tenant owning the scope.
    pub fn account_name(&self) -> &str {
        match self {
            Scope::Project { account_name, .. } | Scope::Environment { account_name, .. } => {
                account_name
            }
        }
    }

    /// Project of the scope.
    pub fn project_name(&self) -> &str {
        match self {
            Scope::Project { project_name, .. } | Scope::Environment { project_name, .. } => {
                project_name
            }
        }
    }

    /// Environment of the scope, if any.
    pub fn environment_name(&self) -> Option<&str> {
        match self {
            Scope::Project { .. } => None,
            Scope::Environment {
                environment_name, ..
            } => Some(environment_name),
        }
    }

    /// Level of this scope.
    pub fn level(&self) -> ScopeLevel {
        match self {
            Scope::Project { .. } => ScopeLevel::Project,
            Scope::Environment { .. } => ScopeLevel::Environment,
        }
    }

    /// Resource type of the scope owner (`project` or `environment`).
    pub fn owner_type(&self) -> ResourceType {
        match self {
            Scope::Project { .. } => ResourceType::Project,
            Scope::Environment { .. } => ResourceType::Environment,
        }
    }

    /// Name of the scope owner resource.
    pub fn owner_name(&self) -> &str {
        match self {
            Scope::Project { project_name, .. } => project_name,
            Scope::Environment {
                environment_name, ..
            } => environment_name,
        }
    }

    /// Scope the owner resource itself lives in.
    ///
    /// A project owns itself; an environment lives in its project.
    pub fn owner_scope(&self) -> Scope {
        Scope::project(self.account_name(), self.project_name())
    }

    pub(crate) fn heirarchy(&self) -> ResourceHeirarchy {
        match self {
            Scope::Project { .. } => ResourceHeirarchy::Project,
            Scope::Environment { .. } => ResourceHeirarchy::Environment,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Project {
                account_name,
                project_name,
            } => write!(f, "{}/{}", account_name, project_name),
            Scope::Environment {
                account_name,
                project_name,
                environment_name,
            } => write!(f, "{}/{}/{}", account_name, project_name, environment_name),
        }
    }
}

/// Agent-facing progress of one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Dispatched (or waiting to be), no report yet.
    InQueue,
    /// Nothing in flight.
    #[default]
    Idle,
    /// Agent applied the current desired state.
    UpdatedAtAgent,
    /// Agent is tearing the remote object down.
    DeletingAtAgent,
    /// Agent failed to apply the desired state.
    ErroredAtAgent,
    /// Report received, not yet processed.
    ReceivedUpdateFromAgent,
}

impl SyncState {
    /// snake_case name as stored.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::InQueue => "in_queue",
            SyncState::Idle => "idle",
            SyncState::UpdatedAtAgent => "updated_at_agent",
            SyncState::DeletingAtAgent => "deleting_at_agent",
            SyncState::ErroredAtAgent => "errored_at_agent",
            SyncState::ReceivedUpdateFromAgent => "received_update_from_agent",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Embedded synchronization status.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SyncStatus {
    /// Last intended operation.
    pub action: SyncAction,
    /// Current state.
    pub state: SyncState,
    /// Last record version the agent confirmed.
    pub record_version: i64,
    /// When the last dispatch was scheduled.
    #[serde(default)]
    pub sync_scheduled_at: Option<DateTime<Utc>>,
    /// Timestamp of the last agent report applied.
    #[serde(default)]
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Agent error, present only in `errored_at_agent`.
    #[serde(default)]
    pub error: Option<String>,
}

/// Identity of the user (or system component) performing an operation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserContext {
    /// Stable user id, used for permission checks.
    pub user_id: String,
    /// Display name.
    #[serde(default)]
    pub user_name: String,
    /// Email.
    #[serde(default)]
    pub user_email: String,
}

impl UserContext {
    /// Build a context from its three parts.
    pub fn new(
        user_id: impl Into<String>,
        user_name: impl Into<String>,
        user_email: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            user_name: user_name.into(),
            user_email: user_email.into(),
        }
    }

    /// Identity used for control-plane initiated work (stale resync, agent reports).
    pub fn system() -> Self {
        Self::new("system", "strato", "")
    }
}

/// User-supplied part of a create or update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct ResourceInput<K: ResourceKind> {
    /// Resource name.
    pub name: String,
    /// Kubernetes namespace the object lives in.
    pub namespace: String,
    /// Labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Annotations.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Desired state.
    pub spec: K::Spec,
}

impl<K: ResourceKind> ResourceInput<K> {
    /// Input with no labels or annotations.
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, spec: K::Spec) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            spec,
        }
    }

    /// Add a label.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// Stored resource envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Resource<K: ResourceKind> {
    /// Opaque id (UUID v4), never reused.
    pub id: String,
    /// Name, unique within the scope.
    pub name: String,
    /// Kubernetes namespace, immutable.
    pub namespace: String,
    /// Tenant.
    pub account_name: String,
    /// Project (a project's own name for `Project` resources).
    pub project_name: String,
    /// Environment for environment-scoped resources.
    #[serde(default)]
    pub environment_name: Option<String>,
    /// Cluster the resource is currently attached to.
    #[serde(default)]
    pub cluster_name: Option<String>,
    /// Labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Annotations.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Desired state.
    pub spec: K::Spec,
    /// Observed state, written only from agent reports.
    #[serde(default)]
    pub status: Option<K::Status>,
    /// Agent-observed Kubernetes generation.
    #[serde(default)]
    pub generation: i64,
    /// When the agent created the remote object.
    #[serde(default)]
    pub agent_creation_timestamp: Option<DateTime<Utc>>,
    /// Desired-state version, 1 on create and +1 per accepted update.
    pub record_version: i64,
    /// Synchronization status.
    #[serde(default)]
    pub sync_status: SyncStatus,
    /// Tombstone flag.
    #[serde(default)]
    pub marked_for_deletion: bool,
    /// Creator.
    pub created_by: UserContext,
    /// Last mutating user.
    pub last_updated_by: UserContext,
    /// Creation time.
    pub creation_time: DateTime<Utc>,
    /// Last control-plane mutation time.
    pub update_time: DateTime<Utc>,
}

impl<K: ResourceKind> Resource<K> {
    /// Scope the resource is filed under.
    pub fn scope(&self) -> Scope {
        match &self.environment_name {
            Some(env) => Scope::environment(&self.account_name, &self.project_name, env),
            None => Scope::project(&self.account_name, &self.project_name),
        }
    }

    /// Unique identity within the collection.
    pub fn identity_key(&self) -> String {
        identity_key(
            &self.account_name,
            &self.project_name,
            self.environment_name.as_deref(),
            &self.name,
        )
    }

    /// Desired state as sent to the agent.
    pub fn to_wire_object(&self) -> Result<WireObject> {
        Ok(WireObject {
            kind: K::RESOURCE_TYPE,
            name: self.name.clone(),
            namespace: self.namespace.clone(),
            labels: self.labels.clone(),
            annotations: self.annotations.clone(),
            spec: serde_json::to_value(&self.spec)?,
        })
    }

    /// Key of this resource's mapping row.
    pub fn mapping_key(&self) -> MappingKey {
        MappingKey {
            resource_type: K::RESOURCE_TYPE,
            resource_name: self.name.clone(),
            resource_namespace: self.namespace.clone(),
            account_name: self.account_name.clone(),
            project_name: self.project_name.clone(),
            environment_name: self.environment_name.clone(),
        }
    }

    /// Mapping row attaching this resource to `cluster_name`.
    pub fn mapping(&self, cluster_name: &str) -> ResourceMapping {
        ResourceMapping {
            heirarchy: self.scope().heirarchy(),
            resource_type: K::RESOURCE_TYPE,
            resource_name: self.name.clone(),
            resource_namespace: self.namespace.clone(),
            account_name: self.account_name.clone(),
            cluster_name: cluster_name.to_string(),
            project_name: self.project_name.clone(),
            environment_name: self.environment_name.clone(),
        }
    }

    /// Whether the agent has confirmed the current desired state.
    pub fn is_caught_up(&self) -> bool {
        self.sync_status.record_version == self.record_version
    }
}

/// `account/project/environment-or-dash/name`
pub(crate) fn identity_key(
    account_name: &str,
    project_name: &str,
    environment_name: Option<&str>,
    name: &str,
) -> String {
    format!(
        "{}/{}/{}/{}",
        account_name,
        project_name,
        environment_name.unwrap_or("-"),
        name
    )
}

const MAX_NAME_LEN: usize = 63;

/// Validate a DNS-1123 label: 1-63 lowercase alphanumerics or `-`, starting
/// and ending with an alphanumeric.
pub fn validate_name(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(SyncError::validation(field, "must not be empty"));
    }
    if value.len() > MAX_NAME_LEN {
        return Err(SyncError::validation(
            field,
            format!("must be at most {} characters", MAX_NAME_LEN),
        ));
    }
    if !value
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
    {
        return Err(SyncError::validation(
            field,
            "may only contain lowercase letters, digits and '-'",
        ));
    }
    if value.starts_with('-') || value.ends_with('-') {
        return Err(SyncError::validation(
            field,
            "must start and end with a letter or digit",
        ));
    }
    Ok(())
}

/// Validate every name of a scope.
pub fn validate_scope(scope: &Scope) -> Result<()> {
    validate_name("account_name", scope.account_name())?;
    validate_name("project_name", scope.project_name())?;
    if let Some(env) = scope.environment_name() {
        validate_name("environment_name", env)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("name", "web").is_ok());
        assert!(validate_name("name", "web-2").is_ok());
        assert!(validate_name("name", "a").is_ok());
        assert!(validate_name("name", &"a".repeat(63)).is_ok());

        let too_long = "a".repeat(64);
        for bad in ["", "-web", "web-", "Web", "web_1", "web.1", too_long.as_str()] {
            let err = validate_name("name", bad).unwrap_err();
            assert_eq!(err.error_code(), "VALIDATION_ERROR", "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_scope_accessors() {
        let scope = Scope::environment("acme", "shop", "dev");
        assert_eq!(scope.account_name(), "acme");
        assert_eq!(scope.project_name(), "shop");
        assert_eq!(scope.environment_name(), Some("dev"));
        assert_eq!(scope.owner_type(), ResourceType::Environment);
        assert_eq!(scope.owner_name(), "dev");
        assert_eq!(scope.owner_scope(), Scope::project("acme", "shop"));
        assert_eq!(scope.to_string(), "acme/shop/dev");

        let scope = Scope::project("acme", "shop");
        assert_eq!(scope.environment_name(), None);
        assert_eq!(scope.owner_type(), ResourceType::Project);
        assert_eq!(scope.owner_name(), "shop");
        assert_eq!(scope.level(), ScopeLevel::Project);
    }

    #[test]
    fn test_identity_key_distinguishes_scope_levels() {
        assert_eq!(identity_key("acme", "shop", None, "web"), "acme/shop/-/web");
        assert_eq!(
            identity_key("acme", "shop", Some("dev"), "web"),
            "acme/shop/dev/web"
        );
    }

    #[test]
    fn test_sync_status_default() {
        let status = SyncStatus::default();
        assert_eq!(status.action, SyncAction::Apply);
        assert_eq!(status.state, SyncState::Idle);
        assert_eq!(status.record_version, 0);
        assert!(status.error.is_none());
    }

    #[test]
    fn test_sync_state_serde_names() {
        for state in [
            SyncState::InQueue,
            SyncState::Idle,
            SyncState::UpdatedAtAgent,
            SyncState::DeletingAtAgent,
            SyncState::ErroredAtAgent,
            SyncState::ReceivedUpdateFromAgent,
        ] {
            let value = serde_json::to_value(state).unwrap();
            assert_eq!(value, serde_json::Value::String(state.as_str().to_string()));
        }
    }
}
