// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Resource mapping index.
//!
//! A denormalized record of which cluster every attached resource belongs to.
//! The dispatch gateway asks it which cluster a scope targets; detaching a
//! scope uses it to find everything that has to stop being synchronized.

pub mod sqlite;

pub use self::sqlite::SqliteMappingIndex;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strato_protocol::ResourceType;

use crate::error::Result;
use crate::model::Scope;

/// Level of the scope a mapped resource lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceHeirarchy {
    /// Project-level resource.
    Project,
    /// Environment-level resource.
    Environment,
}

impl ResourceHeirarchy {
    /// Lowercase name as stored.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceHeirarchy::Project => "project",
            ResourceHeirarchy::Environment => "environment",
        }
    }
}

impl fmt::Display for ResourceHeirarchy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceMapping {
    /// Scope level.
    pub heirarchy: ResourceHeirarchy,
    /// Resource type.
    pub resource_type: ResourceType,
    /// Resource name.
    pub resource_name: String,
    /// Resource namespace.
    pub resource_namespace: String,
    /// Tenant.
    pub account_name: String,
    /// Cluster the resource is attached to.
    pub cluster_name: String,
    /// Project.
    pub project_name: String,
    /// Environment, for environment-level resources.
    pub environment_name: Option<String>,
}

impl ResourceMapping {
    /// Identity of the mapped resource.
    pub fn key(&self) -> MappingKey {
        MappingKey {
            resource_type: self.resource_type,
            resource_name: self.resource_name.clone(),
            resource_namespace: self.resource_namespace.clone(),
            account_name: self.account_name.clone(),
            project_name: self.project_name.clone(),
            environment_name: self.environment_name.clone(),
        }
    }
}

/// Identity of a mapped resource, independent of the cluster it sits on.
///
/// Two projects may hold environments with the same name and namespace, so
/// the owning project and environment are part of the identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MappingKey {
    /// Resource type.
    pub resource_type: ResourceType,
    /// Resource name.
    pub resource_name: String,
    /// Resource namespace.
    pub resource_namespace: String,
    /// Tenant.
    pub account_name: String,
    /// Project.
    pub project_name: String,
    /// Environment, for environment-level resources.
    pub environment_name: Option<String>,
}

/// Mapping index backend.
#[async_trait]
pub trait MappingIndex: Send + Sync {
    /// Insert or refresh a row. Rows for the same resource under another
    /// cluster (or scope level) are removed in the same transaction.
    async fn upsert(&self, mapping: &ResourceMapping) -> Result<()>;

    /// Cluster the scope owner is attached to, if any.
    async fn resolve_cluster(&self, scope: &Scope) -> Result<Option<String>>;

    /// Row of one resource, if attached.
    async fn find_for_resource(&self, key: &MappingKey) -> Result<Option<ResourceMapping>>;

    /// Remove the row of one resource. Returns the number of rows removed.
    async fn remove_for_resource(&self, key: &MappingKey) -> Result<u64>;

    /// Every row inside `scope`, including the scope owner's.
    async fn list_for_scope(&self, scope: &Scope) -> Result<Vec<ResourceMapping>>;

    /// Remove every row inside `scope`. Returns the number of rows removed.
    async fn remove_for_scope(&self, scope: &Scope) -> Result<u64>;

    /// Point every row inside `scope` at `cluster_name`. Returns the number
    /// of rows changed.
    async fn reassign_scope(&self, scope: &Scope, cluster_name: &str) -> Result<u64>;
}
