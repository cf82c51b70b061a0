// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Permission check boundary.
//!
//! The IAM service lives elsewhere; the engine only asks it yes or no before
//! every mutation.

use std::fmt;

use async_trait::async_trait;
use strato_protocol::ResourceType;

use crate::error::{Result, SyncError};
use crate::model::Scope;

/// Mutation being authorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IamAction {
    /// Create a resource.
    Create,
    /// Change a resource's desired state.
    Update,
    /// Delete a resource.
    Delete,
    /// Re-send desired state to the agent.
    Resync,
    /// Detach a scope from its cluster.
    Detach,
}

impl IamAction {
    /// Lowercase verb.
    pub fn as_str(&self) -> &'static str {
        match self {
            IamAction::Create => "create",
            IamAction::Update => "update",
            IamAction::Delete => "delete",
            IamAction::Resync => "resync",
            IamAction::Detach => "detach",
        }
    }
}

impl fmt::Display for IamAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fully qualified reference to a resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    /// Type of the resource.
    pub resource_type: ResourceType,
    /// Tenant.
    pub account: String,
    /// Project.
    pub project: String,
    /// Environment, for environment-scoped resources.
    pub environment: Option<String>,
    /// Resource name.
    pub name: String,
}

impl ResourceRef {
    /// Reference to `name` of `resource_type` inside `scope`.
    pub fn new(resource_type: ResourceType, scope: &Scope, name: impl Into<String>) -> Self {
        Self {
            resource_type,
            account: scope.account_name().to_string(),
            project: scope.project_name().to_string(),
            environment: scope.environment_name().map(str::to_string),
            name: name.into(),
        }
    }

    /// Reference to the resource that defines `scope`.
    pub fn scope_owner(scope: &Scope) -> Self {
        Self::new(scope.owner_type(), &scope.owner_scope(), scope.owner_name())
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.environment {
            Some(env) => write!(
                f,
                "{}:{}/{}/{}/{}",
                self.resource_type, self.account, self.project, env, self.name
            ),
            None => write!(
                f,
                "{}:{}/{}/{}",
                self.resource_type, self.account, self.project, self.name
            ),
        }
    }
}

/// IAM client.
#[async_trait]
pub trait PermissionChecker: Send + Sync {
    /// Whether `user_id` may perform `action` on every resource in `resources`.
    ///
    /// An `Err` means the check could not be made, not that it was refused.
    async fn can(&self, user_id: &str, resources: &[ResourceRef], action: IamAction)
    -> Result<bool>;
}

/// Permits everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl PermissionChecker for AllowAll {
    async fn can(
        &self,
        _user_id: &str,
        _resources: &[ResourceRef],
        _action: IamAction,
    ) -> Result<bool> {
        Ok(true)
    }
}

/// Ask `checker` and turn a refusal into `PermissionDenied`.
pub(crate) async fn authorize(
    checker: &dyn PermissionChecker,
    user_id: &str,
    resource: ResourceRef,
    action: IamAction,
) -> Result<()> {
    let allowed = checker
        .can(user_id, std::slice::from_ref(&resource), action)
        .await
        .map_err(|e| match e {
            SyncError::PermissionCheckFailed { .. } => e,
            other => SyncError::PermissionCheckFailed {
                details: other.to_string(),
            },
        })?;

    if allowed {
        Ok(())
    } else {
        Err(SyncError::PermissionDenied {
            user_id: user_id.to_string(),
            action: action.to_string(),
            resource: resource.to_string(),
        })
    }
}
