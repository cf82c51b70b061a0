// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Generic synchronization engine.
//!
//! One [`SyncEngine`] per resource kind drives the outbound half of the
//! protocol: it validates and authorizes mutations, assigns record versions,
//! persists through field-level patches, maintains the mapping index, emits
//! lifecycle events and hands the result to the dispatch gateway. The inbound
//! half (agent reports) is in [`crate::ingest`].

use std::sync::Arc;

use chrono::Utc;
use strato_protocol::{ResourceType, SyncAction};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::dispatch::{DispatchGateway, DispatchOutcome};
use crate::error::{Result, SyncError};
use crate::events::{EventKind, EventPublisher};
use crate::iam::{IamAction, PermissionChecker, ResourceRef, authorize};
use crate::mapping::MappingIndex;
use crate::model::{
    Resource, ResourceInput, ResourceKind, Scope, ScopeLevel, UserContext, validate_name,
    validate_scope,
};
use crate::store::{DocumentStore, Filter, Patch, Repository};
use crate::sync;

/// Attempts of the record-version compare-and-set before an update gives up.
pub const MAX_UPDATE_ATTEMPTS: usize = 5;

/// Collaborators shared by every engine.
#[derive(Clone)]
pub struct EngineDeps {
    /// Document store.
    pub store: Arc<dyn DocumentStore>,
    /// Resource mapping index.
    pub mappings: Arc<dyn MappingIndex>,
    /// Outbound gateway.
    pub dispatcher: Arc<DispatchGateway>,
    /// Lifecycle event fan-out.
    pub events: EventPublisher,
    /// IAM client.
    pub permissions: Arc<dyn PermissionChecker>,
}

/// Result of [`SyncEngine::delete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// No cluster was attached; the resource is gone.
    Removed,
    /// Tombstoned and dispatched; removed once the agent confirms.
    PendingConfirmation,
}

/// Protocol engine for resource kind `K`.
pub struct SyncEngine<K: ResourceKind> {
    deps: EngineDeps,
    repo: Repository<K>,
}

impl<K: ResourceKind> Clone for SyncEngine<K> {
    fn clone(&self) -> Self {
        Self {
            deps: self.deps.clone(),
            repo: self.repo.clone(),
        }
    }
}

pub(crate) fn by_id(id: &str) -> Filter {
    Filter::new().eq("id", id)
}

// Scope-owner documents are project-level: a project, or an environment of one.
fn owner_filter(scope: &Scope) -> Filter {
    Filter::new()
        .eq("account_name", scope.account_name())
        .eq("project_name", scope.project_name())
        .eq("environment_name", Option::<String>::None)
        .eq("name", scope.owner_name())
}

impl<K: ResourceKind> SyncEngine<K> {
    /// Create an engine over `deps`.
    pub fn new(deps: EngineDeps) -> Self {
        let repo = Repository::new(deps.store.clone());
        Self { deps, repo }
    }

    /// Resource type handled by this engine.
    pub fn resource_type(&self) -> ResourceType {
        K::RESOURCE_TYPE
    }

    pub(crate) fn deps(&self) -> &EngineDeps {
        &self.deps
    }

    pub(crate) fn repo(&self) -> &Repository<K> {
        &self.repo
    }

    // ========================================================================
    // Reads
    // ========================================================================

    fn name_filter(scope: &Scope, name: &str) -> Filter {
        Filter::new()
            .eq("account_name", scope.account_name())
            .eq("project_name", scope.project_name())
            .eq("environment_name", scope.environment_name())
            .eq("name", name)
    }

    /// Resources belonging to `scope`, including the scope owner itself.
    ///
    /// A project scope covers everything in the project. An environment scope
    /// covers the environment resource and the resources filed inside it, but
    /// never project-level kinds. `None` when `K` has no members in `scope`.
    pub(crate) fn member_filter(scope: &Scope) -> Option<Filter> {
        let base = Filter::new()
            .eq("account_name", scope.account_name())
            .eq("project_name", scope.project_name());

        match scope.environment_name() {
            None => Some(base),
            Some(env) if K::RESOURCE_TYPE == ResourceType::Environment => {
                Some(base.eq("name", env))
            }
            Some(_) if K::SCOPE_LEVEL == ScopeLevel::Project => None,
            Some(env) => Some(base.eq("environment_name", env)),
        }
    }

    /// Look a resource up by name.
    pub async fn find(&self, scope: &Scope, name: &str) -> Result<Option<Resource<K>>> {
        self.repo.find_one(&Self::name_filter(scope, name)).await
    }

    /// Fetch a resource by name, failing with `NotFound`.
    pub async fn get(&self, scope: &Scope, name: &str) -> Result<Resource<K>> {
        self.find(scope, name).await?.ok_or_else(|| SyncError::NotFound {
            resource_type: K::RESOURCE_TYPE.to_string(),
            name: name.to_string(),
        })
    }

    /// Resources filed directly in `scope`, tombstoned ones included.
    pub async fn list(&self, scope: &Scope) -> Result<Vec<Resource<K>>> {
        let filter = Filter::new()
            .eq("account_name", scope.account_name())
            .eq("project_name", scope.project_name())
            .eq("environment_name", scope.environment_name());
        self.repo.find(&filter).await
    }

    pub(crate) async fn members(&self, scope: &Scope) -> Result<Vec<Resource<K>>> {
        match Self::member_filter(scope) {
            Some(filter) => self.repo.find(&filter).await,
            None => Ok(Vec::new()),
        }
    }

    /// The resource an agent report is about.
    pub(crate) async fn find_reported(
        &self,
        account_name: &str,
        cluster_name: &str,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Resource<K>>> {
        let filter = Filter::new()
            .eq("account_name", account_name)
            .eq("cluster_name", cluster_name)
            .eq("namespace", namespace)
            .eq("name", name);
        self.repo.find_one(&filter).await
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    fn validate_placement(scope: &Scope, name: &str) -> Result<()> {
        validate_scope(scope)?;
        if scope.level() != K::SCOPE_LEVEL {
            return Err(SyncError::validation(
                "scope",
                format!(
                    "{} resources live in a {} scope, got '{}'",
                    K::RESOURCE_TYPE,
                    match K::SCOPE_LEVEL {
                        ScopeLevel::Project => "project",
                        ScopeLevel::Environment => "environment",
                    },
                    scope
                ),
            ));
        }
        if K::RESOURCE_TYPE == ResourceType::Project && scope.project_name() != name {
            return Err(SyncError::validation(
                "name",
                "a project's name must match the project of its scope",
            ));
        }
        Ok(())
    }

    async fn ensure_owner(&self, scope: &Scope) -> Result<()> {
        // A project is its own scope owner.
        if K::RESOURCE_TYPE == ResourceType::Project {
            return Ok(());
        }
        let owner_type = scope.owner_type();
        let owner = self
            .deps
            .store
            .find_one(owner_type.collection(), &owner_filter(scope))
            .await?;

        match owner {
            None => Err(SyncError::NotFound {
                resource_type: owner_type.to_string(),
                name: scope.to_string(),
            }),
            Some(doc) if doc["marked_for_deletion"].as_bool() == Some(true) => {
                Err(SyncError::MarkedForDeletion {
                    resource_type: owner_type.to_string(),
                    name: scope.owner_name().to_string(),
                })
            }
            Some(_) => Ok(()),
        }
    }

    /// Create a resource and dispatch it at version 1.
    #[instrument(
        skip(self, ctx, scope, input),
        fields(resource_type = %K::RESOURCE_TYPE, scope = %scope, name = %input.name)
    )]
    pub async fn create(
        &self,
        ctx: &UserContext,
        scope: &Scope,
        input: ResourceInput<K>,
    ) -> Result<Resource<K>> {
        validate_name("name", &input.name)?;
        validate_name("namespace", &input.namespace)?;
        Self::validate_placement(scope, &input.name)?;

        authorize(
            self.deps.permissions.as_ref(),
            &ctx.user_id,
            ResourceRef::new(K::RESOURCE_TYPE, scope, &input.name),
            IamAction::Create,
        )
        .await?;

        self.ensure_owner(scope).await?;

        let now = Utc::now();
        let mut resource = Resource::<K> {
            id: Uuid::new_v4().to_string(),
            name: input.name,
            namespace: input.namespace,
            account_name: scope.account_name().to_string(),
            project_name: scope.project_name().to_string(),
            environment_name: scope.environment_name().map(str::to_string),
            cluster_name: None,
            labels: input.labels,
            annotations: input.annotations,
            spec: input.spec,
            status: None,
            generation: 0,
            agent_creation_timestamp: None,
            record_version: sync::INITIAL_RECORD_VERSION,
            sync_status: sync::queued(SyncAction::Apply, &Default::default(), now),
            marked_for_deletion: false,
            created_by: ctx.clone(),
            last_updated_by: ctx.clone(),
            creation_time: now,
            update_time: now,
        };
        resource.cluster_name = self.deps.dispatcher.resolve_cluster(&resource).await?;

        self.repo.insert(&resource).await.map_err(|e| match e {
            SyncError::AlreadyExists { .. } => SyncError::AlreadyExists {
                resource_type: K::RESOURCE_TYPE.to_string(),
                name: resource.name.clone(),
            },
            other => other,
        })?;

        if let Some(cluster) = &resource.cluster_name {
            self.deps.mappings.upsert(&resource.mapping(cluster)).await?;
        }

        info!(id = %resource.id, cluster_name = ?resource.cluster_name, "Resource created");
        self.deps.events.emit(EventKind::Added, &resource);

        self.dispatch(&mut resource, SyncAction::Apply).await?;
        Ok(resource)
    }

    /// Replace the desired state of a resource and dispatch the new version.
    ///
    /// The version increment is a compare-and-set: concurrent updates each get
    /// a distinct version, and after [`MAX_UPDATE_ATTEMPTS`] lost races the
    /// update fails with `Conflict`.
    #[instrument(
        skip(self, ctx, scope, input),
        fields(resource_type = %K::RESOURCE_TYPE, scope = %scope, name = %input.name)
    )]
    pub async fn update(
        &self,
        ctx: &UserContext,
        scope: &Scope,
        input: ResourceInput<K>,
    ) -> Result<Resource<K>> {
        validate_scope(scope)?;

        authorize(
            self.deps.permissions.as_ref(),
            &ctx.user_id,
            ResourceRef::new(K::RESOURCE_TYPE, scope, &input.name),
            IamAction::Update,
        )
        .await?;

        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let current = self.get(scope, &input.name).await?;
            if current.marked_for_deletion {
                return Err(SyncError::MarkedForDeletion {
                    resource_type: K::RESOURCE_TYPE.to_string(),
                    name: current.name,
                });
            }
            if current.namespace != input.namespace {
                return Err(SyncError::validation(
                    "namespace",
                    format!("is immutable (currently '{}')", current.namespace),
                ));
            }

            let now = Utc::now();
            let mut updated = current.clone();
            updated.labels = input.labels.clone();
            updated.annotations = input.annotations.clone();
            updated.spec = input.spec.clone();
            updated.record_version = sync::next_record_version(current.record_version);
            updated.sync_status = sync::queued(SyncAction::Apply, &current.sync_status, now);
            updated.last_updated_by = ctx.clone();
            updated.update_time = now;
            updated.cluster_name = self.deps.dispatcher.resolve_cluster(&updated).await?;

            let guard = by_id(&current.id).eq("record_version", current.record_version);
            let patch = Patch::new()
                .set("labels", &updated.labels)
                .set("annotations", &updated.annotations)
                .set("spec", &updated.spec)
                .set("record_version", updated.record_version)
                .set("sync_status", &updated.sync_status)
                .set("cluster_name", &updated.cluster_name)
                .set("last_updated_by", &updated.last_updated_by)
                .set("update_time", updated.update_time);

            if !self.repo.patch_one(&guard, &patch).await? {
                debug!(
                    attempt,
                    record_version = current.record_version,
                    "Record version moved underneath update, retrying"
                );
                continue;
            }

            if updated.cluster_name != current.cluster_name {
                self.record_cluster_change(&updated).await?;
            }

            info!(record_version = updated.record_version, "Resource updated");
            self.deps.events.emit(EventKind::Updated, &updated);

            self.dispatch(&mut updated, SyncAction::Apply).await?;
            return Ok(updated);
        }

        warn!(attempts = MAX_UPDATE_ATTEMPTS, "Update gave up after repeated conflicts");
        Err(SyncError::Conflict {
            resource_type: K::RESOURCE_TYPE.to_string(),
            name: input.name,
        })
    }

    /// Tombstone a resource and ask its agent to delete it.
    ///
    /// Without an attached cluster there is nobody to confirm the deletion, so
    /// the resource is removed on the spot.
    #[instrument(
        skip(self, ctx, scope),
        fields(resource_type = %K::RESOURCE_TYPE, scope = %scope, name = %name)
    )]
    pub async fn delete(
        &self,
        ctx: &UserContext,
        scope: &Scope,
        name: &str,
    ) -> Result<DeleteOutcome> {
        validate_scope(scope)?;

        authorize(
            self.deps.permissions.as_ref(),
            &ctx.user_id,
            ResourceRef::new(K::RESOURCE_TYPE, scope, name),
            IamAction::Delete,
        )
        .await?;

        let mut resource = self.get(scope, name).await?;
        let now = Utc::now();
        resource.marked_for_deletion = true;
        resource.sync_status = sync::queued(SyncAction::Delete, &resource.sync_status, now);
        resource.last_updated_by = ctx.clone();
        resource.update_time = now;

        let patch = Patch::new()
            .set("marked_for_deletion", true)
            .set("sync_status", &resource.sync_status)
            .set("last_updated_by", &resource.last_updated_by)
            .set("update_time", resource.update_time);
        if !self.repo.patch_one(&by_id(&resource.id), &patch).await? {
            return Err(SyncError::NotFound {
                resource_type: K::RESOURCE_TYPE.to_string(),
                name: name.to_string(),
            });
        }

        match self.dispatch(&mut resource, SyncAction::Delete).await? {
            DispatchOutcome::NoClusterAttached => {
                self.remove(&resource).await?;
                info!("Resource removed, no cluster attached");
                Ok(DeleteOutcome::Removed)
            }
            DispatchOutcome::Dispatched { .. } => {
                info!("Resource marked for deletion");
                self.deps.events.emit(EventKind::Updated, &resource);
                Ok(DeleteOutcome::PendingConfirmation)
            }
        }
    }

    /// Operator-triggered resync: re-send the stored desired state unchanged.
    ///
    /// The status goes back to `in_queue` and any agent error is cleared.
    #[instrument(
        skip(self, ctx, scope),
        fields(resource_type = %K::RESOURCE_TYPE, scope = %scope, name = %name)
    )]
    pub async fn resync(
        &self,
        ctx: &UserContext,
        scope: &Scope,
        name: &str,
    ) -> Result<DispatchOutcome> {
        validate_scope(scope)?;

        authorize(
            self.deps.permissions.as_ref(),
            &ctx.user_id,
            ResourceRef::new(K::RESOURCE_TYPE, scope, name),
            IamAction::Resync,
        )
        .await?;

        let resource = self.get(scope, name).await?;
        self.requeue(resource).await
    }

    pub(crate) async fn requeue(&self, mut resource: Resource<K>) -> Result<DispatchOutcome> {
        let action = Self::pending_action(&resource);
        resource.sync_status = sync::queued(action, &resource.sync_status, Utc::now());
        self.repo
            .patch_one(
                &by_id(&resource.id),
                &Patch::new().set("sync_status", &resource.sync_status),
            )
            .await?;

        let outcome = self.settle(&mut resource).await?;
        let removed = outcome == DispatchOutcome::NoClusterAttached && resource.marked_for_deletion;
        if !removed {
            self.deps.events.emit(EventKind::Updated, &resource);
        }
        Ok(outcome)
    }

    /// Automatic resync after a version mismatch. Touches no status field.
    pub(crate) async fn redispatch(&self, mut resource: Resource<K>) -> Result<DispatchOutcome> {
        debug!(
            resource_type = %K::RESOURCE_TYPE,
            name = %resource.name,
            record_version = resource.record_version,
            "Resyncing"
        );
        self.settle(&mut resource).await
    }

    // Re-send and, for a tombstone nobody can confirm anymore, remove it.
    async fn settle(&self, resource: &mut Resource<K>) -> Result<DispatchOutcome> {
        let action = Self::pending_action(resource);
        let outcome = self.dispatch(resource, action).await?;
        if outcome == DispatchOutcome::NoClusterAttached && resource.marked_for_deletion {
            self.remove(resource).await?;
            info!(
                resource_type = %K::RESOURCE_TYPE,
                name = %resource.name,
                "Tombstoned resource removed, no cluster attached"
            );
        }
        Ok(outcome)
    }

    fn pending_action(resource: &Resource<K>) -> SyncAction {
        if resource.marked_for_deletion {
            SyncAction::Delete
        } else {
            SyncAction::Apply
        }
    }

    /// Dispatch and record a cluster the resource was not known to be on.
    async fn dispatch(
        &self,
        resource: &mut Resource<K>,
        action: SyncAction,
    ) -> Result<DispatchOutcome> {
        let outcome = self.deps.dispatcher.dispatch(resource, action).await?;

        if let Some(cluster) = outcome.cluster_name() {
            if resource.cluster_name.as_deref() != Some(cluster) {
                self.repo
                    .patch_one(
                        &by_id(&resource.id),
                        &Patch::new().set("cluster_name", cluster),
                    )
                    .await?;
                self.deps.mappings.upsert(&resource.mapping(cluster)).await?;
                info!(
                    resource_type = %K::RESOURCE_TYPE,
                    name = %resource.name,
                    cluster_name = %cluster,
                    "Resource attached to cluster"
                );
                resource.cluster_name = Some(cluster.to_string());
            }
        } else if resource.cluster_name.is_some() {
            // The scope owner lost its cluster since this resource was attached
            self.repo
                .patch_one(
                    &by_id(&resource.id),
                    &Patch::new().set("cluster_name", Option::<String>::None),
                )
                .await?;
            self.deps
                .mappings
                .remove_for_resource(&resource.mapping_key())
                .await?;
            resource.cluster_name = None;
        }

        Ok(outcome)
    }

    /// Bring the mapping index in line with a cluster picked on update.
    ///
    /// A project carries its whole scope along: every member row is pointed
    /// at the new cluster, or dropped once the project has none.
    async fn record_cluster_change(&self, resource: &Resource<K>) -> Result<()> {
        let mappings = &self.deps.mappings;
        let moves_scope = K::RESOURCE_TYPE == ResourceType::Project;

        match &resource.cluster_name {
            Some(cluster) => {
                mappings.upsert(&resource.mapping(cluster)).await?;
                if moves_scope {
                    let moved = mappings.reassign_scope(&resource.scope(), cluster).await?;
                    info!(cluster_name = %cluster, moved, "Project moved to cluster");
                }
            }
            None if moves_scope => {
                let removed = mappings.remove_for_scope(&resource.scope()).await?;
                info!(removed, "Project left its cluster");
            }
            None => {
                mappings.remove_for_resource(&resource.mapping_key()).await?;
            }
        }
        Ok(())
    }

    /// Physically delete a resource and its mapping row.
    pub(crate) async fn remove(&self, resource: &Resource<K>) -> Result<()> {
        self.repo.delete_one(&by_id(&resource.id)).await?;
        self.deps
            .mappings
            .remove_for_resource(&resource.mapping_key())
            .await?;
        self.deps.events.emit(EventKind::Deleted, resource);
        Ok(())
    }
}
