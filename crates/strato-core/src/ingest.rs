// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Ingest handlers.
//!
//! The inbound half of the protocol. Agent reports are matched to a stored
//! resource by `(account, cluster, namespace, name)` and applied only when
//! they carry the stored record version; anything else triggers a resync of
//! the current desired state.
//!
//! | Report | Version matches | Version differs |
//! |--------|-----------------|-----------------|
//! | status update | copy observed fields, `updated_at_agent` / `deleting_at_agent` | resync |
//! | delete confirmation | remove | remove if tombstoned, else resync |
//! | apply error | `errored_at_agent` | resync |

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use strato_protocol::{AgentReport, ReportKind, ResourceType};
use tracing::{debug, info, instrument, warn};

use crate::dispatch::DispatchOutcome;
use crate::engine::{SyncEngine, by_id};
use crate::error::Result;
use crate::events::EventKind;
use crate::mapping::MappingIndex;
use crate::model::{Resource, ResourceKind, Scope, SyncState};
use crate::store::{Filter, Patch};
use crate::sync::{self, DeleteDecision, VersionCheck};

/// What an agent report did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Status update applied.
    Applied,
    /// Apply error recorded.
    Errored,
    /// Resource removed after a delete confirmation.
    Deleted,
    /// Report was stale; current desired state re-sent.
    Resynced,
    /// Nothing matched the report.
    Ignored,
}

/// Counts of one kind's resources touched by a scope detach.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetachCounts {
    /// Resources left in place without a cluster.
    pub detached: usize,
    /// Resources removed.
    pub purged: usize,
}

/// Type-erased handle on one kind's engine.
///
/// The control plane keeps one per registered kind and routes reports and
/// scope-wide operations through it.
#[async_trait]
pub trait SyncHandle: Send + Sync {
    /// Resource type this handle serves.
    fn resource_type(&self) -> ResourceType;

    /// Apply one agent report.
    async fn on_report(&self, report: &AgentReport) -> Result<IngestOutcome>;

    /// Re-queue and re-send every member of `scope`. Returns how many were dispatched.
    async fn resync_in_scope(&self, scope: &Scope) -> Result<usize>;

    /// Re-send resources still `in_queue` that were scheduled before `cutoff`.
    /// Returns how many were dispatched.
    async fn resync_stale(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    /// Drop the cluster attachment of every member of `scope`, or remove the
    /// members outright with `purge`. The scope owner is never removed.
    async fn detach_scope(&self, scope: &Scope, purge: bool) -> Result<DetachCounts>;
}

impl<K: ResourceKind> SyncEngine<K> {
    async fn patch_if_current(&self, resource: &Resource<K>, patch: &Patch) -> Result<bool> {
        let guard = by_id(&resource.id).eq("record_version", resource.record_version);
        self.repo().patch_one(&guard, patch).await
    }

    // A mutation moved the version between our read and our write: the report
    // is stale after all.
    async fn resync_after_race(&self, resource: &Resource<K>) -> Result<IngestOutcome> {
        debug!("Record version moved while applying report, resyncing");
        match self.repo().find_one(&by_id(&resource.id)).await? {
            Some(current) => {
                self.redispatch(current).await?;
                Ok(IngestOutcome::Resynced)
            }
            None => Ok(IngestOutcome::Ignored),
        }
    }

    async fn apply_status_update(
        &self,
        mut resource: Resource<K>,
        report: &AgentReport,
    ) -> Result<IngestOutcome> {
        if let VersionCheck::Stale { stored, reported } =
            sync::check_report_version(resource.record_version, report.record_version)
        {
            debug!(stored, reported, "Stale status update, resyncing");
            self.redispatch(resource).await?;
            return Ok(IngestOutcome::Resynced);
        }

        let object = &report.object;
        let status = object
            .status
            .clone()
            .map(serde_json::from_value::<K::Status>)
            .transpose()?;
        let sync_status = sync::apply_update_report(
            &resource.sync_status,
            resource.record_version,
            object.deletion_timestamp.is_some(),
            report.timestamp,
        );

        let patch = Patch::new()
            .set("labels", &object.labels)
            .set("annotations", &object.annotations)
            .set("generation", object.generation)
            .set("agent_creation_timestamp", object.creation_timestamp)
            .set("status", &status)
            .set("sync_status", &sync_status);
        if !self.patch_if_current(&resource, &patch).await? {
            return self.resync_after_race(&resource).await;
        }

        resource.labels = object.labels.clone();
        resource.annotations = object.annotations.clone();
        resource.generation = object.generation;
        resource.agent_creation_timestamp = object.creation_timestamp;
        resource.status = status;
        resource.sync_status = sync_status;

        debug!(state = %resource.sync_status.state, "Status update applied");
        self.deps().events.emit(EventKind::Updated, &resource);
        Ok(IngestOutcome::Applied)
    }

    async fn confirm_delete(
        &self,
        resource: Resource<K>,
        report: &AgentReport,
    ) -> Result<IngestOutcome> {
        match sync::decide_delete_confirmation(
            resource.record_version,
            report.record_version,
            resource.marked_for_deletion,
        ) {
            DeleteDecision::Remove => {
                self.remove(&resource).await?;
                info!("Deletion confirmed, resource removed");
                Ok(IngestOutcome::Deleted)
            }
            DeleteDecision::Resync => {
                debug!(
                    stored = resource.record_version,
                    "Agent deleted an older version of a live resource, resyncing"
                );
                self.redispatch(resource).await?;
                Ok(IngestOutcome::Resynced)
            }
        }
    }

    async fn record_apply_error(
        &self,
        mut resource: Resource<K>,
        report: &AgentReport,
        error: &str,
    ) -> Result<IngestOutcome> {
        if let VersionCheck::Stale { stored, reported } =
            sync::check_report_version(resource.record_version, report.record_version)
        {
            debug!(stored, reported, "Stale apply error, resyncing");
            self.redispatch(resource).await?;
            return Ok(IngestOutcome::Resynced);
        }

        let sync_status = sync::apply_error_report(&resource.sync_status, error, report.timestamp);
        let patch = Patch::new().set("sync_status", &sync_status);
        if !self.patch_if_current(&resource, &patch).await? {
            return self.resync_after_race(&resource).await;
        }
        resource.sync_status = sync_status;

        warn!(error = %error, "Agent failed to apply resource");
        self.deps().events.emit(EventKind::Updated, &resource);
        Ok(IngestOutcome::Errored)
    }
}

#[async_trait]
impl<K: ResourceKind> SyncHandle for SyncEngine<K> {
    fn resource_type(&self) -> ResourceType {
        K::RESOURCE_TYPE
    }

    #[instrument(
        skip(self, report),
        fields(
            resource_type = %report.resource_type,
            cluster_name = %report.cluster_name,
            name = %report.object.name,
            record_version = report.record_version
        )
    )]
    async fn on_report(&self, report: &AgentReport) -> Result<IngestOutcome> {
        let found = self
            .find_reported(
                &report.account_name,
                &report.cluster_name,
                &report.object.namespace,
                &report.object.name,
            )
            .await?;
        let Some(resource) = found else {
            debug!("Report for unknown resource dropped");
            return Ok(IngestOutcome::Ignored);
        };

        match &report.kind {
            ReportKind::StatusUpdate => self.apply_status_update(resource, report).await,
            ReportKind::DeleteConfirmation => self.confirm_delete(resource, report).await,
            ReportKind::ApplyError { error } => {
                self.record_apply_error(resource, report, error).await
            }
        }
    }

    async fn resync_in_scope(&self, scope: &Scope) -> Result<usize> {
        let mut dispatched = 0;
        for resource in self.members(scope).await? {
            if let DispatchOutcome::Dispatched { .. } = self.requeue(resource).await? {
                dispatched += 1;
            }
        }
        Ok(dispatched)
    }

    async fn resync_stale(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let queued = self
            .repo()
            .find(&Filter::new().eq("sync_status.state", SyncState::InQueue))
            .await?;

        let mut dispatched = 0;
        for resource in queued
            .into_iter()
            .filter(|r| r.sync_status.sync_scheduled_at.is_none_or(|at| at < cutoff))
        {
            let name = resource.name.clone();
            match self.redispatch(resource).await {
                Ok(DispatchOutcome::Dispatched { .. }) => dispatched += 1,
                Ok(DispatchOutcome::NoClusterAttached) => {}
                Err(e) => warn!(
                    resource_type = %K::RESOURCE_TYPE,
                    name = %name,
                    error = %e,
                    "Stale resync failed"
                ),
            }
        }
        Ok(dispatched)
    }

    async fn detach_scope(&self, scope: &Scope, purge: bool) -> Result<DetachCounts> {
        let mut counts = DetachCounts::default();
        let Some(mut filter) = Self::member_filter(scope) else {
            return Ok(counts);
        };
        let owns_scope = K::RESOURCE_TYPE == scope.owner_type();

        let (purged, kept): (Vec<_>, Vec<_>) = self
            .repo()
            .find(&filter)
            .await?
            .into_iter()
            .partition(|r| purge && !(owns_scope && r.name == scope.owner_name()));

        if !purged.is_empty() {
            if owns_scope {
                filter = filter.ne("name", scope.owner_name());
            }
            let deleted = self.repo().delete_many(&filter).await?;
            debug!(deleted, "Scope members purged");
            for resource in &purged {
                self.deps()
                    .mappings
                    .remove_for_resource(&resource.mapping_key())
                    .await?;
                self.deps().events.emit(EventKind::Deleted, resource);
            }
            counts.purged = purged.len();
        }

        for mut resource in kept {
            K::clear_cluster_binding(&mut resource.spec);
            resource.cluster_name = None;
            resource.update_time = Utc::now();
            let patch = Patch::new()
                .set("spec", &resource.spec)
                .set("cluster_name", Option::<String>::None)
                .set("update_time", resource.update_time);
            self.repo().patch_one(&by_id(&resource.id), &patch).await?;
            self.deps()
                .mappings
                .remove_for_resource(&resource.mapping_key())
                .await?;

            self.deps().events.emit(EventKind::Updated, &resource);
            counts.detached += 1;
        }

        if counts != DetachCounts::default() {
            info!(
                resource_type = %K::RESOURCE_TYPE,
                scope = %scope,
                detached = counts.detached,
                purged = counts.purged,
                "Scope detached"
            );
        }
        Ok(counts)
    }
}
