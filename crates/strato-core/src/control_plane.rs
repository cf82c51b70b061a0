// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Control plane registry.
//!
//! Holds one engine per registered resource kind behind a [`SyncHandle`],
//! routes agent reports by resource type and runs the operations that span
//! every kind of a scope.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use strato_protocol::{AgentReport, Frame, ResourceType};
use tracing::{debug, info, instrument, warn};

use crate::engine::{EngineDeps, SyncEngine};
use crate::error::{Result, SyncError};
use crate::events::EventPublisher;
use crate::iam::{IamAction, ResourceRef, authorize};
use crate::ingest::{IngestOutcome, SyncHandle};
use crate::kinds::{App, Config, Environment, ManagedResource, Project, Router, Secret, VpnDevice};
use crate::model::{ResourceKind, Scope, UserContext, validate_scope};

/// Totals of a scope detach.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetachSummary {
    /// Mapping rows removed.
    pub mappings_removed: u64,
    /// Resources kept without a cluster.
    pub detached: usize,
    /// Resources removed.
    pub purged: usize,
}

/// Registry of per-kind engines.
pub struct ControlPlane {
    deps: EngineDeps,
    handles: Vec<Arc<dyn SyncHandle>>,
}

impl ControlPlane {
    /// Control plane with every built-in kind registered.
    pub fn new(deps: EngineDeps) -> Self {
        let mut control_plane = Self::empty(deps);
        control_plane.register::<Project>();
        control_plane.register::<Environment>();
        control_plane.register::<App>();
        control_plane.register::<Config>();
        control_plane.register::<Secret>();
        control_plane.register::<Router>();
        control_plane.register::<ManagedResource>();
        control_plane.register::<VpnDevice>();
        control_plane
    }

    /// Control plane with no kinds registered.
    pub fn empty(deps: EngineDeps) -> Self {
        Self {
            deps,
            handles: Vec::new(),
        }
    }

    /// Register kind `K`, replacing an earlier registration of its type.
    pub fn register<K: ResourceKind>(&mut self) {
        self.handles
            .retain(|h| h.resource_type() != K::RESOURCE_TYPE);
        self.handles
            .push(Arc::new(SyncEngine::<K>::new(self.deps.clone())));
    }

    /// Typed engine for kind `K`.
    pub fn engine<K: ResourceKind>(&self) -> SyncEngine<K> {
        SyncEngine::new(self.deps.clone())
    }

    /// Handle registered for `resource_type`.
    pub fn handle(&self, resource_type: ResourceType) -> Option<&Arc<dyn SyncHandle>> {
        self.handles
            .iter()
            .find(|h| h.resource_type() == resource_type)
    }

    /// Registered resource types, in registration order.
    pub fn resource_types(&self) -> Vec<ResourceType> {
        self.handles.iter().map(|h| h.resource_type()).collect()
    }

    /// Shared dependencies.
    pub fn deps(&self) -> &EngineDeps {
        &self.deps
    }

    /// Lifecycle event publisher.
    pub fn events(&self) -> &EventPublisher {
        &self.deps.events
    }

    /// Decode a framed agent report and apply it.
    pub async fn ingest(&self, payload: Bytes) -> Result<IngestOutcome> {
        let report = Frame::decode_from_bytes(payload)?.decode_report()?;
        self.route(&report).await
    }

    /// Apply a decoded agent report.
    pub async fn route(&self, report: &AgentReport) -> Result<IngestOutcome> {
        match self.handle(report.resource_type) {
            Some(handle) => handle.on_report(report).await,
            None => {
                debug!(
                    resource_type = %report.resource_type,
                    "Report for unregistered resource type dropped"
                );
                Ok(IngestOutcome::Ignored)
            }
        }
    }

    /// Re-send the desired state of everything in `scope`.
    ///
    /// Returns the number of resources dispatched.
    #[instrument(skip(self, ctx, scope), fields(scope = %scope))]
    pub async fn resync_scope(&self, ctx: &UserContext, scope: &Scope) -> Result<usize> {
        validate_scope(scope)?;
        authorize(
            self.deps.permissions.as_ref(),
            &ctx.user_id,
            ResourceRef::scope_owner(scope),
            IamAction::Resync,
        )
        .await?;

        let mut dispatched = 0;
        for handle in &self.handles {
            dispatched += handle.resync_in_scope(scope).await?;
        }
        info!(dispatched, "Scope resynced");
        Ok(dispatched)
    }

    /// Detach `scope` from its cluster.
    ///
    /// Every mapping row of the scope goes away. Members stay in the store
    /// without a cluster, or are removed with `purge`; the scope owner itself is
    /// only ever detached.
    #[instrument(skip(self, ctx, scope), fields(scope = %scope, purge))]
    pub async fn detach_scope(
        &self,
        ctx: &UserContext,
        scope: &Scope,
        purge: bool,
    ) -> Result<DetachSummary> {
        validate_scope(scope)?;
        authorize(
            self.deps.permissions.as_ref(),
            &ctx.user_id,
            ResourceRef::scope_owner(scope),
            IamAction::Detach,
        )
        .await?;

        let mut summary = DetachSummary {
            mappings_removed: self.deps.mappings.remove_for_scope(scope).await?,
            ..Default::default()
        };
        for handle in &self.handles {
            let counts = handle.detach_scope(scope, purge).await?;
            summary.detached += counts.detached;
            summary.purged += counts.purged;
        }

        info!(
            mappings_removed = summary.mappings_removed,
            detached = summary.detached,
            purged = summary.purged,
            "Scope detached from cluster"
        );
        Ok(summary)
    }

    /// Re-send resources that have been `in_queue` for longer than `older_than`.
    ///
    /// A failing kind is logged and skipped so one bad collection does not
    /// stall the sweep.
    pub async fn resync_stale(&self, older_than: Duration) -> Result<usize> {
        let older_than = chrono::Duration::from_std(older_than)
            .map_err(|e| SyncError::validation("older_than", e.to_string()))?;
        let cutoff = Utc::now() - older_than;

        let mut dispatched = 0;
        for handle in &self.handles {
            match handle.resync_stale(cutoff).await {
                Ok(n) => dispatched += n,
                Err(e) => warn!(
                    resource_type = %handle.resource_type(),
                    error = %e,
                    "Stale resync sweep failed"
                ),
            }
        }
        if dispatched > 0 {
            info!(dispatched, "Stale resources resynced");
        }
        Ok(dispatched)
    }
}
