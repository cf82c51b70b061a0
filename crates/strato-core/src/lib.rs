// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Strato Core - Resource Synchronization Engine
//!
//! This crate keeps a durable desired-state record of tenant resources
//! (projects, environments, apps, configs, secrets, routers, managed resources,
//! VPN devices) synchronized with remote Kubernetes clusters. The control plane
//! never talks to a cluster directly: it publishes desired state on a message
//! bus and applies whatever the cluster's agent reports back.
//!
//! # Architecture
//!
//! ```text
//!   API layer (embedding application)
//!        │ create / update / delete / resync
//!        ▼
//! ┌──────────────┐   ┌───────────────┐   ┌──────────────────┐
//! │  SyncEngine  │──►│ DocumentStore │   │  MappingIndex    │
//! │   <K>        │──►│  (SQLite)     │   │  (SQLite)        │
//! └──────┬───────┘   └───────────────┘   └────────▲─────────┘
//!        │ events                                  │ resolve cluster
//!        ▼                                         │
//! ┌──────────────┐                       ┌─────────┴────────┐
//! │EventPublisher│                       │ DispatchGateway  │──► <cluster>-incoming
//! └──────────────┘                       └──────────────────┘
//!
//!   agent-reports ──► IngestConsumer ──► ControlPlane ──► SyncHandle (per kind)
//! ```
//!
//! # Protocol
//!
//! Every accepted create or update assigns a new record version (1 on create,
//! +1 per update) and dispatches the desired state carrying it. Agents echo the
//! version in their reports; a report is only applied when its version matches
//! the stored one. Anything else is answered with a resync of the current
//! desired state, so out-of-order and duplicate deliveries converge.
//!
//! | Operation | Store effect | Dispatch |
//! |-----------|--------------|----------|
//! | `create` | version 1, `in_queue` | apply |
//! | `update` | version +1 (compare-and-set), `in_queue` | apply |
//! | `delete` | tombstone, `in_queue` | delete (or immediate removal without a cluster) |
//! | `resync` | `in_queue`, error cleared | same action, same version |
//!
//! # Background tasks
//!
//! - [`consumer::IngestConsumer`] applies agent reports from the report topic.
//! - [`resync_worker::StaleSyncWorker`] re-sends resources left `in_queue`.
//! - [`bus_cleanup_worker::BusCleanupWorker`] purges acked messages from the
//!   SQLite bus once they are past retention.
//!
//! # Configuration
//!
//! See [`config::Config`] for the `STRATO_*` environment variables.

#![warn(missing_docs)]

/// Message bus abstraction with in-process and SQLite backends.
pub mod bus;

/// Purging of acknowledged bus messages.
pub mod bus_cleanup_worker;

/// Daemon configuration loaded from environment variables.
pub mod config;

/// Agent report consumer task.
pub mod consumer;

/// Registry of per-kind engines and scope-wide operations.
pub mod control_plane;

/// SQLite pool helpers.
pub mod db;

/// Publishing desired state to cluster topics.
pub mod dispatch;

/// Generic synchronization engine (outbound half of the protocol).
pub mod engine;

/// Error types with stable error codes.
pub mod error;

/// Resource lifecycle events.
pub mod events;

/// Permission check boundary.
pub mod iam;

/// Agent report handling (inbound half of the protocol).
pub mod ingest;

/// Built-in resource kinds.
pub mod kinds;

/// Resource-to-cluster mapping index.
pub mod mapping;

/// Embedded database migrations.
pub mod migrations;

/// Resource envelope, scopes and sync status.
pub mod model;

/// Stale dispatch sweeper task.
pub mod resync_worker;

/// JSON document store.
pub mod store;

/// Pure sync state machine transitions.
pub mod sync;

pub use control_plane::{ControlPlane, DetachSummary};
pub use dispatch::{DispatchGateway, DispatchOutcome};
pub use engine::{DeleteOutcome, EngineDeps, SyncEngine};
pub use error::{Result, SyncError};
pub use events::{EventKind, EventPublisher, ResourceEvent};
pub use ingest::{IngestOutcome, SyncHandle};
pub use model::{Resource, ResourceInput, ResourceKind, Scope, SyncState, SyncStatus, UserContext};
