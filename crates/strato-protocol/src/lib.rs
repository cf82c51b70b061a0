// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Strato Protocol - bus messages between the control plane and cluster agents
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  DispatchEnvelope  ┌────────────────────┐
//! │ control plane│ ─────────────────► │ <cluster>-incoming │ ──► agent
//! │ (strato-core)│                    └────────────────────┘
//! │              │    AgentReport     ┌────────────────────┐
//! │              │ ◄───────────────── │   agent-reports    │ ◄── agent
//! └──────────────┘                    └────────────────────┘
//! ```
//!
//! Every message is wrapped in a [`Frame`]: a six byte header (length + type)
//! followed by a JSON payload.
//!
//! # Usage
//!
//! ```
//! use strato_protocol::{DispatchEnvelope, Frame, ResourceType, SyncAction, WireObject};
//!
//! let envelope = DispatchEnvelope {
//!     account_name: "acme".into(),
//!     cluster_name: "eu-1".into(),
//!     action: SyncAction::Apply,
//!     record_version: 1,
//!     object: WireObject {
//!         kind: ResourceType::Config,
//!         name: "settings".into(),
//!         namespace: "acme-shop".into(),
//!         labels: Default::default(),
//!         annotations: Default::default(),
//!         spec: serde_json::json!({"data": {"LOG_LEVEL": "info"}}),
//!     },
//! };
//!
//! let bytes = Frame::dispatch(&envelope).unwrap().encode();
//! let decoded = Frame::decode_from_bytes(bytes).unwrap().decode_dispatch().unwrap();
//! assert_eq!(decoded.record_version, 1);
//! ```

pub mod frame;
pub mod message;

pub use frame::{Frame, FrameError, HEADER_SIZE, MAX_FRAME_SIZE, MessageType};
pub use message::{
    AgentObject, AgentReport, DispatchEnvelope, ReportKind, ResourceType, SyncAction,
    UnknownResourceType, WireObject,
};
