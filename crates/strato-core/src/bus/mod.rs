// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Message bus abstraction.
//!
//! Outbound dispatches go to one topic per cluster, agent reports come back on
//! a shared report topic. Delivery is at-least-once; consumers ack each
//! delivery or nack it to have it redelivered.

pub mod memory;
pub mod sqlite;

pub use self::memory::InMemoryBus;
pub use self::sqlite::SqliteBus;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// One message handed to a subscriber.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Position of the message in its topic.
    pub offset: u64,
    /// Topic the message was published to.
    pub topic: String,
    /// Partition key (resource namespace for dispatches).
    pub key: String,
    /// Framed payload.
    pub payload: Bytes,
    /// 1 on first delivery, +1 per redelivery.
    pub attempt: u32,
}

/// Publishing side of the bus.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Append a message to `topic`. Returns its offset.
    async fn publish(&self, topic: &str, key: &str, payload: Bytes) -> Result<u64>;

    /// Start consuming `topic`.
    async fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>>;
}

/// Consuming side of one topic.
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next message. `None` once the topic can deliver nothing more.
    async fn next(&mut self) -> Result<Option<Delivery>>;

    /// Mark a delivery as handled.
    async fn ack(&mut self, delivery: &Delivery) -> Result<()>;

    /// Hand a delivery back for redelivery.
    async fn nack(&mut self, delivery: &Delivery) -> Result<()>;
}
