// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Durable message bus on the `bus_messages` table.
//!
//! Messages of a topic are delivered strictly in offset order: the head of the
//! topic has to be acked before anything behind it is handed out. A nacked
//! head becomes available again after a linear backoff.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use sqlx::SqlitePool;
use tokio::time::sleep;
use tracing::debug;

use crate::error::{Result, SyncError};

use super::{Delivery, MessageBus, Subscription};

/// Default delay between polls of an idle topic.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Default redelivery delay per failed attempt.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// SQLite-backed bus.
#[derive(Clone)]
pub struct SqliteBus {
    pool: SqlitePool,
    poll_interval: Duration,
    retry_backoff: Duration,
}

impl SqliteBus {
    /// Create a bus over an existing (migrated) pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            poll_interval: DEFAULT_POLL_INTERVAL,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }

    /// Set how often idle subscriptions poll.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Set the redelivery delay per failed attempt.
    pub fn with_retry_backoff(mut self, retry_backoff: Duration) -> Self {
        self.retry_backoff = retry_backoff;
        self
    }

    /// Number of unacknowledged messages on `topic`.
    pub async fn pending(&self, topic: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM bus_messages WHERE topic = ? AND acked_at_ms IS NULL",
        )
        .bind(topic)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| SyncError::bus("pending", topic, e))?;
        Ok(count)
    }

    /// Drop acknowledged messages older than `older_than`.
    pub async fn purge_acked(&self, older_than: Duration) -> Result<u64> {
        let older_than = i64::try_from(older_than.as_millis()).unwrap_or(i64::MAX);
        let cutoff = now_ms().saturating_sub(older_than);
        let result = sqlx::query(
            "DELETE FROM bus_messages WHERE acked_at_ms IS NOT NULL AND acked_at_ms < ?",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::bus("purge", "*", e))?;
        Ok(result.rows_affected())
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[async_trait]
impl MessageBus for SqliteBus {
    async fn publish(&self, topic: &str, key: &str, payload: Bytes) -> Result<u64> {
        let now = now_ms();
        let result = sqlx::query(
            r#"
            INSERT INTO bus_messages (topic, partition_key, payload, available_at_ms, created_at_ms)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(topic)
        .bind(key)
        .bind(payload.as_ref())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::bus("publish", topic, e))?;

        Ok(result.last_insert_rowid() as u64)
    }

    async fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>> {
        Ok(Box::new(SqliteSubscription {
            bus: self.clone(),
            topic: topic.to_string(),
        }))
    }
}

#[derive(sqlx::FromRow)]
struct HeadRow {
    msg_offset: i64,
    partition_key: String,
    payload: Vec<u8>,
    attempts: i64,
    available_at_ms: i64,
}

struct SqliteSubscription {
    bus: SqliteBus,
    topic: String,
}

impl SqliteSubscription {
    async fn head(&self) -> Result<Option<HeadRow>> {
        sqlx::query_as::<_, HeadRow>(
            r#"
            SELECT msg_offset, partition_key, payload, attempts, available_at_ms
            FROM bus_messages
            WHERE topic = ? AND acked_at_ms IS NULL
            ORDER BY msg_offset
            LIMIT 1
            "#,
        )
        .bind(&self.topic)
        .fetch_optional(&self.bus.pool)
        .await
        .map_err(|e| SyncError::bus("poll", &self.topic, e))
    }
}

#[async_trait]
impl Subscription for SqliteSubscription {
    async fn next(&mut self) -> Result<Option<Delivery>> {
        loop {
            let Some(head) = self.head().await? else {
                sleep(self.bus.poll_interval).await;
                continue;
            };

            let wait_ms = head.available_at_ms - now_ms();
            if wait_ms > 0 {
                let wait = Duration::from_millis(wait_ms as u64).min(self.bus.poll_interval);
                sleep(wait).await;
                continue;
            }

            sqlx::query("UPDATE bus_messages SET attempts = attempts + 1 WHERE msg_offset = ?")
                .bind(head.msg_offset)
                .execute(&self.bus.pool)
                .await
                .map_err(|e| SyncError::bus("claim", &self.topic, e))?;

            return Ok(Some(Delivery {
                offset: head.msg_offset as u64,
                topic: self.topic.clone(),
                key: head.partition_key,
                payload: Bytes::from(head.payload),
                attempt: (head.attempts + 1) as u32,
            }));
        }
    }

    async fn ack(&mut self, delivery: &Delivery) -> Result<()> {
        sqlx::query("UPDATE bus_messages SET acked_at_ms = ? WHERE msg_offset = ?")
            .bind(now_ms())
            .bind(delivery.offset as i64)
            .execute(&self.bus.pool)
            .await
            .map_err(|e| SyncError::bus("ack", &self.topic, e))?;
        Ok(())
    }

    async fn nack(&mut self, delivery: &Delivery) -> Result<()> {
        let delay = self.bus.retry_backoff.as_millis() as i64 * i64::from(delivery.attempt);
        debug!(
            topic = %self.topic,
            offset = delivery.offset,
            attempt = delivery.attempt,
            delay_ms = delay,
            "Message nacked, scheduling redelivery"
        );
        sqlx::query("UPDATE bus_messages SET available_at_ms = ? WHERE msg_offset = ?")
            .bind(now_ms() + delay)
            .bind(delivery.offset as i64)
            .execute(&self.bus.pool)
            .await
            .map_err(|e| SyncError::bus("nack", &self.topic, e))?;
        Ok(())
    }
}
