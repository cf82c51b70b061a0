// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-process message bus.
//!
//! Each topic is an append-only log. Every subscription reads the log from the
//! beginning with its own cursor, so publishing before subscribing loses
//! nothing and tests can inspect everything ever published.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{Mutex, Notify};

use crate::error::Result;

use super::{Delivery, MessageBus, Subscription};

#[derive(Default)]
struct TopicLog {
    entries: Mutex<Vec<Delivery>>,
    appended: Notify,
}

/// In-process bus backed by per-topic logs.
#[derive(Clone, Default)]
pub struct InMemoryBus {
    topics: Arc<Mutex<HashMap<String, Arc<TopicLog>>>>,
}

impl InMemoryBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    async fn topic(&self, topic: &str) -> Arc<TopicLog> {
        let mut topics = self.topics.lock().await;
        topics
            .entry(topic.to_string())
            .or_insert_with(|| Arc::new(TopicLog::default()))
            .clone()
    }

    /// Everything published to `topic` so far, in offset order.
    pub async fn published(&self, topic: &str) -> Vec<Delivery> {
        let log = self.topic(topic).await;
        let entries = log.entries.lock().await;
        entries.clone()
    }

    /// Names of every topic that has been published to or subscribed.
    pub async fn topics(&self) -> Vec<String> {
        let topics = self.topics.lock().await;
        let mut names: Vec<_> = topics.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, topic: &str, key: &str, payload: Bytes) -> Result<u64> {
        let log = self.topic(topic).await;
        let offset = {
            let mut entries = log.entries.lock().await;
            let offset = entries.len() as u64;
            entries.push(Delivery {
                offset,
                topic: topic.to_string(),
                key: key.to_string(),
                payload,
                attempt: 1,
            });
            offset
        };
        log.appended.notify_waiters();
        Ok(offset)
    }

    async fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>> {
        Ok(Box::new(InMemorySubscription {
            log: self.topic(topic).await,
            cursor: 0,
            redeliver: VecDeque::new(),
        }))
    }
}

struct InMemorySubscription {
    log: Arc<TopicLog>,
    cursor: usize,
    redeliver: VecDeque<Delivery>,
}

#[async_trait]
impl Subscription for InMemorySubscription {
    async fn next(&mut self) -> Result<Option<Delivery>> {
        loop {
            if let Some(delivery) = self.redeliver.pop_front() {
                return Ok(Some(delivery));
            }

            // Register before looking so an append in between still wakes us
            let appended = self.log.appended.notified();
            {
                let entries = self.log.entries.lock().await;
                if let Some(delivery) = entries.get(self.cursor) {
                    self.cursor += 1;
                    return Ok(Some(delivery.clone()));
                }
            }
            appended.await;
        }
    }

    async fn ack(&mut self, _delivery: &Delivery) -> Result<()> {
        Ok(())
    }

    async fn nack(&mut self, delivery: &Delivery) -> Result<()> {
        let mut retry = delivery.clone();
        retry.attempt += 1;
        self.redeliver.push_back(retry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_publish_assigns_per_topic_offsets() {
        let bus = InMemoryBus::new();
        assert_eq!(bus.publish("a", "ns", Bytes::from_static(b"1")).await.unwrap(), 0);
        assert_eq!(bus.publish("a", "ns", Bytes::from_static(b"2")).await.unwrap(), 1);
        assert_eq!(bus.publish("b", "ns", Bytes::from_static(b"3")).await.unwrap(), 0);

        let published = bus.published("a").await;
        assert_eq!(published.len(), 2);
        assert_eq!(published[1].payload, Bytes::from_static(b"2"));
        assert_eq!(bus.topics().await, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_subscriber_sees_history_then_new_messages() {
        let bus = InMemoryBus::new();
        bus.publish("t", "k", Bytes::from_static(b"early")).await.unwrap();

        let mut sub = bus.subscribe("t").await.unwrap();
        let first = sub.next().await.unwrap().unwrap();
        assert_eq!(first.payload, Bytes::from_static(b"early"));
        sub.ack(&first).await.unwrap();

        let publisher = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            publisher
                .publish("t", "k", Bytes::from_static(b"late"))
                .await
                .unwrap();
        });

        let second = tokio::time::timeout(Duration::from_secs(5), sub.next())
            .await
            .expect("delivery timed out")
            .unwrap()
            .unwrap();
        assert_eq!(second.payload, Bytes::from_static(b"late"));
        assert_eq!(second.offset, 1);
    }

    #[tokio::test]
    async fn test_nack_redelivers_first() {
        let bus = InMemoryBus::new();
        bus.publish("t", "k", Bytes::from_static(b"one")).await.unwrap();
        bus.publish("t", "k", Bytes::from_static(b"two")).await.unwrap();

        let mut sub = bus.subscribe("t").await.unwrap();
        let one = sub.next().await.unwrap().unwrap();
        sub.nack(&one).await.unwrap();

        let again = sub.next().await.unwrap().unwrap();
        assert_eq!(again.offset, one.offset);
        assert_eq!(again.attempt, 2);
        sub.ack(&again).await.unwrap();

        let two = sub.next().await.unwrap().unwrap();
        assert_eq!(two.payload, Bytes::from_static(b"two"));
        assert_eq!(two.attempt, 1);
    }
}
