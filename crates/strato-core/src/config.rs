// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::str::FromStr;
use std::time::Duration;

/// Strato Core configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite connection URL
    pub database_url: String,
    /// Topic agents publish their reports to
    pub agent_topic: String,
    /// Suffix appended to a cluster name to form its dispatch topic
    pub cluster_topic_suffix: String,
    /// How often an idle bus subscription polls for new messages
    pub bus_poll_interval: Duration,
    /// Age after which an `in_queue` resource is considered stuck
    pub stale_sync_after: Duration,
    /// How often the stale sync worker runs
    pub stale_sync_interval: Duration,
    /// Buffer size of the lifecycle event channel
    pub event_channel_capacity: usize,
    /// How long acknowledged bus messages are kept
    pub bus_retention: Duration,
    /// How often acknowledged bus messages are purged
    pub bus_cleanup_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `STRATO_DATABASE_URL`: SQLite connection string
    ///
    /// Optional (with defaults):
    /// - `STRATO_AGENT_TOPIC`: agent report topic (default: agent-reports)
    /// - `STRATO_CLUSTER_TOPIC_SUFFIX`: cluster topic suffix (default: -incoming)
    /// - `STRATO_BUS_POLL_INTERVAL_MS`: bus poll interval (default: 500)
    /// - `STRATO_STALE_SYNC_AFTER_SECS`: stale threshold (default: 300)
    /// - `STRATO_STALE_SYNC_INTERVAL_SECS`: stale sweep interval (default: 60)
    /// - `STRATO_EVENT_CHANNEL_CAPACITY`: event channel capacity (default: 1024)
    /// - `STRATO_BUS_RETENTION_SECS`: retention of acked bus messages (default: 86400)
    /// - `STRATO_BUS_CLEANUP_INTERVAL_SECS`: bus purge interval (default: 3600)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("STRATO_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("STRATO_DATABASE_URL"))?;

        let agent_topic = std::env::var("STRATO_AGENT_TOPIC")
            .unwrap_or_else(|_| "agent-reports".to_string());
        if agent_topic.is_empty() {
            return Err(ConfigError::Invalid(
                "STRATO_AGENT_TOPIC",
                "must not be empty",
            ));
        }

        let cluster_topic_suffix = std::env::var("STRATO_CLUSTER_TOPIC_SUFFIX")
            .unwrap_or_else(|_| "-incoming".to_string());

        let bus_poll_interval_ms: u64 = parse_var(
            "STRATO_BUS_POLL_INTERVAL_MS",
            "500",
            "must be a positive number of milliseconds",
        )?;
        let stale_sync_after_secs: u64 = parse_var(
            "STRATO_STALE_SYNC_AFTER_SECS",
            "300",
            "must be a positive number of seconds",
        )?;
        let stale_sync_interval_secs: u64 = parse_var(
            "STRATO_STALE_SYNC_INTERVAL_SECS",
            "60",
            "must be a positive number of seconds",
        )?;
        let event_channel_capacity: usize = parse_var(
            "STRATO_EVENT_CHANNEL_CAPACITY",
            "1024",
            "must be a positive integer",
        )?;
        let bus_retention_secs: u64 = parse_var(
            "STRATO_BUS_RETENTION_SECS",
            "86400",
            "must be a positive number of seconds",
        )?;
        let bus_cleanup_interval_secs: u64 = parse_var(
            "STRATO_BUS_CLEANUP_INTERVAL_SECS",
            "3600",
            "must be a positive number of seconds",
        )?;

        if bus_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "STRATO_BUS_POLL_INTERVAL_MS",
                "must be greater than zero",
            ));
        }
        if stale_sync_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "STRATO_STALE_SYNC_INTERVAL_SECS",
                "must be greater than zero",
            ));
        }
        if bus_cleanup_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "STRATO_BUS_CLEANUP_INTERVAL_SECS",
                "must be greater than zero",
            ));
        }
        // tokio::sync::broadcast panics on a zero capacity
        if event_channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "STRATO_EVENT_CHANNEL_CAPACITY",
                "must be greater than zero",
            ));
        }

        Ok(Self {
            database_url,
            agent_topic,
            cluster_topic_suffix,
            bus_poll_interval: Duration::from_millis(bus_poll_interval_ms),
            stale_sync_after: Duration::from_secs(stale_sync_after_secs),
            stale_sync_interval: Duration::from_secs(stale_sync_interval_secs),
            event_channel_capacity,
            bus_retention: Duration::from_secs(bus_retention_secs),
            bus_cleanup_interval: Duration::from_secs(bus_cleanup_interval_secs),
        })
    }
}

fn parse_var<T: FromStr>(
    key: &'static str,
    default: &str,
    hint: &'static str,
) -> Result<T, ConfigError> {
    std::env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| ConfigError::Invalid(key, hint))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
