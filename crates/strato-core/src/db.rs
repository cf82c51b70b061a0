// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite pool helpers.

use std::path::Path;
use std::str::FromStr;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

use crate::error::{Result, SyncError};
use crate::migrations;

/// Connect to a SQLite database URL, creating the file if needed.
///
/// In-memory URLs are limited to a single connection, since every pooled
/// connection would otherwise see its own empty database.
pub async fn connect(url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)
        .map_err(|e| SyncError::database("connect", format!("invalid url {url}: {e}")))?
        .create_if_missing(true)
        .foreign_keys(true);

    let in_memory = url.contains(":memory:") || url.contains("mode=memory");
    let options = if in_memory {
        options
    } else {
        options.journal_mode(SqliteJournalMode::Wal)
    };

    let pool_options = if in_memory {
        // Closing the only connection would drop the database with it
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(5)
    };

    pool_options
        .connect_with(options)
        .await
        .map_err(|e| SyncError::database("connect", format!("failed to connect to {url}: {e}")))
}

/// Open (or create) a database file and bring its schema up to date.
///
/// - Creates parent directories if they don't exist
/// - Creates the database file if it doesn't exist
/// - Runs all migrations
///
/// ```ignore
/// let pool = strato_core::db::open_path(".data/strato.db").await?;
/// ```
pub async fn open_path(path: impl AsRef<Path>) -> Result<SqlitePool> {
    let path = path.as_ref();

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| {
            SyncError::database(
                "create_dir",
                format!("Failed to create directory {:?}: {}", parent, e),
            )
        })?;
    }

    let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
    let pool = connect(&url).await?;
    migrations::run_sqlite(&pool).await?;
    Ok(pool)
}
