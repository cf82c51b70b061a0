// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Database migrations for strato-core.
//!
//! The schema (documents, resource mappings, bus outbox) is embedded in the
//! binary. Products embedding strato-core can run it against their own pool.
//!
//! # Example
//!
//! ```ignore
//! use sqlx::SqlitePool;
//! use strato_core::migrations;
//!
//! let pool = SqlitePool::connect("sqlite:strato.db?mode=rwc").await?;
//! migrations::run_sqlite(&pool).await?;
//! ```

use sqlx::migrate::MigrateError;

/// SQLite migrator with all core migrations embedded.
pub static SQLITE: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// Run SQLite migrations.
///
/// Applies all pending migrations to the database. Safe to call multiple times;
/// already-applied migrations are skipped.
pub async fn run_sqlite(pool: &sqlx::SqlitePool) -> Result<(), MigrateError> {
    SQLITE.run(pool).await
}
