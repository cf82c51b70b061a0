// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed mapping index.

use sqlx::SqlitePool;
use strato_protocol::ResourceType;

use crate::error::{Result, SyncError};
use crate::model::Scope;

use super::{MappingIndex, MappingKey, ResourceHeirarchy, ResourceMapping};

/// SQLite-backed mapping index over the `resource_mappings` table.
#[derive(Clone)]
pub struct SqliteMappingIndex {
    pool: SqlitePool,
}

impl SqliteMappingIndex {
    /// Create a new index from an existing (migrated) pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MappingRow {
    heirarchy: String,
    resource_type: String,
    resource_name: String,
    resource_namespace: String,
    account_name: String,
    cluster_name: String,
    project_name: String,
    environment_name: Option<String>,
}

impl TryFrom<MappingRow> for ResourceMapping {
    type Error = SyncError;

    fn try_from(row: MappingRow) -> Result<Self> {
        let heirarchy = match row.heirarchy.as_str() {
            "project" => ResourceHeirarchy::Project,
            "environment" => ResourceHeirarchy::Environment,
            other => {
                return Err(SyncError::SerializationError {
                    details: format!("unknown mapping heirarchy: {}", other),
                });
            }
        };
        let resource_type: ResourceType =
            row.resource_type
                .parse()
                .map_err(|e: strato_protocol::UnknownResourceType| {
                    SyncError::SerializationError {
                        details: e.to_string(),
                    }
                })?;

        Ok(ResourceMapping {
            heirarchy,
            resource_type,
            resource_name: row.resource_name,
            resource_namespace: row.resource_namespace,
            account_name: row.account_name,
            cluster_name: row.cluster_name,
            project_name: row.project_name,
            environment_name: row.environment_name,
        })
    }
}

const SELECT_COLUMNS: &str = "SELECT heirarchy, resource_type, resource_name, resource_namespace, \
     account_name, cluster_name, project_name, environment_name FROM resource_mappings";

/// Predicate selecting the single row of one resource. Binds, in order:
/// type, account, project, environment, name, namespace.
const IDENTITY_PREDICATE: &str = "resource_type = ? AND account_name = ? AND project_name = ? \
     AND environment_name IS ? AND resource_name = ? AND resource_namespace = ?";

/// Predicate selecting every row inside `scope` plus its bind values.
fn scope_predicate(scope: &Scope) -> (&'static str, Vec<String>) {
    match scope {
        Scope::Project {
            account_name,
            project_name,
        } => (
            "account_name = ? AND project_name = ?",
            vec![account_name.clone(), project_name.clone()],
        ),
        // The environment's own row lives at project level
        Scope::Environment {
            account_name,
            project_name,
            environment_name,
        } => (
            "account_name = ? AND project_name = ? AND (environment_name = ? \
             OR (resource_type = 'environment' AND resource_name = ?))",
            vec![
                account_name.clone(),
                project_name.clone(),
                environment_name.clone(),
                environment_name.clone(),
            ],
        ),
    }
}

#[async_trait::async_trait]
impl MappingIndex for SqliteMappingIndex {
    async fn upsert(&self, mapping: &ResourceMapping) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // A resource has at most one row: drop whatever cluster or level it
        // was recorded under before
        let sql = format!("DELETE FROM resource_mappings WHERE {IDENTITY_PREDICATE}");
        sqlx::query(&sql)
            .bind(mapping.resource_type.as_str())
            .bind(&mapping.account_name)
            .bind(&mapping.project_name)
            .bind(&mapping.environment_name)
            .bind(&mapping.resource_name)
            .bind(&mapping.resource_namespace)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO resource_mappings
                (heirarchy, resource_type, resource_name, resource_namespace,
                 account_name, cluster_name, project_name, environment_name)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(mapping.heirarchy.as_str())
        .bind(mapping.resource_type.as_str())
        .bind(&mapping.resource_name)
        .bind(&mapping.resource_namespace)
        .bind(&mapping.account_name)
        .bind(&mapping.cluster_name)
        .bind(&mapping.project_name)
        .bind(&mapping.environment_name)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn resolve_cluster(&self, scope: &Scope) -> Result<Option<String>> {
        let cluster = match scope {
            Scope::Project {
                account_name,
                project_name,
            } => {
                sqlx::query_scalar::<_, String>(
                    r#"
                    SELECT cluster_name FROM resource_mappings
                    WHERE resource_type = 'project' AND account_name = ? AND resource_name = ?
                    LIMIT 1
                    "#,
                )
                .bind(account_name)
                .bind(project_name)
                .fetch_optional(&self.pool)
                .await?
            }
            Scope::Environment {
                account_name,
                project_name,
                environment_name,
            } => {
                sqlx::query_scalar::<_, String>(
                    r#"
                    SELECT cluster_name FROM resource_mappings
                    WHERE resource_type = 'environment' AND account_name = ?
                      AND project_name = ? AND resource_name = ?
                    LIMIT 1
                    "#,
                )
                .bind(account_name)
                .bind(project_name)
                .bind(environment_name)
                .fetch_optional(&self.pool)
                .await?
            }
        };
        Ok(cluster)
    }

    async fn find_for_resource(&self, key: &MappingKey) -> Result<Option<ResourceMapping>> {
        let sql = format!("{SELECT_COLUMNS} WHERE {IDENTITY_PREDICATE} LIMIT 1");
        let row = sqlx::query_as::<_, MappingRow>(&sql)
            .bind(key.resource_type.as_str())
            .bind(&key.account_name)
            .bind(&key.project_name)
            .bind(&key.environment_name)
            .bind(&key.resource_name)
            .bind(&key.resource_namespace)
            .fetch_optional(&self.pool)
            .await?;
        row.map(ResourceMapping::try_from).transpose()
    }

    async fn remove_for_resource(&self, key: &MappingKey) -> Result<u64> {
        let sql = format!("DELETE FROM resource_mappings WHERE {IDENTITY_PREDICATE}");
        let result = sqlx::query(&sql)
            .bind(key.resource_type.as_str())
            .bind(&key.account_name)
            .bind(&key.project_name)
            .bind(&key.environment_name)
            .bind(&key.resource_name)
            .bind(&key.resource_namespace)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn list_for_scope(&self, scope: &Scope) -> Result<Vec<ResourceMapping>> {
        let (predicate, args) = scope_predicate(scope);
        let sql = format!("{SELECT_COLUMNS} WHERE {predicate} ORDER BY resource_type, resource_name");

        let mut query = sqlx::query_as::<_, MappingRow>(&sql);
        for arg in args {
            query = query.bind(arg);
        }
        query
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(ResourceMapping::try_from)
            .collect()
    }

    async fn remove_for_scope(&self, scope: &Scope) -> Result<u64> {
        let (predicate, args) = scope_predicate(scope);
        let sql = format!("DELETE FROM resource_mappings WHERE {predicate}");

        let mut query = sqlx::query(&sql);
        for arg in args {
            query = query.bind(arg);
        }
        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn reassign_scope(&self, scope: &Scope, cluster_name: &str) -> Result<u64> {
        let (predicate, args) = scope_predicate(scope);
        let sql = format!(
            "UPDATE resource_mappings SET cluster_name = ?, \
             updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE {predicate}"
        );

        let mut query = sqlx::query(&sql).bind(cluster_name);
        for arg in args {
            query = query.bind(arg);
        }
        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
