// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed document store built on the JSON1 functions.

use serde_json::Value;
use sqlx::SqlitePool;

use crate::error::{Result, SyncError};

use super::{Condition, Document, DocumentStore, Filter, Patch, PatchOp};

/// SQLite-backed document store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new store from an existing (migrated) pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Translate `a.b.c` into a JSON path, quoting segments SQLite would misread.
fn json_path(path: &str) -> String {
    let mut out = String::from("$");
    for segment in path.split('.') {
        out.push('.');
        if !segment.is_empty()
            && segment
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_')
        {
            out.push_str(segment);
        } else {
            out.push('"');
            out.push_str(&segment.replace('"', "\\\""));
            out.push('"');
        }
    }
    out
}

/// Build the WHERE clause for `collection` + `filter`, pushing bind values.
fn where_clause(collection: &str, filter: &Filter, args: &mut Vec<String>) -> String {
    let mut sql = String::from("collection = ?");
    args.push(collection.to_string());

    for condition in filter.conditions() {
        match condition {
            Condition::Eq(path, value) => {
                sql.push_str(" AND json_extract(doc, ?) IS json_extract(?, '$')");
                args.push(json_path(path));
                args.push(value.to_string());
            }
            Condition::Ne(path, value) => {
                sql.push_str(" AND json_extract(doc, ?) IS NOT json_extract(?, '$')");
                args.push(json_path(path));
                args.push(value.to_string());
            }
            Condition::Exists(path, present) => {
                if *present {
                    sql.push_str(" AND COALESCE(json_type(doc, ?), 'null') <> 'null'");
                } else {
                    sql.push_str(" AND COALESCE(json_type(doc, ?), 'null') = 'null'");
                }
                args.push(json_path(path));
            }
            Condition::In(path, values) => {
                sql.push_str(" AND json_extract(doc, ?) IN (SELECT value FROM json_each(?))");
                args.push(json_path(path));
                args.push(Value::Array(values.clone()).to_string());
            }
        }
    }

    sql
}

/// Build the new-document expression for `patch`, pushing bind values.
fn patch_expression(patch: &Patch, args: &mut Vec<String>) -> String {
    let mut expr = String::from("doc");

    let sets: Vec<_> = patch
        .ops()
        .iter()
        .filter_map(|op| match op {
            PatchOp::Set(path, value) => Some((path, value)),
            PatchOp::Unset(_) => None,
        })
        .collect();
    if !sets.is_empty() {
        expr = format!("json_set({}{})", expr, ", ?, json(?)".repeat(sets.len()));
        for (path, value) in sets {
            args.push(json_path(path));
            args.push(value.to_string());
        }
    }

    let unsets: Vec<_> = patch
        .ops()
        .iter()
        .filter_map(|op| match op {
            PatchOp::Unset(path) => Some(path),
            PatchOp::Set(..) => None,
        })
        .collect();
    if !unsets.is_empty() {
        expr = format!("json_remove({}{})", expr, ", ?".repeat(unsets.len()));
        for path in unsets {
            args.push(json_path(path));
        }
    }

    expr
}

fn parse_doc(raw: &str) -> Result<Value> {
    Ok(serde_json::from_str(raw)?)
}

#[async_trait::async_trait]
impl DocumentStore for SqliteStore {
    async fn create(&self, collection: &str, doc: &Document) -> Result<()> {
        let body = serde_json::to_string(&doc.body)?;
        let result = sqlx::query(
            r#"
            INSERT INTO documents (collection, id, identity_key, doc)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(collection)
        .bind(&doc.id)
        .bind(&doc.identity_key)
        .bind(body)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(SyncError::AlreadyExists {
                    resource_type: collection.to_string(),
                    name: doc.identity_key.clone(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn patch_one(&self, collection: &str, filter: &Filter, patch: &Patch) -> Result<bool> {
        if patch.is_empty() {
            return Ok(self.find_one(collection, filter).await?.is_some());
        }

        let mut args = Vec::new();
        let expr = patch_expression(patch, &mut args);
        let predicate = where_clause(collection, filter, &mut args);
        let sql = format!(
            "UPDATE documents \
             SET doc = {expr}, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') \
             WHERE rowid = (SELECT rowid FROM documents WHERE {predicate} ORDER BY rowid LIMIT 1)"
        );

        let mut query = sqlx::query(&sql);
        for arg in args {
            query = query.bind(arg);
        }
        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_one(&self, collection: &str, filter: &Filter) -> Result<Option<Value>> {
        let mut args = Vec::new();
        let predicate = where_clause(collection, filter, &mut args);
        let sql = format!("SELECT doc FROM documents WHERE {predicate} ORDER BY rowid LIMIT 1");

        let mut query = sqlx::query_scalar::<_, String>(&sql);
        for arg in args {
            query = query.bind(arg);
        }
        let raw = query.fetch_optional(&self.pool).await?;
        raw.as_deref().map(parse_doc).transpose()
    }

    async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Value>> {
        let mut args = Vec::new();
        let predicate = where_clause(collection, filter, &mut args);
        let sql = format!("SELECT doc FROM documents WHERE {predicate} ORDER BY rowid");

        let mut query = sqlx::query_scalar::<_, String>(&sql);
        for arg in args {
            query = query.bind(arg);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(|raw| parse_doc(raw)).collect()
    }

    async fn delete_one(&self, collection: &str, filter: &Filter) -> Result<bool> {
        let mut args = Vec::new();
        let predicate = where_clause(collection, filter, &mut args);
        let sql = format!(
            "DELETE FROM documents \
             WHERE rowid = (SELECT rowid FROM documents WHERE {predicate} ORDER BY rowid LIMIT 1)"
        );

        let mut query = sqlx::query(&sql);
        for arg in args {
            query = query.bind(arg);
        }
        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_many(&self, collection: &str, filter: &Filter) -> Result<u64> {
        let mut args = Vec::new();
        let predicate = where_clause(collection, filter, &mut args);
        let sql = format!("DELETE FROM documents WHERE {predicate}");

        let mut query = sqlx::query(&sql);
        for arg in args {
            query = query.bind(arg);
        }
        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn health_check(&self) -> Result<bool> {
        let row: (i64,) = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await?;
        Ok(row.0 == 1)
    }
}
