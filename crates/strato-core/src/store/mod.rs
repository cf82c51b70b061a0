// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Keyed JSON document store.
//!
//! One logical collection per resource type. Filters and patches address
//! fields by dotted path (`sync_status.state`), so concurrent writers touching
//! disjoint fields never overwrite each other.

pub mod repository;
pub mod sqlite;

pub use self::repository::Repository;
pub use self::sqlite::SqliteStore;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::Result;

/// A document to insert.
#[derive(Debug, Clone)]
pub struct Document {
    /// Primary key within the collection.
    pub id: String,
    /// Unique identity within the collection (name within scope).
    pub identity_key: String,
    /// JSON body.
    pub body: Value,
}

/// One predicate of a [`Filter`].
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Field equals value.
    Eq(String, Value),
    /// Field differs from value (missing fields differ from everything but null).
    Ne(String, Value),
    /// Field is present and non-null (`true`) or absent/null (`false`).
    Exists(String, bool),
    /// Field equals one of the values.
    In(String, Vec<Value>),
}

/// Conjunction of conditions. An empty filter matches every document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    /// Empty filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `path == value`.
    pub fn eq(mut self, path: impl Into<String>, value: impl Serialize) -> Self {
        self.conditions
            .push(Condition::Eq(path.into(), to_value(value)));
        self
    }

    /// Require `path != value`.
    pub fn ne(mut self, path: impl Into<String>, value: impl Serialize) -> Self {
        self.conditions
            .push(Condition::Ne(path.into(), to_value(value)));
        self
    }

    /// Require `path` to be present (or absent).
    pub fn exists(mut self, path: impl Into<String>, present: bool) -> Self {
        self.conditions.push(Condition::Exists(path.into(), present));
        self
    }

    /// Require `path` to be one of `values`.
    pub fn is_in<I, V>(mut self, path: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Serialize,
    {
        let values = values.into_iter().map(to_value).collect();
        self.conditions.push(Condition::In(path.into(), values));
        self
    }

    /// Conditions in insertion order.
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }
}

/// One operation of a [`Patch`].
#[derive(Debug, Clone, PartialEq)]
pub enum PatchOp {
    /// Set a field (creating it if needed).
    Set(String, Value),
    /// Remove a field.
    Unset(String),
}

/// Field-level update applied atomically to one document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    ops: Vec<PatchOp>,
}

impl Patch {
    /// Empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `path` to `value`.
    pub fn set(mut self, path: impl Into<String>, value: impl Serialize) -> Self {
        self.ops.push(PatchOp::Set(path.into(), to_value(value)));
        self
    }

    /// Remove `path`.
    pub fn unset(mut self, path: impl Into<String>) -> Self {
        self.ops.push(PatchOp::Unset(path.into()));
        self
    }

    /// Operations in insertion order.
    pub fn ops(&self) -> &[PatchOp] {
        &self.ops
    }

    /// Whether the patch does nothing.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

// Values built by the control plane are plain data; anything that fails to
// serialize is stored as null rather than aborting the operation.
fn to_value(value: impl Serialize) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Document store backend.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a document. Fails with `AlreadyExists` if the id or identity key is taken.
    async fn create(&self, collection: &str, doc: &Document) -> Result<()>;

    /// Patch the first document matching `filter`. Returns whether one matched.
    async fn patch_one(&self, collection: &str, filter: &Filter, patch: &Patch) -> Result<bool>;

    /// First document matching `filter`.
    async fn find_one(&self, collection: &str, filter: &Filter) -> Result<Option<Value>>;

    /// All documents matching `filter`, in insertion order.
    async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Value>>;

    /// Delete the first document matching `filter`. Returns whether one matched.
    async fn delete_one(&self, collection: &str, filter: &Filter) -> Result<bool>;

    /// Delete every document matching `filter`. Returns the number removed.
    async fn delete_many(&self, collection: &str, filter: &Filter) -> Result<u64>;

    /// Check connectivity.
    async fn health_check(&self) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_builder() {
        let filter = Filter::new()
            .eq("account_name", "acme")
            .ne("marked_for_deletion", true)
            .exists("cluster_name", true)
            .is_in("sync_status.state", ["in_queue", "errored_at_agent"]);

        assert_eq!(
            filter.conditions(),
            &[
                Condition::Eq("account_name".to_string(), json!("acme")),
                Condition::Ne("marked_for_deletion".to_string(), json!(true)),
                Condition::Exists("cluster_name".to_string(), true),
                Condition::In(
                    "sync_status.state".to_string(),
                    vec![json!("in_queue"), json!("errored_at_agent")]
                ),
            ]
        );
    }

    #[test]
    fn test_patch_builder() {
        let patch = Patch::new().set("record_version", 4).unset("cluster_name");
        assert!(!patch.is_empty());
        assert_eq!(
            patch.ops(),
            &[
                PatchOp::Set("record_version".to_string(), json!(4)),
                PatchOp::Unset("cluster_name".to_string()),
            ]
        );
        assert!(Patch::new().is_empty());
    }
}
