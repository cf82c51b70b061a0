// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Typed view of one collection.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::{Result, SyncError};
use crate::model::{Resource, ResourceKind};

use super::{Document, DocumentStore, Filter, Patch};

/// Typed access to the collection of resource kind `K`.
pub struct Repository<K: ResourceKind> {
    store: Arc<dyn DocumentStore>,
    _kind: PhantomData<fn() -> K>,
}

impl<K: ResourceKind> Clone for Repository<K> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            _kind: PhantomData,
        }
    }
}

impl<K: ResourceKind> Repository<K> {
    /// Wrap a store.
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            _kind: PhantomData,
        }
    }

    /// Collection name of `K`.
    pub fn collection(&self) -> &'static str {
        K::RESOURCE_TYPE.collection()
    }

    /// Insert a new resource.
    pub async fn insert(&self, resource: &Resource<K>) -> Result<()> {
        let doc = Document {
            id: resource.id.clone(),
            identity_key: resource.identity_key(),
            body: serde_json::to_value(resource)?,
        };
        self.store.create(self.collection(), &doc).await
    }

    /// First resource matching `filter`.
    pub async fn find_one(&self, filter: &Filter) -> Result<Option<Resource<K>>> {
        self.store
            .find_one(self.collection(), filter)
            .await?
            .map(|doc| serde_json::from_value::<Resource<K>>(doc).map_err(SyncError::from))
            .transpose()
    }

    /// All resources matching `filter`.
    pub async fn find(&self, filter: &Filter) -> Result<Vec<Resource<K>>> {
        self.store
            .find(self.collection(), filter)
            .await?
            .into_iter()
            .map(|doc| serde_json::from_value::<Resource<K>>(doc).map_err(SyncError::from))
            .collect()
    }

    /// Patch the first resource matching `filter`.
    pub async fn patch_one(&self, filter: &Filter, patch: &Patch) -> Result<bool> {
        self.store.patch_one(self.collection(), filter, patch).await
    }

    /// Delete the first resource matching `filter`.
    pub async fn delete_one(&self, filter: &Filter) -> Result<bool> {
        self.store.delete_one(self.collection(), filter).await
    }

    /// Delete every resource matching `filter`.
    pub async fn delete_many(&self, filter: &Filter) -> Result<u64> {
        self.store.delete_many(self.collection(), filter).await
    }
}
