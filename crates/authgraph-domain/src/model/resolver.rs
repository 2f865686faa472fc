//! Typesystem resolution: latest-model lookup and memoization.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use moka::future::Cache;

use crate::error::{DomainError, DomainResult};

use super::type_system::TypeSystem;
use super::types::AuthorizationModel;

/// Resolves the typesystem for a store. When `model_id` is `None`, the
/// latest model for the store is used.
#[async_trait]
pub trait ModelResolver: Send + Sync {
    async fn resolve(
        &self,
        store_id: &str,
        model_id: Option<&str>,
    ) -> DomainResult<Arc<TypeSystem>>;
}

/// In-memory model store doubling as a resolver, for tests and development.
///
/// Models are kept per store in insertion order, newest at the end; the
/// latest model is the most recently written one.
#[derive(Debug, Default)]
pub struct InMemoryModelStore {
    models: DashMap<String, Vec<Arc<TypeSystem>>>,
}

impl InMemoryModelStore {
    /// Creates an empty model store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty model store wrapped in `Arc`.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Registers a model for a store and returns its id.
    pub fn write_model(&self, store_id: &str, model: AuthorizationModel) -> String {
        let id = model.id.clone();
        self.models
            .entry(store_id.to_string())
            .or_default()
            .push(Arc::new(TypeSystem::new(model)));
        id
    }
}

#[async_trait]
impl ModelResolver for InMemoryModelStore {
    async fn resolve(
        &self,
        store_id: &str,
        model_id: Option<&str>,
    ) -> DomainResult<Arc<TypeSystem>> {
        let models = self
            .models
            .get(store_id)
            .ok_or_else(|| DomainError::LatestModelNotFound {
                store_id: store_id.to_string(),
            })?;

        match model_id {
            Some(model_id) => models
                .iter()
                .find(|ts| ts.authorization_model_id() == model_id)
                .cloned()
                .ok_or_else(|| DomainError::ModelNotFound {
                    model_id: model_id.to_string(),
                }),
            None => models
                .last()
                .cloned()
                .ok_or_else(|| DomainError::LatestModelNotFound {
                    store_id: store_id.to_string(),
                }),
        }
    }
}

/// Memoizing wrapper over a `ModelResolver`.
///
/// Models are immutable once written, so pinned-id lookups are cached
/// indefinitely (bounded by capacity). "Latest" lookups are forwarded on
/// every call: the newest model must win as soon as it is written.
pub struct MemoizedModelResolver {
    inner: Arc<dyn ModelResolver>,
    cache: Cache<(String, String), Arc<TypeSystem>>,
}

impl MemoizedModelResolver {
    /// Wraps `inner` with a memoization cache of `capacity` typesystems.
    pub fn new(inner: Arc<dyn ModelResolver>, capacity: u64) -> Self {
        Self {
            inner,
            cache: Cache::builder().max_capacity(capacity).build(),
        }
    }
}

#[async_trait]
impl ModelResolver for MemoizedModelResolver {
    async fn resolve(
        &self,
        store_id: &str,
        model_id: Option<&str>,
    ) -> DomainResult<Arc<TypeSystem>> {
        let Some(model_id) = model_id else {
            return self.inner.resolve(store_id, None).await;
        };

        let key = (store_id.to_string(), model_id.to_string());
        if let Some(type_system) = self.cache.get(&key).await {
            return Ok(type_system);
        }

        let type_system = self.inner.resolve(store_id, Some(model_id)).await?;
        self.cache.insert(key, Arc::clone(&type_system)).await;
        Ok(type_system)
    }
}
