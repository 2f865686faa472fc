//! In-memory tuple store for tests and development.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::{HealthStatus, StorageResult};
use crate::traits::{
    validate_tuple, RelationshipTupleReader, StartingWithUserFilter, StoredTuple, TupleFilter,
    TupleKey, UsersetFilter,
};

/// In-memory implementation of the tuple reader facade.
///
/// Tuples are held in a `HashSet` per store for O(1) write/delete; reads are
/// linear scans, which is fine for the data sizes this store is meant for.
/// `DashMap` gives thread-safe access without a global lock.
#[derive(Debug, Default)]
pub struct MemoryDataStore {
    tuples: DashMap<String, HashSet<StoredTuple>>,
}

impl MemoryDataStore {
    /// Creates a new in-memory data store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new in-memory data store wrapped in `Arc`.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Applies writes then deletes for a store. The store entry is created on
    /// first write.
    ///
    /// # Errors
    /// Returns `StorageError::InvalidInput` when a tuple fails structural
    /// validation; no tuples are applied in that case.
    pub fn write_tuples(
        &self,
        store_id: &str,
        writes: Vec<StoredTuple>,
        deletes: Vec<StoredTuple>,
    ) -> StorageResult<()> {
        for tuple in writes.iter().chain(deletes.iter()) {
            validate_tuple(tuple)?;
        }
        let mut entry = self.tuples.entry(store_id.to_string()).or_default();
        for tuple in writes {
            entry.insert(tuple);
        }
        for tuple in deletes {
            entry.remove(&tuple);
        }
        Ok(())
    }

    /// Convenience single-tuple write.
    pub fn write_tuple(&self, store_id: &str, tuple: StoredTuple) -> StorageResult<()> {
        self.write_tuples(store_id, vec![tuple], vec![])
    }

    fn scan<F>(&self, store_id: &str, predicate: F) -> Vec<StoredTuple>
    where
        F: Fn(&StoredTuple) -> bool,
    {
        self.tuples
            .get(store_id)
            .map(|tuples| tuples.iter().filter(|t| predicate(t)).cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RelationshipTupleReader for MemoryDataStore {
    async fn read_user_tuple(
        &self,
        store_id: &str,
        key: &TupleKey,
    ) -> StorageResult<Option<StoredTuple>> {
        Ok(self
            .scan(store_id, |t| {
                t.object_string() == key.object
                    && t.relation == key.relation
                    && t.user_string() == key.user
            })
            .into_iter()
            .next())
    }

    async fn read(&self, store_id: &str, filter: &TupleFilter) -> StorageResult<Vec<StoredTuple>> {
        Ok(self.scan(store_id, |t| filter.matches(t)))
    }

    async fn read_userset_tuples(
        &self,
        store_id: &str,
        filter: &UsersetFilter,
    ) -> StorageResult<Vec<StoredTuple>> {
        Ok(self.scan(store_id, |t| filter.matches(t)))
    }

    async fn read_starting_with_user(
        &self,
        store_id: &str,
        filter: &StartingWithUserFilter,
    ) -> StorageResult<Vec<StoredTuple>> {
        Ok(self.scan(store_id, |t| filter.matches(t)))
    }

    async fn is_ready(&self) -> StorageResult<HealthStatus> {
        Ok(HealthStatus::Ready)
    }
}
