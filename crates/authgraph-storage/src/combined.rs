//! Overlay of request-scoped contextual tuples on top of a datastore reader.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{HealthStatus, StorageResult};
use crate::traits::{
    RelationshipTupleReader, StartingWithUserFilter, StoredTuple, TupleFilter, TupleKey,
    UsersetFilter,
};

/// A tuple reader that overlays contextual tuples onto the datastore's view.
///
/// Contextual tuples behave as writes that shadow stored tuples: every read
/// yields matching contextual tuples first, then datastore rows, with
/// duplicates on `(object, relation, user)` suppressed so the contextual
/// version wins. The overlay is additive only; contextual tuples cannot
/// delete stored ones.
pub struct CombinedTupleReader {
    inner: Arc<dyn RelationshipTupleReader>,
    contextual: Vec<StoredTuple>,
}

impl CombinedTupleReader {
    /// Creates a reader overlaying `contextual` on `inner`.
    pub fn new(inner: Arc<dyn RelationshipTupleReader>, contextual: Vec<StoredTuple>) -> Self {
        Self { inner, contextual }
    }

    fn contextual_matching<F>(&self, predicate: F) -> Vec<StoredTuple>
    where
        F: Fn(&StoredTuple) -> bool,
    {
        self.contextual
            .iter()
            .filter(|t| predicate(t))
            .cloned()
            .collect()
    }
}

impl std::fmt::Debug for CombinedTupleReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CombinedTupleReader")
            .field("contextual_tuples", &self.contextual.len())
            .finish()
    }
}

#[async_trait]
impl RelationshipTupleReader for CombinedTupleReader {
    async fn read_user_tuple(
        &self,
        store_id: &str,
        key: &TupleKey,
    ) -> StorageResult<Option<StoredTuple>> {
        // The contextual version shadows the stored one.
        if let Some(tuple) = self.contextual.iter().find(|t| {
            t.object_string() == key.object
                && t.relation == key.relation
                && t.user_string() == key.user
        }) {
            return Ok(Some(tuple.clone()));
        }
        self.inner.read_user_tuple(store_id, key).await
    }

    async fn read(&self, store_id: &str, filter: &TupleFilter) -> StorageResult<Vec<StoredTuple>> {
        let local = self.contextual_matching(|t| filter.matches(t));
        let stored = self.inner.read(store_id, filter).await?;
        Ok(DedupingTuples::new(local, stored).collect())
    }

    async fn read_userset_tuples(
        &self,
        store_id: &str,
        filter: &UsersetFilter,
    ) -> StorageResult<Vec<StoredTuple>> {
        let local = self.contextual_matching(|t| filter.matches(t));
        let stored = self.inner.read_userset_tuples(store_id, filter).await?;
        Ok(DedupingTuples::new(local, stored).collect())
    }

    async fn read_starting_with_user(
        &self,
        store_id: &str,
        filter: &StartingWithUserFilter,
    ) -> StorageResult<Vec<StoredTuple>> {
        let local = self.contextual_matching(|t| filter.matches(t));
        let stored = self
            .inner
            .read_starting_with_user(store_id, filter)
            .await?;
        Ok(DedupingTuples::new(local, stored).collect())
    }

    async fn is_ready(&self) -> StorageResult<HealthStatus> {
        self.inner.is_ready().await
    }
}

/// Iterator that drains contextual tuples first, then stored tuples,
/// suppressing duplicate `(object, relation, user)` keys.
struct DedupingTuples {
    contextual: std::vec::IntoIter<StoredTuple>,
    stored: std::vec::IntoIter<StoredTuple>,
    seen: HashSet<(String, String, String)>,
}

impl DedupingTuples {
    fn new(contextual: Vec<StoredTuple>, stored: Vec<StoredTuple>) -> Self {
        Self {
            contextual: contextual.into_iter(),
            stored: stored.into_iter(),
            seen: HashSet::new(),
        }
    }
}

impl Iterator for DedupingTuples {
    type Item = StoredTuple;

    fn next(&mut self) -> Option<Self::Item> {
        for tuple in self.contextual.by_ref().chain(self.stored.by_ref()) {
            let key = (
                tuple.object_string(),
                tuple.relation.clone(),
                tuple.user_string(),
            );
            if self.seen.insert(key) {
                return Some(tuple);
            }
        }
        None
    }
}
