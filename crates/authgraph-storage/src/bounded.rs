//! Bounded-concurrency decorator over a tuple reader.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{HealthStatus, StorageError, StorageResult};
use crate::traits::{
    RelationshipTupleReader, StartingWithUserFilter, StoredTuple, TupleFilter, TupleKey,
    UsersetFilter,
};

/// Histogram of time spent waiting to be admitted to the datastore, in
/// milliseconds. Operators use this to size read pools.
pub const BOUNDED_READ_DELAY_METRIC: &str = "authgraph_datastore_bounded_read_delay_ms";

/// Wraps a tuple reader so that at most `max_concurrent_reads` read calls are
/// in flight at once. One request cannot hoard all the database connections
/// available.
///
/// Blocked acquirers are cancellation-aware: dropping the read future while
/// waiting abandons the wait without ever consuming a permit.
pub struct BoundedTupleReader {
    inner: Arc<dyn RelationshipTupleReader>,
    limiter: Arc<Semaphore>,
}

impl BoundedTupleReader {
    /// Creates a new bounded reader admitting `max_concurrent_reads` calls.
    pub fn new(inner: Arc<dyn RelationshipTupleReader>, max_concurrent_reads: u32) -> Self {
        let permits = (max_concurrent_reads as usize).min(Semaphore::MAX_PERMITS);
        Self {
            inner,
            limiter: Arc::new(Semaphore::new(permits)),
        }
    }

    /// Number of permits currently available. Exposed for tests.
    pub fn available_permits(&self) -> usize {
        self.limiter.available_permits()
    }

    async fn acquire(&self) -> StorageResult<OwnedSemaphorePermit> {
        let start = Instant::now();
        let permit = self
            .limiter
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| StorageError::InternalError {
                message: "datastore read limiter closed".to_string(),
            })?;

        let waited_ms = start.elapsed().as_secs_f64() * 1_000.0;
        metrics::histogram!(BOUNDED_READ_DELAY_METRIC).record(waited_ms);
        tracing::trace!(time_waiting_ms = waited_ms, "admitted datastore read");
        Ok(permit)
    }
}

impl std::fmt::Debug for BoundedTupleReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedTupleReader")
            .field("available_permits", &self.limiter.available_permits())
            .finish()
    }
}

#[async_trait]
impl RelationshipTupleReader for BoundedTupleReader {
    async fn read_user_tuple(
        &self,
        store_id: &str,
        key: &TupleKey,
    ) -> StorageResult<Option<StoredTuple>> {
        let _permit = self.acquire().await?;
        self.inner.read_user_tuple(store_id, key).await
    }

    async fn read(&self, store_id: &str, filter: &TupleFilter) -> StorageResult<Vec<StoredTuple>> {
        let _permit = self.acquire().await?;
        self.inner.read(store_id, filter).await
    }

    async fn read_userset_tuples(
        &self,
        store_id: &str,
        filter: &UsersetFilter,
    ) -> StorageResult<Vec<StoredTuple>> {
        let _permit = self.acquire().await?;
        self.inner.read_userset_tuples(store_id, filter).await
    }

    async fn read_starting_with_user(
        &self,
        store_id: &str,
        filter: &StartingWithUserFilter,
    ) -> StorageResult<Vec<StoredTuple>> {
        let _permit = self.acquire().await?;
        self.inner.read_starting_with_user(store_id, filter).await
    }

    async fn is_ready(&self) -> StorageResult<HealthStatus> {
        // The probe must not compete with reads for admission.
        self.inner.is_ready().await
    }
}

/// Registers metric descriptions for the bounded reader.
pub fn register_bounded_reader_metrics() {
    metrics::describe_histogram!(
        BOUNDED_READ_DELAY_METRIC,
        "Time spent waiting for admission to the datastore, in milliseconds"
    );
}
