//! Check query cache layer of the resolver stack.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;

use crate::error::DomainResult;

use super::fingerprint::CheckFingerprint;
use super::traits::CheckResolver;
use super::types::{ResolveCheckRequest, ResolveCheckResponse};

/// Counter of check requests answered from the cache.
pub const CACHE_HITS_METRIC: &str = "authgraph_check_cache_hits_total";
/// Counter of check requests that missed the cache.
pub const CACHE_MISSES_METRIC: &str = "authgraph_check_cache_misses_total";

/// Memoizes check decisions keyed by request fingerprint.
///
/// Only the decision is cached; metadata counters are reported as zero on a
/// hit, with hit/miss counters exposed so cached answers are distinguishable
/// in telemetry. Entries are LRU-evicted past the capacity and expire after
/// the TTL. Errors and cycle results are never cached. Concurrent misses may
/// each invoke the delegate; the last writer wins.
pub struct CachedCheckResolver {
    delegate: OnceLock<Arc<dyn CheckResolver>>,
    cache: Cache<CheckFingerprint, bool>,
}

impl CachedCheckResolver {
    /// Creates a cache layer holding up to `max_size` decisions for `ttl`.
    pub fn new(max_size: u64, ttl: Duration) -> Self {
        Self {
            delegate: OnceLock::new(),
            cache: Cache::builder()
                .max_capacity(max_size)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Sets the next layer of the stack. May only be called once.
    pub fn set_delegate(&self, delegate: Arc<dyn CheckResolver>) {
        let _ = self.delegate.set(delegate);
    }

    /// Approximate number of cached decisions. Exposed for tests.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Runs pending cache maintenance. Useful when asserting on TTL behavior.
    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }
}

#[async_trait]
impl CheckResolver for CachedCheckResolver {
    async fn resolve_check(
        &self,
        request: ResolveCheckRequest,
    ) -> DomainResult<ResolveCheckResponse> {
        let fingerprint = request.fingerprint();

        if let Some(allowed) = self.cache.get(&fingerprint).await {
            metrics::counter!(CACHE_HITS_METRIC).increment(1);
            return Ok(ResolveCheckResponse::new(allowed));
        }
        metrics::counter!(CACHE_MISSES_METRIC).increment(1);

        let delegate = self.delegate.get().ok_or_else(|| {
            crate::error::DomainError::ResolverError {
                message: "cached check resolver has no delegate".to_string(),
            }
        })?;
        let response = delegate.resolve_check(request).await?;

        if !response.metadata.cycle_detected {
            self.cache.insert(fingerprint, response.allowed).await;
        }
        Ok(response)
    }

    async fn close(&self) {
        self.cache.invalidate_all();
        if let Some(delegate) = self.delegate.get() {
            delegate.close().await;
        }
    }
}

impl std::fmt::Debug for CachedCheckResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedCheckResolver")
            .field("entry_count", &self.cache.entry_count())
            .finish()
    }
}

/// Registers metric descriptions for the check cache.
pub fn register_check_cache_metrics() {
    metrics::describe_counter!(CACHE_HITS_METRIC, "Total number of check cache hits");
    metrics::describe_counter!(CACHE_MISSES_METRIC, "Total number of check cache misses");
}
