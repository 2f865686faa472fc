//! Configuration for the check resolution stack.

use std::time::Duration;

/// Configuration for the check engine and its resolver chain.
#[derive(Debug, Clone)]
pub struct CheckResolverConfig {
    /// Maximum recursion depth for a single check.
    pub resolve_node_limit: u32,
    /// Maximum concurrently executing sub-resolvers per request.
    pub resolve_node_breadth_limit: u32,
    /// Maximum concurrent datastore reads per request.
    pub max_concurrent_reads_for_check: u32,
    /// Whether the check query cache layer is enabled.
    ///
    /// Cached positive decisions can be stale for up to the TTL after tuple
    /// writes; enable only when that staleness window is acceptable.
    pub check_query_cache_enabled: bool,
    /// LRU capacity of the check query cache, in entries.
    pub check_query_cache_limit: u64,
    /// Lifetime of a check query cache entry.
    pub check_query_cache_ttl: Duration,
    /// Overall deadline for a check request.
    pub request_timeout: Duration,
}

impl Default for CheckResolverConfig {
    fn default() -> Self {
        Self {
            resolve_node_limit: 25,
            resolve_node_breadth_limit: 100,
            max_concurrent_reads_for_check: u32::MAX,
            check_query_cache_enabled: false,
            check_query_cache_limit: 10_000,
            check_query_cache_ttl: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl CheckResolverConfig {
    /// Sets the maximum recursion depth.
    pub fn with_resolve_node_limit(mut self, limit: u32) -> Self {
        self.resolve_node_limit = limit;
        self
    }

    /// Sets the per-request sub-resolver breadth limit.
    pub fn with_resolve_node_breadth_limit(mut self, limit: u32) -> Self {
        self.resolve_node_breadth_limit = limit;
        self
    }

    /// Sets the per-request concurrent datastore read limit.
    pub fn with_max_concurrent_reads(mut self, limit: u32) -> Self {
        self.max_concurrent_reads_for_check = limit;
        self
    }

    /// Enables or disables the check query cache.
    pub fn with_cache_enabled(mut self, enabled: bool) -> Self {
        self.check_query_cache_enabled = enabled;
        self
    }

    /// Sets the check query cache capacity.
    pub fn with_cache_limit(mut self, limit: u64) -> Self {
        self.check_query_cache_limit = limit;
        self
    }

    /// Sets the check query cache TTL.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.check_query_cache_ttl = ttl;
        self
    }

    /// Sets the overall request deadline.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}
