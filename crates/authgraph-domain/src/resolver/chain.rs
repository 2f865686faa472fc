//! Assembly of the check resolver stack.

use std::sync::Arc;

use crate::error::DomainResult;

use super::cached::CachedCheckResolver;
use super::config::CheckResolverConfig;
use super::cycle::CycleDetectionCheckResolver;
use super::local::LocalChecker;
use super::traits::CheckResolver;
use super::types::{ResolveCheckRequest, ResolveCheckResponse};

/// The assembled resolver stack.
///
/// The configured topology is
/// `CycleDetection -> [Cached] -> LocalChecker`, with the evaluator's
/// recursive dispatches re-entering the cycle detection layer at the head.
/// The chain owns every layer; the evaluator's back edge is weak, so
/// dropping the chain tears the whole stack down.
pub struct CheckResolverChain {
    head: Arc<dyn CheckResolver>,
}

impl CheckResolverChain {
    /// Builds the stack described by `config`.
    pub fn build(config: &CheckResolverConfig) -> Self {
        let cycle = Arc::new(CycleDetectionCheckResolver::new());
        let local = Arc::new(LocalChecker::new());

        if config.check_query_cache_enabled {
            let cached = Arc::new(CachedCheckResolver::new(
                config.check_query_cache_limit,
                config.check_query_cache_ttl,
            ));
            cached.set_delegate(local.clone());
            cycle.set_delegate(cached);
        } else {
            cycle.set_delegate(local.clone());
        }

        let head: Arc<dyn CheckResolver> = cycle;
        local.set_dispatcher(Arc::downgrade(&head));
        Self { head }
    }

    /// Resolves a request through the head of the stack.
    pub async fn resolve_check(
        &self,
        request: ResolveCheckRequest,
    ) -> DomainResult<ResolveCheckResponse> {
        self.head.resolve_check(request).await
    }

    /// Closes every layer of the stack.
    pub async fn close(&self) {
        self.head.close().await;
    }
}

impl std::fmt::Debug for CheckResolverChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckResolverChain").finish()
    }
}
