//! Cycle detection layer of the resolver stack.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;

use crate::error::{DomainError, DomainResult};

use super::traits::CheckResolver;
use super::types::{ResolveCheckRequest, ResolveCheckResponse};

/// Rejects requests whose fingerprint already appears on the current
/// resolution path.
///
/// A revisited fingerprint means the model loops back to a node that is
/// still being resolved; semantically there is no path, so the result is
/// `allowed=false` with `cycle_detected=true` — never an error. The visited
/// set is immutable per frame: each dispatch sees its own path only, so
/// parallel siblings cannot observe each other's entries and no removal on
/// return is needed.
#[derive(Default)]
pub struct CycleDetectionCheckResolver {
    delegate: OnceLock<Arc<dyn CheckResolver>>,
}

impl CycleDetectionCheckResolver {
    /// Creates a detached cycle detection layer; the chain builder wires the
    /// delegate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the next layer of the stack. May only be called once.
    pub fn set_delegate(&self, delegate: Arc<dyn CheckResolver>) {
        let _ = self.delegate.set(delegate);
    }

    fn delegate(&self) -> DomainResult<&Arc<dyn CheckResolver>> {
        self.delegate.get().ok_or_else(|| DomainError::ResolverError {
            message: "cycle detection resolver has no delegate".to_string(),
        })
    }
}

#[async_trait]
impl CheckResolver for CycleDetectionCheckResolver {
    async fn resolve_check(
        &self,
        request: ResolveCheckRequest,
    ) -> DomainResult<ResolveCheckResponse> {
        let fingerprint = request.fingerprint();
        if request.visited_paths.contains(&fingerprint) {
            tracing::debug!(fingerprint = %fingerprint, "cycle detected");
            return Ok(ResolveCheckResponse::cycle());
        }

        let child = request.with_visited(fingerprint);
        self.delegate()?.resolve_check(child).await
    }

    async fn close(&self) {
        if let Some(delegate) = self.delegate.get() {
            delegate.close().await;
        }
    }
}
