//! The resolver capability shared by every layer of the check stack.

use async_trait::async_trait;

use crate::error::DomainResult;

use super::types::{ResolveCheckRequest, ResolveCheckResponse};

/// One layer of the check resolution stack.
///
/// Every layer implements the same single operation and optionally delegates
/// to the next layer; recursive dispatches from the evaluator re-enter the
/// head of the stack so cycle detection and caching cover every level.
#[async_trait]
pub trait CheckResolver: Send + Sync {
    /// Resolves a check request to a decision.
    async fn resolve_check(
        &self,
        request: ResolveCheckRequest,
    ) -> DomainResult<ResolveCheckResponse>;

    /// Releases resources held by this resolver. Called once on shutdown.
    async fn close(&self) {}
}
