//! Check resolution engine.
//!
//! A check request flows through a stack of resolvers sharing one
//! capability, `CheckResolver`:
//!
//! ```text
//!   caller ─▶ CycleDetection ─▶ [Cached] ─▶ LocalChecker ─┐
//!                  ▲                                      │
//!                  └────────── recursive dispatch ◀───────┘
//! ```
//!
//! The `CheckEngine` fronts the stack: it validates the request, resolves
//! the typesystem, wraps the datastore with the contextual-tuple overlay and
//! the bounded-concurrency decorator, and enforces the request deadline.

mod cached;
mod chain;
mod config;
mod cycle;
mod engine;
mod fingerprint;
mod local;
mod traits;
mod types;

#[cfg(test)]
mod tests;

pub use cached::{register_check_cache_metrics, CachedCheckResolver};
pub use chain::CheckResolverChain;
pub use config::CheckResolverConfig;
pub use cycle::CycleDetectionCheckResolver;
pub use engine::{register_check_metrics, CheckEngine, CheckRequest};
pub use fingerprint::CheckFingerprint;
pub use local::LocalChecker;
pub use traits::CheckResolver;
pub use types::{
    ResolutionMetadata, ResolveCheckRequest, ResolveCheckResponse, ResponseMetadata,
};
