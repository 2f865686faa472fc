//! authgraph-domain: Check resolution engine
//!
//! This crate contains the core of the authorization service:
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                authgraph-domain                   │
//! ├──────────────────────────────────────────────────┤
//! │  model/     - Authorization model & typesystem   │
//! │  condition/ - Tuple condition evaluation         │
//! │  resolver/  - Check resolver stack & engine      │
//! └──────────────────────────────────────────────────┘
//! ```

pub mod condition;
pub mod error;
pub mod model;
pub mod resolver;

// Re-export commonly used types at the crate root
pub use error::{DomainError, DomainResult};
pub use resolver::{CheckEngine, CheckRequest, CheckResolverConfig, ResolveCheckResponse};
