//! authgraph-storage: Storage abstraction layer
//!
//! This crate provides the read-side storage abstraction consumed by the
//! check engine:
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                authgraph-storage                  │
//! ├──────────────────────────────────────────────────┤
//! │  traits.rs   - RelationshipTupleReader facade    │
//! │  memory.rs   - In-memory implementation          │
//! │  bounded.rs  - Concurrency-bounded decorator     │
//! │  combined.rs - Contextual-tuple overlay          │
//! └──────────────────────────────────────────────────┘
//! ```

pub mod bounded;
pub mod combined;
pub mod error;
pub mod memory;
pub mod traits;

// Re-export commonly used types
pub use bounded::{register_bounded_reader_metrics, BoundedTupleReader};
pub use combined::CombinedTupleReader;
pub use error::{HealthStatus, StorageError, StorageResult};
pub use memory::MemoryDataStore;
pub use traits::{
    parse_user, split_object, validate_tuple, RelationshipTupleReader, StartingWithUserFilter,
    StoredTuple, TupleFilter, TupleKey, UsersetFilter,
};
