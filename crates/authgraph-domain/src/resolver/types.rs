//! Request and response types for the check resolver stack.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Semaphore;

use authgraph_storage::{RelationshipTupleReader, StoredTuple, TupleKey};

use crate::model::TypeSystem;

use super::fingerprint::CheckFingerprint;

/// Metadata threaded down through sub-checks.
#[derive(Debug, Clone, Copy)]
pub struct ResolutionMetadata {
    /// Remaining recursion budget; each dispatch decrements it.
    pub depth: u32,
}

/// Metadata reported back up from a resolved sub-tree.
///
/// Counters are summed at every join point over completed children; work
/// cancelled by a short-circuit is not folded in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResponseMetadata {
    /// Number of datastore reads issued.
    pub datastore_query_count: u32,
    /// Number of recursive dispatches into the resolver stack.
    pub dispatch_count: u32,
    /// Sticky flag: a cycle was observed somewhere in the sub-tree.
    pub cycle_detected: bool,
}

impl ResponseMetadata {
    /// Folds a completed child's counters into this metadata.
    pub fn merge(&mut self, child: &ResponseMetadata) {
        self.datastore_query_count += child.datastore_query_count;
        self.dispatch_count += child.dispatch_count;
        self.cycle_detected |= child.cycle_detected;
    }
}

/// A request flowing through the resolver stack.
///
/// Requests are immutable: recursive dispatches construct a new request with
/// a decremented depth and an augmented visited set. The per-request reader
/// (already wrapped for contextual overlay and bounded reads) and the breadth
/// limiter travel with the request so every level of the stack shares them.
#[derive(Clone)]
pub struct ResolveCheckRequest {
    pub store_id: String,
    pub authorization_model_id: String,
    pub tuple_key: TupleKey,
    /// Contextual tuples supplied with the request, visible only within it.
    pub contextual_tuples: Arc<Vec<StoredTuple>>,
    /// Condition evaluation context supplied by the caller.
    pub context: Arc<HashMap<String, serde_json::Value>>,
    /// Fingerprints on the current resolution path, for cycle detection.
    pub visited_paths: Arc<HashSet<CheckFingerprint>>,
    pub metadata: ResolutionMetadata,
    /// Typesystem resolved for this request's model.
    pub type_system: Arc<TypeSystem>,
    /// Per-request tuple reader (contextual overlay + bounded concurrency).
    pub reader: Arc<dyn RelationshipTupleReader>,
    /// Per-request budget for concurrently executing sub-resolvers.
    pub breadth_limiter: Arc<Semaphore>,
}

impl ResolveCheckRequest {
    /// Computes the fingerprint of this request's logical content.
    pub fn fingerprint(&self) -> CheckFingerprint {
        CheckFingerprint::new(
            &self.store_id,
            &self.authorization_model_id,
            &self.tuple_key,
            &self.contextual_tuples,
            &self.context,
        )
    }

    /// Builds the request for a recursive sub-check of `tuple_key`.
    pub fn dispatch_child(&self, tuple_key: TupleKey) -> Self {
        let mut child = self.clone();
        child.tuple_key = tuple_key;
        child.metadata = ResolutionMetadata {
            depth: self.metadata.depth.saturating_sub(1),
        };
        child
    }

    /// Returns a copy whose visited set also contains `fingerprint`.
    pub fn with_visited(&self, fingerprint: CheckFingerprint) -> Self {
        let mut visited = (*self.visited_paths).clone();
        visited.insert(fingerprint);
        let mut child = self.clone();
        child.visited_paths = Arc::new(visited);
        child
    }
}

impl std::fmt::Debug for ResolveCheckRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolveCheckRequest")
            .field("store_id", &self.store_id)
            .field("authorization_model_id", &self.authorization_model_id)
            .field("tuple_key", &self.tuple_key)
            .field("contextual_tuples", &self.contextual_tuples.len())
            .field("depth", &self.metadata.depth)
            .finish()
    }
}

/// The decision and accounting for a resolved check.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveCheckResponse {
    pub allowed: bool,
    pub metadata: ResponseMetadata,
}

impl ResolveCheckResponse {
    /// A response with the given decision and zeroed counters.
    pub fn new(allowed: bool) -> Self {
        Self {
            allowed,
            metadata: ResponseMetadata::default(),
        }
    }

    /// The response for a detected cycle: denied, flagged, not an error.
    pub fn cycle() -> Self {
        Self {
            allowed: false,
            metadata: ResponseMetadata {
                cycle_detected: true,
                ..Default::default()
            },
        }
    }
}
