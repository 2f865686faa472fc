//! The check engine: request validation, typesystem resolution, per-request
//! reader wrapping, deadline enforcement and error mapping around the
//! resolver chain.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::time::timeout;

use authgraph_storage::{
    BoundedTupleReader, CombinedTupleReader, HealthStatus, RelationshipTupleReader, StoredTuple,
    TupleKey,
};

use crate::error::{DomainError, DomainResult};
use crate::model::ModelResolver;

use super::chain::CheckResolverChain;
use super::config::CheckResolverConfig;
use super::types::{ResolutionMetadata, ResolveCheckRequest, ResolveCheckResponse};

/// Histogram of datastore reads issued per check.
pub const CHECK_QUERY_COUNT_METRIC: &str = "authgraph_check_datastore_query_count";
/// Histogram of resolver dispatches per check.
pub const CHECK_DISPATCH_COUNT_METRIC: &str = "authgraph_check_dispatch_count";

/// A check request as supplied by the caller.
#[derive(Debug, Clone)]
pub struct CheckRequest {
    pub store_id: String,
    /// Model to evaluate against; the store's latest model when `None`.
    pub authorization_model_id: Option<String>,
    pub tuple_key: TupleKey,
    /// Tuples visible only within this request.
    pub contextual_tuples: Vec<StoredTuple>,
    /// Condition evaluation context.
    pub context: HashMap<String, serde_json::Value>,
}

impl CheckRequest {
    /// Creates a check request for the store's latest model.
    pub fn new(store_id: impl Into<String>, tuple_key: TupleKey) -> Self {
        Self {
            store_id: store_id.into(),
            authorization_model_id: None,
            tuple_key,
            contextual_tuples: Vec::new(),
            context: HashMap::new(),
        }
    }

    /// Pins the request to a specific model.
    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.authorization_model_id = Some(model_id.into());
        self
    }

    /// Attaches contextual tuples.
    pub fn with_contextual_tuples(mut self, tuples: Vec<StoredTuple>) -> Self {
        self.contextual_tuples = tuples;
        self
    }

    /// Attaches a condition evaluation context.
    pub fn with_context(mut self, context: HashMap<String, serde_json::Value>) -> Self {
        self.context = context;
        self
    }
}

/// Owns the resolver chain and answers check requests against a datastore.
pub struct CheckEngine {
    datastore: Arc<dyn RelationshipTupleReader>,
    model_resolver: Arc<dyn ModelResolver>,
    chain: CheckResolverChain,
    config: CheckResolverConfig,
}

impl CheckEngine {
    /// Builds an engine over `datastore` and `model_resolver`.
    pub fn new(
        datastore: Arc<dyn RelationshipTupleReader>,
        model_resolver: Arc<dyn ModelResolver>,
        config: CheckResolverConfig,
    ) -> Self {
        if config.check_query_cache_enabled {
            tracing::info!(
                ttl = ?config.check_query_cache_ttl,
                limit = config.check_query_cache_limit,
                "check query cache is enabled; results may be stale up to the TTL"
            );
        }
        let chain = CheckResolverChain::build(&config);
        Self {
            datastore,
            model_resolver,
            chain,
            config,
        }
    }

    /// Answers "does `user` have `relation` on `object`?".
    ///
    /// # Errors
    /// Validation failures, model resolution failures, condition evaluation
    /// failures, `ModelTooComplex` when the recursion budget is exhausted,
    /// and `DeadlineExceeded` when the request deadline expires.
    pub async fn check(&self, request: CheckRequest) -> DomainResult<ResolveCheckResponse> {
        let deadline = self.config.request_timeout;
        let response = match timeout(deadline, self.resolve(request)).await {
            Ok(result) => result.map_err(|e| match e {
                DomainError::ResolutionDepthExceeded => DomainError::ModelTooComplex,
                other => other,
            })?,
            Err(_) => {
                return Err(DomainError::DeadlineExceeded {
                    timeout_ms: deadline.as_millis() as u64,
                })
            }
        };

        metrics::histogram!(CHECK_QUERY_COUNT_METRIC)
            .record(f64::from(response.metadata.datastore_query_count));
        metrics::histogram!(CHECK_DISPATCH_COUNT_METRIC)
            .record(f64::from(response.metadata.dispatch_count));
        tracing::debug!(
            allowed = response.allowed,
            datastore_query_count = response.metadata.datastore_query_count,
            dispatch_count = response.metadata.dispatch_count,
            cycle_detected = response.metadata.cycle_detected,
            "check resolved"
        );
        Ok(response)
    }

    async fn resolve(&self, request: CheckRequest) -> DomainResult<ResolveCheckResponse> {
        let type_system = self
            .model_resolver
            .resolve(
                &request.store_id,
                request.authorization_model_id.as_deref(),
            )
            .await?;

        type_system.validate_check_tuple_key(&request.tuple_key)?;
        for tuple in &request.contextual_tuples {
            type_system.validate_contextual_tuple(tuple)?;
        }

        // Contextual overlay first, then bounded admission, so contextual
        // matches also count against the read budget.
        let combined = Arc::new(CombinedTupleReader::new(
            Arc::clone(&self.datastore),
            request.contextual_tuples.clone(),
        ));
        let reader: Arc<dyn RelationshipTupleReader> = Arc::new(BoundedTupleReader::new(
            combined,
            self.config.max_concurrent_reads_for_check,
        ));

        let breadth = self.config.resolve_node_breadth_limit as usize;
        let resolve_request = ResolveCheckRequest {
            store_id: request.store_id,
            authorization_model_id: type_system.authorization_model_id().to_string(),
            tuple_key: request.tuple_key,
            contextual_tuples: Arc::new(request.contextual_tuples),
            context: Arc::new(request.context),
            visited_paths: Arc::new(HashSet::new()),
            metadata: ResolutionMetadata {
                depth: self.config.resolve_node_limit,
            },
            type_system,
            reader,
            breadth_limiter: Arc::new(Semaphore::new(breadth.min(Semaphore::MAX_PERMITS))),
        };

        self.chain.resolve_check(resolve_request).await
    }

    /// Readiness of the underlying datastore.
    pub async fn is_ready(&self) -> DomainResult<HealthStatus> {
        Ok(self.datastore.is_ready().await?)
    }

    /// Releases engine resources. Call once on shutdown.
    pub async fn close(&self) {
        self.chain.close().await;
    }
}

impl std::fmt::Debug for CheckEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckEngine")
            .field("config", &self.config)
            .finish()
    }
}

/// Registers metric descriptions for the check engine.
pub fn register_check_metrics() {
    metrics::describe_histogram!(
        CHECK_QUERY_COUNT_METRIC,
        "Datastore reads issued per check request"
    );
    metrics::describe_histogram!(
        CHECK_DISPATCH_COUNT_METRIC,
        "Resolver dispatches per check request"
    );
    super::cached::register_check_cache_metrics();
    authgraph_storage::register_bounded_reader_metrics();
}
