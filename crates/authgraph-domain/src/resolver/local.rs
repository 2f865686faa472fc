//! Local evaluation of relation rewrites.
//!
//! The `LocalChecker` compiles no intermediate form: it walks the rewrite
//! tree for `(object type, relation)` directly, reading tuples through the
//! request's reader and dispatching recursive sub-checks back into the head
//! of the resolver stack so cycle detection and caching cover every level.
//!
//! Set operators evaluate their children concurrently under the request's
//! breadth budget. Children that cannot obtain a breadth permit are
//! evaluated sequentially after the concurrent batch — exhausting the budget
//! degrades parallelism, it never fails or deadlocks. Short-circuits drop
//! the remaining child futures, which both cancels their in-flight reads and
//! releases their permits; counters from cancelled siblings are not folded
//! into the parent.

use std::future::Future;
use std::pin::Pin;
use std::sync::{OnceLock, Weak};

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};

use authgraph_storage::{parse_user, StoredTuple, TupleFilter, TupleKey, UsersetFilter};

use crate::condition::ConditionEvaluator;
use crate::error::{DomainError, DomainResult};
use crate::model::RewriteUserset;

use super::traits::CheckResolver;
use super::types::{ResolveCheckRequest, ResolveCheckResponse, ResponseMetadata};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
type CheckFuture<'a> = BoxFuture<'a, DomainResult<ResolveCheckResponse>>;

/// The evaluator at the bottom of the resolver stack.
pub struct LocalChecker {
    /// Back edge to the head of the stack, set by the chain builder.
    dispatcher: OnceLock<Weak<dyn CheckResolver>>,
    conditions: ConditionEvaluator,
}

impl LocalChecker {
    /// Creates a detached evaluator; the chain builder wires the dispatcher.
    pub fn new() -> Self {
        Self {
            dispatcher: OnceLock::new(),
            conditions: ConditionEvaluator::new(),
        }
    }

    /// Sets the head of the stack for recursive dispatches. May only be
    /// called once. Held weakly so the chain owns its layers.
    pub fn set_dispatcher(&self, dispatcher: Weak<dyn CheckResolver>) {
        let _ = self.dispatcher.set(dispatcher);
    }

    /// Dispatches a recursive sub-check through the head of the stack.
    fn dispatch<'a>(&'a self, req: &'a ResolveCheckRequest, tuple_key: TupleKey) -> CheckFuture<'a> {
        Box::pin(async move {
            let head = self
                .dispatcher
                .get()
                .and_then(Weak::upgrade)
                .ok_or_else(|| DomainError::ResolverError {
                    message: "check resolver chain has been shut down".to_string(),
                })?;
            let child = req.dispatch_child(tuple_key);
            let mut response = head.resolve_check(child).await?;
            response.metadata.dispatch_count += 1;
            Ok(response)
        })
    }

    fn resolve_rewrite<'a>(
        &'a self,
        req: &'a ResolveCheckRequest,
        rewrite: &'a RewriteUserset,
    ) -> CheckFuture<'a> {
        Box::pin(async move {
            match rewrite {
                RewriteUserset::This => self.resolve_direct(req).await,

                RewriteUserset::ComputedUserset { relation } => {
                    let key = TupleKey::new(
                        req.tuple_key.object.clone(),
                        relation.clone(),
                        req.tuple_key.user.clone(),
                    );
                    self.dispatch(req, key).await
                }

                RewriteUserset::TupleToUserset {
                    tupleset,
                    computed_relation,
                } => {
                    self.resolve_tuple_to_userset(req, tupleset, computed_relation)
                        .await
                }

                RewriteUserset::Union { children } => {
                    let futures = children
                        .iter()
                        .map(|child| self.resolve_rewrite(req, child))
                        .collect();
                    self.resolve_union_of(req, futures).await
                }

                RewriteUserset::Intersection { children } => {
                    self.resolve_intersection(req, children).await
                }

                RewriteUserset::Difference { base, subtract } => {
                    self.resolve_difference(req, base, subtract).await
                }
            }
        })
    }

    /// Resolves direct tuples on the request's relation: an exact match on
    /// the user, a type-scoped wildcard when the relation permits one, and
    /// userset tuples expanded through sub-checks.
    async fn resolve_direct(
        &self,
        req: &ResolveCheckRequest,
    ) -> DomainResult<ResolveCheckResponse> {
        let mut metadata = ResponseMetadata::default();
        let key = &req.tuple_key;
        let (object_type, object_id) =
            key.split_object()
                .map_err(|_| DomainError::InvalidObjectFormat {
                    value: key.object.clone(),
                })?;

        metadata.datastore_query_count += 1;
        if let Some(tuple) = req.reader.read_user_tuple(&req.store_id, key).await? {
            if self.tuple_condition_holds(req, &tuple)? {
                return Ok(ResolveCheckResponse { allowed: true, metadata });
            }
        }

        let (user_type, user_id, user_relation) =
            parse_user(&key.user).map_err(|_| DomainError::InvalidUserFormat {
                value: key.user.clone(),
            })?;

        // A wildcard grants access to every terminal user of its type, but
        // only where the model permits "<type>:*" on this relation.
        if user_relation.is_none()
            && user_id != "*"
            && req
                .type_system
                .allows_wildcard(object_type, &key.relation, &user_type)?
        {
            let wildcard_key = TupleKey::new(
                key.object.clone(),
                key.relation.clone(),
                format!("{user_type}:*"),
            );
            metadata.datastore_query_count += 1;
            if let Some(tuple) = req
                .reader
                .read_user_tuple(&req.store_id, &wildcard_key)
                .await?
            {
                if self.tuple_condition_holds(req, &tuple)? {
                    return Ok(ResolveCheckResponse { allowed: true, metadata });
                }
            }
        }

        // Userset tuples on this relation: membership is resolved through a
        // sub-check per userset. A typed relation that permits no usersets
        // cannot be granted through one, so the read is skipped; an untyped
        // relation (no restrictions at all) stays permissive.
        let allowed_userset_types = req
            .type_system
            .userset_restrictions_for(object_type, &key.relation)?;
        if allowed_userset_types.is_empty()
            && !req
                .type_system
                .type_restrictions_for(object_type, &key.relation)?
                .is_empty()
        {
            return Ok(ResolveCheckResponse { allowed: false, metadata });
        }
        let filter = UsersetFilter {
            object_type: object_type.to_string(),
            object_id: object_id.to_string(),
            relation: key.relation.clone(),
            allowed_userset_types,
        };
        metadata.datastore_query_count += 1;
        let usersets = req.reader.read_userset_tuples(&req.store_id, &filter).await?;

        let mut children: Vec<CheckFuture<'_>> = Vec::with_capacity(usersets.len());
        for tuple in usersets {
            if tuple.user_string() == key.user {
                // Already covered by the exact-match read.
                continue;
            }
            if !self.tuple_condition_holds(req, &tuple)? {
                continue;
            }
            let Some(userset_relation) = tuple.user_relation.clone() else {
                continue;
            };
            let child_key = TupleKey::new(
                format!("{}:{}", tuple.user_type, tuple.user_id),
                userset_relation,
                key.user.clone(),
            );
            children.push(self.dispatch(req, child_key));
        }

        if children.is_empty() {
            return Ok(ResolveCheckResponse { allowed: false, metadata });
        }
        let mut response = self.resolve_union_of(req, children).await?;
        response.metadata.merge(&metadata);
        Ok(response)
    }

    /// Resolves `computed_relation` on the objects of the tupleset relation
    /// (e.g. `viewer from parent`).
    async fn resolve_tuple_to_userset(
        &self,
        req: &ResolveCheckRequest,
        tupleset: &str,
        computed_relation: &str,
    ) -> DomainResult<ResolveCheckResponse> {
        let mut metadata = ResponseMetadata::default();
        let (object_type, object_id) =
            req.tuple_key
                .split_object()
                .map_err(|_| DomainError::InvalidObjectFormat {
                    value: req.tuple_key.object.clone(),
                })?;

        metadata.datastore_query_count += 1;
        let tuples = req
            .reader
            .read(
                &req.store_id,
                &TupleFilter::for_object_relation(object_type, object_id, tupleset),
            )
            .await?;

        let mut children: Vec<CheckFuture<'_>> = Vec::with_capacity(tuples.len());
        for tuple in tuples {
            if tuple.is_wildcard() {
                // A wildcard does not name a specific object to recurse into.
                continue;
            }
            // Tupleset users without the computed relation are ignored.
            if !req
                .type_system
                .has_relation(&tuple.user_type, computed_relation)
            {
                continue;
            }
            if !self.tuple_condition_holds(req, &tuple)? {
                continue;
            }
            let child_key = TupleKey::new(
                format!("{}:{}", tuple.user_type, tuple.user_id),
                computed_relation.to_string(),
                req.tuple_key.user.clone(),
            );
            children.push(self.dispatch(req, child_key));
        }

        if children.is_empty() {
            return Ok(ResolveCheckResponse { allowed: false, metadata });
        }
        let mut response = self.resolve_union_of(req, children).await?;
        response.metadata.merge(&metadata);
        Ok(response)
    }

    /// Union semantics over child futures: the first `allowed=true` wins and
    /// cancels the remaining siblings; an error propagates only when no
    /// child grants access.
    async fn resolve_union_of<'a>(
        &'a self,
        req: &'a ResolveCheckRequest,
        children: Vec<CheckFuture<'a>>,
    ) -> DomainResult<ResolveCheckResponse> {
        let mut metadata = ResponseMetadata::default();
        let (mut running, deferred) = self.admit(req, children);

        let mut first_error: Option<DomainError> = None;
        while let Some(result) = running.next().await {
            match result {
                Ok(response) if response.allowed => {
                    metadata.merge(&response.metadata);
                    return Ok(ResolveCheckResponse { allowed: true, metadata });
                }
                Ok(response) => metadata.merge(&response.metadata),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        for child in deferred {
            match child.await {
                Ok(response) if response.allowed => {
                    metadata.merge(&response.metadata);
                    return Ok(ResolveCheckResponse { allowed: true, metadata });
                }
                Ok(response) => metadata.merge(&response.metadata),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        Ok(ResolveCheckResponse { allowed: false, metadata })
    }

    /// Intersection semantics: the first `allowed=false` wins and cancels
    /// the remaining siblings; errors short-circuit.
    async fn resolve_intersection<'a>(
        &'a self,
        req: &'a ResolveCheckRequest,
        children: &'a [RewriteUserset],
    ) -> DomainResult<ResolveCheckResponse> {
        let futures = children
            .iter()
            .map(|child| self.resolve_rewrite(req, child))
            .collect();

        let mut metadata = ResponseMetadata::default();
        let (mut running, deferred) = self.admit(req, futures);

        while let Some(result) = running.next().await {
            let response = result?;
            metadata.merge(&response.metadata);
            if !response.allowed {
                return Ok(ResolveCheckResponse { allowed: false, metadata });
            }
        }
        for child in deferred {
            let response = child.await?;
            metadata.merge(&response.metadata);
            if !response.allowed {
                return Ok(ResolveCheckResponse { allowed: false, metadata });
            }
        }

        Ok(ResolveCheckResponse { allowed: true, metadata })
    }

    /// Difference semantics: `base` grants access unless `subtract` does.
    /// A denied base cancels the subtract branch.
    async fn resolve_difference<'a>(
        &'a self,
        req: &'a ResolveCheckRequest,
        base: &'a RewriteUserset,
        subtract: &'a RewriteUserset,
    ) -> DomainResult<ResolveCheckResponse> {
        let Ok(permit) = req.breadth_limiter.clone().try_acquire_owned() else {
            // Budget exhausted: evaluate sequentially, base first.
            let base_response = self.resolve_rewrite(req, base).await?;
            if !base_response.allowed {
                return Ok(base_response);
            }
            let subtract_response = self.resolve_rewrite(req, subtract).await?;
            let mut metadata = base_response.metadata;
            metadata.merge(&subtract_response.metadata);
            return Ok(ResolveCheckResponse {
                allowed: !subtract_response.allowed,
                metadata,
            });
        };

        enum Side {
            Base,
            Subtract,
        }
        type SidedResult = (Side, DomainResult<ResolveCheckResponse>);

        let mut running: FuturesUnordered<BoxFuture<'a, SidedResult>> = FuturesUnordered::new();
        running.push(Box::pin(async move {
            (Side::Base, self.resolve_rewrite(req, base).await)
        }));
        running.push(Box::pin(async move {
            let _permit = permit;
            (Side::Subtract, self.resolve_rewrite(req, subtract).await)
        }));

        let mut metadata = ResponseMetadata::default();
        let mut base_result: Option<DomainResult<ResolveCheckResponse>> = None;
        let mut subtract_result: Option<DomainResult<ResolveCheckResponse>> = None;
        while let Some((side, result)) = running.next().await {
            if let Ok(response) = &result {
                metadata.merge(&response.metadata);
            }
            match side {
                Side::Base => base_result = Some(result),
                Side::Subtract => subtract_result = Some(result),
            }
            // A denied base or a granting subtract decides the difference;
            // dropping `running` cancels the other branch.
            if matches!(&base_result, Some(Ok(response)) if !response.allowed)
                || matches!(&subtract_result, Some(Ok(response)) if response.allowed)
            {
                return Ok(ResolveCheckResponse { allowed: false, metadata });
            }
        }

        match (base_result, subtract_result) {
            (Some(Ok(base)), Some(Ok(subtract))) => Ok(ResolveCheckResponse {
                allowed: base.allowed && !subtract.allowed,
                metadata,
            }),
            (Some(Err(e)), _) | (_, Some(Err(e))) => Err(e),
            _ => Err(DomainError::ResolverError {
                message: "difference evaluation finished without both results".to_string(),
            }),
        }
    }

    /// Splits children into a concurrently running set, one breadth permit
    /// each, and a remainder to be evaluated sequentially.
    fn admit<'a>(
        &self,
        req: &ResolveCheckRequest,
        children: Vec<CheckFuture<'a>>,
    ) -> (FuturesUnordered<CheckFuture<'a>>, Vec<CheckFuture<'a>>) {
        let running = FuturesUnordered::new();
        let mut deferred = Vec::new();
        for child in children {
            match req.breadth_limiter.clone().try_acquire_owned() {
                Ok(permit) => running.push(Box::pin(async move {
                    let _permit = permit;
                    child.await
                }) as CheckFuture<'a>),
                Err(_) => deferred.push(child),
            }
        }
        (running, deferred)
    }

    /// An unconditioned tuple always holds; a conditioned one holds when its
    /// expression evaluates to true against the merged context. Evaluation
    /// failure is an error, not a denial.
    fn tuple_condition_holds(
        &self,
        req: &ResolveCheckRequest,
        tuple: &StoredTuple,
    ) -> DomainResult<bool> {
        let Some(name) = &tuple.condition_name else {
            return Ok(true);
        };
        let condition = req
            .type_system
            .find_condition(name)
            .ok_or_else(|| DomainError::ConditionNotFound { name: name.clone() })?;
        self.conditions
            .evaluate(condition, tuple.condition_context.as_ref(), &req.context)
    }
}

impl Default for LocalChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LocalChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalChecker").finish()
    }
}

#[async_trait]
impl CheckResolver for LocalChecker {
    async fn resolve_check(
        &self,
        request: ResolveCheckRequest,
    ) -> DomainResult<ResolveCheckResponse> {
        if request.metadata.depth == 0 {
            return Err(DomainError::ResolutionDepthExceeded);
        }

        let (object_type, _) =
            request
                .tuple_key
                .split_object()
                .map_err(|_| DomainError::InvalidObjectFormat {
                    value: request.tuple_key.object.clone(),
                })?;
        let rewrite = request
            .type_system
            .get_rewrite(object_type, &request.tuple_key.relation)?;

        self.resolve_rewrite(&request, &rewrite).await
    }
}
