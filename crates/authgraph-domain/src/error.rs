//! Domain error types for check resolution.

use thiserror::Error;

use authgraph_storage::StorageError;

/// Domain-specific errors for check resolution.
#[derive(Debug, Error)]
pub enum DomainError {
    /// Invalid user format.
    #[error("invalid user format: {value}")]
    InvalidUserFormat { value: String },

    /// Invalid object format.
    #[error("invalid object format: {value}")]
    InvalidObjectFormat { value: String },

    /// Invalid relation format.
    #[error("invalid relation format: {value}")]
    InvalidRelationFormat { value: String },

    /// Invalid tuple supplied with the request.
    #[error("invalid tuple: {message}")]
    InvalidTuple { message: String },

    /// Type not found in the authorization model.
    #[error("type not found: {type_name}")]
    TypeNotFound { type_name: String },

    /// Relation not found on a type.
    #[error("relation '{relation}' not found on type '{type_name}'")]
    RelationNotFound { type_name: String, relation: String },

    /// Authorization model not found.
    #[error("authorization model not found: {model_id}")]
    ModelNotFound { model_id: String },

    /// No authorization model exists for the store.
    #[error("no authorization model found for store: {store_id}")]
    LatestModelNotFound { store_id: String },

    /// The stored authorization model is malformed.
    #[error("invalid authorization model: {message}")]
    InvalidModel { message: String },

    /// Recursion budget exhausted during resolution.
    #[error("resolution depth exceeded")]
    ResolutionDepthExceeded,

    /// Caller-facing mapping of `ResolutionDepthExceeded`.
    #[error("the authorization model is too complex to resolve")]
    ModelTooComplex,

    /// Condition referenced by a tuple is not defined in the model.
    #[error("condition '{name}' is not defined in the authorization model")]
    ConditionNotFound { name: String },

    /// A tuple condition failed to evaluate (missing parameter, type error).
    #[error("condition '{name}' evaluation failed: {reason}")]
    ConditionEvaluationFailed { name: String, reason: String },

    /// The request was cancelled.
    #[error("request cancelled")]
    Cancelled,

    /// The request deadline expired.
    #[error("deadline exceeded after {timeout_ms}ms")]
    DeadlineExceeded { timeout_ms: u64 },

    /// The resolver chain is misconfigured or shut down.
    #[error("resolver error: {message}")]
    ResolverError { message: String },

    /// Underlying datastore failure.
    #[error(transparent)]
    Datastore(#[from] StorageError),
}

impl DomainError {
    /// True for errors caused by the caller's input rather than the system.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            DomainError::InvalidUserFormat { .. }
                | DomainError::InvalidObjectFormat { .. }
                | DomainError::InvalidRelationFormat { .. }
                | DomainError::InvalidTuple { .. }
                | DomainError::TypeNotFound { .. }
                | DomainError::RelationNotFound { .. }
                | DomainError::ConditionNotFound { .. }
                | DomainError::ConditionEvaluationFailed { .. }
        )
    }
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
