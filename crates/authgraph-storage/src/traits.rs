//! Tuple reader facade and core tuple types.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::{HealthStatus, StorageError, StorageResult};

/// Maximum length for string fields.
const MAX_FIELD_LENGTH: usize = 255;

/// A relationship tuple key: `object`, `relation` and `user`.
///
/// `object` is always `"type:id"`. `user` is a terminal user (`"user:anne"`),
/// a userset (`"group:eng#member"`), or a type-scoped wildcard (`"user:*"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TupleKey {
    pub object: String,
    pub relation: String,
    pub user: String,
}

impl TupleKey {
    /// Creates a new tuple key.
    pub fn new(
        object: impl Into<String>,
        relation: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            object: object.into(),
            relation: relation.into(),
            user: user.into(),
        }
    }

    /// Splits the object into `(type, id)`.
    ///
    /// # Errors
    /// Returns `StorageError::InvalidInput` if the object is not `"type:id"`.
    pub fn split_object(&self) -> StorageResult<(&str, &str)> {
        split_object(&self.object)
    }
}

impl std::fmt::Display for TupleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}@{}", self.object, self.relation, self.user)
    }
}

/// Splits an object reference `"type:id"` into its parts.
///
/// # Errors
/// Returns `StorageError::InvalidInput` if either part is missing or empty.
pub fn split_object(object: &str) -> StorageResult<(&str, &str)> {
    match object.split_once(':') {
        Some((object_type, object_id)) if !object_type.is_empty() && !object_id.is_empty() => {
            Ok((object_type, object_id))
        }
        _ => Err(StorageError::InvalidInput {
            message: format!("object must be in 'type:id' format, got '{object}'"),
        }),
    }
}

/// Parse a user string into `(user_type, user_id, Option<user_relation>)`.
///
/// Accepts `"type:id"`, `"type:id#relation"` and `"type:*"`.
///
/// # Errors
/// Returns `StorageError::InvalidFilter` if the format is invalid.
pub fn parse_user(user: &str) -> StorageResult<(String, String, Option<String>)> {
    let invalid = || StorageError::InvalidFilter {
        message: format!("invalid user format: '{user}'. Expected 'type:id' or 'type:id#relation'"),
    };

    let (base, relation) = match user.split_once('#') {
        Some((base, relation)) if !relation.is_empty() => (base, Some(relation.to_string())),
        Some(_) => return Err(invalid()),
        None => (user, None),
    };

    match base.split_once(':') {
        Some((user_type, user_id)) if !user_type.is_empty() && !user_id.is_empty() => {
            Ok((user_type.to_string(), user_id.to_string(), relation))
        }
        _ => Err(invalid()),
    }
}

/// A stored relationship tuple.
///
/// Tuples can optionally carry a condition name and condition context.
/// A tuple without a condition is treated as unconditionally valid.
///
/// Note: `Hash` is implemented manually because
/// `HashMap<String, serde_json::Value>` does not implement `Hash`.
#[derive(Debug, Clone)]
pub struct StoredTuple {
    pub object_type: String,
    pub object_id: String,
    pub relation: String,
    pub user_type: String,
    pub user_id: String,
    /// Set when the user is a userset reference (`"group:eng#member"`).
    pub user_relation: Option<String>,
    /// Optional condition name that must be satisfied for this tuple.
    pub condition_name: Option<String>,
    /// Optional condition context (parameters) as JSON key-value pairs.
    pub condition_context: Option<HashMap<String, serde_json::Value>>,
}

impl StoredTuple {
    /// Creates a new tuple without a condition.
    pub fn new(
        object_type: impl Into<String>,
        object_id: impl Into<String>,
        relation: impl Into<String>,
        user_type: impl Into<String>,
        user_id: impl Into<String>,
        user_relation: Option<String>,
    ) -> Self {
        Self {
            object_type: object_type.into(),
            object_id: object_id.into(),
            relation: relation.into(),
            user_type: user_type.into(),
            user_id: user_id.into(),
            user_relation,
            condition_name: None,
            condition_context: None,
        }
    }

    /// Creates a new tuple with a condition.
    pub fn with_condition(mut self, condition_name: impl Into<String>) -> Self {
        self.condition_name = Some(condition_name.into());
        self
    }

    /// Attaches condition context parameters to the tuple.
    pub fn with_condition_context(
        mut self,
        context: HashMap<String, serde_json::Value>,
    ) -> Self {
        self.condition_context = Some(context);
        self
    }

    /// Parses a tuple from `"type:id"` / relation / user strings.
    ///
    /// # Errors
    /// Returns `StorageError::InvalidInput` or `InvalidFilter` when the object
    /// or user shape is malformed.
    pub fn parse(object: &str, relation: &str, user: &str) -> StorageResult<Self> {
        let (object_type, object_id) = split_object(object)?;
        if relation.is_empty() {
            return Err(StorageError::InvalidInput {
                message: "relation cannot be empty".to_string(),
            });
        }
        let (user_type, user_id, user_relation) = parse_user(user)?;
        Ok(Self::new(
            object_type,
            object_id,
            relation,
            user_type,
            user_id,
            user_relation,
        ))
    }

    /// Returns the object as `"type:id"`.
    pub fn object_string(&self) -> String {
        format!("{}:{}", self.object_type, self.object_id)
    }

    /// Returns the user as `"type:id"` or `"type:id#relation"`.
    pub fn user_string(&self) -> String {
        match &self.user_relation {
            Some(relation) => format!("{}:{}#{}", self.user_type, self.user_id, relation),
            None => format!("{}:{}", self.user_type, self.user_id),
        }
    }

    /// Returns the tuple key portion of this tuple.
    pub fn tuple_key(&self) -> TupleKey {
        TupleKey::new(self.object_string(), self.relation.clone(), self.user_string())
    }

    /// True when the user is a userset reference.
    pub fn is_userset(&self) -> bool {
        self.user_relation.is_some()
    }

    /// True when the user is a type-scoped wildcard (`"type:*"`).
    pub fn is_wildcard(&self) -> bool {
        self.user_relation.is_none() && self.user_id == "*"
    }

    fn key(&self) -> (&str, &str, &str, &str, &str, Option<&str>) {
        (
            &self.object_type,
            &self.object_id,
            &self.relation,
            &self.user_type,
            &self.user_id,
            self.user_relation.as_deref(),
        )
    }
}

impl PartialEq for StoredTuple {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
            && self.condition_name == other.condition_name
            && self.condition_context == other.condition_context
    }
}

impl Eq for StoredTuple {}

impl std::hash::Hash for StoredTuple {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key().hash(state);
        self.condition_name.hash(state);
        // Hash condition context as canonical JSON with sorted keys so that
        // logically equal contexts hash equally.
        match &self.condition_context {
            None => 0u8.hash(state),
            Some(ctx) => {
                1u8.hash(state);
                let sorted: std::collections::BTreeMap<_, _> = ctx.iter().collect();
                serde_json::to_string(&sorted)
                    .unwrap_or_default()
                    .hash(state);
            }
        }
    }
}

/// Validate a stored tuple structurally: required fields present, no field
/// over the length limit. Model-level validation happens in the typesystem.
///
/// # Errors
/// Returns `StorageError::InvalidInput` if any field is empty or too long.
pub fn validate_tuple(tuple: &StoredTuple) -> StorageResult<()> {
    let fields = [
        ("object_type", Some(tuple.object_type.as_str())),
        ("object_id", Some(tuple.object_id.as_str())),
        ("relation", Some(tuple.relation.as_str())),
        ("user_type", Some(tuple.user_type.as_str())),
        ("user_id", Some(tuple.user_id.as_str())),
        ("user_relation", tuple.user_relation.as_deref()),
        ("condition_name", tuple.condition_name.as_deref()),
    ];
    for (name, value) in fields {
        let Some(value) = value else { continue };
        if value.is_empty() {
            return Err(StorageError::InvalidInput {
                message: format!("{name} cannot be empty"),
            });
        }
        if value.len() > MAX_FIELD_LENGTH {
            return Err(StorageError::InvalidInput {
                message: format!("{name} exceeds maximum length of {MAX_FIELD_LENGTH} characters"),
            });
        }
    }
    Ok(())
}

/// Filter for range reads. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct TupleFilter {
    /// Filter by object type.
    pub object_type: Option<String>,
    /// Filter by object ID.
    pub object_id: Option<String>,
    /// Filter by relation.
    pub relation: Option<String>,
    /// Filter by user (`"type:id"` or `"type:id#relation"`).
    pub user: Option<String>,
}

impl TupleFilter {
    /// Filter on a full `(object, relation)` pair.
    pub fn for_object_relation(object_type: &str, object_id: &str, relation: &str) -> Self {
        Self {
            object_type: Some(object_type.to_string()),
            object_id: Some(object_id.to_string()),
            relation: Some(relation.to_string()),
            user: None,
        }
    }

    /// True when the tuple matches every set field.
    pub fn matches(&self, tuple: &StoredTuple) -> bool {
        if let Some(object_type) = &self.object_type {
            if tuple.object_type != *object_type {
                return false;
            }
        }
        if let Some(object_id) = &self.object_id {
            if tuple.object_id != *object_id {
                return false;
            }
        }
        if let Some(relation) = &self.relation {
            if tuple.relation != *relation {
                return false;
            }
        }
        if let Some(user) = &self.user {
            if tuple.user_string() != *user {
                return false;
            }
        }
        true
    }
}

/// Filter for userset tuple reads: tuples on `(object, relation)` whose user
/// is a userset, optionally restricted to an allowed set of userset shapes
/// (`"group#member"` style type references).
#[derive(Debug, Clone)]
pub struct UsersetFilter {
    pub object_type: String,
    pub object_id: String,
    pub relation: String,
    /// Allowed userset type references. Empty means any userset matches.
    pub allowed_userset_types: Vec<String>,
}

impl UsersetFilter {
    /// True when the tuple is a userset tuple matching this filter.
    pub fn matches(&self, tuple: &StoredTuple) -> bool {
        if !tuple.is_userset()
            || tuple.object_type != self.object_type
            || tuple.object_id != self.object_id
            || tuple.relation != self.relation
        {
            return false;
        }
        if self.allowed_userset_types.is_empty() {
            return true;
        }
        let type_ref = format!(
            "{}#{}",
            tuple.user_type,
            tuple.user_relation.as_deref().unwrap_or_default()
        );
        self.allowed_userset_types.iter().any(|t| *t == type_ref)
    }
}

/// Filter for reverse reads: tuples whose user is one of `users`, restricted
/// to an object type and relation.
#[derive(Debug, Clone)]
pub struct StartingWithUserFilter {
    pub object_type: String,
    pub relation: String,
    /// User strings to match (`"type:id"` or `"type:id#relation"`).
    pub users: Vec<String>,
}

impl StartingWithUserFilter {
    /// True when the tuple matches this filter.
    pub fn matches(&self, tuple: &StoredTuple) -> bool {
        tuple.object_type == self.object_type
            && tuple.relation == self.relation
            && self.users.iter().any(|u| tuple.user_string() == *u)
    }
}

/// Read-side facade over relationship tuples, consumed by the check engine.
///
/// Implementations must honor task cancellation: all methods are async and
/// are dropped when the caller's deadline expires.
#[async_trait]
pub trait RelationshipTupleReader: Send + Sync {
    /// Exact-match single tuple lookup.
    async fn read_user_tuple(
        &self,
        store_id: &str,
        key: &TupleKey,
    ) -> StorageResult<Option<StoredTuple>>;

    /// Range read over tuples matching the filter.
    async fn read(&self, store_id: &str, filter: &TupleFilter) -> StorageResult<Vec<StoredTuple>>;

    /// Reads tuples on `(object, relation)` whose user is a userset.
    async fn read_userset_tuples(
        &self,
        store_id: &str,
        filter: &UsersetFilter,
    ) -> StorageResult<Vec<StoredTuple>>;

    /// Reverse read by user(s), filtered by object type and relation.
    ///
    /// Present on the facade for reverse-expansion queries; the check path
    /// does not use it.
    async fn read_starting_with_user(
        &self,
        store_id: &str,
        filter: &StartingWithUserFilter,
    ) -> StorageResult<Vec<StoredTuple>>;

    /// Readiness probe.
    async fn is_ready(&self) -> StorageResult<HealthStatus>;
}
