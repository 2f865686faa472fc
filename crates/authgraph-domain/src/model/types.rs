//! Core type definitions for the authorization model.

use serde::{Deserialize, Serialize};

/// A userset rewrite defines how a relation is computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RewriteUserset {
    /// Direct tuples on this relation.
    This,
    /// Another relation on the same object.
    ComputedUserset { relation: String },
    /// A relation resolved through the objects of a tupleset relation
    /// (e.g. `viewer from parent`).
    TupleToUserset {
        tupleset: String,
        computed_relation: String,
    },
    /// Union of usersets: any child grants access.
    Union { children: Vec<RewriteUserset> },
    /// Intersection of usersets: all children must grant access.
    Intersection { children: Vec<RewriteUserset> },
    /// Difference: `base` grants access unless `subtract` does.
    Difference {
        base: Box<RewriteUserset>,
        subtract: Box<RewriteUserset>,
    },
}

/// An allowed user-type for a relation's direct tuples.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeRestriction {
    /// A terminal user of the given type (`"user"`).
    Direct { user_type: String },
    /// A userset reference (`"group#member"`).
    Userset { user_type: String, relation: String },
    /// A type-scoped wildcard (`"user:*"`).
    Wildcard { user_type: String },
}

impl TypeRestriction {
    /// Terminal user restriction.
    pub fn direct(user_type: impl Into<String>) -> Self {
        Self::Direct {
            user_type: user_type.into(),
        }
    }

    /// Userset restriction.
    pub fn userset(user_type: impl Into<String>, relation: impl Into<String>) -> Self {
        Self::Userset {
            user_type: user_type.into(),
            relation: relation.into(),
        }
    }

    /// Wildcard restriction.
    pub fn wildcard(user_type: impl Into<String>) -> Self {
        Self::Wildcard {
            user_type: user_type.into(),
        }
    }

    /// Renders the restriction in model syntax
    /// (`"user"`, `"group#member"`, `"user:*"`).
    pub fn type_reference(&self) -> String {
        match self {
            Self::Direct { user_type } => user_type.clone(),
            Self::Userset {
                user_type,
                relation,
            } => format!("{user_type}#{relation}"),
            Self::Wildcard { user_type } => format!("{user_type}:*"),
        }
    }
}

/// A relation definition on a type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationDefinition {
    /// The relation name.
    pub name: String,
    /// The userset rewrite for this relation.
    pub rewrite: RewriteUserset,
    /// Allowed user-types for direct tuples on this relation.
    pub type_restrictions: Vec<TypeRestriction>,
}

impl RelationDefinition {
    /// Creates a relation definition.
    pub fn new(
        name: impl Into<String>,
        rewrite: RewriteUserset,
        type_restrictions: Vec<TypeRestriction>,
    ) -> Self {
        Self {
            name: name.into(),
            rewrite,
            type_restrictions,
        }
    }
}

/// A type definition within the authorization model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeDefinition {
    /// The type name (e.g., "document", "folder").
    pub type_name: String,
    /// Relations defined on this type.
    pub relations: Vec<RelationDefinition>,
}

impl TypeDefinition {
    /// Creates a type definition.
    pub fn new(type_name: impl Into<String>, relations: Vec<RelationDefinition>) -> Self {
        Self {
            type_name: type_name.into(),
            relations,
        }
    }
}

/// A named condition expression attached to tuples.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionDefinition {
    /// The condition name referenced by tuples.
    pub name: String,
    /// The boolean expression evaluated against the merged context.
    pub expression: String,
}

impl ConditionDefinition {
    /// Creates a condition definition.
    pub fn new(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expression: expression.into(),
        }
    }
}

/// An authorization model defining types and their relations.
///
/// Models are identified by a ULID, sortable by creation time. The model
/// store tracks which model is the latest for a store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationModel {
    /// Model identifier (ULID).
    pub id: String,
    /// Schema version (e.g., "1.1").
    pub schema_version: String,
    /// Type definitions in the model.
    pub type_definitions: Vec<TypeDefinition>,
    /// Conditions referenced by tuples.
    pub conditions: Vec<ConditionDefinition>,
}

impl AuthorizationModel {
    /// Creates a model with a freshly generated ULID.
    pub fn new(type_definitions: Vec<TypeDefinition>) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            schema_version: "1.1".to_string(),
            type_definitions,
            conditions: Vec::new(),
        }
    }

    /// Attaches condition definitions to the model.
    pub fn with_conditions(mut self, conditions: Vec<ConditionDefinition>) -> Self {
        self.conditions = conditions;
        self
    }

    /// Finds a condition definition by name.
    pub fn find_condition(&self, name: &str) -> Option<&ConditionDefinition> {
        self.conditions.iter().find(|c| c.name == name)
    }
}
