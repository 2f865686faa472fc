//! Type system for authorization model lookups with caching.
//!
//! The `TypeSystem` provides lookups for rewrites and type restrictions with
//! internal caching using `DashMap` for thread-safe concurrent access.

use std::sync::Arc;

use dashmap::DashMap;

use authgraph_storage::{parse_user, split_object, StoredTuple, TupleKey};

use crate::error::{DomainError, DomainResult};

use super::types::{
    AuthorizationModel, ConditionDefinition, RelationDefinition, RewriteUserset, TypeDefinition,
    TypeRestriction,
};

/// Cached view over an authorization model, answering the lookups the check
/// resolvers need: rewrites, type restrictions and condition definitions.
///
/// Thread-safe; shared across the sub-checks of a request via `Arc`.
#[derive(Debug)]
pub struct TypeSystem {
    model: Arc<AuthorizationModel>,
    /// Cache for type definitions, keyed by type name.
    type_cache: DashMap<String, Arc<TypeDefinition>>,
    /// Cache for relation definitions, keyed by "type_name#relation".
    relation_cache: DashMap<String, Arc<RelationDefinition>>,
}

impl TypeSystem {
    /// Creates a new `TypeSystem` from an authorization model.
    ///
    /// Lookups are cached lazily as they are accessed.
    pub fn new(model: AuthorizationModel) -> Self {
        Self {
            model: Arc::new(model),
            type_cache: DashMap::new(),
            relation_cache: DashMap::new(),
        }
    }

    /// Returns the id of the underlying authorization model.
    pub fn authorization_model_id(&self) -> &str {
        &self.model.id
    }

    /// Returns a reference to the underlying authorization model.
    pub fn model(&self) -> &AuthorizationModel {
        &self.model
    }

    /// Gets a type definition by name.
    ///
    /// # Errors
    /// Returns `DomainError::TypeNotFound` if the type does not exist.
    pub fn get_type(&self, type_name: &str) -> DomainResult<Arc<TypeDefinition>> {
        if let Some(cached) = self.type_cache.get(type_name) {
            return Ok(Arc::clone(cached.value()));
        }

        let type_def = self
            .model
            .type_definitions
            .iter()
            .find(|td| td.type_name == type_name)
            .ok_or_else(|| DomainError::TypeNotFound {
                type_name: type_name.to_string(),
            })?;

        let type_def = Arc::new(type_def.clone());
        self.type_cache
            .insert(type_name.to_string(), Arc::clone(&type_def));
        Ok(type_def)
    }

    /// Gets a relation definition for a specific type.
    ///
    /// # Errors
    /// Returns `DomainError::TypeNotFound` or `DomainError::RelationNotFound`.
    pub fn get_relation(
        &self,
        type_name: &str,
        relation: &str,
    ) -> DomainResult<Arc<RelationDefinition>> {
        let cache_key = format!("{type_name}#{relation}");
        if let Some(cached) = self.relation_cache.get(&cache_key) {
            return Ok(Arc::clone(cached.value()));
        }

        let type_def = self.get_type(type_name)?;
        let relation_def = type_def
            .relations
            .iter()
            .find(|r| r.name == relation)
            .ok_or_else(|| DomainError::RelationNotFound {
                type_name: type_name.to_string(),
                relation: relation.to_string(),
            })?;

        let relation_def = Arc::new(relation_def.clone());
        self.relation_cache
            .insert(cache_key, Arc::clone(&relation_def));
        Ok(relation_def)
    }

    /// Gets the rewrite expression for `(type, relation)`.
    pub fn get_rewrite(&self, type_name: &str, relation: &str) -> DomainResult<RewriteUserset> {
        Ok(self.get_relation(type_name, relation)?.rewrite.clone())
    }

    /// Gets the allowed user-types for direct tuples on `(type, relation)`.
    pub fn type_restrictions_for(
        &self,
        type_name: &str,
        relation: &str,
    ) -> DomainResult<Vec<TypeRestriction>> {
        Ok(self.get_relation(type_name, relation)?.type_restrictions.clone())
    }

    /// True when `(type, relation)` permits the type-scoped wildcard
    /// `"<user_type>:*"` in its direct tuples.
    pub fn allows_wildcard(
        &self,
        type_name: &str,
        relation: &str,
        user_type: &str,
    ) -> DomainResult<bool> {
        let relation_def = self.get_relation(type_name, relation)?;
        Ok(relation_def.type_restrictions.iter().any(|r| {
            matches!(r, TypeRestriction::Wildcard { user_type: t } if t == user_type)
        }))
    }

    /// Userset type references (`"group#member"` style) permitted on
    /// `(type, relation)`, used to scope userset reads.
    pub fn userset_restrictions_for(
        &self,
        type_name: &str,
        relation: &str,
    ) -> DomainResult<Vec<String>> {
        let relation_def = self.get_relation(type_name, relation)?;
        Ok(relation_def
            .type_restrictions
            .iter()
            .filter(|r| matches!(r, TypeRestriction::Userset { .. }))
            .map(TypeRestriction::type_reference)
            .collect())
    }

    /// Checks if a relation exists on a type.
    pub fn has_relation(&self, type_name: &str, relation: &str) -> bool {
        self.get_relation(type_name, relation).is_ok()
    }

    /// Finds a condition definition by name.
    pub fn find_condition(&self, name: &str) -> Option<&ConditionDefinition> {
        self.model.find_condition(name)
    }

    /// Validates the tuple key of a check request.
    ///
    /// Checks shape, that the object type and relation exist, and that the
    /// user is not a wildcard (a caller cannot check on behalf of `type:*`).
    pub fn validate_check_tuple_key(&self, key: &TupleKey) -> DomainResult<()> {
        let (object_type, _) =
            split_object(&key.object).map_err(|_| DomainError::InvalidObjectFormat {
                value: key.object.clone(),
            })?;
        if key.relation.is_empty() {
            return Err(DomainError::InvalidRelationFormat {
                value: key.relation.clone(),
            });
        }
        let (user_type, user_id, user_relation) =
            parse_user(&key.user).map_err(|_| DomainError::InvalidUserFormat {
                value: key.user.clone(),
            })?;
        if user_id == "*" {
            return Err(DomainError::InvalidUserFormat {
                value: key.user.clone(),
            });
        }

        self.get_relation(object_type, &key.relation)?;
        self.get_type(&user_type)?;
        if let Some(user_relation) = user_relation {
            self.get_relation(&user_type, &user_relation)?;
        }
        Ok(())
    }

    /// Validates a contextual tuple against the model: shape, known object
    /// type and relation, known user type, and a user-type permitted by the
    /// relation's restrictions.
    pub fn validate_contextual_tuple(&self, tuple: &StoredTuple) -> DomainResult<()> {
        let relation_def = self.get_relation(&tuple.object_type, &tuple.relation)?;
        if !tuple.is_wildcard() {
            self.get_type(&tuple.user_type)?;
        }
        if let Some(user_relation) = &tuple.user_relation {
            self.get_relation(&tuple.user_type, user_relation)?;
        }

        let permitted = relation_def.type_restrictions.iter().any(|r| match r {
            TypeRestriction::Direct { user_type } => {
                tuple.user_relation.is_none() && !tuple.is_wildcard() && tuple.user_type == *user_type
            }
            TypeRestriction::Userset {
                user_type,
                relation,
            } => tuple.user_type == *user_type && tuple.user_relation.as_deref() == Some(relation),
            TypeRestriction::Wildcard { user_type } => {
                tuple.is_wildcard() && tuple.user_type == *user_type
            }
        });
        if !permitted {
            return Err(DomainError::InvalidTuple {
                message: format!(
                    "user '{}' is not permitted on relation '{}' of type '{}'",
                    tuple.user_string(),
                    tuple.relation,
                    tuple.object_type
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document_model() -> AuthorizationModel {
        AuthorizationModel::new(vec![
            TypeDefinition::new("user", vec![]),
            TypeDefinition::new(
                "group",
                vec![RelationDefinition::new(
                    "member",
                    RewriteUserset::This,
                    vec![TypeRestriction::direct("user")],
                )],
            ),
            TypeDefinition::new(
                "document",
                vec![RelationDefinition::new(
                    "viewer",
                    RewriteUserset::This,
                    vec![
                        TypeRestriction::direct("user"),
                        TypeRestriction::userset("group", "member"),
                        TypeRestriction::wildcard("user"),
                    ],
                )],
            ),
        ])
    }

    #[test]
    fn test_get_rewrite_and_restrictions() {
        let ts = TypeSystem::new(document_model());
        assert_eq!(
            ts.get_rewrite("document", "viewer").unwrap(),
            RewriteUserset::This
        );
        assert_eq!(
            ts.userset_restrictions_for("document", "viewer").unwrap(),
            vec!["group#member".to_string()]
        );
        assert!(ts.allows_wildcard("document", "viewer", "user").unwrap());
        assert!(!ts.allows_wildcard("group", "member", "user").unwrap());
    }

    #[test]
    fn test_unknown_type_and_relation() {
        let ts = TypeSystem::new(document_model());
        assert!(matches!(
            ts.get_rewrite("folder", "viewer"),
            Err(DomainError::TypeNotFound { .. })
        ));
        assert!(matches!(
            ts.get_rewrite("document", "owner"),
            Err(DomainError::RelationNotFound { .. })
        ));
    }

    #[test]
    fn test_validate_check_tuple_key() {
        let ts = TypeSystem::new(document_model());

        let ok = TupleKey::new("document:1", "viewer", "user:anne");
        assert!(ts.validate_check_tuple_key(&ok).is_ok());

        let wildcard_user = TupleKey::new("document:1", "viewer", "user:*");
        assert!(ts.validate_check_tuple_key(&wildcard_user).is_err());

        let bad_object = TupleKey::new("document", "viewer", "user:anne");
        assert!(matches!(
            ts.validate_check_tuple_key(&bad_object),
            Err(DomainError::InvalidObjectFormat { .. })
        ));

        let unknown_relation = TupleKey::new("document:1", "owner", "user:anne");
        assert!(ts.validate_check_tuple_key(&unknown_relation).is_err());
    }

    #[test]
    fn test_validate_contextual_tuple_enforces_restrictions() {
        let ts = TypeSystem::new(document_model());

        let ok = StoredTuple::parse("document:1", "viewer", "user:anne").unwrap();
        assert!(ts.validate_contextual_tuple(&ok).is_ok());

        let userset = StoredTuple::parse("document:1", "viewer", "group:eng#member").unwrap();
        assert!(ts.validate_contextual_tuple(&userset).is_ok());

        let wildcard = StoredTuple::parse("document:1", "viewer", "user:*").unwrap();
        assert!(ts.validate_contextual_tuple(&wildcard).is_ok());

        // group members may only be users, so a group wildcard is rejected.
        let bad = StoredTuple::parse("group:eng", "member", "group:*").unwrap();
        assert!(ts.validate_contextual_tuple(&bad).is_err());
    }
}
