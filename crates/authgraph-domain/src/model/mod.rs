//! Authorization model types and typesystem lookups.

mod resolver;
mod type_system;
mod types;

pub use resolver::{InMemoryModelStore, MemoizedModelResolver, ModelResolver};
pub use type_system::TypeSystem;
pub use types::{
    AuthorizationModel, ConditionDefinition, RelationDefinition, RewriteUserset, TypeDefinition,
    TypeRestriction,
};
