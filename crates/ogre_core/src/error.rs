//! Error types for OGRE core.

use crate::entity::EntityKey;
use crate::schema::TypeCode;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in schema construction, wiring and merging.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CoreError {
    /// A reference property names an entity type that does not exist.
    #[error("schema error in {entity_type}.{property}: unknown target type '{target}'")]
    UnresolvedReference {
        /// Entity type declaring the property.
        entity_type: String,
        /// Property name.
        property: String,
        /// Target type name that could not be resolved.
        target: String,
    },

    /// The schema is structurally invalid (duplicate names, empty ids, ...).
    #[error("schema error: {message}")]
    InvalidSchema {
        /// Description of the problem.
        message: String,
    },

    /// No entity type with the given name.
    #[error("entity type not found: {name}")]
    EntityTypeNotFound {
        /// Name that was looked up.
        name: String,
    },

    /// No entity type with the given index.
    #[error("entity type index {index} out of range (domain has {count} types)")]
    EntityTypeIndexOutOfRange {
        /// Index that was looked up.
        index: usize,
        /// Number of entity types in the domain.
        count: usize,
    },

    /// Entity id outside of 1 ..= 2^52.
    #[error("invalid entity id {0}: must be within 1..=2^52")]
    InvalidEntityId(u64),

    /// An entity with the same `(type, id)` is already present.
    #[error("duplicate entity {0}")]
    DuplicateEntity(EntityKey),

    /// Entity not present in the store.
    #[error("entity not found: {0}")]
    EntityNotFound(EntityKey),

    /// A reference slot points to an entity that exists neither in the store
    /// nor in the batch being wired.
    #[error("dangling reference {source_entity}.{property} -> {target}")]
    DanglingReference {
        /// Entity holding the reference.
        source_entity: EntityKey,
        /// Name of the reference property.
        property: String,
        /// Missing target.
        target: EntityKey,
    },

    /// Two entities of different types were compared.
    #[error("type mismatch: cannot diff type {left} against type {right}")]
    TypeMismatch {
        /// Type index of the first entity.
        left: usize,
        /// Type index of the second entity.
        right: usize,
    },

    /// A value does not match its property's declared type.
    #[error("value type mismatch for {entity}.{property}: expected {expected:?}, got {actual}")]
    ValueTypeMismatch {
        /// Entity being validated.
        entity: EntityKey,
        /// Property name.
        property: String,
        /// Declared property type.
        expected: TypeCode,
        /// Description of the offending value.
        actual: String,
    },

    /// An entity value has the wrong number of slots for its type.
    #[error("entity {entity} has {actual} values, type declares {expected} properties")]
    ArityMismatch {
        /// Entity being validated.
        entity: EntityKey,
        /// Number of properties of the type.
        expected: usize,
        /// Number of values supplied.
        actual: usize,
    },
}

impl CoreError {
    /// Creates an invalid schema error.
    pub fn invalid_schema(message: impl Into<String>) -> Self {
        Self::InvalidSchema {
            message: message.into(),
        }
    }

    /// Returns true for errors raised while building a schema.
    pub fn is_schema_error(&self) -> bool {
        matches!(
            self,
            CoreError::UnresolvedReference { .. } | CoreError::InvalidSchema { .. }
        )
    }

    /// Returns true for lookup failures.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CoreError::EntityTypeNotFound { .. }
                | CoreError::EntityTypeIndexOutOfRange { .. }
                | CoreError::EntityNotFound(_)
        )
    }

    pub(crate) fn dangling(source_entity: EntityKey, property: &str, target: EntityKey) -> Self {
        Self::DanglingReference {
            source_entity,
            property: property.to_string(),
            target,
        }
    }

    pub(crate) fn value_type(
        entity: EntityKey,
        property: &str,
        expected: TypeCode,
        actual: impl Into<String>,
    ) -> Self {
        Self::ValueTypeMismatch {
            entity,
            property: property.to_string(),
            expected,
            actual: actual.into(),
        }
    }
}
