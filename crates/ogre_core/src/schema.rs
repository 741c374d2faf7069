//! Schema model: type domains, entity types and properties.
//!
//! A [`TypeDomain`] is built from a [`TypeDomainDef`] in two passes. The
//! first pass assembles every [`EntityType`] with its properties, recording
//! only the *name* of each reference target. The second pass resolves those
//! names against the fully assembled type list, which is what allows entity
//! types to reference each other cyclically or themselves.
//!
//! Entity type and property indices are positions in their owning lists.
//! They are fixed for the lifetime of the domain and are what travels on the
//! wire; names are for diagnostics.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Declared type of a property slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeCode {
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// 32-bit float.
    Float32,
    /// 64-bit float.
    Float64,
    /// UTF-8 string.
    String,
    /// Byte sequence.
    Bytes,
    /// Reference to another entity.
    Reference,
}

impl fmt::Display for TypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Unresolved definition of a property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDef {
    /// Property name.
    pub name: String,
    /// Declared type.
    pub type_code: TypeCode,
    /// Whether the slot may hold `Null`.
    pub nullable: bool,
    /// Target entity type name, for reference properties.
    pub target: Option<String>,
}

impl PropertyDef {
    /// Creates a non-nullable scalar property.
    pub fn new(name: impl Into<String>, type_code: TypeCode) -> Self {
        Self {
            name: name.into(),
            type_code,
            nullable: false,
            target: None,
        }
    }

    /// Creates a reference property targeting the named entity type.
    pub fn reference(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_code: TypeCode::Reference,
            nullable: true,
            target: Some(target.into()),
        }
    }

    /// Sets nullability.
    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }
}

/// Unresolved definition of an entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityTypeDef {
    /// Entity type name.
    pub name: String,
    /// Properties in index order.
    pub properties: Vec<PropertyDef>,
}

impl EntityTypeDef {
    /// Creates an entity type definition with no properties.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: Vec::new(),
        }
    }

    /// Appends a property.
    pub fn with_property(mut self, property: PropertyDef) -> Self {
        self.properties.push(property);
        self
    }
}

/// Unresolved definition of a whole type domain. This is also the form a
/// domain takes on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDomainDef {
    /// Domain id.
    pub id: String,
    /// Entity types in index order.
    pub entity_types: Vec<EntityTypeDef>,
}

impl TypeDomainDef {
    /// Creates an empty domain definition.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            entity_types: Vec::new(),
        }
    }

    /// Appends an entity type.
    pub fn with_entity_type(mut self, entity_type: EntityTypeDef) -> Self {
        self.entity_types.push(entity_type);
        self
    }

    /// Builds and resolves the domain.
    pub fn build(self) -> CoreResult<TypeDomain> {
        TypeDomain::new(self)
    }
}

/// Resolved target of a reference property.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PropertyTarget {
    name: String,
    index: usize,
}

/// A typed slot of an entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    index: usize,
    name: String,
    type_code: TypeCode,
    nullable: bool,
    target: Option<PropertyTarget>,
}

impl Property {
    /// Position within the owning entity type.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Property name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared type.
    pub fn type_code(&self) -> TypeCode {
        self.type_code
    }

    /// Whether the declared type allows `Null`.
    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    /// Whether this is a reference property.
    pub fn is_reference(&self) -> bool {
        self.type_code == TypeCode::Reference
    }

    /// Index of the referenced entity type.
    pub fn target_index(&self) -> Option<usize> {
        self.target.as_ref().map(|t| t.index)
    }

    /// Name of the referenced entity type.
    pub fn target_name(&self) -> Option<&str> {
        self.target.as_ref().map(|t| t.name.as_str())
    }
}

/// A `(type, property)` pair naming a reference property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PropertyRef {
    /// Index of the entity type declaring the property.
    pub type_index: usize,
    /// Index of the property within that type.
    pub property_index: usize,
}

/// Schema description of one kind of replicated object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityType {
    index: usize,
    name: String,
    domain_id: String,
    properties: Vec<Property>,
    referrers: Vec<PropertyRef>,
}

impl EntityType {
    /// Position within the owning domain.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Entity type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Id of the owning domain.
    pub fn domain_id(&self) -> &str {
        &self.domain_id
    }

    /// Properties in index order.
    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    /// Property by index.
    pub fn property(&self, index: usize) -> Option<&Property> {
        self.properties.get(index)
    }

    /// Property by name.
    pub fn property_by_name(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Number of properties.
    pub fn property_count(&self) -> usize {
        self.properties.len()
    }

    /// Reference properties, across the whole domain, that target this type.
    pub fn referrers(&self) -> &[PropertyRef] {
        &self.referrers
    }
}

/// An immutable, named collection of entity types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TypeDomainDef", into = "TypeDomainDef")]
pub struct TypeDomain {
    id: String,
    entity_types: Vec<EntityType>,
}

impl TypeDomain {
    /// Builds a domain from its definition.
    ///
    /// # Errors
    ///
    /// Returns `UnresolvedReference` if a reference property names an
    /// unknown entity type, or `InvalidSchema` for structural problems.
    pub fn new(def: TypeDomainDef) -> CoreResult<Self> {
        if def.id.is_empty() {
            return Err(CoreError::invalid_schema("type domain id must not be empty"));
        }

        // Pass 1: assemble types, references carry only the target name.
        let mut seen_types = HashSet::new();
        let mut entity_types = Vec::with_capacity(def.entity_types.len());
        for (index, type_def) in def.entity_types.into_iter().enumerate() {
            if !seen_types.insert(type_def.name.clone()) {
                return Err(CoreError::invalid_schema(format!(
                    "duplicate entity type '{}'",
                    type_def.name
                )));
            }
            entity_types.push(assemble_type(index, &def.id, type_def)?);
        }

        // Pass 2: resolve targets against the complete type list.
        let by_name: HashMap<String, usize> = entity_types
            .iter()
            .map(|t| (t.name.clone(), t.index))
            .collect();
        let mut referrers: Vec<Vec<PropertyRef>> = vec![Vec::new(); entity_types.len()];
        for entity_type in &mut entity_types {
            for property in &mut entity_type.properties {
                let Some(target) = property.target.as_mut() else {
                    continue;
                };
                let index = *by_name.get(&target.name).ok_or_else(|| {
                    CoreError::UnresolvedReference {
                        entity_type: entity_type.name.clone(),
                        property: property.name.clone(),
                        target: target.name.clone(),
                    }
                })?;
                target.index = index;
                referrers[index].push(PropertyRef {
                    type_index: entity_type.index,
                    property_index: property.index,
                });
            }
        }
        for (entity_type, refs) in entity_types.iter_mut().zip(referrers) {
            entity_type.referrers = refs;
        }

        Ok(Self {
            id: def.id,
            entity_types,
        })
    }

    /// Domain id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Entity types in index order.
    pub fn entity_types(&self) -> &[EntityType] {
        &self.entity_types
    }

    /// Entity type by index.
    pub fn entity_type(&self, index: usize) -> CoreResult<&EntityType> {
        self.entity_types
            .get(index)
            .ok_or(CoreError::EntityTypeIndexOutOfRange {
                index,
                count: self.entity_types.len(),
            })
    }

    /// Entity type by name.
    pub fn entity_type_by_name(&self, name: &str) -> CoreResult<&EntityType> {
        self.entity_types
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| CoreError::EntityTypeNotFound {
                name: name.to_string(),
            })
    }

    /// Converts back into the unresolved definition form.
    pub fn to_def(&self) -> TypeDomainDef {
        TypeDomainDef {
            id: self.id.clone(),
            entity_types: self
                .entity_types
                .iter()
                .map(|t| EntityTypeDef {
                    name: t.name.clone(),
                    properties: t
                        .properties
                        .iter()
                        .map(|p| PropertyDef {
                            name: p.name.clone(),
                            type_code: p.type_code,
                            nullable: p.nullable,
                            target: p.target.as_ref().map(|t| t.name.clone()),
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

fn assemble_type(index: usize, domain_id: &str, def: EntityTypeDef) -> CoreResult<EntityType> {
    let mut seen = HashSet::new();
    let mut properties = Vec::with_capacity(def.properties.len());
    for (prop_index, prop) in def.properties.into_iter().enumerate() {
        if !seen.insert(prop.name.clone()) {
            return Err(CoreError::invalid_schema(format!(
                "duplicate property '{}' in entity type '{}'",
                prop.name, def.name
            )));
        }
        let target = match (prop.type_code, prop.target) {
            (TypeCode::Reference, Some(name)) => Some(PropertyTarget { name, index: 0 }),
            (TypeCode::Reference, None) => {
                return Err(CoreError::invalid_schema(format!(
                    "reference property {}.{} has no target type",
                    def.name, prop.name
                )))
            }
            (_, Some(_)) => {
                return Err(CoreError::invalid_schema(format!(
                    "scalar property {}.{} declares a reference target",
                    def.name, prop.name
                )))
            }
            (_, None) => None,
        };
        properties.push(Property {
            index: prop_index,
            name: prop.name,
            type_code: prop.type_code,
            nullable: prop.nullable,
            target,
        });
    }
    Ok(EntityType {
        index,
        name: def.name,
        domain_id: domain_id.to_string(),
        properties,
        referrers: Vec::new(),
    })
}

impl TryFrom<TypeDomainDef> for TypeDomain {
    type Error = CoreError;

    fn try_from(def: TypeDomainDef) -> CoreResult<Self> {
        TypeDomain::new(def)
    }
}

impl From<TypeDomain> for TypeDomainDef {
    fn from(domain: TypeDomain) -> Self {
        domain.to_def()
    }
}
