//! Versioned field layouts for tags and edges, and the lookup service that
//! resolves them.
//!
//! The core only ever borrows descriptors through [`SchemaProvider`]. The
//! in-memory provider is built once and never mutated afterwards, so it can be
//! shared across partition tasks without locking.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::keys::{EdgeType, SpaceId, TagType};
use crate::value::ValueType;

pub type SchemaVersion = u64;

/// Entity whose schema is being resolved. Edge types are always looked up by
/// their absolute value so incoming edges share the outgoing schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityRef {
    Tag(TagType),
    Edge(EdgeType),
}

impl EntityRef {
    fn normalized(self) -> Self {
        match self {
            Self::Tag(tag) => Self::Tag(tag),
            Self::Edge(edge) => Self::Edge(edge.wrapping_abs()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
        }
    }
}

/// Ordered field layout of one revision of a tag or edge type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    pub version: SchemaVersion,
    pub fields: Vec<FieldDef>,
}

impl SchemaDescriptor {
    pub fn new(version: SchemaVersion, fields: Vec<FieldDef>) -> Self {
        Self { version, fields }
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn field(&self, index: usize) -> Option<&FieldDef> {
        self.fields.get(index)
    }

    /// Index of the first field with `name`.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

/// Read-only schema lookup consumed by the query path.
///
/// Implementations must be safe for concurrent lookups from many partition
/// tasks. `version = None` resolves the latest published version.
pub trait SchemaProvider: Send + Sync {
    fn resolve(
        &self,
        space_id: SpaceId,
        entity: EntityRef,
        version: Option<SchemaVersion>,
    ) -> Option<Arc<SchemaDescriptor>>;

    fn tag_schema(
        &self,
        space_id: SpaceId,
        tag_type: TagType,
        version: Option<SchemaVersion>,
    ) -> Option<Arc<SchemaDescriptor>> {
        self.resolve(space_id, EntityRef::Tag(tag_type), version)
    }

    fn edge_schema(
        &self,
        space_id: SpaceId,
        edge_type: EdgeType,
        version: Option<SchemaVersion>,
    ) -> Option<Arc<SchemaDescriptor>> {
        self.resolve(space_id, EntityRef::Edge(edge_type), version)
    }
}

type SchemaKey = (SpaceId, EntityRef, SchemaVersion);

/// Immutable schema map keyed by `(space, entity, version)`.
#[derive(Debug, Default)]
pub struct MemorySchemaProvider {
    schemas: BTreeMap<SchemaKey, Arc<SchemaDescriptor>>,
}

impl MemorySchemaProvider {
    pub fn builder() -> MemorySchemaProviderBuilder {
        MemorySchemaProviderBuilder::default()
    }

    /// Loads a catalog from JSON of the shape
    /// `[{"space_id": 0, "tag": 3001, "schema": {"version": 0, "fields": [...]}}, ...]`
    /// where each entry carries exactly one of `tag` or `edge`.
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self> {
        let entries: Vec<CatalogEntry> =
            serde_json::from_slice(bytes).context("parse schema catalog json")?;
        let mut builder = Self::builder();
        for entry in entries {
            let entity = match (entry.tag, entry.edge) {
                (Some(tag), None) => EntityRef::Tag(tag),
                (None, Some(edge)) => EntityRef::Edge(edge),
                _ => {
                    return Err(anyhow!(
                        "catalog entry in space {} must name exactly one of tag/edge",
                        entry.space_id
                    ))
                }
            };
            builder = builder.add(entry.space_id, entity, entry.schema)?;
        }
        Ok(builder.build())
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

impl SchemaProvider for MemorySchemaProvider {
    fn resolve(
        &self,
        space_id: SpaceId,
        entity: EntityRef,
        version: Option<SchemaVersion>,
    ) -> Option<Arc<SchemaDescriptor>> {
        let entity = entity.normalized();
        match version {
            Some(version) => self.schemas.get(&(space_id, entity, version)).cloned(),
            None => self
                .schemas
                .range((space_id, entity, 0)..=(space_id, entity, SchemaVersion::MAX))
                .next_back()
                .map(|(_, schema)| Arc::clone(schema)),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemorySchemaProviderBuilder {
    schemas: BTreeMap<SchemaKey, Arc<SchemaDescriptor>>,
}

impl MemorySchemaProviderBuilder {
    /// Publishes one schema revision. Versions must strictly increase per entity.
    pub fn add(
        mut self,
        space_id: SpaceId,
        entity: EntityRef,
        schema: SchemaDescriptor,
    ) -> Result<Self> {
        let entity = entity.normalized();
        let latest = self
            .schemas
            .range((space_id, entity, 0)..=(space_id, entity, SchemaVersion::MAX))
            .next_back()
            .map(|((_, _, version), _)| *version);
        if let Some(latest) = latest {
            if schema.version <= latest {
                return Err(anyhow!(
                    "schema version {} for {:?} in space {} is not newer than {}",
                    schema.version,
                    entity,
                    space_id,
                    latest
                ));
            }
        }
        self.schemas
            .insert((space_id, entity, schema.version), Arc::new(schema));
        Ok(self)
    }

    pub fn add_tag(self, space_id: SpaceId, tag: TagType, schema: SchemaDescriptor) -> Result<Self> {
        self.add(space_id, EntityRef::Tag(tag), schema)
    }

    pub fn add_edge(
        self,
        space_id: SpaceId,
        edge: EdgeType,
        schema: SchemaDescriptor,
    ) -> Result<Self> {
        self.add(space_id, EntityRef::Edge(edge), schema)
    }

    pub fn build(self) -> MemorySchemaProvider {
        MemorySchemaProvider {
            schemas: self.schemas,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    space_id: SpaceId,
    #[serde(default)]
    tag: Option<TagType>,
    #[serde(default)]
    edge: Option<EdgeType>,
    schema: SchemaDescriptor,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_ints(version: SchemaVersion) -> SchemaDescriptor {
        SchemaDescriptor::new(
            version,
            vec![
                FieldDef::new("a", ValueType::Int),
                FieldDef::new("b", ValueType::Int),
            ],
        )
    }

    #[test]
    fn latest_version_is_default_resolution() {
        let provider = MemorySchemaProvider::builder()
            .add_tag(0, 3001, two_ints(0))
            .unwrap()
            .add_tag(0, 3001, two_ints(2))
            .unwrap()
            .add_tag(1, 3001, two_ints(7))
            .unwrap()
            .build();

        assert_eq!(provider.tag_schema(0, 3001, None).unwrap().version, 2);
        assert_eq!(provider.tag_schema(0, 3001, Some(0)).unwrap().version, 0);
        assert!(provider.tag_schema(0, 3001, Some(1)).is_none());
        assert_eq!(provider.tag_schema(1, 3001, None).unwrap().version, 7);
        assert!(provider.tag_schema(0, 3002, None).is_none());
        assert!(provider.edge_schema(0, 3001, None).is_none());
    }

    #[test]
    fn builder_rejects_non_increasing_versions() {
        let err = MemorySchemaProvider::builder()
            .add_edge(0, 101, two_ints(3))
            .unwrap()
            .add_edge(0, 101, two_ints(3))
            .expect_err("duplicate version must be rejected");
        assert!(err.to_string().contains("not newer"));
    }

    #[test]
    fn reverse_edge_type_shares_schema() {
        let provider = MemorySchemaProvider::builder()
            .add_edge(0, 101, two_ints(0))
            .unwrap()
            .build();
        assert!(provider.edge_schema(0, -101, None).is_some());
    }

    #[test]
    fn catalog_loads_from_json() {
        let json = br#"[
            {"space_id": 0, "tag": 3001, "schema": {"version": 0, "fields": [
                {"name": "tag_3001_col_0", "type": "INT"},
                {"name": "tag_3001_col_3", "type": "STRING"}
            ]}},
            {"space_id": 0, "edge": 101, "schema": {"version": 1, "fields": [
                {"name": "col_0", "type": "DOUBLE"}
            ]}}
        ]"#;
        let provider = MemorySchemaProvider::from_json_slice(json).expect("load catalog");
        assert_eq!(provider.len(), 2);
        let tag = provider.tag_schema(0, 3001, None).unwrap();
        assert_eq!(tag.field_index("tag_3001_col_3"), Some(1));
        assert_eq!(tag.fields[1].value_type, ValueType::String);
        let edge = provider.edge_schema(0, 101, Some(1)).unwrap();
        assert_eq!(edge.fields[0].value_type, ValueType::Double);

        let bad = br#"[{"space_id": 0, "tag": 1, "edge": 2, "schema": {"version": 0, "fields": []}}]"#;
        assert!(MemorySchemaProvider::from_json_slice(bad).is_err());
    }
}
