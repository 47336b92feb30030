//! Shared graph fixture for integration tests.
//!
//! Three partitions of ten vertices. Every vertex carries tags 3001..=3009
//! (three INT fields holding 0, 1, 2 and three STRING fields) and seven
//! outgoing edges of type 101 to vertices 10001..=10007 whose INT fields
//! `col_k` hold `k`. Each edge is mirrored as an incoming edge under its
//! destination vertex.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use holo_graph::keys::{encode_edge_key, encode_vertex_key, EdgeKey};
use holo_graph::kv::KvPair;
use holo_graph::schema::MemorySchemaProviderBuilder;
use holo_graph::{
    encode_row_checked, EdgeType, FieldDef, GraphKvStore, KvResultCode, MemorySchemaProvider,
    PartitionId, QueryStatsProcessor, QueryStatsRequest, ReturnColumn, SchemaDescriptor,
    SchemaProvider, SpaceId, StatType, StatsConfig, StatsScope, TagType, Value, ValueType,
    VertexId,
};
use tracing_subscriber::EnvFilter;

pub const SPACE_ID: SpaceId = 0;
pub const PARTITIONS: PartitionId = 3;
pub const VERTICES_PER_PARTITION: i64 = 10;
pub const EDGE_TYPE: EdgeType = 101;
pub const EDGES_PER_VERTEX: i64 = 7;
pub const FIRST_DST: VertexId = 10001;
pub const TAGS: std::ops::RangeInclusive<TagType> = 3001..=3009;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn tag_schema(tag: TagType) -> SchemaDescriptor {
    let mut fields = Vec::new();
    for i in 0..3 {
        fields.push(FieldDef::new(format!("tag_{tag}_col_{i}"), ValueType::Int));
    }
    for i in 3..6 {
        fields.push(FieldDef::new(format!("tag_{tag}_col_{i}"), ValueType::String));
    }
    SchemaDescriptor::new(0, fields)
}

pub fn edge_schema() -> SchemaDescriptor {
    let mut fields = Vec::new();
    for i in 0..10 {
        fields.push(FieldDef::new(format!("col_{i}"), ValueType::Int));
    }
    for i in 10..20 {
        fields.push(FieldDef::new(format!("col_{i}"), ValueType::String));
    }
    SchemaDescriptor::new(0, fields)
}

pub fn schema_builder() -> Result<MemorySchemaProviderBuilder> {
    let mut builder = MemorySchemaProvider::builder();
    for tag in TAGS {
        builder = builder.add_tag(SPACE_ID, tag, tag_schema(tag))?;
    }
    builder.add_edge(SPACE_ID, EDGE_TYPE, edge_schema())
}

pub fn schemas() -> Result<Arc<MemorySchemaProvider>> {
    Ok(Arc::new(schema_builder()?.build()))
}

pub fn tag_values() -> Vec<Value> {
    let mut values: Vec<Value> = (0..3).map(Value::Int).collect();
    values.extend((3..6).map(|i| Value::from(format!("tag_string_col_{i}"))));
    values
}

pub fn edge_values() -> Vec<Value> {
    let mut values: Vec<Value> = (0..10).map(Value::Int).collect();
    values.extend((10..20).map(|i| Value::from(format!("string_col_{i}"))));
    values
}

pub fn vertices(partition: PartitionId) -> Vec<VertexId> {
    let base = i64::from(partition) * VERTICES_PER_PARTITION;
    (base..base + VERTICES_PER_PARTITION).collect()
}

pub fn ids_by_partition() -> BTreeMap<PartitionId, Vec<VertexId>> {
    (0..PARTITIONS).map(|p| (p, vertices(p))).collect()
}

/// Partition owning the incoming-edge index of `vertex_id`.
pub fn partition_of(vertex_id: VertexId) -> PartitionId {
    vertex_id.rem_euclid(i64::from(PARTITIONS)) as PartitionId
}

/// Writes the whole fixture through `store`.
pub async fn load_fixture(store: &dyn GraphKvStore, schemas: &dyn SchemaProvider) -> Result<()> {
    let edge_row = {
        let schema = schemas
            .edge_schema(SPACE_ID, EDGE_TYPE, Some(0))
            .context("edge schema v0")?;
        encode_row_checked(&schema, &edge_values())?
    };
    let mut batches: BTreeMap<PartitionId, Vec<KvPair>> = BTreeMap::new();
    for partition in 0..PARTITIONS {
        for vertex_id in vertices(partition) {
            for tag in TAGS {
                let schema = schemas
                    .tag_schema(SPACE_ID, tag, Some(0))
                    .with_context(|| format!("tag schema {tag}"))?;
                let row = encode_row_checked(&schema, &tag_values())?;
                batches
                    .entry(partition)
                    .or_default()
                    .push((encode_vertex_key(partition, vertex_id, tag, 0), row));
            }
            for dst in FIRST_DST..FIRST_DST + EDGES_PER_VERTEX {
                let edge = EdgeKey {
                    partition,
                    src: vertex_id,
                    edge_type: EDGE_TYPE,
                    rank: dst - FIRST_DST,
                    dst,
                    version: 0,
                };
                batches
                    .entry(partition)
                    .or_default()
                    .push((edge.encode(), edge_row.clone()));
                let incoming = edge.reversed(partition_of(dst));
                batches
                    .entry(incoming.partition)
                    .or_default()
                    .push((incoming.encode(), edge_row.clone()));
            }
        }
    }
    for (partition, items) in batches {
        let done = store.multi_put(SPACE_ID, partition, items).await;
        if done.code != KvResultCode::Succeeded {
            bail!("fixture write to partition {partition} failed: {:?}", done.code);
        }
    }
    Ok(())
}

/// Writes one extra edge row for `src` under the fixture edge type.
pub async fn put_edge(
    store: &dyn GraphKvStore,
    partition: PartitionId,
    src: VertexId,
    dst: VertexId,
    rank: i64,
    row: Vec<u8>,
) -> Result<()> {
    let key = encode_edge_key(partition, src, EDGE_TYPE, dst, rank, 0);
    let done = store.multi_put(SPACE_ID, partition, vec![(key, row)]).await;
    if done.code != KvResultCode::Succeeded {
        bail!("edge write failed: {:?}", done.code);
    }
    Ok(())
}

/// AVG of two tag fields followed by SUM of the even edge fields.
pub fn fixture_columns() -> Vec<ReturnColumn> {
    let mut columns = vec![
        ReturnColumn::source(3001, "tag_3001_col_0", StatType::Avg),
        ReturnColumn::source(3003, "tag_3003_col_2", StatType::Avg),
    ];
    for i in (0..10).step_by(2) {
        columns.push(ReturnColumn::edge(format!("col_{i}"), StatType::Sum));
    }
    columns
}

pub fn fixture_request(scope: StatsScope) -> QueryStatsRequest {
    QueryStatsRequest {
        space_id: SPACE_ID,
        ids_by_partition: ids_by_partition(),
        edge_type: EDGE_TYPE,
        return_columns: fixture_columns(),
        scope,
    }
}

/// Expected per-vertex row when every edge of the vertex is folded.
pub fn expected_vertex_row(edges: i64) -> Vec<Value> {
    let mut row = vec![Value::Double(0.0), Value::Double(2.0)];
    row.extend((0..10).step_by(2).map(|i| Value::Int(i * edges)));
    row
}

pub fn processor(
    store: Arc<dyn GraphKvStore>,
    schemas: Arc<MemorySchemaProvider>,
    config: StatsConfig,
) -> QueryStatsProcessor {
    QueryStatsProcessor::new(store, schemas, config)
}
