//! Graph statistics queries over a partitioned key/value keyspace.
//!
//! Vertices and edges live in per-partition ordered key spaces:
//! - `keys` builds order-preserving binary keys for tag and edge records,
//! - `row` encodes typed property values against versioned schemas,
//! - `reader` scans one partition for a vertex's latest tag and edge rows,
//! - `stats` folds decoded values into per-column aggregates,
//! - `query` fans a request out per partition and assembles the response.
//!
//! The key/value engine and the schema catalog are collaborators injected
//! through [`GraphKvStore`] and [`SchemaProvider`].

pub mod config;
pub mod error;
pub mod keys;
pub mod kv;
pub mod metrics;
pub mod query;
pub mod reader;
pub mod row;
pub mod schema;
pub mod stats;
pub mod value;

pub use config::StatsConfig;
pub use error::{ErrorCode, KeyError, QueryError, RowError, StatsError, StorageError};
pub use keys::{EdgeKey, EdgeType, PartitionId, SpaceId, TagType, VertexId, VertexKey};
pub use kv::{FjallKvStore, GraphKvStore, KvResultCode, MemoryKvStore, PutCompletion};
pub use metrics::{StatsMetrics, StatsMetricsSnapshot};
pub use query::{
    PartitionCode, PropOwner, QueryStatsProcessor, QueryStatsRequest, QueryStatsResponse,
    ReturnColumn, StatsScope,
};
pub use reader::PartitionReader;
pub use row::{encode_row, encode_row_checked, FieldAccessor, RowReader, RowWriter};
pub use schema::{FieldDef, MemorySchemaProvider, SchemaDescriptor, SchemaProvider};
pub use stats::{StatAccumulator, StatType};
pub use value::{Value, ValueType};
