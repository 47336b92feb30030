//! Partition-scoped reads of tag rows and edge rows.
//!
//! Every read is bounded by a key prefix built in [`crate::keys`]. Only the
//! newest version of each logical record is surfaced. Store failures come back
//! as [`StorageError`] for the acting partition; keys that fail to decode are
//! logged and skipped.

use std::sync::Arc;

use tracing::warn;

use crate::error::{KeyError, StorageError};
use crate::keys::{
    decode_edge_key, decode_vertex_key, edge_prefix, encode_vertex_key, tag_prefix, EdgeKey,
    EdgeRank, EdgeType, KeyVersion, PartitionId, SpaceId, TagType, VertexId, VertexKey,
};
use crate::kv::{GraphKvStore, PrefixScan};

/// Newest stored version of one tag on one vertex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRow {
    pub key: VertexKey,
    pub row: Vec<u8>,
}

#[derive(Clone)]
pub struct PartitionReader {
    kv: Arc<dyn GraphKvStore>,
    space_id: SpaceId,
    partition_id: PartitionId,
}

impl PartitionReader {
    pub fn new(kv: Arc<dyn GraphKvStore>, space_id: SpaceId, partition_id: PartitionId) -> Self {
        Self {
            kv,
            space_id,
            partition_id,
        }
    }

    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    /// Latest version of `tag_type` on `vertex_id`, or `None` when absent.
    pub async fn read_tag_props(
        &self,
        vertex_id: VertexId,
        tag_type: TagType,
    ) -> Result<Option<TagRow>, StorageError> {
        let prefix = tag_prefix(self.partition_id, vertex_id, tag_type);
        let scan = self
            .kv
            .scan_prefix(self.space_id, self.partition_id, &prefix)
            .await?;
        for (key, value) in scan.iter() {
            match decode_vertex_key(key) {
                Ok(key) => {
                    return Ok(Some(TagRow {
                        key,
                        row: value.to_vec(),
                    }))
                }
                Err(err) => {
                    warn!(
                        error = %err,
                        partition_id = self.partition_id,
                        vertex_id,
                        tag_type,
                        "skipping undecodable tag key"
                    );
                }
            }
        }
        Ok(None)
    }

    /// Exact-version point read of one tag row.
    pub async fn read_tag_props_at(
        &self,
        vertex_id: VertexId,
        tag_type: TagType,
        version: KeyVersion,
    ) -> Result<Option<Vec<u8>>, StorageError> {
        let key = encode_vertex_key(self.partition_id, vertex_id, tag_type, version);
        self.kv.get(self.space_id, self.partition_id, &key).await
    }

    /// Every edge of `edge_type` stored under `vertex_id`.
    ///
    /// Negative edge types read the incoming-edge index.
    pub async fn read_edges(
        &self,
        vertex_id: VertexId,
        edge_type: EdgeType,
    ) -> Result<EdgeScan, StorageError> {
        let prefix = edge_prefix(self.partition_id, vertex_id, edge_type);
        let scan = self
            .kv
            .scan_prefix(self.space_id, self.partition_id, &prefix)
            .await?;
        Ok(EdgeScan { scan })
    }
}

/// Finite, restartable view over the edges returned by one prefix scan.
#[derive(Debug, Clone)]
pub struct EdgeScan {
    scan: PrefixScan,
}

impl EdgeScan {
    /// Number of stored entries, including superseded versions.
    pub fn stored_len(&self) -> usize {
        self.scan.len()
    }

    /// Lazily decodes edges in key order, newest version per `(rank, dst)`.
    ///
    /// Entries whose keys fail to decode are yielded as errors so the caller
    /// can count and skip them.
    pub fn iter(&self) -> EdgeIter<'_> {
        EdgeIter {
            inner: Box::new(self.scan.iter()),
            last: None,
        }
    }
}

pub struct EdgeIter<'a> {
    inner: Box<dyn Iterator<Item = (&'a [u8], &'a [u8])> + Send + 'a>,
    last: Option<(EdgeRank, VertexId)>,
}

impl<'a> Iterator for EdgeIter<'a> {
    type Item = Result<(EdgeKey, &'a [u8]), KeyError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (key, value) = self.inner.next()?;
            let edge = match decode_edge_key(key) {
                Ok(edge) => edge,
                Err(err) => return Some(Err(err)),
            };
            let identity = (edge.rank, edge.dst);
            if self.last == Some(identity) {
                continue;
            }
            self.last = Some(identity);
            return Some(Ok((edge, value)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::encode_edge_key;
    use crate::kv::MemoryKvStore;

    async fn seeded_store() -> Arc<MemoryKvStore> {
        let store = Arc::new(MemoryKvStore::new());
        let items = vec![
            (encode_vertex_key(1, 10, 3001, 1), b"tag-v1".to_vec()),
            (encode_vertex_key(1, 10, 3001, 2), b"tag-v2".to_vec()),
            (encode_vertex_key(1, 10, 3002, 0), b"other-tag".to_vec()),
            (encode_edge_key(1, 10, 101, 20, 0, 1), b"e20-v1".to_vec()),
            (encode_edge_key(1, 10, 101, 20, 0, 5), b"e20-v5".to_vec()),
            (encode_edge_key(1, 10, 101, 21, 0, 0), b"e21".to_vec()),
            (encode_edge_key(1, 10, 101, 20, 1, 0), b"e20-rank1".to_vec()),
            (encode_edge_key(1, 10, 102, 20, 0, 0), b"other-type".to_vec()),
            (encode_edge_key(1, 11, 101, 20, 0, 0), b"other-src".to_vec()),
        ];
        store.multi_put(0, 1, items).await;
        store
    }

    #[tokio::test]
    async fn tag_read_returns_newest_version() {
        let store = seeded_store().await;
        let reader = PartitionReader::new(store, 0, 1);

        let tag = reader.read_tag_props(10, 3001).await.unwrap().expect("tag present");
        assert_eq!(tag.row, b"tag-v2");
        assert_eq!(tag.key.version, 2);
        assert!(reader.read_tag_props(10, 3003).await.unwrap().is_none());
        assert_eq!(
            reader.read_tag_props_at(10, 3001, 1).await.unwrap(),
            Some(b"tag-v1".to_vec())
        );
    }

    #[tokio::test]
    async fn edge_scan_is_bounded_deduplicated_and_restartable() {
        let store = seeded_store().await;
        let reader = PartitionReader::new(store, 0, 1);
        let edges = reader.read_edges(10, 101).await.unwrap();
        assert_eq!(edges.stored_len(), 4);

        let values: Vec<_> = edges
            .iter()
            .map(|item| item.map(|(_, v)| v.to_vec()).unwrap())
            .collect();
        assert_eq!(
            values,
            vec![b"e20-v5".to_vec(), b"e21".to_vec(), b"e20-rank1".to_vec()]
        );
        assert_eq!(edges.iter().count(), 3);
        assert_eq!(reader.read_edges(12, 101).await.unwrap().iter().count(), 0);
    }

    #[tokio::test]
    async fn storage_failure_surfaces_as_partition_error() {
        let store = seeded_store().await;
        store.set_partition_available(0, 1, false);
        let reader = PartitionReader::new(store, 0, 1);
        assert!(matches!(
            reader.read_edges(10, 101).await,
            Err(StorageError::Unavailable { partition_id: 1, .. })
        ));
    }
}
