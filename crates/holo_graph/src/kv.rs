//! Key/value collaborator consumed by the statistics path.
//!
//! The query core only needs multi-key writes, point reads and prefix scans
//! scoped to one `(space, partition)`. Two engines are provided: an in-memory
//! store with per-partition fault injection, and a fjall-backed store that
//! keeps one fjall partition per graph partition.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::SocketAddr;
use std::ops::Bound;
use std::path::Path;
use std::sync::RwLock;

use async_trait::async_trait;
use fjall::{Keyspace, PartitionCreateOptions, PartitionHandle};
use tracing::warn;

use crate::error::StorageError;
use crate::keys::{prefix_end, PartitionId, SpaceId};

pub type KvPair = (Vec<u8>, Vec<u8>);

/// Outcome of a multi-key write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KvResultCode {
    Succeeded,
    PartitionUnavailable,
    WriteFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutCompletion {
    pub code: KvResultCode,
    /// Node responsible for the partition, when the engine knows it.
    pub leader: Option<SocketAddr>,
}

/// Snapshot of every entry matching a prefix, in key order.
///
/// Iteration is restartable: each call to [`PrefixScan::iter`] starts over
/// from the first entry.
#[derive(Debug, Clone, Default)]
pub struct PrefixScan {
    prefix: Vec<u8>,
    entries: Vec<KvPair>,
}

impl PrefixScan {
    pub fn new(prefix: Vec<u8>, entries: Vec<KvPair>) -> Self {
        Self { prefix, entries }
    }

    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in key order; stops at the first key outside the prefix.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> + '_ {
        self.entries
            .iter()
            .map(|(k, v)| (k.as_slice(), v.as_slice()))
            .take_while(|(k, _)| k.starts_with(&self.prefix))
    }
}

#[async_trait]
pub trait GraphKvStore: Send + Sync + 'static {
    async fn multi_put(
        &self,
        space_id: SpaceId,
        partition_id: PartitionId,
        items: Vec<KvPair>,
    ) -> PutCompletion;

    async fn get(
        &self,
        space_id: SpaceId,
        partition_id: PartitionId,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>, StorageError>;

    async fn scan_prefix(
        &self,
        space_id: SpaceId,
        partition_id: PartitionId,
        prefix: &[u8],
    ) -> Result<PrefixScan, StorageError>;
}

type PartitionMap = BTreeMap<Vec<u8>, Vec<u8>>;

/// In-memory engine backed by one ordered map per partition.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    inner: RwLock<HashMap<(SpaceId, PartitionId), PartitionMap>>,
    unavailable: RwLock<HashSet<(SpaceId, PartitionId)>>,
    leader: Option<SocketAddr>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_leader(leader: SocketAddr) -> Self {
        Self {
            leader: Some(leader),
            ..Self::default()
        }
    }

    /// Makes every subsequent read or write against the partition fail.
    pub fn set_partition_available(&self, space_id: SpaceId, partition_id: PartitionId, up: bool) {
        if let Ok(mut guard) = self.unavailable.write() {
            if up {
                guard.remove(&(space_id, partition_id));
            } else {
                guard.insert((space_id, partition_id));
            }
        }
    }

    /// Number of keys stored for one partition.
    pub fn partition_len(&self, space_id: SpaceId, partition_id: PartitionId) -> usize {
        self.inner
            .read()
            .ok()
            .and_then(|guard| guard.get(&(space_id, partition_id)).map(BTreeMap::len))
            .unwrap_or(0)
    }

    fn check_available(
        &self,
        space_id: SpaceId,
        partition_id: PartitionId,
    ) -> Result<(), StorageError> {
        let down = self
            .unavailable
            .read()
            .map(|guard| guard.contains(&(space_id, partition_id)))
            .unwrap_or(true);
        if down {
            return Err(unavailable(space_id, partition_id, "partition marked unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl GraphKvStore for MemoryKvStore {
    async fn multi_put(
        &self,
        space_id: SpaceId,
        partition_id: PartitionId,
        items: Vec<KvPair>,
    ) -> PutCompletion {
        let code = if self.check_available(space_id, partition_id).is_err() {
            KvResultCode::PartitionUnavailable
        } else if let Ok(mut guard) = self.inner.write() {
            let part = guard.entry((space_id, partition_id)).or_default();
            for (key, value) in items {
                part.insert(key, value);
            }
            KvResultCode::Succeeded
        } else {
            warn!(space_id, partition_id, "memory kv lock poisoned on write");
            KvResultCode::WriteFailed
        };
        PutCompletion {
            code,
            leader: self.leader,
        }
    }

    async fn get(
        &self,
        space_id: SpaceId,
        partition_id: PartitionId,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>, StorageError> {
        self.check_available(space_id, partition_id)?;
        let guard = self
            .inner
            .read()
            .map_err(|_| unavailable(space_id, partition_id, "memory kv lock poisoned"))?;
        Ok(guard
            .get(&(space_id, partition_id))
            .and_then(|part| part.get(key).cloned()))
    }

    async fn scan_prefix(
        &self,
        space_id: SpaceId,
        partition_id: PartitionId,
        prefix: &[u8],
    ) -> Result<PrefixScan, StorageError> {
        self.check_available(space_id, partition_id)?;
        let guard = self
            .inner
            .read()
            .map_err(|_| unavailable(space_id, partition_id, "memory kv lock poisoned"))?;
        let upper = prefix_end(prefix).map_or(Bound::Unbounded, Bound::Excluded);
        let entries = match guard.get(&(space_id, partition_id)) {
            Some(part) => part
                .range::<Vec<u8>, _>((Bound::Included(prefix.to_vec()), upper))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            None => Vec::new(),
        };
        Ok(PrefixScan::new(prefix.to_vec(), entries))
    }
}

/// On-disk engine with one fjall partition per `(space, partition)`.
pub struct FjallKvStore {
    keyspace: Keyspace,
    partitions: RwLock<HashMap<(SpaceId, PartitionId), PartitionHandle>>,
}

impl FjallKvStore {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let keyspace = fjall::Config::new(path.as_ref()).open()?;
        Ok(Self {
            keyspace,
            partitions: RwLock::new(HashMap::new()),
        })
    }

    /// Whether the keyspace holds a fjall partition for `(space, partition)`.
    pub fn has_partition(&self, space_id: SpaceId, partition_id: PartitionId) -> bool {
        self.keyspace
            .partition_exists(&partition_name(space_id, partition_id))
    }

    /// Cached handle for a partition. Only writers pass `create`; reads of a
    /// partition that was never written return `None` and touch nothing on disk.
    fn partition(
        &self,
        space_id: SpaceId,
        partition_id: PartitionId,
        create: bool,
    ) -> Result<Option<PartitionHandle>, StorageError> {
        if let Ok(guard) = self.partitions.read() {
            if let Some(handle) = guard.get(&(space_id, partition_id)) {
                return Ok(Some(handle.clone()));
            }
        }
        let name = partition_name(space_id, partition_id);
        if !create && !self.keyspace.partition_exists(&name) {
            return Ok(None);
        }
        let mut guard = self
            .partitions
            .write()
            .map_err(|_| unavailable(space_id, partition_id, "fjall partition map poisoned"))?;
        if let Some(handle) = guard.get(&(space_id, partition_id)) {
            return Ok(Some(handle.clone()));
        }
        let handle = self
            .keyspace
            .open_partition(&name, PartitionCreateOptions::default())
            .map_err(|err| unavailable(space_id, partition_id, err))?;
        guard.insert((space_id, partition_id), handle.clone());
        Ok(Some(handle))
    }
}

fn partition_name(space_id: SpaceId, partition_id: PartitionId) -> String {
    format!("graph_{space_id}_{partition_id}")
}

#[async_trait]
impl GraphKvStore for FjallKvStore {
    async fn multi_put(
        &self,
        space_id: SpaceId,
        partition_id: PartitionId,
        items: Vec<KvPair>,
    ) -> PutCompletion {
        let code = match self.partition(space_id, partition_id, true) {
            Ok(Some(handle)) => {
                let mut batch = self.keyspace.batch();
                for (key, value) in items {
                    batch.insert(&handle, key, value);
                }
                match batch.commit() {
                    Ok(()) => KvResultCode::Succeeded,
                    Err(err) => {
                        warn!(error = ?err, space_id, partition_id, "fjall kv batch write failed");
                        KvResultCode::WriteFailed
                    }
                }
            }
            Ok(None) => KvResultCode::PartitionUnavailable,
            Err(err) => {
                warn!(error = %err, "fjall partition open failed");
                KvResultCode::PartitionUnavailable
            }
        };
        PutCompletion { code, leader: None }
    }

    async fn get(
        &self,
        space_id: SpaceId,
        partition_id: PartitionId,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>, StorageError> {
        let Some(handle) = self.partition(space_id, partition_id, false)? else {
            return Ok(None);
        };
        handle
            .get(key)
            .map(|value| value.map(|bytes| bytes.to_vec()))
            .map_err(|err| unavailable(space_id, partition_id, err))
    }

    async fn scan_prefix(
        &self,
        space_id: SpaceId,
        partition_id: PartitionId,
        prefix: &[u8],
    ) -> Result<PrefixScan, StorageError> {
        let Some(handle) = self.partition(space_id, partition_id, false)? else {
            return Ok(PrefixScan::new(prefix.to_vec(), Vec::new()));
        };
        let mut entries = Vec::new();
        for item in handle.prefix(prefix) {
            let (key, value) = item.map_err(|err| unavailable(space_id, partition_id, err))?;
            entries.push((key.to_vec(), value.to_vec()));
        }
        Ok(PrefixScan::new(prefix.to_vec(), entries))
    }
}

fn unavailable(
    space_id: SpaceId,
    partition_id: PartitionId,
    detail: impl std::fmt::Display,
) -> StorageError {
    StorageError::Unavailable {
        space_id,
        partition_id,
        detail: detail.to_string(),
    }
}
