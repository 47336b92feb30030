//! Ordered binary keys for vertex tag records and edge records.
//!
//! Every key starts with the partition id and the owning vertex id, followed
//! by a one-byte discriminator separating tag records from edge records:
//!
//! ```text
//! vertex: part:u32 | vid:i64 | 0x01 | tag:i32 | !version:i64                            (25 bytes)
//! edge:   part:u32 | src:i64 | 0x02 | edge_type:i32 | rank:i64 | dst:i64 | !version:i64 (41 bytes)
//! ```
//!
//! All integers are big-endian. Signed integers have their sign bit flipped so
//! byte order equals numeric order, and the version is bit-inverted so the
//! newest version of a record sorts first. A prefix scan over
//! `(part, vid)` therefore returns every tag record and then every edge record
//! of that vertex, in a deterministic order.
//!
//! Incoming edges are indexed under the destination vertex with a negated edge
//! type; see [`EdgeKey::reversed`].

use crate::error::KeyError;

pub type SpaceId = u32;
pub type PartitionId = u32;
pub type VertexId = i64;
pub type TagType = i32;
pub type EdgeType = i32;
pub type EdgeRank = i64;
/// Record version stored in keys (write timestamp or explicit revision).
pub type KeyVersion = i64;

const KEY_KIND_TAG: u8 = 0x01;
const KEY_KIND_EDGE: u8 = 0x02;
const SIGN_FLIP_MASK_64: u64 = 1u64 << 63;
const SIGN_FLIP_MASK_32: u32 = 1u32 << 31;

const PARTITION_LEN: usize = 4;
const VERTEX_PREFIX_LEN: usize = PARTITION_LEN + 8;
const KIND_OFFSET: usize = VERTEX_PREFIX_LEN;
const TYPE_PREFIX_LEN: usize = VERTEX_PREFIX_LEN + 1 + 4;
pub const VERTEX_KEY_LEN: usize = TYPE_PREFIX_LEN + 8;
pub const EDGE_KEY_LEN: usize = TYPE_PREFIX_LEN + 8 + 8 + 8;

/// Which record family a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Tag,
    Edge,
}

/// Decoded locator of one tag row on one vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexKey {
    pub partition: PartitionId,
    pub vertex_id: VertexId,
    pub tag_type: TagType,
    pub version: KeyVersion,
}

impl VertexKey {
    pub fn encode(&self) -> Vec<u8> {
        encode_vertex_key(self.partition, self.vertex_id, self.tag_type, self.version)
    }
}

/// Decoded locator of one edge instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgeKey {
    pub partition: PartitionId,
    pub src: VertexId,
    pub edge_type: EdgeType,
    pub rank: EdgeRank,
    pub dst: VertexId,
    pub version: KeyVersion,
}

impl EdgeKey {
    pub fn encode(&self) -> Vec<u8> {
        encode_edge_key(
            self.partition,
            self.src,
            self.edge_type,
            self.dst,
            self.rank,
            self.version,
        )
    }

    /// Incoming-edge locator stored under the destination vertex.
    ///
    /// Applying this twice (with the original partition) yields the original key.
    pub fn reversed(&self, dst_partition: PartitionId) -> Self {
        Self {
            partition: dst_partition,
            src: self.dst,
            edge_type: self.edge_type.wrapping_neg(),
            rank: self.rank,
            dst: self.src,
            version: self.version,
        }
    }

    pub fn is_reverse(&self) -> bool {
        self.edge_type < 0
    }
}

pub fn encode_vertex_key(
    partition: PartitionId,
    vertex_id: VertexId,
    tag_type: TagType,
    version: KeyVersion,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(VERTEX_KEY_LEN);
    push_type_prefix(&mut out, partition, vertex_id, KEY_KIND_TAG, tag_type);
    out.extend_from_slice(&encode_version(version));
    out
}

pub fn encode_edge_key(
    partition: PartitionId,
    src: VertexId,
    edge_type: EdgeType,
    dst: VertexId,
    rank: EdgeRank,
    version: KeyVersion,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(EDGE_KEY_LEN);
    push_type_prefix(&mut out, partition, src, KEY_KIND_EDGE, edge_type);
    out.extend_from_slice(&encode_i64_ordered(rank));
    out.extend_from_slice(&encode_i64_ordered(dst));
    out.extend_from_slice(&encode_version(version));
    out
}

pub fn decode_vertex_key(key: &[u8]) -> Result<VertexKey, KeyError> {
    if key.len() != VERTEX_KEY_LEN {
        return Err(KeyError::malformed("vertex key length mismatch", key));
    }
    if key[KIND_OFFSET] != KEY_KIND_TAG {
        return Err(KeyError::malformed("vertex key discriminator mismatch", key));
    }
    let mut cursor = 0usize;
    let partition = read_u32(key, &mut cursor);
    let vertex_id = decode_i64_ordered(read_array(key, &mut cursor));
    cursor += 1;
    let tag_type = decode_i32_ordered(read_array(key, &mut cursor));
    let version = decode_version(read_array(key, &mut cursor));
    Ok(VertexKey {
        partition,
        vertex_id,
        tag_type,
        version,
    })
}

pub fn decode_edge_key(key: &[u8]) -> Result<EdgeKey, KeyError> {
    if key.len() != EDGE_KEY_LEN {
        return Err(KeyError::malformed("edge key length mismatch", key));
    }
    if key[KIND_OFFSET] != KEY_KIND_EDGE {
        return Err(KeyError::malformed("edge key discriminator mismatch", key));
    }
    let mut cursor = 0usize;
    let partition = read_u32(key, &mut cursor);
    let src = decode_i64_ordered(read_array(key, &mut cursor));
    cursor += 1;
    let edge_type = decode_i32_ordered(read_array(key, &mut cursor));
    let rank = decode_i64_ordered(read_array(key, &mut cursor));
    let dst = decode_i64_ordered(read_array(key, &mut cursor));
    let version = decode_version(read_array(key, &mut cursor));
    Ok(EdgeKey {
        partition,
        src,
        edge_type,
        rank,
        dst,
        version,
    })
}

/// Classifies a key by length and discriminator without decoding it.
pub fn key_kind(key: &[u8]) -> Option<KeyKind> {
    match (key.len(), key.get(KIND_OFFSET).copied()) {
        (VERTEX_KEY_LEN, Some(KEY_KIND_TAG)) => Some(KeyKind::Tag),
        (EDGE_KEY_LEN, Some(KEY_KIND_EDGE)) => Some(KeyKind::Edge),
        _ => None,
    }
}

/// Prefix covering every tag and edge record of one vertex.
pub fn vertex_prefix(partition: PartitionId, vertex_id: VertexId) -> Vec<u8> {
    let mut out = Vec::with_capacity(VERTEX_PREFIX_LEN);
    out.extend_from_slice(&partition.to_be_bytes());
    out.extend_from_slice(&encode_i64_ordered(vertex_id));
    out
}

/// Prefix covering every version of one tag on one vertex.
pub fn tag_prefix(partition: PartitionId, vertex_id: VertexId, tag_type: TagType) -> Vec<u8> {
    let mut out = Vec::with_capacity(TYPE_PREFIX_LEN);
    push_type_prefix(&mut out, partition, vertex_id, KEY_KIND_TAG, tag_type);
    out
}

/// Prefix covering every edge of one type leaving (or, for negative types,
/// entering) one vertex.
pub fn edge_prefix(partition: PartitionId, vertex_id: VertexId, edge_type: EdgeType) -> Vec<u8> {
    let mut out = Vec::with_capacity(TYPE_PREFIX_LEN);
    push_type_prefix(&mut out, partition, vertex_id, KEY_KIND_EDGE, edge_type);
    out
}

/// Exclusive upper bound of the key range sharing `prefix`; `None` when the
/// prefix is empty or all `0xFF`, so the range is unbounded above.
pub fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let last = prefix.iter().rposition(|&b| b != u8::MAX)?;
    let mut end = prefix[..=last].to_vec();
    end[last] += 1;
    Some(end)
}

fn push_type_prefix(
    out: &mut Vec<u8>,
    partition: PartitionId,
    vertex_id: VertexId,
    kind: u8,
    type_id: i32,
) {
    out.extend_from_slice(&partition.to_be_bytes());
    out.extend_from_slice(&encode_i64_ordered(vertex_id));
    out.push(kind);
    out.extend_from_slice(&encode_i32_ordered(type_id));
}

fn encode_i64_ordered(value: i64) -> [u8; 8] {
    (value as u64 ^ SIGN_FLIP_MASK_64).to_be_bytes()
}

fn decode_i64_ordered(bytes: [u8; 8]) -> i64 {
    (u64::from_be_bytes(bytes) ^ SIGN_FLIP_MASK_64) as i64
}

fn encode_i32_ordered(value: i32) -> [u8; 4] {
    (value as u32 ^ SIGN_FLIP_MASK_32).to_be_bytes()
}

fn decode_i32_ordered(bytes: [u8; 4]) -> i32 {
    (u32::from_be_bytes(bytes) ^ SIGN_FLIP_MASK_32) as i32
}

fn encode_version(version: KeyVersion) -> [u8; 8] {
    (!(version as u64 ^ SIGN_FLIP_MASK_64)).to_be_bytes()
}

fn decode_version(bytes: [u8; 8]) -> KeyVersion {
    (!u64::from_be_bytes(bytes) ^ SIGN_FLIP_MASK_64) as i64
}

// Callers validate the total length up front, so these never run past the end.
fn read_array<const N: usize>(key: &[u8], cursor: &mut usize) -> [u8; N] {
    let mut buf = [0u8; N];
    buf.copy_from_slice(&key[*cursor..*cursor + N]);
    *cursor += N;
    buf
}

fn read_u32(key: &[u8], cursor: &mut usize) -> u32 {
    u32::from_be_bytes(read_array(key, cursor))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_key_round_trip() {
        let cases = [
            (0u32, 0i64, 3001i32, 0i64),
            (7, -42, -1, i64::MIN),
            (u32::MAX, i64::MAX, i32::MAX, i64::MAX),
        ];
        for (part, vid, tag, version) in cases {
            let key = encode_vertex_key(part, vid, tag, version);
            assert_eq!(key.len(), VERTEX_KEY_LEN);
            let decoded = decode_vertex_key(&key).expect("decode vertex key");
            assert_eq!(
                decoded,
                VertexKey {
                    partition: part,
                    vertex_id: vid,
                    tag_type: tag,
                    version,
                }
            );
        }
    }

    #[test]
    fn edge_key_round_trip() {
        let edge = EdgeKey {
            partition: 2,
            src: 25,
            edge_type: 101,
            rank: -3,
            dst: 10_007,
            version: 1_700_000_000,
        };
        let key = edge.encode();
        assert_eq!(key.len(), EDGE_KEY_LEN);
        assert_eq!(decode_edge_key(&key).expect("decode edge key"), edge);
    }

    #[test]
    fn decode_rejects_wrong_length_and_discriminator() {
        let vertex = encode_vertex_key(1, 2, 3, 4);
        let edge = encode_edge_key(1, 2, 3, 4, 5, 6);
        assert!(decode_vertex_key(&edge).is_err());
        assert!(decode_edge_key(&vertex).is_err());
        assert!(decode_vertex_key(&vertex[..VERTEX_KEY_LEN - 1]).is_err());

        let mut bad_kind = vertex.clone();
        bad_kind[KIND_OFFSET] = KEY_KIND_EDGE;
        let err = decode_vertex_key(&bad_kind).expect_err("discriminator must be checked");
        assert!(matches!(err, KeyError::Malformed { .. }));
        assert_eq!(key_kind(&bad_kind), None);
        assert_eq!(key_kind(&vertex), Some(KeyKind::Tag));
        assert_eq!(key_kind(&edge), Some(KeyKind::Edge));
    }

    #[test]
    fn vertex_prefix_groups_tags_before_edges() {
        let mut keys = vec![
            encode_edge_key(0, 5, 101, 10_001, 0, 0),
            encode_vertex_key(0, 6, 3001, 0),
            encode_vertex_key(0, 5, 3002, 0),
            encode_edge_key(0, 4, 101, 10_001, 0, 0),
            encode_vertex_key(0, 5, 3001, 0),
        ];
        keys.sort();
        let prefix = vertex_prefix(0, 5);
        let owned: Vec<_> = keys.iter().filter(|k| k.starts_with(&prefix)).collect();
        assert_eq!(owned.len(), 3);
        assert_eq!(key_kind(owned[0]), Some(KeyKind::Tag));
        assert_eq!(decode_vertex_key(owned[0]).unwrap().tag_type, 3001);
        assert_eq!(decode_vertex_key(owned[1]).unwrap().tag_type, 3002);
        assert_eq!(key_kind(owned[2]), Some(KeyKind::Edge));
    }

    #[test]
    fn signed_ids_sort_numerically_and_newest_version_first() {
        let neg = vertex_prefix(0, -1);
        let zero = vertex_prefix(0, 0);
        let pos = vertex_prefix(0, 1);
        assert!(neg < zero && zero < pos);

        let old = encode_vertex_key(0, 1, 3001, 10);
        let new = encode_vertex_key(0, 1, 3001, 11);
        assert!(new < old);

        let low_rank = encode_edge_key(0, 1, 101, 9, -5, 0);
        let high_rank = encode_edge_key(0, 1, 101, 1, 5, 0);
        assert!(low_rank < high_rank);
    }

    #[test]
    fn reversed_edge_swaps_roles_and_negates_type() {
        let edge = EdgeKey {
            partition: 1,
            src: 10,
            edge_type: 101,
            rank: 3,
            dst: 20,
            version: 0,
        };
        let incoming = edge.reversed(2);
        assert!(incoming.is_reverse());
        assert_eq!(incoming.src, 20);
        assert_eq!(incoming.dst, 10);
        assert_eq!(incoming.partition, 2);
        assert!(incoming.encode().starts_with(&edge_prefix(2, 20, -101)));
        assert_eq!(incoming.reversed(1), edge);
    }

    #[test]
    fn prefix_end_bounds_prefix_scan() {
        let prefix = tag_prefix(3, 9, 3001);
        let end = prefix_end(&prefix).expect("prefix end");
        let key = encode_vertex_key(3, 9, 3001, i64::MIN);
        assert!(key.as_slice() < end.as_slice());
        assert_eq!(prefix_end(&[0xFF, 0xFF]), None);
        assert_eq!(prefix_end(&[0x01, 0xFF]), Some(vec![0x02]));
        assert_eq!(prefix_end(&[]), None);
    }
}
