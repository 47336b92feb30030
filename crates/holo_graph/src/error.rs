//! Error taxonomy for the statistics query path.
//!
//! Codec errors are scoped to one key or row, storage errors to one partition,
//! and request errors to the whole query. Only request errors ever reach the
//! caller as an `Err`; everything else is absorbed or reported as a
//! per-partition [`ErrorCode`].

use thiserror::Error;

use crate::keys::{PartitionId, SpaceId};
use crate::value::ValueType;

/// A binary key did not match any known layout.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("malformed key: {reason} (key={key_hex})")]
    Malformed { reason: &'static str, key_hex: String },
}

impl KeyError {
    pub(crate) fn malformed(reason: &'static str, key: &[u8]) -> Self {
        Self::Malformed {
            reason,
            key_hex: hex::encode(key),
        }
    }
}

/// Failures raised while encoding or decoding one row.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RowError {
    #[error("field {index} ('{name}') is {declared:?}, requested {requested:?}")]
    FieldTypeMismatch {
        index: usize,
        name: String,
        declared: ValueType,
        requested: ValueType,
    },
    #[error("field index {index} out of range for schema with {count} fields")]
    FieldOutOfRange { index: usize, count: usize },
    #[error("row truncated: need {need} bytes at offset {offset}, total={total}")]
    Truncated {
        need: usize,
        offset: usize,
        total: usize,
    },
    #[error("no schema registered for version {version}")]
    UnknownSchema { version: u64 },
    #[error("row has {row} fields but schema version {version} only declares {schema}")]
    TooManyFields {
        row: usize,
        schema: usize,
        version: u64,
    },
    #[error("row exceeds {limit}: {actual} > {max}")]
    LimitExceeded {
        limit: &'static str,
        actual: usize,
        max: usize,
    },
    #[error("string field {index} is not valid utf-8")]
    InvalidUtf8 { index: usize },
}

/// The key/value collaborator could not serve a partition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("storage unavailable for space {space_id} partition {partition_id}: {detail}")]
    Unavailable {
        space_id: SpaceId,
        partition_id: PartitionId,
        detail: String,
    },
}

/// A decoded value did not match the input type an aggregator was built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StatsError {
    #[error("aggregator expects {expected} input, got {actual}")]
    InputMismatch {
        expected: ValueType,
        actual: ValueType,
    },
    #[error("cannot merge {left} aggregator with {right}")]
    IncompatibleMerge { left: &'static str, right: &'static str },
}

/// Request-shape failures rejected before any partition work starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Completion code reported once per partition in a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Succeeded,
    StorageUnavailable,
    /// The partition unit panicked or was cancelled before reporting.
    Internal,
}

impl ErrorCode {
    pub fn is_success(self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

impl From<&StorageError> for ErrorCode {
    fn from(err: &StorageError) -> Self {
        match err {
            StorageError::Unavailable { .. } => Self::StorageUnavailable,
        }
    }
}
