//! Versioned binary row codec.
//!
//! Layout (all integers big-endian):
//!
//! ```text
//! schema_version:u64 | field_count:u16 | offset:u32 * field_count | payload
//! ```
//!
//! Offsets are relative to the payload start. INT and DOUBLE payloads are 8
//! bytes, BOOL is 1 byte, STRING is a `u32` length followed by raw bytes. Rows
//! carry no type tags: the version header selects the [`SchemaDescriptor`]
//! that types every field. Reads are positional and on demand, so touching two
//! fields of a wide row costs two offset lookups and two payload reads.

use std::sync::Arc;

use crate::error::RowError;
use crate::keys::SpaceId;
use crate::schema::{EntityRef, SchemaDescriptor, SchemaProvider, SchemaVersion};
use crate::value::{Value, ValueType};

const VERSION_LEN: usize = 8;
const COUNT_LEN: usize = 2;
const HEADER_LEN: usize = VERSION_LEN + COUNT_LEN;
const OFFSET_LEN: usize = 4;
const MAX_FIELDS: usize = u16::MAX as usize;
const MAX_U32: usize = u32::MAX as usize;

/// Schema-agnostic positional access to one decoded row.
pub trait FieldAccessor {
    fn field_count(&self) -> usize;
    fn field_name(&self, index: usize) -> Option<&str>;
    fn field_type(&self, index: usize) -> Option<ValueType>;
    fn read_value(&self, index: usize) -> Result<Value, RowError>;
}

/// Incremental row encoder.
///
/// With a schema attached every pushed value is checked against the declared
/// field type; without one the caller is trusted to match the schema that will
/// decode the row.
#[derive(Debug)]
pub struct RowWriter<'s> {
    version: SchemaVersion,
    schema: Option<&'s SchemaDescriptor>,
    offsets: Vec<u32>,
    payload: Vec<u8>,
}

impl<'s> RowWriter<'s> {
    pub fn new(version: SchemaVersion) -> Self {
        Self {
            version,
            schema: None,
            offsets: Vec::new(),
            payload: Vec::new(),
        }
    }

    pub fn with_schema(schema: &'s SchemaDescriptor) -> Self {
        Self {
            version: schema.version,
            schema: Some(schema),
            offsets: Vec::with_capacity(schema.field_count()),
            payload: Vec::new(),
        }
    }

    pub fn push(&mut self, value: &Value) -> Result<&mut Self, RowError> {
        if let Value::String(v) = value {
            return self.push_bytes(v.as_bytes());
        }
        self.check_next(value.value_type())?;
        let offset = self.next_offset()?;
        self.offsets.push(offset);
        match value {
            Value::Int(v) => self.payload.extend_from_slice(&v.to_be_bytes()),
            Value::Double(v) => self.payload.extend_from_slice(&v.to_be_bytes()),
            Value::Bool(v) => self.payload.push(u8::from(*v)),
            Value::String(_) => {}
        }
        Ok(self)
    }

    /// Appends a STRING field holding arbitrary bytes.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> Result<&mut Self, RowError> {
        self.check_next(ValueType::String)?;
        let len = u32_len("string length", bytes.len())?;
        let offset = self.next_offset()?;
        self.offsets.push(offset);
        self.payload.extend_from_slice(&len.to_be_bytes());
        self.payload.extend_from_slice(bytes);
        Ok(self)
    }

    pub fn finish(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            HEADER_LEN + self.offsets.len() * OFFSET_LEN + self.payload.len(),
        );
        out.extend_from_slice(&self.version.to_be_bytes());
        // Bounded by MAX_FIELDS in next_offset.
        out.extend_from_slice(&(self.offsets.len() as u16).to_be_bytes());
        for offset in &self.offsets {
            out.extend_from_slice(&offset.to_be_bytes());
        }
        out.extend_from_slice(&self.payload);
        out
    }

    /// Offset of the next field; fails once the row is full or the payload
    /// no longer fits the `u32` offset table.
    fn next_offset(&self) -> Result<u32, RowError> {
        if self.offsets.len() >= MAX_FIELDS {
            return Err(RowError::LimitExceeded {
                limit: "field count",
                actual: self.offsets.len() + 1,
                max: MAX_FIELDS,
            });
        }
        u32_len("payload offset", self.payload.len())
    }

    fn check_next(&self, requested: ValueType) -> Result<(), RowError> {
        let Some(schema) = self.schema else {
            return Ok(());
        };
        let index = self.offsets.len();
        let Some(field) = schema.field(index) else {
            return Err(RowError::TooManyFields {
                row: index + 1,
                schema: schema.field_count(),
                version: schema.version,
            });
        };
        if field.value_type != requested {
            return Err(RowError::FieldTypeMismatch {
                index,
                name: field.name.clone(),
                declared: field.value_type,
                requested,
            });
        }
        Ok(())
    }
}

/// Encodes `values` in order under `version`.
pub fn encode_row(version: SchemaVersion, values: &[Value]) -> Result<Vec<u8>, RowError> {
    let mut writer = RowWriter::new(version);
    for value in values {
        writer.push(value)?;
    }
    Ok(writer.finish())
}

/// Encodes `values` after validating them against `schema`.
pub fn encode_row_checked(schema: &SchemaDescriptor, values: &[Value]) -> Result<Vec<u8>, RowError> {
    let mut writer = RowWriter::with_schema(schema);
    for value in values {
        writer.push(value)?;
    }
    Ok(writer.finish())
}

/// Reads the schema version header without touching the rest of the row.
pub fn peek_version(bytes: &[u8]) -> Result<SchemaVersion, RowError> {
    let mut cursor = 0usize;
    let raw = read_slice(bytes, &mut cursor, VERSION_LEN)?;
    let mut buf = [0u8; VERSION_LEN];
    buf.copy_from_slice(raw);
    Ok(u64::from_be_bytes(buf))
}

/// Lazy field accessor over one encoded row.
#[derive(Debug, Clone)]
pub struct RowReader<'a> {
    bytes: &'a [u8],
    schema: Arc<SchemaDescriptor>,
    row_version: SchemaVersion,
    row_fields: usize,
    payload_start: usize,
}

impl<'a> RowReader<'a> {
    /// Resolves the schema named by the row header through `provider`.
    pub fn decode(
        bytes: &'a [u8],
        provider: &dyn SchemaProvider,
        space_id: SpaceId,
        entity: EntityRef,
    ) -> Result<Self, RowError> {
        let version = peek_version(bytes)?;
        let schema = provider
            .resolve(space_id, entity, Some(version))
            .ok_or(RowError::UnknownSchema { version })?;
        Self::with_schema(bytes, schema)
    }

    /// Reads `bytes` with an explicit schema, regardless of the header version.
    ///
    /// Fields declared by `schema` but absent from the row read as the type
    /// default; extra trailing row fields are ignored.
    pub fn with_schema(bytes: &'a [u8], schema: Arc<SchemaDescriptor>) -> Result<Self, RowError> {
        let row_version = peek_version(bytes)?;
        let mut cursor = VERSION_LEN;
        let count = read_slice(bytes, &mut cursor, COUNT_LEN)?;
        let row_fields = u16::from_be_bytes([count[0], count[1]]) as usize;
        let payload_start = HEADER_LEN + row_fields * OFFSET_LEN;
        if payload_start > bytes.len() {
            return Err(RowError::Truncated {
                need: payload_start - HEADER_LEN,
                offset: HEADER_LEN,
                total: bytes.len(),
            });
        }
        Ok(Self {
            bytes,
            schema,
            row_version,
            row_fields,
            payload_start,
        })
    }

    pub fn schema(&self) -> &SchemaDescriptor {
        &self.schema
    }

    pub fn row_version(&self) -> SchemaVersion {
        self.row_version
    }

    /// Number of fields physically present in the row.
    pub fn stored_field_count(&self) -> usize {
        self.row_fields
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.schema.field_index(name)
    }

    pub fn get_int(&self, index: usize) -> Result<i64, RowError> {
        let Some(payload) = self.fixed_payload(index, ValueType::Int)? else {
            return Ok(0);
        };
        let mut buf = [0u8; 8];
        buf.copy_from_slice(payload);
        Ok(i64::from_be_bytes(buf))
    }

    pub fn get_double(&self, index: usize) -> Result<f64, RowError> {
        let Some(payload) = self.fixed_payload(index, ValueType::Double)? else {
            return Ok(0.0);
        };
        let mut buf = [0u8; 8];
        buf.copy_from_slice(payload);
        Ok(f64::from_be_bytes(buf))
    }

    pub fn get_bool(&self, index: usize) -> Result<bool, RowError> {
        let Some(payload) = self.fixed_payload(index, ValueType::Bool)? else {
            return Ok(false);
        };
        Ok(payload[0] != 0)
    }

    /// Raw bytes of a STRING field.
    pub fn get_bytes(&self, index: usize) -> Result<&'a [u8], RowError> {
        self.check_type(index, ValueType::String)?;
        let Some(mut cursor) = self.field_start(index)? else {
            return Ok(&[]);
        };
        let len = read_slice(self.bytes, &mut cursor, 4)?;
        let len = u32::from_be_bytes([len[0], len[1], len[2], len[3]]) as usize;
        read_slice(self.bytes, &mut cursor, len)
    }

    pub fn get_str(&self, index: usize) -> Result<&'a str, RowError> {
        let bytes = self.get_bytes(index)?;
        std::str::from_utf8(bytes).map_err(|_| RowError::InvalidUtf8 { index })
    }

    /// Materializes every schema field in order.
    pub fn values(&self) -> Result<Vec<Value>, RowError> {
        (0..self.schema.field_count())
            .map(|index| self.read_value(index))
            .collect()
    }

    fn check_type(&self, index: usize, requested: ValueType) -> Result<(), RowError> {
        let field = self.schema.field(index).ok_or(RowError::FieldOutOfRange {
            index,
            count: self.schema.field_count(),
        })?;
        if field.value_type != requested {
            return Err(RowError::FieldTypeMismatch {
                index,
                name: field.name.clone(),
                declared: field.value_type,
                requested,
            });
        }
        Ok(())
    }

    /// Absolute start of a stored field, `None` when the row predates it.
    fn field_start(&self, index: usize) -> Result<Option<usize>, RowError> {
        if index >= self.row_fields {
            return Ok(None);
        }
        let mut cursor = HEADER_LEN + index * OFFSET_LEN;
        let raw = read_slice(self.bytes, &mut cursor, OFFSET_LEN)?;
        let offset = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize;
        Ok(Some(self.payload_start.saturating_add(offset)))
    }

    fn fixed_payload(
        &self,
        index: usize,
        requested: ValueType,
    ) -> Result<Option<&'a [u8]>, RowError> {
        self.check_type(index, requested)?;
        let Some(mut cursor) = self.field_start(index)? else {
            return Ok(None);
        };
        let width = requested.fixed_width().unwrap_or(0);
        read_slice(self.bytes, &mut cursor, width).map(Some)
    }
}

impl FieldAccessor for RowReader<'_> {
    fn field_count(&self) -> usize {
        self.schema.field_count()
    }

    fn field_name(&self, index: usize) -> Option<&str> {
        self.schema.field(index).map(|f| f.name.as_str())
    }

    fn field_type(&self, index: usize) -> Option<ValueType> {
        self.schema.field(index).map(|f| f.value_type)
    }

    fn read_value(&self, index: usize) -> Result<Value, RowError> {
        let declared = self.field_type(index).ok_or(RowError::FieldOutOfRange {
            index,
            count: self.schema.field_count(),
        })?;
        match declared {
            ValueType::Int => self.get_int(index).map(Value::Int),
            ValueType::Double => self.get_double(index).map(Value::Double),
            ValueType::Bool => self.get_bool(index).map(Value::Bool),
            ValueType::String => self.get_str(index).map(|s| Value::String(s.to_string())),
        }
    }
}

fn u32_len(limit: &'static str, len: usize) -> Result<u32, RowError> {
    u32::try_from(len).map_err(|_| RowError::LimitExceeded {
        limit,
        actual: len,
        max: MAX_U32,
    })
}

fn read_slice<'a>(bytes: &'a [u8], cursor: &mut usize, len: usize) -> Result<&'a [u8], RowError> {
    let end = cursor.saturating_add(len);
    if end > bytes.len() {
        return Err(RowError::Truncated {
            need: len,
            offset: *cursor,
            total: bytes.len(),
        });
    }
    let out = &bytes[*cursor..end];
    *cursor = end;
    Ok(out)
}
