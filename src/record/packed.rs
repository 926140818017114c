use std::collections::HashMap;

use snafu::{OptionExt, ResultExt, Snafu, ensure};

use super::parts::{Parts, PartsError};
use super::schema::{RFC_KEY, RecordSchema, STRUCTURED_DATA_KEY, TAG_KEY};
use super::{LogParts, PartValue};

/// An error raised while packing or unpacking a record.
#[derive(Debug, Snafu)]
pub enum RecordError {
    #[snafu(display("cannot pack an empty part map"))]
    EmptyParts,

    #[snafu(display("field {field} is {len} chars long, too long for a length prefix"))]
    FieldTooLong { field: &'static str, len: usize },

    #[snafu(display("packed record carries an unknown schema discriminant {count}"))]
    WrongMessage { count: usize },

    #[snafu(display("packed record is truncated: {source}"))]
    Truncated { source: PartsError },

    #[snafu(display("part {name} appears more than once"))]
    DuplicatePart { name: &'static str },
}

/// Which priority a packed record carries, read without a full unpack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordPriority {
    /// Former-message records have no numeric priority.
    Former,
    /// The raw `priority` field of an RFC record.
    Pri(String),
}

/// Schema-driven packed encoding of one syslog message.
///
/// The wire shape is a character buffer whose first `count + 1` characters
/// are the header (`count` selects the schema, then one length per field),
/// followed by the field payloads concatenated in schema order. Absent
/// fields encode as length zero.
#[derive(Debug, Clone)]
pub struct PackedRecord {
    parts: Parts,
}

impl Default for PackedRecord {
    fn default() -> Self {
        Self::new()
    }
}

impl PackedRecord {
    pub fn new() -> Self {
        Self {
            parts: Parts::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            parts: Parts::with_capacity(capacity),
        }
    }

    /// The schema this record was packed with. Fails on an empty buffer or
    /// an unknown discriminant.
    pub fn schema(&self) -> Result<RecordSchema, RecordError> {
        let count = self.parts.char_at(0).context(TruncatedSnafu)? as usize;
        RecordSchema::from_count(count).context(WrongMessageSnafu { count })
    }

    /// Encodes a part-map into this record, overwriting previous contents.
    ///
    /// The schema is chosen by the inputs: a parse error forces the
    /// former-message shape; otherwise the presence of `structured_data`
    /// selects RFC 5424, the presence of `tag` selects RFC 3164, and
    /// anything else falls back to former-message. For RFC shapes the `rfc`
    /// field is written into `parts` before encoding.
    pub fn pack(
        &mut self,
        parts: &mut LogParts,
        parse_error: Option<&str>,
    ) -> Result<(), RecordError> {
        ensure!(!parts.is_empty(), EmptyPartsSnafu);

        let schema = if parse_error.is_some() {
            RecordSchema::Former
        } else if parts.contains_key(STRUCTURED_DATA_KEY) {
            RecordSchema::Rfc5424
        } else if parts.contains_key(TAG_KEY) {
            RecordSchema::Rfc3164
        } else {
            RecordSchema::Former
        };

        if let Some(rfc) = schema.rfc_name() {
            parts.insert(RFC_KEY, PartValue::Text(rfc.to_string()));
        }

        let count = schema.count();
        self.parts.rewind();
        self.parts.append_char(length_char(count, "count")?);
        for _ in 0..count {
            self.parts.append_char('\0');
        }

        for (index, &field) in schema.fields().iter().enumerate() {
            let written = match parts.get(field) {
                Some(value) => self.parts.append_text(&value.render()),
                None => 0,
            };
            self.parts
                .set_char_at(index + 1, length_char(written, field)?)
                .context(TruncatedSnafu)?;
        }
        Ok(())
    }

    /// Decodes the record, calling `put` exactly once per schema field.
    /// Absent fields are reported as empty strings.
    pub fn unpack<F>(&mut self, mut put: F) -> Result<(), RecordError>
    where
        F: FnMut(&'static str, String) -> Result<(), RecordError>,
    {
        let schema = self.schema()?;
        let count = schema.count();
        self.parts.rewind();
        self.parts.skip(count + 1).context(TruncatedSnafu)?;
        for (index, &field) in schema.fields().iter().enumerate() {
            let len = self.parts.char_at(index + 1).context(TruncatedSnafu)? as usize;
            let value = self.parts.part(len).context(TruncatedSnafu)?;
            put(field, value)?;
        }
        Ok(())
    }

    /// Decodes the record into a `field name → value` map.
    pub fn unpack_to_map(&mut self) -> Result<HashMap<&'static str, String>, RecordError> {
        let mut map = HashMap::new();
        self.unpack(|name, value| {
            ensure!(map.insert(name, value).is_none(), DuplicatePartSnafu { name });
            Ok(())
        })?;
        Ok(map)
    }

    /// Reads the `priority` field without decoding the whole record.
    pub fn priority(&self) -> Result<RecordPriority, RecordError> {
        let schema = self.schema()?;
        if schema == RecordSchema::Former {
            return Ok(RecordPriority::Former);
        }
        let count = schema.count();
        let rfc_len = self.parts.char_at(1).context(TruncatedSnafu)? as usize;
        let pri_len = self.parts.char_at(2).context(TruncatedSnafu)? as usize;
        let start = count + 1 + rfc_len;
        let value = self
            .parts
            .read_at(start, pri_len)
            .context(TruncatedSnafu)?;
        Ok(RecordPriority::Pri(value))
    }
}

fn length_char(len: usize, field: &'static str) -> Result<char, RecordError> {
    u32::try_from(len)
        .ok()
        .and_then(char::from_u32)
        .context(FieldTooLongSnafu { field, len })
}
