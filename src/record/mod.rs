//! The packed record format and its surrounding types.
//!
//! A parsed syslog message travels through the pipeline as a part-map
//! (`field name → value`), is encoded into a [`PackedRecord`] inside a
//! pooled [`Message`], and is decoded again by the downstream consumer.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};

mod packed;
mod parts;
pub mod pool;
pub mod schema;

pub use packed::{PackedRecord, RecordError, RecordPriority};
pub use parts::{Parts, PartsError};
pub use schema::RecordSchema;

/// Key under which the packed record travels inside a pooled message.
pub const SYSLOG_MESSAGE_KEY: &str = "syslogmessage";

/// A single syslog field value before packing.
///
/// Values keep their parsed type until encoding; `render` applies the
/// stringification the wire format requires: text as-is, integers base-10,
/// timestamps RFC 3339 UTC.
#[derive(Debug, Clone, PartialEq)]
pub enum PartValue {
    Text(String),
    Int(i64),
    Timestamp(DateTime<Utc>),
}

impl PartValue {
    pub fn render(&self) -> String {
        match self {
            PartValue::Text(text) => text.clone(),
            PartValue::Int(value) => value.to_string(),
            PartValue::Timestamp(ts) => ts.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            PartValue::Int(value) => Some(*value),
            _ => None,
        }
    }
}

impl From<&str> for PartValue {
    fn from(text: &str) -> Self {
        PartValue::Text(text.to_string())
    }
}

impl From<i64> for PartValue {
    fn from(value: i64) -> Self {
        PartValue::Int(value)
    }
}

/// A parsed syslog message as a `field name → value` map.
pub type LogParts = HashMap<&'static str, PartValue>;

/// A pooled pipeline message: one packed record plus delivery metadata.
///
/// Messages are borrowed from the [`pool`] by the receiver and released back
/// by the producer after a successful publish, or by whichever downstream
/// consumer decodes them. Releasing does not reset the record contents; the
/// next `pack` overwrites them, and the pool clears the origin marker when
/// the message is borrowed again.
#[derive(Debug)]
pub struct Message {
    record: PackedRecord,
    origin: Option<Arc<str>>,
}

impl Message {
    pub(crate) fn preallocated() -> Self {
        Self {
            record: PackedRecord::with_capacity(parts::INITIAL_CAPACITY),
            origin: None,
        }
    }

    /// The packed record in the `syslogmessage` slot.
    pub fn record(&self) -> &PackedRecord {
        &self.record
    }

    pub fn record_mut(&mut self) -> &mut PackedRecord {
        &mut self.record
    }

    /// The diversion origin marker, if the message has been diverted.
    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    pub fn set_origin(&mut self, origin: Arc<str>) {
        self.origin = Some(origin);
    }

    pub fn clear_origin(&mut self) {
        self.origin = None;
    }
}
