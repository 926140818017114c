//! A syslog ingestion sidecar.
//!
//! The pipeline accepts RFC 3164 and RFC 5424 messages over TCP, UDP, UNIX
//! datagram and TCP-over-TLS, parses them with automatic format detection,
//! encodes each message into a compact self-describing packed record, and
//! hands every record to a pluggable downstream broker. Records the broker
//! cannot take are diverted to a writer for a later drain. A selector engine
//! maps each record's facility/severity pair to operator-named targets.
//!
//! Data flow:
//!
//! ```text
//! listener -> part-map (+ parse error) -> receiver queue -> severity gate
//!          -> packed record in a pooled message -> producer inbox
//!          -> broker, or writer inbox on failure
//! ```
//!
//! The blocks are wired by the hosting process: construct a
//! [`SyslogReceiver`], spawn a producer with [`producer::spawn`], and
//! install the resulting handle into the receiver. Downstream consumers
//! decode records with [`record::PackedRecord::unpack`] and resolve their
//! destinations through a [`Router`].

pub mod config;
pub mod producer;
pub mod receiver;
pub mod record;
pub mod router;
pub mod server;

pub use config::{ConfLoader, ConfigError, SyslogConfig};
pub use producer::{
    BrokerError, MessageProducer, ProducerControl, ProducerHandle, ServerConnection, WriterHandle,
};
pub use receiver::{ReceiverError, SyslogReceiver};
pub use record::{
    LogParts, Message, PackedRecord, PartValue, RecordError, RecordPriority, RecordSchema, pool,
};
pub use router::{RouteEntry, Router, RouterError, SelectorMatch, TargetFinder};
pub use server::{ParseError, ParsedFrame};
