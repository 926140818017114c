//! Frame parsing: raw transport bytes into part-maps.
//!
//! Every transport feeds its frames through [`parse_frame`]. Format
//! detection is automatic: RFC 5424 is attempted first, then RFC 3164.
//! Frames that match neither are not dropped; they travel on as
//! former-messages with the parse error attached.

use std::fmt::Write as _;

use chrono::{Datelike, Utc};
use snafu::Snafu;
use syslog_loose::{IncompleteDate, Message, Protocol, StructuredElement, Variant};

use crate::record::schema::{
    APP_NAME_KEY, CONTENT_KEY, FACILITY_KEY, FORMER_MESSAGE_KEY, HOSTNAME_KEY, MESSAGE_KEY,
    MSG_ID_KEY, PRIORITY_KEY, PROC_ID_KEY, SEVERITY_KEY, STRUCTURED_DATA_KEY, TAG_KEY,
    TIMESTAMP_KEY, VERSION_KEY,
};
use crate::record::{LogParts, PartValue};

/// A frame the syslog parser rejected.
#[derive(Debug, Clone, Snafu)]
#[snafu(display("{reason}"))]
pub struct ParseError {
    reason: String,
}

impl ParseError {
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// One parsed frame on its way to the drain queue.
#[derive(Debug)]
pub struct ParsedFrame {
    pub parts: LogParts,
    pub error: Option<ParseError>,
}

/// Parses one frame. Returns `None` for frames that are empty after
/// trimming; the transports deliver plenty of bare newlines.
pub fn parse_frame(frame: &[u8]) -> Option<ParsedFrame> {
    let line = String::from_utf8_lossy(frame);
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match syslog_loose::parse_message_with_year_exact(line, resolve_year, Variant::Either) {
        Ok(message) => Some(ParsedFrame {
            parts: to_parts(message),
            error: None,
        }),
        Err(reason) => Some(ParsedFrame {
            parts: LogParts::from([(FORMER_MESSAGE_KEY, PartValue::Text(line.to_string()))]),
            error: Some(ParseError { reason }),
        }),
    }
}

/// Resolves the year for RFC 3164 timestamps, which carry none. A December
/// timestamp seen in January belongs to the year that just ended.
fn resolve_year((month, _date, _hour, _min, _sec): IncompleteDate) -> i32 {
    let now = Utc::now();
    if now.month() == 1 && month == 12 {
        now.year() - 1
    } else {
        now.year()
    }
}

fn to_parts(message: Message<&str>) -> LogParts {
    let mut parts = LogParts::new();

    if let (Some(facility), Some(severity)) = (message.facility, message.severity) {
        parts.insert(
            PRIORITY_KEY,
            PartValue::Int(facility as i64 * 8 + severity as i64),
        );
        parts.insert(FACILITY_KEY, PartValue::Int(facility as i64));
        parts.insert(SEVERITY_KEY, PartValue::Int(severity as i64));
    }
    if let Some(ts) = message.timestamp {
        parts.insert(TIMESTAMP_KEY, PartValue::Timestamp(ts.with_timezone(&Utc)));
    }
    if let Some(hostname) = message.hostname {
        parts.insert(HOSTNAME_KEY, PartValue::Text(hostname.to_string()));
    }

    match message.protocol {
        Protocol::RFC3164 => {
            // The 3164 tag is what the parser reports as the app name.
            parts.insert(
                TAG_KEY,
                PartValue::Text(message.appname.unwrap_or_default().to_string()),
            );
            parts.insert(CONTENT_KEY, PartValue::Text(message.msg.to_string()));
        }
        Protocol::RFC5424(version) => {
            parts.insert(VERSION_KEY, PartValue::Int(i64::from(version)));
            if let Some(appname) = message.appname {
                parts.insert(APP_NAME_KEY, PartValue::Text(appname.to_string()));
            }
            if let Some(procid) = message.procid {
                parts.insert(PROC_ID_KEY, PartValue::Text(procid.to_string()));
            }
            if let Some(msgid) = message.msgid {
                parts.insert(MSG_ID_KEY, PartValue::Text(msgid.to_string()));
            }
            parts.insert(
                STRUCTURED_DATA_KEY,
                PartValue::Text(render_structured_data(&message.structured_data)),
            );
            parts.insert(MESSAGE_KEY, PartValue::Text(message.msg.to_string()));
        }
    }
    parts
}

fn render_structured_data(elements: &[StructuredElement<&str>]) -> String {
    let mut out = String::new();
    for element in elements {
        out.push('[');
        out.push_str(element.id);
        for (name, value) in element.params() {
            let _ = write!(out, " {name}=\"{value}\"");
        }
        out.push(']');
    }
    out
}
