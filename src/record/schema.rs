//! Field schemas for the three packed record shapes, plus the syslog
//! facility and severity name tables.

/// Name of the self-describing format field added to RFC records.
pub const RFC_KEY: &str = "rfc";
pub const PRIORITY_KEY: &str = "priority";
pub const FACILITY_KEY: &str = "facility";
pub const SEVERITY_KEY: &str = "severity";
pub const VERSION_KEY: &str = "version";
pub const TIMESTAMP_KEY: &str = "timestamp";
pub const HOSTNAME_KEY: &str = "hostname";
pub const APP_NAME_KEY: &str = "app_name";
pub const PROC_ID_KEY: &str = "proc_id";
pub const MSG_ID_KEY: &str = "msg_id";
pub const MESSAGE_KEY: &str = "message";
pub const CONTENT_KEY: &str = "content";

/// Field present only in RFC 3164 part-maps; its presence selects that shape.
pub const TAG_KEY: &str = "tag";
/// Field present only in RFC 5424 part-maps; its presence selects that shape.
pub const STRUCTURED_DATA_KEY: &str = "structured_data";
/// The single field of a former-message record: the raw unparseable frame.
pub const FORMER_MESSAGE_KEY: &str = "data";

pub const RFC3164: &str = "RFC3164";
pub const RFC5424: &str = "RFC5424";

/// Field names of each record shape, in wire order.
pub const FORMER_MESSAGE_FIELDS: [&str; 1] = [FORMER_MESSAGE_KEY];

pub const RFC3164_FIELDS: [&str; 8] = [
    RFC_KEY,
    PRIORITY_KEY,
    FACILITY_KEY,
    SEVERITY_KEY,
    TIMESTAMP_KEY,
    HOSTNAME_KEY,
    TAG_KEY,
    CONTENT_KEY,
];

pub const RFC5424_FIELDS: [&str; 12] = [
    RFC_KEY,
    PRIORITY_KEY,
    FACILITY_KEY,
    SEVERITY_KEY,
    VERSION_KEY,
    TIMESTAMP_KEY,
    HOSTNAME_KEY,
    APP_NAME_KEY,
    PROC_ID_KEY,
    MSG_ID_KEY,
    STRUCTURED_DATA_KEY,
    MESSAGE_KEY,
];

/// The three record shapes a packed record can take. The field count doubles
/// as the on-wire schema discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordSchema {
    /// A frame the parser rejected, carried verbatim in a single field.
    Former,
    Rfc3164,
    Rfc5424,
}

impl RecordSchema {
    /// The on-wire discriminant: the number of schema fields.
    pub const fn count(self) -> usize {
        match self {
            RecordSchema::Former => FORMER_MESSAGE_FIELDS.len(),
            RecordSchema::Rfc3164 => RFC3164_FIELDS.len(),
            RecordSchema::Rfc5424 => RFC5424_FIELDS.len(),
        }
    }

    pub fn from_count(count: usize) -> Option<Self> {
        match count {
            1 => Some(RecordSchema::Former),
            8 => Some(RecordSchema::Rfc3164),
            12 => Some(RecordSchema::Rfc5424),
            _ => None,
        }
    }

    pub const fn fields(self) -> &'static [&'static str] {
        match self {
            RecordSchema::Former => &FORMER_MESSAGE_FIELDS,
            RecordSchema::Rfc3164 => &RFC3164_FIELDS,
            RecordSchema::Rfc5424 => &RFC5424_FIELDS,
        }
    }

    /// The literal stored in the `rfc` field, absent for former-messages.
    pub const fn rfc_name(self) -> Option<&'static str> {
        match self {
            RecordSchema::Former => None,
            RecordSchema::Rfc3164 => Some(RFC3164),
            RecordSchema::Rfc5424 => Some(RFC5424),
        }
    }
}

/// Facility code/name pairs. Codes 12..=15 are not assigned a routable name.
pub const FACILITY_NAMES: [(u8, &str); 20] = [
    (0, "kern"),
    (1, "user"),
    (2, "mail"),
    (3, "daemon"),
    (4, "auth"),
    (5, "syslog"),
    (6, "lpr"),
    (7, "news"),
    (8, "uucp"),
    (9, "cron"),
    (10, "authpriv"),
    (11, "ftp"),
    (16, "local0"),
    (17, "local1"),
    (18, "local2"),
    (19, "local3"),
    (20, "local4"),
    (21, "local5"),
    (22, "local6"),
    (23, "local7"),
];

/// Severity names indexed by code.
pub const SEVERITY_NAMES: [&str; 8] = [
    "emerg", "alert", "crit", "err", "warning", "notice", "info", "debug",
];

pub fn facility_name(code: u8) -> Option<&'static str> {
    FACILITY_NAMES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| *name)
}

pub fn facility_code(name: &str) -> Option<u8> {
    FACILITY_NAMES
        .iter()
        .find(|(_, n)| *n == name)
        .map(|(code, _)| *code)
}

pub fn severity_name(code: u8) -> Option<&'static str> {
    SEVERITY_NAMES.get(usize::from(code)).copied()
}

pub fn severity_code(name: &str) -> Option<u8> {
    SEVERITY_NAMES
        .iter()
        .position(|n| *n == name)
        .map(|index| index as u8)
}

pub fn is_facility(name: &str) -> bool {
    facility_code(name).is_some()
}

pub fn is_severity(name: &str) -> bool {
    severity_code(name).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_match_discriminants() {
        assert_eq!(RecordSchema::Former.count(), 1);
        assert_eq!(RecordSchema::Rfc3164.count(), 8);
        assert_eq!(RecordSchema::Rfc5424.count(), 12);
        for schema in [
            RecordSchema::Former,
            RecordSchema::Rfc3164,
            RecordSchema::Rfc5424,
        ] {
            assert_eq!(RecordSchema::from_count(schema.count()), Some(schema));
            assert_eq!(schema.fields().len(), schema.count());
        }
        assert_eq!(RecordSchema::from_count(0), None);
        assert_eq!(RecordSchema::from_count(7), None);
    }

    #[test]
    fn name_tables_are_bidirectional() {
        for (code, name) in FACILITY_NAMES {
            assert_eq!(facility_name(code), Some(name));
            assert_eq!(facility_code(name), Some(code));
        }
        for (code, name) in SEVERITY_NAMES.iter().enumerate() {
            assert_eq!(severity_name(code as u8), Some(*name));
            assert_eq!(severity_code(name), Some(code as u8));
        }
        assert_eq!(facility_name(12), None);
        assert_eq!(facility_name(24), None);
        assert!(!is_facility("ntp"));
        assert!(!is_severity("fatal"));
    }
}
