//! Configuration folder access and the receiver configuration record.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde::de::DeserializeOwned;
use snafu::{ResultExt, Snafu, ensure};

/// Name of the receiver's configuration document.
pub const RECEIVER_CONFIG_NAME: &str = "syslogreceiver";

/// An error raised while loading or validating configuration.
#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("failed to read configuration file {}: {source}", path.display()))]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("failed to parse configuration file {}: {source}", path.display()))]
    ParseFile {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[snafu(display("severity level {level} is outside -1..=7"))]
    SeverityOutOfRange { level: i8 },

    #[snafu(display("no syslog transport is configured"))]
    NoTransports,
}

/// Reads named JSON configuration documents from a configuration folder.
///
/// Each block of the pipeline loads its own document: the receiver reads
/// `syslogreceiver.json`, the routing table lives in `syslogconf.json`, and
/// broker plugins read whatever documents they need over the same loader.
#[derive(Debug, Clone)]
pub struct ConfLoader {
    folder: PathBuf,
}

impl ConfLoader {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
        }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Path of the named document inside the folder.
    pub fn path_of(&self, name: &str) -> PathBuf {
        self.folder.join(format!("{name}.json"))
    }

    /// Loads and deserializes the named document.
    pub fn load<T: DeserializeOwned>(&self, name: &str) -> Result<T, ConfigError> {
        let path = self.path_of(name);
        let raw = fs::read(&path).context(ReadFileSnafu { path: path.clone() })?;
        serde_json::from_slice(&raw).context(ParseFileSnafu { path })
    }
}

const fn default_severity_level() -> i8 {
    7
}

/// Configuration of the syslog receiver and its transports.
///
/// An empty address or path disables that transport; at least one transport
/// must remain. TLS additionally requires all three certificate paths to
/// point at loadable material.
#[derive(Debug, Clone, Deserialize)]
pub struct SyslogConfig {
    /// Highest severity that is still processed, `-1..=7`.
    ///
    /// Severity 0 is an unusable system, 7 is a debug message. Records with a
    /// severity above this level are discarded; `-1` discards everything.
    /// Records without a severity and unparseable frames always pass.
    #[serde(default = "default_severity_level")]
    pub severity_level: i8,

    /// `host:port` of the plaintext TCP listener.
    #[serde(default)]
    pub addr_tcp: String,

    /// `host:port` of the UDP receiver.
    #[serde(default)]
    pub addr_udp: String,

    /// `host:port` of the TCP-over-TLS listener.
    #[serde(default)]
    pub addr_tcp_tls: String,

    /// Filesystem path of the UNIX datagram socket.
    #[serde(default)]
    pub uds_path: String,

    #[serde(default)]
    pub client_cert_path: String,

    #[serde(default)]
    pub client_key_path: String,

    #[serde(default)]
    pub root_ca_path: String,
}

impl Default for SyslogConfig {
    fn default() -> Self {
        Self {
            severity_level: default_severity_level(),
            addr_tcp: String::new(),
            addr_udp: String::new(),
            addr_tcp_tls: String::new(),
            uds_path: String::new(),
            client_cert_path: String::new(),
            client_key_path: String::new(),
            root_ca_path: String::new(),
        }
    }
}

impl SyslogConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(
            (-1..=7).contains(&self.severity_level),
            SeverityOutOfRangeSnafu {
                level: self.severity_level
            }
        );
        ensure!(
            !(self.addr_tcp.is_empty()
                && self.addr_udp.is_empty()
                && self.addr_tcp_tls.is_empty()
                && self.uds_path.is_empty()),
            NoTransportsSnafu
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn loads_named_documents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("syslogreceiver.json");
        let mut file = fs::File::create(&path).expect("create file");
        write!(
            file,
            r#"{{"severity_level": 5, "addr_tcp": "127.0.0.1:5141"}}"#
        )
        .expect("write file");

        let loader = ConfLoader::new(dir.path());
        let config: SyslogConfig = loader.load(RECEIVER_CONFIG_NAME).expect("load succeeds");
        assert_eq!(config.severity_level, 5);
        assert_eq!(config.addr_tcp, "127.0.0.1:5141");
        assert_eq!(config.addr_udp, "");
        config.validate().expect("config is valid");
    }

    #[test]
    fn missing_document_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let loader = ConfLoader::new(dir.path());
        let result: Result<SyslogConfig, _> = loader.load("nothere");
        assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
    }

    #[test]
    fn validation_requires_a_transport() {
        let config = SyslogConfig::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NoTransports)
        ));
    }

    #[test]
    fn validation_bounds_severity_level() {
        let config = SyslogConfig {
            severity_level: 8,
            addr_udp: "127.0.0.1:5141".into(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::SeverityOutOfRange { level: 8 })
        ));
    }
}
