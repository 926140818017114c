//! TLS acceptor construction for the TCP-over-TLS listener.

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use snafu::{OptionExt, ResultExt, Snafu, ensure};
use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::{self, RootCertStore, ServerConfig};

/// An error raised while loading TLS material.
#[derive(Debug, Snafu)]
pub enum TlsError {
    #[snafu(display("failed to read TLS material from {path}: {source}"))]
    ReadMaterial {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display("no certificates found in {path}"))]
    EmptyCertChain { path: String },

    #[snafu(display("no private key found in {path}"))]
    MissingKey { path: String },

    #[snafu(display("no CA certificates found in {path}"))]
    EmptyCaPool { path: String },

    #[snafu(display("invalid TLS material: {source}"))]
    BadMaterial { source: rustls::Error },
}

/// Builds the acceptor for the TLS listener.
///
/// Returns `None` when any of the three paths is empty: the transport is
/// silently disabled. Material that is present but does not load is an
/// error, surfaced at init rather than at the first handshake. The CA pool
/// must load even though syslog peers are not client-authenticated.
/// Minimum protocol version is TLS 1.2.
pub(crate) fn tls_acceptor(
    cert_path: &str,
    key_path: &str,
    ca_path: &str,
) -> Result<Option<TlsAcceptor>, TlsError> {
    if cert_path.is_empty() || key_path.is_empty() || ca_path.is_empty() {
        return Ok(None);
    }

    let certs = load_certs(cert_path)?;
    ensure!(!certs.is_empty(), EmptyCertChainSnafu { path: cert_path });
    let key = load_key(key_path)?;

    let ca = load_certs(ca_path)?;
    ensure!(!ca.is_empty(), EmptyCaPoolSnafu { path: ca_path });
    let mut roots = RootCertStore::empty();
    for cert in ca {
        roots.add(cert).context(BadMaterialSnafu)?;
    }

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])
        .context(BadMaterialSnafu)?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context(BadMaterialSnafu)?;

    Ok(Some(TlsAcceptor::from(Arc::new(config))))
}

fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let file = File::open(path).context(ReadMaterialSnafu { path })?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .context(ReadMaterialSnafu { path })
}

fn load_key(path: &str) -> Result<PrivateKeyDer<'static>, TlsError> {
    let file = File::open(path).context(ReadMaterialSnafu { path })?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .context(ReadMaterialSnafu { path })?
        .context(MissingKeySnafu { path })
}
