//! TLS Material
//!
//! Builds `tokio-rustls` acceptors and connectors from PEM files. Only the
//! ring provider is compiled in; protocol versions are rustls' safe defaults.
//! TLS is only offered over TCP endpoints.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::{self, pki_types::CertificateDer, pki_types::ServerName};
use tokio_rustls::{TlsAcceptor, TlsConnector};

/// Errors loading TLS material
#[derive(Debug, Error)]
pub enum TlsError {
    /// PEM file could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        /// File path
        path: String,
        /// Underlying IO error
        source: std::io::Error,
    },

    /// PEM file held no certificates
    #[error("no certificates found in {0}")]
    NoCertificates(String),

    /// PEM file held no private key
    #[error("no private key found in {0}")]
    NoPrivateKey(String),

    /// Server name is not a valid DNS name or IP address
    #[error("invalid TLS server name '{0}'")]
    InvalidServerName(String),

    /// rustls rejected the configuration
    #[error("TLS configuration rejected: {0}")]
    Rustls(#[from] rustls::Error),
}

fn provider() -> Arc<rustls::crypto::CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn open(path: &Path) -> Result<BufReader<File>, TlsError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| TlsError::Io {
            path: path.display().to_string(),
            source,
        })
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Io {
            path: path.display().to_string(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.display().to_string()));
    }
    Ok(certs)
}

/// Build a server-side acceptor from a certificate chain and private key
///
/// # Errors
///
/// Returns an error if either file is unreadable or unusable.
pub fn server_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor, TlsError> {
    let certs = load_certs(cert_path)?;
    let mut reader = open(key_path)?;
    let key = rustls_pemfile::private_key(&mut reader)
        .map_err(|source| TlsError::Io {
            path: key_path.display().to_string(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(key_path.display().to_string()))?;

    let config = rustls::ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;

    tracing::debug!(cert = %cert_path.display(), "TLS acceptor configured");
    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Client-side TLS settings: trust roots plus the name to verify
#[derive(Clone)]
pub struct ClientTls {
    connector: TlsConnector,
    server_name: ServerName<'static>,
}

impl ClientTls {
    /// Trust the certificates in `ca_path` and expect the server to present
    /// `server_name`
    ///
    /// # Errors
    ///
    /// Returns an error if the CA file is unusable or the name is invalid.
    pub fn new(ca_path: &Path, server_name: &str) -> Result<Self, TlsError> {
        let mut roots = rustls::RootCertStore::empty();
        for cert in load_certs(ca_path)? {
            roots.add(cert)?;
        }

        let config = rustls::ClientConfig::builder_with_provider(provider())
            .with_safe_default_protocol_versions()?
            .with_root_certificates(roots)
            .with_no_client_auth();

        let server_name = ServerName::try_from(server_name.to_string())
            .map_err(|_| TlsError::InvalidServerName(server_name.to_string()))?;

        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
            server_name,
        })
    }

    /// Run the client handshake over an established TCP stream
    ///
    /// # Errors
    ///
    /// Returns the handshake failure as an IO error.
    pub async fn connect(&self, stream: TcpStream) -> std::io::Result<TlsStream<TcpStream>> {
        self.connector
            .connect(self.server_name.clone(), stream)
            .await
    }
}

impl std::fmt::Debug for ClientTls {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientTls")
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

/// Host part of a `host:port` address, used as the default TLS server name
#[must_use]
pub fn host_of(addr: &str) -> &str {
    let host = addr.rsplit_once(':').map_or(addr, |(host, _)| host);
    host.trim_start_matches('[').trim_end_matches(']')
}
