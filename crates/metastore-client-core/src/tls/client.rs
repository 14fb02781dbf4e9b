//! TLS connector for the metastore socket layer.
//!
//! The trust store is a PEM bundle of CA certificates. Loading failures are
//! configuration problems and surface before any connection attempt.

use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::crypto::ring::default_provider;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName};
use rustls::RootCertStore;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector as TokioTlsConnector;
use tracing::{debug, warn};

use crate::config::TlsConfig;
use crate::error::{ClientError, ConfigError, TlsError, TlsResult};

/// Install the ring crypto provider if not already installed.
fn ensure_crypto_provider() {
    let _ = CryptoProvider::install_default(default_provider());
}

/// Wraps freshly connected sockets in TLS, verifying against the trust store.
#[derive(Clone)]
pub struct TlsConnector {
    inner: TokioTlsConnector,
}

impl std::fmt::Debug for TlsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConnector").finish_non_exhaustive()
    }
}

impl TlsConnector {
    /// Build a connector from the trust store named in `config`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a blank path or a non-PEM trust
    /// store type, and a TLS error when the file cannot be read or holds no
    /// certificates.
    pub fn new(config: &TlsConfig) -> Result<Self, ClientError> {
        if config.truststore_path.trim().is_empty() {
            return Err(ConfigError::MissingTrustStore.into());
        }
        if !config.truststore_type.eq_ignore_ascii_case("PEM") {
            return Err(
                ConfigError::UnsupportedTrustStoreType(config.truststore_type.clone()).into(),
            );
        }
        ensure_crypto_provider();
        let root_store = build_root_store(Path::new(config.truststore_path.trim()))?;
        Ok(Self::from_root_store(root_store))
    }

    /// Connector trusting the bundled Mozilla roots.
    #[must_use]
    pub fn with_webpki_roots() -> Self {
        ensure_crypto_provider();
        let mut root_store = RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        Self::from_root_store(root_store)
    }

    fn from_root_store(root_store: RootCertStore) -> Self {
        let client_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();
        Self {
            inner: TokioTlsConnector::from(Arc::new(client_config)),
        }
    }

    /// Perform the TLS handshake over a connected socket.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the host is not a valid server name or the
    /// handshake fails.
    pub async fn connect(
        &self,
        server_name: &str,
        stream: TcpStream,
    ) -> std::io::Result<TlsStream<TcpStream>> {
        let server_name = ServerName::try_from(server_name.to_string()).map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid server name: {e}"),
            )
        })?;
        debug!("initiating TLS handshake");
        self.inner.connect(server_name, stream).await
    }
}

/// Build the root certificate store from a PEM trust store.
fn build_root_store(path: &Path) -> TlsResult<RootCertStore> {
    let mut root_store = RootCertStore::empty();
    let certs = load_certificates(path)?;
    let (added, ignored) = root_store.add_parsable_certificates(certs);
    debug!(added, ignored, path = %path.display(), "loaded trust store");
    if added == 0 {
        return Err(TlsError::NoCertificates(path.display().to_string()));
    }
    Ok(root_store)
}

/// Load certificates from a PEM file.
fn load_certificates(path: &Path) -> TlsResult<Vec<CertificateDer<'static>>> {
    let file = std::fs::File::open(path).map_err(|e| TlsError::CertificateRead {
        path: path.display().to_string(),
        source: e,
    })?;

    let mut reader = BufReader::new(file);
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut reader)
        .filter_map(|result| match result {
            Ok(cert) => Some(cert),
            Err(e) => {
                warn!(error = %e, "skipping invalid certificate");
                None
            }
        })
        .collect();

    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.display().to_string()));
    }
    Ok(certs)
}
