//! Builds an open, authenticated RPC channel to one endpoint.
//!
//! Layering, outermost last:
//! 1. TCP socket bounded by the connect timeout, wrapped in TLS when enabled
//! 2. SASL: DIGEST-MD5 when a delegation token is available, otherwise
//!    GSSAPI when a Kerberos principal is configured. SASL transports are
//!    always length-framed after negotiation. Without SASL, framing follows
//!    `use_framed_transport`.
//! 3. Compact or binary wire encoding
//!
//! Failures other than configuration errors are tagged with the endpoint and
//! never retried here.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use super::{Framing, MetaStream, ThriftTransport};
use crate::auth::principal::ServicePrincipal;
use crate::auth::sasl::{self, DigestMd5Client, GssapiClient, KerberosProvider, SaslClient};
use crate::auth::token::DelegationToken;
use crate::config::ClientConfig;
use crate::endpoint::Endpoint;
use crate::error::{ClientError, ConfigError, Result};
use crate::protocol::WireEncoding;
use crate::rpc::{MetastoreRpc, ThriftMetastoreClient};
use crate::tls::TlsConnector;

/// Opens RPC channels to individual endpoints.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Build the full transport stack for `endpoint`.
    ///
    /// `token` is the delegation token string to authenticate with, when one
    /// is available for the configured signature.
    async fn open(&self, endpoint: &Endpoint, token: Option<&str>) -> Result<Box<dyn MetastoreRpc>>;
}

/// [`TransportFactory`] producing Thrift clients over TCP.
pub struct ThriftTransportFactory {
    tls: Option<TlsConnector>,
    kerberos: Option<Arc<dyn KerberosProvider>>,
    use_sasl: bool,
    framed: bool,
    encoding: WireEncoding,
    kerberos_principal: Option<String>,
    connect_timeout: Duration,
    socket_timeout: Duration,
}

impl std::fmt::Debug for ThriftTransportFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThriftTransportFactory")
            .field("tls", &self.tls.is_some())
            .field("use_sasl", &self.use_sasl)
            .field("framed", &self.framed)
            .field("encoding", &self.encoding)
            .finish_non_exhaustive()
    }
}

impl ThriftTransportFactory {
    /// Prepare a factory from the client configuration.
    ///
    /// # Errors
    ///
    /// TLS trust material problems surface here, before any connection
    /// attempt, as configuration or TLS errors.
    pub fn new(
        config: &ClientConfig,
        kerberos: Option<Arc<dyn KerberosProvider>>,
    ) -> Result<Self> {
        let tls = if config.tls.enabled {
            Some(TlsConnector::new(&config.tls)?)
        } else {
            None
        };
        Ok(Self {
            tls,
            kerberos,
            use_sasl: config.use_sasl,
            framed: config.use_framed_transport,
            encoding: WireEncoding::from_config(config.use_compact_protocol),
            kerberos_principal: config.kerberos_principal(),
            connect_timeout: config.connect_timeout(),
            socket_timeout: config.socket_timeout(),
        })
    }

    /// Pick the SASL mechanism, or `None` to continue unauthenticated.
    fn sasl_client(
        &self,
        endpoint: &Endpoint,
        token: Option<&str>,
    ) -> Result<Option<Box<dyn SaslClient>>> {
        if let Some(token) = token {
            info!(endpoint = %endpoint, "found delegation token, creating DIGEST-based connection");
            let token = DelegationToken::decode(token)?;
            return Ok(Some(Box::new(DigestMd5Client::from_token(&token))));
        }
        let Some(principal) = &self.kerberos_principal else {
            warn!(
                endpoint = %endpoint,
                "SASL is enabled but neither a delegation token nor a Kerberos principal is available, continuing without SASL"
            );
            return Ok(None);
        };
        info!(endpoint = %endpoint, "no delegation token, creating KERBEROS-based connection");
        let provider = self
            .kerberos
            .as_ref()
            .ok_or_else(|| ConfigError::MissingKerberosProvider(principal.clone()))?;
        let service_principal = ServicePrincipal::resolve(principal, &endpoint.host)?;
        let client = GssapiClient::new(provider.as_ref(), &service_principal)?;
        Ok(Some(Box::new(client)))
    }

    async fn connect_socket(&self, endpoint: &Endpoint) -> Result<MetaStream> {
        let address = endpoint.socket_address();
        let tcp = match timeout(self.connect_timeout, TcpStream::connect(&address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                warn!(error = %e, "failed to connect to metastore");
                return Err(ClientError::transport(endpoint, e));
            }
            Err(_) => {
                warn!("connection timeout");
                return Err(ClientError::transport(
                    endpoint,
                    format!("connect timed out after {}ms", self.connect_timeout.as_millis()),
                ));
            }
        };
        let _ = tcp.set_nodelay(true);
        debug!("TCP connection established");

        let Some(connector) = &self.tls else {
            return Ok(MetaStream::plain(tcp));
        };
        debug!(server_name = %endpoint.host, "performing TLS handshake");
        let handshake = connector.connect(&endpoint.host, tcp);
        let tls_stream = match timeout(self.connect_timeout, handshake).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(ClientError::transport(
                    endpoint,
                    format!("TLS handshake failed: {e}"),
                ))
            }
            Err(_) => {
                return Err(ClientError::transport(endpoint, "TLS handshake timed out"));
            }
        };
        debug!("TLS handshake completed");
        Ok(MetaStream::tls(tls_stream))
    }
}

#[async_trait]
impl TransportFactory for ThriftTransportFactory {
    #[instrument(skip(self, token), fields(endpoint = %endpoint, tls = self.tls.is_some(), sasl = self.use_sasl))]
    async fn open(&self, endpoint: &Endpoint, token: Option<&str>) -> Result<Box<dyn MetastoreRpc>> {
        let sasl_client = if self.use_sasl {
            self.sasl_client(endpoint, token)
                .map_err(|e| ClientError::handshake(endpoint, e))?
        } else {
            None
        };

        let mut stream = self.connect_socket(endpoint).await?;

        let framing = match sasl_client {
            Some(mut client) => {
                let mechanism = client.mechanism_name();
                match timeout(self.connect_timeout, sasl::negotiate(&mut stream, client.as_mut())).await {
                    Ok(result) => result.map_err(|e| ClientError::handshake(endpoint, e))?,
                    Err(_) => {
                        return Err(ClientError::transport(
                            endpoint,
                            format!("{mechanism} negotiation timed out"),
                        ))
                    }
                }
                Framing::Length
            }
            None if !self.use_sasl && self.framed => Framing::Length,
            None => Framing::None,
        };

        let transport = ThriftTransport::new(stream, endpoint.to_string(), self.encoding, framing)
            .with_socket_timeout(self.socket_timeout);
        debug!(?framing, encoding = ?self.encoding, "transport ready");
        Ok(Box::new(ThriftMetastoreClient::new(transport)))
    }
}
