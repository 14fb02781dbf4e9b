//! Domain error types for the metastore client connector.
//!
//! Uses `thiserror` for the error definitions. Configuration and TLS
//! material problems are fatal and never retried; transport failures are
//! retried by the connection manager.

use thiserror::Error;

/// Errors related to configuration parsing and validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No metastore URIs were configured and no embedded handler was supplied.
    #[error("no metastore URIs configured")]
    NoUris,

    /// A configured URI has no `scheme://` prefix.
    #[error("URI '{0}' does not have a scheme")]
    MissingScheme(String),

    /// A configured URI could not be parsed.
    #[error("invalid URI '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },

    /// TLS is enabled but the trust store path is blank.
    #[error("TLS is enabled but tls.truststore_path is not set")]
    MissingTrustStore,

    /// The trust store type is not one this client can read.
    #[error("unsupported trust store type '{0}' (expected PEM)")]
    UnsupportedTrustStoreType(String),

    /// SASL is enabled with a Kerberos principal but no Kerberos provider was installed.
    #[error("Kerberos principal '{0}' configured but no Kerberos provider is installed")]
    MissingKerberosProvider(String),

    /// A Kerberos principal is not of the form `service/host@REALM`.
    #[error("Kerberos principal '{0}' does not have the expected service/host@REALM form")]
    InvalidPrincipal(String),

    /// The configured filter hook name is not registered.
    #[error("unknown filter hook '{0}'")]
    UnknownFilterHook(String),

    /// Failed to read configuration file.
    #[error("failed to read config file '{path}': {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
}

/// Errors raised while loading TLS material.
#[derive(Error, Debug)]
pub enum TlsError {
    /// Failed to read a certificate file.
    #[error("failed to read certificate file '{path}': {source}")]
    CertificateRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The certificate file contained no certificates.
    #[error("no certificates found in '{0}'")]
    NoCertificates(String),
}

/// Errors raised during SASL negotiation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SaslError {
    /// The server answered with BAD or ERROR.
    #[error("SASL negotiation rejected by server ({status}): {message}")]
    Rejected { status: &'static str, message: String },

    /// The server sent a status byte outside the negotiation alphabet.
    #[error("invalid SASL status byte {0}")]
    InvalidStatus(u8),

    /// The server sent a status that is not legal at this point.
    #[error("unexpected SASL status {0}")]
    UnexpectedStatus(&'static str),

    /// A challenge from the server could not be parsed.
    #[error("malformed SASL challenge: {0}")]
    MalformedChallenge(String),

    /// The server's final authentication proof did not match.
    #[error("server authentication failed: rspauth mismatch")]
    ServerProofMismatch,

    /// The delegation token string could not be decoded.
    #[error("invalid delegation token: {0}")]
    InvalidToken(String),

    /// The Kerberos provider reported a failure.
    #[error("Kerberos error: {0}")]
    Kerberos(String),

    /// A negotiation payload exceeded the frame limit.
    #[error("SASL payload of {0} bytes exceeds limit")]
    PayloadTooLarge(usize),
}

/// Errors raised while encoding or decoding Thrift messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The buffer ended before the value was complete.
    #[error("incomplete message")]
    Incomplete,

    /// The message header carried an unexpected version or protocol id.
    #[error("bad protocol version: {0}")]
    BadVersion(String),

    /// A length prefix was negative or exceeded the limit.
    #[error("invalid length {0}")]
    InvalidLength(i64),

    /// A wire type id was not recognised.
    #[error("unknown wire type {0}")]
    UnknownType(u8),

    /// A string field was not valid UTF-8.
    #[error("invalid UTF-8 in string field")]
    InvalidUtf8,

    /// Nested structures exceeded the skip depth.
    #[error("maximum nesting depth exceeded")]
    DepthExceeded,

    /// The reply did not match the request.
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),

    /// A varint ran past its maximum width.
    #[error("varint too long")]
    VarintOverflow,
}

/// Which declared service exception a call raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceExceptionKind {
    /// Generic server-side failure.
    Meta,
    /// The requested object does not exist.
    NoSuchObject,
}

impl std::fmt::Display for ServiceExceptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Meta => f.write_str("MetaException"),
            Self::NoSuchObject => f.write_str("NoSuchObjectException"),
        }
    }
}

/// Errors surfaced by the client connector.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Configuration problem. Never retried.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// TLS material problem. Never retried.
    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),

    /// Transport open or I/O failure against a specific endpoint.
    #[error("transport error on {endpoint}: {message}")]
    Transport { endpoint: String, message: String },

    /// Raw I/O failure on an established connection.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// SASL negotiation failed.
    #[error("SASL error: {0}")]
    Sasl(#[from] SaslError),

    /// SASL authentication against a specific endpoint failed.
    #[error("SASL handshake with {endpoint} failed: {source}")]
    Handshake {
        endpoint: String,
        #[source]
        source: SaslError,
    },

    /// Malformed wire data.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Every attempt against every endpoint failed.
    #[error("could not connect to meta store using any of the URIs provided after {attempts} attempt(s); most recent failure: {}", last_error.as_ref().map(|e| e.to_string()).unwrap_or_else(|| "none".to_string()))]
    ConnectFailed {
        attempts: u32,
        last_error: Option<Box<ClientError>>,
    },

    /// The service raised one of its declared exceptions.
    #[error("{kind}: {message}")]
    Service {
        kind: ServiceExceptionKind,
        message: String,
    },

    /// The service raised an application-level exception.
    #[error("application exception ({kind}): {message}")]
    Application { kind: i32, message: String },

    /// The event feed skipped one or more ids.
    #[error("Notification events are missing: expected event id {expected}, got {actual}")]
    MissingEvents { expected: i64, actual: i64 },

    /// The operation is not available on this client.
    #[error("{operation} is not supported: {reason}")]
    Unsupported {
        operation: &'static str,
        reason: &'static str,
    },

    /// Minting the delegation token for a proxy user failed.
    #[error("failed to obtain delegation token for proxy user '{user}': {source}")]
    DelegationBootstrap {
        user: String,
        #[source]
        source: Box<ClientError>,
    },

    /// A call was issued while no connection was open.
    #[error("not connected to a metastore")]
    NotConnected,
}

impl ClientError {
    /// Whether the connection loop should try the next endpoint after this error.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. }
                | Self::Io(_)
                | Self::Sasl(_)
                | Self::Handshake { .. }
                | Self::Protocol(_)
        )
    }

    /// Tag a failure raised while authenticating with `endpoint`.
    ///
    /// Configuration errors pass through untouched.
    pub(crate) fn handshake(endpoint: impl std::fmt::Display, err: ClientError) -> Self {
        match err {
            Self::Sasl(source) => Self::Handshake {
                endpoint: endpoint.to_string(),
                source,
            },
            Self::Io(e) => Self::transport(endpoint, e),
            Self::Protocol(e) => Self::transport(endpoint, e),
            other => other,
        }
    }

    pub(crate) fn transport(endpoint: impl std::fmt::Display, message: impl std::fmt::Display) -> Self {
        Self::Transport {
            endpoint: endpoint.to_string(),
            message: message.to_string(),
        }
    }
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for TLS material loading.
pub type TlsResult<T> = std::result::Result<T, TlsError>;

/// Result type alias for wire encoding operations.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_scheme_display() {
        let err = ConfigError::MissingScheme("host:9083".to_string());
        assert_eq!(err.to_string(), "URI 'host:9083' does not have a scheme");
    }

    #[test]
    fn test_connect_failed_carries_last_error() {
        let err = ClientError::ConnectFailed {
            attempts: 6,
            last_error: Some(Box::new(ClientError::transport(
                "thrift://a:9083",
                "connection refused",
            ))),
        };
        let msg = err.to_string();
        assert!(msg.contains("6 attempt(s)"));
        assert!(msg.contains("connection refused"));
    }

    #[test]
    fn test_missing_events_display() {
        let err = ClientError::MissingEvents {
            expected: 11,
            actual: 13,
        };
        assert!(err.to_string().starts_with("Notification events are missing"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(ClientError::transport("x", "refused").is_retryable());
        assert!(ClientError::Sasl(SaslError::ServerProofMismatch).is_retryable());
        assert!(ClientError::handshake("thrift://a:9083", SaslError::ServerProofMismatch.into())
            .is_retryable());
        assert!(!ClientError::Config(ConfigError::MissingTrustStore).is_retryable());
        assert!(!ClientError::Tls(TlsError::NoCertificates("ca.pem".into())).is_retryable());
        assert!(!ClientError::NotConnected.is_retryable());
    }

    #[test]
    fn test_handshake_names_endpoint() {
        let err = ClientError::handshake(
            "thrift://meta1:9083",
            ClientError::Sasl(SaslError::Rejected {
                status: "BAD",
                message: "nope".to_string(),
            }),
        );
        assert!(err.to_string().contains("thrift://meta1:9083"));
        assert!(matches!(err, ClientError::Handshake { source: SaslError::Rejected { .. }, .. }));

        let config = ClientError::handshake("thrift://meta1:9083", ConfigError::NoUris.into());
        assert!(matches!(config, ClientError::Config(ConfigError::NoUris)));
    }

    #[test]
    fn test_service_exception_display() {
        let err = ClientError::Service {
            kind: ServiceExceptionKind::NoSuchObject,
            message: "db.t not found".to_string(),
        };
        assert_eq!(err.to_string(), "NoSuchObjectException: db.t not found");
    }
}
