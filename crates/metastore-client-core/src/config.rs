//! Configuration types for the metastore client connector.
//!
//! Configuration is loaded from YAML files and validated before use. String
//! values that carry secrets or hosts support `${VAR}` environment expansion.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{ConfigError, ConfigResult};

/// Environment variable consulted when no proxy user is configured.
pub const PROXY_USER_ENV: &str = "HADOOP_PROXY_USER";

/// Root configuration for a metastore client.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Comma-separated list of `scheme://host:port` endpoints.
    ///
    /// Empty means the client runs in embedded mode against an in-process handler.
    #[serde(default)]
    pub uris: String,

    /// Order in which resolved endpoints are tried.
    #[serde(default)]
    pub uri_selection: UriSelection,

    /// Registered name of a URI resolver hook, if any.
    #[serde(default)]
    pub uri_resolver: Option<String>,

    /// Registered name of the filter hook applied to listing results.
    #[serde(default = "default_filter_hook")]
    pub filter_hook: String,

    /// Number of passes over the endpoint list before giving up.
    #[serde(default = "default_connection_retries")]
    pub connection_retries: u32,

    /// Pause between passes, in seconds.
    #[serde(default)]
    pub connect_retry_delay_secs: u64,

    /// TCP connect timeout in milliseconds.
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    /// Per-read/write socket timeout in milliseconds.
    #[serde(default = "default_socket_timeout_ms")]
    pub socket_timeout_ms: u64,

    /// TLS settings for the socket layer.
    #[serde(default)]
    pub tls: TlsConfig,

    /// Wrap the socket in a SASL transport.
    #[serde(default)]
    pub use_sasl: bool,

    /// Use length-prefixed framing when SASL is off.
    #[serde(default)]
    pub use_framed_transport: bool,

    /// Use the compact wire encoding instead of binary.
    #[serde(default)]
    pub use_compact_protocol: bool,

    /// Service principal used for Kerberos, `_HOST` is replaced with the endpoint host.
    #[serde(default)]
    pub kerberos_principal: Option<String>,

    /// Signature under which a delegation token is looked up in the credential store.
    #[serde(default)]
    pub token_signature: Option<String>,

    /// User to impersonate. Falls back to `HADOOP_PROXY_USER`.
    #[serde(default)]
    pub proxy_user: Option<String>,

    /// Send the caller identity after opening a non-SASL connection.
    #[serde(default = "default_execute_set_ugi")]
    pub execute_set_ugi: bool,

    /// Advertise the test capability set.
    #[serde(default)]
    pub in_test: bool,

    /// Caller identity announced by the handshake.
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Order in which endpoints are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UriSelection {
    /// Configured order.
    #[default]
    Sequential,
    /// Shuffled once at startup, a random non-first endpoint is promoted on reconnect.
    Random,
}

impl UriSelection {
    /// Parse a selection mode, ignoring case.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        if value.eq_ignore_ascii_case("RANDOM") {
            Some(Self::Random)
        } else if value.eq_ignore_ascii_case("SEQUENTIAL") {
            Some(Self::Sequential)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequential => "SEQUENTIAL",
            Self::Random => "RANDOM",
        }
    }
}

/// TLS configuration for the socket layer.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Whether TLS is enabled.
    #[serde(default)]
    pub enabled: bool,

    /// Path to the trust store holding the CA certificates.
    #[serde(default)]
    pub truststore_path: String,

    /// Trust store password. Supports `${VAR}` expansion.
    #[serde(default)]
    pub truststore_password: String,

    /// Trust store format. Only `PEM` is read.
    #[serde(default = "default_truststore_type")]
    pub truststore_type: String,

    /// Trust manager algorithm name, recorded for consistency checks.
    #[serde(default = "default_trustmanager_algorithm")]
    pub trustmanager_algorithm: String,
}

/// Caller identity announced to the server.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct IdentityConfig {
    /// User name. Falls back to `USER` / `USERNAME`.
    #[serde(default)]
    pub user: Option<String>,

    /// Group names.
    #[serde(default)]
    pub groups: Vec<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Connection-affecting settings compared by the consistency tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaVar {
    Uris,
    UriSelection,
    UriResolver,
    ConnectionRetries,
    ConnectRetryDelay,
    ConnectionTimeout,
    SocketTimeout,
    UseSsl,
    TrustStorePath,
    TrustStorePassword,
    TrustStoreType,
    TrustManagerAlgorithm,
    UseSasl,
    UseFramedTransport,
    UseCompactProtocol,
    KerberosPrincipal,
    TokenSignature,
    ExecuteSetUgi,
}

impl MetaVar {
    /// Every tracked variable.
    pub const ALL: [MetaVar; 18] = [
        Self::Uris,
        Self::UriSelection,
        Self::UriResolver,
        Self::ConnectionRetries,
        Self::ConnectRetryDelay,
        Self::ConnectionTimeout,
        Self::SocketTimeout,
        Self::UseSsl,
        Self::TrustStorePath,
        Self::TrustStorePassword,
        Self::TrustStoreType,
        Self::TrustManagerAlgorithm,
        Self::UseSasl,
        Self::UseFramedTransport,
        Self::UseCompactProtocol,
        Self::KerberosPrincipal,
        Self::TokenSignature,
        Self::ExecuteSetUgi,
    ];

    /// Configuration key name.
    #[must_use]
    pub fn key(&self) -> &'static str {
        match self {
            Self::Uris => "uris",
            Self::UriSelection => "uri_selection",
            Self::UriResolver => "uri_resolver",
            Self::ConnectionRetries => "connection_retries",
            Self::ConnectRetryDelay => "connect_retry_delay_secs",
            Self::ConnectionTimeout => "connection_timeout_ms",
            Self::SocketTimeout => "socket_timeout_ms",
            Self::UseSsl => "tls.enabled",
            Self::TrustStorePath => "tls.truststore_path",
            Self::TrustStorePassword => "tls.truststore_password",
            Self::TrustStoreType => "tls.truststore_type",
            Self::TrustManagerAlgorithm => "tls.trustmanager_algorithm",
            Self::UseSasl => "use_sasl",
            Self::UseFramedTransport => "use_framed_transport",
            Self::UseCompactProtocol => "use_compact_protocol",
            Self::KerberosPrincipal => "kerberos_principal",
            Self::TokenSignature => "token_signature",
            Self::ExecuteSetUgi => "execute_set_ugi",
        }
    }

    /// Whether values of this variable differ when only their case differs.
    #[must_use]
    pub fn is_case_sensitive(&self) -> bool {
        !matches!(
            self,
            Self::UriSelection
                | Self::UseSsl
                | Self::TrustStoreType
                | Self::TrustManagerAlgorithm
                | Self::UseSasl
                | Self::UseFramedTransport
                | Self::UseCompactProtocol
                | Self::ExecuteSetUgi
        )
    }

    /// Whether the value must not appear in logs or printed output.
    #[must_use]
    pub fn is_secret(&self) -> bool {
        matches!(self, Self::TrustStorePassword)
    }
}

// Default value functions

fn default_filter_hook() -> String {
    "default".to_string()
}

fn default_connection_retries() -> u32 {
    5
}

fn default_connection_timeout_ms() -> u64 {
    600_000
}

fn default_socket_timeout_ms() -> u64 {
    600_000
}

fn default_execute_set_ugi() -> bool {
    true
}

fn default_truststore_type() -> String {
    "PEM".to_string()
}

fn default_trustmanager_algorithm() -> String {
    "PKIX".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            uris: String::new(),
            uri_selection: UriSelection::default(),
            uri_resolver: None,
            filter_hook: default_filter_hook(),
            connection_retries: default_connection_retries(),
            connect_retry_delay_secs: 0,
            connection_timeout_ms: default_connection_timeout_ms(),
            socket_timeout_ms: default_socket_timeout_ms(),
            tls: TlsConfig::default(),
            use_sasl: false,
            use_framed_transport: false,
            use_compact_protocol: false,
            kerberos_principal: None,
            token_signature: None,
            proxy_user: None,
            execute_set_ugi: default_execute_set_ugi(),
            in_test: false,
            identity: IdentityConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Expand environment variables in a string.
///
/// Replaces `${VAR_NAME}` with the value of the environment variable `VAR_NAME`.
/// If the variable is not set, replaces with an empty string.
pub(crate) fn expand_env_vars(s: &str) -> String {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex");
    re.replace_all(s, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_default()
    })
    .to_string()
}

// Configuration loading and validation

impl ClientConfig {
    /// Configuration pointing at the given comma-separated URIs, defaults elsewhere.
    #[must_use]
    pub fn with_uris(uris: impl Into<String>) -> Self {
        Self {
            uris: uris.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if
    /// validation fails.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_str(&content)
    }

    /// Load configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing or validation fails.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> ConfigResult<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if TLS is enabled without a usable trust store.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.tls.enabled {
            if self.tls.truststore_path.trim().is_empty() {
                return Err(ConfigError::MissingTrustStore);
            }
            if !self.tls.truststore_type.eq_ignore_ascii_case("PEM") {
                return Err(ConfigError::UnsupportedTrustStoreType(
                    self.tls.truststore_type.clone(),
                ));
            }
        }
        Ok(())
    }

    /// The configured URIs with environment variables expanded, split on commas.
    #[must_use]
    pub fn uri_list(&self) -> Vec<String> {
        expand_env_vars(&self.uris)
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Embedded mode is selected by leaving `uris` empty.
    #[must_use]
    pub fn is_embedded(&self) -> bool {
        self.uri_list().is_empty()
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    #[must_use]
    pub fn socket_timeout(&self) -> Duration {
        Duration::from_millis(self.socket_timeout_ms)
    }

    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.connect_retry_delay_secs)
    }

    /// Kerberos principal with environment variables expanded.
    #[must_use]
    pub fn kerberos_principal(&self) -> Option<String> {
        self.kerberos_principal
            .as_deref()
            .map(expand_env_vars)
            .filter(|p| !p.trim().is_empty())
    }

    /// Trust store password with environment variables expanded.
    #[must_use]
    pub fn truststore_password(&self) -> String {
        expand_env_vars(&self.tls.truststore_password)
    }

    /// Configured proxy user, or `HADOOP_PROXY_USER` when unset.
    #[must_use]
    pub fn effective_proxy_user(&self) -> Option<String> {
        self.proxy_user
            .clone()
            .or_else(|| std::env::var(PROXY_USER_ENV).ok())
            .filter(|u| !u.trim().is_empty())
    }

    /// String form of a tracked variable, as compared by the consistency tracker.
    #[must_use]
    pub fn get_as_string(&self, var: MetaVar) -> String {
        match var {
            MetaVar::Uris => self.uris.clone(),
            MetaVar::UriSelection => self.uri_selection.as_str().to_string(),
            MetaVar::UriResolver => self.uri_resolver.clone().unwrap_or_default(),
            MetaVar::ConnectionRetries => self.connection_retries.to_string(),
            MetaVar::ConnectRetryDelay => self.connect_retry_delay_secs.to_string(),
            MetaVar::ConnectionTimeout => self.connection_timeout_ms.to_string(),
            MetaVar::SocketTimeout => self.socket_timeout_ms.to_string(),
            MetaVar::UseSsl => self.tls.enabled.to_string(),
            MetaVar::TrustStorePath => self.tls.truststore_path.clone(),
            MetaVar::TrustStorePassword => self.truststore_password(),
            MetaVar::TrustStoreType => self.tls.truststore_type.clone(),
            MetaVar::TrustManagerAlgorithm => self.tls.trustmanager_algorithm.clone(),
            MetaVar::UseSasl => self.use_sasl.to_string(),
            MetaVar::UseFramedTransport => self.use_framed_transport.to_string(),
            MetaVar::UseCompactProtocol => self.use_compact_protocol.to_string(),
            MetaVar::KerberosPrincipal => self.kerberos_principal.clone().unwrap_or_default(),
            MetaVar::TokenSignature => self.token_signature.clone().unwrap_or_default(),
            MetaVar::ExecuteSetUgi => self.execute_set_ugi.to_string(),
        }
    }
}
