//! Identities used when talking to the metastore.
//!
//! [`Identity`] is the caller announced by the post-connect handshake on
//! unauthenticated connections. [`ServicePrincipal`] is the Kerberos
//! identity of the server, with the `_HOST` placeholder substituted per
//! endpoint.

use std::fmt;

use crate::config::IdentityConfig;
use crate::error::{ConfigError, ConfigResult};

/// Placeholder replaced with the endpoint host in a configured server principal.
pub const HOST_PLACEHOLDER: &str = "_HOST";

/// The caller's user and group names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user: String,
    pub groups: Vec<String>,
}

impl Identity {
    pub fn new(user: impl Into<String>, groups: Vec<String>) -> Self {
        Self {
            user: user.into(),
            groups,
        }
    }

    /// Identity from configuration, falling back to the `USER` / `USERNAME` environment.
    #[must_use]
    pub fn from_config(config: &IdentityConfig) -> Option<Self> {
        let user = config
            .user
            .clone()
            .or_else(|| std::env::var("USER").ok())
            .or_else(|| std::env::var("USERNAME").ok())
            .filter(|u| !u.trim().is_empty())?;
        Some(Self::new(user, config.groups.clone()))
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (groups: {})", self.user, self.groups.join(","))
    }
}

/// Kerberos principal of the metastore service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePrincipal {
    pub service: String,
    pub host: String,
    pub realm: String,
}

impl ServicePrincipal {
    /// Parse `service/host@REALM`, substituting `_HOST` with `endpoint_host`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidPrincipal`] when any of the three parts is missing.
    pub fn resolve(principal: &str, endpoint_host: &str) -> ConfigResult<Self> {
        let invalid = || ConfigError::InvalidPrincipal(principal.to_string());
        let (name, realm) = principal.split_once('@').ok_or_else(invalid)?;
        let (service, host) = name.split_once('/').ok_or_else(invalid)?;
        if service.is_empty() || host.is_empty() || realm.is_empty() || host.contains('/') {
            return Err(invalid());
        }
        let host = if host == HOST_PLACEHOLDER {
            endpoint_host.to_ascii_lowercase()
        } else {
            host.to_string()
        };
        Ok(Self {
            service: service.to_string(),
            host,
            realm: realm.to_string(),
        })
    }
}

impl fmt::Display for ServicePrincipal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.service, self.host, self.realm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_placeholder_substituted() {
        let principal =
            ServicePrincipal::resolve("hive/_HOST@EXAMPLE.COM", "Meta1.Example.com").unwrap();
        assert_eq!(principal.service, "hive");
        assert_eq!(principal.host, "meta1.example.com");
        assert_eq!(principal.realm, "EXAMPLE.COM");
        assert_eq!(principal.to_string(), "hive/meta1.example.com@EXAMPLE.COM");
    }

    #[test]
    fn test_explicit_host_kept() {
        let principal = ServicePrincipal::resolve("hive/fixed.host@R", "other").unwrap();
        assert_eq!(principal.host, "fixed.host");
    }

    #[test]
    fn test_principal_without_host_rejected() {
        for bad in ["hive@EXAMPLE.COM", "hive/host", "/host@R", "a/b/c@R"] {
            assert!(
                matches!(
                    ServicePrincipal::resolve(bad, "h"),
                    Err(ConfigError::InvalidPrincipal(_))
                ),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_identity_from_config_prefers_explicit_user() {
        let config = IdentityConfig {
            user: Some("etl".to_string()),
            groups: vec!["analysts".to_string()],
        };
        let identity = Identity::from_config(&config).unwrap();
        assert_eq!(identity.user, "etl");
        assert_eq!(identity.groups, vec!["analysts".to_string()]);
    }
}
