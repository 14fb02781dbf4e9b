//! Endpoint parsing, resolution and ordering.
//!
//! URIs are parsed into [`Endpoint`] values, optionally expanded through a
//! [`UriResolverHook`], and shuffled once when the selection policy is
//! random. Reconnects call [`promote_random_endpoint`] so that a failed
//! default first endpoint is not retried first again.

use rand::seq::SliceRandom;
use rand::Rng;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::UriSelection;
use crate::error::{ConfigError, ConfigResult, Result};
use crate::hooks::UriResolverHook;

/// Port used when a URI omits one.
pub const DEFAULT_PORT: u16 = 9083;

/// One candidate metastore endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub scheme: String,
    pub user_info: Option<String>,
    pub host: String,
    pub port: u16,
    /// Path, query and fragment exactly as configured, including the leading delimiter.
    pub suffix: String,
}

impl Endpoint {
    /// Parse a `scheme://[user@]host[:port][/path][?query][#fragment]` URI.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingScheme`] when there is no scheme and
    /// [`ConfigError::InvalidUri`] for a missing host or bad port.
    pub fn parse(uri: &str) -> ConfigResult<Self> {
        let uri = uri.trim();
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| ConfigError::MissingScheme(uri.to_string()))?;
        let valid_scheme = scheme.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        if !valid_scheme {
            return Err(ConfigError::MissingScheme(uri.to_string()));
        }

        let invalid = |reason: &str| ConfigError::InvalidUri {
            uri: uri.to_string(),
            reason: reason.to_string(),
        };

        let authority_end = rest.find(|c| matches!(c, '/' | '?' | '#')).unwrap_or(rest.len());
        let (authority, suffix) = rest.split_at(authority_end);
        let (user_info, host_port) = match authority.rsplit_once('@') {
            Some((user, hp)) => (Some(user.to_string()), hp),
            None => (None, authority),
        };

        let (host, port) = if let Some(bracketed) = host_port.strip_prefix('[') {
            let (host, after) = bracketed
                .split_once(']')
                .ok_or_else(|| invalid("unterminated IPv6 literal"))?;
            let port = match after {
                "" => None,
                p => Some(p.strip_prefix(':').ok_or_else(|| invalid("junk after IPv6 literal"))?),
            };
            (host, port)
        } else {
            match host_port.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (host_port, None),
            }
        };

        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        let port = match port {
            None | Some("") => DEFAULT_PORT,
            Some(p) => p.parse::<u16>().map_err(|_| invalid("invalid port"))?,
        };

        Ok(Self {
            scheme: scheme.to_string(),
            user_info,
            host: host.to_string(),
            port,
            suffix: suffix.to_string(),
        })
    }

    /// The same endpoint with a different host.
    #[must_use]
    pub fn with_host(&self, host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..self.clone()
        }
    }

    /// `host:port` form suitable for a socket connect.
    #[must_use]
    pub fn socket_address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://", self.scheme)?;
        if let Some(user) = &self.user_info {
            write!(f, "{user}@")?;
        }
        write!(f, "{}{}", self.socket_address(), self.suffix)
    }
}

/// Maps a configured host to its canonical name.
pub trait HostCanonicalizer: Send + Sync {
    fn canonical_host_name(&self, host: &str) -> String;
}

/// Lower-cases the host and drops a trailing root dot.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultCanonicalizer;

impl HostCanonicalizer for DefaultCanonicalizer {
    fn canonical_host_name(&self, host: &str) -> String {
        host.trim_end_matches('.').to_ascii_lowercase()
    }
}

/// Turns configured URI strings into an ordered endpoint list.
#[derive(Clone)]
pub struct EndpointResolver {
    selection: UriSelection,
    hook: Option<Arc<dyn UriResolverHook>>,
    canonicalizer: Arc<dyn HostCanonicalizer>,
}

impl fmt::Debug for EndpointResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointResolver")
            .field("selection", &self.selection)
            .field("has_hook", &self.hook.is_some())
            .finish()
    }
}

impl EndpointResolver {
    #[must_use]
    pub fn new(selection: UriSelection) -> Self {
        Self {
            selection,
            hook: None,
            canonicalizer: Arc::new(DefaultCanonicalizer),
        }
    }

    #[must_use]
    pub fn with_hook(mut self, hook: Option<Arc<dyn UriResolverHook>>) -> Self {
        self.hook = hook;
        self
    }

    #[must_use]
    pub fn with_canonicalizer(mut self, canonicalizer: Arc<dyn HostCanonicalizer>) -> Self {
        self.canonicalizer = canonicalizer;
        self
    }

    /// Whether membership can change between resolutions.
    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        self.hook.is_some()
    }

    #[must_use]
    pub fn selection(&self) -> UriSelection {
        self.selection
    }

    /// Resolve every URI in order, then shuffle once under random selection.
    ///
    /// # Errors
    ///
    /// Fails on the first URI without a scheme, or when the resolver hook fails.
    pub async fn resolve(&self, uris: &[String]) -> Result<Vec<Endpoint>> {
        let mut endpoints = Vec::with_capacity(uris.len());
        for uri in uris {
            let endpoint = Endpoint::parse(uri)?;
            match &self.hook {
                Some(hook) => {
                    let expanded = hook.resolve_uri(&endpoint).await?;
                    debug!(uri = %endpoint, resolved = expanded.len(), "URI resolver hook expanded endpoint");
                    endpoints.extend(expanded);
                }
                None => {
                    let host = self.canonicalizer.canonical_host_name(&endpoint.host);
                    endpoints.push(endpoint.with_host(host));
                }
            }
        }

        if self.selection == UriSelection::Random {
            endpoints.shuffle(&mut rand::thread_rng());
        }
        info!(
            count = endpoints.len(),
            selection = self.selection.as_str(),
            "Resolved metastore endpoints"
        );
        Ok(endpoints)
    }
}

/// Swap the first endpoint with one picked uniformly from the rest.
///
/// No-op for fewer than two endpoints.
pub fn promote_random_endpoint<T, R: Rng + ?Sized>(endpoints: &mut [T], rng: &mut R) {
    if endpoints.len() < 2 {
        return;
    }
    let index = rng.gen_range(1..endpoints.len());
    endpoints.swap(0, index);
}
