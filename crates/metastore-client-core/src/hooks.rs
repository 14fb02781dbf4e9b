//! Extension hooks consulted by the client.
//!
//! Hooks are looked up by configured name in a [`HookRegistry`]. A missing
//! URI resolver is logged and ignored, a missing filter hook is a
//! configuration error.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::error;

use crate::config::ClientConfig;
use crate::endpoint::Endpoint;
use crate::error::{ConfigError, ConfigResult, Result};

/// Rewrites one configured endpoint into zero or more concrete endpoints.
#[async_trait]
pub trait UriResolverHook: Send + Sync {
    async fn resolve_uri(&self, endpoint: &Endpoint) -> Result<Vec<Endpoint>>;
}

/// Post-processes listing results before they reach the caller.
///
/// Every method defaults to passing results through unchanged.
pub trait FilterHook: Send + Sync {
    fn filter_databases(&self, databases: Vec<String>) -> Result<Vec<String>> {
        Ok(databases)
    }

    /// Return `false` to hide the table from the caller.
    fn filter_table(&self, _database: &str, _table: &str) -> Result<bool> {
        Ok(true)
    }
}

/// Pass-through filter registered as `default`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultFilterHook;

impl FilterHook for DefaultFilterHook {}

pub type FilterHookFactory = Arc<dyn Fn(&ClientConfig) -> Arc<dyn FilterHook> + Send + Sync>;
pub type UriResolverFactory = Arc<dyn Fn(&ClientConfig) -> Arc<dyn UriResolverHook> + Send + Sync>;

/// Name to factory mapping for every hook the client can load.
#[derive(Clone)]
pub struct HookRegistry {
    filters: HashMap<String, FilterHookFactory>,
    uri_resolvers: HashMap<String, UriResolverFactory>,
}

impl Default for HookRegistry {
    fn default() -> Self {
        let mut registry = Self {
            filters: HashMap::new(),
            uri_resolvers: HashMap::new(),
        };
        registry.register_filter("default", |_| Arc::new(DefaultFilterHook));
        registry
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("filters", &self.filters.keys().collect::<Vec<_>>())
            .field("uri_resolvers", &self.uri_resolvers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl HookRegistry {
    pub fn register_filter<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&ClientConfig) -> Arc<dyn FilterHook> + Send + Sync + 'static,
    {
        self.filters.insert(name.into(), Arc::new(factory));
        self
    }

    pub fn register_uri_resolver<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&ClientConfig) -> Arc<dyn UriResolverHook> + Send + Sync + 'static,
    {
        self.uri_resolvers.insert(name.into(), Arc::new(factory));
        self
    }

    /// Instantiate the configured filter hook.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownFilterHook`] if the name is not registered.
    pub fn load_filter(&self, config: &ClientConfig) -> ConfigResult<Arc<dyn FilterHook>> {
        self.filters
            .get(&config.filter_hook)
            .map(|factory| factory(config))
            .ok_or_else(|| ConfigError::UnknownFilterHook(config.filter_hook.clone()))
    }

    /// Instantiate the configured URI resolver, if one is named and registered.
    #[must_use]
    pub fn load_uri_resolver(&self, config: &ClientConfig) -> Option<Arc<dyn UriResolverHook>> {
        let name = config.uri_resolver.as_deref().filter(|n| !n.trim().is_empty())?;
        match self.uri_resolvers.get(name) {
            Some(factory) => Some(factory(config)),
            None => {
                error!(resolver = name, "Failed to load URI resolver hook, continuing without it");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct HideTemp;

    impl FilterHook for HideTemp {
        fn filter_databases(&self, databases: Vec<String>) -> Result<Vec<String>> {
            Ok(databases.into_iter().filter(|d| !d.starts_with("tmp_")).collect())
        }
    }

    #[test]
    fn test_default_filter_is_registered() {
        let registry = HookRegistry::default();
        let hook = registry.load_filter(&ClientConfig::default()).unwrap();
        let dbs = vec!["a".to_string(), "tmp_b".to_string()];
        assert_eq!(hook.filter_databases(dbs.clone()).unwrap(), dbs);
        assert!(hook.filter_table("a", "t").unwrap());
    }

    #[test]
    fn test_unknown_filter_is_fatal() {
        let registry = HookRegistry::default();
        let mut config = ClientConfig::default();
        config.filter_hook = "com.example.Missing".to_string();
        assert!(matches!(
            registry.load_filter(&config),
            Err(ConfigError::UnknownFilterHook(name)) if name == "com.example.Missing"
        ));
    }

    #[test]
    fn test_registered_filter_is_used() {
        let mut registry = HookRegistry::default();
        registry.register_filter("hide-temp", |_| Arc::new(HideTemp));
        let mut config = ClientConfig::default();
        config.filter_hook = "hide-temp".to_string();
        let hook = registry.load_filter(&config).unwrap();
        let dbs = hook
            .filter_databases(vec!["a".to_string(), "tmp_b".to_string()])
            .unwrap();
        assert_eq!(dbs, vec!["a".to_string()]);
    }

    #[test]
    fn test_unknown_uri_resolver_is_ignored() {
        let registry = HookRegistry::default();
        let mut config = ClientConfig::default();
        config.uri_resolver = Some("dns-srv".to_string());
        assert!(registry.load_uri_resolver(&config).is_none());

        config.uri_resolver = None;
        assert!(registry.load_uri_resolver(&config).is_none());
    }
}
