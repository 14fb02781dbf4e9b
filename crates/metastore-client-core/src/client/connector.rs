//! [`MetastoreClient`]: resolution, connect, reconnect and the calls built on
//! an established connection.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info, instrument};

use super::delegation::bootstrap_delegation_token;
use super::manager::ConnectionManager;
use super::{Catalog, MetastoreConnector};
use crate::auth::principal::Identity;
use crate::auth::sasl::KerberosProvider;
use crate::auth::token::{shared_token_store, TokenStore};
use crate::capabilities::ClientCapabilities;
use crate::config::{ClientConfig, UriSelection};
use crate::endpoint::{promote_random_endpoint, Endpoint, EndpointResolver, HostCanonicalizer};
use crate::error::{ClientError, ConfigError, Result, ServiceExceptionKind};
use crate::hooks::{FilterHook, HookRegistry};
use crate::metrics::ClientMetrics;
use crate::notification::{
    check_event_sequence, NotificationBatch, NotificationEventRequest,
    NotificationEventsCountRequest, NotificationFilter,
};
use crate::rpc::{GetTableRequest, MetastoreRpc};
use crate::snapshot::ConsistencyTracker;
use crate::transport::{ThriftTransportFactory, TransportFactory};

const CATALOGS_UNSUPPORTED: &str = "this client speaks the pre-catalog dialect";

enum Backend {
    /// Calls go to an in-process handler.
    Embedded,
    Remote {
        resolver: EndpointResolver,
        manager: ConnectionManager,
        endpoints: Vec<Endpoint>,
    },
}

/// Builder for [`MetastoreClient`].
pub struct MetastoreClientBuilder {
    config: ClientConfig,
    hooks: HookRegistry,
    factory: Option<Arc<dyn TransportFactory>>,
    token_store: Option<Arc<dyn TokenStore>>,
    kerberos: Option<Arc<dyn KerberosProvider>>,
    metrics: Option<Arc<ClientMetrics>>,
    embedded: Option<Box<dyn MetastoreRpc>>,
    identity: Option<Identity>,
    canonicalizer: Option<Arc<dyn HostCanonicalizer>>,
    interrupt: Option<Arc<Notify>>,
}

impl MetastoreClientBuilder {
    fn new(config: ClientConfig) -> Self {
        Self {
            config,
            hooks: HookRegistry::default(),
            factory: None,
            token_store: None,
            kerberos: None,
            metrics: None,
            embedded: None,
            identity: None,
            canonicalizer: None,
            interrupt: None,
        }
    }

    /// Registry the filter and URI resolver hooks are looked up in.
    #[must_use]
    pub fn hooks(mut self, hooks: HookRegistry) -> Self {
        self.hooks = hooks;
        self
    }

    /// Replace the socket transport builder.
    #[must_use]
    pub fn transport_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Token store consulted for the configured signature. Defaults to the
    /// process-wide store.
    #[must_use]
    pub fn token_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.token_store = Some(store);
        self
    }

    #[must_use]
    pub fn kerberos_provider(mut self, provider: Arc<dyn KerberosProvider>) -> Self {
        self.kerberos = Some(provider);
        self
    }

    #[must_use]
    pub fn metrics(mut self, metrics: Arc<ClientMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Serve calls from an in-process handler. Only used when `uris` is empty.
    #[must_use]
    pub fn embedded(mut self, handler: Box<dyn MetastoreRpc>) -> Self {
        self.embedded = Some(handler);
        self
    }

    /// Identity announced through `set_ugi`. Defaults to the configured one.
    #[must_use]
    pub fn identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self
    }

    #[must_use]
    pub fn canonicalizer(mut self, canonicalizer: Arc<dyn HostCanonicalizer>) -> Self {
        self.canonicalizer = Some(canonicalizer);
        self
    }

    /// Notify handle that cuts a retry wait short, including during the initial connect.
    #[must_use]
    pub fn interrupt(mut self, interrupt: Arc<Notify>) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    /// Validate the configuration, resolve endpoints and connect.
    ///
    /// # Errors
    ///
    /// Configuration problems, a failed delegation bootstrap, or an exhausted
    /// connect budget.
    #[instrument(skip_all, fields(uris = %self.config.uris))]
    pub async fn connect(self) -> Result<MetastoreClient> {
        let mut config = self.config;
        config.validate()?;
        let filter = self.hooks.load_filter(&config)?;
        let capabilities = ClientCapabilities::for_environment(config.in_test);
        let tracker = ConsistencyTracker::for_client();

        if config.is_embedded() {
            let handler = self.embedded.ok_or(ConfigError::NoUris)?;
            info!("Using in-process metastore handler");
            tracker.snapshot(&config);
            return Ok(MetastoreClient {
                config,
                backend: Backend::Embedded,
                rpc: Some(handler),
                connected_endpoint: None,
                token: None,
                tracker,
                capabilities,
                filter,
                metrics: self.metrics,
            });
        }

        let mut resolver = EndpointResolver::new(config.uri_selection)
            .with_hook(self.hooks.load_uri_resolver(&config));
        if let Some(canonicalizer) = self.canonicalizer {
            resolver = resolver.with_canonicalizer(canonicalizer);
        }
        let endpoints = resolver.resolve(&config.uri_list()).await?;
        if endpoints.is_empty() {
            return Err(ConfigError::NoUris.into());
        }

        let factory: Arc<dyn TransportFactory> = match self.factory {
            Some(factory) => factory,
            None => Arc::new(ThriftTransportFactory::new(&config, self.kerberos)?),
        };
        let token_store = self.token_store.unwrap_or_else(shared_token_store);
        let identity = self
            .identity
            .or_else(|| Identity::from_config(&config.identity));
        let mut manager = ConnectionManager::new(factory, Arc::clone(&token_store))
            .with_identity(identity)
            .with_metrics(self.metrics.clone());
        if let Some(interrupt) = self.interrupt {
            manager = manager.with_interrupt(interrupt);
        }

        if let Some(proxy_user) = config.effective_proxy_user() {
            info!(proxy_user = %proxy_user, "Proxy user configured, obtaining delegation token");
            bootstrap_delegation_token(&manager, &mut config, &endpoints, &proxy_user, &token_store)
                .await?;
        }

        let mut client = MetastoreClient {
            config,
            backend: Backend::Remote {
                resolver,
                manager,
                endpoints,
            },
            rpc: None,
            connected_endpoint: None,
            token: None,
            tracker,
            capabilities,
            filter,
            metrics: self.metrics,
        };
        client.open().await?;
        Ok(client)
    }
}

/// Connector to a remote metastore, or to an in-process handler.
pub struct MetastoreClient {
    config: ClientConfig,
    backend: Backend,
    rpc: Option<Box<dyn MetastoreRpc>>,
    connected_endpoint: Option<Endpoint>,
    token: Option<String>,
    tracker: ConsistencyTracker,
    capabilities: ClientCapabilities,
    filter: Arc<dyn FilterHook>,
    metrics: Option<Arc<ClientMetrics>>,
}

impl std::fmt::Debug for MetastoreClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetastoreClient")
            .field("embedded", &matches!(self.backend, Backend::Embedded))
            .field("connected_endpoint", &self.connected_endpoint)
            .field("connected", &self.rpc.is_some())
            .finish_non_exhaustive()
    }
}

impl MetastoreClient {
    #[must_use]
    pub fn builder(config: ClientConfig) -> MetastoreClientBuilder {
        MetastoreClientBuilder::new(config)
    }

    /// Endpoint of the open connection, if remote and connected.
    #[must_use]
    pub fn connected_endpoint(&self) -> Option<&Endpoint> {
        self.connected_endpoint.as_ref()
    }

    /// Current endpoint order.
    #[must_use]
    pub fn endpoints(&self) -> &[Endpoint] {
        match &self.backend {
            Backend::Embedded => &[],
            Backend::Remote { endpoints, .. } => endpoints,
        }
    }

    #[must_use]
    pub fn capabilities(&self) -> &ClientCapabilities {
        &self.capabilities
    }

    /// Handle that cuts a reconnect's retry wait short.
    #[must_use]
    pub fn interrupt_handle(&self) -> Option<Arc<Notify>> {
        match &self.backend {
            Backend::Embedded => None,
            Backend::Remote { manager, .. } => Some(manager.interrupt_handle()),
        }
    }

    fn is_embedded(&self) -> bool {
        matches!(self.backend, Backend::Embedded)
    }

    fn rpc(&mut self) -> Result<&mut Box<dyn MetastoreRpc>> {
        self.rpc.as_mut().ok_or(ClientError::NotConnected)
    }

    async fn open(&mut self) -> Result<()> {
        let Backend::Remote {
            manager, endpoints, ..
        } = &self.backend
        else {
            return Ok(());
        };
        let connection = manager.connect(&self.config, endpoints).await?;
        debug!(endpoint = %connection.endpoint, "Connected to metastore");
        self.connected_endpoint = Some(connection.endpoint);
        self.token = connection.token;
        self.rpc = Some(connection.rpc);
        self.tracker.snapshot(&self.config);
        Ok(())
    }
}

#[async_trait]
impl MetastoreConnector for MetastoreClient {
    #[instrument(skip(self))]
    async fn reconnect(&mut self) -> Result<()> {
        if self.is_embedded() {
            return Err(ClientError::Unsupported {
                operation: "reconnect",
                reason: "for direct metastore connections, there is no need to reconnect",
            });
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_reconnect();
        }
        self.close().await;

        let uris = self.config.uri_list();
        if let Backend::Remote {
            resolver, endpoints, ..
        } = &mut self.backend
        {
            if resolver.is_dynamic() {
                *endpoints = resolver.resolve(&uris).await?;
            }
            if resolver.selection() == UriSelection::Random {
                promote_random_endpoint(endpoints, &mut rand::thread_rng());
            }
        }
        self.open().await
    }

    async fn close(&mut self) {
        if let Some(mut rpc) = self.rpc.take() {
            match &self.backend {
                Backend::Remote { manager, .. } => manager.close(rpc).await,
                Backend::Embedded => {
                    if let Err(err) = rpc.close().await {
                        debug!(error = %err, "error while closing in-process handler");
                    }
                }
            }
        }
        self.connected_endpoint = None;
        self.token = None;
        self.tracker.clear();
    }

    async fn is_connected(&self) -> bool {
        self.rpc.as_ref().is_some_and(|rpc| rpc.is_open())
    }

    async fn is_local_metastore(&self) -> bool {
        self.is_embedded()
    }

    async fn is_compatible_with(&self, config: &ClientConfig) -> bool {
        self.tracker.is_compatible(config)
    }

    async fn token_str_form(&self) -> Option<String> {
        self.token.clone()
    }

    async fn get_next_notification(
        &mut self,
        request: &NotificationEventRequest,
        allow_gaps: bool,
        filter: Option<&NotificationFilter>,
    ) -> Result<NotificationBatch> {
        let response = self.rpc()?.get_next_notification(request).await?;
        let checked = check_event_sequence(request.last_event, response.events, allow_gaps, filter);
        if let (Err(ClientError::MissingEvents { .. }), Some(metrics)) = (&checked, &self.metrics) {
            metrics.record_missing_events();
        }
        checked
    }

    async fn get_current_notification_event_id(&mut self) -> Result<i64> {
        self.rpc()?.get_current_notification_event_id().await
    }

    async fn get_notification_events_count(&mut self, from_event_id: i64, db_name: &str) -> Result<i64> {
        let request = NotificationEventsCountRequest {
            from_event_id,
            db_name: db_name.to_string(),
        };
        self.rpc()?.get_notification_events_count(&request).await
    }

    async fn get_delegation_token(&mut self, owner: &str, renewer: &str) -> Result<Option<String>> {
        if self.is_embedded() {
            return Ok(None);
        }
        let token = self.rpc()?.get_delegation_token(owner, renewer).await?;
        Ok(Some(token))
    }

    async fn renew_delegation_token(&mut self, token: &str) -> Result<i64> {
        if self.is_embedded() {
            return Ok(0);
        }
        self.rpc()?.renew_delegation_token(token).await
    }

    async fn cancel_delegation_token(&mut self, token: &str) -> Result<()> {
        if self.is_embedded() {
            return Ok(());
        }
        self.rpc()?.cancel_delegation_token(token).await
    }

    async fn get_meta_conf(&mut self, key: &str) -> Result<String> {
        self.rpc()?.get_meta_conf(key).await
    }

    async fn set_meta_conf(&mut self, key: &str, value: &str) -> Result<()> {
        self.rpc()?.set_meta_conf(key, value).await
    }

    async fn get_all_databases(&mut self) -> Result<Vec<String>> {
        let databases = self.rpc()?.get_all_databases().await?;
        self.filter.filter_databases(databases)
    }

    async fn get_databases(&mut self, pattern: &str) -> Result<Vec<String>> {
        let databases = self.rpc()?.get_databases(pattern).await?;
        self.filter.filter_databases(databases)
    }

    async fn table_exists(&mut self, db_name: &str, table_name: &str) -> Result<bool> {
        let request = GetTableRequest {
            db_name: db_name.to_string(),
            tbl_name: table_name.to_string(),
            capabilities: Some(self.capabilities.clone()),
        };
        match self.rpc()?.get_table(&request).await {
            Ok(table) => self.filter.filter_table(&table.db_name, &table.table_name),
            Err(ClientError::Service {
                kind: ServiceExceptionKind::NoSuchObject,
                ..
            }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn create_catalog(&mut self, _catalog: &Catalog) -> Result<()> {
        Err(ClientError::Unsupported {
            operation: "create_catalog",
            reason: CATALOGS_UNSUPPORTED,
        })
    }

    async fn get_catalog(&mut self, _name: &str) -> Result<Catalog> {
        Err(ClientError::Unsupported {
            operation: "get_catalog",
            reason: CATALOGS_UNSUPPORTED,
        })
    }

    async fn drop_catalog(&mut self, _name: &str) -> Result<()> {
        Err(ClientError::Unsupported {
            operation: "drop_catalog",
            reason: CATALOGS_UNSUPPORTED,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::token::InMemoryTokenStore;
    use crate::hooks::FilterHook;
    use crate::notification::NotificationEvent;
    use crate::testing::fakes::{FakeRpc, FakeTransportFactory, Outcome};

    fn remote_config() -> ClientConfig {
        ClientConfig::with_uris("thrift://meta0:9083,thrift://meta1:9083,thrift://meta2:9083")
    }

    async fn connect(factory: &Arc<FakeTransportFactory>, config: ClientConfig) -> MetastoreClient {
        MetastoreClient::builder(config)
            .transport_factory(factory.clone())
            .token_store(Arc::new(InMemoryTokenStore::new()))
            .connect()
            .await
            .unwrap()
    }

    fn event(id: i64) -> NotificationEvent {
        NotificationEvent {
            event_id: id,
            event_type: "INSERT".to_string(),
            ..NotificationEvent::default()
        }
    }

    #[tokio::test]
    async fn test_connect_snapshots_configuration() {
        let factory = Arc::new(FakeTransportFactory::accepting());
        let config = remote_config();
        let mut client = connect(&factory, config.clone()).await;

        assert!(client.is_connected().await);
        assert!(!client.is_local_metastore().await);
        assert!(client.is_compatible_with(&config).await);

        let mut changed = config.clone();
        changed.connection_retries += 1;
        assert!(!client.is_compatible_with(&changed).await);

        client.close().await;
        assert!(!client.is_connected().await);
        assert!(!client.is_compatible_with(&config).await);
    }

    #[tokio::test]
    async fn test_failover_to_second_endpoint() {
        let factory = Arc::new(FakeTransportFactory::scripted(vec![Outcome::Refuse, Outcome::Accept]));
        let client = connect(&factory, remote_config()).await;
        assert_eq!(client.connected_endpoint().unwrap().host, "meta1");
    }

    #[tokio::test]
    async fn test_missing_uris_without_handler() {
        let err = MetastoreClient::builder(ClientConfig::default())
            .connect()
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Config(ConfigError::NoUris)));
    }

    #[tokio::test]
    async fn test_embedded_mode() {
        let config = ClientConfig::default();
        let mut client = MetastoreClient::builder(config.clone())
            .embedded(Box::new(FakeRpc::default()))
            .connect()
            .await
            .unwrap();

        assert!(client.is_local_metastore().await);
        assert!(client.is_connected().await);
        assert!(client.is_compatible_with(&config).await);
        assert_eq!(client.get_delegation_token("a", "b").await.unwrap(), None);
        assert_eq!(client.renew_delegation_token("t").await.unwrap(), 0);
        client.cancel_delegation_token("t").await.unwrap();

        let err = client.reconnect().await.unwrap_err();
        assert!(matches!(err, ClientError::Unsupported { operation: "reconnect", .. }));
    }

    #[tokio::test]
    async fn test_reconnect_with_random_selection_moves_head() {
        let factory = Arc::new(FakeTransportFactory::accepting());
        let mut config = remote_config();
        config.uri_selection = UriSelection::Random;
        let mut client = connect(&factory, config).await;

        let head = client.endpoints()[0].clone();
        client.reconnect().await.unwrap();
        assert_ne!(client.endpoints()[0], head);
        assert_eq!(client.endpoints().len(), 3);
        assert_eq!(factory.closed(), 1);
        assert!(client.is_connected().await);
    }

    #[tokio::test]
    async fn test_notification_gap_is_reported() {
        let factory = Arc::new(
            FakeTransportFactory::accepting().with_events(vec![event(11), event(13)]),
        );
        let mut client = connect(&factory, remote_config()).await;
        let request = NotificationEventRequest::new(10, Some(100));

        let err = client.get_next_notification(&request, false, None).await.unwrap_err();
        assert!(matches!(err, ClientError::MissingEvents { expected: 12, actual: 13 }));

        let batch = client.get_next_notification(&request, true, None).await.unwrap();
        assert_eq!(batch.last_event_id, 13);
        assert_eq!(batch.events.len(), 2);
    }

    #[tokio::test]
    async fn test_listings_pass_through_filter_hook() {
        struct HideSystem;
        impl FilterHook for HideSystem {
            fn filter_databases(&self, databases: Vec<String>) -> Result<Vec<String>> {
                Ok(databases.into_iter().filter(|d| d != "sys").collect())
            }
            fn filter_table(&self, database: &str, _table: &str) -> Result<bool> {
                Ok(database != "sys")
            }
        }

        let factory = Arc::new(
            FakeTransportFactory::accepting()
                .with_databases(vec!["default".to_string(), "sys".to_string()])
                .with_tables(vec![("sys".to_string(), "t".to_string()), ("default".to_string(), "t".to_string())]),
        );
        let mut hooks = HookRegistry::default();
        hooks.register_filter("hide-sys", |_| Arc::new(HideSystem));
        let mut config = remote_config();
        config.filter_hook = "hide-sys".to_string();

        let mut client = MetastoreClient::builder(config)
            .transport_factory(factory.clone())
            .hooks(hooks)
            .connect()
            .await
            .unwrap();

        assert_eq!(client.get_all_databases().await.unwrap(), vec!["default".to_string()]);
        assert!(client.table_exists("default", "t").await.unwrap());
        assert!(!client.table_exists("sys", "t").await.unwrap());
        assert!(!client.table_exists("default", "missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_table_exists_sends_capabilities() {
        let factory = Arc::new(
            FakeTransportFactory::accepting().with_tables(vec![("db".to_string(), "t".to_string())]),
        );
        let mut config = remote_config();
        config.in_test = true;
        let mut client = connect(&factory, config).await;
        client.table_exists("db", "t").await.unwrap();
        assert!(factory
            .calls()
            .iter()
            .any(|call| call == "get_table db.t capabilities=2"));
    }

    #[tokio::test]
    async fn test_catalog_operations_unsupported() {
        let factory = Arc::new(FakeTransportFactory::accepting());
        let mut client = connect(&factory, remote_config()).await;
        let err = client.create_catalog(&Catalog::default()).await.unwrap_err();
        assert!(matches!(err, ClientError::Unsupported { operation: "create_catalog", .. }));
        assert!(client.get_catalog("hive").await.is_err());
        assert!(client.drop_catalog("hive").await.is_err());
    }

    #[tokio::test]
    async fn test_calls_after_close_fail() {
        let factory = Arc::new(FakeTransportFactory::accepting());
        let mut client = connect(&factory, remote_config()).await;
        client.close().await;
        client.close().await;
        assert!(matches!(
            client.get_current_notification_event_id().await,
            Err(ClientError::NotConnected)
        ));
        assert_eq!(factory.closed(), 1);
    }
}
