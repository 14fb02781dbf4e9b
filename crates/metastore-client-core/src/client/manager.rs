//! Bounded retry-with-failover over the endpoint list.
//!
//! One connect makes up to `connection_retries` passes over the endpoints in
//! order, building one transport per endpoint per pass. Retryable failures
//! move on to the next endpoint; anything else ends the connect at once.
//! Between failed passes the manager sleeps for the retry delay, and an
//! interrupt cuts that sleep short without ending the loop.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Notify;
use tracing::{debug, error, info, instrument, warn};

use crate::auth::principal::Identity;
use crate::auth::token::TokenStore;
use crate::config::ClientConfig;
use crate::endpoint::Endpoint;
use crate::error::{ClientError, ConfigError, Result};
use crate::metrics::ClientMetrics;
use crate::rpc::MetastoreRpc;
use crate::transport::TransportFactory;

/// Connections currently open in this process, for logging only.
static OPEN_CONNECTIONS: AtomicI64 = AtomicI64::new(0);

/// Number of metastore connections currently open in this process.
#[must_use]
pub fn open_connection_count() -> i64 {
    OPEN_CONNECTIONS.load(Ordering::Relaxed)
}

/// An established connection and how it was authenticated.
pub struct Connection {
    pub rpc: Box<dyn MetastoreRpc>,
    pub endpoint: Endpoint,
    /// Delegation token presented over DIGEST, if any.
    pub token: Option<String>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.endpoint)
            .field("digest", &self.token.is_some())
            .finish_non_exhaustive()
    }
}

fn error_class(err: &ClientError) -> &'static str {
    match err {
        ClientError::Transport { .. } => "transport",
        ClientError::Io(_) => "io",
        ClientError::Sasl(_) | ClientError::Handshake { .. } => "sasl",
        ClientError::Protocol(_) => "protocol",
        ClientError::Config(_) | ClientError::Tls(_) => "config",
        _ => "other",
    }
}

/// Runs the connect loop against a [`TransportFactory`].
#[derive(Clone)]
pub struct ConnectionManager {
    factory: Arc<dyn TransportFactory>,
    token_store: Arc<dyn TokenStore>,
    identity: Option<Identity>,
    metrics: Option<Arc<ClientMetrics>>,
    interrupt: Arc<Notify>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    pub fn new(factory: Arc<dyn TransportFactory>, token_store: Arc<dyn TokenStore>) -> Self {
        Self {
            factory,
            token_store,
            identity: None,
            metrics: None,
            interrupt: Arc::new(Notify::new()),
        }
    }

    /// Identity announced through `set_ugi` on unauthenticated connections.
    #[must_use]
    pub fn with_identity(mut self, identity: Option<Identity>) -> Self {
        self.identity = identity;
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Option<Arc<ClientMetrics>>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Share an interrupt handle created elsewhere.
    #[must_use]
    pub fn with_interrupt(mut self, interrupt: Arc<Notify>) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Handle that cuts the current inter-pass wait short.
    #[must_use]
    pub fn interrupt_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.interrupt)
    }

    fn lookup_token(&self, config: &ClientConfig) -> Option<String> {
        if !config.use_sasl {
            return None;
        }
        let signature = config
            .token_signature
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())?;
        self.token_store.get_token(signature)
    }

    /// Connect to the first endpoint that accepts, making up to
    /// `connection_retries` passes.
    ///
    /// # Errors
    ///
    /// An empty endpoint list is [`ConfigError::NoUris`], before any pass.
    /// Non-retryable failures are returned as soon as they occur. When every
    /// pass fails, returns [`ClientError::ConnectFailed`] carrying the most
    /// recent failure.
    #[instrument(skip_all, fields(endpoints = endpoints.len(), retries = config.connection_retries))]
    pub async fn connect(&self, config: &ClientConfig, endpoints: &[Endpoint]) -> Result<Connection> {
        if endpoints.is_empty() {
            return Err(ConfigError::NoUris.into());
        }
        let passes = config.connection_retries.max(1);
        let delay = config.retry_delay();
        let token = self.lookup_token(config);
        let started = Instant::now();
        let mut attempts = 0u32;
        let mut last_error: Option<ClientError> = None;

        for pass in 0..passes {
            for endpoint in endpoints {
                info!(endpoint = %endpoint, attempt = pass, "Trying to connect to metastore");
                attempts += 1;
                if let Some(metrics) = &self.metrics {
                    metrics.record_attempt();
                }

                match self.factory.open(endpoint, token.as_deref()).await {
                    Ok(mut rpc) => {
                        let open = OPEN_CONNECTIONS.fetch_add(1, Ordering::Relaxed) + 1;
                        info!(endpoint = %endpoint, current_connections = open, "Opened a connection to metastore");
                        if config.execute_set_ugi && !config.use_sasl {
                            self.announce_identity(rpc.as_mut()).await;
                        }
                        if let Some(metrics) = &self.metrics {
                            metrics.record_connected(started.elapsed().as_secs_f64());
                        }
                        return Ok(Connection {
                            rpc,
                            endpoint: endpoint.clone(),
                            token,
                        });
                    }
                    Err(err) if !err.is_retryable() => {
                        error!(endpoint = %endpoint, error = %err, "Unable to connect to metastore, not retrying");
                        if let Some(metrics) = &self.metrics {
                            metrics.record_failure(error_class(&err));
                        }
                        return Err(err);
                    }
                    Err(err) => {
                        error!(endpoint = %endpoint, attempt = pass, error = %err, "Unable to connect to metastore");
                        if let Some(metrics) = &self.metrics {
                            metrics.record_failure(error_class(&err));
                        }
                        last_error = Some(err);
                    }
                }
            }

            if pass + 1 < passes && !delay.is_zero() {
                info!(delay_secs = delay.as_secs(), "Waiting before next connection attempt");
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = self.interrupt.notified() => {
                        debug!("Retry wait interrupted, continuing");
                    }
                }
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_exhausted();
        }
        Err(ClientError::ConnectFailed {
            attempts,
            last_error: last_error.map(Box::new),
        })
    }

    /// Announce user and groups on an unauthenticated connection.
    ///
    /// Failures are logged; the connection stays usable.
    async fn announce_identity(&self, rpc: &mut dyn MetastoreRpc) {
        let Some(identity) = &self.identity else {
            warn!("Failed to find ugi of client, set_ugi() is not successful. Continuing without it.");
            return;
        };
        match rpc.set_ugi(&identity.user, &identity.groups).await {
            Ok(groups) => debug!(user = %identity.user, ?groups, "set_ugi succeeded"),
            Err(err) => warn!(
                error = %err,
                "set_ugi() not successful, likely cause: new client talking to old server. Continuing without it."
            ),
        }
    }

    /// Close a connection opened by [`ConnectionManager::connect`].
    pub async fn close(&self, mut rpc: Box<dyn MetastoreRpc>) {
        if !rpc.is_open() {
            return;
        }
        if let Err(err) = rpc.close().await {
            debug!(error = %err, "error while closing metastore transport");
        }
        let open = OPEN_CONNECTIONS.fetch_sub(1, Ordering::Relaxed) - 1;
        if let Some(metrics) = &self.metrics {
            metrics.record_closed();
        }
        info!(current_connections = open, "Closed a connection to metastore");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::token::InMemoryTokenStore;
    use crate::testing::fakes::{FakeTransportFactory, Outcome};
    use std::time::Duration;

    fn endpoints(n: usize) -> Vec<Endpoint> {
        (0..n)
            .map(|i| Endpoint::parse(&format!("thrift://meta{i}:9083")).unwrap())
            .collect()
    }

    fn manager(factory: &Arc<FakeTransportFactory>) -> ConnectionManager {
        ConnectionManager::new(factory.clone(), Arc::new(InMemoryTokenStore::new()))
    }

    #[tokio::test]
    async fn test_exhaustion_builds_every_endpoint_every_pass() {
        let factory = Arc::new(FakeTransportFactory::failing());
        let mut config = ClientConfig::with_uris("unused");
        config.connection_retries = 3;

        let err = manager(&factory).connect(&config, &endpoints(4)).await.unwrap_err();
        assert_eq!(factory.open_calls(), 12);
        match err {
            ClientError::ConnectFailed { attempts, last_error } => {
                assert_eq!(attempts, 12);
                assert!(last_error.unwrap().to_string().contains("meta3"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_second_endpoint_succeeds_after_two_builds() {
        let factory = Arc::new(FakeTransportFactory::scripted(vec![
            Outcome::Refuse,
            Outcome::Accept,
            Outcome::Accept,
        ]));
        let config = ClientConfig::with_uris("unused");
        let connection = manager(&factory).connect(&config, &endpoints(3)).await.unwrap();
        assert_eq!(factory.open_calls(), 2);
        assert_eq!(connection.endpoint.host, "meta1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_endpoint_list_fails_without_waiting() {
        let factory = Arc::new(FakeTransportFactory::failing());
        let mut config = ClientConfig::with_uris("unused");
        config.connection_retries = 3;
        config.connect_retry_delay_secs = 60;

        let started = tokio::time::Instant::now();
        let err = manager(&factory).connect(&config, &[]).await.unwrap_err();
        assert!(matches!(err, ClientError::Config(ConfigError::NoUris)));
        assert!(!err.is_retryable());
        assert_eq!(factory.open_calls(), 0);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_zero_retries_still_makes_one_pass() {
        let factory = Arc::new(FakeTransportFactory::failing());
        let mut config = ClientConfig::with_uris("unused");
        config.connection_retries = 0;
        manager(&factory).connect(&config, &endpoints(2)).await.unwrap_err();
        assert_eq!(factory.open_calls(), 2);
    }

    #[tokio::test]
    async fn test_config_error_is_not_retried() {
        let factory = Arc::new(FakeTransportFactory::scripted(vec![Outcome::ConfigError]));
        let config = ClientConfig::with_uris("unused");
        let err = manager(&factory).connect(&config, &endpoints(3)).await.unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
        assert_eq!(factory.open_calls(), 1);
    }

    #[tokio::test]
    async fn test_set_ugi_only_without_sasl() {
        let identity = Some(Identity::new("etl", vec!["analysts".to_string()]));

        let factory = Arc::new(FakeTransportFactory::accepting());
        let config = ClientConfig::with_uris("unused");
        manager(&factory)
            .with_identity(identity.clone())
            .connect(&config, &endpoints(1))
            .await
            .unwrap();
        assert_eq!(factory.calls(), vec!["set_ugi".to_string()]);

        let factory = Arc::new(FakeTransportFactory::accepting());
        let mut config = ClientConfig::with_uris("unused");
        config.use_sasl = true;
        manager(&factory)
            .with_identity(identity)
            .connect(&config, &endpoints(1))
            .await
            .unwrap();
        assert!(factory.calls().is_empty());
    }

    #[tokio::test]
    async fn test_set_ugi_failure_is_swallowed() {
        let factory = Arc::new(FakeTransportFactory::accepting().with_failing_set_ugi());
        let config = ClientConfig::with_uris("unused");
        let connection = manager(&factory)
            .with_identity(Some(Identity::new("etl", Vec::new())))
            .connect(&config, &endpoints(1))
            .await
            .unwrap();
        assert!(connection.rpc.is_open());
    }

    #[tokio::test]
    async fn test_token_looked_up_by_signature_under_sasl() {
        let factory = Arc::new(FakeTransportFactory::accepting());
        let store = Arc::new(InMemoryTokenStore::new());
        store.set_token("sig", "tok".to_string());
        let mut config = ClientConfig::with_uris("unused");
        config.use_sasl = true;
        config.token_signature = Some("sig".to_string());

        let connection = ConnectionManager::new(factory.clone(), store)
            .connect(&config, &endpoints(1))
            .await
            .unwrap();
        assert_eq!(connection.token.as_deref(), Some("tok"));
        assert_eq!(factory.tokens_seen(), vec![Some("tok".to_string())]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_delay_between_passes() {
        let factory = Arc::new(FakeTransportFactory::failing());
        let mut config = ClientConfig::with_uris("unused");
        config.connection_retries = 3;
        config.connect_retry_delay_secs = 5;

        let started = tokio::time::Instant::now();
        manager(&factory).connect(&config, &endpoints(1)).await.unwrap_err();
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(10) && waited < Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_cuts_wait_but_continues() {
        let factory = Arc::new(FakeTransportFactory::failing());
        let mut config = ClientConfig::with_uris("unused");
        config.connection_retries = 2;
        config.connect_retry_delay_secs = 3600;

        let manager = manager(&factory);
        manager.interrupt_handle().notify_one();
        let started = tokio::time::Instant::now();
        manager.connect(&config, &endpoints(2)).await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(factory.open_calls(), 4);
    }

    #[tokio::test]
    async fn test_close_updates_process_counter() {
        let factory = Arc::new(FakeTransportFactory::accepting());
        let config = ClientConfig::with_uris("unused");
        let manager = manager(&factory);
        let connection = manager.connect(&config, &endpoints(1)).await.unwrap();
        manager.close(connection.rpc).await;
        assert_eq!(factory.closed(), 1);
    }
}
