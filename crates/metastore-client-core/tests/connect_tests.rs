//! Connection and failover tests against the mock metastore and the scripted factory.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use metastore_client_core::auth::token::InMemoryTokenStore;
use metastore_client_core::capabilities::ClientCapability;
use metastore_client_core::protocol::WireEncoding;
use metastore_client_core::rpc::messages::GetTableResult;
use metastore_client_core::rpc::{GetTableRequest, TableRef};
use metastore_client_core::testing::{
    FakeTransportFactory, MetastoreCall, MockMetastore, Outcome, Reply,
};
use metastore_client_core::transport::Framing;
use metastore_client_core::{
    ClientConfig, ClientError, ConfigError, Endpoint, HookRegistry, MetastoreClient,
    MetastoreConnector, UriResolverHook,
};

async fn start(mut mock: MockMetastore) -> MockMetastore {
    mock.start().await.expect("mock metastore should start");
    mock
}

/// URI of a local port with nothing listening.
fn dead_uri() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("thrift://127.0.0.1:{port}")
}

fn base_config(uris: impl Into<String>) -> ClientConfig {
    let mut config = ClientConfig::with_uris(uris);
    config.identity.user = Some("etl".to_string());
    config.identity.groups = vec!["analysts".to_string()];
    config
}

#[tokio::test]
async fn test_binary_unframed_round_trip() {
    let mock = start(
        MockMetastore::new("127.0.0.1:0").with_reply("getMetaConf", Reply::string("600s")),
    )
    .await;

    let mut client = MetastoreClient::builder(base_config(mock.uri()))
        .connect()
        .await
        .unwrap();
    let value = client
        .get_meta_conf("metastore.client.socket.timeout")
        .await
        .unwrap();
    assert_eq!(value, "600s");

    let set_ugi = mock.get_calls_for("set_ugi").await;
    assert_eq!(set_ugi.len(), 1);
    assert_eq!(set_ugi[0].string_arg(1).as_deref(), Some("etl"));

    let conf = mock.get_calls_for("getMetaConf").await;
    assert_eq!(
        conf[0].string_arg(1).as_deref(),
        Some("metastore.client.socket.timeout")
    );
}

#[tokio::test]
async fn test_skipped_sasl_layer_stays_unframed() {
    let mock = start(
        MockMetastore::new("127.0.0.1:0").with_reply("getMetaConf", Reply::string("600s")),
    )
    .await;

    // No token and no principal: the SASL layer is skipped, and framing
    // is not applied on a SASL-enabled connection.
    let mut config = base_config(mock.uri());
    config.use_sasl = true;
    config.use_framed_transport = true;
    let mut client = MetastoreClient::builder(config).connect().await.unwrap();

    assert_eq!(client.get_meta_conf("k").await.unwrap(), "600s");
    assert!(mock.get_calls_for("set_ugi").await.is_empty());
}

#[tokio::test]
async fn test_compact_framed_round_trip() {
    let mock = start(
        MockMetastore::new("127.0.0.1:0")
            .with_encoding(WireEncoding::Compact)
            .with_framing(Framing::Length)
            .with_reply(
                "get_all_databases",
                Reply::strings(vec!["default".to_string(), "sales".to_string()]),
            ),
    )
    .await;

    let mut config = base_config(mock.uri());
    config.use_compact_protocol = true;
    config.use_framed_transport = true;
    let mut client = MetastoreClient::builder(config).connect().await.unwrap();

    assert_eq!(
        client.get_all_databases().await.unwrap(),
        vec!["default".to_string(), "sales".to_string()]
    );
}

#[tokio::test]
async fn test_execute_set_ugi_disabled() {
    let mock = start(MockMetastore::new("127.0.0.1:0")).await;
    let mut config = base_config(mock.uri());
    config.execute_set_ugi = false;
    let client = MetastoreClient::builder(config).connect().await.unwrap();
    assert!(client.is_connected().await);
    assert!(mock.get_calls_for("set_ugi").await.is_empty());
}

#[tokio::test]
async fn test_fails_over_past_dead_endpoint() {
    let mock = start(MockMetastore::new("127.0.0.1:0")).await;
    let config = base_config(format!("{},{}", dead_uri(), mock.uri()));

    let client = MetastoreClient::builder(config).connect().await.unwrap();
    let connected = client.connected_endpoint().unwrap();
    assert_eq!(connected.socket_address(), mock.address());
    assert_eq!(mock.connection_count(), 1);
}

#[tokio::test]
async fn test_all_endpoints_dead() {
    let mut config = base_config(format!("{},{}", dead_uri(), dead_uri()));
    config.connection_retries = 2;

    let err = MetastoreClient::builder(config).connect().await.unwrap_err();
    match err {
        ClientError::ConnectFailed {
            attempts,
            last_error,
        } => {
            assert_eq!(attempts, 4);
            assert!(last_error.is_some_and(|e| e.is_retryable()));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_k_attempts_over_n_endpoints() {
    let factory = Arc::new(FakeTransportFactory::failing());
    let mut config = ClientConfig::with_uris("thrift://a:9083,thrift://b:9083,thrift://c:9083");
    config.connection_retries = 4;

    let result = MetastoreClient::builder(config)
        .transport_factory(factory.clone())
        .token_store(Arc::new(InMemoryTokenStore::new()))
        .connect()
        .await;
    assert!(matches!(result, Err(ClientError::ConnectFailed { attempts: 12, .. })));
    assert_eq!(factory.open_calls(), 12);
}

#[tokio::test]
async fn test_second_of_three_succeeds() {
    let factory = Arc::new(FakeTransportFactory::scripted(vec![
        Outcome::Refuse,
        Outcome::Accept,
        Outcome::Accept,
    ]));
    let config = ClientConfig::with_uris("thrift://a:9083,thrift://b:9083,thrift://c:9083");

    let client = MetastoreClient::builder(config)
        .transport_factory(factory.clone())
        .connect()
        .await
        .unwrap();
    assert_eq!(factory.open_calls(), 2);
    assert_eq!(client.connected_endpoint().unwrap().host, "b");
}

#[tokio::test]
async fn test_unknown_method_is_application_error() {
    let mock = start(MockMetastore::new("127.0.0.1:0")).await;
    let mut client = MetastoreClient::builder(base_config(mock.uri()))
        .connect()
        .await
        .unwrap();

    let err = client.get_databases("sales*").await.unwrap_err();
    assert!(matches!(err, ClientError::Application { kind: 1, .. }));
    // The connection stays usable after an application exception.
    assert!(client.is_connected().await);
}

#[tokio::test]
async fn test_table_exists_carries_test_capabilities() {
    let mock = start(MockMetastore::new("127.0.0.1:0")).await;
    mock.register_handler(
        "get_table_req",
        Arc::new(|call: &MetastoreCall| {
            let request: GetTableRequest = call.struct_arg(1).expect("request struct");
            if request.tbl_name == "orders" {
                Reply::structure(GetTableResult {
                    table: TableRef {
                        table_name: request.tbl_name,
                        db_name: request.db_name,
                    },
                })
            } else {
                Reply::no_such_object(format!("{}.{} table not found", request.db_name, request.tbl_name))
            }
        }),
    )
    .await;

    let mut config = base_config(mock.uri());
    config.in_test = true;
    let mut client = MetastoreClient::builder(config).connect().await.unwrap();

    assert!(client.table_exists("sales", "orders").await.unwrap());
    assert!(!client.table_exists("sales", "returns").await.unwrap());

    let calls = mock.get_calls_for("get_table_req").await;
    let request: GetTableRequest = calls[0].struct_arg(1).unwrap();
    let capabilities = request.capabilities.unwrap();
    assert!(capabilities.contains(ClientCapability::TestCapability));
    assert!(capabilities.contains(ClientCapability::InsertOnlyTables));
}

#[tokio::test]
async fn test_reconnect_opens_new_connection() {
    let mock = start(MockMetastore::new("127.0.0.1:0")).await;
    let config = base_config(mock.uri());
    let mut client = MetastoreClient::builder(config.clone()).connect().await.unwrap();

    client.reconnect().await.unwrap();
    assert!(client.is_connected().await);
    assert!(client.is_compatible_with(&config).await);
    assert_eq!(mock.connection_count(), 2);
}

#[tokio::test]
async fn test_close_then_calls_fail() {
    let mock = start(MockMetastore::new("127.0.0.1:0")).await;
    let mut client = MetastoreClient::builder(base_config(mock.uri()))
        .connect()
        .await
        .unwrap();

    client.close().await;
    assert!(!client.is_connected().await);
    assert!(matches!(
        client.get_all_databases().await,
        Err(ClientError::NotConnected)
    ));
}

/// Expands the logical `cluster` host into the mock's address, counting lookups.
///
/// After `members_for` lookups the cluster reports no members.
struct ClusterResolver {
    address: String,
    lookups: Arc<AtomicUsize>,
    members_for: usize,
}

#[async_trait]
impl UriResolverHook for ClusterResolver {
    async fn resolve_uri(&self, endpoint: &Endpoint) -> metastore_client_core::Result<Vec<Endpoint>> {
        let seen = self.lookups.fetch_add(1, Ordering::SeqCst);
        assert_eq!(endpoint.host, "cluster");
        if seen >= self.members_for {
            return Ok(Vec::new());
        }
        Ok(vec![Endpoint::parse(&format!("thrift://{}", self.address))?])
    }
}

fn cluster_hooks(address: &str, lookups: &Arc<AtomicUsize>, members_for: usize) -> HookRegistry {
    let mut hooks = HookRegistry::default();
    let address = address.to_string();
    let counter = Arc::clone(lookups);
    hooks.register_uri_resolver("cluster-lookup", move |_| {
        Arc::new(ClusterResolver {
            address: address.clone(),
            lookups: Arc::clone(&counter),
            members_for,
        })
    });
    hooks
}

#[tokio::test]
async fn test_uri_resolver_hook_expands_and_reresolves() {
    let mock = start(MockMetastore::new("127.0.0.1:0")).await;
    let lookups = Arc::new(AtomicUsize::new(0));

    let hooks = cluster_hooks(mock.address(), &lookups, usize::MAX);

    let mut config = base_config("thrift://cluster:9083");
    config.uri_resolver = Some("cluster-lookup".to_string());
    let mut client = MetastoreClient::builder(config)
        .hooks(hooks)
        .connect()
        .await
        .unwrap();
    assert_eq!(client.connected_endpoint().unwrap().socket_address(), mock.address());
    assert_eq!(lookups.load(Ordering::SeqCst), 1);

    // Dynamic membership is looked up again on every reconnect.
    client.reconnect().await.unwrap();
    assert_eq!(lookups.load(Ordering::SeqCst), 2);
    assert_eq!(mock.connection_count(), 2);
}

#[tokio::test]
async fn test_reconnect_to_emptied_cluster_is_config_error() {
    let mock = start(MockMetastore::new("127.0.0.1:0")).await;
    let lookups = Arc::new(AtomicUsize::new(0));
    let hooks = cluster_hooks(mock.address(), &lookups, 1);

    let mut config = base_config("thrift://cluster:9083");
    config.uri_resolver = Some("cluster-lookup".to_string());
    config.connection_retries = 3;
    config.connect_retry_delay_secs = 30;
    let mut client = MetastoreClient::builder(config)
        .hooks(hooks)
        .connect()
        .await
        .unwrap();

    let started = std::time::Instant::now();
    let err = client.reconnect().await.unwrap_err();
    assert!(matches!(err, ClientError::Config(ConfigError::NoUris)));
    assert!(started.elapsed() < std::time::Duration::from_secs(5));
    assert_eq!(lookups.load(Ordering::SeqCst), 2);
    assert_eq!(mock.connection_count(), 1);
    assert!(!client.is_connected().await);
}
