//! Test utilities for the metastore client.
//!
//! This module provides infrastructure for integration testing:
//!
//! - [`MockMetastore`] - A TCP server speaking the metastore wire protocol
//! - [`FakeTransportFactory`] - A scripted transport factory with no sockets
//! - [`FakeRpc`] - An in-memory RPC channel, also usable as an embedded handler
//!
//! # Example
//!
//! ```rust,ignore
//! use metastore_client_core::testing::{MockMetastore, Reply};
//!
//! #[tokio::test]
//! async fn test_meta_conf() {
//!     let mut mock = MockMetastore::new("127.0.0.1:0")
//!         .with_reply("getMetaConf", Reply::string("600s"));
//!     mock.start().await.unwrap();
//!
//!     let config = ClientConfig::with_uris(mock.uri());
//!     let mut client = MetastoreClient::builder(config).connect().await.unwrap();
//!     assert_eq!(client.get_meta_conf("k").await.unwrap(), "600s");
//! }
//! ```

pub mod fakes;
pub mod mock_metastore;

pub use fakes::{CallLog, FakeReplies, FakeRpc, FakeTransportFactory, Outcome};
pub use mock_metastore::{DigestAuth, MetastoreCall, MockMetastore, Reply, ReplyHandler};
