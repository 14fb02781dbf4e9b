//! Metastore Client Core Library
//!
//! Client-side connector for a Thrift metadata service. It turns a list of
//! configured endpoint URIs into one open, authenticated connection, fails
//! over between endpoints with bounded retries, and serves the event feed and
//! name-listing calls on top of that connection.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Domain-specific error types
//! - [`endpoint`] - URI parsing, resolution and selection policy
//! - [`hooks`] - Filter and URI resolver hooks looked up by name
//! - [`capabilities`] - Capability sets attached to read requests
//! - [`protocol`] - Thrift binary and compact encodings
//! - [`transport`] - Sockets, framing and the per-endpoint transport builder
//! - [`auth`] - SASL mechanisms, identities and delegation tokens
//! - [`tls`] - TLS trust material and handshakes
//! - [`rpc`] - The metastore calls over an open transport
//! - [`client`] - Connection manager, connector and thread-safe facade
//! - [`notification`] - Event feed types and contiguity checks
//! - [`snapshot`] - Active configuration tracking
//! - [`metrics`] - Prometheus metrics collection
//!
//! # Example
//!
//! ```rust,ignore
//! use metastore_client_core::{ClientConfig, MetastoreClient, MetastoreConnector};
//!
//! let config = ClientConfig::from_file("metastore.yaml")?;
//! let mut client = MetastoreClient::builder(config).connect().await?;
//! let id = client.get_current_notification_event_id().await?;
//! ```

#![forbid(unsafe_code)]

pub mod auth;
pub mod capabilities;
pub mod client;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod hooks;
pub mod metrics;
pub mod notification;
pub mod protocol;
pub mod rpc;
pub mod snapshot;
pub mod tls;
pub mod transport;

/// Test utilities for integration testing.
///
/// This module is only available when compiling tests or when the `testing` feature is enabled.
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export commonly used types
pub use capabilities::{ClientCapabilities, ClientCapability};
pub use client::{
    open_connection_count, Catalog, MetastoreClient, MetastoreClientBuilder, MetastoreConnector,
    SynchronizedClient,
};
pub use config::{ClientConfig, TlsConfig, UriSelection};
pub use endpoint::{Endpoint, EndpointResolver};
pub use error::{ClientError, ConfigError, ProtocolError, Result, SaslError, TlsError};
pub use hooks::{FilterHook, HookRegistry, UriResolverHook};
pub use notification::{NotificationBatch, NotificationEvent, NotificationEventRequest};
pub use tls::TlsConnector;
