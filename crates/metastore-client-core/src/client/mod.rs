//! The metastore connector: connection lifecycle plus the calls built on it.
//!
//! [`MetastoreClient`] owns one connection at a time and is not meant for
//! concurrent use; wrap it in [`SynchronizedClient`] to share it.

pub mod connector;
pub mod delegation;
pub mod manager;
pub mod synchronized;

pub use connector::{MetastoreClient, MetastoreClientBuilder};
pub use manager::{open_connection_count, Connection, ConnectionManager};
pub use synchronized::SynchronizedClient;

use async_trait::async_trait;

use crate::config::ClientConfig;
use crate::error::Result;
use crate::notification::{NotificationBatch, NotificationEventRequest, NotificationFilter};

/// Catalog description accepted by the catalog calls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    pub name: String,
    pub description: Option<String>,
    pub location_uri: String,
}

/// Operations a metastore connector offers its callers.
#[async_trait]
pub trait MetastoreConnector: Send + Sync {
    /// Close the current connection, if any, and connect again.
    async fn reconnect(&mut self) -> Result<()>;

    /// Close the current connection. Safe to call repeatedly.
    async fn close(&mut self);

    async fn is_connected(&self) -> bool;

    /// True when calls are served by an in-process handler.
    async fn is_local_metastore(&self) -> bool;

    /// Whether `config` would produce the same connection as the active one.
    async fn is_compatible_with(&self, config: &ClientConfig) -> bool;

    /// DIGEST token the current connection authenticated with.
    async fn token_str_form(&self) -> Option<String>;

    /// Fetch the next page of events after `request.last_event`.
    ///
    /// Fails with [`ClientError::MissingEvents`](crate::error::ClientError::MissingEvents)
    /// when ids are not contiguous and `allow_gaps` is false.
    async fn get_next_notification(
        &mut self,
        request: &NotificationEventRequest,
        allow_gaps: bool,
        filter: Option<&NotificationFilter>,
    ) -> Result<NotificationBatch>;

    async fn get_current_notification_event_id(&mut self) -> Result<i64>;

    async fn get_notification_events_count(&mut self, from_event_id: i64, db_name: &str) -> Result<i64>;

    async fn get_delegation_token(&mut self, owner: &str, renewer: &str) -> Result<Option<String>>;

    async fn renew_delegation_token(&mut self, token: &str) -> Result<i64>;

    async fn cancel_delegation_token(&mut self, token: &str) -> Result<()>;

    async fn get_meta_conf(&mut self, key: &str) -> Result<String>;

    async fn set_meta_conf(&mut self, key: &str, value: &str) -> Result<()>;

    async fn get_all_databases(&mut self) -> Result<Vec<String>>;

    async fn get_databases(&mut self, pattern: &str) -> Result<Vec<String>>;

    async fn table_exists(&mut self, db_name: &str, table_name: &str) -> Result<bool>;

    async fn create_catalog(&mut self, catalog: &Catalog) -> Result<()>;

    async fn get_catalog(&mut self, name: &str) -> Result<Catalog>;

    async fn drop_catalog(&mut self, name: &str) -> Result<()>;
}
