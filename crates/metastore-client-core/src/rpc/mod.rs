//! RPC surface of the metastore service used by the connector.
//!
//! [`MetastoreRpc`] is the seam between the connection logic and the wire:
//! [`ThriftMetastoreClient`] speaks it over a socket, an embedded handler
//! implements it in process, and tests substitute fakes.

pub mod client;
pub mod messages;

pub use client::ThriftMetastoreClient;
pub use messages::{GetTableRequest, TableRef};

use async_trait::async_trait;

use crate::error::Result;
use crate::notification::{
    NotificationEventRequest, NotificationEventResponse, NotificationEventsCountRequest,
};

/// Calls the connector issues against a metastore.
#[async_trait]
pub trait MetastoreRpc: Send + Sync {
    /// Announce the caller's user and groups; returns the groups the server recorded.
    async fn set_ugi(&mut self, user: &str, groups: &[String]) -> Result<Vec<String>>;

    async fn get_delegation_token(&mut self, owner: &str, renewer: &str) -> Result<String>;

    /// Returns the new expiry time in milliseconds.
    async fn renew_delegation_token(&mut self, token: &str) -> Result<i64>;

    async fn cancel_delegation_token(&mut self, token: &str) -> Result<()>;

    async fn get_next_notification(
        &mut self,
        request: &NotificationEventRequest,
    ) -> Result<NotificationEventResponse>;

    async fn get_current_notification_event_id(&mut self) -> Result<i64>;

    async fn get_notification_events_count(
        &mut self,
        request: &NotificationEventsCountRequest,
    ) -> Result<i64>;

    async fn get_meta_conf(&mut self, key: &str) -> Result<String>;

    async fn set_meta_conf(&mut self, key: &str, value: &str) -> Result<()>;

    async fn get_all_databases(&mut self) -> Result<Vec<String>>;

    async fn get_databases(&mut self, pattern: &str) -> Result<Vec<String>>;

    async fn get_table(&mut self, request: &GetTableRequest) -> Result<TableRef>;

    /// Release the connection. Further calls fail.
    async fn close(&mut self) -> Result<()>;

    fn is_open(&self) -> bool;
}
