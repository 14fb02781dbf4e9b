//! Lock-per-call wrapper for sharing one connector between tasks.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{Catalog, MetastoreConnector};
use crate::config::ClientConfig;
use crate::error::Result;
use crate::notification::{NotificationBatch, NotificationEventRequest, NotificationFilter};

/// Wraps a connector so every call holds one exclusive lock for its whole duration.
///
/// Clones share the same connector and lock.
pub struct SynchronizedClient<C> {
    inner: Arc<Mutex<C>>,
}

impl<C> Clone for SynchronizedClient<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C> std::fmt::Debug for SynchronizedClient<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynchronizedClient").finish_non_exhaustive()
    }
}

impl<C: MetastoreConnector> SynchronizedClient<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }
}

#[async_trait]
impl<C: MetastoreConnector> MetastoreConnector for SynchronizedClient<C> {
    async fn reconnect(&mut self) -> Result<()> {
        self.inner.lock().await.reconnect().await
    }

    async fn close(&mut self) {
        self.inner.lock().await.close().await;
    }

    async fn is_connected(&self) -> bool {
        self.inner.lock().await.is_connected().await
    }

    async fn is_local_metastore(&self) -> bool {
        self.inner.lock().await.is_local_metastore().await
    }

    async fn is_compatible_with(&self, config: &ClientConfig) -> bool {
        self.inner.lock().await.is_compatible_with(config).await
    }

    async fn token_str_form(&self) -> Option<String> {
        self.inner.lock().await.token_str_form().await
    }

    async fn get_next_notification(
        &mut self,
        request: &NotificationEventRequest,
        allow_gaps: bool,
        filter: Option<&NotificationFilter>,
    ) -> Result<NotificationBatch> {
        self.inner
            .lock()
            .await
            .get_next_notification(request, allow_gaps, filter)
            .await
    }

    async fn get_current_notification_event_id(&mut self) -> Result<i64> {
        self.inner.lock().await.get_current_notification_event_id().await
    }

    async fn get_notification_events_count(&mut self, from_event_id: i64, db_name: &str) -> Result<i64> {
        self.inner
            .lock()
            .await
            .get_notification_events_count(from_event_id, db_name)
            .await
    }

    async fn get_delegation_token(&mut self, owner: &str, renewer: &str) -> Result<Option<String>> {
        self.inner.lock().await.get_delegation_token(owner, renewer).await
    }

    async fn renew_delegation_token(&mut self, token: &str) -> Result<i64> {
        self.inner.lock().await.renew_delegation_token(token).await
    }

    async fn cancel_delegation_token(&mut self, token: &str) -> Result<()> {
        self.inner.lock().await.cancel_delegation_token(token).await
    }

    async fn get_meta_conf(&mut self, key: &str) -> Result<String> {
        self.inner.lock().await.get_meta_conf(key).await
    }

    async fn set_meta_conf(&mut self, key: &str, value: &str) -> Result<()> {
        self.inner.lock().await.set_meta_conf(key, value).await
    }

    async fn get_all_databases(&mut self) -> Result<Vec<String>> {
        self.inner.lock().await.get_all_databases().await
    }

    async fn get_databases(&mut self, pattern: &str) -> Result<Vec<String>> {
        self.inner.lock().await.get_databases(pattern).await
    }

    async fn table_exists(&mut self, db_name: &str, table_name: &str) -> Result<bool> {
        self.inner.lock().await.table_exists(db_name, table_name).await
    }

    async fn create_catalog(&mut self, catalog: &Catalog) -> Result<()> {
        self.inner.lock().await.create_catalog(catalog).await
    }

    async fn get_catalog(&mut self, name: &str) -> Result<Catalog> {
        self.inner.lock().await.get_catalog(name).await
    }

    async fn drop_catalog(&mut self, name: &str) -> Result<()> {
        self.inner.lock().await.drop_catalog(name).await
    }
}
