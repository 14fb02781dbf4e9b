//! In-memory stand-ins for the transport factory and the RPC channel.
//!
//! [`FakeTransportFactory`] follows a script of accept/refuse outcomes and
//! hands out [`FakeRpc`] channels that answer from canned replies. Every
//! call is recorded in a shared [`CallLog`].

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::endpoint::Endpoint;
use crate::error::{ClientError, ConfigError, Result, ServiceExceptionKind};
use crate::notification::{
    NotificationEvent, NotificationEventRequest, NotificationEventResponse,
    NotificationEventsCountRequest,
};
use crate::rpc::{GetTableRequest, MetastoreRpc, TableRef};
use crate::transport::TransportFactory;

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What the factory does with one `open` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Accept,
    /// Retryable transport failure.
    Refuse,
    /// Non-retryable configuration failure.
    ConfigError,
}

/// Canned answers served by [`FakeRpc`].
#[derive(Debug, Clone, Default)]
pub struct FakeReplies {
    pub databases: Vec<String>,
    /// `(database, table)` pairs that exist.
    pub tables: Vec<(String, String)>,
    pub events: Vec<NotificationEvent>,
    pub current_event_id: i64,
    /// Token returned by `get_delegation_token`; `None` makes the call fail.
    pub delegation_token: Option<String>,
    pub fail_set_ugi: bool,
    pub meta_conf: HashMap<String, String>,
    /// Time each call takes.
    pub call_delay: Option<Duration>,
}

/// Calls and lifecycle events shared by every channel of one factory.
#[derive(Debug, Default)]
pub struct CallLog {
    calls: Mutex<Vec<String>>,
    closed: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl CallLog {
    fn record(&self, call: String) {
        locked(&self.calls).push(call);
    }

    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        locked(&self.calls).clone()
    }

    #[must_use]
    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Highest number of calls that were running at the same time.
    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

/// [`MetastoreRpc`] answering from [`FakeReplies`].
#[derive(Debug)]
pub struct FakeRpc {
    replies: FakeReplies,
    log: Arc<CallLog>,
    open: bool,
}

impl Default for FakeRpc {
    fn default() -> Self {
        Self::new(FakeReplies::default(), Arc::new(CallLog::default()))
    }
}

impl FakeRpc {
    #[must_use]
    pub fn new(replies: FakeReplies, log: Arc<CallLog>) -> Self {
        Self {
            replies,
            log,
            open: true,
        }
    }

    #[must_use]
    pub fn log(&self) -> Arc<CallLog> {
        Arc::clone(&self.log)
    }

    async fn enter(&self, call: String) -> Result<()> {
        if !self.open {
            return Err(ClientError::NotConnected);
        }
        self.log.record(call);
        let running = self.log.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.log.max_in_flight.fetch_max(running, Ordering::SeqCst);
        if let Some(delay) = self.replies.call_delay {
            tokio::time::sleep(delay).await;
        }
        self.log.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

fn service_error(kind: ServiceExceptionKind, message: impl Into<String>) -> ClientError {
    ClientError::Service {
        kind,
        message: message.into(),
    }
}

#[async_trait]
impl MetastoreRpc for FakeRpc {
    async fn set_ugi(&mut self, user: &str, groups: &[String]) -> Result<Vec<String>> {
        self.enter("set_ugi".to_string()).await?;
        if self.replies.fail_set_ugi {
            return Err(ClientError::Application {
                kind: 1,
                message: "Invalid method name: 'set_ugi'".to_string(),
            });
        }
        let mut recorded = vec![user.to_string()];
        recorded.extend(groups.iter().cloned());
        Ok(recorded)
    }

    async fn get_delegation_token(&mut self, owner: &str, renewer: &str) -> Result<String> {
        self.enter(format!("get_delegation_token {owner} {renewer}")).await?;
        self.replies
            .delegation_token
            .clone()
            .ok_or_else(|| service_error(ServiceExceptionKind::Meta, "delegation tokens are disabled"))
    }

    async fn renew_delegation_token(&mut self, token: &str) -> Result<i64> {
        self.enter(format!("renew_delegation_token {token}")).await?;
        Ok(86_400_000)
    }

    async fn cancel_delegation_token(&mut self, token: &str) -> Result<()> {
        self.enter(format!("cancel_delegation_token {token}")).await
    }

    async fn get_next_notification(
        &mut self,
        request: &NotificationEventRequest,
    ) -> Result<NotificationEventResponse> {
        self.enter(format!("get_next_notification {}", request.last_event)).await?;
        let limit = request
            .max_events
            .and_then(|max| usize::try_from(max).ok())
            .filter(|max| *max > 0)
            .unwrap_or(usize::MAX);
        let events = self
            .replies
            .events
            .iter()
            .filter(|event| event.event_id > request.last_event)
            .filter(|event| !request.event_type_skip_list.contains(&event.event_type))
            .take(limit)
            .cloned()
            .collect();
        Ok(NotificationEventResponse { events })
    }

    async fn get_current_notification_event_id(&mut self) -> Result<i64> {
        self.enter("get_current_notification_event_id".to_string()).await?;
        Ok(self.replies.current_event_id)
    }

    async fn get_notification_events_count(
        &mut self,
        request: &NotificationEventsCountRequest,
    ) -> Result<i64> {
        self.enter(format!(
            "get_notification_events_count {} {}",
            request.from_event_id, request.db_name
        ))
        .await?;
        let count = self
            .replies
            .events
            .iter()
            .filter(|event| event.event_id > request.from_event_id)
            .filter(|event| event.db_name.as_deref() == Some(request.db_name.as_str()))
            .count();
        Ok(count as i64)
    }

    async fn get_meta_conf(&mut self, key: &str) -> Result<String> {
        self.enter(format!("get_meta_conf {key}")).await?;
        self.replies
            .meta_conf
            .get(key)
            .cloned()
            .ok_or_else(|| service_error(ServiceExceptionKind::Meta, format!("invalid configuration key {key}")))
    }

    async fn set_meta_conf(&mut self, key: &str, value: &str) -> Result<()> {
        self.enter(format!("set_meta_conf {key}={value}")).await?;
        self.replies.meta_conf.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get_all_databases(&mut self) -> Result<Vec<String>> {
        self.enter("get_all_databases".to_string()).await?;
        Ok(self.replies.databases.clone())
    }

    async fn get_databases(&mut self, pattern: &str) -> Result<Vec<String>> {
        self.enter(format!("get_databases {pattern}")).await?;
        let prefix = pattern.trim_end_matches('*');
        Ok(self
            .replies
            .databases
            .iter()
            .filter(|db| db.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn get_table(&mut self, request: &GetTableRequest) -> Result<TableRef> {
        let capabilities = request
            .capabilities
            .as_ref()
            .map_or(0, |caps| caps.values().len());
        self.enter(format!(
            "get_table {}.{} capabilities={capabilities}",
            request.db_name, request.tbl_name
        ))
        .await?;
        self.replies
            .tables
            .iter()
            .find(|(db, table)| *db == request.db_name && *table == request.tbl_name)
            .map(|(db, table)| TableRef {
                table_name: table.clone(),
                db_name: db.clone(),
            })
            .ok_or_else(|| {
                service_error(
                    ServiceExceptionKind::NoSuchObject,
                    format!("{}.{} table not found", request.db_name, request.tbl_name),
                )
            })
    }

    async fn close(&mut self) -> Result<()> {
        if self.open {
            self.open = false;
            self.log.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

/// [`TransportFactory`] that follows a script instead of opening sockets.
///
/// Once the script runs out, every open uses the fallback outcome.
#[derive(Debug)]
pub struct FakeTransportFactory {
    script: Mutex<VecDeque<Outcome>>,
    fallback: Outcome,
    replies: FakeReplies,
    log: Arc<CallLog>,
    open_calls: AtomicUsize,
    tokens_seen: Mutex<Vec<Option<String>>>,
}

impl FakeTransportFactory {
    fn with_script(script: Vec<Outcome>, fallback: Outcome) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            replies: FakeReplies::default(),
            log: Arc::new(CallLog::default()),
            open_calls: AtomicUsize::new(0),
            tokens_seen: Mutex::new(Vec::new()),
        }
    }

    /// Every endpoint accepts.
    #[must_use]
    pub fn accepting() -> Self {
        Self::with_script(Vec::new(), Outcome::Accept)
    }

    /// Every endpoint refuses.
    #[must_use]
    pub fn failing() -> Self {
        Self::with_script(Vec::new(), Outcome::Refuse)
    }

    /// Follow `script`, then accept.
    #[must_use]
    pub fn scripted(script: Vec<Outcome>) -> Self {
        Self::with_script(script, Outcome::Accept)
    }

    #[must_use]
    pub fn with_replies(mut self, replies: FakeReplies) -> Self {
        self.replies = replies;
        self
    }

    #[must_use]
    pub fn with_failing_set_ugi(mut self) -> Self {
        self.replies.fail_set_ugi = true;
        self
    }

    #[must_use]
    pub fn with_delegation_token(mut self, token: impl Into<String>) -> Self {
        self.replies.delegation_token = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_failing_delegation(mut self) -> Self {
        self.replies.delegation_token = None;
        self
    }

    #[must_use]
    pub fn with_events(mut self, events: Vec<NotificationEvent>) -> Self {
        self.replies.events = events;
        self
    }

    #[must_use]
    pub fn with_databases(mut self, databases: Vec<String>) -> Self {
        self.replies.databases = databases;
        self
    }

    #[must_use]
    pub fn with_tables(mut self, tables: Vec<(String, String)>) -> Self {
        self.replies.tables = tables;
        self
    }

    #[must_use]
    pub fn with_call_delay(mut self, delay: Duration) -> Self {
        self.replies.call_delay = Some(delay);
        self
    }

    /// Number of `open` calls so far, successful or not.
    #[must_use]
    pub fn open_calls(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }

    /// Token passed to each `open` call, in order.
    #[must_use]
    pub fn tokens_seen(&self) -> Vec<Option<String>> {
        locked(&self.tokens_seen).clone()
    }

    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.log.calls()
    }

    #[must_use]
    pub fn closed(&self) -> usize {
        self.log.closed()
    }

    #[must_use]
    pub fn max_concurrent_calls(&self) -> usize {
        self.log.max_in_flight()
    }
}

#[async_trait]
impl TransportFactory for FakeTransportFactory {
    async fn open(&self, endpoint: &Endpoint, token: Option<&str>) -> Result<Box<dyn MetastoreRpc>> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        locked(&self.tokens_seen).push(token.map(str::to_string));
        let outcome = locked(&self.script).pop_front().unwrap_or(self.fallback);
        match outcome {
            Outcome::Accept => Ok(Box::new(FakeRpc::new(
                self.replies.clone(),
                Arc::clone(&self.log),
            ))),
            Outcome::Refuse => Err(ClientError::transport(endpoint, "connection refused")),
            Outcome::ConfigError => Err(ConfigError::MissingTrustStore.into()),
        }
    }
}
