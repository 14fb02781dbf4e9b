//! Thrift client for the metastore service over a [`ThriftTransport`].

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, trace};

use super::messages::{
    ApplicationException, CurrentNotificationEventId, GetTableRequest, GetTableResult,
    NotificationEventsCountResponse, ServiceException, TableRef, ThriftRead, ThriftWrite,
};
use super::MetastoreRpc;
use crate::error::{ClientError, ProtocolError, ProtocolResult, Result, ServiceExceptionKind};
use crate::notification::{
    NotificationEventRequest, NotificationEventResponse, NotificationEventsCountRequest,
};
use crate::protocol::{MessageType, ProtocolReader, ProtocolWriter, TType};
use crate::transport::ThriftTransport;

/// Decodes the success field (id 0) of a result struct.
trait ReplyValue: Sized {
    fn read_value<R: ProtocolReader + ?Sized>(r: &mut R, field_type: TType) -> ProtocolResult<Self>;
}

fn expect_type(actual: TType, expected: TType) -> ProtocolResult<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(ProtocolError::UnexpectedReply(format!(
            "success field has type {actual:?}, expected {expected:?}"
        )))
    }
}

impl ReplyValue for String {
    fn read_value<R: ProtocolReader + ?Sized>(r: &mut R, field_type: TType) -> ProtocolResult<Self> {
        expect_type(field_type, TType::String)?;
        r.read_string()
    }
}

impl ReplyValue for i64 {
    fn read_value<R: ProtocolReader + ?Sized>(r: &mut R, field_type: TType) -> ProtocolResult<Self> {
        expect_type(field_type, TType::I64)?;
        r.read_i64()
    }
}

impl ReplyValue for Vec<String> {
    fn read_value<R: ProtocolReader + ?Sized>(r: &mut R, field_type: TType) -> ProtocolResult<Self> {
        expect_type(field_type, TType::List)?;
        r.read_string_list()
    }
}

macro_rules! struct_reply {
    ($($ty:ty),* $(,)?) => {
        $(
            impl ReplyValue for $ty {
                fn read_value<R: ProtocolReader + ?Sized>(
                    r: &mut R,
                    field_type: TType,
                ) -> ProtocolResult<Self> {
                    expect_type(field_type, TType::Struct)?;
                    <$ty as ThriftRead>::read(r)
                }
            }
        )*
    };
}

struct_reply!(
    NotificationEventResponse,
    CurrentNotificationEventId,
    NotificationEventsCountResponse,
    GetTableResult,
);

/// Result type for calls declared `void`.
struct Void;

impl ReplyValue for Void {
    fn read_value<R: ProtocolReader + ?Sized>(r: &mut R, field_type: TType) -> ProtocolResult<Self> {
        r.skip(field_type)?;
        Ok(Void)
    }
}

fn service_exception_kind(field_id: i16) -> Option<ServiceExceptionKind> {
    match field_id {
        1 => Some(ServiceExceptionKind::Meta),
        2 => Some(ServiceExceptionKind::NoSuchObject),
        _ => None,
    }
}

fn missing_result(method: &str) -> ClientError {
    ProtocolError::UnexpectedReply(format!("{method} failed: unknown result")).into()
}

/// Speaks the metastore service over one open transport.
pub struct ThriftMetastoreClient<S> {
    transport: ThriftTransport<S>,
    seq_id: i32,
    open: bool,
}

impl<S> std::fmt::Debug for ThriftMetastoreClient<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThriftMetastoreClient")
            .field("transport", &self.transport)
            .field("seq_id", &self.seq_id)
            .field("open", &self.open)
            .finish()
    }
}

impl<S> ThriftMetastoreClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    #[must_use]
    pub fn new(transport: ThriftTransport<S>) -> Self {
        Self {
            transport,
            seq_id: 0,
            open: true,
        }
    }

    /// Start a call: message header plus the opening of the args struct.
    fn begin_call(&mut self, method: &str) -> Box<dyn ProtocolWriter + Send> {
        self.seq_id = self.seq_id.wrapping_add(1);
        let mut w = self.transport.encoding().writer();
        w.write_message_begin(method, MessageType::Call, self.seq_id);
        w.write_struct_begin();
        w
    }

    /// Finish the args struct, send it and wait for the reply bytes.
    async fn exchange(&mut self, method: &str, mut w: Box<dyn ProtocolWriter + Send>) -> Result<Bytes> {
        if !self.open {
            return Err(ClientError::NotConnected);
        }
        w.write_field_stop();
        w.write_struct_end();
        let payload = w.take().freeze();
        trace!(method, seq_id = self.seq_id, "calling");
        self.transport.write_message(payload).await?;
        self.transport.read_message().await
    }

    fn decode_reply<T: ReplyValue>(&self, method: &str, reply: &[u8]) -> Result<Option<T>> {
        let mut r = self.transport.encoding().reader(reply);
        let header = r.read_message_begin()?;
        if header.message_type == MessageType::Exception {
            let exception = ApplicationException::read(r.as_mut())?;
            debug!(method, kind = exception.kind, message = %exception.message, "application exception");
            return Err(ClientError::Application {
                kind: exception.kind,
                message: exception.message,
            });
        }
        if header.message_type != MessageType::Reply || header.name != method {
            return Err(ProtocolError::UnexpectedReply(format!(
                "expected reply to {method}, got {:?} {}",
                header.message_type, header.name
            ))
            .into());
        }
        if header.seq_id != self.seq_id {
            return Err(ProtocolError::UnexpectedReply(format!(
                "{method} failed: out of sequence response (expected {}, got {})",
                self.seq_id, header.seq_id
            ))
            .into());
        }

        let mut value = None;
        let mut failure = None;
        r.read_struct_begin()?;
        loop {
            let field = r.read_field_begin()?;
            match (field.id, field.field_type) {
                (_, TType::Stop) => break,
                (0, field_type) => value = Some(T::read_value(r.as_mut(), field_type)?),
                (id, TType::Struct) if service_exception_kind(id).is_some() => {
                    let exception = ServiceException::read(r.as_mut())?;
                    failure = service_exception_kind(id).map(|kind| (kind, exception.message));
                }
                (_, other) => r.skip(other)?,
            }
        }
        r.read_struct_end()?;

        if let Some((kind, message)) = failure {
            return Err(ClientError::Service { kind, message });
        }
        Ok(value)
    }

    async fn call<T: ReplyValue>(
        &mut self,
        method: &'static str,
        w: Box<dyn ProtocolWriter + Send>,
    ) -> Result<T> {
        let reply = self.exchange(method, w).await?;
        self.decode_reply(method, &reply)?
            .ok_or_else(|| missing_result(method))
    }

    async fn call_void(&mut self, method: &'static str, w: Box<dyn ProtocolWriter + Send>) -> Result<()> {
        let reply = self.exchange(method, w).await?;
        self.decode_reply::<Void>(method, &reply).map(drop)
    }
}

#[async_trait]
impl<S> MetastoreRpc for ThriftMetastoreClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + Sync,
{
    async fn set_ugi(&mut self, user: &str, groups: &[String]) -> Result<Vec<String>> {
        let mut w = self.begin_call("set_ugi");
        w.write_field_begin(TType::String, 1);
        w.write_string(user);
        w.write_field_begin(TType::List, 2);
        w.write_string_list(groups);
        self.call("set_ugi", w).await
    }

    async fn get_delegation_token(&mut self, owner: &str, renewer: &str) -> Result<String> {
        let mut w = self.begin_call("get_delegation_token");
        w.write_field_begin(TType::String, 1);
        w.write_string(owner);
        w.write_field_begin(TType::String, 2);
        w.write_string(renewer);
        self.call("get_delegation_token", w).await
    }

    async fn renew_delegation_token(&mut self, token: &str) -> Result<i64> {
        let mut w = self.begin_call("renew_delegation_token");
        w.write_field_begin(TType::String, 1);
        w.write_string(token);
        self.call("renew_delegation_token", w).await
    }

    async fn cancel_delegation_token(&mut self, token: &str) -> Result<()> {
        let mut w = self.begin_call("cancel_delegation_token");
        w.write_field_begin(TType::String, 1);
        w.write_string(token);
        self.call_void("cancel_delegation_token", w).await
    }

    async fn get_next_notification(
        &mut self,
        request: &NotificationEventRequest,
    ) -> Result<NotificationEventResponse> {
        let mut w = self.begin_call("get_next_notification");
        w.write_field_begin(TType::Struct, 1);
        request.write(w.as_mut());
        self.call("get_next_notification", w).await
    }

    async fn get_current_notification_event_id(&mut self) -> Result<i64> {
        let w = self.begin_call("get_current_notificationEventId");
        self.call::<CurrentNotificationEventId>("get_current_notificationEventId", w)
            .await
            .map(|id| id.event_id)
    }

    async fn get_notification_events_count(
        &mut self,
        request: &NotificationEventsCountRequest,
    ) -> Result<i64> {
        let mut w = self.begin_call("get_notification_events_count");
        w.write_field_begin(TType::Struct, 1);
        request.write(w.as_mut());
        self.call::<NotificationEventsCountResponse>("get_notification_events_count", w)
            .await
            .map(|count| count.events_count)
    }

    async fn get_meta_conf(&mut self, key: &str) -> Result<String> {
        let mut w = self.begin_call("getMetaConf");
        w.write_field_begin(TType::String, 1);
        w.write_string(key);
        self.call("getMetaConf", w).await
    }

    async fn set_meta_conf(&mut self, key: &str, value: &str) -> Result<()> {
        let mut w = self.begin_call("setMetaConf");
        w.write_field_begin(TType::String, 1);
        w.write_string(key);
        w.write_field_begin(TType::String, 2);
        w.write_string(value);
        self.call_void("setMetaConf", w).await
    }

    async fn get_all_databases(&mut self) -> Result<Vec<String>> {
        let w = self.begin_call("get_all_databases");
        self.call("get_all_databases", w).await
    }

    async fn get_databases(&mut self, pattern: &str) -> Result<Vec<String>> {
        let mut w = self.begin_call("get_databases");
        w.write_field_begin(TType::String, 1);
        w.write_string(pattern);
        self.call("get_databases", w).await
    }

    async fn get_table(&mut self, request: &GetTableRequest) -> Result<TableRef> {
        let mut w = self.begin_call("get_table_req");
        w.write_field_begin(TType::Struct, 1);
        request.write(w.as_mut());
        self.call::<GetTableResult>("get_table_req", w)
            .await
            .map(|result| result.table)
    }

    async fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        self.transport.shutdown().await
    }

    fn is_open(&self) -> bool {
        self.open
    }
}
