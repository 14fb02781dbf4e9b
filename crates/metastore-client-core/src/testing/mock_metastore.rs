//! Mock metastore server for integration testing.
//!
//! A lightweight server that:
//! - Accepts connections in the binary or compact encoding, framed or not
//! - Optionally runs the server side of a DIGEST-MD5 handshake first
//! - Records all calls received
//! - Returns configurable replies

use bytes::{BufMut, Bytes, BytesMut};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};

use crate::auth::sasl::digest::{digest_proofs, parse_directives};
use crate::auth::sasl::NegotiationStatus;
use crate::auth::token::DelegationToken;
use crate::error::ServiceExceptionKind;
use crate::protocol::{MessageType, ProtocolReader, ProtocolWriter, TType, WireEncoding};
use crate::rpc::messages::{ApplicationException, ServiceException, ThriftRead, ThriftWrite};
use crate::transport::{Framing, ThriftTransport};

/// Nonce the mock offers in its DIGEST challenge.
const MOCK_NONCE: &str = "bW9jay1tZXRhc3RvcmU=";

/// `TApplicationException` type for an unknown method.
pub const UNKNOWN_METHOD: i32 = 1;

/// A recorded call.
#[derive(Debug, Clone)]
pub struct MetastoreCall {
    pub method: String,
    pub seq_id: i32,
    pub encoding: WireEncoding,
    /// The whole request message, header included.
    pub payload: Bytes,
}

impl MetastoreCall {
    /// Reader positioned at the value of argument `id`, with its wire type.
    fn find_arg(&self, id: i16) -> Option<(Box<dyn ProtocolReader + Send + '_>, TType)> {
        let mut r = self.encoding.reader(&self.payload);
        r.read_message_begin().ok()?;
        r.read_struct_begin().ok()?;
        loop {
            let field = r.read_field_begin().ok()?;
            if field.field_type == TType::Stop {
                return None;
            }
            if field.id == id {
                return Some((r, field.field_type));
            }
            r.skip(field.field_type).ok()?;
        }
    }

    /// String argument `id`, if present.
    #[must_use]
    pub fn string_arg(&self, id: i16) -> Option<String> {
        let (mut r, field_type) = self.find_arg(id)?;
        if field_type != TType::String {
            return None;
        }
        r.read_string().ok()
    }

    /// Struct argument `id`, if present and decodable.
    #[must_use]
    pub fn struct_arg<T: ThriftRead>(&self, id: i16) -> Option<T> {
        let (mut r, field_type) = self.find_arg(id)?;
        if field_type != TType::Struct {
            return None;
        }
        T::read(r.as_mut()).ok()
    }
}

type ResultWriter = Arc<dyn Fn(&mut (dyn ProtocolWriter + Send)) + Send + Sync>;

/// How the mock answers one call.
#[derive(Clone)]
pub enum Reply {
    /// Writes the success field of the result struct.
    Success(ResultWriter),
    /// An empty result struct.
    Void,
    /// A declared exception in the result struct.
    Service {
        kind: ServiceExceptionKind,
        message: String,
    },
    /// A `TApplicationException` message.
    Application { kind: i32, message: String },
}

impl std::fmt::Debug for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success(_) => f.write_str("Success"),
            Self::Void => f.write_str("Void"),
            Self::Service { kind, message } => write!(f, "Service({kind}: {message})"),
            Self::Application { kind, message } => write!(f, "Application({kind}: {message})"),
        }
    }
}

impl Reply {
    pub fn string(value: impl Into<String>) -> Self {
        let value = value.into();
        Self::Success(Arc::new(move |w| {
            w.write_field_begin(TType::String, 0);
            w.write_string(&value);
        }))
    }

    #[must_use]
    pub fn i64(value: i64) -> Self {
        Self::Success(Arc::new(move |w| {
            w.write_field_begin(TType::I64, 0);
            w.write_i64(value);
        }))
    }

    #[must_use]
    pub fn strings(values: Vec<String>) -> Self {
        Self::Success(Arc::new(move |w| {
            w.write_field_begin(TType::List, 0);
            w.write_string_list(&values);
        }))
    }

    pub fn structure<T: ThriftWrite + Send + Sync + 'static>(value: T) -> Self {
        Self::Success(Arc::new(move |w| {
            w.write_field_begin(TType::Struct, 0);
            value.write(w);
        }))
    }

    pub fn no_such_object(message: impl Into<String>) -> Self {
        Self::Service {
            kind: ServiceExceptionKind::NoSuchObject,
            message: message.into(),
        }
    }

    fn encode(&self, call: &MetastoreCall) -> Bytes {
        let mut w = call.encoding.writer();
        if let Self::Application { kind, message } = self {
            w.write_message_begin(&call.method, MessageType::Exception, call.seq_id);
            ApplicationException {
                message: message.clone(),
                kind: *kind,
            }
            .write(w.as_mut());
            return w.take().freeze();
        }

        w.write_message_begin(&call.method, MessageType::Reply, call.seq_id);
        w.write_struct_begin();
        match self {
            Self::Success(write) => write(w.as_mut()),
            Self::Service { kind, message } => {
                let id = match kind {
                    ServiceExceptionKind::Meta => 1,
                    ServiceExceptionKind::NoSuchObject => 2,
                };
                w.write_field_begin(TType::Struct, id);
                ServiceException {
                    message: message.clone(),
                }
                .write(w.as_mut());
            }
            Self::Void | Self::Application { .. } => {}
        }
        w.write_field_stop();
        w.write_struct_end();
        w.take().freeze()
    }
}

/// Reply generator function type.
pub type ReplyHandler = Arc<dyn Fn(&MetastoreCall) -> Reply + Send + Sync>;

/// Credentials the mock expects from a DIGEST-MD5 client.
#[derive(Debug, Clone)]
pub struct DigestAuth {
    pub username: String,
    pub password: String,
}

impl DigestAuth {
    /// Accept clients presenting `token`.
    #[must_use]
    pub fn from_token(token: &DelegationToken) -> Self {
        Self {
            username: token.sasl_user_name(),
            password: token.sasl_password(),
        }
    }
}

struct Shared {
    encoding: WireEncoding,
    framing: Framing,
    digest: Option<DigestAuth>,
    call_log: RwLock<Vec<MetastoreCall>>,
    handlers: RwLock<HashMap<String, ReplyHandler>>,
    connections: AtomicUsize,
    authenticated: RwLock<Vec<String>>,
}

/// Mock metastore server for testing.
pub struct MockMetastore {
    address: String,
    encoding: WireEncoding,
    framing: Framing,
    digest: Option<DigestAuth>,
    shutdown_tx: Option<broadcast::Sender<()>>,
    shared: Option<Arc<Shared>>,
    pending_handlers: HashMap<String, ReplyHandler>,
}

impl MockMetastore {
    /// Create a mock that will bind to the given address.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            encoding: WireEncoding::Binary,
            framing: Framing::None,
            digest: None,
            shutdown_tx: None,
            shared: None,
            pending_handlers: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_encoding(mut self, encoding: WireEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    #[must_use]
    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    /// Require a DIGEST-MD5 handshake. Messages are framed afterwards.
    #[must_use]
    pub fn with_digest_auth(mut self, auth: DigestAuth) -> Self {
        self.digest = Some(auth);
        self.framing = Framing::Length;
        self
    }

    /// Answer every call to `method` with `reply`. Use [`MockMetastore::register_handler`] once started.
    #[must_use]
    pub fn with_reply(mut self, method: &str, reply: Reply) -> Self {
        self.pending_handlers
            .insert(method.to_string(), Arc::new(move |_| reply.clone()));
        self
    }

    /// Start the mock.
    ///
    /// Returns the actual address it is listening on.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the address fails.
    pub async fn start(&mut self) -> std::io::Result<String> {
        let listener = TcpListener::bind(&self.address).await?;
        let actual_address = listener.local_addr()?.to_string();
        self.address.clone_from(&actual_address);

        let shared = Arc::new(Shared {
            encoding: self.encoding,
            framing: self.framing,
            digest: self.digest.clone(),
            call_log: RwLock::new(Vec::new()),
            handlers: RwLock::new(std::mem::take(&mut self.pending_handlers)),
            connections: AtomicUsize::new(0),
            authenticated: RwLock::new(Vec::new()),
        });
        self.shared = Some(Arc::clone(&shared));

        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx.clone());
        let mut shutdown_rx = shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    result = listener.accept() => {
                        match result {
                            Ok((stream, addr)) => {
                                shared.connections.fetch_add(1, Ordering::SeqCst);
                                let shared = Arc::clone(&shared);
                                let shutdown_rx = shutdown_tx.subscribe();
                                tokio::spawn(async move {
                                    Self::handle_connection(stream, addr.to_string(), shared, shutdown_rx).await;
                                });
                            }
                            Err(_) => break,
                        }
                    }
                }
            }
        });

        Ok(actual_address)
    }

    /// Stop the mock.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }

    /// `thrift://` URI of the running mock.
    #[must_use]
    pub fn uri(&self) -> String {
        format!("thrift://{}", self.address)
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Register a reply handler for a method.
    pub async fn register_handler(&self, method: &str, handler: ReplyHandler) {
        if let Some(shared) = &self.shared {
            shared.handlers.write().await.insert(method.to_string(), handler);
        }
    }

    /// Get all recorded calls.
    pub async fn get_calls(&self) -> Vec<MetastoreCall> {
        match &self.shared {
            Some(shared) => shared.call_log.read().await.clone(),
            None => Vec::new(),
        }
    }

    /// Get calls to one method.
    pub async fn get_calls_for(&self, method: &str) -> Vec<MetastoreCall> {
        self.get_calls()
            .await
            .into_iter()
            .filter(|c| c.method == method)
            .collect()
    }

    /// Number of connections accepted so far.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.shared
            .as_ref()
            .map_or(0, |s| s.connections.load(Ordering::SeqCst))
    }

    /// SASL user names that completed the DIGEST handshake.
    pub async fn authenticated_users(&self) -> Vec<String> {
        match &self.shared {
            Some(shared) => shared.authenticated.read().await.clone(),
            None => Vec::new(),
        }
    }

    async fn handle_connection(
        mut stream: TcpStream,
        peer: String,
        shared: Arc<Shared>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        if let Some(auth) = &shared.digest {
            match Self::serve_digest(&mut stream, auth).await {
                Ok(true) => shared.authenticated.write().await.push(auth.username.clone()),
                Ok(false) | Err(_) => return,
            }
        }

        let mut transport = ThriftTransport::new(stream, peer, shared.encoding, shared.framing);
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                result = transport.read_message() => {
                    let Ok(payload) = result else { break };
                    let Ok(header) = shared.encoding.reader(&payload).read_message_begin() else {
                        break;
                    };
                    let call = MetastoreCall {
                        method: header.name,
                        seq_id: header.seq_id,
                        encoding: shared.encoding,
                        payload,
                    };
                    shared.call_log.write().await.push(call.clone());

                    let reply = {
                        let handlers = shared.handlers.read().await;
                        match handlers.get(&call.method) {
                            Some(handler) => handler(&call),
                            None => Self::default_reply(&call),
                        }
                    };
                    if transport.write_message(reply.encode(&call)).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    /// Replies for calls without a registered handler.
    fn default_reply(call: &MetastoreCall) -> Reply {
        match call.method.as_str() {
            "set_ugi" => Reply::strings(call.string_arg(1).into_iter().collect()),
            "setMetaConf" | "cancel_delegation_token" => Reply::Void,
            _ => Reply::Application {
                kind: UNKNOWN_METHOD,
                message: format!("Invalid method name: '{}'", call.method),
            },
        }
    }

    /// Server side of DIGEST-MD5. Returns whether the client authenticated.
    async fn serve_digest(stream: &mut TcpStream, auth: &DigestAuth) -> std::io::Result<bool> {
        let (_, mechanism) = read_sasl(stream).await?;
        let _initial = read_sasl(stream).await?;
        if mechanism != b"DIGEST-MD5" {
            write_sasl(stream, NegotiationStatus::Bad, b"unsupported mechanism").await?;
            return Ok(false);
        }

        let challenge = format!(
            "realm=\"default\",nonce=\"{MOCK_NONCE}\",qop=\"auth\",charset=utf-8,algorithm=md5-sess"
        );
        write_sasl(stream, NegotiationStatus::Ok, challenge.as_bytes()).await?;

        let (_, response) = read_sasl(stream).await?;
        let Ok(directives) = parse_directives(&response) else {
            write_sasl(stream, NegotiationStatus::Error, b"malformed response").await?;
            return Ok(false);
        };
        let field = |key: &str| directives.get(key).cloned().unwrap_or_default();
        let (expected, rspauth) = digest_proofs(
            &auth.username,
            &field("realm"),
            &auth.password,
            MOCK_NONCE,
            &field("cnonce"),
            &field("digest-uri"),
        );
        if field("username") != auth.username || field("response") != expected {
            write_sasl(stream, NegotiationStatus::Bad, b"authentication failed").await?;
            return Ok(false);
        }
        write_sasl(stream, NegotiationStatus::Complete, format!("rspauth={rspauth}").as_bytes()).await?;
        Ok(true)
    }
}

async fn read_sasl(stream: &mut TcpStream) -> std::io::Result<(u8, Vec<u8>)> {
    let mut header = [0u8; 5];
    stream.read_exact(&mut header).await?;
    let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await?;
    Ok((header[0], payload))
}

async fn write_sasl(stream: &mut TcpStream, status: NegotiationStatus, payload: &[u8]) -> std::io::Result<()> {
    let mut buf = BytesMut::with_capacity(5 + payload.len());
    buf.put_u8(status.to_u8());
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    stream.write_all(&buf).await?;
    stream.flush().await
}
