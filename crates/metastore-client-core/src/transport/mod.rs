//! Layered byte-stream transports to a metastore endpoint.
//!
//! - [`stream`]: plain TCP or TLS socket
//! - [`codec`]: 4-byte length framing
//! - [`factory`]: builds the full stack for one endpoint (socket, TLS,
//!   SASL, framing, wire encoding)
//!
//! [`ThriftTransport`] moves whole encoded messages over any async stream.
//! Framed streams are split with [`FrameCodec`]; unframed streams are split
//! by measuring each message with the wire encoding itself.

pub mod codec;
pub mod factory;
pub mod stream;

pub use codec::FrameCodec;
pub use factory::{ThriftTransportFactory, TransportFactory};
pub use stream::MetaStream;

use bytes::{Bytes, BytesMut};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::error::{ClientError, Result};
use crate::protocol::WireEncoding;

const READ_CHUNK: usize = 8 * 1024;

/// How messages are delimited on the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Messages follow each other directly.
    None,
    /// Every message is preceded by its 4-byte length.
    Length,
}

/// A message transport over an async byte stream.
pub struct ThriftTransport<S> {
    stream: S,
    endpoint: String,
    encoding: WireEncoding,
    framing: Framing,
    codec: FrameCodec,
    read_buf: BytesMut,
    socket_timeout: Option<Duration>,
}

impl<S> std::fmt::Debug for ThriftTransport<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThriftTransport")
            .field("endpoint", &self.endpoint)
            .field("encoding", &self.encoding)
            .field("framing", &self.framing)
            .finish_non_exhaustive()
    }
}

impl<S> ThriftTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(
        stream: S,
        endpoint: impl Into<String>,
        encoding: WireEncoding,
        framing: Framing,
    ) -> Self {
        Self {
            stream,
            endpoint: endpoint.into(),
            encoding,
            framing,
            codec: FrameCodec::new(),
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            socket_timeout: None,
        }
    }

    /// Bound every read and write. A zero duration disables the bound.
    #[must_use]
    pub fn with_socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    #[must_use]
    pub fn encoding(&self) -> WireEncoding {
        self.encoding
    }

    #[must_use]
    pub fn framing(&self) -> Framing {
        self.framing
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send one encoded message.
    ///
    /// # Errors
    ///
    /// Returns a transport error on I/O failure or timeout.
    pub async fn write_message(&mut self, payload: Bytes) -> Result<()> {
        let len = payload.len();
        let out = match self.framing {
            Framing::Length => {
                let mut framed = BytesMut::with_capacity(4 + len);
                self.codec
                    .encode(payload, &mut framed)
                    .map_err(|e| ClientError::transport(&self.endpoint, e))?;
                framed.freeze()
            }
            Framing::None => payload,
        };
        let limit = self.socket_timeout;
        let stream = &mut self.stream;
        let write = async move {
            stream.write_all(&out).await?;
            stream.flush().await
        };
        match limit {
            Some(limit) => match tokio::time::timeout(limit, write).await {
                Ok(result) => result.map_err(|e| ClientError::transport(&self.endpoint, e))?,
                Err(_) => {
                    return Err(ClientError::transport(
                        &self.endpoint,
                        format!("write timed out after {}ms", limit.as_millis()),
                    ))
                }
            },
            None => write
                .await
                .map_err(|e| ClientError::transport(&self.endpoint, e))?,
        }
        trace!(endpoint = %self.endpoint, len, "sent message");
        Ok(())
    }

    /// Receive the next complete message.
    ///
    /// # Errors
    ///
    /// Returns a transport error on I/O failure, timeout or a closed
    /// connection, and a protocol error for undecodable bytes.
    pub async fn read_message(&mut self) -> Result<Bytes> {
        loop {
            if let Some(message) = self.split_message()? {
                trace!(endpoint = %self.endpoint, len = message.len(), "received message");
                return Ok(message);
            }
            self.read_buf.reserve(READ_CHUNK);
            let n = self.fill().await?;
            if n == 0 {
                return Err(ClientError::transport(
                    &self.endpoint,
                    "connection closed by peer",
                ));
            }
        }
    }

    async fn fill(&mut self) -> Result<usize> {
        let limit = self.socket_timeout;
        let read = self.stream.read_buf(&mut self.read_buf);
        match limit {
            Some(limit) => match tokio::time::timeout(limit, read).await {
                Ok(result) => result.map_err(|e| ClientError::transport(&self.endpoint, e)),
                Err(_) => Err(ClientError::transport(
                    &self.endpoint,
                    format!("read timed out after {}ms", limit.as_millis()),
                )),
            },
            None => read.await.map_err(|e| ClientError::transport(&self.endpoint, e)),
        }
    }

    fn split_message(&mut self) -> Result<Option<Bytes>> {
        match self.framing {
            Framing::Length => self
                .codec
                .decode(&mut self.read_buf)
                .map(|frame| frame.map(BytesMut::freeze))
                .map_err(|e| ClientError::transport(&self.endpoint, e)),
            Framing::None => {
                if self.read_buf.is_empty() {
                    return Ok(None);
                }
                Ok(self
                    .encoding
                    .message_len(&self.read_buf)?
                    .map(|len| self.read_buf.split_to(len).freeze()))
            }
        }
    }

    /// Shut down the write half of the stream.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the shutdown fails.
    pub async fn shutdown(&mut self) -> Result<()> {
        let stream = &mut self.stream;
        let endpoint = &self.endpoint;
        stream
            .shutdown()
            .await
            .map_err(|e| ClientError::transport(endpoint, e))
    }
}
