//! Client side of the SASL transport handshake.
//!
//! Every negotiation message is a status byte, a 4-byte big-endian payload
//! length and the payload. The client opens with START carrying the
//! mechanism name, follows with its initial response, then answers
//! challenges until both sides are complete. Supported mechanisms:
//! - DIGEST-MD5 with a delegation token ([`digest`])
//! - GSSAPI through an installed [`gssapi::KerberosProvider`]

pub mod digest;
pub mod gssapi;

pub use digest::DigestMd5Client;
pub use gssapi::{GssContext, GssapiClient, KerberosProvider};

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::error::{ClientError, SaslError};

/// Largest negotiation payload accepted from the server.
const MAX_NEGOTIATION_PAYLOAD: usize = 104_857_600;

/// Status byte leading every negotiation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationStatus {
    Start,
    Ok,
    Bad,
    Error,
    Complete,
}

impl NegotiationStatus {
    #[must_use]
    pub fn to_u8(self) -> u8 {
        match self {
            Self::Start => 0x01,
            Self::Ok => 0x02,
            Self::Bad => 0x03,
            Self::Error => 0x04,
            Self::Complete => 0x05,
        }
    }

    /// # Errors
    ///
    /// Returns [`SaslError::InvalidStatus`] for bytes outside the alphabet.
    pub fn from_u8(value: u8) -> Result<Self, SaslError> {
        match value {
            0x01 => Ok(Self::Start),
            0x02 => Ok(Self::Ok),
            0x03 => Ok(Self::Bad),
            0x04 => Ok(Self::Error),
            0x05 => Ok(Self::Complete),
            other => Err(SaslError::InvalidStatus(other)),
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Start => "START",
            Self::Ok => "OK",
            Self::Bad => "BAD",
            Self::Error => "ERROR",
            Self::Complete => "COMPLETE",
        }
    }
}

/// A client-side SASL mechanism.
pub trait SaslClient: Send {
    fn mechanism_name(&self) -> &'static str;

    /// Response sent with the opening message, `None` if the mechanism waits for a challenge.
    fn initial_response(&mut self) -> Result<Option<Vec<u8>>, SaslError>;

    fn evaluate_challenge(&mut self, challenge: &[u8]) -> Result<Vec<u8>, SaslError>;

    fn is_complete(&self) -> bool;
}

async fn send_message<S>(
    stream: &mut S,
    status: NegotiationStatus,
    payload: &[u8],
) -> Result<(), ClientError>
where
    S: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::with_capacity(5 + payload.len());
    buf.put_u8(status.to_u8());
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    stream.write_all(&buf).await?;
    stream.flush().await?;
    trace!(status = status.name(), len = payload.len(), "sent SASL message");
    Ok(())
}

async fn receive_message<S>(stream: &mut S) -> Result<(NegotiationStatus, Vec<u8>), ClientError>
where
    S: AsyncRead + Unpin,
{
    let mut header = [0u8; 5];
    stream.read_exact(&mut header).await?;
    let status = NegotiationStatus::from_u8(header[0])?;
    let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
    if len > MAX_NEGOTIATION_PAYLOAD {
        return Err(SaslError::PayloadTooLarge(len).into());
    }
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await?;
    trace!(status = status.name(), len, "received SASL message");

    match status {
        NegotiationStatus::Bad | NegotiationStatus::Error => Err(SaslError::Rejected {
            status: status.name(),
            message: String::from_utf8_lossy(&payload).into_owned(),
        }
        .into()),
        _ => Ok((status, payload)),
    }
}

/// Run the handshake over `stream` until both sides report completion.
///
/// # Errors
///
/// Fails on I/O errors, a BAD or ERROR status from the server, or a
/// mechanism failure.
pub async fn negotiate<S>(stream: &mut S, client: &mut dyn SaslClient) -> Result<(), ClientError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mechanism = client.mechanism_name();
    debug!(mechanism, "starting SASL negotiation");

    let initial = client.initial_response()?.unwrap_or_default();
    send_message(stream, NegotiationStatus::Start, mechanism.as_bytes()).await?;
    let status = if client.is_complete() {
        NegotiationStatus::Complete
    } else {
        NegotiationStatus::Ok
    };
    send_message(stream, status, &initial).await?;

    let mut last_status = None;
    while !client.is_complete() {
        let (status, challenge) = receive_message(stream).await?;
        if !matches!(status, NegotiationStatus::Ok | NegotiationStatus::Complete) {
            return Err(SaslError::UnexpectedStatus(status.name()).into());
        }
        last_status = Some(status);
        let response = client.evaluate_challenge(&challenge)?;
        if status == NegotiationStatus::Complete {
            break;
        }
        let reply = if client.is_complete() {
            NegotiationStatus::Complete
        } else {
            NegotiationStatus::Ok
        };
        send_message(stream, reply, &response).await?;
    }

    if !client.is_complete() {
        return Err(SaslError::UnexpectedStatus("COMPLETE before mechanism finished").into());
    }

    // The server still owes its COMPLETE when the last thing it sent was OK.
    if matches!(last_status, None | Some(NegotiationStatus::Ok)) {
        let (status, _) = receive_message(stream).await?;
        if status != NegotiationStatus::Complete {
            return Err(SaslError::UnexpectedStatus(status.name()).into());
        }
    }

    debug!(mechanism, "SASL negotiation complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Mechanism that answers every challenge with its reverse and completes after `rounds`.
    struct Echo {
        rounds: usize,
        seen: usize,
    }

    impl SaslClient for Echo {
        fn mechanism_name(&self) -> &'static str {
            "ECHO"
        }

        fn initial_response(&mut self) -> Result<Option<Vec<u8>>, SaslError> {
            Ok(Some(b"hello".to_vec()))
        }

        fn evaluate_challenge(&mut self, challenge: &[u8]) -> Result<Vec<u8>, SaslError> {
            self.seen += 1;
            Ok(challenge.iter().rev().copied().collect())
        }

        fn is_complete(&self) -> bool {
            self.seen >= self.rounds
        }
    }

    async fn read_frame<S: AsyncRead + Unpin>(s: &mut S) -> (u8, Vec<u8>) {
        let mut header = [0u8; 5];
        s.read_exact(&mut header).await.unwrap();
        let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
        let mut payload = vec![0u8; len];
        s.read_exact(&mut payload).await.unwrap();
        (header[0], payload)
    }

    async fn write_frame<S: AsyncWrite + Unpin>(s: &mut S, status: u8, payload: &[u8]) {
        let mut buf = vec![status];
        buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(payload);
        s.write_all(&buf).await.unwrap();
    }

    #[tokio::test]
    async fn test_negotiation_with_trailing_complete() {
        let (mut client_io, mut server_io) = tokio::io::duplex(4096);
        let server = tokio::spawn(async move {
            assert_eq!(read_frame(&mut server_io).await, (0x01, b"ECHO".to_vec()));
            assert_eq!(read_frame(&mut server_io).await, (0x02, b"hello".to_vec()));
            write_frame(&mut server_io, 0x02, b"abc").await;
            assert_eq!(read_frame(&mut server_io).await, (0x05, b"cba".to_vec()));
            write_frame(&mut server_io, 0x05, b"").await;
        });

        let mut mech = Echo { rounds: 1, seen: 0 };
        negotiate(&mut client_io, &mut mech).await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_server_complete_ends_negotiation() {
        let (mut client_io, mut server_io) = tokio::io::duplex(4096);
        let server = tokio::spawn(async move {
            read_frame(&mut server_io).await;
            read_frame(&mut server_io).await;
            write_frame(&mut server_io, 0x02, b"one").await;
            assert_eq!(read_frame(&mut server_io).await, (0x02, b"eno".to_vec()));
            write_frame(&mut server_io, 0x05, b"two").await;
        });

        let mut mech = Echo { rounds: 2, seen: 0 };
        negotiate(&mut client_io, &mut mech).await.unwrap();
        assert_eq!(mech.seen, 2);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_bad_status_is_rejection() {
        let (mut client_io, mut server_io) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            read_frame(&mut server_io).await;
            read_frame(&mut server_io).await;
            write_frame(&mut server_io, 0x03, b"unsupported mechanism").await;
        });

        let mut mech = Echo { rounds: 1, seen: 0 };
        let err = negotiate(&mut client_io, &mut mech).await.unwrap_err();
        match err {
            ClientError::Sasl(SaslError::Rejected { status, message }) => {
                assert_eq!(status, "BAD");
                assert_eq!(message, "unsupported mechanism");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_status_bytes() {
        assert_eq!(NegotiationStatus::from_u8(5).unwrap(), NegotiationStatus::Complete);
        assert_eq!(NegotiationStatus::from_u8(9), Err(SaslError::InvalidStatus(9)));
    }
}
