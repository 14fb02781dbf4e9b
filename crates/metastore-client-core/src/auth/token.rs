//! Delegation tokens and the per-process credential store.
//!
//! A token string is the URL-safe base64 of a Writable record: a vint
//! length and bytes for the identifier, the same for the password, then the
//! token kind and service as vint-prefixed text.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use bytes::{Buf, BufMut, BytesMut};
use dashmap::DashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::error::{ConfigError, ConfigResult, SaslError};

/// Signature under which a bootstrapped token is stored.
pub const BOOTSTRAP_TOKEN_SIGNATURE: &str = "DelegationTokenForMetaStoreServer";

/// A decoded delegation token.
#[derive(Clone, PartialEq, Eq)]
pub struct DelegationToken {
    pub identifier: Vec<u8>,
    pub password: Vec<u8>,
    pub kind: String,
    pub service: String,
}

impl std::fmt::Debug for DelegationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegationToken")
            .field("kind", &self.kind)
            .field("service", &self.service)
            .field("identifier_len", &self.identifier.len())
            .finish_non_exhaustive()
    }
}

impl DelegationToken {
    /// Decode the URL-safe string form.
    ///
    /// # Errors
    ///
    /// Returns [`SaslError::InvalidToken`] for bad base64 or a truncated record.
    pub fn decode(token: &str) -> Result<Self, SaslError> {
        let raw = URL_SAFE_NO_PAD
            .decode(token.trim().trim_end_matches('='))
            .map_err(|e| SaslError::InvalidToken(e.to_string()))?;
        let mut buf = raw.as_slice();
        let identifier = read_vbytes(&mut buf)?;
        let password = read_vbytes(&mut buf)?;
        let kind = read_text(&mut buf)?;
        let service = read_text(&mut buf)?;
        Ok(Self {
            identifier,
            password,
            kind,
            service,
        })
    }

    /// Encode to the URL-safe string form.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut buf = BytesMut::new();
        write_vbytes(&mut buf, &self.identifier);
        write_vbytes(&mut buf, &self.password);
        write_vbytes(&mut buf, self.kind.as_bytes());
        write_vbytes(&mut buf, self.service.as_bytes());
        URL_SAFE_NO_PAD.encode(&buf)
    }

    /// SASL user name: standard base64 of the identifier.
    #[must_use]
    pub fn sasl_user_name(&self) -> String {
        STANDARD.encode(&self.identifier)
    }

    /// SASL password: standard base64 of the password bytes.
    #[must_use]
    pub fn sasl_password(&self) -> String {
        STANDARD.encode(&self.password)
    }
}

fn read_byte(buf: &mut &[u8]) -> Result<i8, SaslError> {
    if !buf.has_remaining() {
        return Err(SaslError::InvalidToken("truncated token".to_string()));
    }
    Ok(buf.get_i8())
}

/// Read a Writable variable-length integer.
fn read_vlong(buf: &mut &[u8]) -> Result<i64, SaslError> {
    let first = read_byte(buf)?;
    let size: usize = if first >= -112 {
        1
    } else if first < -120 {
        (-119 - i32::from(first)) as usize
    } else {
        (-111 - i32::from(first)) as usize
    };
    if size == 1 {
        return Ok(i64::from(first));
    }
    let mut value = 0i64;
    for _ in 0..size - 1 {
        value = (value << 8) | i64::from(read_byte(buf)? as u8);
    }
    let negative = first < -120 || (-112..0).contains(&first);
    Ok(if negative { !value } else { value })
}

fn write_vlong(buf: &mut BytesMut, value: i64) {
    if (-112..=127).contains(&value) {
        buf.put_i8(value as i8);
        return;
    }
    let (magnitude, mut len) = if value < 0 { (!value, -120i32) } else { (value, -112i32) };
    let mut tmp = magnitude;
    while tmp != 0 {
        tmp >>= 8;
        len -= 1;
    }
    buf.put_i8(len as i8);
    let bytes = if len < -120 { -(len + 120) } else { -(len + 112) };
    for idx in (0..bytes).rev() {
        buf.put_u8((magnitude >> (idx * 8)) as u8);
    }
}

fn read_vbytes(buf: &mut &[u8]) -> Result<Vec<u8>, SaslError> {
    let len = read_vlong(buf)?;
    let len = usize::try_from(len)
        .map_err(|_| SaslError::InvalidToken(format!("negative length {len}")))?;
    if buf.remaining() < len {
        return Err(SaslError::InvalidToken("truncated token".to_string()));
    }
    let bytes = buf[..len].to_vec();
    buf.advance(len);
    Ok(bytes)
}

fn read_text(buf: &mut &[u8]) -> Result<String, SaslError> {
    String::from_utf8(read_vbytes(buf)?)
        .map_err(|_| SaslError::InvalidToken("token text is not UTF-8".to_string()))
}

fn write_vbytes(buf: &mut BytesMut, bytes: &[u8]) {
    write_vlong(buf, bytes.len() as i64);
    buf.put_slice(bytes);
}

/// Signature to token-string mapping for the current process.
pub trait TokenStore: Send + Sync + std::fmt::Debug {
    fn get_token(&self, signature: &str) -> Option<String>;

    fn set_token(&self, signature: &str, token: String);
}

/// In-memory token store.
#[derive(Debug, Default)]
pub struct InMemoryTokenStore {
    tokens: DashMap<String, String>,
}

impl InMemoryTokenStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load tokens from a file of `signature:token` lines.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;
        let store = Self::new();
        for line in contents.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((signature, token)) = line.split_once(':') {
                store.set_token(signature.trim(), token.trim().to_string());
            }
        }
        debug!(count = store.tokens.len(), path = %path.display(), "loaded delegation tokens");
        Ok(store)
    }
}

impl TokenStore for InMemoryTokenStore {
    fn get_token(&self, signature: &str) -> Option<String> {
        self.tokens.get(signature).map(|t| t.value().clone())
    }

    fn set_token(&self, signature: &str, token: String) {
        self.tokens.insert(signature.to_string(), token);
    }
}

/// Default store shared by clients that are not given one.
#[must_use]
pub fn shared_token_store() -> Arc<dyn TokenStore> {
    static STORE: std::sync::OnceLock<Arc<InMemoryTokenStore>> = std::sync::OnceLock::new();
    STORE.get_or_init(|| Arc::new(InMemoryTokenStore::new())).clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample() -> DelegationToken {
        DelegationToken {
            identifier: vec![0x01, 0x02, 0xff],
            password: b"secret-bytes".to_vec(),
            kind: "HIVE_DELEGATION_TOKEN".to_string(),
            service: String::new(),
        }
    }

    #[test]
    fn test_encode_decode() {
        let token = sample();
        let encoded = token.encode();
        assert!(!encoded.contains('+') && !encoded.contains('/') && !encoded.contains('='));
        assert_eq!(DelegationToken::decode(&encoded).unwrap(), token);
    }

    #[test]
    fn test_vlong_wide_values() {
        for value in [0i64, 127, -112, 128, -113, 300, 70_000, -70_000, i64::MAX, i64::MIN] {
            let mut buf = BytesMut::new();
            write_vlong(&mut buf, value);
            let mut slice = &buf[..];
            assert_eq!(read_vlong(&mut slice).unwrap(), value, "value {value}");
            assert!(slice.is_empty());
        }
    }

    #[test]
    fn test_vlong_known_encoding() {
        let mut buf = BytesMut::new();
        write_vlong(&mut buf, 300);
        assert_eq!(&buf[..], &[0x8e, 0x01, 0x2c]);
    }

    #[test]
    fn test_truncated_token_rejected() {
        let encoded = URL_SAFE_NO_PAD.encode([0x05, 0x01]);
        assert!(matches!(
            DelegationToken::decode(&encoded),
            Err(SaslError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_sasl_credentials_are_standard_base64() {
        let token = sample();
        assert_eq!(token.sasl_user_name(), "AQL/");
        assert_eq!(token.sasl_password(), STANDARD.encode(b"secret-bytes"));
    }

    #[test]
    fn test_in_memory_store() {
        let store = InMemoryTokenStore::new();
        assert!(store.get_token("sig").is_none());
        store.set_token("sig", "abc".to_string());
        assert_eq!(store.get_token("sig").as_deref(), Some("abc"));
    }

    #[test]
    fn test_store_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# tokens").unwrap();
        writeln!(file, "sig-a: tokenA").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "sig-b:tokenB").unwrap();
        file.flush().unwrap();

        let store = InMemoryTokenStore::from_file(file.path()).unwrap();
        assert_eq!(store.get_token("sig-a").as_deref(), Some("tokenA"));
        assert_eq!(store.get_token("sig-b").as_deref(), Some("tokenB"));
    }
}
