//! DIGEST-MD5 client (RFC 2831) authenticating with a delegation token.
//!
//! Only the `auth` quality of protection is negotiated, so no security
//! layer wraps the data after the handshake.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use md5::{Digest, Md5};
use rand::RngCore;
use std::collections::HashMap;

use super::SaslClient;
use crate::auth::token::DelegationToken;
use crate::error::SaslError;

/// Protocol and server name used when the token carries no service binding.
pub const DEFAULT_DIGEST_URI: &str = "null/default";

const NONCE_COUNT: &str = "00000001";
const QOP_AUTH: &str = "auth";

#[derive(Debug)]
enum State {
    AwaitingChallenge,
    AwaitingRspAuth { expected: String },
    Complete,
}

pub struct DigestMd5Client {
    username: String,
    password: String,
    digest_uri: String,
    cnonce: Option<String>,
    state: State,
}

impl std::fmt::Debug for DigestMd5Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DigestMd5Client")
            .field("username", &self.username)
            .field("digest_uri", &self.digest_uri)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl DigestMd5Client {
    /// Client presenting the token's identifier and password.
    #[must_use]
    pub fn from_token(token: &DelegationToken) -> Self {
        Self::new(token.sasl_user_name(), token.sasl_password(), DEFAULT_DIGEST_URI)
    }

    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        digest_uri: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            digest_uri: digest_uri.into(),
            cnonce: None,
            state: State::AwaitingChallenge,
        }
    }

    /// Use a fixed client nonce instead of a random one.
    #[must_use]
    pub fn with_cnonce(mut self, cnonce: impl Into<String>) -> Self {
        self.cnonce = Some(cnonce.into());
        self
    }

    fn next_cnonce(&mut self) -> String {
        self.cnonce.take().unwrap_or_else(|| {
            let mut bytes = [0u8; 24];
            rand::thread_rng().fill_bytes(&mut bytes);
            STANDARD.encode(bytes)
        })
    }

    fn respond(&mut self, challenge: &[u8]) -> Result<Vec<u8>, SaslError> {
        let directives = parse_directives(challenge)?;
        let nonce = directives
            .get("nonce")
            .ok_or_else(|| SaslError::MalformedChallenge("missing nonce".to_string()))?
            .clone();
        let qop_offered = directives.get("qop").map_or(QOP_AUTH, String::as_str);
        if !qop_offered.split(',').any(|q| q.trim() == QOP_AUTH) {
            return Err(SaslError::MalformedChallenge(format!(
                "server does not offer qop=auth (offered: {qop_offered})"
            )));
        }
        let realm = directives
            .get("realm")
            .map(|r| r.split(',').next().unwrap_or_default().to_string());
        let utf8 = directives
            .get("charset")
            .is_some_and(|c| c.eq_ignore_ascii_case("utf-8"));
        let cnonce = self.next_cnonce();

        let (response, expected) = digest_proofs(
            &self.username,
            realm.as_deref().unwrap_or_default(),
            &self.password,
            &nonce,
            &cnonce,
            &self.digest_uri,
        );

        let mut out = String::new();
        if utf8 {
            out.push_str("charset=utf-8,");
        }
        out.push_str(&format!("username=\"{}\",", quote(&self.username)));
        if let Some(realm) = &realm {
            out.push_str(&format!("realm=\"{}\",", quote(realm)));
        }
        out.push_str(&format!(
            "nonce=\"{}\",nc={NONCE_COUNT},cnonce=\"{}\",digest-uri=\"{}\",maxbuf=65536,response={response},qop={QOP_AUTH}",
            quote(&nonce),
            quote(&cnonce),
            quote(&self.digest_uri),
        ));

        self.state = State::AwaitingRspAuth { expected };
        Ok(out.into_bytes())
    }
}

impl SaslClient for DigestMd5Client {
    fn mechanism_name(&self) -> &'static str {
        "DIGEST-MD5"
    }

    fn initial_response(&mut self) -> Result<Option<Vec<u8>>, SaslError> {
        Ok(None)
    }

    fn evaluate_challenge(&mut self, challenge: &[u8]) -> Result<Vec<u8>, SaslError> {
        match std::mem::replace(&mut self.state, State::Complete) {
            State::AwaitingChallenge => self.respond(challenge),
            State::AwaitingRspAuth { expected } => {
                let directives = parse_directives(challenge)?;
                match directives.get("rspauth") {
                    Some(rspauth) if *rspauth == expected => Ok(Vec::new()),
                    Some(_) => Err(SaslError::ServerProofMismatch),
                    None => Err(SaslError::MalformedChallenge("missing rspauth".to_string())),
                }
            }
            State::Complete => Err(SaslError::UnexpectedStatus("challenge after completion")),
        }
    }

    fn is_complete(&self) -> bool {
        matches!(self.state, State::Complete)
    }
}

/// Client response and expected server `rspauth` for one exchange, `md5-sess` with `qop=auth`.
pub(crate) fn digest_proofs(
    username: &str,
    realm: &str,
    password: &str,
    nonce: &str,
    cnonce: &str,
    digest_uri: &str,
) -> (String, String) {
    let ha1 = hex(&Md5::digest(
        [
            Md5::digest(format!("{username}:{realm}:{password}").as_bytes()).as_slice(),
            format!(":{nonce}:{cnonce}").as_bytes(),
        ]
        .concat(),
    ));
    let kd = |a2: &str| {
        let ha2 = hex(&Md5::digest(a2.as_bytes()));
        hex(&Md5::digest(
            format!("{ha1}:{nonce}:{NONCE_COUNT}:{cnonce}:{QOP_AUTH}:{ha2}").as_bytes(),
        ))
    };
    (kd(&format!("AUTHENTICATE:{digest_uri}")), kd(&format!(":{digest_uri}")))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn quote(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Parse `key=value` pairs separated by commas, values optionally quoted.
pub(crate) fn parse_directives(challenge: &[u8]) -> Result<HashMap<String, String>, SaslError> {
    let text = std::str::from_utf8(challenge)
        .map_err(|_| SaslError::MalformedChallenge("challenge is not UTF-8".to_string()))?;
    let mut directives = HashMap::new();
    let mut chars = text.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace() || *c == ',') {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }
        let key: String = chars.by_ref().take_while(|c| *c != '=').collect();
        let key = key.trim().to_ascii_lowercase();
        if key.is_empty() {
            return Err(SaslError::MalformedChallenge(text.to_string()));
        }

        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    '"' => {
                        closed = true;
                        break;
                    }
                    other => value.push(other),
                }
            }
            if !closed {
                return Err(SaslError::MalformedChallenge(format!(
                    "unterminated quote in {key}"
                )));
            }
        } else {
            while let Some(c) = chars.peek() {
                if *c == ',' {
                    break;
                }
                value.push(*c);
                chars.next();
            }
            value = value.trim().to_string();
        }

        // Repeated realms are joined so the first one can be picked.
        directives
            .entry(key)
            .and_modify(|existing: &mut String| {
                existing.push(',');
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    Ok(directives)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RFC_CHALLENGE: &str = "realm=\"elwood.innosoft.com\",nonce=\"OA6MG9tEQGm2hh\",qop=\"auth\",algorithm=md5-sess,charset=utf-8";

    fn rfc_client() -> DigestMd5Client {
        DigestMd5Client::new("chris", "secret", "imap/elwood.innosoft.com").with_cnonce("OA6MHXh6VqTrRk")
    }

    #[test]
    fn test_rfc2831_response() {
        let mut client = rfc_client();
        assert!(client.initial_response().unwrap().is_none());
        let response = client.evaluate_challenge(RFC_CHALLENGE.as_bytes()).unwrap();
        let response = String::from_utf8(response).unwrap();
        assert!(response.starts_with("charset=utf-8,username=\"chris\",realm=\"elwood.innosoft.com\""));
        assert!(response.contains("nc=00000001,cnonce=\"OA6MHXh6VqTrRk\""));
        assert!(response.contains("digest-uri=\"imap/elwood.innosoft.com\""));
        assert!(response.contains("response=d388dad90d4bbd760a152321f2143af7"));
        assert!(response.ends_with("qop=auth"));
        assert!(!client.is_complete());

        let done = client
            .evaluate_challenge(b"rspauth=ea40f60335c427b5527b84dbabcdfffd")
            .unwrap();
        assert!(done.is_empty());
        assert!(client.is_complete());
    }

    #[test]
    fn test_rspauth_mismatch() {
        let mut client = rfc_client();
        client.evaluate_challenge(RFC_CHALLENGE.as_bytes()).unwrap();
        assert_eq!(
            client.evaluate_challenge(b"rspauth=00000000000000000000000000000000"),
            Err(SaslError::ServerProofMismatch)
        );
    }

    #[test]
    fn test_qop_without_auth_rejected() {
        let mut client = rfc_client();
        let err = client
            .evaluate_challenge(b"nonce=\"abc\",qop=\"auth-conf\"")
            .unwrap_err();
        assert!(matches!(err, SaslError::MalformedChallenge(_)));
    }

    #[test]
    fn test_parse_directives_quotes_and_escapes() {
        let parsed =
            parse_directives(br#"realm="a,b",nonce="x\"y", qop=auth ,realm="c""#).unwrap();
        assert_eq!(parsed["realm"], "a,b,c");
        assert_eq!(parsed["nonce"], "x\"y");
        assert_eq!(parsed["qop"], "auth");
    }

    #[test]
    fn test_from_token_uses_base64_credentials() {
        let token = DelegationToken {
            identifier: vec![1, 2, 255],
            password: b"pw".to_vec(),
            kind: "K".to_string(),
            service: String::new(),
        };
        let client = DigestMd5Client::from_token(&token);
        assert_eq!(client.username, "AQL/");
        assert_eq!(client.password, "cHc=");
        assert_eq!(client.digest_uri, DEFAULT_DIGEST_URI);
    }
}
