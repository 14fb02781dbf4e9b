//! GSSAPI (Kerberos V5) client per RFC 4752.
//!
//! Ticket handling is delegated to a [`KerberosProvider`], which creates a
//! security context for the service principal. This module only drives the
//! SASL exchange around it: context establishment, then the one-round
//! security-layer negotiation where the client selects "no security layer".

use super::SaslClient;
use crate::auth::principal::ServicePrincipal;
use crate::error::SaslError;

/// Security layer bit for "no protection".
const LAYER_NONE: u8 = 0x01;

/// An initiator-side GSS security context.
pub trait GssContext: Send {
    /// Feed the server token (empty on the first call) and return the next client token.
    fn step(&mut self, input: &[u8]) -> Result<Vec<u8>, SaslError>;

    fn is_established(&self) -> bool;

    fn unwrap(&mut self, message: &[u8]) -> Result<Vec<u8>, SaslError>;

    fn wrap(&mut self, message: &[u8]) -> Result<Vec<u8>, SaslError>;
}

/// Source of GSS contexts for the current login.
pub trait KerberosProvider: Send + Sync {
    fn new_context(&self, principal: &ServicePrincipal) -> Result<Box<dyn GssContext>, SaslError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Establishing,
    SecurityLayer,
    Complete,
}

pub struct GssapiClient {
    context: Box<dyn GssContext>,
    authorization_id: Option<String>,
    phase: Phase,
}

impl std::fmt::Debug for GssapiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GssapiClient")
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

impl GssapiClient {
    /// # Errors
    ///
    /// Propagates the provider's failure to create a context.
    pub fn new(
        provider: &dyn KerberosProvider,
        principal: &ServicePrincipal,
    ) -> Result<Self, SaslError> {
        Ok(Self {
            context: provider.new_context(principal)?,
            authorization_id: None,
            phase: Phase::Establishing,
        })
    }

    #[must_use]
    pub fn with_authorization_id(mut self, authorization_id: impl Into<String>) -> Self {
        self.authorization_id = Some(authorization_id.into());
        self
    }

    fn advance(&mut self, input: &[u8]) -> Result<Vec<u8>, SaslError> {
        let token = self.context.step(input)?;
        if self.context.is_established() {
            self.phase = Phase::SecurityLayer;
        }
        Ok(token)
    }

    fn select_security_layer(&mut self, challenge: &[u8]) -> Result<Vec<u8>, SaslError> {
        let offer = self.context.unwrap(challenge)?;
        if offer.len() != 4 {
            return Err(SaslError::MalformedChallenge(format!(
                "security layer offer must be 4 bytes, got {}",
                offer.len()
            )));
        }
        if offer[0] & LAYER_NONE == 0 {
            return Err(SaslError::Kerberos(
                "server requires a security layer, only auth is supported".to_string(),
            ));
        }
        let mut reply = vec![LAYER_NONE, 0, 0, 0];
        if let Some(authz) = &self.authorization_id {
            reply.extend_from_slice(authz.as_bytes());
        }
        let wrapped = self.context.wrap(&reply)?;
        self.phase = Phase::Complete;
        Ok(wrapped)
    }
}

impl SaslClient for GssapiClient {
    fn mechanism_name(&self) -> &'static str {
        "GSSAPI"
    }

    fn initial_response(&mut self) -> Result<Option<Vec<u8>>, SaslError> {
        self.advance(&[]).map(Some)
    }

    fn evaluate_challenge(&mut self, challenge: &[u8]) -> Result<Vec<u8>, SaslError> {
        match self.phase {
            Phase::Establishing => self.advance(challenge),
            Phase::SecurityLayer => self.select_security_layer(challenge),
            Phase::Complete => Err(SaslError::UnexpectedStatus("challenge after completion")),
        }
    }

    fn is_complete(&self) -> bool {
        self.phase == Phase::Complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Context that is established after two steps and wraps by prefixing `W`.
    struct ScriptedContext {
        steps: usize,
    }

    impl GssContext for ScriptedContext {
        fn step(&mut self, input: &[u8]) -> Result<Vec<u8>, SaslError> {
            self.steps += 1;
            let mut out = format!("ap-req-{}", self.steps).into_bytes();
            out.extend_from_slice(input);
            Ok(out)
        }

        fn is_established(&self) -> bool {
            self.steps >= 2
        }

        fn unwrap(&mut self, message: &[u8]) -> Result<Vec<u8>, SaslError> {
            message
                .strip_prefix(b"W")
                .map(<[u8]>::to_vec)
                .ok_or_else(|| SaslError::Kerberos("bad wrap".to_string()))
        }

        fn wrap(&mut self, message: &[u8]) -> Result<Vec<u8>, SaslError> {
            let mut out = b"W".to_vec();
            out.extend_from_slice(message);
            Ok(out)
        }
    }

    struct Provider;

    impl KerberosProvider for Provider {
        fn new_context(
            &self,
            principal: &ServicePrincipal,
        ) -> Result<Box<dyn GssContext>, SaslError> {
            assert_eq!(principal.service, "hive");
            Ok(Box::new(ScriptedContext { steps: 0 }))
        }
    }

    fn principal() -> ServicePrincipal {
        ServicePrincipal::resolve("hive/_HOST@EXAMPLE.COM", "meta1").unwrap()
    }

    #[test]
    fn test_full_exchange_selects_no_security_layer() {
        let mut client = GssapiClient::new(&Provider, &principal())
            .unwrap()
            .with_authorization_id("etl");
        assert_eq!(client.initial_response().unwrap(), Some(b"ap-req-1".to_vec()));
        assert!(!client.is_complete());

        let token = client.evaluate_challenge(b"ap-rep").unwrap();
        assert_eq!(token, b"ap-req-2ap-rep".to_vec());
        assert!(!client.is_complete());

        let reply = client.evaluate_challenge(b"W\x07\x00\x10\x00").unwrap();
        assert_eq!(reply, b"W\x01\x00\x00\x00etl".to_vec());
        assert!(client.is_complete());
    }

    #[test]
    fn test_required_protection_rejected() {
        let mut client = GssapiClient::new(&Provider, &principal()).unwrap();
        client.initial_response().unwrap();
        client.evaluate_challenge(b"").unwrap();
        let err = client.evaluate_challenge(b"W\x04\x00\x10\x00").unwrap_err();
        assert!(matches!(err, SaslError::Kerberos(_)));
    }
}
