//! Authentication for metastore connections.
//!
//! - [`principal`]: caller identity and Kerberos service principals
//! - [`token`]: delegation tokens and the signature-keyed token store
//! - [`sasl`]: the SASL handshake with DIGEST-MD5 and GSSAPI mechanisms

pub mod principal;
pub mod sasl;
pub mod token;

pub use principal::{Identity, ServicePrincipal};
pub use sasl::{DigestMd5Client, GssContext, GssapiClient, KerberosProvider, SaslClient};
pub use token::{
    shared_token_store, DelegationToken, InMemoryTokenStore, TokenStore,
    BOOTSTRAP_TOKEN_SIGNATURE,
};
