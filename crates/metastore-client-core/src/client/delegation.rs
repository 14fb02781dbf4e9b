//! Minting a delegation token for an impersonated user before the real connect.

use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::manager::ConnectionManager;
use crate::auth::token::{TokenStore, BOOTSTRAP_TOKEN_SIGNATURE};
use crate::config::ClientConfig;
use crate::endpoint::Endpoint;
use crate::error::{ClientError, Result};

/// Open a connection as the real identity, request a token owned and
/// renewable by `proxy_user`, and store it for the DIGEST connect that follows.
///
/// The bootstrap connection is closed whether or not the token request
/// succeeds. On success `config.token_signature` names the stored token.
///
/// # Errors
///
/// Any failure is wrapped in [`ClientError::DelegationBootstrap`].
#[instrument(skip_all, fields(proxy_user = %proxy_user))]
pub async fn bootstrap_delegation_token(
    manager: &ConnectionManager,
    config: &mut ClientConfig,
    endpoints: &[Endpoint],
    proxy_user: &str,
    store: &Arc<dyn TokenStore>,
) -> Result<()> {
    let wrap = |source: ClientError| ClientError::DelegationBootstrap {
        user: proxy_user.to_string(),
        source: Box::new(source),
    };

    let mut real_identity = config.clone();
    real_identity.token_signature = None;

    let mut connection = manager.connect(&real_identity, endpoints).await.map_err(wrap)?;
    let minted = connection
        .rpc
        .get_delegation_token(proxy_user, proxy_user)
        .await;
    manager.close(connection.rpc).await;

    let token = minted.map_err(|e| {
        warn!(error = %e, "Failed to obtain delegation token for proxy user");
        wrap(e)
    })?;
    store.set_token(BOOTSTRAP_TOKEN_SIGNATURE, token);
    config.token_signature = Some(BOOTSTRAP_TOKEN_SIGNATURE.to_string());
    info!(signature = BOOTSTRAP_TOKEN_SIGNATURE, "Stored delegation token for proxy user");
    Ok(())
}
