use apollo_lib::{
    api::{LoginRequest, LoginResponse, NodeTokenResponse},
    cryptobox::{encode_public_key, generate_keypair, seal_message},
    ids::random_id_sized,
    AbsoluteTime, NEVER_EXPIRES,
};
use apollo_sigv4::authenticate_user;
use apollo_store::model::{AuthToken, TokenType};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{Duration, Utc};
use tracing::info;

use crate::{HostError, HostResult, HostState};

/// Authorize a SigV4-signed identity assertion and mint the matching token.
/// Requests signed from an instance profile automatically yield a
/// node-linked token instead of a user token.
pub struct LoginProcessor<'a> {
    pub state: &'a HostState,
    pub body: LoginRequest,
}

impl LoginProcessor<'_> {
    pub async fn enact(self) -> HostResult<LoginResponse> {
        info!("invoking the login processor");

        let blob = STANDARD
            .decode(&self.body.token)
            .map_err(|e| HostError::Authentication(format!("undecodable login token: {e}")))?;

        let auth = authenticate_user(
            &self.state.http,
            &blob,
            &self.state.sts_endpoint,
            &self.state.whitelist,
        )
        .await?;
        info!("user {} authenticated successfully", auth.account_id);

        // For node logins, hold the node table so the node cannot go away
        // while the token is minted.
        let (token_type, entity, expires, node_guard) = match auth.node_id.clone() {
            Some(node_id) => {
                let nodes = self.state.nodes.exclusive().await;
                if !nodes.values().any(|node| node.cloud_id == node_id) {
                    return Err(HostError::Authentication(format!(
                        "node with id {node_id} is not registered"
                    )));
                }
                // Node tokens are reaped once the node dies.
                (TokenType::Node, node_id, NEVER_EXPIRES, Some(nodes))
            }
            None => {
                let expires = AbsoluteTime::from_datetime(Utc::now() + Duration::hours(24));
                (TokenType::User, auth.account_id.clone(), expires, None)
            }
        };

        let token = AuthToken {
            key: random_id_sized(16),
            expires,
            token_type,
            entity_key: entity,
            requested_by: format!("account/{}", auth.account_id),
            requested_on: AbsoluteTime::now(),
        };
        self.state.tokens.store(token.clone()).await?;
        drop(node_guard);

        // The caller's signed public key seals the welcome payload.
        let (server_public, server_secret) = generate_keypair();
        Ok(LoginResponse {
            encrypted_auth_token: seal_message(&token.key, &auth.public_key, &server_secret)?,
            encrypted_certificate: seal_message(
                self.state.server_cert.as_str(),
                &auth.public_key,
                &server_secret,
            )?,
            server_public_key: encode_public_key(&server_public),
            valid_until: expires,
        })
    }
}

/// Mint a non-expiring node token for an already-authenticated caller.
pub struct NodeTokenProcessor<'a> {
    pub state: &'a HostState,
    pub principal: AuthToken,
    pub node_id: String,
}

impl NodeTokenProcessor<'_> {
    pub async fn enact(self) -> HostResult<NodeTokenResponse> {
        info!("minting a node token for {}", self.node_id);
        // TODO: restrict node-token minting to operators of the node's queue.

        let token = AuthToken {
            key: random_id_sized(16),
            expires: NEVER_EXPIRES,
            token_type: TokenType::Node,
            entity_key: self.node_id,
            requested_by: self.principal.render_entity(),
            requested_on: AbsoluteTime::now(),
        };
        self.state.tokens.store(token.clone()).await?;

        Ok(NodeTokenResponse {
            auth_token: token.key,
            certificate: self.state.server_cert.to_string(),
        })
    }
}
