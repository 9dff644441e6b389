//! The full login handshake against a canned identity provider: SigV4
//! assertion in, sealed token and certificate out.

use std::collections::HashMap;
use std::sync::Arc;

use apollo_host::{
    processors::{login::LoginProcessor, node::PutUnmanagedNodeProcessor, queue::PutQueueProcessor},
    schema_iops, HostError, HostState,
};
use apollo_lib::{
    api::{LoginRequest, PutUnmanagedNodeRequest, Queue},
    cryptobox::{generate_keypair, open_message, PublicKey, StaticSecret},
    NEVER_EXPIRES,
};
use apollo_sigv4::{create_signed_request, SigningCredentials};
use apollo_store::{model::TokenType, KvBackend, MemoryBackend};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{Duration, Utc};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
};
use url::Url;

fn identity_xml(user_id: &str) -> String {
    format!(
        r#"<GetCallerIdentityResponse xmlns="https://sts.amazonaws.com/doc/2011-06-15/">
  <GetCallerIdentityResult>
    <Arn>arn:aws:iam::158005755667:user/cyberax</Arn>
    <UserId>{user_id}</UserId>
    <Account>158005755667</Account>
  </GetCallerIdentityResult>
  <ResponseMetadata>
    <RequestId>eb5d8b58-9e18-11e8-b32c-b77fbbd26035</RequestId>
  </ResponseMetadata>
</GetCallerIdentityResponse>"#
    )
}

fn find_headers_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

fn parse_content_length(headers: &[u8]) -> usize {
    String::from_utf8_lossy(headers)
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse().ok())?
        })
        .unwrap_or(0)
}

async fn spawn_idp(body: String) -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let body = body.clone();
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 4096];
                loop {
                    let n = socket.read(&mut chunk).await.unwrap_or(0);
                    if n == 0 {
                        break;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                    if let Some(end) = find_headers_end(&buf) {
                        if buf.len() >= end + parse_content_length(&buf[..end]) {
                            break;
                        }
                    }
                }

                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/xml\r\n\
                     Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    Url::parse(&format!("http://{addr}/")).unwrap()
}

async fn state_for(endpoint: &Url) -> HostState {
    let kv: Arc<dyn KvBackend> = Arc::new(MemoryBackend::new());
    kv.init_schema(&schema_iops()).await.unwrap();
    HostState::new(
        kv,
        "CERTBODY".to_string(),
        HashMap::from([("158005755667".to_string(), "158005755667".to_string())]),
        endpoint.clone(),
    )
}

fn login_body(endpoint: &Url) -> (LoginRequest, PublicKey, StaticSecret) {
    let credentials = SigningCredentials {
        access_key_id: "key1".to_string(),
        secret_access_key: "secret1".to_string(),
        session_token: None,
    };
    let (public, secret) = generate_keypair();
    let blob = create_signed_request(&credentials, "us-mars-1", endpoint, &public, Utc::now());
    (
        LoginRequest {
            token: STANDARD.encode(blob),
        },
        public,
        secret,
    )
}

#[tokio::test]
async fn user_login_mints_a_day_token() {
    let endpoint = spawn_idp(identity_xml("AIDAJJGHH5Y53VXNHXHNG")).await;
    let state = state_for(&endpoint).await;
    let (body, _, secret) = login_body(&endpoint);

    let before = Utc::now();
    let response = LoginProcessor {
        state: &state,
        body,
    }
    .enact()
    .await
    .unwrap();

    // Both boxes open with the ephemeral server key.
    let token_key = open_message(
        &response.encrypted_auth_token,
        &response.server_public_key,
        &secret,
    )
    .unwrap();
    let certificate = open_message(
        &response.encrypted_certificate,
        &response.server_public_key,
        &secret,
    )
    .unwrap();
    assert_eq!(certificate, "CERTBODY");
    assert_eq!(token_key.len(), 32);

    // The issued token is retrievable by its key and is account-linked.
    let token = state.tokens.token_by_key(&token_key).await.unwrap();
    assert_eq!(token.token_type, TokenType::User);
    assert_eq!(token.entity_key, "158005755667");
    assert_eq!(token.requested_by, "account/158005755667");

    // User tokens expire a day out, modulo clock skew.
    let expected = before + Duration::hours(24);
    let skew = (token.expires.to_datetime() - expected).num_seconds().abs();
    assert!(skew <= 5, "expiry skew of {skew}s");
    assert_eq!(token.expires, response.valid_until);
}

#[tokio::test]
async fn instance_login_requires_a_registered_node() {
    let endpoint = spawn_idp(identity_xml("AIDAJJGHH5Y53VXNHXHNG:i-1232341asdkjf")).await;
    let state = state_for(&endpoint).await;

    // Not registered yet: the login is refused.
    let (body, _, _) = login_body(&endpoint);
    let err = LoginProcessor {
        state: &state,
        body,
    }
    .enact()
    .await
    .unwrap_err();
    assert!(matches!(err, HostError::Authentication(_)), "got {err:?}");

    // Register the node, then the login yields a non-expiring node token.
    PutQueueProcessor {
        state: &state,
        principal: "user/158005755667".to_string(),
        queue: Queue {
            name: "builds".to_string(),
            ..Queue::default()
        },
    }
    .enact()
    .await
    .unwrap();
    PutUnmanagedNodeProcessor {
        state: &state,
        node: PutUnmanagedNodeRequest {
            node_id: "i-1232341asdkjf".to_string(),
            queue: "builds".to_string(),
        },
    }
    .enact()
    .await
    .unwrap();

    let (body, _, secret) = login_body(&endpoint);
    let response = LoginProcessor {
        state: &state,
        body,
    }
    .enact()
    .await
    .unwrap();

    let token_key = open_message(
        &response.encrypted_auth_token,
        &response.server_public_key,
        &secret,
    )
    .unwrap();
    let token = state.tokens.token_by_key(&token_key).await.unwrap();
    assert_eq!(token.token_type, TokenType::Node);
    assert_eq!(token.entity_key, "i-1232341asdkjf");
    assert_eq!(token.expires, NEVER_EXPIRES);
}

#[tokio::test]
async fn login_outside_the_whitelist_is_refused() {
    let endpoint = spawn_idp(identity_xml("AIDAJJGHH5Y53VXNHXHNG")).await;
    let kv: Arc<dyn KvBackend> = Arc::new(MemoryBackend::new());
    kv.init_schema(&schema_iops()).await.unwrap();
    let state = HostState::new(
        kv,
        "CERTBODY".to_string(),
        HashMap::from([("12341234".to_string(), "12341234".to_string())]),
        endpoint.clone(),
    );

    let (body, _, _) = login_body(&endpoint);
    let err = LoginProcessor {
        state: &state,
        body,
    }
    .enact()
    .await
    .unwrap_err();
    assert!(matches!(err, HostError::Identity(_)), "got {err:?}");
}
