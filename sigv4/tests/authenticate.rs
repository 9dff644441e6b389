//! End-to-end authentication against a canned identity provider.

use std::collections::HashMap;

use apollo_lib::cryptobox::generate_keypair;
use apollo_sigv4::{
    authenticate_user, create_signed_request, SigError, SigningCredentials,
};
use chrono::Utc;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
};
use url::Url;

const IDENTITY_XML: &str = r#"<GetCallerIdentityResponse xmlns="https://sts.amazonaws.com/doc/2011-06-15/">
  <GetCallerIdentityResult>
    <Arn>arn:aws:iam::158005755667:user/cyberax</Arn>
    <UserId>AIDAJJGHH5Y53VXNHXHNG:i-1232341asdkjf</UserId>
    <Account>158005755667</Account>
  </GetCallerIdentityResult>
  <ResponseMetadata>
    <RequestId>eb5d8b58-9e18-11e8-b32c-b77fbbd26035</RequestId>
  </ResponseMetadata>
</GetCallerIdentityResponse>"#;

const ERROR_XML: &str = r#"<ErrorResponse xmlns="https://sts.amazonaws.com/doc/2011-06-15/">
  <Error>
    <Type>Sender</Type>
    <Code>InvalidClientTokenId</Code>
    <Message>The security token included in the request is invalid.</Message>
  </Error>
  <RequestId>cb8d1c0c-9eb2-11e8-8f77-515da1a9422f</RequestId>
</ErrorResponse>"#;

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

/// A one-response-shape HTTP listener standing in for the cloud IdP.
async fn spawn_idp(status: u16, body: &'static str) -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
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
                    "HTTP/1.1 {status} X\r\nContent-Type: text/xml\r\n\
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

fn whitelist(accounts: &[&str]) -> HashMap<String, String> {
    accounts
        .iter()
        .map(|a| (a.to_string(), a.to_string()))
        .collect()
}

fn signed_blob(endpoint: &Url) -> (Vec<u8>, apollo_lib::cryptobox::PublicKey) {
    let credentials = SigningCredentials {
        access_key_id: "key1".to_string(),
        secret_access_key: "secret1".to_string(),
        session_token: None,
    };
    let (public, _) = generate_keypair();
    let blob = create_signed_request(&credentials, "us-mars-1", endpoint, &public, Utc::now());
    (blob, public)
}

#[tokio::test]
async fn whitelisted_account_authenticates() {
    let endpoint = spawn_idp(200, IDENTITY_XML).await;
    let (blob, public) = signed_blob(&endpoint);

    let auth = authenticate_user(
        &reqwest::Client::new(),
        &blob,
        &endpoint,
        &whitelist(&["158005755667"]),
    )
    .await
    .unwrap();

    assert_eq!(auth.account_id, "158005755667");
    assert_eq!(auth.public_key.as_bytes(), public.as_bytes());
    assert_eq!(auth.node_id.as_deref(), Some("i-1232341asdkjf"));
}

#[tokio::test]
async fn non_whitelisted_account_is_rejected() {
    let endpoint = spawn_idp(200, IDENTITY_XML).await;
    let (blob, _) = signed_blob(&endpoint);

    let err = authenticate_user(
        &reqwest::Client::new(),
        &blob,
        &endpoint,
        &whitelist(&["12341234"]),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, SigError::UnauthorizedUser));
}

#[tokio::test]
async fn missing_client_key_is_rejected() {
    let endpoint = spawn_idp(200, IDENTITY_XML).await;
    let (blob, _) = signed_blob(&endpoint);

    // Rename the key header; the signed-header list inside Authorization is
    // lowercase so only the header line changes.
    let without_key = String::from_utf8(blob)
        .unwrap()
        .replace("X-Amz-Meta-Client-Key", "X-Amz-Meta-Client-Bad");

    let err = authenticate_user(
        &reqwest::Client::new(),
        without_key.as_bytes(),
        &endpoint,
        &whitelist(&["158005755667"]),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, SigError::UnauthorizedUser));
}

#[tokio::test]
async fn provider_errors_surface_code_and_status() {
    let endpoint = spawn_idp(401, ERROR_XML).await;
    let (blob, _) = signed_blob(&endpoint);

    let err = authenticate_user(
        &reqwest::Client::new(),
        &blob,
        &endpoint,
        &whitelist(&["158005755667"]),
    )
    .await
    .unwrap_err();

    match err {
        SigError::Idp {
            code,
            message,
            status,
            ..
        } => {
            assert_eq!(code, "InvalidClientTokenId");
            assert_eq!(
                message,
                "The security token included in the request is invalid."
            );
            assert_eq!(status, 401);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn corrupted_provider_response_is_a_serialization_error() {
    let endpoint = spawn_idp(401, "baderr").await;
    let (blob, _) = signed_blob(&endpoint);

    let err = authenticate_user(
        &reqwest::Client::new(),
        &blob,
        &endpoint,
        &whitelist(&["158005755667"]),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, SigError::Idp { code, .. } if code == "SerializationError"));
}
