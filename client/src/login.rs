//! The login flow: server discovery, the SigV4 handshake and connection
//! token management.

use std::{io::Write, path::Path, time::Duration};

use apollo_lib::{
    api::{LoginRequest, LoginResponse, REQUEST_ID_HEADER},
    conn::CONNECTION_ENV,
    cryptobox::{generate_keypair, open_message},
    ids::random_id,
};
use apollo_sigv4::{create_signed_request, sts_endpoint, SigningCredentials};
use aws_credential_types::provider::ProvideCredentials;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use tracing::{debug, warn};

use crate::{api::base_url, api::ApiClient, ClientError};

const USER_DATA_MARKER: &str = "### APOLLO_SERVER_URL IS ";
const METADATA_URL: &str = "http://169.254.169.254/latest/user-data";
const METADATA_TIMEOUT: Duration = Duration::from_secs(2);

/// Scan the instance user-data for the server URL marker. Any failure —
/// unreachable metadata service, error status, missing marker — yields an
/// empty string.
pub async fn lookup_server_from_user_data() -> String {
    lookup_server_from(METADATA_URL).await
}

pub async fn lookup_server_from(url: &str) -> String {
    let Ok(client) = reqwest::Client::builder().timeout(METADATA_TIMEOUT).build() else {
        return String::new();
    };
    let Ok(response) = client.get(url).send().await else {
        return String::new();
    };
    let Ok(user_data) = response.text().await else {
        return String::new();
    };

    for line in user_data.lines() {
        if let Some(rest) = line.strip_prefix(USER_DATA_MARKER) {
            return rest.trim().to_string();
        }
    }
    String::new()
}

#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub server_url: String,
    pub auth_token: String,
    /// Delimiter-stripped PEM, i.e. base64 of the DER certificate.
    pub server_cert: String,
}

async fn signing_credentials(profile: &str) -> Result<(SigningCredentials, String), ClientError> {
    let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .profile_name(profile)
        .load()
        .await;

    let provider = config
        .credentials_provider()
        .ok_or_else(|| ClientError::Config("no AWS credentials provider is configured".into()))?;
    let credentials = provider
        .provide_credentials()
        .await
        .map_err(|e| ClientError::Config(format!("failed to load AWS credentials: {e}")))?;

    let region = config
        .region()
        .map(|region| region.as_ref().to_string())
        .unwrap_or_else(|| "us-east-1".to_string());

    Ok((
        SigningCredentials {
            access_key_id: credentials.access_key_id().to_string(),
            secret_access_key: credentials.secret_access_key().to_string(),
            session_token: credentials.session_token().map(str::to_string),
        },
        region,
    ))
}

/// Run the SigV4 login against the server and open the sealed response.
pub async fn send_sigv4_login(profile: &str, host: &str) -> Result<LoginOutcome, ClientError> {
    let server_url = if host.is_empty() {
        lookup_server_from_user_data().await
    } else {
        host.to_string()
    };
    if server_url.is_empty() {
        return Err(ClientError::Config(
            "no server URL is provided and none could be discovered from user-data".into(),
        ));
    }

    let profile = if profile.is_empty() { "default" } else { profile };
    let (credentials, region) = signing_credentials(profile).await?;

    // The key the server will seal the token and certificate to.
    let (public_key, secret_key) = generate_keypair();
    let blob = create_signed_request(
        &credentials,
        &region,
        &sts_endpoint(&region),
        &public_key,
        Utc::now(),
    );

    // First contact runs before the server certificate is known, so TLS
    // verification is off; trust comes from the sealed box instead.
    let http = reqwest::Client::builder()
        .use_rustls_tls()
        .danger_accept_invalid_certs(true)
        .build()?;
    let url = base_url(&server_url)?
        .join("sigv4-login")
        .map_err(|_| ClientError::Config(format!("invalid server address: {server_url}")))?;

    let response = http
        .post(url)
        .header(REQUEST_ID_HEADER, random_id())
        .json(&LoginRequest {
            token: STANDARD.encode(blob),
        })
        .send()
        .await?;
    let payload: LoginResponse = ApiClient::decode_response(response).await?;

    let auth_token = open_message(
        &payload.encrypted_auth_token,
        &payload.server_public_key,
        &secret_key,
    )
    .map_err(|_| ClientError::Auth("failed to open the secure box".into()))?;
    let server_cert = open_message(
        &payload.encrypted_certificate,
        &payload.server_public_key,
        &secret_key,
    )
    .map_err(|_| ClientError::Auth("failed to open the secure box".into()))?;

    Ok(LoginOutcome {
        server_url,
        auth_token,
        server_cert,
    })
}

/// `apollo login`: obtain a session token and save the connection string.
pub async fn do_login(profile: &str, host: &str, token_file: &Path) -> Result<(), ClientError> {
    if std::env::var(CONNECTION_ENV).map(|v| !v.is_empty()).unwrap_or(false) {
        warn!("found {CONNECTION_ENV} in the environment, it will take precedence");
    }

    let outcome = send_sigv4_login(profile, host).await?;
    debug!("received a successful connection token");

    println!("APIKEY\t{}", outcome.auth_token);

    let connection = format!(
        "{}#{}#{}",
        outcome.server_url, outcome.auth_token, outcome.server_cert
    );
    write_private(token_file, &connection)
}

fn write_private(path: &Path, contents: &str) -> Result<(), ClientError> {
    use std::os::unix::fs::OpenOptionsExt;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents.as_bytes())?;
    Ok(())
}

/// `apollo get-node-token`: mint a node-linked connection token.
pub async fn do_get_node_token(
    client: &ApiClient,
    host: &str,
    node_id: &str,
) -> Result<(), ClientError> {
    let response = client.get_node_token(node_id).await?;
    println!(
        "TOKEN\t{}#{}#{}",
        host, response.auth_token, response.certificate
    );
    Ok(())
}
