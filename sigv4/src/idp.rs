//! Dispatch of the rewritten-but-still-signed request to the identity
//! provider, and decoding of its XML responses.

use std::collections::HashMap;

use apollo_lib::cryptobox::{decode_public_key, PublicKey};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::{parse_and_validate, SigError, CLIENT_KEY_HEADER};

#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub public_key: PublicKey,
    pub account_id: String,
    /// Set when the signer's user id carries a cloud instance suffix; the
    /// issued token is then node-linked rather than user-linked.
    pub node_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IdentityResponseDoc {
    #[serde(rename = "GetCallerIdentityResult")]
    result: CallerIdentity,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallerIdentity {
    #[serde(rename = "Arn", default)]
    pub arn: String,
    #[serde(rename = "UserId", default)]
    pub user_id: String,
    #[serde(rename = "Account", default)]
    pub account: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponseDoc {
    #[serde(rename = "Error")]
    error: ErrorDetail,
    #[serde(rename = "RequestId", default)]
    request_id: String,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(rename = "Code", default)]
    code: String,
    #[serde(rename = "Message", default)]
    message: String,
}

fn root_element_name(xml: &str) -> Option<String> {
    let mut reader = quick_xml::Reader::from_str(xml);
    loop {
        match reader.read_event() {
            Ok(quick_xml::events::Event::Start(start)) => {
                return String::from_utf8(start.name().as_ref().to_vec()).ok()
            }
            Ok(quick_xml::events::Event::Eof) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
}

/// Decode the provider response body. The happy path is the identity
/// document; failures try `ErrorResponse`, then
/// `ServiceUnavailableException`, and otherwise synthesize a serialization
/// error. Status code and request id are always surfaced.
pub fn decode_identity_response(
    body: &[u8],
    status: u16,
    fallback_request_id: &str,
) -> Result<CallerIdentity, SigError> {
    let serialization_error = || SigError::Idp {
        code: "SerializationError".to_string(),
        message: "failed to parse the identity provider response".to_string(),
        status,
        request_id: fallback_request_id.to_string(),
    };

    let text = std::str::from_utf8(body).map_err(|_| serialization_error())?;

    match root_element_name(text).as_deref() {
        Some("GetCallerIdentityResponse") => {
            let doc: IdentityResponseDoc =
                quick_xml::de::from_str(text).map_err(|_| serialization_error())?;
            if doc.result.account.is_empty() {
                return Err(serialization_error());
            }
            Ok(doc.result)
        }
        Some("ErrorResponse") => {
            let doc: ErrorResponseDoc =
                quick_xml::de::from_str(text).map_err(|_| serialization_error())?;
            Err(SigError::Idp {
                code: doc.error.code,
                message: doc.error.message,
                status,
                request_id: if doc.request_id.is_empty() {
                    fallback_request_id.to_string()
                } else {
                    doc.request_id
                },
            })
        }
        Some("ServiceUnavailableException") => Err(SigError::Idp {
            code: "ServiceUnavailableException".to_string(),
            message: "service is unavailable".to_string(),
            status,
            request_id: fallback_request_id.to_string(),
        }),
        _ => Err(serialization_error()),
    }
}

/// Authenticate a shipped signed identity request. Returns the signer's
/// public key, account and (for instance-profile signers) node id.
pub async fn authenticate_user(
    http: &reqwest::Client,
    blob: &[u8],
    endpoint: &Url,
    whitelisted_accounts: &HashMap<String, String>,
) -> Result<AuthenticatedUser, SigError> {
    let request = parse_and_validate(blob)?;

    let mut dispatch = http.post(endpoint.clone()).body(request.body.clone());
    for (name, value) in &request.headers {
        dispatch = dispatch.header(name.as_str(), value.as_str());
    }
    let response = dispatch.send().await?;

    let status = response.status().as_u16();
    let request_id = response
        .headers()
        .get("x-amz-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let body = response.bytes().await?;

    let identity = decode_identity_response(&body, status, &request_id)?;
    debug!("identity provider confirmed {}", identity.arn);

    if !whitelisted_accounts.contains_key(&identity.account) {
        return Err(SigError::UnauthorizedUser);
    }

    let public_key = request
        .header(CLIENT_KEY_HEADER)
        .ok_or(SigError::UnauthorizedUser)?;
    let public_key =
        decode_public_key(public_key).map_err(|e| SigError::BadClientKey(e.to_string()))?;

    let node_id = identity
        .user_id
        .split_once(':')
        .filter(|(_, suffix)| suffix.starts_with("i-"))
        .map(|(_, suffix)| suffix.to_string());

    Ok(AuthenticatedUser {
        public_key,
        account_id: identity.account,
        node_id,
    })
}
