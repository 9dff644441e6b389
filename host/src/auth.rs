//! Request-id propagation and bearer-token authentication middleware.

use apollo_lib::{
    api::{REQUEST_ID_HEADER, TOKEN_HEADER},
    ids::random_id,
    NEVER_EXPIRES,
};
use apollo_store::model::AuthToken;
use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, HeaderValue},
    middleware::Next,
    response::Response,
};
use chrono::Utc;

use crate::{error::ApiError, HostError, HostState};

/// The per-request correlation id, taken from `X-Request-Id` or generated.
#[derive(Clone, Debug)]
pub struct RequestId(pub String);

impl RequestId {
    /// Stamp an error with this request id.
    pub fn wrap(&self, error: impl Into<HostError>) -> ApiError {
        ApiError {
            error: error.into(),
            request_id: self.0.clone(),
        }
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for RequestId {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<RequestId>()
            .cloned()
            .unwrap_or_else(|| RequestId(random_id())))
    }
}

/// The authenticated token behind the current request.
#[derive(Clone, Debug)]
pub struct Principal(pub AuthToken);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Principal {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let request_id = parts
            .extensions
            .get::<RequestId>()
            .cloned()
            .unwrap_or_else(|| RequestId(random_id()));
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .ok_or_else(|| request_id.wrap(HostError::Authentication(
                "request is not authenticated".to_string(),
            )))
    }
}

pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(random_id);

    request.extensions_mut().insert(RequestId(request_id.clone()));
    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Resolve `X-Apollo-Token` against the token store and stash the principal
/// in the request. Unknown and expired tokens are rejected.
pub async fn token_auth_middleware(
    State(state): State<HostState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .cloned()
        .unwrap_or_else(|| RequestId(random_id()));

    let token = request
        .headers()
        .get(TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    let principal = state.tokens.token_by_key(token).await.filter(|token| {
        token.expires == NEVER_EXPIRES || token.expires.to_datetime() > Utc::now()
    });
    let Some(principal) = principal else {
        return Err(request_id.wrap(HostError::Authentication(
            "unknown or expired token".to_string(),
        )));
    };

    request.extensions_mut().insert(Principal(principal));
    Ok(next.run(request).await)
}
