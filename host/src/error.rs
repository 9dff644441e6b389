use apollo_lib::{api::ErrorBody, cryptobox::CryptoBoxError};
use apollo_sigv4::SigError;
use apollo_store::StoreError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::warn;

/// The standardized error returned by the Apollo control plane.
#[derive(thiserror::Error, Debug)]
pub enum HostError {
    /// Malformed or inconsistent request fields.
    #[error("{0}")]
    Validation(String),

    /// Failed login, unknown/expired token or a rejected principal.
    #[error("{0}")]
    Authentication(String),

    /// The request contradicts existing state.
    #[error("{0}")]
    Conflict(String),

    /// A backend failure; retried at the transport layer, never locally.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Identity bridge failures surface as authentication errors.
    #[error(transparent)]
    Identity(#[from] SigError),

    #[error(transparent)]
    Crypto(#[from] CryptoBoxError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HostError {
    pub fn status(&self) -> StatusCode {
        match self {
            HostError::Validation(_) => StatusCode::BAD_REQUEST,
            HostError::Authentication(_) | HostError::Identity(_) => StatusCode::UNAUTHORIZED,
            HostError::Conflict(_) => StatusCode::CONFLICT,
            HostError::Store(_) | HostError::Crypto(_) | HostError::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

pub type HostResult<T> = Result<T, HostError>;

/// A [`HostError`] stamped with the request id, rendered as the structured
/// `{code, message, request_id}` body.
#[derive(Debug)]
pub struct ApiError {
    pub error: HostError,
    pub request_id: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.error.status();
        let message = self.error.to_string();
        warn!(request_id = %self.request_id, "request failed: {message}");
        (
            status,
            Json(ErrorBody {
                code: status.as_u16(),
                message,
                request_id: self.request_id,
            }),
        )
            .into_response()
    }
}
