//! The SigV4 identity bridge. Clients prove who they are by signing a cloud
//! `GetCallerIdentity` request with their long-term credentials; the server
//! validates the assertion by replaying that exact signed request against
//! the identity provider, reusing the provider's own signature checks.

pub mod account;
pub mod idp;
pub mod request;
pub mod signer;

pub use account::get_my_account_id;
pub use idp::{authenticate_user, AuthenticatedUser};
pub use request::{parse_and_validate, IdentityRequest};
pub use signer::{create_signed_request, sts_endpoint, SigningCredentials};

/// The literal identity-assertion body. Anything else in a submitted blob
/// is overwritten before dispatch.
pub const GET_IDENTITY_BODY: &str = "Action=GetCallerIdentity&Version=2011-06-15";

/// Carries the client's Curve25519 public key inside the signed request, so
/// the key itself is covered by the signature.
pub const CLIENT_KEY_HEADER: &str = "X-Amz-Meta-Client-Key";

#[derive(thiserror::Error, Debug)]
pub enum SigError {
    #[error("unauthorized user")]
    UnauthorizedUser,

    #[error("malformed identity request: {0}")]
    MalformedRequest(String),

    /// A decoded identity-provider failure, surfaced with the HTTP status
    /// and the provider request id for correlation.
    #[error("{code}: {message} (status {status}, request id {request_id})")]
    Idp {
        code: String,
        message: String,
        status: u16,
        request_id: String,
    },

    #[error("identity provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("bad client key: {0}")]
    BadClientKey(String),

    #[error("identity call failed: {0}")]
    Sts(String),
}
