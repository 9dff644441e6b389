//! The Apollo API client and the `apollo` CLI verbs built on it.

pub mod api;
pub mod connection;
pub mod login;
pub mod queues;
pub mod tasks;

use apollo_lib::conn::ConnError;

#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    /// A structured server error body.
    #[error("error {code}: {message} (request id {request_id})")]
    Api {
        code: u16,
        message: String,
        request_id: String,
    },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Connection(#[from] ConnError),

    #[error(transparent)]
    Encoding(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Config(String),

    #[error("{0}")]
    Auth(String),
}
