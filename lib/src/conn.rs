//! The connection-token codec. A connection token travels on disk, in the
//! `APOLLO_CONNECTION` environment variable and on the wire, and packs the
//! server address, the bearer token and the pinned server certificate into
//! `<host:port>#<auth_token>#<base64(DER certificate)>`.

use base64::{engine::general_purpose::STANDARD, Engine as _};

/// Environment variable carrying a complete connection token.
pub const CONNECTION_ENV: &str = "APOLLO_CONNECTION";

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConnError {
    #[error("incorrect connection token format")]
    BadFormat,
    #[error("failed to decode the certificate in the connection token")]
    BadCertificate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub host: String,
    pub auth_token: String,
    /// DER-encoded server certificate, pinned by clients.
    pub cert_der: Vec<u8>,
}

impl ConnectionInfo {
    pub fn decode(token: &str) -> Result<Self, ConnError> {
        let components: Vec<&str> = token.split('#').collect();
        let [host, auth_token, cert] = components[..] else {
            return Err(ConnError::BadFormat);
        };

        let cert_der = STANDARD
            .decode(cert)
            .map_err(|_| ConnError::BadCertificate)?;

        Ok(Self {
            host: host.to_string(),
            auth_token: auth_token.to_string(),
            cert_der,
        })
    }

    pub fn encode(&self) -> String {
        format!(
            "{}#{}#{}",
            self.host,
            self.auth_token,
            STANDARD.encode(&self.cert_der)
        )
    }
}
