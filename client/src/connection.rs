use std::path::Path;

use apollo_lib::conn::{ConnectionInfo, CONNECTION_ENV};

use crate::{api::ApiClient, ClientError};

/// Resolve the connection token — `APOLLO_CONNECTION` wins over the token
/// file — and build the pinned client from it.
pub fn obtain_connection(token_file: &Path) -> Result<(ApiClient, ConnectionInfo), ClientError> {
    let raw = match std::env::var(CONNECTION_ENV) {
        Ok(value) if !value.is_empty() => value,
        _ => std::fs::read_to_string(token_file).map_err(|_| {
            ClientError::Config(format!(
                "failed to read the token file {} and no {CONNECTION_ENV} is set; \
                 run `apollo login` first",
                token_file.display()
            ))
        })?,
    };

    let info = ConnectionInfo::decode(raw.trim())?;
    let client = ApiClient::connect(&info)?;
    Ok((client, info))
}
