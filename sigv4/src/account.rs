use aws_config::SdkConfig;

use crate::SigError;

/// The server's own account id, used to resolve `"self"` entries in the
/// whitelisted-accounts configuration.
pub async fn get_my_account_id(config: &SdkConfig) -> Result<String, SigError> {
    let sts = aws_sdk_sts::Client::new(config);
    let output = sts
        .get_caller_identity()
        .send()
        .await
        .map_err(|e| SigError::Sts(e.to_string()))?;
    output
        .account()
        .map(str::to_string)
        .ok_or_else(|| SigError::Sts("no account in the caller identity".to_string()))
}
