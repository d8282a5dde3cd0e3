use crate::{hashing::djb2, response::InitializeResponse, Error, Result};

/// Reject keys that can't be used from a client: empty keys and server secrets.
pub(crate) fn validate_client_key(sdk_key: &str) -> Result<()> {
    if sdk_key.trim().is_empty() || sdk_key.starts_with("secret-") {
        log::warn!(target: "statsig", "invalid SDK key. Use a client key, not a server secret");
        return Err(Error::InvalidSdkKey);
    }
    Ok(())
}

/// Check that `response` was generated for `sdk_key`. Responses that don't say which key they were
/// generated with are accepted.
pub(crate) fn validate_response_key(sdk_key: &str, response: &InitializeResponse) -> Result<()> {
    match response.hashed_sdk_key_used.as_deref() {
        Some(hashed) if hashed != djb2(sdk_key) => Err(Error::SdkKeyMismatch),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_keys() {
        assert!(validate_client_key("client-abc").is_ok());
        assert!(matches!(validate_client_key(""), Err(Error::InvalidSdkKey)));
        assert!(matches!(validate_client_key("secret-abc"), Err(Error::InvalidSdkKey)));
    }

    #[test]
    fn response_keys() {
        let mut response = InitializeResponse::default();
        assert!(validate_response_key("client-abc", &response).is_ok());

        response.hashed_sdk_key_used = Some(djb2("client-abc"));
        assert!(validate_response_key("client-abc", &response).is_ok());
        assert!(matches!(
            validate_response_key("client-other", &response),
            Err(Error::SdkKeyMismatch)
        ));
    }
}
