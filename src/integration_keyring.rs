//! Keyring storage for publishing platform bearer tokens.

use keyring::Entry;

use crate::backends::platform_env_key;

const PLATFORM_SERVICE_NAME: &str = "marquee.platform";

fn platform_entry(platform: &str) -> Result<Entry, String> {
    Entry::new(PLATFORM_SERVICE_NAME, platform)
        .map_err(|err| format!("failed to create keyring entry for platform '{platform}': {err}"))
}

fn keyring_failure(operation: &str, platform: &str, err: &keyring::Error) -> String {
    format!(
        "failed to {operation} for platform '{platform}' in the system keyring: {err} (set {} instead)",
        platform_env_key(platform, "TOKEN")
    )
}

/// Saves the bearer token for a platform into the OS keyring.
pub fn set_platform_token(platform: &str, token: &str) -> Result<(), String> {
    platform_entry(platform)?
        .set_password(token)
        .map_err(|err| keyring_failure("save token", platform, &err))
}

/// Loads the bearer token for a platform. A blank stored token counts as none.
pub fn get_platform_token(platform: &str) -> Result<Option<String>, String> {
    match platform_entry(platform)?.get_password() {
        Ok(token) => Ok(Some(token).filter(|token| !token.trim().is_empty())),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(err) => Err(keyring_failure("load token", platform, &err)),
    }
}

#[cfg(test)]
mod tests {
    use super::keyring_failure;

    #[test]
    fn test_keyring_failure_points_at_the_environment_variable() {
        let message = keyring_failure(
            "load token",
            "tou-tiao",
            &keyring::Error::PlatformFailure("no provider".into()),
        );
        assert!(message.contains("platform 'tou-tiao'"));
        assert!(message.contains("MARQUEE_TOU_TIAO_TOKEN"));
    }
}
