//! Publishing platform adapters and the credential lookup they share.

pub mod webhook;

use std::collections::HashMap;

use log::warn;

use crate::config::DispatchConfig;
use crate::integration_keyring;
use crate::protocol::{DispatchPayload, SendOutcome};

/// Destination and bearer token for one platform; either may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlatformCredentials {
    pub endpoint: Option<String>,
    pub token: Option<String>,
}

/// Resolves credentials per platform from external configuration.
pub trait CredentialSource: Send + Sync {
    fn resolve(&self, platform: &str) -> PlatformCredentials;
}

/// Interface implemented by concrete publishing adapters.
pub trait PlatformAdapter: Send + Sync {
    /// Sends one payload. Never panics or errors: every outcome is normalized.
    fn send(&self, payload: &DispatchPayload) -> SendOutcome;
}

/// Environment variable name for a platform setting, e.g. `MARQUEE_TOUTIAO_TOKEN`.
pub fn platform_env_key(platform: &str, suffix: &str) -> String {
    let normalized: String = platform
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() {
                ch.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("MARQUEE_{normalized}_{suffix}")
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Environment first, then config endpoints and the OS keyring.
pub struct EnvCredentialSource {
    config_endpoints: HashMap<String, String>,
    use_keyring: bool,
}

impl EnvCredentialSource {
    pub fn new(config: &DispatchConfig, use_keyring: bool) -> Self {
        Self {
            config_endpoints: config
                .platforms
                .iter()
                .map(|platform| (platform.name.trim().to_string(), platform.endpoint.clone()))
                .collect(),
            use_keyring,
        }
    }

    fn keyring_token(&self, platform: &str) -> Option<String> {
        if !self.use_keyring {
            return None;
        }
        match integration_keyring::get_platform_token(platform) {
            Ok(token) => token,
            Err(err) => {
                warn!("{err}");
                None
            }
        }
    }
}

impl CredentialSource for EnvCredentialSource {
    fn resolve(&self, platform: &str) -> PlatformCredentials {
        let endpoint = non_blank(std::env::var(platform_env_key(platform, "ENDPOINT")).ok())
            .or_else(|| non_blank(self.config_endpoints.get(platform).cloned()));
        let token = non_blank(std::env::var(platform_env_key(platform, "TOKEN")).ok())
            .or_else(|| self.keyring_token(platform));
        PlatformCredentials { endpoint, token }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::StaticCredentials;
    use super::{platform_env_key, CredentialSource, EnvCredentialSource};
    use crate::config::{DispatchConfig, PlatformConfig};

    #[test]
    fn test_platform_env_key_normalizes_name() {
        assert_eq!(platform_env_key("toutiao", "TOKEN"), "MARQUEE_TOUTIAO_TOKEN");
        assert_eq!(
            platform_env_key(" bai-jia.hao ", "ENDPOINT"),
            "MARQUEE_BAI_JIA_HAO_ENDPOINT"
        );
    }

    #[test]
    fn test_config_endpoint_used_when_environment_is_silent() {
        let config = DispatchConfig {
            platforms: vec![PlatformConfig {
                name: "marquee-test-config-only".to_string(),
                endpoint: " https://hooks.example.com/in ".to_string(),
            }],
            ..DispatchConfig::default()
        };
        let credentials = EnvCredentialSource::new(&config, false).resolve("marquee-test-config-only");
        assert_eq!(credentials.endpoint.as_deref(), Some("https://hooks.example.com/in"));
        assert_eq!(credentials.token, None);
    }

    #[test]
    fn test_static_credentials_default_to_absent() {
        let credentials = StaticCredentials::default().with("p", Some("https://e"), None);
        assert_eq!(credentials.resolve("p").endpoint.as_deref(), Some("https://e"));
        assert_eq!(credentials.resolve("other"), Default::default());
    }
}
