//! Connection authentication (spec §4.7 "Authentication"): disabled, shared
//! API keys compared in constant time, or bearer tokens treated opaquely.

use crate::config::AuthConfig;

#[derive(Debug, Clone)]
pub enum AuthMode {
    Disabled,
    ApiKey { keys: Vec<String> },
    Bearer,
}

impl AuthMode {
    pub fn from_config(config: &AuthConfig) -> Self {
        if !config.enabled {
            AuthMode::Disabled
        } else if !config.api_keys.is_empty() {
            AuthMode::ApiKey {
                keys: config.api_keys.clone(),
            }
        } else {
            AuthMode::Bearer
        }
    }

    pub fn requires_auth(&self) -> bool {
        !matches!(self, AuthMode::Disabled)
    }

    /// Bearer tokens are implementation-defined and treated opaquely per
    /// spec §4.7: any non-empty token is accepted. API keys are compared
    /// in constant time against the configured set.
    pub fn verify(&self, token: &str) -> bool {
        match self {
            AuthMode::Disabled => true,
            AuthMode::ApiKey { keys } => keys.iter().any(|key| constant_time_eq(key, token)),
            AuthMode::Bearer => !token.is_empty(),
        }
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_mode_accepts_anything() {
        let mode = AuthMode::Disabled;
        assert!(!mode.requires_auth());
        assert!(mode.verify(""));
    }

    #[test]
    fn api_key_mode_rejects_wrong_and_mismatched_length_keys() {
        let mode = AuthMode::ApiKey {
            keys: vec!["secret123".to_string()],
        };
        assert!(mode.verify("secret123"));
        assert!(!mode.verify("secret124"));
        assert!(!mode.verify("short"));
    }

    #[test]
    fn bearer_mode_only_requires_a_non_empty_token() {
        let mode = AuthMode::Bearer;
        assert!(mode.verify("anything"));
        assert!(!mode.verify(""));
    }
}
