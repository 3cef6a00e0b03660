//! Configuration loading (spec §6 "Configuration (enumerated)"): TOML on
//! disk, with environment overrides for every secret-valued setting.

mod error;

use std::path::Path;

use serde::Deserialize;

pub use error::{ConfigError, ConfigResult};

fn default_lease_ttl_seconds() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    3
}

#[derive(Clone, Debug, Deserialize)]
pub struct ProviderAppConfig {
    pub app_id: String,
    pub installation_id: String,
    pub private_key: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AiProxyConfig {
    pub url: String,
    pub key: String,
    pub model: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub listen_addr: String,
    /// `sqlite://path.db` or `postgres://...`; dispatched on scheme by the
    /// CLI when constructing the Durable Store. Not in spec.md's
    /// enumeration, but required to stand up a store at all.
    pub database_url: String,
    pub webhook_secret: String,
    pub provider_app: ProviderAppConfig,
    #[serde(default = "default_lease_ttl_seconds")]
    pub lease_ttl_seconds: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    pub run_deadline_seconds: Option<u64>,
    pub ai_proxy: AiProxyConfig,
    pub artifact_storage_endpoint: String,
}

impl Config {
    /// `heartbeat_interval_seconds` is derived, never configured directly
    /// (spec §6, §4.4 `heartbeat_interval = T_lease / 3`).
    pub fn heartbeat_interval_seconds(&self) -> u64 {
        self.lease_ttl_seconds / 3
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.listen_addr.is_empty() {
            return Err(ConfigError::Validation("listen_addr must not be empty".to_string()));
        }
        if self.webhook_secret.is_empty() {
            return Err(ConfigError::Validation("webhook_secret must not be empty".to_string()));
        }
        if self.lease_ttl_seconds == 0 {
            return Err(ConfigError::Validation("lease_ttl_seconds must be greater than zero".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Validation("max_attempts must be greater than zero".to_string()));
        }
        Ok(())
    }

    /// Overrides secret-valued settings from the environment, matching
    /// spec §6's "all secret-valued settings accept environment override".
    fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("DELTA_CI_WEBHOOK_SECRET") {
            self.webhook_secret = value;
        }
        if let Ok(value) = std::env::var("DELTA_CI_PROVIDER_APP_PRIVATE_KEY") {
            self.provider_app.private_key = value;
        }
        if let Ok(value) = std::env::var("DELTA_CI_AI_PROXY_KEY") {
            self.ai_proxy.key = value;
        }
    }
}

/// Loads and validates a [`Config`] from a TOML file at `path`, applying
/// environment overrides for secret-valued fields.
pub fn load(path: impl AsRef<Path>) -> ConfigResult<Config> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .map_err(|source| ConfigError::Read { path: path.display().to_string(), source })?;
    let mut config: Config = toml::from_str(&raw)
        .map_err(|source| ConfigError::Parse { path: path.display().to_string(), source })?;
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    const MINIMAL: &str = r#"
        listen_addr = "0.0.0.0:8080"
        database_url = "sqlite://delta-ci.db"
        webhook_secret = "shh"
        artifact_storage_endpoint = "https://artifacts.example.com"

        [provider_app]
        app_id = "123"
        installation_id = "456"
        private_key = "-----BEGIN KEY-----"

        [ai_proxy]
        url = "https://ai.example.com"
        key = "ai-key"
        model = "gpt"
    "#;

    #[test]
    fn loads_minimal_config_with_defaults() {
        let file = write_config(MINIMAL);
        let config = load(file.path()).unwrap();
        assert_eq!(config.lease_ttl_seconds, 60);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.heartbeat_interval_seconds(), 20);
        assert_eq!(config.run_deadline_seconds, None);
    }

    #[test]
    fn rejects_empty_webhook_secret() {
        let file = write_config(
            r#"
                listen_addr = "0.0.0.0:8080"
                database_url = "sqlite://delta-ci.db"
                webhook_secret = ""
                artifact_storage_endpoint = "https://artifacts.example.com"

                [provider_app]
                app_id = "123"
                installation_id = "456"
                private_key = "key"

                [ai_proxy]
                url = "https://ai.example.com"
                key = "ai-key"
                model = "gpt"
            "#,
        );
        let err = load(file.path()).expect_err("empty webhook_secret must be rejected");
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn env_override_replaces_webhook_secret() {
        let file = write_config(MINIMAL);
        std::env::set_var("DELTA_CI_WEBHOOK_SECRET", "from-env");
        let config = load(file.path()).unwrap();
        std::env::remove_var("DELTA_CI_WEBHOOK_SECRET");
        assert_eq!(config.webhook_secret, "from-env");
    }
}
