//! Fatal-only error type: a malformed or incomplete configuration aborts
//! startup rather than limping along with defaults (spec §7 "Fatal").

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: String, source: std::io::Error },

    #[error("failed to parse config file {path}: {source}")]
    Parse { path: String, source: toml::de::Error },

    #[error("invalid configuration: {0}")]
    Validation(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;
