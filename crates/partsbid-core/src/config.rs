// Client configuration loading and validation (config/client.toml).

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Url;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

/// Environment variable that overrides `api.base_url`.
pub const BASE_URL_ENV: &str = "PARTSBID_API_BASE_URL";

/// Config file location relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/client.toml";

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to read config file {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },
}

// ---------------------------------------------------------------------------
// Config structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub view: ViewConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_award_timeout")]
    pub award_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout(),
            award_timeout_secs: default_award_timeout(),
        }
    }
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn award_timeout(&self) -> Duration {
        Duration::from_secs(self.award_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl StreamConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// How bids are bucketed into vendor groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    /// Group by the vendor's display name. A vendor whose name is missing on
    /// some bids ends up in two groups.
    #[default]
    DisplayName,
    /// Group by vendor id and use the display name only as the label.
    VendorId,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ViewConfig {
    #[serde(default)]
    pub group_by: GroupBy,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    /// Where the file-backed auth context keeps the session token. Defaults
    /// to the platform data directory.
    #[serde(default)]
    pub token_file: Option<PathBuf>,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8000/api/v1".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

fn default_award_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Parse and validate a config file at `path`. The file must exist.
pub fn load_config_from(path: &Path) -> Result<ClientConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ConfigError::FileNotFound {
            path: path.to_path_buf(),
        },
        _ => ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        },
    })?;
    let config: ClientConfig = toml::from_str(&text).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        source: e,
    })?;
    validate(&config)?;
    Ok(config)
}

/// Resolve the client configuration.
///
/// An explicit path must exist. Without one, `config/client.toml` in the
/// working directory is used when present and built-in defaults otherwise.
/// `PARTSBID_API_BASE_URL` overrides the base URL in every case.
pub fn load_config(explicit: Option<&Path>) -> Result<ClientConfig, ConfigError> {
    let mut config = match explicit {
        Some(path) => load_config_from(path)?,
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_PATH);
            if default_path.exists() {
                load_config_from(default_path)?
            } else {
                info!("No {DEFAULT_CONFIG_PATH} found, using built-in defaults");
                ClientConfig::default()
            }
        }
    };

    if let Ok(base_url) = std::env::var(BASE_URL_ENV) {
        apply_base_url_override(&mut config, base_url)?;
    }

    Ok(config)
}

fn apply_base_url_override(config: &mut ClientConfig, base_url: String) -> Result<(), ConfigError> {
    info!("Using API base URL from {BASE_URL_ENV}: {base_url}");
    config.api.base_url = base_url;
    validate(config)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &ClientConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.api.base_url).map_err(|e| ConfigError::ValidationError {
        field: "api.base_url".into(),
        message: format!("not a valid URL: {e}"),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::ValidationError {
            field: "api.base_url".into(),
            message: format!("scheme must be http or https, got `{}`", url.scheme()),
        });
    }
    if url.host_str().is_none() {
        return Err(ConfigError::ValidationError {
            field: "api.base_url".into(),
            message: "must include a host".into(),
        });
    }

    let timeouts: &[(&str, u64)] = &[
        ("api.request_timeout_secs", config.api.request_timeout_secs),
        ("api.award_timeout_secs", config.api.award_timeout_secs),
        ("stream.connect_timeout_secs", config.stream.connect_timeout_secs),
    ];
    for (field, secs) in timeouts {
        if *secs == 0 {
            return Err(ConfigError::ValidationError {
                field: (*field).into(),
                message: "must be greater than 0".into(),
            });
        }
    }

    Ok(())
}
