//! Configuration for the console backend.
//!
//! Values come from `JARVIS_*` environment variables on top of defaults. The
//! lookup is injectable so configuration can be built without touching the
//! process environment.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::core::errors::{JarvisError, JarvisResult};

/// Default model name.
const DEFAULT_MODEL: &str = "gemini-2.5-flash";
/// Default generative-language API endpoint.
const DEFAULT_API_BASE_URL: &str = "https://generativelanguage.googleapis.com";
/// Default HTTP port.
pub const DEFAULT_PORT: u16 = 3000;

/// Environment variables consulted for the API key, in priority order.
const API_KEY_VARS: [&str; 3] = ["JARVIS_API_KEY", "GEMINI_API_KEY", "API_KEY"];

/// Top-level configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct JarvisConfig {
    /// Language-model settings.
    pub model: ModelConfig,
    /// Response stream settings.
    pub stream: StreamConfig,
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Persistence settings.
    pub storage: StorageConfig,
}

/// Language-model settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelConfig {
    /// API key for the generative-language API.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Model name.
    pub model: String,
    /// API base URL.
    pub base_url: String,
    /// Connection timeout.
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_API_BASE_URL.to_string(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Response stream settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Longest wait for the next chunk before the stream counts as failed.
    #[serde(with = "duration_serde")]
    pub idle_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(60),
        }
    }
}

/// HTTP server settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listening port.
    pub port: u16,
    /// Directory served as static front-end.
    pub static_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            static_dir: PathBuf::from("static"),
        }
    }
}

/// Persistence settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// JSON state file. `None` keeps state in memory only.
    pub state_path: Option<PathBuf>,
}

impl JarvisConfig {
    /// Build configuration from the process environment.
    ///
    /// # Errors
    /// Returns an error if a variable is malformed or the result is invalid.
    pub fn from_env() -> JarvisResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    /// Returns an error if a variable is malformed or the result is invalid.
    pub fn from_lookup<F>(lookup: F) -> JarvisResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        config.model.api_key = API_KEY_VARS.iter().find_map(|&key| get(key));
        if let Some(model) = get("JARVIS_MODEL") {
            config.model.model = model;
        }
        if let Some(base_url) = get("JARVIS_API_BASE_URL") {
            config.model.base_url = base_url.trim_end_matches('/').to_string();
        }
        if let Some(secs) = get("JARVIS_CONNECT_TIMEOUT_SECS") {
            config.model.connect_timeout =
                Duration::from_secs(parse_number("JARVIS_CONNECT_TIMEOUT_SECS", &secs)?);
        }
        if let Some(secs) = get("JARVIS_STREAM_IDLE_TIMEOUT_SECS") {
            config.stream.idle_timeout =
                Duration::from_secs(parse_number("JARVIS_STREAM_IDLE_TIMEOUT_SECS", &secs)?);
        }
        if let Some(port) = get("JARVIS_PORT") {
            config.server.port = parse_number("JARVIS_PORT", &port)?;
        }
        if let Some(dir) = get("JARVIS_STATIC_DIR") {
            config.server.static_dir = PathBuf::from(dir);
        }
        config.storage.state_path = get("JARVIS_STATE_PATH").map(PathBuf::from);

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or invalid.
    pub fn validate(&self) -> JarvisResult<()> {
        if self.model.model.trim().is_empty() {
            return Err(JarvisError::InvalidConfig(
                "model.model must not be empty".to_string(),
            ));
        }

        if self.model.connect_timeout.is_zero() {
            return Err(JarvisError::InvalidConfig(
                "model.connect_timeout must be > 0".to_string(),
            ));
        }

        if self.stream.idle_timeout.is_zero() {
            return Err(JarvisError::InvalidConfig(
                "stream.idle_timeout must be > 0".to_string(),
            ));
        }

        if self.server.port == 0 {
            return Err(JarvisError::InvalidConfig(
                "server.port must be > 0".to_string(),
            ));
        }

        Url::parse(&self.model.base_url)?;

        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> JarvisResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| JarvisError::InvalidConfig(format!("{key} is not a valid number: {value}")))
}

/// Serde module for Duration serialization.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
