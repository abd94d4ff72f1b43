use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::error::{ClientError, ClientResult};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub auth_base_url: String,
    pub site_url: String,
    pub request_timeout_secs: u64,
    pub stream: StreamConfig,
    pub feed: FeedConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamConfig {
    pub reconnect: ReconnectPolicy,
}

/// How long the stream waits before reconnecting after a transport error.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReconnectPolicy {
    Fixed {
        delay_ms: u64,
    },
    Exponential {
        initial_ms: u64,
        max_ms: u64,
        #[serde(default)]
        jitter: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FeedConfig {
    pub debounce_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub list_stale_secs: u64,
    pub taxonomy_stale_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8787/api".to_owned(),
            auth_base_url: "http://localhost:8787".to_owned(),
            site_url: "http://localhost:3000".to_owned(),
            request_timeout_secs: 10,
            stream: StreamConfig::default(),
            feed: FeedConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::Fixed { delay_ms: 3_000 }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self { debounce_ms: 500 }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            list_stale_secs: 60,
            taxonomy_stale_secs: 300,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (0 for the first retry).
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            ReconnectPolicy::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            ReconnectPolicy::Exponential {
                initial_ms,
                max_ms,
                jitter,
            } => {
                let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
                let capped = initial_ms.saturating_mul(factor).min(max_ms);
                if jitter && capped > 1 {
                    let low = capped / 2;
                    Duration::from_millis(rand::rng().random_range(low..=capped))
                } else {
                    Duration::from_millis(capped)
                }
            }
        }
    }
}

impl ReconnectPolicy {
    pub fn validate(&self) -> ClientResult<()> {
        match *self {
            ReconnectPolicy::Fixed { delay_ms: 0 } => Err(ClientError::Config(
                "stream.reconnect.delay_ms must be positive".into(),
            )),
            ReconnectPolicy::Exponential { initial_ms: 0, .. } => Err(ClientError::Config(
                "stream.reconnect.initial_ms must be positive".into(),
            )),
            ReconnectPolicy::Exponential {
                initial_ms, max_ms, ..
            } if max_ms < initial_ms => Err(ClientError::Config(format!(
                "stream.reconnect.max_ms ({max_ms}) is below initial_ms ({initial_ms})"
            ))),
            _ => Ok(()),
        }
    }
}

impl FeedConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl CacheConfig {
    pub fn list_stale_after(&self) -> Duration {
        Duration::from_secs(self.list_stale_secs)
    }

    pub fn taxonomy_stale_after(&self) -> Duration {
        Duration::from_secs(self.taxonomy_stale_secs)
    }
}

impl ClientConfig {
    pub fn config_file_path() -> ClientResult<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| ClientError::Config("no configuration directory available".into()))?;
        let app_dir = config_dir.join("tenx");
        std::fs::create_dir_all(&app_dir)?;
        Ok(app_dir.join("config.json"))
    }

    /// Loads the user config, writing defaults when it is missing or unreadable.
    pub fn load() -> Self {
        let loaded = Self::config_file_path().and_then(|path| Self::from_file(&path));
        let mut config = match loaded {
            Ok(config) => config,
            Err(err) => {
                warn!(error = %err, "could not load config, using defaults");
                let defaults = Self::default();
                if let Err(save_err) = defaults.save() {
                    warn!(error = %save_err, "could not write default config");
                }
                defaults
            }
        };
        config.apply_env_overrides();
        config
    }

    pub fn from_file(path: &Path) -> ClientResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ClientConfig = serde_json::from_str(&content)?;
        config.validate()?;
        debug!(path = %path.display(), "loaded client config");
        Ok(config)
    }

    pub fn save(&self) -> ClientResult<()> {
        let path = Self::config_file_path()?;
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("TENX_API_URL") {
            self.api_base_url = value;
        }
        if let Ok(value) = std::env::var("TENX_AUTH_URL") {
            self.auth_base_url = value;
        }
        if let Ok(value) = std::env::var("TENX_SITE_URL") {
            self.site_url = value;
        }
    }

    pub fn validate(&self) -> ClientResult<()> {
        for (name, value) in [
            ("api_base_url", &self.api_base_url),
            ("auth_base_url", &self.auth_base_url),
            ("site_url", &self.site_url),
        ] {
            Url::parse(value).map_err(|e| ClientError::Config(format!("{name}: {e}")))?;
        }
        if self.request_timeout_secs == 0 {
            return Err(ClientError::Config(
                "request_timeout_secs must be positive".into(),
            ));
        }
        self.stream.reconnect.validate()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// API base with a trailing slash so relative joins keep the path prefix.
    pub fn api_base(&self) -> ClientResult<Url> {
        let mut raw = self.api_base_url.clone();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        Ok(Url::parse(&raw)?)
    }

    pub fn stream_url(&self) -> ClientResult<Url> {
        Ok(self.api_base()?.join("stream")?)
    }
}
