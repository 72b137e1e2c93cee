use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::Error;
use crate::types::SessionId;

// =============================================================================
// File config (figment-deserialized from defaults / session_stream.toml / env)
// =============================================================================
//
//   session_stream.toml:   [cache]
//                          ttl_secs = 120
//
//   env var:               SESSION_STREAM_CACHE__TTL_SECS=120
//                          (double underscore = nesting)

pub const CONFIG_FILE_NAME: &str = "session_stream.toml";
pub const ENV_PREFIX: &str = "SESSION_STREAM_";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StreamFileConfig {
    #[serde(default)]
    pub channel: ChannelFileConfig,
    #[serde(default)]
    pub cache: CacheFileConfig,
}

/// Lives under `[channel]`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelFileConfig {
    #[serde(default = "default_channel_prefix")]
    pub prefix: String,
    /// Extra wire events to bind and forward as notifications.
    #[serde(default)]
    pub notification_events: Vec<String>,
}

impl Default for ChannelFileConfig {
    fn default() -> Self {
        Self {
            prefix: default_channel_prefix(),
            notification_events: Vec::new(),
        }
    }
}

/// Lives under `[cache]`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheFileConfig {
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
}

impl Default for CacheFileConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl(),
            max_entries: default_cache_max_entries(),
        }
    }
}

fn default_channel_prefix() -> String {
    "private-session-".to_string()
}
fn default_cache_ttl() -> u64 {
    300
}
fn default_cache_max_entries() -> usize {
    20
}

/// Layers: struct defaults -> `session_stream.toml` in `dir` -> `SESSION_STREAM_*` env.
pub fn load_config(dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(StreamFileConfig::default()))
        .merge(Toml::file(dir.join(CONFIG_FILE_NAME)))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

// =============================================================================
// Runtime config
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelConfig {
    pub prefix: String,
    pub notification_events: Vec<String>,
}

impl ChannelConfig {
    pub fn from_file(fc: &ChannelFileConfig) -> Self {
        Self {
            prefix: fc.prefix.clone(),
            notification_events: fc.notification_events.clone(),
        }
    }

    pub fn channel_name(&self, session: &SessionId) -> String {
        format!("{}{}", self.prefix, session)
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self::from_file(&ChannelFileConfig::default())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub max_entries: usize,
}

impl CacheConfig {
    pub fn from_file(fc: &CacheFileConfig) -> Self {
        Self {
            ttl: Duration::from_secs(fc.ttl_secs),
            max_entries: fc.max_entries,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::from_file(&CacheFileConfig::default())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamConfig {
    pub channel: ChannelConfig,
    pub cache: CacheConfig,
}

impl StreamConfig {
    pub fn from_file(fc: &StreamFileConfig) -> Self {
        Self {
            channel: ChannelConfig::from_file(&fc.channel),
            cache: CacheConfig::from_file(&fc.cache),
        }
    }

    /// Extract and validate the layered config for `dir`.
    pub fn load(dir: &Path) -> Result<Self> {
        let fc: StreamFileConfig = load_config(dir)
            .extract()
            .with_context(|| format!("failed to load config from {}", dir.display()))?;
        let config = Self::from_file(&fc);
        config.validate()?;
        info!(
            prefix = %config.channel.prefix,
            ttl_secs = config.cache.ttl.as_secs(),
            max_entries = config.cache.max_entries,
            "session stream config loaded"
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.channel.prefix.is_empty() {
            return Err(Error::Config("channel.prefix must not be empty".into()));
        }
        if self.cache.ttl.is_zero() {
            return Err(Error::Config("cache.ttl_secs must be positive".into()));
        }
        Ok(())
    }
}
