//! Cache handler configuration.
//!
//! Sources, lowest precedence first: built-in defaults, the legacy `BUILD_ID`
//! and `PUBLIC_URL` variables, an optional `regen.toml` (or an explicit
//! file), then `REGEN_*` variables with `__` separating nested keys
//! (`REGEN_PURGE__TIMEOUT_SECONDS=2`).

use config::{Config, Environment, File};
use regen_core::DEFAULT_CACHE_TAGS_HEADER;
use regen_purge::PurgeConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

const CONFIG_BASENAME: &str = "regen";
const ENV_PREFIX: &str = "REGEN";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Edge purge settings; the target is the site's public URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurgeSettings {
    #[serde(default = "default_purge_enabled")]
    pub enabled: bool,
    #[serde(default = "default_purge_timeout")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl Default for PurgeSettings {
    fn default() -> Self {
        Self {
            enabled: default_purge_enabled(),
            timeout_seconds: default_purge_timeout(),
            headers: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Build generation every key is scoped to.
    #[serde(default = "default_build_id")]
    pub build_id: String,
    /// Public origin of the site, used as the purge target.
    #[serde(default = "default_public_url")]
    pub public_url: String,
    /// Response header carrying comma-separated tags of pages and routes.
    #[serde(default = "default_tags_header")]
    pub cache_tags_header: String,
    #[serde(default)]
    pub purge: PurgeSettings,
}

fn default_build_id() -> String {
    "deadbeef".to_string()
}

fn default_public_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_tags_header() -> String {
    DEFAULT_CACHE_TAGS_HEADER.to_string()
}

fn default_purge_enabled() -> bool {
    true
}

fn default_purge_timeout() -> u64 {
    5
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            build_id: default_build_id(),
            public_url: default_public_url(),
            cache_tags_header: default_tags_header(),
            purge: PurgeSettings::default(),
        }
    }
}

impl CacheConfig {
    /// Load from `regen.toml` and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None, std::env::vars().collect())
    }

    /// Load with an explicit config file and environment map.
    pub fn load_from(
        file: Option<&Path>,
        env: HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(build_id) = env.get("BUILD_ID") {
            builder = builder.set_default("build_id", build_id.as_str())?;
        }
        if let Some(public_url) = env.get("PUBLIC_URL") {
            builder = builder.set_default("public_url", public_url.as_str())?;
        }

        builder = builder.add_source(File::with_name(CONFIG_BASENAME).required(false));
        if let Some(path) = file {
            builder = builder.add_source(File::from(path).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .source(Some(env.into_iter().collect())),
        );

        let config: CacheConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_build_id(mut self, build_id: impl Into<String>) -> Self {
        self.build_id = build_id.into();
        self
    }

    pub fn with_public_url(mut self, public_url: impl Into<String>) -> Self {
        self.public_url = public_url.into();
        self
    }

    pub fn with_tags_header(mut self, header: impl Into<String>) -> Self {
        self.cache_tags_header = header.into();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.build_id.trim().is_empty() {
            return Err(ConfigError::invalid("build_id", "must not be empty"));
        }
        url::Url::parse(&self.public_url)
            .map_err(|e| ConfigError::invalid("public_url", e.to_string()))?;
        if self.cache_tags_header.trim().is_empty() {
            return Err(ConfigError::invalid("cache_tags_header", "must not be empty"));
        }
        if self.purge.timeout_seconds == 0 {
            return Err(ConfigError::invalid(
                "purge.timeout_seconds",
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Purge target derived from the public URL.
    pub fn purge_config(&self) -> PurgeConfig {
        PurgeConfig {
            enabled: self.purge.enabled,
            base_url: self.public_url.clone(),
            timeout_seconds: self.purge.timeout_seconds,
            headers: self.purge.headers.clone(),
        }
    }
}
