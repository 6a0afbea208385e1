//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (SMALLWORLD_*)
//! 2. TOML config file (if SMALLWORLD_CONFIG_FILE set)
//! 3. Built-in defaults

use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (SMALLWORLD_*)
/// 2. TOML config file (if SMALLWORLD_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Base URL of the smaller world backend.
    ///
    /// Set via SMALLWORLD_API_BASE_URL environment variable.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Session token sent with every request.
    ///
    /// Set via SMALLWORLD_SESSION_TOKEN environment variable.
    /// Required only for routes that need a signed-in user.
    #[serde(default)]
    pub session_token: Option<String>,

    /// User-Agent string for HTTP requests.
    ///
    /// Set via SMALLWORLD_USER_AGENT environment variable.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// HTTP request timeout in milliseconds.
    ///
    /// Set via SMALLWORLD_TIMEOUT_MS environment variable.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Polling interval for feeds in milliseconds; 0 disables polling.
    ///
    /// Set via SMALLWORLD_REFRESH_INTERVAL_MS environment variable.
    #[serde(default)]
    pub refresh_interval_ms: u64,

    /// How long an entry survives after its last subscriber leaves.
    ///
    /// Set via SMALLWORLD_RETENTION_MS environment variable.
    #[serde(default = "default_retention_ms")]
    pub retention_ms: u64,
}

fn default_api_base_url() -> String {
    "http://localhost:3000".into()
}

fn default_user_agent() -> String {
    "smallworld/0.1".into()
}

fn default_timeout_ms() -> u64 {
    20_000
}

fn default_retention_ms() -> u64 {
    300_000 // 5 minutes
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            session_token: None,
            user_agent: default_user_agent(),
            timeout_ms: default_timeout_ms(),
            refresh_interval_ms: 0,
            retention_ms: default_retention_ms(),
        }
    }
}

impl AppConfig {
    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Polling interval, or `None` when polling is disabled.
    pub fn refresh_interval(&self) -> Option<Duration> {
        (self.refresh_interval_ms > 0).then(|| Duration::from_millis(self.refresh_interval_ms))
    }

    pub fn retention(&self) -> Duration {
        Duration::from_millis(self.retention_ms)
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `SMALLWORLD_`
    /// 2. TOML file from `SMALLWORLD_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("SMALLWORLD_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("SMALLWORLD_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Session token for routes that need a signed-in user.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if no session token is configured.
    pub fn require_session_token(&self) -> Result<&str, ConfigError> {
        self.session_token.as_deref().ok_or_else(|| ConfigError::Missing {
            field: "session_token".into(),
            hint: "Set SMALLWORLD_SESSION_TOKEN environment variable".into(),
        })
    }
}
