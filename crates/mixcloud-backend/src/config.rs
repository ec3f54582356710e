use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use crate::auth::{OAuthSettings, DEFAULT_REDIRECT_PORT};
use crate::mixcloud::{ClientSettings, API_BASE_URL, DESCRIPTION_LIMIT};
use crate::retry::RetryPolicy;

const APP_NAME: &str = "mixcloud-updater";
const CONFIG_FILE: &str = "config.json";

/// Environment variables that override the stored application credentials
const CLIENT_ID_ENV: &str = "MIXCLOUD_CLIENT_ID";
const CLIENT_SECRET_ENV: &str = "MIXCLOUD_CLIENT_SECRET";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// OAuth application credentials registered with Mixcloud
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    /// Loopback port for the OAuth redirect. Must match the redirect URI
    /// registered for the application.
    #[serde(default = "default_redirect_port")]
    pub redirect_port: u16,
    /// How long to wait for the browser callback before giving up
    #[serde(default = "default_auth_timeout")]
    pub auth_timeout_secs: u64,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_secs: u64,
    #[serde(default = "default_description_limit")]
    pub description_limit: usize,
}

fn default_redirect_port() -> u16 {
    DEFAULT_REDIRECT_PORT
}

fn default_auth_timeout() -> u64 {
    300
}

fn default_api_base_url() -> String {
    API_BASE_URL.to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> u64 {
    1000
}

fn default_max_delay() -> u64 {
    30
}

fn default_description_limit() -> usize {
    DESCRIPTION_LIMIT
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_port: default_redirect_port(),
            auth_timeout_secs: default_auth_timeout(),
            api_base_url: default_api_base_url(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_secs: default_max_delay(),
            description_limit: default_description_limit(),
        }
    }
}

impl Config {
    /// Retry behaviour for API requests
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(self.max_attempts.max(1))
            .with_delays(
                Duration::from_millis(self.base_delay_ms),
                Duration::from_secs(self.max_delay_secs),
            )
    }

    /// OAuth application settings for the authorization flow
    pub fn oauth_settings(&self) -> OAuthSettings {
        OAuthSettings::new(&self.client_id, &self.client_secret)
            .with_redirect_port(self.redirect_port)
    }

    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            api_base: self.api_base_url.clone(),
            retry: self.retry_policy(),
            description_limit: self.description_limit,
        }
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }

    /// Returns true if application credentials are configured
    pub fn has_credentials(&self) -> bool {
        !self.client_id.is_empty() && !self.client_secret.is_empty()
    }

    /// Applies credential overrides from the environment
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(id) = std::env::var(CLIENT_ID_ENV) {
            if !id.is_empty() {
                self.client_id = id;
            }
        }
        if let Ok(secret) = std::env::var(CLIENT_SECRET_ENV) {
            if !secret.is_empty() {
                self.client_secret = secret;
            }
        }
        self
    }
}

/// Configuration manager
pub struct ConfigManager {
    config: RwLock<Config>,
    path: PathBuf,
}

impl ConfigManager {
    /// Loads the configuration from the user's config directory
    pub fn new() -> Result<Self> {
        let config_dir = Self::config_dir()?;
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Self::with_path(config_dir.join(CONFIG_FILE))
    }

    /// Loads the configuration from `path`, using defaults if it doesn't exist
    pub fn with_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let config = if path.exists() {
            let data = std::fs::read_to_string(&path).context("Failed to read config file")?;
            serde_json::from_str(&data).unwrap_or_else(|e| {
                tracing::warn!("Ignoring unreadable config file {}: {}", path.display(), e);
                Config::default()
            })
        } else {
            Config::default()
        };

        Ok(Self {
            config: RwLock::new(config),
            path,
        })
    }

    /// Gets a copy of the current configuration
    pub fn get(&self) -> Config {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Updates and saves the configuration
    pub fn save(&self, config: Config) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let json = serde_json::to_string_pretty(&config).context("Failed to serialize config")?;
        std::fs::write(&self.path, json).context("Failed to write config file")?;

        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;

        Ok(())
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Returns the config directory path
    pub fn config_dir() -> Result<PathBuf> {
        Ok(dirs::config_dir()
            .context("Could not determine config directory")?
            .join(APP_NAME))
    }
}
