//! Configuration management for llmgate.
//!
//! Configuration is loaded from `~/.config/llmgate/config.toml` and merged
//! with environment variables and command-line flags into one [`Settings`]
//! value. Precedence: flag, then environment, then file, then defaults.

use crate::gateway::WebSearchConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";
pub const DEFAULT_MAX_STEPS: u32 = 10;
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

pub const ENV_API_KEY: &str = "OPENROUTER_API_KEY";
pub const ENV_BASE_URL: &str = "OPENROUTER_BASE_URL";
pub const ENV_MODEL: &str = "OPENROUTER_MODEL";
pub const ENV_REFERER: &str = "OPENROUTER_REFERER";
pub const ENV_TITLE: &str = "OPENROUTER_TITLE";

/// On-disk configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Gateway connection settings.
    #[serde(default)]
    pub gateway: GatewayConfig,
    /// Defaults for commands.
    #[serde(default)]
    pub defaults: Defaults,
    /// Web augmentation.
    #[serde(default)]
    pub web: WebConfig,
}

/// Gateway connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// API key (prefer the OPENROUTER_API_KEY env var).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Base URL of the gateway API.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Sent as the `HTTP-Referer` header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referer: Option<String>,
    /// Sent as the `X-Title` header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Per-request timeout for non-streaming calls.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            referer: None,
            title: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Command defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Defaults {
    #[serde(default = "default_model")]
    pub model: String,
    /// Step budget for `yolo`.
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    /// Shell used by `yolo` (falls back to $SHELL, then /bin/sh).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_steps: default_max_steps(),
            shell: None,
        }
    }
}

/// Web augmentation defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebConfig {
    /// Attach the web plugin to every chat request.
    #[serde(default)]
    pub enabled: bool,
    #[serde(flatten)]
    pub search: WebSearchConfig,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_max_steps() -> u32 {
    DEFAULT_MAX_STEPS
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Config {
    /// Get the config directory path.
    pub fn config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|p| p.join("llmgate"))
            .context("Could not determine config directory")
    }

    /// Get the config file path.
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, using defaults if not found.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }
}

/// Values supplied on the command line. `None` means "not given".
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub referer: Option<String>,
    pub title: Option<String>,
    pub model: Option<String>,
    pub max_steps: Option<u32>,
    pub shell: Option<String>,
}

/// Fully resolved settings threaded through the gateway client and the agent.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub referer: Option<String>,
    pub title: Option<String>,
    pub timeout: Duration,
    pub model: String,
    pub max_steps: u32,
    pub shell: Option<String>,
    /// Web search defaults; `Some` when enabled in the config file.
    pub web: Option<WebSearchConfig>,
}

impl Settings {
    /// Merge flags, environment and file.
    ///
    /// `env` is the environment lookup so resolution stays testable.
    pub fn resolve<F>(config: &Config, overrides: &Overrides, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |key: &str| env(key).filter(|v| !v.is_empty());

        let base_url = overrides
            .base_url
            .clone()
            .or_else(|| env(ENV_BASE_URL))
            .unwrap_or_else(|| config.gateway.base_url.clone());

        Self {
            api_key: overrides
                .api_key
                .clone()
                .or_else(|| env(ENV_API_KEY))
                .or_else(|| config.gateway.api_key.clone()),
            base_url: base_url.trim_end_matches('/').to_string(),
            referer: overrides
                .referer
                .clone()
                .or_else(|| env(ENV_REFERER))
                .or_else(|| config.gateway.referer.clone()),
            title: overrides
                .title
                .clone()
                .or_else(|| env(ENV_TITLE))
                .or_else(|| config.gateway.title.clone()),
            timeout: Duration::from_secs(config.gateway.timeout_secs),
            model: overrides
                .model
                .clone()
                .or_else(|| env(ENV_MODEL))
                .unwrap_or_else(|| config.defaults.model.clone()),
            max_steps: overrides.max_steps.unwrap_or(config.defaults.max_steps),
            shell: overrides
                .shell
                .clone()
                .or_else(|| config.defaults.shell.clone()),
            web: config
                .web
                .enabled
                .then(|| config.web.search.clone()),
        }
    }

    /// Resolve against the real process environment.
    pub fn from_env(config: &Config, overrides: &Overrides) -> Self {
        Self::resolve(config, overrides, |key| std::env::var(key).ok())
    }
}
