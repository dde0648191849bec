//! Configuration loading from chatbot.toml.

use runtime::tools::DEFAULT_MAX_RESULTS;
use runtime::{DEFAULT_MAX_TOOL_CALLS, ModelConfig, SearchConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Language model settings.
    pub model: ModelConfig,

    pub storage: StorageConfig,

    pub tools: ToolsConfig,

    /// Sent ahead of every conversation.
    pub system_prompt: Option<String>,
}

/// Where conversations are kept.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file; the platform data directory when unset.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub enabled: bool,
    /// Chained tool calls allowed per turn.
    pub max_tool_calls: usize,
    pub search_max_results: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_tool_calls: DEFAULT_MAX_TOOL_CALLS,
            search_max_results: DEFAULT_MAX_RESULTS,
        }
    }
}

impl ToolsConfig {
    pub fn search(&self) -> SearchConfig {
        SearchConfig {
            max_results: self.search_max_results,
            ..SearchConfig::default()
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, or defaults if it does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn parse(toml: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.model
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if self.tools.max_tool_calls == 0 {
            return Err(ConfigError::Invalid(
                "tools.max_tool_calls must be at least 1".into(),
            ));
        }
        if self.tools.search_max_results == 0 {
            return Err(ConfigError::Invalid(
                "tools.search_max_results must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}
