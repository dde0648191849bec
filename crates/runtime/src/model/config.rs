//! Model client configuration.

use super::ModelError;
use serde::Deserialize;

/// Supported LLM providers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Gemini,
    Anthropic,
}

impl Provider {
    /// Environment variable consulted when no key is configured.
    pub fn api_key_env(self) -> &'static str {
        match self {
            Self::Gemini => "GOOGLE_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            Self::Gemini => "gemini-2.0-flash",
            Self::Anthropic => "claude-sonnet-4-20250514",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gemini => write!(f, "gemini"),
            Self::Anthropic => write!(f, "anthropic"),
        }
    }
}

/// Settings recognized by the language model client.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub provider: Provider,
    /// Model name; the provider default when unset.
    pub model: Option<String>,
    /// Response randomness in `[0, 1]`.
    pub temperature: f32,
    /// Print replies incrementally as they are generated.
    pub streaming: bool,
    pub max_tokens: u32,
    /// API key; falls back to the provider's environment variable.
    pub api_key: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: Provider::default(),
            model: None,
            temperature: 0.7,
            streaming: true,
            max_tokens: 4096,
            api_key: None,
        }
    }
}

impl ModelConfig {
    pub fn model_name(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.provider.default_model())
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(ModelError::Config(format!(
                "temperature must be within [0, 1], got {}",
                self.temperature
            )));
        }
        if self.max_tokens == 0 {
            return Err(ModelError::Config("max_tokens must be positive".into()));
        }
        Ok(())
    }

    /// Resolve the API key from config or environment.
    pub fn resolve_api_key(&self) -> Result<String, ModelError> {
        if let Some(key) = &self.api_key {
            return Ok(key.clone());
        }
        let var = self.provider.api_key_env();
        std::env::var(var).map_err(|_| ModelError::Config(format!("{var} not set")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_gemini_flash() {
        let config = ModelConfig::default();
        assert_eq!(config.provider, Provider::Gemini);
        assert_eq!(config.model_name(), "gemini-2.0-flash");
        assert!(config.streaming);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn temperature_out_of_range_is_rejected() {
        let config = ModelConfig {
            temperature: 1.5,
            ..ModelConfig::default()
        };
        assert!(matches!(config.validate(), Err(ModelError::Config(_))));
    }

    #[test]
    fn configured_key_wins_over_environment() {
        let config = ModelConfig {
            api_key: Some("key-from-file".into()),
            ..ModelConfig::default()
        };
        assert_eq!(config.resolve_api_key().unwrap(), "key-from-file");
    }

    #[test]
    fn explicit_model_overrides_provider_default() {
        let config = ModelConfig {
            provider: Provider::Anthropic,
            model: Some("claude-haiku".into()),
            ..ModelConfig::default()
        };
        assert_eq!(config.model_name(), "claude-haiku");
    }
}
