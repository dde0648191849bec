//! LLM provider backends.

mod anthropic;
mod gemini;
mod sse;

pub use anthropic::{AnthropicBackend, AnthropicBackendBuilder};
pub use gemini::{GeminiBackend, GeminiBackendBuilder};

use crate::model::{
    Backend, ChunkStream, ModelConfig, ModelError, ModelRequest, ModelResponse, Provider,
};

/// A backend selected from configuration at startup.
pub enum ProviderBackend {
    Gemini(GeminiBackend),
    Anthropic(AnthropicBackend),
}

impl ProviderBackend {
    /// Build the configured provider, resolving its API key.
    pub fn from_config(config: &ModelConfig) -> Result<Self, ModelError> {
        config.validate()?;
        let api_key = config.resolve_api_key()?;
        let model = config.model_name();

        Ok(match config.provider {
            Provider::Gemini => Self::Gemini(
                GeminiBackend::builder(api_key, model)
                    .temperature(config.temperature)
                    .max_tokens(config.max_tokens)
                    .build()?,
            ),
            Provider::Anthropic => Self::Anthropic(
                AnthropicBackend::builder(api_key, model)
                    .temperature(config.temperature)
                    .max_tokens(config.max_tokens)
                    .build(),
            ),
        })
    }
}

impl std::fmt::Display for ProviderBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gemini(backend) => write!(f, "{backend}"),
            Self::Anthropic(backend) => write!(f, "{backend}"),
        }
    }
}

impl Backend for ProviderBackend {
    async fn infer(&self, request: ModelRequest<'_>) -> Result<ModelResponse, ModelError> {
        match self {
            Self::Gemini(backend) => backend.infer(request).await,
            Self::Anthropic(backend) => backend.infer(request).await,
        }
    }

    async fn stream(&self, request: ModelRequest<'_>) -> Result<ChunkStream, ModelError> {
        match self {
            Self::Gemini(backend) => backend.stream(request).await,
            Self::Anthropic(backend) => backend.stream(request).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_configured_provider() {
        let config = ModelConfig {
            provider: Provider::Anthropic,
            api_key: Some("k".into()),
            ..ModelConfig::default()
        };
        let backend = ProviderBackend::from_config(&config).unwrap();
        assert!(matches!(backend, ProviderBackend::Anthropic(_)));
        assert_eq!(backend.to_string(), "anthropic(claude-sonnet-4-20250514)");
    }

    #[test]
    fn invalid_config_is_rejected_before_key_lookup() {
        let config = ModelConfig {
            temperature: -0.1,
            api_key: Some("k".into()),
            ..ModelConfig::default()
        };
        assert!(matches!(
            ProviderBackend::from_config(&config),
            Err(ModelError::Config(_))
        ));
    }
}
