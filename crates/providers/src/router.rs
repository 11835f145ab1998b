//! Provider routing: turns a litellm-style model name into a provider.
//!
//! Model names look like `openrouter/deepseek/deepseek-chat`: the first
//! segment picks the provider when it is a known one, and the remainder is
//! the model name sent on the wire. A name with no known prefix is sent to
//! OpenAI unchanged.

use std::sync::Arc;
use stepwise_config::AppConfig;
use stepwise_core::error::ProviderError;
use stepwise_core::provider::Provider;
use tracing::debug;

use crate::openai_compat::OpenAiCompatProvider;

/// A provider the router knows how to reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnownProvider {
    pub name: &'static str,
    pub base_url: &'static str,
    /// Environment variable holding the API key, if one is required.
    pub key_env: Option<&'static str>,
}

pub const KNOWN_PROVIDERS: &[KnownProvider] = &[
    KnownProvider {
        name: "openai",
        base_url: "https://api.openai.com/v1",
        key_env: Some("OPENAI_API_KEY"),
    },
    KnownProvider {
        name: "openrouter",
        base_url: "https://openrouter.ai/api/v1",
        key_env: Some("OPENROUTER_API_KEY"),
    },
    KnownProvider {
        name: "deepseek",
        base_url: "https://api.deepseek.com/v1",
        key_env: Some("DEEPSEEK_API_KEY"),
    },
    KnownProvider {
        name: "anthropic",
        base_url: "https://api.anthropic.com/v1",
        key_env: Some("ANTHROPIC_API_KEY"),
    },
    KnownProvider {
        name: "ollama",
        base_url: "http://localhost:11434/v1",
        key_env: None,
    },
];

fn known(name: &str) -> Option<&'static KnownProvider> {
    KNOWN_PROVIDERS.iter().find(|p| p.name == name)
}

/// A parsed model reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRef {
    pub provider: &'static KnownProvider,
    /// Model name as the provider expects it
    pub model: String,
}

impl ModelRef {
    pub fn parse(model: &str) -> Result<Self, ProviderError> {
        let model = model.trim();
        if model.is_empty() {
            return Err(ProviderError::ModelNotFound("empty model name".into()));
        }

        if let Some((prefix, rest)) = model.split_once('/')
            && let Some(provider) = known(prefix)
        {
            if rest.is_empty() {
                return Err(ProviderError::ModelNotFound(model.to_string()));
            }
            return Ok(Self {
                provider,
                model: rest.to_string(),
            });
        }

        // Unprefixed names go to OpenAI, as litellm does
        let provider = known("openai").ok_or_else(|| ProviderError::NotConfigured("openai".into()))?;
        Ok(Self {
            provider,
            model: model.to_string(),
        })
    }
}

/// Build a provider for `model` using the process environment for keys.
///
/// Returns the provider and the bare model name to put in requests.
pub fn build_provider(
    model: &str,
    config: &AppConfig,
) -> Result<(Arc<dyn Provider>, String), ProviderError> {
    build_provider_with(model, config, |key| std::env::var(key).ok())
}

/// Like [`build_provider`], with an explicit key lookup.
pub fn build_provider_with(
    model: &str,
    config: &AppConfig,
    env: impl Fn(&str) -> Option<String>,
) -> Result<(Arc<dyn Provider>, String), ProviderError> {
    let model_ref = ModelRef::parse(model)?;
    let name = model_ref.provider.name;

    let base_url = config
        .provider_api_url(name)
        .unwrap_or(model_ref.provider.base_url);

    let api_key = match config.provider_api_key(name) {
        Some(key) => key.to_string(),
        None => match model_ref.provider.key_env {
            Some(var) => env(var).filter(|k| !k.is_empty()).ok_or_else(|| {
                ProviderError::NotConfigured(format!(
                    "{name}: set {var} or providers.{name}.api_key in config.toml"
                ))
            })?,
            None => String::new(),
        },
    };

    debug!(provider = name, model = %model_ref.model, base_url, "Resolved provider");

    let provider = OpenAiCompatProvider::new(name, base_url, api_key)?;
    Ok((Arc::new(provider), model_ref.model))
}
