//! Configuration loading and validation for stepwise.
//!
//! Loads configuration from `~/.stepwise/config.toml` with environment
//! variable overrides. Validates numeric bounds at startup; the mode name
//! is checked later by the mode resolver so that an unknown mode surfaces
//! as a configuration failure of the task, not a parse error.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use stepwise_core::TaskConfig;

/// The root configuration structure.
///
/// Maps directly to `~/.stepwise/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Default model, litellm-style (`<provider>/<model>`)
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Vision model used by the `describe_image` tool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vision_model: Option<String>,

    /// Default operating mode
    #[serde(default = "default_mode")]
    pub mode: String,

    /// Task loop settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// Provider-specific settings, keyed by provider name
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

fn default_model() -> String {
    "openai/gpt-4o-mini".into()
}
fn default_mode() -> String {
    "basic".into()
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("default_model", &self.default_model)
            .field("vision_model", &self.vision_model)
            .field("mode", &self.mode)
            .field("engine", &self.engine)
            .field("providers", &self.providers)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Compact every N steps; defaults to `max_iterations`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compact_every: Option<usize>,

    /// Compact when working memory exceeds this token estimate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_working_memory_tokens: Option<usize>,

    #[serde(default = "default_true")]
    pub stream: bool,

    /// Overrides the mode's default temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default = "default_preserve_recent")]
    pub preserve_recent: usize,
}

fn default_max_iterations() -> usize {
    stepwise_core::task::DEFAULT_MAX_ITERATIONS
}
fn default_preserve_recent() -> usize {
    stepwise_core::task::DEFAULT_PRESERVE_RECENT
}
fn default_true() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            compact_every: None,
            max_working_memory_tokens: None,
            stream: true,
            temperature: None,
            preserve_recent: default_preserve_recent(),
        }
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL override (e.g. a local proxy)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.stepwise/config.toml).
    ///
    /// Environment overrides, applied after the file:
    /// - `STEPWISE_MODEL`
    /// - `STEPWISE_MODE`
    /// - `STEPWISE_MAX_ITERATIONS`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a key lookup (the process environment in
    /// [`AppConfig::load`]).
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(model) = lookup("STEPWISE_MODEL") {
            self.default_model = model;
        }
        if let Some(mode) = lookup("STEPWISE_MODE") {
            self.mode = mode;
        }
        if let Some(raw) = lookup("STEPWISE_MAX_ITERATIONS") {
            self.engine.max_iterations = raw.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "STEPWISE_MAX_ITERATIONS must be a positive integer, got '{raw}'"
                ))
            })?;
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".stepwise")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let engine = &self.engine;

        if engine.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "engine.max_iterations must be at least 1".into(),
            ));
        }

        if engine.compact_every == Some(0) {
            return Err(ConfigError::ValidationError(
                "engine.compact_every must be at least 1".into(),
            ));
        }

        if let Some(t) = engine.temperature
            && !(0.0..=2.0).contains(&t)
        {
            return Err(ConfigError::ValidationError(
                "engine.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if engine.preserve_recent < 2 {
            return Err(ConfigError::ValidationError(
                "engine.preserve_recent must be at least 2".into(),
            ));
        }

        Ok(())
    }

    /// API key for a provider from the config file, if set.
    pub fn provider_api_key(&self, provider: &str) -> Option<&str> {
        self.providers.get(provider)?.api_key.as_deref()
    }

    /// Base URL override for a provider, if set.
    pub fn provider_api_url(&self, provider: &str) -> Option<&str> {
        self.providers.get(provider)?.api_url.as_deref()
    }

    /// Build the immutable per-task configuration.
    pub fn task_config(&self) -> TaskConfig {
        TaskConfig {
            mode: self.mode.clone(),
            model: self.default_model.clone(),
            vision_model: self.vision_model.clone(),
            max_iterations: self.engine.max_iterations,
            compact_every: self.engine.compact_every,
            max_working_memory_tokens: self.engine.max_working_memory_tokens,
            stream: self.engine.stream,
            temperature: self.engine.temperature,
            preserve_recent: self.engine.preserve_recent,
        }
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            vision_model: None,
            mode: default_mode(),
            engine: EngineConfig::default(),
            providers: HashMap::new(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.mode, "basic");
        assert_eq!(config.engine.max_iterations, 30);
        assert!(config.engine.stream);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.default_model, config.default_model);
        assert_eq!(parsed.engine.max_iterations, config.engine.max_iterations);
    }

    #[test]
    fn invalid_bounds_rejected() {
        let mut config = AppConfig::default();
        config.engine.max_iterations = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.engine.compact_every = Some(0);
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.engine.temperature = Some(5.0);
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.engine.preserve_recent = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.default_model, "openai/gpt-4o-mini");
    }

    #[test]
    fn loads_file_with_partial_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
default_model = "openrouter/deepseek/deepseek-chat"
mode = "search"

[engine]
max_iterations = 8
compact_every = 3
max_working_memory_tokens = 2000

[providers.openrouter]
api_key = "sk-or-test"
"#
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.default_model, "openrouter/deepseek/deepseek-chat");
        assert_eq!(config.mode, "search");
        assert_eq!(config.engine.max_iterations, 8);
        assert_eq!(config.engine.preserve_recent, 3);
        assert_eq!(config.provider_api_key("openrouter"), Some("sk-or-test"));
        assert_eq!(config.provider_api_key("openai"), None);

        let task = config.task_config();
        assert_eq!(task.compact_every, Some(3));
        assert_eq!(task.max_working_memory_tokens, Some(2000));
        assert_eq!(task.mode, "search");
    }

    #[test]
    fn invalid_file_is_a_validation_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[engine]\nmax_iterations = 0").unwrap();
        let err = AppConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "engine = [[[").unwrap();
        let err = AppConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = AppConfig::default();
        config
            .apply_env_overrides(|key| match key {
                "STEPWISE_MODEL" => Some("deepseek/deepseek-chat".into()),
                "STEPWISE_MODE" => Some("code".into()),
                "STEPWISE_MAX_ITERATIONS" => Some("12".into()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.default_model, "deepseek/deepseek-chat");
        assert_eq!(config.mode, "code");
        assert_eq!(config.engine.max_iterations, 12);
    }

    #[test]
    fn non_numeric_max_iterations_override_rejected() {
        let mut config = AppConfig::default();
        let result = config.apply_env_overrides(|key| {
            (key == "STEPWISE_MAX_ITERATIONS").then(|| "lots".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn debug_redacts_api_keys() {
        let mut config = AppConfig::default();
        config.providers.insert(
            "openai".into(),
            ProviderConfig {
                api_key: Some("sk-secret".into()),
                api_url: None,
            },
        );
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
