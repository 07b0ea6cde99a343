//! Gateway configuration management
//!
//! Configuration comes from a file (TOML, YAML or JSON), from environment
//! variables, or from a file with environment overrides on top. Every section
//! has working defaults. A provider adapter is installed only for the provider
//! sections that are present.

use serde::{Deserialize, Serialize};
use std::{collections::HashMap, env, fs, path::Path, time::Duration};
use thiserror::Error;

use crate::llm::fallback::FallbackRule;
use crate::llm::models::ModelEntry;
use crate::llm::traits::ProviderType;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Environment variable parsing error: {0}")]
    EnvVarParse(String),
    #[error("File parsing error: {0}")]
    FileParse(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Main configuration structure for the gateway
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GatewayConfig {
    /// Upstream provider credentials and endpoints
    #[serde(default)]
    pub providers: ProvidersConfig,
    /// Deadlines, fallbacks and default providers
    #[serde(default)]
    pub routing: RoutingConfig,
    /// Stream multiplexer settings
    #[serde(default)]
    pub streaming: StreamingConfig,
    /// Parameter defaults applied when a request leaves them unset
    #[serde(default)]
    pub defaults: DefaultsConfig,
    /// Extra model catalog entries, on top of the built-in catalog
    #[serde(default)]
    pub models: Vec<ModelEntry>,
}

/// One optional section per provider; an adapter is installed for each present section
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub openai: Option<OpenAIConfig>,
    #[serde(default)]
    pub anthropic: Option<AnthropicConfig>,
    #[serde(default)]
    pub ollama: Option<LocalProviderConfig>,
    #[serde(default)]
    pub lm_studio: Option<LocalProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIConfig {
    pub api_key: String,
    pub base_url: Option<String>,
    pub organization: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub base_url: Option<String>,
}

/// Local servers only need an address
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LocalProviderConfig {
    pub base_url: Option<String>,
}

/// Routing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Deadline for one provider call in seconds
    #[serde(with = "duration_seconds", default = "default_request_timeout")]
    pub request_timeout: Duration,
    /// Single fallback per `(provider, model)` pair
    #[serde(default)]
    pub fallbacks: Vec<FallbackRule>,
    /// Default provider per model id, overriding the catalog
    #[serde(default)]
    pub default_providers: HashMap<String, ProviderType>,
}

/// Stream multiplexer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Chunks buffered between producer and consumer
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Longest wait for the next chunk in seconds
    #[serde(with = "duration_seconds", default = "default_idle_timeout")]
    pub idle_timeout: Duration,
}

/// Parameter defaults
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DefaultsConfig {
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            request_timeout: default_request_timeout(),
            fallbacks: Vec::new(),
            default_providers: HashMap::new(),
        }
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            idle_timeout: default_idle_timeout(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a file (supports TOML, YAML, JSON)
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let extension = path.extension().and_then(|s| s.to_str());

        match extension {
            Some("toml") => {
                toml::from_str(&content).map_err(|e| ConfigError::FileParse(e.to_string()))
            }
            Some("yaml") | Some("yml") => {
                serde_yaml::from_str(&content).map_err(|e| ConfigError::FileParse(e.to_string()))
            }
            Some("json") => {
                serde_json::from_str(&content).map_err(|e| ConfigError::FileParse(e.to_string()))
            }
            _ => Err(ConfigError::FileParse(
                "Unsupported file format. Use .toml, .yaml, .yml, or .json".to_string(),
            )),
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().merge_with_env()
    }

    /// Merge configuration with environment variable overrides
    pub fn merge_with_env(mut self) -> Result<Self, ConfigError> {
        // Providers
        if let Ok(api_key) = env::var("OPENAI_API_KEY") {
            let existing = self.providers.openai.take();
            self.providers.openai = Some(OpenAIConfig {
                api_key,
                base_url: existing.as_ref().and_then(|c| c.base_url.clone()),
                organization: existing.and_then(|c| c.organization),
            });
        }
        if let Some(openai) = self.providers.openai.as_mut() {
            if let Ok(base_url) = env::var("OPENAI_BASE_URL") {
                openai.base_url = Some(base_url);
            }
            if let Ok(org) = env::var("OPENAI_ORG_ID") {
                openai.organization = Some(org);
            }
        }

        if let Ok(api_key) = env::var("ANTHROPIC_API_KEY") {
            let base_url = self.providers.anthropic.take().and_then(|c| c.base_url);
            self.providers.anthropic = Some(AnthropicConfig { api_key, base_url });
        }
        if let Some(anthropic) = self.providers.anthropic.as_mut() {
            if let Ok(base_url) = env::var("ANTHROPIC_BASE_URL") {
                anthropic.base_url = Some(base_url);
            }
        }

        if let Ok(base_url) = env::var("OLLAMA_BASE_URL") {
            self.providers.ollama = Some(LocalProviderConfig {
                base_url: Some(base_url),
            });
        }
        if let Ok(base_url) = env::var("LM_STUDIO_BASE_URL") {
            self.providers.lm_studio = Some(LocalProviderConfig {
                base_url: Some(base_url),
            });
        }

        // Routing and streaming
        if let Some(secs) = parse_env::<u64>("GATEWAY_REQUEST_TIMEOUT")? {
            self.routing.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_env::<u64>("GATEWAY_STREAM_IDLE_TIMEOUT")? {
            self.streaming.idle_timeout = Duration::from_secs(secs);
        }
        if let Some(capacity) = parse_env::<usize>("GATEWAY_STREAM_CAPACITY")? {
            self.streaming.channel_capacity = capacity;
        }

        // Defaults
        if let Some(temperature) = parse_env::<f32>("GATEWAY_TEMPERATURE")? {
            self.defaults.temperature = Some(temperature);
        }
        if let Some(max_tokens) = parse_env::<u32>("GATEWAY_MAX_TOKENS")? {
            self.defaults.max_tokens = Some(max_tokens);
        }

        Ok(self)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.routing.request_timeout.is_zero() {
            return Err(ConfigError::Validation(
                "Request timeout must be greater than 0".to_string(),
            ));
        }
        if self.streaming.idle_timeout.is_zero() {
            return Err(ConfigError::Validation(
                "Stream idle timeout must be greater than 0".to_string(),
            ));
        }
        if self.streaming.channel_capacity == 0 {
            return Err(ConfigError::Validation(
                "Stream channel capacity must be greater than 0".to_string(),
            ));
        }

        if let Some(temperature) = self.defaults.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(ConfigError::Validation(
                    "Temperature must be between 0.0 and 2.0".to_string(),
                ));
            }
        }
        if self.defaults.max_tokens == Some(0) {
            return Err(ConfigError::Validation(
                "Max tokens must be greater than 0".to_string(),
            ));
        }

        for rule in &self.routing.fallbacks {
            if rule.target() == (rule.provider, rule.model.clone()) {
                return Err(ConfigError::Validation(format!(
                    "Fallback for {} / {} points at itself",
                    rule.provider, rule.model
                )));
            }
        }

        if let Some(openai) = &self.providers.openai {
            if openai.api_key.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "OpenAI API key cannot be empty".to_string(),
                ));
            }
        }
        if let Some(anthropic) = &self.providers.anthropic {
            if anthropic.api_key.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "Anthropic API key cannot be empty".to_string(),
                ));
            }
        }

        Ok(())
    }
}

fn parse_env<T>(name: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| ConfigError::EnvVarParse(format!("{}: {}", name, e))),
        Err(_) => Ok(None),
    }
}

/// Custom serialization for Duration as seconds
mod duration_seconds {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_idle_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_channel_capacity() -> usize {
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert_eq!(config.routing.request_timeout, Duration::from_secs(60));
        assert_eq!(config.streaming.channel_capacity, 1);
        assert!(config.providers.openai.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = GatewayConfig::default();
        config.streaming.channel_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = GatewayConfig::default();
        config.defaults.temperature = Some(2.5);
        assert!(config.validate().is_err());

        let mut config = GatewayConfig::default();
        config.providers.anthropic = Some(AnthropicConfig {
            api_key: " ".to_string(),
            base_url: None,
        });
        assert!(config.validate().is_err());

        let mut config = GatewayConfig::default();
        config
            .routing
            .fallbacks
            .push(FallbackRule::new(ProviderType::Ollama, "m", ProviderType::Ollama));
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_toml_config_loading() {
        let toml_content = r#"
[providers.openai]
api_key = "sk-test"

[providers.ollama]
base_url = "http://gpu-box:11434"

[routing]
request_timeout = 20

[[routing.fallbacks]]
provider = "openai"
model = "gpt-4o-mini"
fallback_provider = "anthropic"
fallback_model = "claude-3-5-haiku-20241022"

[routing.default_providers]
"llama3.1:8b" = "ollama"

[streaming]
channel_capacity = 4

[defaults]
temperature = 0.2

[[models]]
provider = "ollama"
model = "qwen2.5:7b"
capabilities = ["chat", "streaming_chat", { analysis = "summarization" }]
context_window = 32768
max_output_tokens = 4096
"#;

        let temp_file = NamedTempFile::with_suffix(".toml").unwrap();
        std::fs::write(temp_file.path(), toml_content).unwrap();

        let config = GatewayConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.providers.openai.unwrap().api_key, "sk-test");
        assert!(config.providers.anthropic.is_none());
        assert_eq!(
            config.providers.ollama.unwrap().base_url.as_deref(),
            Some("http://gpu-box:11434")
        );
        assert_eq!(config.routing.request_timeout, Duration::from_secs(20));
        assert_eq!(config.routing.fallbacks[0].fallback_provider, ProviderType::Anthropic);
        assert_eq!(
            config.routing.default_providers.get("llama3.1:8b"),
            Some(&ProviderType::Ollama)
        );
        assert_eq!(config.streaming.channel_capacity, 4);
        assert_eq!(config.streaming.idle_timeout, Duration::from_secs(30));
        assert_eq!(config.defaults.temperature, Some(0.2));
        assert_eq!(config.models.len(), 1);
        assert_eq!(config.models[0].capabilities.len(), 3);
    }

    #[test]
    fn test_yaml_config_loading() {
        let yaml_content = r#"
providers:
  lm_studio:
    base_url: "http://localhost:1234"
streaming:
  idle_timeout: 5
"#;
        let temp_file = NamedTempFile::with_suffix(".yaml").unwrap();
        std::fs::write(temp_file.path(), yaml_content).unwrap();

        let config = GatewayConfig::from_file(temp_file.path()).unwrap();
        assert!(config.providers.lm_studio.is_some());
        assert_eq!(config.streaming.idle_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_unsupported_extension() {
        let temp_file = NamedTempFile::with_suffix(".ini").unwrap();
        std::fs::write(temp_file.path(), "x = 1").unwrap();
        assert!(matches!(
            GatewayConfig::from_file(temp_file.path()),
            Err(ConfigError::FileParse(_))
        ));
    }

    // All environment assertions live in one test; the variables are process-wide
    #[test]
    fn test_env_var_loading() {
        env::set_var("ANTHROPIC_API_KEY", "sk-ant-test");
        env::set_var("GATEWAY_STREAM_CAPACITY", "8");
        env::set_var("GATEWAY_TEMPERATURE", "0.3");

        let config = GatewayConfig::from_env().unwrap();
        assert_eq!(config.providers.anthropic.unwrap().api_key, "sk-ant-test");
        assert_eq!(config.streaming.channel_capacity, 8);
        assert_eq!(config.defaults.temperature, Some(0.3));

        env::set_var("GATEWAY_REQUEST_TIMEOUT", "soon");
        assert!(matches!(
            GatewayConfig::from_env(),
            Err(ConfigError::EnvVarParse(_))
        ));

        // Clean up
        env::remove_var("ANTHROPIC_API_KEY");
        env::remove_var("GATEWAY_STREAM_CAPACITY");
        env::remove_var("GATEWAY_TEMPERATURE");
        env::remove_var("GATEWAY_REQUEST_TIMEOUT");
    }
}
