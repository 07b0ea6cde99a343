//! Chat completion request and response types.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::messages::{ChatMessage, ChatRole};
use crate::llm::traits::ProviderType;

/// Identifier of a concrete model offered by a provider
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelId(String);

impl ModelId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ModelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModelId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ModelId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Sampling and length parameters, mapped to vendor fields by each adapter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatParameters {
    /// Temperature for model responses (0.0 to 2.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Maximum tokens in model response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Nucleus sampling (0.0 to 1.0]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Stop sequences
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    /// Ask the provider for a JSON document, where the vendor supports it
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub json_response: bool,
    /// Additional vendor-specific parameters, merged into the request body
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, serde_json::Value>,
}

/// A chat completion request as handed to the gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    /// Conversation so far, in order
    pub messages: Vec<ChatMessage>,
    /// Model to use
    pub model: ModelId,
    /// Explicit provider; resolved from `model` when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderType>,
    /// Whether the caller wants a token stream
    #[serde(default)]
    pub stream: bool,
    /// Sampling parameters
    #[serde(default)]
    pub parameters: ChatParameters,
}

impl ChatCompletionRequest {
    /// Create a new non-streaming request for `model`
    pub fn new<M: Into<ModelId>>(model: M, messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            model: model.into(),
            provider: None,
            stream: false,
            parameters: ChatParameters::default(),
        }
    }

    /// Pin the request to an explicit provider
    pub fn with_provider(mut self, provider: ProviderType) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Request a token stream
    pub fn streaming(mut self) -> Self {
        self.stream = true;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.parameters.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.parameters.max_tokens = Some(max_tokens);
        self
    }

    /// Concatenated system prompt, if any system messages are present
    pub fn system_prompt(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .messages
            .iter()
            .filter(|m| m.role == ChatRole::System)
            .map(|m| m.content.as_str())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n\n"))
        }
    }
}

/// Why a completion ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinishReason {
    Stop,
    Length,
    Error,
}

/// Token usage reported by the provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }

    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

/// Result of a non-streaming chat completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    /// The assistant message
    pub message: ChatMessage,
    /// Model that produced the message
    pub model: ModelId,
    /// Provider that served the request (differs from the routed one after a fallback)
    pub provider: ProviderType,
    pub finish_reason: FinishReason,
    pub usage: Usage,
}
