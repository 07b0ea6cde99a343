//! Model definitions organized by provider.
//!
//! Models are pure metadata: an id, the provider that hosts it, token limits and
//! the static capability set. The built-in catalog seeds the
//! [`CapabilityRegistry`](crate::llm::registry::CapabilityRegistry); deployments
//! extend it through the `models` section of the gateway config.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::llm::traits::ProviderType;
use crate::types::{AnalysisType, Capability, ModelId};

/// One `(provider, model)` offering and its static metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEntry {
    pub provider: ProviderType,
    pub model: ModelId,
    pub capabilities: Vec<Capability>,
    /// Maximum context window in tokens
    pub context_window: u32,
    /// Maximum output tokens this model can generate
    pub max_output_tokens: u32,
    /// Marks this provider as the default for `model` when several host it
    #[serde(default)]
    pub default: bool,
}

impl ModelEntry {
    pub fn new<M: Into<ModelId>>(
        provider: ProviderType,
        model: M,
        capabilities: Vec<Capability>,
        context_window: u32,
        max_output_tokens: u32,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            capabilities,
            context_window,
            max_output_tokens,
            default: false,
        }
    }

    pub fn as_default(mut self) -> Self {
        self.default = true;
        self
    }
}

/// OpenAI models
pub mod openai {
    pub const GPT_4O: &str = "gpt-4o";
    pub const GPT_4O_MINI: &str = "gpt-4o-mini";
    pub const GPT_35_TURBO: &str = "gpt-3.5-turbo";
}

/// Anthropic models
pub mod anthropic {
    pub const CLAUDE_35_SONNET: &str = "claude-3-5-sonnet-20241022";
    pub const CLAUDE_35_HAIKU: &str = "claude-3-5-haiku-20241022";
    pub const CLAUDE_3_HAIKU: &str = "claude-3-haiku-20240307";
}

/// Ollama models
pub mod ollama {
    pub const LLAMA_31_8B: &str = "llama3.1:8b";
    pub const MISTRAL_7B: &str = "mistral:7b";
}

/// LM Studio models
pub mod lm_studio {
    pub const GEMMA_3_12B: &str = "google/gemma-3-12b";
    pub const LLAMA_31_8B_INSTRUCT: &str = "meta-llama-3.1-8b-instruct";
}

fn chat_only() -> Vec<Capability> {
    vec![Capability::Chat, Capability::StreamingChat]
}

fn chat_with(analyses: &[AnalysisType]) -> Vec<Capability> {
    let mut caps = chat_only();
    caps.extend(analyses.iter().copied().map(Capability::Analysis));
    caps
}

/// Built-in catalog, initialized once
pub static BUILTIN_MODELS: Lazy<Vec<ModelEntry>> = Lazy::new(|| {
    use AnalysisType::*;

    vec![
        // OpenAI
        ModelEntry::new(ProviderType::OpenAI, openai::GPT_4O, Capability::full_set(), 128_000, 16_384),
        ModelEntry::new(ProviderType::OpenAI, openai::GPT_4O_MINI, Capability::full_set(), 128_000, 16_384),
        ModelEntry::new(
            ProviderType::OpenAI,
            openai::GPT_35_TURBO,
            chat_with(&[Summarization, Sentiment]),
            16_385,
            4_096,
        ),
        // Anthropic
        ModelEntry::new(
            ProviderType::Anthropic,
            anthropic::CLAUDE_35_SONNET,
            Capability::full_set(),
            200_000,
            8_192,
        ),
        ModelEntry::new(
            ProviderType::Anthropic,
            anthropic::CLAUDE_35_HAIKU,
            Capability::full_set(),
            200_000,
            8_192,
        ),
        ModelEntry::new(
            ProviderType::Anthropic,
            anthropic::CLAUDE_3_HAIKU,
            chat_with(&[Summarization, KeywordExtraction]),
            200_000,
            4_096,
        ),
        // Ollama
        ModelEntry::new(
            ProviderType::Ollama,
            ollama::LLAMA_31_8B,
            chat_with(&[Summarization, Sentiment, KeywordExtraction]),
            128_000,
            4_096,
        ),
        ModelEntry::new(
            ProviderType::Ollama,
            ollama::MISTRAL_7B,
            chat_with(&[Summarization]),
            32_768,
            4_096,
        ),
        // LM Studio
        ModelEntry::new(
            ProviderType::LmStudio,
            lm_studio::GEMMA_3_12B,
            chat_with(&[Summarization, Sentiment]),
            131_072,
            4_096,
        ),
        ModelEntry::new(
            ProviderType::LmStudio,
            lm_studio::LLAMA_31_8B_INSTRUCT,
            chat_with(&[Summarization, Sentiment, KeywordExtraction]),
            128_000,
            4_096,
        ),
    ]
});

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_builtin_catalog_has_unique_pairs() {
        let mut seen = HashSet::new();
        for entry in BUILTIN_MODELS.iter() {
            assert!(
                seen.insert((entry.provider, entry.model.clone())),
                "duplicate entry {} / {}",
                entry.provider,
                entry.model
            );
            assert!(entry.capabilities.contains(&Capability::Chat));
            assert!(entry.max_output_tokens <= entry.context_window);
        }
    }

    #[test]
    fn test_every_provider_has_a_model() {
        for provider in ProviderType::ALL {
            assert!(BUILTIN_MODELS.iter().any(|e| e.provider == provider));
        }
    }
}
