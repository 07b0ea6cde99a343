//! Provider implementations.
//!
//! Each provider implements the [`ProviderAdapter`](crate::llm::traits::ProviderAdapter)
//! trait and owns all vendor-specific request and response handling.
//!
//! - `openai` - OpenAI Chat Completions (plus the OpenAI-compatible codec)
//! - `lm_studio` - Local LM Studio server, OpenAI-compatible
//! - `anthropic` - Anthropic Messages API
//! - `ollama` - Local Ollama server, NDJSON streaming

pub mod anthropic;
pub mod http;
pub mod lm_studio;
pub mod ollama;
pub mod openai;

pub use anthropic::AnthropicProvider;
pub use lm_studio::LMStudioProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAIProvider;
