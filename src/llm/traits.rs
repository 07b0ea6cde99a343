//! Core traits for the provider abstraction layer.
//!
//! A [`ProviderAdapter`] owns everything vendor-specific: request formatting,
//! response parsing, stream normalization and error translation. Everything above
//! the adapter (router, multiplexer, facade) only sees the internal model from
//! [`crate::types`] and the [`GatewayError`] taxonomy.

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::analysis;
use crate::error::GatewayError;
use crate::types::{
    AnalysisRequest, AnalysisResponse, ChatCompletionRequest, ChatCompletionResponse, ModelId,
    StreamChunk,
};

/// Adapter-produced sequence of chunks
///
/// Items are normalized `StreamChunk`s with contiguous indexes from 0, ending with
/// exactly one `done` chunk, or an `Err` that terminates the sequence.
pub type ChunkStream = Box<dyn Stream<Item = Result<StreamChunk, GatewayError>> + Send + Unpin>;

/// Upstream AI vendors known to the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    /// OpenAI API
    #[serde(rename = "openai")]
    OpenAI,
    /// Anthropic Messages API
    Anthropic,
    /// Local Ollama server
    Ollama,
    /// Local LM Studio server (OpenAI-compatible)
    LmStudio,
}

impl ProviderType {
    pub const ALL: [ProviderType; 4] = [
        ProviderType::OpenAI,
        ProviderType::Anthropic,
        ProviderType::Ollama,
        ProviderType::LmStudio,
    ];

    /// Get string representation of provider type
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::OpenAI => "openai",
            ProviderType::Anthropic => "anthropic",
            ProviderType::Ollama => "ollama",
            ProviderType::LmStudio => "lm_studio",
        }
    }
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProviderType {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProviderType::ALL
            .iter()
            .copied()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| GatewayError::validation(format!("Unknown provider: {}", s)))
    }
}

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub provider: ProviderType,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
}

/// Per-vendor adapter with the capability set {chat, streaming chat, analysis}
///
/// Adapters are stateless between calls; any per-call state lives inside the
/// future or stream of that call.
#[async_trait]
pub trait ProviderAdapter: Send + Sync + std::fmt::Debug {
    /// Provider this adapter talks to
    fn provider_type(&self) -> ProviderType;

    /// Non-streaming chat completion
    async fn complete(
        &self,
        model: &ModelId,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, GatewayError>;

    /// Streaming chat completion
    ///
    /// Errors returned here happen before any chunk exists; errors inside the
    /// stream happen after the connection was established.
    async fn stream(
        &self,
        model: &ModelId,
        request: &ChatCompletionRequest,
    ) -> Result<ChunkStream, GatewayError>;

    /// Structured analysis
    ///
    /// The default asks the model for a JSON document through [`Self::complete`]
    /// and parses it into the typed result for the request's analysis type.
    async fn analyze(
        &self,
        model: &ModelId,
        request: &AnalysisRequest,
    ) -> Result<AnalysisResponse, GatewayError> {
        let chat_request = analysis::prompts::build_chat_request(model, request);
        let completion = self.complete(model, &chat_request).await?;
        let result = analysis::parse::parse_result(
            self.provider_type(),
            request.analysis_type,
            &completion.message.content,
        )?;
        Ok(AnalysisResponse {
            analysis_type: request.analysis_type,
            model: completion.model,
            provider: completion.provider,
            result,
            usage: completion.usage,
        })
    }

    /// Health check
    async fn health_check(&self) -> HealthStatus;
}
