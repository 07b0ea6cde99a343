//! LM Studio provider implementation.
//!
//! This provider connects to a local LM Studio instance via HTTP API
//! and handles OpenAI-compatible request/response formatting.

use async_trait::async_trait;

use super::http;
use super::openai::{build_request_body, sse_chunks, trim_base_url, Completion};
use crate::error::GatewayError;
use crate::llm::traits::{ChunkStream, HealthStatus, ProviderAdapter, ProviderType};
use crate::types::{ChatCompletionRequest, ChatCompletionResponse, ModelId};

pub const DEFAULT_BASE_URL: &str = "http://localhost:1234";

/// LM Studio provider
///
/// No authentication; the server speaks the OpenAI wire format. JSON mode is
/// left to the prompt since LM Studio only accepts schema-based
/// `response_format` values.
#[derive(Debug)]
pub struct LMStudioProvider {
    base_url: String,
    client: reqwest::Client,
}

impl LMStudioProvider {
    /// Create a new LM Studio provider
    pub fn new(base_url: Option<String>) -> Result<Self, GatewayError> {
        Ok(Self {
            base_url: trim_base_url(base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)),
            client: http::build_client()?,
        })
    }

    fn post(&self, body: &serde_json::Value) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .json(body)
    }
}

#[async_trait]
impl ProviderAdapter for LMStudioProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::LmStudio
    }

    async fn complete(
        &self,
        model: &ModelId,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, GatewayError> {
        tracing::debug!(model = %model, "LM Studio chat request");
        let body = build_request_body(model, request, false, false);
        let response = http::send(ProviderType::LmStudio, self.post(&body)).await?;
        let completion: Completion = http::read_json(ProviderType::LmStudio, response).await?;
        completion.into_response(ProviderType::LmStudio, model)
    }

    async fn stream(
        &self,
        model: &ModelId,
        request: &ChatCompletionRequest,
    ) -> Result<ChunkStream, GatewayError> {
        tracing::debug!(model = %model, "LM Studio streaming request");
        let body = build_request_body(model, request, true, false);
        let response = http::send(
            ProviderType::LmStudio,
            self.post(&body).header("Accept", "text/event-stream"),
        )
        .await?;
        Ok(sse_chunks(ProviderType::LmStudio, response))
    }

    async fn health_check(&self) -> HealthStatus {
        let request = self.client.get(format!("{}/v1/models", self.base_url));
        http::probe(ProviderType::LmStudio, request).await
    }
}
