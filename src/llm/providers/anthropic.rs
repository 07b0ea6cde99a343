//! Anthropic Messages API provider implementation.
//!
//! System messages are hoisted into the top-level `system` field. Streams are
//! SSE with typed events; only `content_block_delta`, `message_delta`,
//! `message_stop` and `error` carry data the gateway needs.

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};

use super::http;
use super::openai::trim_base_url;
use crate::error::{GatewayError, TransientKind};
use crate::llm::traits::{ChunkStream, HealthStatus, ProviderAdapter, ProviderType};
use crate::types::{
    ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ChatRole, ChunkSequencer,
    FinishReason, ModelId, StreamChunk, Usage,
};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
/// `max_tokens` is mandatory on this API
const DEFAULT_MAX_TOKENS: u32 = 4096;
const ANTHROPIC_RESERVED: &[&str] = &["model", "messages", "stream", "system", "max_tokens"];

/// Anthropic Direct API provider
#[derive(Debug)]
pub struct AnthropicProvider {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider
    pub fn new(api_key: String, base_url: Option<String>) -> Result<Self, GatewayError> {
        if api_key.trim().is_empty() {
            return Err(GatewayError::configuration("Anthropic API key is empty"));
        }
        Ok(Self {
            api_key,
            base_url: trim_base_url(base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)),
            client: http::build_client()?,
        })
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
    }

    fn post(&self, body: &Value) -> reqwest::RequestBuilder {
        self.authorized(self.client.post(format!("{}/v1/messages", self.base_url)))
            .json(body)
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Anthropic
    }

    async fn complete(
        &self,
        model: &ModelId,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, GatewayError> {
        let body = build_request_body(model, request, false);
        tracing::debug!(model = %model, messages = request.messages.len(), "Anthropic chat request");
        let response = http::send(ProviderType::Anthropic, self.post(&body)).await?;
        let message: MessageResponse = http::read_json(ProviderType::Anthropic, response).await?;
        Ok(message.into_response(model))
    }

    async fn stream(
        &self,
        model: &ModelId,
        request: &ChatCompletionRequest,
    ) -> Result<ChunkStream, GatewayError> {
        let body = build_request_body(model, request, true);
        tracing::debug!(model = %model, "Anthropic streaming request");
        let response = http::send(
            ProviderType::Anthropic,
            self.post(&body).header("Accept", "text/event-stream"),
        )
        .await?;

        let mut lines = Box::pin(http::lines(ProviderType::Anthropic, response));
        let stream = async_stream::stream! {
            let mut decoder = EventDecoder::new();
            while let Some(line) = lines.next().await {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };
                match decoder.decode_line(&line) {
                    Ok(chunks) => {
                        for chunk in chunks {
                            yield Ok(chunk);
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
                if decoder.is_finished() {
                    return;
                }
            }
        };
        Ok(Box::new(stream.boxed()))
    }

    async fn health_check(&self) -> HealthStatus {
        let request = self.authorized(self.client.get(format!("{}/v1/models", self.base_url)));
        http::probe(ProviderType::Anthropic, request).await
    }
}

fn build_request_body(model: &ModelId, request: &ChatCompletionRequest, stream: bool) -> Value {
    let messages: Vec<Value> = request
        .messages
        .iter()
        .filter(|m| m.role != ChatRole::System)
        .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
        .collect();

    let params = &request.parameters;
    let mut body = json!({
        "model": model.as_str(),
        "max_tokens": params.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        "messages": messages,
    });
    if stream {
        body["stream"] = json!(true);
    }
    if let Some(system) = request.system_prompt() {
        body["system"] = json!(system);
    }
    if let Some(temperature) = params.temperature {
        // Anthropic caps temperature at 1.0
        body["temperature"] = json!(temperature.min(1.0));
    }
    if let Some(top_p) = params.top_p {
        body["top_p"] = json!(top_p);
    }
    if !params.stop.is_empty() {
        body["stop_sequences"] = json!(params.stop);
    }
    http::merge_extra(&mut body, &params.extra, ANTHROPIC_RESERVED);
    body
}

fn finish_reason(stop_reason: Option<&str>) -> FinishReason {
    match stop_reason {
        Some("max_tokens") => FinishReason::Length,
        None | Some("end_turn") | Some("stop_sequence") | Some("tool_use") => FinishReason::Stop,
        Some(_) => FinishReason::Error,
    }
}

#[derive(Debug, Default, Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: Option<u32>,
    #[serde(default)]
    output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    model: String,
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: WireUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

impl MessageResponse {
    fn into_response(self, requested: &ModelId) -> ChatCompletionResponse {
        let text: String = self
            .content
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text),
                ContentBlock::Other => None,
            })
            .collect();

        let model = if self.model.is_empty() {
            requested.clone()
        } else {
            ModelId::from(self.model)
        };

        ChatCompletionResponse {
            message: ChatMessage::assistant(text),
            model,
            provider: ProviderType::Anthropic,
            finish_reason: finish_reason(self.stop_reason.as_deref()),
            usage: Usage::new(
                self.usage.input_tokens.unwrap_or(0),
                self.usage.output_tokens.unwrap_or(0),
            ),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    MessageStart {
        message: StartedMessage,
    },
    ContentBlockDelta {
        delta: BlockDelta,
    },
    MessageDelta {
        delta: MessageDeltaBody,
        #[serde(default)]
        usage: WireUsage,
    },
    MessageStop,
    Error {
        error: ApiError,
    },
    #[serde(other)]
    Ignored,
}

#[derive(Debug, Deserialize)]
struct StartedMessage {
    #[serde(default)]
    usage: WireUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockDelta {
    TextDelta {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct MessageDeltaBody {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(rename = "type")]
    kind: String,
    message: String,
}

impl ApiError {
    fn into_gateway_error(self) -> GatewayError {
        let message = format!("{}: {}", self.kind, self.message);
        match self.kind.as_str() {
            "overloaded_error" => GatewayError::provider_transient(
                ProviderType::Anthropic,
                TransientKind::Unavailable { status: 529 },
                message,
            ),
            "rate_limit_error" => GatewayError::provider_transient(
                ProviderType::Anthropic,
                TransientKind::RateLimited { retry_after_ms: None },
                message,
            ),
            "api_error" => GatewayError::provider_transient(
                ProviderType::Anthropic,
                TransientKind::Unavailable { status: 500 },
                message,
            ),
            _ => GatewayError::provider_fatal(ProviderType::Anthropic, message),
        }
    }
}

/// Per-stream decoder state
#[derive(Debug, Default)]
struct EventDecoder {
    sequencer: ChunkSequencer,
    input_tokens: u32,
    output_tokens: u32,
    stop_reason: Option<String>,
}

impl EventDecoder {
    fn new() -> Self {
        Self::default()
    }

    fn is_finished(&self) -> bool {
        self.sequencer.is_finished()
    }

    /// Decode one SSE line; `event:` lines are redundant with the payload `type`
    fn decode_line(&mut self, line: &str) -> Result<Vec<StreamChunk>, GatewayError> {
        let data = match http::sse_data(line) {
            Some(data) => data,
            None => return Ok(Vec::new()),
        };
        let event: StreamEvent = http::parse_json(ProviderType::Anthropic, data)?;

        let mut chunks = Vec::new();
        match event {
            StreamEvent::MessageStart { message } => {
                self.input_tokens = message.usage.input_tokens.unwrap_or(0);
                self.output_tokens = message.usage.output_tokens.unwrap_or(0);
            }
            StreamEvent::ContentBlockDelta {
                delta: BlockDelta::TextDelta { text },
            } => chunks.extend(self.sequencer.text(&text)),
            StreamEvent::ContentBlockDelta { .. } => {}
            StreamEvent::MessageDelta { delta, usage } => {
                if delta.stop_reason.is_some() {
                    self.stop_reason = delta.stop_reason;
                }
                if let Some(input) = usage.input_tokens {
                    self.input_tokens = input;
                }
                if let Some(output) = usage.output_tokens {
                    self.output_tokens = output;
                }
            }
            StreamEvent::MessageStop => {
                let usage = Usage::new(self.input_tokens, self.output_tokens);
                chunks.extend(
                    self.sequencer
                        .finish(finish_reason(self.stop_reason.as_deref()), Some(usage)),
                );
            }
            StreamEvent::Error { error } => return Err(error.into_gateway_error()),
            StreamEvent::Ignored => {}
        }
        Ok(chunks)
    }
}
