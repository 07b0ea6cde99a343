//! OpenAI provider implementation.
//!
//! Also home of the OpenAI-compatible wire codec (`/v1/chat/completions`,
//! SSE `data:` lines terminated by `[DONE]`), which the LM Studio adapter
//! reuses.

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};

use super::http;
use crate::error::GatewayError;
use crate::llm::traits::{ChunkStream, HealthStatus, ProviderAdapter, ProviderType};
use crate::types::{
    ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ChunkSequencer, FinishReason,
    ModelId, Usage,
};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// Body fields `extra` may not set
const OPENAI_RESERVED: &[&str] = &["model", "messages", "stream"];

/// OpenAI Chat Completions adapter
#[derive(Debug)]
pub struct OpenAIProvider {
    api_key: String,
    base_url: String,
    organization: Option<String>,
    client: reqwest::Client,
}

impl OpenAIProvider {
    /// Create a new OpenAI provider
    pub fn new(api_key: String, base_url: Option<String>) -> Result<Self, GatewayError> {
        if api_key.trim().is_empty() {
            return Err(GatewayError::configuration("OpenAI API key is empty"));
        }
        Ok(Self {
            api_key,
            base_url: trim_base_url(base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)),
            organization: None,
            client: http::build_client()?,
        })
    }

    pub fn with_organization(mut self, organization: Option<String>) -> Self {
        self.organization = organization;
        self
    }

    fn post(&self, body: &Value) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(body);
        if let Some(org) = &self.organization {
            request = request.header("OpenAI-Organization", org);
        }
        request
    }
}

#[async_trait]
impl ProviderAdapter for OpenAIProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::OpenAI
    }

    async fn complete(
        &self,
        model: &ModelId,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, GatewayError> {
        let body = build_request_body(model, request, false, true);
        tracing::debug!(model = %model, messages = request.messages.len(), "OpenAI chat request");
        let response = http::send(ProviderType::OpenAI, self.post(&body)).await?;
        let completion: Completion = http::read_json(ProviderType::OpenAI, response).await?;
        completion.into_response(ProviderType::OpenAI, model)
    }

    async fn stream(
        &self,
        model: &ModelId,
        request: &ChatCompletionRequest,
    ) -> Result<ChunkStream, GatewayError> {
        let mut body = build_request_body(model, request, true, true);
        body["stream_options"] = json!({ "include_usage": true });
        tracing::debug!(model = %model, "OpenAI streaming request");
        let response = http::send(ProviderType::OpenAI, self.post(&body)).await?;
        Ok(sse_chunks(ProviderType::OpenAI, response))
    }

    async fn health_check(&self) -> HealthStatus {
        let request = self
            .client
            .get(format!("{}/v1/models", self.base_url))
            .bearer_auth(&self.api_key);
        http::probe(ProviderType::OpenAI, request).await
    }
}

pub(crate) fn trim_base_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

/// Build an OpenAI-compatible request body
///
/// `json_mode` controls whether `json_response` maps to `response_format`;
/// not every compatible server accepts it.
pub(crate) fn build_request_body(
    model: &ModelId,
    request: &ChatCompletionRequest,
    stream: bool,
    json_mode: bool,
) -> Value {
    let messages: Vec<Value> = request
        .messages
        .iter()
        .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
        .collect();

    let mut body = json!({
        "model": model.as_str(),
        "messages": messages,
        "stream": stream,
    });

    let params = &request.parameters;
    if let Some(temperature) = params.temperature {
        body["temperature"] = json!(temperature);
    }
    if let Some(max_tokens) = params.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }
    if let Some(top_p) = params.top_p {
        body["top_p"] = json!(top_p);
    }
    if !params.stop.is_empty() {
        body["stop"] = json!(params.stop);
    }
    if params.json_response && json_mode {
        body["response_format"] = json!({ "type": "json_object" });
    }
    http::merge_extra(&mut body, &params.extra, OPENAI_RESERVED);
    body
}

pub(crate) fn finish_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        None | Some("stop") | Some("tool_calls") | Some("function_call") => FinishReason::Stop,
        Some("length") => FinishReason::Length,
        Some(_) => FinishReason::Error,
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl From<WireUsage> for Usage {
    fn from(usage: WireUsage) -> Self {
        Usage::new(usage.prompt_tokens, usage.completion_tokens)
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct Completion {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

impl Completion {
    pub(crate) fn into_response(
        self,
        provider: ProviderType,
        requested: &ModelId,
    ) -> Result<ChatCompletionResponse, GatewayError> {
        let choice = self
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::provider_fatal(provider, "Response contained no choices"))?;

        Ok(ChatCompletionResponse {
            message: ChatMessage::assistant(choice.message.content.unwrap_or_default()),
            model: self.model.map(ModelId::from).unwrap_or_else(|| requested.clone()),
            provider,
            finish_reason: finish_reason(choice.finish_reason.as_deref()),
            usage: self.usage.map(Usage::from).unwrap_or_default(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct StreamEventPayload {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Per-stream decoder state
#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    sequencer: ChunkSequencer,
    finish_reason: Option<FinishReason>,
    usage: Option<Usage>,
}

/// What one SSE line produced
#[derive(Debug)]
pub(crate) enum Decoded {
    Chunks(Vec<crate::types::StreamChunk>),
    Failed(GatewayError),
}

impl SseDecoder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.sequencer.is_finished()
    }

    /// Decode one line of the event stream
    pub(crate) fn decode_line(&mut self, provider: ProviderType, line: &str) -> Decoded {
        let data = match http::sse_data(line) {
            Some(data) => data,
            None => return Decoded::Chunks(Vec::new()),
        };

        if data == "[DONE]" {
            return Decoded::Chunks(self.finish().into_iter().collect());
        }

        let payload: StreamEventPayload = match http::parse_json(provider, data) {
            Ok(payload) => payload,
            Err(e) => return Decoded::Failed(e),
        };

        if let Some(error) = payload.error {
            return Decoded::Failed(GatewayError::provider_fatal(
                provider,
                format!("Stream error event: {}", error),
            ));
        }

        if let Some(usage) = payload.usage {
            self.usage = Some(usage.into());
        }

        let mut chunks = Vec::new();
        for choice in payload.choices {
            if let Some(text) = choice.delta.content.as_deref() {
                chunks.extend(self.sequencer.text(text));
            }
            if choice.finish_reason.is_some() {
                self.finish_reason = Some(finish_reason(choice.finish_reason.as_deref()));
            }
        }
        Decoded::Chunks(chunks)
    }

    /// Terminal chunk at `[DONE]`, or at end of body once a finish reason was seen
    pub(crate) fn finish(&mut self) -> Option<crate::types::StreamChunk> {
        let reason = self.finish_reason.unwrap_or(FinishReason::Stop);
        self.sequencer.finish(reason, self.usage)
    }

    pub(crate) fn saw_finish_reason(&self) -> bool {
        self.finish_reason.is_some()
    }
}

/// Normalize an OpenAI-compatible SSE body into chunks
pub(crate) fn sse_chunks(provider: ProviderType, response: reqwest::Response) -> ChunkStream {
    let mut lines = Box::pin(http::lines(provider, response));
    let stream = async_stream::stream! {
        let mut decoder = SseDecoder::new();
        while let Some(line) = lines.next().await {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            match decoder.decode_line(provider, &line) {
                Decoded::Chunks(chunks) => {
                    for chunk in chunks {
                        yield Ok(chunk);
                    }
                }
                Decoded::Failed(e) => {
                    yield Err(e);
                    return;
                }
            }
            if decoder.is_finished() {
                return;
            }
        }

        // Some compatible servers close the body without `[DONE]`
        if decoder.saw_finish_reason() {
            if let Some(chunk) = decoder.finish() {
                yield Ok(chunk);
            }
        } else {
            tracing::debug!(%provider, "Event stream ended without a finish reason");
        }
    };
    Box::new(stream.boxed())
}
