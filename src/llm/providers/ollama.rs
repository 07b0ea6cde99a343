//! Ollama provider implementation.
//!
//! This provider connects to a local Ollama instance for running
//! local open-source models. Streams are newline-delimited JSON objects,
//! the last one carrying `done: true` and the token counts.

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::http;
use super::openai::trim_base_url;
use crate::error::GatewayError;
use crate::llm::traits::{ChunkStream, HealthStatus, ProviderAdapter, ProviderType};
use crate::types::{
    ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ChunkSequencer, FinishReason,
    ModelId, StreamChunk, Usage,
};

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";
const OLLAMA_RESERVED: &[&str] = &["model", "messages", "stream"];

/// Ollama provider
#[derive(Debug)]
pub struct OllamaProvider {
    base_url: String,
    client: reqwest::Client,
}

impl OllamaProvider {
    /// Create a new Ollama provider
    pub fn new(base_url: Option<String>) -> Result<Self, GatewayError> {
        Ok(Self {
            base_url: trim_base_url(base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)),
            client: http::build_client()?,
        })
    }

    fn post(&self, body: &Value) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}/api/chat", self.base_url))
            .json(body)
    }
}

#[async_trait]
impl ProviderAdapter for OllamaProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Ollama
    }

    async fn complete(
        &self,
        model: &ModelId,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, GatewayError> {
        tracing::debug!(model = %model, "Ollama chat request");
        let body = build_request_body(model, request, false);
        let response = http::send(ProviderType::Ollama, self.post(&body)).await?;
        let reply: ChatReply = http::read_json(ProviderType::Ollama, response).await?;
        reply.into_response(model)
    }

    async fn stream(
        &self,
        model: &ModelId,
        request: &ChatCompletionRequest,
    ) -> Result<ChunkStream, GatewayError> {
        tracing::debug!(model = %model, "Ollama streaming request");
        let body = build_request_body(model, request, true);
        let response = http::send(ProviderType::Ollama, self.post(&body)).await?;

        let mut lines = Box::pin(http::lines(ProviderType::Ollama, response));
        let stream = async_stream::stream! {
            let mut sequencer = ChunkSequencer::new();
            while let Some(line) = lines.next().await {
                let decoded = line.and_then(|line| decode_line(&mut sequencer, &line));
                match decoded {
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
                if sequencer.is_finished() {
                    return;
                }
            }
        };
        Ok(Box::new(stream.boxed()))
    }

    async fn health_check(&self) -> HealthStatus {
        let request = self.client.get(format!("{}/api/tags", self.base_url));
        http::probe(ProviderType::Ollama, request).await
    }
}

fn build_request_body(model: &ModelId, request: &ChatCompletionRequest, stream: bool) -> Value {
    let messages: Vec<Value> = request
        .messages
        .iter()
        .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
        .collect();

    let params = &request.parameters;
    let mut options = Map::new();
    if let Some(temperature) = params.temperature {
        options.insert("temperature".to_string(), json!(temperature));
    }
    if let Some(max_tokens) = params.max_tokens {
        options.insert("num_predict".to_string(), json!(max_tokens));
    }
    if let Some(top_p) = params.top_p {
        options.insert("top_p".to_string(), json!(top_p));
    }
    if !params.stop.is_empty() {
        options.insert("stop".to_string(), json!(params.stop));
    }

    let mut body = json!({
        "model": model.as_str(),
        "messages": messages,
        "stream": stream,
    });
    if !options.is_empty() {
        body["options"] = Value::Object(options);
    }
    if params.json_response {
        body["format"] = json!("json");
    }
    http::merge_extra(&mut body, &params.extra, OLLAMA_RESERVED);
    body
}

fn finish_reason(done_reason: Option<&str>) -> FinishReason {
    match done_reason {
        None | Some("stop") => FinishReason::Stop,
        Some("length") => FinishReason::Length,
        Some(_) => FinishReason::Error,
    }
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    message: Option<ReplyMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: String,
}

impl ChatReply {
    fn usage(&self) -> Usage {
        Usage::new(
            self.prompt_eval_count.unwrap_or(0),
            self.eval_count.unwrap_or(0),
        )
    }

    fn into_response(self, requested: &ModelId) -> Result<ChatCompletionResponse, GatewayError> {
        if let Some(error) = self.error {
            return Err(GatewayError::provider_fatal(ProviderType::Ollama, error));
        }
        let usage = self.usage();
        Ok(ChatCompletionResponse {
            message: ChatMessage::assistant(self.message.map(|m| m.content).unwrap_or_default()),
            model: self.model.map(ModelId::from).unwrap_or_else(|| requested.clone()),
            provider: ProviderType::Ollama,
            finish_reason: finish_reason(self.done_reason.as_deref()),
            usage,
        })
    }
}

fn decode_line(sequencer: &mut ChunkSequencer, line: &str) -> Result<Vec<StreamChunk>, GatewayError> {
    let reply: ChatReply = http::parse_json(ProviderType::Ollama, line)?;
    if let Some(error) = reply.error {
        return Err(GatewayError::provider_fatal(ProviderType::Ollama, error));
    }

    let mut chunks = Vec::new();
    if let Some(message) = &reply.message {
        chunks.extend(sequencer.text(&message.content));
    }
    if reply.done {
        chunks.extend(sequencer.finish(finish_reason(reply.done_reason.as_deref()), Some(reply.usage())));
    }
    Ok(chunks)
}
