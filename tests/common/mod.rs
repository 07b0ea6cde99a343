//! Scripted in-memory adapters for driving the gateway without a network.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ai_gateway::error::GatewayError;
use ai_gateway::llm::{
    CapabilityRegistry, ChunkStream, HealthStatus, ModelEntry, ProviderAdapter, ProviderType,
};
use ai_gateway::types::{
    Capability, ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ChatParameters,
    ChunkSequencer,
    FinishReason, ModelId, Usage,
};
use async_trait::async_trait;

/// What a scripted adapter does on every call
#[derive(Debug, Clone)]
pub enum Script {
    /// Answer with this text; streams yield one chunk per word, then `done`
    Reply(String),
    /// Fail every call with a timeout before any chunk exists
    Transient,
    /// Fail every call with an auth-style error
    Fatal,
    /// Stream this many words, then fail with a transient error
    FailAfter(String, usize),
    /// Wait this long before every answer and between chunks
    Slow(String, Duration),
}

#[derive(Debug)]
pub struct ScriptedAdapter {
    provider: ProviderType,
    script: Script,
    calls: AtomicU32,
    last_parameters: Mutex<Option<ChatParameters>>,
    chunks_pulled: Arc<AtomicU32>,
    stream_dropped: Arc<AtomicBool>,
}

impl ScriptedAdapter {
    pub fn new(provider: ProviderType, script: Script) -> Arc<Self> {
        Arc::new(Self {
            provider,
            script,
            calls: AtomicU32::new(0),
            last_parameters: Mutex::new(None),
            chunks_pulled: Arc::new(AtomicU32::new(0)),
            stream_dropped: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn reply(provider: ProviderType, text: &str) -> Arc<Self> {
        Self::new(provider, Script::Reply(text.to_string()))
    }

    /// Adapter calls made so far (complete, stream and analyze)
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Parameters of the most recent `complete` call
    pub fn last_parameters(&self) -> Option<ChatParameters> {
        self.last_parameters.lock().unwrap().clone()
    }

    /// Chunks the adapter stream has produced so far
    pub fn chunks_pulled(&self) -> u32 {
        self.chunks_pulled.load(Ordering::SeqCst)
    }

    /// Whether the last opened stream has been dropped
    pub fn stream_dropped(&self) -> bool {
        self.stream_dropped.load(Ordering::SeqCst)
    }

    fn transient(&self) -> GatewayError {
        GatewayError::timeout(self.provider, Duration::from_millis(10))
    }

    fn fatal(&self) -> GatewayError {
        GatewayError::provider_fatal(self.provider, "HTTP 401: invalid api key")
    }
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    fn provider_type(&self) -> ProviderType {
        self.provider
    }

    async fn complete(
        &self,
        model: &ModelId,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_parameters.lock().unwrap() = Some(request.parameters.clone());
        let text = match &self.script {
            Script::Reply(text) | Script::FailAfter(text, _) => text.clone(),
            Script::Slow(text, delay) => {
                tokio::time::sleep(*delay).await;
                text.clone()
            }
            Script::Transient => return Err(self.transient()),
            Script::Fatal => return Err(self.fatal()),
        };
        Ok(ChatCompletionResponse {
            message: ChatMessage::assistant(text),
            model: model.clone(),
            provider: self.provider,
            finish_reason: FinishReason::Stop,
            usage: Usage::new(5, 3),
        })
    }

    async fn stream(
        &self,
        _model: &ModelId,
        _request: &ChatCompletionRequest,
    ) -> Result<ChunkStream, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (text, fail_after, delay) = match &self.script {
            Script::Reply(text) => (text.clone(), None, None),
            Script::FailAfter(text, n) => (text.clone(), Some(*n), None),
            Script::Slow(text, delay) => (text.clone(), None, Some(*delay)),
            Script::Transient => return Err(self.transient()),
            Script::Fatal => return Err(self.fatal()),
        };

        let provider = self.provider;
        let pulled = Arc::clone(&self.chunks_pulled);
        let flag = DropFlag(Arc::clone(&self.stream_dropped));
        self.stream_dropped.store(false, Ordering::SeqCst);

        let chunks = async_stream::stream! {
            let _flag = flag;
            let mut sequencer = ChunkSequencer::new();
            let words: Vec<String> = text.split_whitespace().map(|w| format!("{} ", w)).collect();
            for (i, word) in words.iter().enumerate() {
                if fail_after == Some(i) {
                    yield Err(GatewayError::provider_transient(
                        provider,
                        ai_gateway::error::TransientKind::Network,
                        "connection reset",
                    ));
                    return;
                }
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                pulled.fetch_add(1, Ordering::SeqCst);
                if let Some(chunk) = sequencer.text(word) {
                    yield Ok(chunk);
                }
            }
            if let Some(done) = sequencer.finish(FinishReason::Stop, Some(Usage::new(5, words.len() as u32))) {
                yield Ok(done);
            }
        };
        Ok(Box::new(Box::pin(chunks)))
    }

    async fn health_check(&self) -> HealthStatus {
        HealthStatus {
            healthy: !matches!(self.script, Script::Transient | Script::Fatal),
            provider: self.provider,
            latency_ms: Some(1),
            error: None,
        }
    }
}

/// `llama` on Ollama (default) and LM Studio, plus `chat-only` on OpenAI
pub fn test_registry() -> Arc<CapabilityRegistry> {
    Arc::new(
        CapabilityRegistry::from_entries(vec![
            ModelEntry::new(
                ProviderType::Ollama,
                "llama",
                vec![
                    Capability::Chat,
                    Capability::StreamingChat,
                    Capability::Analysis(ai_gateway::types::AnalysisType::Sentiment),
                    Capability::Analysis(ai_gateway::types::AnalysisType::Summarization),
                ],
                8_192,
                2_048,
            )
            .as_default(),
            ModelEntry::new(ProviderType::LmStudio, "llama", Capability::full_set(), 8_192, 2_048),
            ModelEntry::new(ProviderType::OpenAI, "chat-only", vec![Capability::Chat], 8_192, 1_024),
        ])
        .expect("valid test registry"),
    )
}

pub fn user(text: &str) -> Vec<ChatMessage> {
    vec![ChatMessage::user(text)]
}

/// Gateway over the test registry with the given adapters and fallback rules
pub fn gateway_with(
    adapters: &[Arc<ScriptedAdapter>],
    fallbacks: Vec<ai_gateway::llm::FallbackRule>,
) -> ai_gateway::AiGateway {
    let mut builder = ai_gateway::AiGateway::builder()
        .registry(test_registry())
        .request_timeout(Duration::from_secs(2));
    for adapter in adapters {
        builder = builder.adapter(Arc::clone(adapter) as Arc<dyn ProviderAdapter>);
    }
    for rule in fallbacks {
        builder = builder.fallback(rule);
    }
    builder.build().expect("valid test gateway")
}

/// Ollama `llama` falls back to LM Studio `llama`
pub fn llama_fallback() -> ai_gateway::llm::FallbackRule {
    ai_gateway::llm::FallbackRule::new(ProviderType::Ollama, "llama", ProviderType::LmStudio)
}
