//! Gateway facade: the single entry point for chat, streaming chat and analysis.
//!
//! Every operation validates and routes synchronously, so request errors are
//! returned before any provider is contacted. Accepted requests run in their own
//! task under a `gateway_request` span carrying the request id, and are tracked
//! in the in-flight table until they finish, which is what makes
//! [`AiGateway::cancel`] work.

mod in_flight;

pub use in_flight::InFlight;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tracing::Instrument;

use crate::analysis::{prompts, AnalysisPipeline};
use crate::config::{DefaultsConfig, GatewayConfig, RoutingConfig, StreamingConfig};
use crate::error::GatewayError;
use crate::llm::fallback::{FallbackRule, FallbackTable};
use crate::llm::providers::{AnthropicProvider, LMStudioProvider, OllamaProvider, OpenAIProvider};
use crate::llm::registry::CapabilityRegistry;
use crate::llm::router::CompletionRouter;
use crate::llm::traits::{HealthStatus, ProviderAdapter, ProviderType};
use crate::streaming::{ChatStream, StreamMultiplexer, StreamSource};
use crate::types::{
    AnalysisRequest, AnalysisResponse, ChatCompletionRequest, ChatCompletionResponse,
    ChatParameters, ChatRole, ModelId, RequestId,
};
use in_flight::InFlightTable;

#[derive(Debug)]
struct GatewayInner {
    router: Arc<CompletionRouter>,
    pipeline: AnalysisPipeline,
    multiplexer: StreamMultiplexer,
    defaults: DefaultsConfig,
    in_flight: Arc<InFlightTable>,
}

/// Multi-provider AI gateway
///
/// Cheap to clone; clones share the registry, adapters and in-flight table.
///
/// # Examples
///
/// ```no_run
/// use ai_gateway::{AiGateway, GatewayConfig};
/// use ai_gateway::types::{ChatCompletionRequest, ChatMessage};
///
/// # async fn example() -> ai_gateway::Result<()> {
/// let gateway = AiGateway::from_config(GatewayConfig::from_env()?)?;
/// let request = ChatCompletionRequest::new("gpt-4o-mini", vec![ChatMessage::user("Hello")]);
/// let response = gateway.send_chat_completion(request).await?;
/// println!("{}", response.message.content);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct AiGateway {
    inner: Arc<GatewayInner>,
}

impl AiGateway {
    pub fn builder() -> AiGatewayBuilder {
        AiGatewayBuilder::new()
    }

    /// Build a gateway with one adapter per configured provider section
    pub fn from_config(config: GatewayConfig) -> Result<Self, GatewayError> {
        config.validate()?;

        let registry = CapabilityRegistry::builtin_with(&config.models)?;
        let mut builder = Self::builder()
            .registry(Arc::new(registry))
            .request_timeout(config.routing.request_timeout)
            .streaming(config.streaming)
            .defaults(config.defaults);

        let providers = config.providers;
        if let Some(openai) = providers.openai {
            builder = builder.adapter(Arc::new(
                OpenAIProvider::new(openai.api_key, openai.base_url)?
                    .with_organization(openai.organization),
            ));
        }
        if let Some(anthropic) = providers.anthropic {
            builder = builder.adapter(Arc::new(AnthropicProvider::new(
                anthropic.api_key,
                anthropic.base_url,
            )?));
        }
        if let Some(ollama) = providers.ollama {
            builder = builder.adapter(Arc::new(OllamaProvider::new(ollama.base_url)?));
        }
        if let Some(lm_studio) = providers.lm_studio {
            builder = builder.adapter(Arc::new(LMStudioProvider::new(lm_studio.base_url)?));
        }

        for rule in config.routing.fallbacks {
            builder = builder.fallback(rule);
        }
        for (model, provider) in config.routing.default_providers {
            builder = builder.default_provider(model, provider);
        }

        builder.build()
    }

    /// Non-streaming chat completion
    pub async fn send_chat_completion(
        &self,
        request: ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, GatewayError> {
        self.start_chat_completion(request)?.await
    }

    /// Start a non-streaming chat completion in its own task
    pub fn start_chat_completion(
        &self,
        mut request: ChatCompletionRequest,
    ) -> Result<InFlight<ChatCompletionResponse>, GatewayError> {
        request.stream = false;
        self.prepare_chat(&mut request)?;
        let target = self.inner.router.route(&request).map_err(rejected)?;

        let request_id = RequestId::new();
        let span = request_span(request_id, "chat", target.provider, &target.model);
        let router = Arc::clone(&self.inner.router);

        Ok(self.spawn_request(request_id, span, async move {
            tracing::info!(messages = request.messages.len(), "Chat completion started");
            let started = Instant::now();
            let result = router.complete_with_fallback(target, &request).await;
            match &result {
                Ok(response) => tracing::info!(
                    served_by = %response.provider,
                    finish_reason = ?response.finish_reason,
                    prompt_tokens = response.usage.prompt_tokens,
                    completion_tokens = response.usage.completion_tokens,
                    latency_ms = started.elapsed().as_millis() as u64,
                    "Chat completion finished"
                ),
                Err(e) => tracing::error!(error = %e, code = e.code(), "Chat completion failed"),
            }
            result
        }))
    }

    /// Streaming chat completion
    ///
    /// Errors returned here are request errors; provider failures arrive as the
    /// stream's terminal item. The provider is not contacted until the stream is
    /// first polled.
    pub fn stream_chat_completion(
        &self,
        mut request: ChatCompletionRequest,
    ) -> Result<ChatStream, GatewayError> {
        request.stream = true;
        self.prepare_chat(&mut request)?;
        let target = self.inner.router.route(&request).map_err(rejected)?;

        let request_id = RequestId::new();
        let span = request_span(request_id, "stream", target.provider, &target.model);
        let (cancel, registration) = self.inner.in_flight.register(request_id);
        let router = Arc::clone(&self.inner.router);

        let source: StreamSource = Box::pin(async move {
            tracing::info!(messages = request.messages.len(), "Chat stream started");
            router.open_stream_with_fallback(target, &request).await
        });

        let _entered = span.enter();
        Ok(self
            .inner
            .multiplexer
            .spawn(request_id, source, cancel, registration))
    }

    /// Structured analysis
    pub async fn run_analysis(
        &self,
        request: AnalysisRequest,
    ) -> Result<AnalysisResponse, GatewayError> {
        self.start_analysis(request)?.await
    }

    /// Start a structured analysis in its own task
    pub fn start_analysis(
        &self,
        mut request: AnalysisRequest,
    ) -> Result<InFlight<AnalysisResponse>, GatewayError> {
        // Analysis keeps its own temperature; config defaults only fill the rest
        request
            .parameters
            .temperature
            .get_or_insert(prompts::ANALYSIS_TEMPERATURE);
        apply_defaults(&self.inner.defaults, &mut request.parameters);
        validate_parameters(&request.parameters).map_err(rejected)?;
        let target = self.inner.pipeline.prepare(&request).map_err(rejected)?;

        let request_id = RequestId::new();
        let span = request_span(request_id, "analysis", target.provider, &target.model);
        let pipeline = self.inner.pipeline.clone();

        Ok(self.spawn_request(request_id, span, async move {
            tracing::info!(analysis_type = %request.analysis_type, "Analysis started");
            let started = Instant::now();
            let result = pipeline.execute(target, &request).await;
            match &result {
                Ok(response) => tracing::info!(
                    served_by = %response.provider,
                    latency_ms = started.elapsed().as_millis() as u64,
                    "Analysis finished"
                ),
                Err(e) => tracing::error!(error = %e, code = e.code(), "Analysis failed"),
            }
            result
        }))
    }

    /// Cancel an in-flight request; false when no such request is running
    pub fn cancel(&self, request_id: RequestId) -> bool {
        let found = self.inner.in_flight.cancel(&request_id);
        tracing::info!(%request_id, found, "Cancel requested");
        found
    }

    /// Number of requests currently running
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.len()
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        self.inner.router.registry()
    }

    /// Probe every installed adapter concurrently
    pub async fn health_check(&self) -> Vec<HealthStatus> {
        let mut statuses = join_all(
            self.inner
                .router
                .adapters()
                .map(|adapter| adapter.health_check()),
        )
        .await;
        statuses.sort_by_key(|status| status.provider);
        statuses
    }

    fn prepare_chat(&self, request: &mut ChatCompletionRequest) -> Result<(), GatewayError> {
        apply_defaults(&self.inner.defaults, &mut request.parameters);
        validate_chat_request(request).map_err(rejected)
    }

    fn spawn_request<T, F>(&self, request_id: RequestId, span: tracing::Span, work: F) -> InFlight<T>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, GatewayError>> + Send + 'static,
    {
        let (cancel, registration) = self.inner.in_flight.register(request_id);
        let token = cancel.clone();

        let handle = tokio::spawn(
            async move {
                let _registration = registration;
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        tracing::info!("Request cancelled");
                        Err(GatewayError::Cancelled { request_id })
                    }
                    result = work => result,
                }
            }
            .instrument(span),
        );

        InFlight::new(request_id, handle, cancel)
    }
}

fn request_span(
    request_id: RequestId,
    operation: &'static str,
    provider: ProviderType,
    model: &ModelId,
) -> tracing::Span {
    tracing::info_span!(
        "gateway_request",
        %request_id,
        operation,
        %provider,
        %model
    )
}

fn rejected(error: GatewayError) -> GatewayError {
    tracing::warn!(error = %error, code = error.code(), "Request rejected");
    error
}

fn apply_defaults(defaults: &DefaultsConfig, parameters: &mut ChatParameters) {
    if parameters.temperature.is_none() {
        parameters.temperature = defaults.temperature;
    }
    if parameters.max_tokens.is_none() {
        parameters.max_tokens = defaults.max_tokens;
    }
}

fn validate_chat_request(request: &ChatCompletionRequest) -> Result<(), GatewayError> {
    if request.model.as_str().trim().is_empty() {
        return Err(GatewayError::validation("Model id cannot be empty"));
    }
    if request.messages.is_empty() {
        return Err(GatewayError::validation("Request has no messages"));
    }
    if !request.messages.iter().any(|m| m.role == ChatRole::User) {
        return Err(GatewayError::validation(
            "Request needs at least one user message",
        ));
    }
    validate_parameters(&request.parameters)
}

fn validate_parameters(parameters: &ChatParameters) -> Result<(), GatewayError> {
    if let Some(temperature) = parameters.temperature {
        if !(0.0..=2.0).contains(&temperature) {
            return Err(GatewayError::validation(format!(
                "Temperature {} outside 0.0-2.0",
                temperature
            )));
        }
    }
    if let Some(top_p) = parameters.top_p {
        if !(top_p > 0.0 && top_p <= 1.0) {
            return Err(GatewayError::validation(format!(
                "top_p {} outside (0.0, 1.0]",
                top_p
            )));
        }
    }
    if parameters.max_tokens == Some(0) {
        return Err(GatewayError::validation("max_tokens must be greater than 0"));
    }
    Ok(())
}

/// Builder for [`AiGateway`]
pub struct AiGatewayBuilder {
    registry: Option<Arc<CapabilityRegistry>>,
    adapters: HashMap<ProviderType, Arc<dyn ProviderAdapter>>,
    fallbacks: Vec<FallbackRule>,
    default_providers: HashMap<ModelId, ProviderType>,
    streaming: StreamingConfig,
    request_timeout: Duration,
    defaults: DefaultsConfig,
}

impl AiGatewayBuilder {
    pub fn new() -> Self {
        Self {
            registry: None,
            adapters: HashMap::new(),
            fallbacks: Vec::new(),
            default_providers: HashMap::new(),
            streaming: StreamingConfig::default(),
            request_timeout: RoutingConfig::default().request_timeout,
            defaults: DefaultsConfig::default(),
        }
    }

    /// Use this registry instead of the built-in catalog
    pub fn registry(mut self, registry: Arc<CapabilityRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Install an adapter; a later adapter for the same provider replaces the earlier one
    pub fn adapter(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.adapters.insert(adapter.provider_type(), adapter);
        self
    }

    pub fn fallback(mut self, rule: FallbackRule) -> Self {
        self.fallbacks.push(rule);
        self
    }

    /// Serve `model` from `provider` when the request names no provider
    pub fn default_provider<M: Into<ModelId>>(mut self, model: M, provider: ProviderType) -> Self {
        self.default_providers.insert(model.into(), provider);
        self
    }

    pub fn streaming(mut self, streaming: StreamingConfig) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn defaults(mut self, defaults: DefaultsConfig) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn build(self) -> Result<AiGateway, GatewayError> {
        if self.adapters.is_empty() {
            return Err(GatewayError::configuration(
                "No provider adapters configured",
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(GatewayError::configuration(
                "Request timeout must be greater than 0",
            ));
        }
        if self.streaming.channel_capacity == 0 || self.streaming.idle_timeout.is_zero() {
            return Err(GatewayError::configuration(
                "Stream channel capacity and idle timeout must be greater than 0",
            ));
        }

        let registry = self.registry.unwrap_or_else(CapabilityRegistry::builtin);
        let fallbacks = FallbackTable::from_rules(&self.fallbacks)?;
        let mut providers: Vec<_> = self.adapters.keys().copied().collect();
        providers.sort();

        let router = Arc::new(CompletionRouter::new(
            registry,
            self.adapters,
            fallbacks,
            self.default_providers,
            self.request_timeout,
        )?);

        tracing::info!(
            providers = ?providers,
            models = router.registry().len(),
            fallbacks = self.fallbacks.len(),
            "AI gateway ready"
        );

        Ok(AiGateway {
            inner: Arc::new(GatewayInner {
                pipeline: AnalysisPipeline::new(Arc::clone(&router)),
                router,
                multiplexer: StreamMultiplexer::new(self.streaming),
                defaults: self.defaults,
                in_flight: Arc::new(InFlightTable::default()),
            }),
        })
    }
}

impl Default for AiGatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LocalProviderConfig, OpenAIConfig};
    use crate::types::{ChatMessage, Capability};
    use crate::llm::models::ModelEntry;

    fn chat(model: &str) -> ChatCompletionRequest {
        ChatCompletionRequest::new(model, vec![ChatMessage::user("hi")])
    }

    #[test]
    fn test_validate_chat_request() {
        assert!(validate_chat_request(&chat("llama3.1:8b")).is_ok());
        assert!(validate_chat_request(&ChatCompletionRequest::new("m", vec![])).is_err());
        assert!(validate_chat_request(&ChatCompletionRequest::new(
            "m",
            vec![ChatMessage::system("only a system prompt")]
        ))
        .is_err());
        assert!(validate_chat_request(&chat("  ")).is_err());
        assert!(validate_chat_request(&chat("m").with_temperature(2.5)).is_err());
        assert!(validate_chat_request(&chat("m").with_max_tokens(0)).is_err());

        let mut top_p = chat("m");
        top_p.parameters.top_p = Some(0.0);
        assert!(validate_chat_request(&top_p).unwrap_err().is_validation_error());
    }

    #[test]
    fn test_defaults_fill_only_missing_parameters() {
        let defaults = DefaultsConfig {
            temperature: Some(0.7),
            max_tokens: Some(512),
        };
        let mut parameters = ChatParameters {
            temperature: Some(0.1),
            ..Default::default()
        };
        apply_defaults(&defaults, &mut parameters);
        assert_eq!(parameters.temperature, Some(0.1));
        assert_eq!(parameters.max_tokens, Some(512));
    }

    #[test]
    fn test_builder_requires_an_adapter() {
        let err = AiGateway::builder().build().unwrap_err();
        assert!(matches!(err, GatewayError::Configuration { .. }));
    }

    #[test]
    fn test_from_config_installs_configured_providers() {
        let mut config = GatewayConfig::default();
        config.providers.openai = Some(OpenAIConfig {
            api_key: "sk-test".to_string(),
            base_url: None,
            organization: None,
        });
        config.providers.ollama = Some(LocalProviderConfig::default());
        config.models.push(ModelEntry::new(
            ProviderType::Ollama,
            "custom-model",
            vec![Capability::Chat],
            4_096,
            1_024,
        ));

        let gateway = AiGateway::from_config(config).unwrap();
        assert_eq!(gateway.inner.router.adapters().count(), 2);
        assert!(gateway.registry().is_known_model(&ModelId::new("custom-model")));
        assert_eq!(gateway.in_flight(), 0);
    }

    #[test]
    fn test_from_config_rejects_invalid_config() {
        let mut config = GatewayConfig::default();
        config.routing.request_timeout = Duration::ZERO;
        config.providers.ollama = Some(LocalProviderConfig::default());
        assert!(matches!(
            AiGateway::from_config(config),
            Err(GatewayError::Configuration { .. })
        ));
    }
}
