//! Completion router: resolves a request to one provider adapter and applies
//! the single-fallback policy.
//!
//! Resolution is pure and synchronous so every validation and capability error
//! surfaces before a network call. Dispatch wraps each adapter call in the
//! configured deadline.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::{stream, StreamExt};
use tokio::time::timeout;

use crate::error::GatewayError;
use crate::llm::fallback::{run_with_fallback, FallbackTable};
use crate::llm::registry::CapabilityRegistry;
use crate::llm::traits::{ChunkStream, ProviderAdapter, ProviderType};
use crate::types::{
    AnalysisRequest, AnalysisResponse, Capability, ChatCompletionRequest, ChatCompletionResponse,
    ModelId,
};

/// A resolved `(provider, model)` pair and the adapter that serves it
#[derive(Clone)]
pub struct ResolvedTarget {
    pub provider: ProviderType,
    pub model: ModelId,
    pub max_output_tokens: u32,
    pub adapter: Arc<dyn ProviderAdapter>,
}

impl ResolvedTarget {
    /// Reject a `max_tokens` above this model's output limit
    pub fn check_output_limit(&self, max_tokens: Option<u32>) -> Result<(), GatewayError> {
        match max_tokens {
            Some(max_tokens) if max_tokens > self.max_output_tokens => {
                Err(GatewayError::validation(format!(
                    "max_tokens {} exceeds the {} output limit of {} on {}",
                    max_tokens, self.max_output_tokens, self.model, self.provider
                )))
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for ResolvedTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedTarget")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("max_output_tokens", &self.max_output_tokens)
            .finish()
    }
}

/// A provider stream whose first item has already been observed
pub struct OpenedStream {
    /// Provider that is serving the stream
    pub provider: ProviderType,
    pub model: ModelId,
    pub chunks: ChunkStream,
}

impl fmt::Debug for OpenedStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenedStream")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .finish()
    }
}

/// Routes requests to adapters
#[derive(Debug)]
pub struct CompletionRouter {
    registry: Arc<CapabilityRegistry>,
    adapters: HashMap<ProviderType, Arc<dyn ProviderAdapter>>,
    fallbacks: FallbackTable,
    default_overrides: HashMap<ModelId, ProviderType>,
    request_timeout: Duration,
}

impl CompletionRouter {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        adapters: HashMap<ProviderType, Arc<dyn ProviderAdapter>>,
        fallbacks: FallbackTable,
        default_overrides: HashMap<ModelId, ProviderType>,
        request_timeout: Duration,
    ) -> Result<Self, GatewayError> {
        // Overrides and fallback targets must name registered pairs
        for (model, provider) in &default_overrides {
            registry.entry(*provider, model).map_err(|_| {
                GatewayError::configuration(format!(
                    "Default provider override {} is not registered for model '{}'",
                    provider, model
                ))
            })?;
        }
        for ((provider, model), (fallback_provider, fallback_model)) in fallbacks.iter() {
            for (p, m) in [(provider, model), (fallback_provider, fallback_model)] {
                registry.entry(*p, m).map_err(|_| {
                    GatewayError::configuration(format!(
                        "Fallback rule names unregistered model '{}' on {}",
                        m, p
                    ))
                })?;
            }
        }

        Ok(Self {
            registry,
            adapters,
            fallbacks,
            default_overrides,
            request_timeout,
        })
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn adapters(&self) -> impl Iterator<Item = &Arc<dyn ProviderAdapter>> {
        self.adapters.values()
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Resolve the provider for `model` without any capability check
    pub fn resolve(
        &self,
        provider: Option<ProviderType>,
        model: &ModelId,
    ) -> Result<ResolvedTarget, GatewayError> {
        let provider = match provider {
            Some(provider) => provider,
            None => {
                if !self.registry.is_known_model(model) {
                    return Err(GatewayError::UnknownModel {
                        provider: None,
                        model: model.to_string(),
                    });
                }
                self.default_overrides
                    .get(model)
                    .copied()
                    .or_else(|| self.registry.default_provider(model))
                    .ok_or_else(|| GatewayError::UnresolvableProvider {
                        model: model.to_string(),
                        reason: format!(
                            "registered by {} providers and none is the default",
                            self.registry.providers_for(model).len()
                        ),
                    })?
            }
        };

        let entry = self.registry.entry(provider, model)?;
        let adapter = self
            .adapters
            .get(&provider)
            .cloned()
            .ok_or_else(|| GatewayError::UnresolvableProvider {
                model: model.to_string(),
                reason: format!("no adapter installed for provider {}", provider),
            })?;

        Ok(ResolvedTarget {
            provider,
            model: model.clone(),
            max_output_tokens: entry.max_output_tokens,
            adapter,
        })
    }

    /// Resolve a chat request and check its mode capability and token limit
    pub fn route(&self, request: &ChatCompletionRequest) -> Result<ResolvedTarget, GatewayError> {
        let target = self.resolve(request.provider, &request.model)?;
        self.check_chat_target(&target, request)?;

        tracing::debug!(
            provider = %target.provider,
            model = %target.model,
            stream = request.stream,
            explicit = request.provider.is_some(),
            "Routed chat request"
        );
        Ok(target)
    }

    fn check_chat_target(
        &self,
        target: &ResolvedTarget,
        request: &ChatCompletionRequest,
    ) -> Result<(), GatewayError> {
        let capability = Capability::for_chat(request.stream);
        if !self.registry.supports(target.provider, &target.model, capability)? {
            return Err(GatewayError::CapabilityMismatch {
                provider: target.provider,
                model: target.model.to_string(),
                capability,
            });
        }
        target.check_output_limit(request.parameters.max_tokens)
    }

    /// Configured fallback for `primary`, if it passes its own capability check
    pub fn fallback_for(
        &self,
        primary: &ResolvedTarget,
        capability: Capability,
    ) -> Option<ResolvedTarget> {
        let (provider, model) = self.fallbacks.target_for(primary.provider, &primary.model)?;
        let target = match self.resolve(Some(*provider), model) {
            Ok(target) => target,
            Err(e) => {
                tracing::warn!(error = %e, "Fallback target cannot be resolved");
                return None;
            }
        };
        match self.registry.supports(target.provider, &target.model, capability) {
            Ok(true) => Some(target),
            _ => {
                tracing::warn!(
                    provider = %target.provider,
                    model = %target.model,
                    %capability,
                    "Fallback target lacks the required capability"
                );
                None
            }
        }
    }

    fn chat_fallback(
        &self,
        primary: &ResolvedTarget,
        request: &ChatCompletionRequest,
    ) -> Option<ResolvedTarget> {
        self.fallback_for(primary, Capability::for_chat(request.stream))
            .filter(|target| self.check_chat_target(target, request).is_ok())
    }

    /// Non-streaming completion with at most one fallback
    pub async fn complete_with_fallback(
        &self,
        primary: ResolvedTarget,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, GatewayError> {
        let fallback = self.chat_fallback(&primary, request);
        run_with_fallback(
            self.call_complete(&primary, request),
            fallback.map(|target| move || async move { self.call_complete(&target, request).await }),
        )
        .await
    }

    /// Open a stream with at most one fallback
    ///
    /// Fallback is only possible here, while no chunk has been delivered: the
    /// returned stream's first item has been observed and was not an error.
    pub async fn open_stream_with_fallback(
        &self,
        primary: ResolvedTarget,
        request: &ChatCompletionRequest,
    ) -> Result<OpenedStream, GatewayError> {
        let fallback = self.chat_fallback(&primary, request);
        run_with_fallback(
            self.call_open_stream(&primary, request),
            fallback.map(|target| move || async move { self.call_open_stream(&target, request).await }),
        )
        .await
    }

    /// Structured analysis with at most one fallback
    pub async fn analyze_with_fallback(
        &self,
        primary: ResolvedTarget,
        request: &AnalysisRequest,
    ) -> Result<AnalysisResponse, GatewayError> {
        let fallback = self
            .fallback_for(&primary, Capability::Analysis(request.analysis_type))
            .filter(|target| target.check_output_limit(request.parameters.max_tokens).is_ok());
        run_with_fallback(
            self.call_analyze(&primary, request),
            fallback.map(|target| move || async move { self.call_analyze(&target, request).await }),
        )
        .await
    }

    async fn call_complete(
        &self,
        target: &ResolvedTarget,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, GatewayError> {
        tracing::debug!(provider = %target.provider, model = %target.model, "Dispatching completion");
        timeout(self.request_timeout, target.adapter.complete(&target.model, request))
            .await
            .map_err(|_| GatewayError::timeout(target.provider, self.request_timeout))?
    }

    async fn call_analyze(
        &self,
        target: &ResolvedTarget,
        request: &AnalysisRequest,
    ) -> Result<AnalysisResponse, GatewayError> {
        tracing::debug!(
            provider = %target.provider,
            model = %target.model,
            analysis_type = %request.analysis_type,
            "Dispatching analysis"
        );
        timeout(self.request_timeout, target.adapter.analyze(&target.model, request))
            .await
            .map_err(|_| GatewayError::timeout(target.provider, self.request_timeout))?
    }

    async fn call_open_stream(
        &self,
        target: &ResolvedTarget,
        request: &ChatCompletionRequest,
    ) -> Result<OpenedStream, GatewayError> {
        tracing::debug!(provider = %target.provider, model = %target.model, "Opening stream");
        let deadline = self.request_timeout;
        let opened = async {
            let mut chunks = target.adapter.stream(&target.model, request).await?;
            let first = chunks.next().await;
            Ok::<_, GatewayError>((first, chunks))
        };
        let (first, rest) = timeout(deadline, opened)
            .await
            .map_err(|_| GatewayError::timeout(target.provider, deadline))??;

        let chunks: ChunkStream = match first {
            Some(Err(e)) => return Err(e),
            Some(Ok(chunk)) => Box::new(stream::iter(Some(Ok(chunk))).chain(rest)),
            None => rest,
        };

        Ok(OpenedStream {
            provider: target.provider,
            model: target.model.clone(),
            chunks,
        })
    }
}
