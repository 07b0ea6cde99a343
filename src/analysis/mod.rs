//! Structured analysis pipeline.
//!
//! Validation and capability checks run synchronously in [`AnalysisPipeline::prepare`]
//! so an unsupported analysis type never reaches an adapter. Execution goes
//! through the router's single-fallback policy.

pub mod parse;
pub mod prompts;

use std::sync::Arc;

use crate::error::GatewayError;
use crate::llm::router::{CompletionRouter, ResolvedTarget};
use crate::types::{AnalysisRequest, AnalysisResponse, Capability};

/// Runs analysis requests against the resolved model
#[derive(Debug, Clone)]
pub struct AnalysisPipeline {
    router: Arc<CompletionRouter>,
}

impl AnalysisPipeline {
    pub fn new(router: Arc<CompletionRouter>) -> Self {
        Self { router }
    }

    /// Validate the request and resolve the model that will serve it
    pub fn prepare(&self, request: &AnalysisRequest) -> Result<ResolvedTarget, GatewayError> {
        match &request.subject {
            serde_json::Value::Null => {
                return Err(GatewayError::validation("Analysis subject is empty"))
            }
            serde_json::Value::String(text) if text.trim().is_empty() => {
                return Err(GatewayError::validation("Analysis subject is empty"))
            }
            _ => {}
        }

        let target = self.router.resolve(request.provider, &request.model)?;
        let capability = Capability::Analysis(request.analysis_type);
        if !self
            .router
            .registry()
            .supports(target.provider, &target.model, capability)?
        {
            return Err(GatewayError::UnsupportedAnalysisType {
                provider: target.provider,
                model: target.model.to_string(),
                analysis_type: request.analysis_type,
            });
        }
        target.check_output_limit(request.parameters.max_tokens)?;

        tracing::debug!(
            provider = %target.provider,
            model = %target.model,
            analysis_type = %request.analysis_type,
            "Prepared analysis"
        );
        Ok(target)
    }

    /// Dispatch a prepared request
    pub async fn execute(
        &self,
        target: ResolvedTarget,
        request: &AnalysisRequest,
    ) -> Result<AnalysisResponse, GatewayError> {
        let response = self.router.analyze_with_fallback(target, request).await?;
        if response.result.analysis_type() != request.analysis_type {
            return Err(GatewayError::provider_fatal(
                response.provider,
                format!(
                    "Expected a {} result, adapter returned {}",
                    request.analysis_type,
                    response.result.analysis_type()
                ),
            ));
        }
        Ok(response)
    }

    pub async fn run(&self, request: &AnalysisRequest) -> Result<AnalysisResponse, GatewayError> {
        let target = self.prepare(request)?;
        self.execute(target, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::fallback::FallbackTable;
    use crate::llm::models::ModelEntry;
    use crate::llm::registry::CapabilityRegistry;
    use crate::llm::traits::{ChunkStream, HealthStatus, ProviderAdapter, ProviderType};
    use crate::types::{
        AnalysisResult, AnalysisType, ChatCompletionRequest, ChatCompletionResponse, ChatMessage,
        FinishReason, ModelId, Usage,
    };
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Answers every completion with a fixed body
    #[derive(Debug)]
    struct Canned {
        body: &'static str,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ProviderAdapter for Canned {
        fn provider_type(&self) -> ProviderType {
            ProviderType::Ollama
        }

        async fn complete(
            &self,
            model: &ModelId,
            request: &ChatCompletionRequest,
        ) -> Result<ChatCompletionResponse, GatewayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert!(request.parameters.json_response);
            Ok(ChatCompletionResponse {
                message: ChatMessage::assistant(self.body),
                model: model.clone(),
                provider: ProviderType::Ollama,
                finish_reason: FinishReason::Stop,
                usage: Usage::new(40, 12),
            })
        }

        async fn stream(
            &self,
            _model: &ModelId,
            _request: &ChatCompletionRequest,
        ) -> Result<ChunkStream, GatewayError> {
            Err(GatewayError::internal("not used"))
        }

        async fn health_check(&self) -> HealthStatus {
            HealthStatus {
                healthy: true,
                provider: ProviderType::Ollama,
                latency_ms: None,
                error: None,
            }
        }
    }

    fn pipeline(body: &'static str) -> (AnalysisPipeline, Arc<Canned>) {
        let adapter = Arc::new(Canned {
            body,
            calls: AtomicU32::new(0),
        });
        let registry = CapabilityRegistry::from_entries(vec![ModelEntry::new(
            ProviderType::Ollama,
            "llama",
            vec![
                Capability::Chat,
                Capability::Analysis(AnalysisType::Sentiment),
            ],
            8_192,
            2_048,
        )])
        .unwrap();
        let mut adapters: HashMap<ProviderType, Arc<dyn ProviderAdapter>> = HashMap::new();
        adapters.insert(ProviderType::Ollama, adapter.clone());
        let router = CompletionRouter::new(
            Arc::new(registry),
            adapters,
            FallbackTable::default(),
            HashMap::new(),
            Duration::from_secs(1),
        )
        .unwrap();
        (AnalysisPipeline::new(Arc::new(router)), adapter)
    }

    #[tokio::test]
    async fn test_run_returns_typed_result() {
        let (pipeline, adapter) = pipeline(r#"{"label": "positive", "confidence": 0.8}"#);
        let request = AnalysisRequest::new(AnalysisType::Sentiment, "llama", json!("Great service"));

        let response = pipeline.run(&request).await.unwrap();
        assert_eq!(response.analysis_type, AnalysisType::Sentiment);
        assert_eq!(response.provider, ProviderType::Ollama);
        assert_eq!(response.usage.total_tokens(), 52);
        assert!(matches!(response.result, AnalysisResult::Sentiment { .. }));
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unsupported_type_is_rejected_before_dispatch() {
        let (pipeline, adapter) = pipeline("{}");
        let request = AnalysisRequest::new(AnalysisType::LeadScoring, "llama", json!({"name": "Acme"}));

        let err = pipeline.run(&request).await.unwrap_err();
        assert!(matches!(err, GatewayError::UnsupportedAnalysisType { .. }));
        assert!(err.is_rejected_before_dispatch());
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_malformed_output_is_fatal() {
        let (pipeline, _) = pipeline("The sentiment is positive.");
        let request = AnalysisRequest::new(AnalysisType::Sentiment, "llama", json!("ok"));
        let err = pipeline.run(&request).await.unwrap_err();
        assert!(matches!(err, GatewayError::ProviderFatal { .. }));
    }

    #[test]
    fn test_empty_subject_is_invalid() {
        let (pipeline, _) = pipeline("{}");
        for subject in [json!(null), json!("   ")] {
            let request = AnalysisRequest::new(AnalysisType::Sentiment, "llama", subject);
            assert!(pipeline.prepare(&request).unwrap_err().is_validation_error());
        }
    }
}
