//! Single-fallback policy for provider-level resilience
//!
//! A request is re-routed at most once, and only when the primary provider
//! failed with a transient error. Fallback targets come from configured
//! [`FallbackRule`]s keyed by the primary `(provider, model)` pair.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;

use crate::error::GatewayError;
use crate::llm::traits::ProviderType;
use crate::types::ModelId;

/// Configured alternate for one `(provider, model)` pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackRule {
    /// Primary provider
    pub provider: ProviderType,
    /// Primary model
    pub model: ModelId,
    /// Provider to re-route to on a transient failure
    pub fallback_provider: ProviderType,
    /// Model on the fallback provider; the primary model id when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_model: Option<ModelId>,
}

impl FallbackRule {
    pub fn new<M: Into<ModelId>>(provider: ProviderType, model: M, fallback_provider: ProviderType) -> Self {
        Self {
            provider,
            model: model.into(),
            fallback_provider,
            fallback_model: None,
        }
    }

    pub fn with_fallback_model<M: Into<ModelId>>(mut self, model: M) -> Self {
        self.fallback_model = Some(model.into());
        self
    }

    /// The `(provider, model)` this rule re-routes to
    pub fn target(&self) -> (ProviderType, ModelId) {
        (
            self.fallback_provider,
            self.fallback_model.clone().unwrap_or_else(|| self.model.clone()),
        )
    }
}

/// Decision about whether to fall back after an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackDecision {
    /// Re-route the request to the fallback target
    Fallback,
    /// Surface the error unchanged
    FailImmediately,
}

/// Determine if a primary-provider error should trigger the fallback
pub fn should_fall_back(error: &GatewayError) -> FallbackDecision {
    if error.is_fallback_eligible() {
        FallbackDecision::Fallback
    } else {
        FallbackDecision::FailImmediately
    }
}

/// Lookup table built from the configured rules
#[derive(Debug, Clone, Default)]
pub struct FallbackTable {
    targets: HashMap<(ProviderType, ModelId), (ProviderType, ModelId)>,
}

impl FallbackTable {
    /// Build the table, rejecting self-referencing and duplicate rules
    pub fn from_rules(rules: &[FallbackRule]) -> Result<Self, GatewayError> {
        let mut targets = HashMap::new();
        for rule in rules {
            let source = (rule.provider, rule.model.clone());
            let target = rule.target();
            if source == target {
                return Err(GatewayError::configuration(format!(
                    "Fallback for {} / {} points at itself",
                    rule.provider, rule.model
                )));
            }
            if targets.insert(source, target).is_some() {
                return Err(GatewayError::configuration(format!(
                    "Duplicate fallback rule for {} / {}",
                    rule.provider, rule.model
                )));
            }
        }
        Ok(Self { targets })
    }

    /// Fallback target for a primary pair, if one is configured
    pub fn target_for(&self, provider: ProviderType, model: &ModelId) -> Option<&(ProviderType, ModelId)> {
        self.targets.get(&(provider, model.clone()))
    }

    /// All configured `(source, target)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&(ProviderType, ModelId), &(ProviderType, ModelId))> {
        self.targets.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Run `primary`, then `fallback` at most once if the primary error allows it
///
/// The second error, if any, is surfaced as-is.
pub async fn run_with_fallback<T, P, F, Fut>(primary: P, fallback: Option<F>) -> Result<T, GatewayError>
where
    P: Future<Output = Result<T, GatewayError>>,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    let error = match primary.await {
        Ok(result) => return Ok(result),
        Err(error) => error,
    };

    let fallback = match (should_fall_back(&error), fallback) {
        (FallbackDecision::Fallback, Some(fallback)) => fallback,
        _ => return Err(error),
    };

    tracing::warn!(
        error = %error,
        code = error.code(),
        "Primary provider failed with a transient error, falling back"
    );

    match fallback().await {
        Ok(result) => {
            tracing::info!("Fallback provider succeeded");
            Ok(result)
        }
        Err(second) => {
            tracing::error!(error = %second, "Fallback provider failed");
            Err(second)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransientKind;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn transient() -> GatewayError {
        GatewayError::provider_transient(
            ProviderType::OpenAI,
            TransientKind::Unavailable { status: 503 },
            "service unavailable",
        )
    }

    #[test]
    fn test_rule_target_defaults_to_same_model() {
        let rule = FallbackRule::new(ProviderType::Ollama, "llama3.1:8b", ProviderType::LmStudio);
        assert_eq!(rule.target(), (ProviderType::LmStudio, ModelId::from("llama3.1:8b")));

        let rule = rule.with_fallback_model("meta-llama-3.1-8b-instruct");
        assert_eq!(rule.target().1.as_str(), "meta-llama-3.1-8b-instruct");
    }

    #[test]
    fn test_table_rejects_bad_rules() {
        let looping = FallbackRule::new(ProviderType::Ollama, "m", ProviderType::Ollama);
        assert!(FallbackTable::from_rules(&[looping]).is_err());

        let rule = FallbackRule::new(ProviderType::OpenAI, "gpt-4o", ProviderType::Anthropic)
            .with_fallback_model("claude-3-5-sonnet-20241022");
        assert!(FallbackTable::from_rules(&[rule.clone(), rule.clone()]).is_err());

        let table = FallbackTable::from_rules(&[rule]).unwrap();
        let target = table.target_for(ProviderType::OpenAI, &ModelId::from("gpt-4o")).unwrap();
        assert_eq!(target.0, ProviderType::Anthropic);
        assert!(table.target_for(ProviderType::Anthropic, &ModelId::from("gpt-4o")).is_none());
    }

    #[test]
    fn test_only_transient_errors_fall_back() {
        assert_eq!(should_fall_back(&transient()), FallbackDecision::Fallback);
        assert_eq!(
            should_fall_back(&GatewayError::provider_fatal(ProviderType::OpenAI, "401")),
            FallbackDecision::FailImmediately
        );
        assert_eq!(
            should_fall_back(&GatewayError::validation("empty")),
            FallbackDecision::FailImmediately
        );
    }

    #[tokio::test]
    async fn test_fallback_runs_once_after_transient_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = run_with_fallback(async { Err::<u32, _>(transient()) }, Some(move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(7)
        }))
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_second_failure_is_surfaced() {
        let result = run_with_fallback(async { Err::<u32, _>(transient()) }, Some(|| async {
            Err(GatewayError::provider_fatal(ProviderType::Anthropic, "bad key"))
        }))
        .await;

        assert!(matches!(result, Err(GatewayError::ProviderFatal { .. })));
    }

    #[tokio::test]
    async fn test_fatal_error_skips_fallback() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = run_with_fallback(
            async { Err::<u32, _>(GatewayError::provider_fatal(ProviderType::OpenAI, "401")) },
            Some(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            }),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
