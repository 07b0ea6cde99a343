//! Error taxonomy for the gateway.
//!
//! Every failure that leaves the gateway is a [`GatewayError`]. Provider adapters
//! translate vendor responses into this taxonomy at their boundary, so the router,
//! the stream multiplexer and the facade only ever reason about these variants.
//!
//! # Error Categories
//!
//! - **Validation** - malformed requests and unknown models, rejected before dispatch
//! - **Capability** - the resolved model cannot serve the requested mode or analysis
//! - **Provider transient** - timeouts, rate limits, 5xx; eligible for one fallback
//! - **Provider fatal** - auth failures, malformed vendor payloads; surfaced immediately
//! - **Stream interrupted** - terminal error delivered in place of the `done` chunk
//!
//! ```rust
//! use ai_gateway::error::GatewayError;
//!
//! # fn handle(error: GatewayError) {
//! match error {
//!     _ if error.is_validation_error() => eprintln!("Bad request: {}", error),
//!     _ if error.is_fallback_eligible() => eprintln!("Upstream hiccup: {}", error),
//!     _ => eprintln!("Request failed [{}]: {}", error.code(), error),
//! }
//! # }
//! ```

use thiserror::Error;

use crate::llm::traits::ProviderType;
use crate::types::{AnalysisType, Capability, RequestId};

/// Why a provider call failed in a way that may succeed elsewhere
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransientKind {
    /// The per-call deadline expired
    Timeout,
    /// The vendor signalled rate limiting
    RateLimited { retry_after_ms: Option<u64> },
    /// 5xx-equivalent response
    Unavailable { status: u16 },
    /// Connection could not be established or was reset
    Network,
}

impl std::fmt::Display for TransientKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransientKind::Timeout => write!(f, "timeout"),
            TransientKind::RateLimited {
                retry_after_ms: Some(ms),
            } => write!(f, "rate limited (retry after {}ms)", ms),
            TransientKind::RateLimited { retry_after_ms: None } => write!(f, "rate limited"),
            TransientKind::Unavailable { status } => write!(f, "unavailable (HTTP {})", status),
            TransientKind::Network => write!(f, "network"),
        }
    }
}

/// Main error type for the gateway
#[derive(Error, Debug, Clone)]
pub enum GatewayError {
    /// Malformed or empty request
    #[error("Invalid request: {message}")]
    Validation { message: String },

    /// The model (or provider/model pair) is not registered
    #[error("Unknown model '{model}'{}", provider_suffix(.provider))]
    UnknownModel {
        provider: Option<ProviderType>,
        model: String,
    },

    /// The resolved model does not support the requested capability
    #[error("Model '{model}' on {provider} does not support {capability}")]
    CapabilityMismatch {
        provider: ProviderType,
        model: String,
        capability: Capability,
    },

    /// No provider could be resolved for the model
    #[error("Cannot resolve a provider for model '{model}': {reason}")]
    UnresolvableProvider { model: String, reason: String },

    /// The analysis type is not in the model's capability set
    #[error("Model '{model}' on {provider} does not support {analysis_type} analysis")]
    UnsupportedAnalysisType {
        provider: ProviderType,
        model: String,
        analysis_type: AnalysisType,
    },

    /// Timeout, rate limit or 5xx-equivalent from the upstream provider
    #[error("Transient {provider} failure ({kind}): {message}")]
    ProviderTransient {
        provider: ProviderType,
        kind: TransientKind,
        message: String,
    },

    /// Auth failure or malformed vendor response
    #[error("{provider} request failed: {message}")]
    ProviderFatal {
        provider: ProviderType,
        message: String,
    },

    /// Mid-stream terminal error, delivered in place of the `done` chunk
    #[error("Stream from {provider} interrupted: {message}")]
    StreamInterrupted {
        provider: ProviderType,
        message: String,
        last_index: Option<u32>,
    },

    /// The request was cancelled by its caller
    #[error("Request {request_id} was cancelled")]
    Cancelled { request_id: RequestId },

    /// Gateway setup errors (registry, adapters, config)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Internal gateway errors (task failures and the like)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl GatewayError {
    /// Create a Validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a Configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create a ProviderFatal error
    pub fn provider_fatal(provider: ProviderType, message: impl Into<String>) -> Self {
        Self::ProviderFatal {
            provider,
            message: message.into(),
        }
    }

    /// Create a ProviderTransient error
    pub fn provider_transient(
        provider: ProviderType,
        kind: TransientKind,
        message: impl Into<String>,
    ) -> Self {
        Self::ProviderTransient {
            provider,
            kind,
            message: message.into(),
        }
    }

    /// Create a ProviderTransient timeout error
    pub fn timeout(provider: ProviderType, after: std::time::Duration) -> Self {
        Self::provider_transient(
            provider,
            TransientKind::Timeout,
            format!("no response within {}ms", after.as_millis()),
        )
    }

    /// Create a StreamInterrupted error
    pub fn stream_interrupted(
        provider: ProviderType,
        message: impl Into<String>,
        last_index: Option<u32>,
    ) -> Self {
        Self::StreamInterrupted {
            provider,
            message: message.into(),
            last_index,
        }
    }

    /// Check if this error is a request validation error (never retried)
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            GatewayError::Validation { .. } | GatewayError::UnknownModel { .. }
        )
    }

    /// Check if this error was raised before any provider was contacted
    pub fn is_rejected_before_dispatch(&self) -> bool {
        matches!(
            self,
            GatewayError::Validation { .. }
                | GatewayError::UnknownModel { .. }
                | GatewayError::CapabilityMismatch { .. }
                | GatewayError::UnresolvableProvider { .. }
                | GatewayError::UnsupportedAnalysisType { .. }
        )
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::ProviderTransient { .. })
    }

    /// Check if this error allows the single fallback re-route
    pub fn is_fallback_eligible(&self) -> bool {
        self.is_retryable()
    }

    /// Provider that produced this error, when there is one
    pub fn provider(&self) -> Option<ProviderType> {
        match self {
            GatewayError::CapabilityMismatch { provider, .. }
            | GatewayError::UnsupportedAnalysisType { provider, .. }
            | GatewayError::ProviderTransient { provider, .. }
            | GatewayError::ProviderFatal { provider, .. }
            | GatewayError::StreamInterrupted { provider, .. } => Some(*provider),
            GatewayError::UnknownModel { provider, .. } => *provider,
            _ => None,
        }
    }

    /// Stable short code for logs and callers
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Validation { .. } => "GW-VAL",
            GatewayError::UnknownModel { .. } => "GW-VAL-MODEL",
            GatewayError::CapabilityMismatch { .. } => "GW-CAP",
            GatewayError::UnresolvableProvider { .. } => "GW-ROUTE",
            GatewayError::UnsupportedAnalysisType { .. } => "GW-CAP-ANALYSIS",
            GatewayError::ProviderTransient { .. } => "GW-PRV-TRANSIENT",
            GatewayError::ProviderFatal { .. } => "GW-PRV-FATAL",
            GatewayError::StreamInterrupted { .. } => "GW-STREAM",
            GatewayError::Cancelled { .. } => "GW-CANCELLED",
            GatewayError::Configuration { .. } => "GW-CONFIG",
            GatewayError::Internal { .. } => "GW-INTERNAL",
        }
    }
}

fn provider_suffix(provider: &Option<ProviderType>) -> String {
    provider
        .map(|p| format!(" for provider {}", p))
        .unwrap_or_default()
}

impl From<crate::config::ConfigError> for GatewayError {
    fn from(error: crate::config::ConfigError) -> Self {
        GatewayError::configuration(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let transient = GatewayError::timeout(ProviderType::OpenAI, std::time::Duration::from_secs(2));
        assert!(transient.is_retryable());
        assert!(transient.is_fallback_eligible());
        assert!(!transient.is_validation_error());

        let fatal = GatewayError::provider_fatal(ProviderType::Anthropic, "401 unauthorized");
        assert!(!fatal.is_retryable());
        assert_eq!(fatal.provider(), Some(ProviderType::Anthropic));

        let unknown = GatewayError::UnknownModel {
            provider: None,
            model: "nope".to_string(),
        };
        assert!(unknown.is_validation_error());
        assert!(unknown.is_rejected_before_dispatch());
        assert_eq!(unknown.code(), "GW-VAL-MODEL");
    }

    #[test]
    fn test_display_messages() {
        let unknown = GatewayError::UnknownModel {
            provider: Some(ProviderType::Ollama),
            model: "llama9".to_string(),
        };
        assert_eq!(unknown.to_string(), "Unknown model 'llama9' for provider ollama");

        let interrupted =
            GatewayError::stream_interrupted(ProviderType::OpenAI, "connection reset", Some(3));
        assert_eq!(
            interrupted.to_string(),
            "Stream from openai interrupted: connection reset"
        );

        let rate = TransientKind::RateLimited {
            retry_after_ms: Some(1500),
        };
        assert_eq!(rate.to_string(), "rate limited (retry after 1500ms)");
    }
}
