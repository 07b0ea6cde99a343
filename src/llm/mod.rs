//! Multi-provider LLM integration behind one adapter interface.
//!
//! # Architecture
//!
//! ```text
//! CompletionRouter → CapabilityRegistry (is the pair registered? does it support the mode?)
//!        ↓
//! ProviderAdapter (OpenAI | Anthropic | Ollama | LM Studio)
//!        ↓
//! reqwest HTTP exchange, vendor payloads normalized into crate::types
//! ```
//!
//! # Key Types
//!
//! - [`ProviderAdapter`] - Core trait for provider implementations
//! - [`ProviderType`] - Closed set of supported vendors
//! - [`CapabilityRegistry`] - Immutable `(provider, model)` capability table
//! - [`CompletionRouter`] - Provider resolution and the single fallback
//! - [`FallbackRule`] - Configured alternate for a `(provider, model)` pair

pub mod fallback;
pub mod models;
pub mod providers;
pub mod registry;
pub mod router;
pub mod traits;

pub use fallback::{FallbackDecision, FallbackRule, FallbackTable};
pub use models::{ModelEntry, BUILTIN_MODELS};
pub use registry::{CapabilityRegistry, RegisteredModel};
pub use router::{CompletionRouter, OpenedStream, ResolvedTarget};
pub use traits::{ChunkStream, HealthStatus, ProviderAdapter, ProviderType};
