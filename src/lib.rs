//! Route chat completions, token streams and structured analysis across AI providers.
//!
//! The gateway puts OpenAI, Anthropic, Ollama and LM Studio behind one request
//! model. You describe what you want (a model id, messages, sampling
//! parameters) and the gateway resolves the provider, checks the model's
//! capabilities, dispatches the call with a deadline, and falls back once to a
//! configured alternate on transient failures.
//!
//! # Quick Start
//!
//! ## Chat Completion
//!
//! ```no_run
//! use ai_gateway::{AiGateway, GatewayConfig};
//! use ai_gateway::types::{ChatCompletionRequest, ChatMessage};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider sections come from OPENAI_API_KEY, OLLAMA_BASE_URL, ...
//!     let gateway = AiGateway::from_config(GatewayConfig::from_env()?)?;
//!
//!     let request = ChatCompletionRequest::new(
//!         "gpt-4o-mini",
//!         vec![ChatMessage::user("What is the capital of France?")],
//!     );
//!     let response = gateway.send_chat_completion(request).await?;
//!     println!("{} answered: {}", response.provider, response.message.content);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Streaming
//!
//! ```no_run
//! use ai_gateway::{AiGateway, GatewayConfig};
//! use ai_gateway::types::{ChatCompletionRequest, ChatMessage};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let gateway = AiGateway::from_config(GatewayConfig::from_env()?)?;
//!     let request = ChatCompletionRequest::new(
//!         "llama3.1:8b",
//!         vec![ChatMessage::user("Write a haiku about Rust")],
//!     );
//!
//!     let mut stream = gateway.stream_chat_completion(request)?;
//!     while let Some(chunk) = stream.next().await {
//!         let chunk = chunk?;
//!         print!("{}", chunk.delta);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Structured Analysis
//!
//! ```no_run
//! use ai_gateway::{AiGateway, GatewayConfig};
//! use ai_gateway::types::{AnalysisRequest, AnalysisResult, AnalysisType};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let gateway = AiGateway::from_config(GatewayConfig::from_env()?)?;
//!     let request = AnalysisRequest::new(
//!         AnalysisType::LeadScoring,
//!         "claude-3-5-sonnet-20241022",
//!         json!({"company": "Acme", "employees": 250, "budget": "approved"}),
//!     );
//!
//!     let response = gateway.run_analysis(request).await?;
//!     if let AnalysisResult::LeadScore { score, tier, .. } = response.result {
//!         println!("score {} ({:?})", score, tier);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - [`gateway`] - Facade: validation, request ids, cancellation, task spawning
//! - [`llm`] - Capability registry, completion router and provider adapters
//! - [`streaming`] - Producer/consumer bridge with backpressure and cancellation
//! - [`analysis`] - Prompting and typed parsing for analysis requests
//! - [`config`] - File and environment configuration
//! - [`telemetry`] - Logging setup for host applications
//!
//! # Error Handling
//!
//! Every operation returns [`GatewayError`]. Request errors (validation, unknown
//! model, missing capability) are returned before any provider is contacted;
//! provider errors are either transient (eligible for the single fallback) or
//! fatal. Streaming failures arrive as the stream's terminal `Err` item.

pub mod analysis;
pub mod config;
pub mod error;
pub mod gateway;
pub mod llm;
pub mod streaming;
pub mod telemetry;
pub mod types;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use gateway::{AiGateway, AiGatewayBuilder, InFlight};
pub use streaming::ChatStream;

pub type Result<T> = std::result::Result<T, GatewayError>;
