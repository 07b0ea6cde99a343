//! Shared data model: messages, chat requests/responses, stream chunks,
//! analysis requests/results and capabilities.

pub mod analysis;
pub mod capability;
pub mod chat;
pub mod messages;
pub mod stream;

pub use analysis::{
    AnalysisRequest, AnalysisResponse, AnalysisResult, AnalysisType, LeadTier, SentimentLabel,
};
pub use capability::Capability;
pub use chat::{
    ChatCompletionRequest, ChatCompletionResponse, ChatParameters, FinishReason, ModelId, Usage,
};
pub use messages::{ChatMessage, ChatRole};
pub use stream::{ChunkSequencer, StreamChunk};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of one gateway request, used for cancellation and log correlation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
