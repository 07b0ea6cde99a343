//! Incremental chunks of a streamed completion.

use serde::{Deserialize, Serialize};

use super::chat::{FinishReason, Usage};

/// One incremental unit of a streamed completion
///
/// Indexes are contiguous from 0 within one request. The chunk with
/// `done == true` is always the last one delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    pub delta: String,
    pub index: u32,
    pub done: bool,
    /// Only set on the terminal chunk, when the provider reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    /// Only set on the terminal chunk, when the provider reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl StreamChunk {
    /// A non-terminal text delta
    pub fn delta<S: Into<String>>(index: u32, delta: S) -> Self {
        Self {
            delta: delta.into(),
            index,
            done: false,
            finish_reason: None,
            usage: None,
        }
    }

    /// The terminal chunk
    pub fn terminal(index: u32, finish_reason: FinishReason, usage: Option<Usage>) -> Self {
        Self {
            delta: String::new(),
            index,
            done: true,
            finish_reason: Some(finish_reason),
            usage,
        }
    }
}

/// Per-call state that turns vendor deltas into contiguous chunks
///
/// Adapters keep one of these inside each stream; it is dropped with the stream.
#[derive(Debug, Default)]
pub struct ChunkSequencer {
    next_index: u32,
    finished: bool,
}

impl ChunkSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next text chunk, or `None` for an empty delta
    pub fn text(&mut self, delta: &str) -> Option<StreamChunk> {
        if self.finished || delta.is_empty() {
            return None;
        }
        let chunk = StreamChunk::delta(self.next_index, delta);
        self.next_index += 1;
        Some(chunk)
    }

    /// The terminal chunk; `None` if one was already produced
    pub fn finish(
        &mut self,
        finish_reason: FinishReason,
        usage: Option<Usage>,
    ) -> Option<StreamChunk> {
        if self.finished {
            return None;
        }
        self.finished = true;
        Some(StreamChunk::terminal(self.next_index, finish_reason, usage))
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Index of the last chunk produced so far
    pub fn last_index(&self) -> Option<u32> {
        self.next_index.checked_sub(1)
    }
}
