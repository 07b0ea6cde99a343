//! Stream multiplexer: the producer/consumer bridge between a provider stream
//! and the caller.
//!
//! A spawned producer task pulls from the provider only after reserving a slot
//! in a bounded channel, so a slow consumer suspends production instead of
//! growing a buffer. The consumer side is [`ChatStream`].
//!
//! Guarantees per request:
//! - chunk indexes are contiguous from 0; a gap or regression from the adapter
//!   ends the stream with [`GatewayError::StreamInterrupted`]
//! - the `done` chunk is delivered at most once and is always last
//! - after cancellation the consumer observes no further items and the provider
//!   stream is dropped, which closes the upstream connection
//! - a failure is delivered as exactly one terminal `Err`, never alongside `done`

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::FusedStream;
use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::Instrument;

use crate::config::StreamingConfig;
use crate::error::GatewayError;
use crate::llm::router::OpenedStream;
use crate::llm::traits::ProviderType;
use crate::types::{ChatMessage, RequestId, StreamChunk};

/// Deferred stream opening, run by the producer task on first poll
pub type StreamSource = BoxFuture<'static, Result<OpenedStream, GatewayError>>;

type Item = Result<StreamChunk, GatewayError>;

/// Spawns producer tasks for streaming requests
#[derive(Debug, Clone, Default)]
pub struct StreamMultiplexer {
    config: StreamingConfig,
}

impl StreamMultiplexer {
    pub fn new(config: StreamingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    /// Spawn the producer for one request
    ///
    /// `source` is not polled until the returned stream is. `guard` is held by
    /// the producer task and dropped when it exits.
    pub fn spawn<G>(
        &self,
        request_id: RequestId,
        source: StreamSource,
        cancel: CancellationToken,
        guard: G,
    ) -> ChatStream
    where
        G: Send + 'static,
    {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let (start_tx, start_rx) = oneshot::channel();

        let producer = Producer {
            request_id,
            tx,
            cancel: cancel.clone(),
            idle_timeout: self.config.idle_timeout,
        };
        tokio::spawn(
            async move {
                let _guard = guard;
                producer.run(start_rx, source).await;
            }
            .instrument(tracing::Span::current()),
        );

        ChatStream {
            request_id,
            rx,
            start: Some(start_tx),
            cancel: cancel.clone(),
            _cancel_on_drop: cancel.drop_guard(),
            terminated: false,
        }
    }

    /// Spawn the producer over an already opened provider stream
    pub fn spawn_opened(
        &self,
        request_id: RequestId,
        opened: OpenedStream,
        cancel: CancellationToken,
    ) -> ChatStream {
        self.spawn(
            request_id,
            Box::pin(futures::future::ready(Ok(opened))),
            cancel,
            (),
        )
    }
}

struct Producer {
    request_id: RequestId,
    tx: mpsc::Sender<Item>,
    cancel: CancellationToken,
    idle_timeout: Duration,
}

impl Producer {
    async fn run(self, start: oneshot::Receiver<()>, source: StreamSource) {
        // Lazy start: nothing happens until the consumer polls
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return,
            started = start => {
                if started.is_err() {
                    return;
                }
            }
        }

        let opened = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                tracing::debug!(request_id = %self.request_id, "Cancelled before the stream opened");
                return;
            }
            opened = source => opened,
        };

        let OpenedStream {
            provider,
            mut chunks,
            ..
        } = match opened {
            Ok(opened) => opened,
            Err(e) => {
                tracing::error!(request_id = %self.request_id, error = %e, "Failed to open stream");
                self.deliver_last(Err(e)).await;
                return;
            }
        };

        let mut sequence = SequenceCheck::new(provider);
        loop {
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                permit = self.tx.reserve() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                next = timeout(self.idle_timeout, chunks.next()) => next,
            };

            let item = match next {
                Err(_) => Err(sequence.interrupted(format!(
                    "no chunk within {}ms",
                    self.idle_timeout.as_millis()
                ))),
                Ok(None) => Err(sequence.interrupted("stream ended without a terminal chunk")),
                Ok(Some(Err(e))) => Err(sequence.wrap(e)),
                Ok(Some(Ok(chunk))) => sequence.accept(chunk),
            };

            let terminal = match &item {
                Ok(chunk) => chunk.done,
                Err(e) => {
                    tracing::warn!(request_id = %self.request_id, error = %e, "Stream interrupted");
                    true
                }
            };
            permit.send(item);
            if terminal {
                break;
            }
        }

        if self.cancel.is_cancelled() {
            tracing::info!(request_id = %self.request_id, "Stream cancelled");
        } else {
            tracing::debug!(request_id = %self.request_id, chunks = sequence.expected, "Stream finished");
        }
        // `chunks` drops here, closing the upstream connection
    }

    async fn deliver_last(&self, item: Item) {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {}
            permit = self.tx.reserve() => {
                if let Ok(permit) = permit {
                    permit.send(item);
                }
            }
        }
    }
}

/// Enforces contiguous indexes and shapes terminal errors
#[derive(Debug)]
struct SequenceCheck {
    provider: ProviderType,
    expected: u32,
}

impl SequenceCheck {
    fn new(provider: ProviderType) -> Self {
        Self {
            provider,
            expected: 0,
        }
    }

    fn last_index(&self) -> Option<u32> {
        self.expected.checked_sub(1)
    }

    fn accept(&mut self, chunk: StreamChunk) -> Item {
        if chunk.index != self.expected {
            return Err(self.interrupted(format!(
                "out-of-order chunk index {} (expected {})",
                chunk.index, self.expected
            )));
        }
        self.expected += 1;
        Ok(chunk)
    }

    fn interrupted(&self, message: impl Into<String>) -> GatewayError {
        GatewayError::stream_interrupted(self.provider, message, self.last_index())
    }

    fn wrap(&self, error: GatewayError) -> GatewayError {
        match error {
            GatewayError::StreamInterrupted { .. } => error,
            other => self.interrupted(other.to_string()),
        }
    }
}

/// Consumer side of a streaming request
///
/// Finite and non-restartable. Dropping it cancels the request.
#[derive(Debug)]
pub struct ChatStream {
    request_id: RequestId,
    rx: mpsc::Receiver<Item>,
    start: Option<oneshot::Sender<()>>,
    cancel: CancellationToken,
    _cancel_on_drop: DropGuard,
    terminated: bool,
}

impl ChatStream {
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Cancel the request; no further items are yielded
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Drain the stream into the complete assistant message
    pub async fn collect_message(mut self) -> Result<ChatMessage, GatewayError> {
        let mut content = String::new();
        while let Some(item) = self.next().await {
            let chunk = item?;
            content.push_str(&chunk.delta);
            if chunk.done {
                return Ok(ChatMessage::assistant(content));
            }
        }
        Err(GatewayError::Cancelled {
            request_id: self.request_id,
        })
    }

    fn terminate(&mut self) {
        self.terminated = true;
        self.rx.close();
    }
}

impl Stream for ChatStream {
    type Item = Result<StreamChunk, GatewayError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.terminated {
            return Poll::Ready(None);
        }
        if let Some(start) = self.start.take() {
            let _ = start.send(());
        }
        if self.cancel.is_cancelled() {
            self.terminate();
            return Poll::Ready(None);
        }

        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(item)) => {
                // Cancellation may have raced with delivery
                if self.cancel.is_cancelled() {
                    self.terminate();
                    return Poll::Ready(None);
                }
                if matches!(&item, Ok(chunk) if chunk.done) || item.is_err() {
                    self.terminate();
                }
                Poll::Ready(Some(item))
            }
            Poll::Ready(None) => {
                self.terminate();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl FusedStream for ChatStream {
    fn is_terminated(&self) -> bool {
        self.terminated
    }
}
