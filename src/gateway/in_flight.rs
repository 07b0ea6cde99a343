//! In-flight request tracking and cancellable request handles.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::error::GatewayError;
use crate::types::RequestId;

/// Cancellation tokens of the requests currently running
///
/// Touched only on start, finish and cancel.
#[derive(Debug, Default)]
pub(crate) struct InFlightTable {
    entries: Mutex<HashMap<RequestId, CancellationToken>>,
}

impl InFlightTable {
    fn lock(&self) -> MutexGuard<'_, HashMap<RequestId, CancellationToken>> {
        // The map stays consistent even if a holder panicked
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track a new request; the entry lives as long as the returned registration
    pub(crate) fn register(self: &Arc<Self>, request_id: RequestId) -> (CancellationToken, Registration) {
        let token = CancellationToken::new();
        self.lock().insert(request_id, token.clone());
        (
            token,
            Registration {
                table: Arc::clone(self),
                request_id,
            },
        )
    }

    /// Cancel a tracked request; false when no such request is running
    pub(crate) fn cancel(&self, request_id: &RequestId) -> bool {
        match self.lock().get(request_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }
}

/// Removes its request from the table when dropped
#[derive(Debug)]
pub(crate) struct Registration {
    table: Arc<InFlightTable>,
    request_id: RequestId,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.table.lock().remove(&self.request_id);
    }
}

/// Handle to a spawned non-streaming request
///
/// Resolves to the request's single outcome. After cancellation it resolves to
/// [`GatewayError::Cancelled`] even if the provider answered in the meantime.
/// Dropping the handle cancels the request.
#[derive(Debug)]
pub struct InFlight<T> {
    request_id: RequestId,
    handle: JoinHandle<Result<T, GatewayError>>,
    cancel: CancellationToken,
    _cancel_on_drop: DropGuard,
}

impl<T> InFlight<T> {
    pub(crate) fn new(
        request_id: RequestId,
        handle: JoinHandle<Result<T, GatewayError>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            request_id,
            handle,
            _cancel_on_drop: cancel.clone().drop_guard(),
            cancel,
        }
    }

    /// Identifier to pass to [`AiGateway::cancel`](crate::gateway::AiGateway::cancel)
    pub fn id(&self) -> RequestId {
        self.request_id
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    fn cancelled(&self) -> GatewayError {
        GatewayError::Cancelled {
            request_id: self.request_id,
        }
    }
}

impl<T> Future for InFlight<T> {
    type Output = Result<T, GatewayError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.cancel.is_cancelled() {
            return Poll::Ready(Err(this.cancelled()));
        }

        match Pin::new(&mut this.handle).poll(cx) {
            Poll::Ready(_) if this.cancel.is_cancelled() => Poll::Ready(Err(this.cancelled())),
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(join_error)) => Poll::Ready(Err(GatewayError::internal(format!(
                "Request task {} failed: {}",
                this.request_id, join_error
            )))),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_registration_removes_entry_on_drop() {
        let table = Arc::new(InFlightTable::default());
        let id = RequestId::new();
        let (token, registration) = table.register(id);
        assert_eq!(table.len(), 1);

        assert!(table.cancel(&id));
        assert!(token.is_cancelled());

        drop(registration);
        assert_eq!(table.len(), 0);
        assert!(!table.cancel(&id));
    }

    #[tokio::test]
    async fn test_in_flight_resolves_to_task_outcome() {
        let token = CancellationToken::new();
        let handle = tokio::spawn(async { Ok::<_, GatewayError>(7) });
        let in_flight = InFlight::new(RequestId::new(), handle, token);
        assert_eq!(in_flight.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_cancelled_in_flight_reports_cancelled() {
        let token = CancellationToken::new();
        let handle = tokio::spawn(async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok::<_, GatewayError>("late")
        });
        let in_flight = InFlight::new(RequestId::new(), handle, token.clone());
        let id = in_flight.id();
        token.cancel();

        match in_flight.await {
            Err(GatewayError::Cancelled { request_id }) => assert_eq!(request_id, id),
            other => panic!("expected Cancelled, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dropping_handle_cancels_token() {
        let token = CancellationToken::new();
        let handle = tokio::spawn(futures::future::pending::<Result<(), GatewayError>>());
        drop(InFlight::new(RequestId::new(), handle, token.clone()));
        assert!(token.is_cancelled());
    }
}
