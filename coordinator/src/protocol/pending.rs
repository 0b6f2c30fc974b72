use super::FederatedResponse;
use crate::errors::{FederatedError, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// A response that has been dispatched but may not have arrived yet.
///
/// Resolves to the worker's response, or to a worker error when the
/// transport lost the request.
pub struct PendingResponse {
    inner: BoxFuture<'static, Result<FederatedResponse>>,
}

impl PendingResponse {
    /// Wrap any future producing a response
    pub fn new(future: impl Future<Output = Result<FederatedResponse>> + Send + 'static) -> Self {
        Self {
            inner: future.boxed(),
        }
    }

    /// Already completed response
    pub fn ready(result: Result<FederatedResponse>) -> Self {
        Self::new(futures::future::ready(result))
    }

    /// Response delivered over a oneshot channel
    pub fn from_receiver(receiver: oneshot::Receiver<FederatedResponse>) -> Self {
        Self::new(async move {
            receiver.await.map_err(|_| {
                FederatedError::Worker("worker dropped the request before replying".to_string())
            })
        })
    }
}

impl Future for PendingResponse {
    type Output = Result<FederatedResponse>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.as_mut().poll(cx)
    }
}

/// Wait for every pending response, then fail if any of them failed.
///
/// All responses are awaited even when an early one fails, so no request is
/// left half-observed. Results keep the input order.
pub async fn join_all_responses(pending: Vec<PendingResponse>) -> Result<Vec<FederatedResponse>> {
    futures::future::join_all(pending)
        .await
        .into_iter()
        .map(|result| result.and_then(FederatedResponse::check))
        .collect()
}

impl std::fmt::Debug for PendingResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingResponse").finish_non_exhaustive()
    }
}
