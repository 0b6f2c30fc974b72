//! In-process workers
//!
//! Each worker runs a [`FederatedWorkerHandler`] on its own tokio task and
//! drains a bounded request queue. Replies travel back over oneshot
//! channels, so a [`WorkerHandle`] behaves like a remote endpoint.

mod handler;

pub use handler::FederatedWorkerHandler;

use crate::errors::FederatedError;
use crate::protocol::{FederatedRequest, FederatedResponse, PendingResponse};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

/// Default bound of a worker's request queue
pub const DEFAULT_QUEUE_DEPTH: usize = 64;

struct WorkerMessage {
    request: FederatedRequest,
    reply: oneshot::Sender<FederatedResponse>,
}

/// Cloneable handle to a spawned worker
#[derive(Clone)]
pub struct WorkerHandle {
    worker_id: Uuid,
    sender: mpsc::Sender<WorkerMessage>,
}

impl WorkerHandle {
    /// Spawn a worker task serving `handler`. Must be called within a tokio
    /// runtime. The task stops once every handle is dropped.
    pub fn spawn(handler: Arc<FederatedWorkerHandler>, queue_depth: usize) -> Self {
        let worker_id = handler.worker_id();
        let (sender, mut receiver) = mpsc::channel::<WorkerMessage>(queue_depth.max(1));

        tokio::spawn(async move {
            debug!(worker = %worker_id, "Worker started");
            while let Some(message) = receiver.recv().await {
                let response = handler.handle(message.request);
                if message.reply.send(response).is_err() {
                    warn!(worker = %worker_id, "Requester went away before the reply");
                }
            }
            debug!(worker = %worker_id, "Worker stopped");
        });

        Self { worker_id, sender }
    }

    pub fn worker_id(&self) -> Uuid {
        self.worker_id
    }

    /// Enqueue a request. Dispatch starts immediately; the returned
    /// response resolves once the worker replies.
    pub fn submit(&self, request: FederatedRequest) -> PendingResponse {
        let sender = self.sender.clone();
        let worker_id = self.worker_id;
        let task = tokio::spawn(async move {
            let (reply, response) = oneshot::channel();
            sender
                .send(WorkerMessage { request, reply })
                .await
                .map_err(|_| FederatedError::Worker(format!("worker {} is gone", worker_id)))?;
            response.await.map_err(|_| {
                FederatedError::Worker(format!("worker {} dropped the request", worker_id))
            })
        });

        PendingResponse::new(async move {
            task.await
                .map_err(|e| FederatedError::Worker(format!("dispatch task failed: {}", e)))?
        })
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("worker_id", &self.worker_id)
            .finish()
    }
}
