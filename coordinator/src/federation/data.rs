use crate::matrix::MatrixBlock;
use crate::protocol::{FederatedRequest, PendingResponse};
use crate::worker::{FederatedWorkerHandler, WorkerHandle};
use std::fmt::Debug;
use std::sync::Arc;
use uuid::Uuid;

/// Handle to a worker and the partition it holds
pub trait FederatedData: Send + Sync + Debug {
    /// Identity of the worker behind this handle
    fn worker_id(&self) -> Uuid;

    /// Send one request to the worker
    fn execute(&self, request: FederatedRequest) -> PendingResponse;
}

/// In-process data served synchronously; responses are ready immediately
#[derive(Debug, Clone)]
pub struct FederatedLocalData {
    handler: Arc<FederatedWorkerHandler>,
}

impl FederatedLocalData {
    /// Wrap a local block, stored under `var_id`
    pub fn new(var_id: i64, block: MatrixBlock) -> Self {
        Self {
            handler: Arc::new(FederatedWorkerHandler::with_partition(var_id, block)),
        }
    }

    pub fn from_handler(handler: Arc<FederatedWorkerHandler>) -> Self {
        Self { handler }
    }
}

impl FederatedData for FederatedLocalData {
    fn worker_id(&self) -> Uuid {
        self.handler.worker_id()
    }

    fn execute(&self, request: FederatedRequest) -> PendingResponse {
        PendingResponse::ready(Ok(self.handler.handle(request)))
    }
}

/// Data held by a worker task reached through its request queue
#[derive(Debug, Clone)]
pub struct FederatedWorkerData {
    worker: WorkerHandle,
}

impl FederatedWorkerData {
    pub fn new(worker: WorkerHandle) -> Self {
        Self { worker }
    }
}

impl FederatedData for FederatedWorkerData {
    fn worker_id(&self) -> Uuid {
        self.worker.worker_id()
    }

    fn execute(&self, request: FederatedRequest) -> PendingResponse {
        self.worker.submit(request)
    }
}
