use std::sync::atomic::{AtomicI64, Ordering};

/// Process-wide source of federated identifiers.
///
/// Map ids, request ids and worker-side variable ids are all drawn from one
/// sequence owned by the execution context. Values are strictly increasing
/// and start at 1.
#[derive(Debug, Default)]
pub struct IdSequence {
    last: AtomicI64,
}

impl IdSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next id
    pub fn next_id(&self) -> i64 {
        self.last.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Restart the sequence so the next id is 1 again
    pub fn reset(&self) {
        self.last.store(0, Ordering::SeqCst);
    }

    /// Last id handed out (0 if none)
    pub fn current(&self) -> i64 {
        self.last.load(Ordering::SeqCst)
    }
}
