//! Cancellable streaming execution.
//!
//! A streaming run executes on its own thread and hands output to a callback
//! byte by byte. The caller keeps a [`StreamHandle`] and may cancel it at any
//! time. Cancelling only *requests* an abort: the worker sends the interrupt
//! sequence and keeps reading until the device closes the output sections, then
//! leaves raw mode. Join the handle before reusing the engine from the same thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::{ReplError, ReplResult};

/// Shared flag used to request cancellation of a streaming run.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a token that has not been cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// How a streaming run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// The program ran to completion without raising.
    Completed,
    /// Cancellation was requested and the device confirmed the end of the run.
    Cancelled,
}

/// Handle to a streaming run on a background thread.
///
/// Dropping the handle without joining requests cancellation but does not wait.
pub struct StreamHandle {
    cancel: CancelToken,
    worker: Option<JoinHandle<ReplResult<StreamOutcome>>>,
}

impl StreamHandle {
    pub(crate) fn new(cancel: CancelToken, worker: JoinHandle<ReplResult<StreamOutcome>>) -> Self {
        StreamHandle {
            cancel,
            worker: Some(worker),
        }
    }

    /// Request cancellation of the run.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A clone of the run's cancellation token.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Whether the worker has finished (including leaving raw mode).
    pub fn is_finished(&self) -> bool {
        self.worker.as_ref().map_or(true, |w| w.is_finished())
    }

    /// Wait for the run to end and return its outcome.
    pub fn join(mut self) -> ReplResult<StreamOutcome> {
        match self.worker.take() {
            Some(worker) => worker.join().map_err(|_| ReplError::WorkerPanicked)?,
            None => Err(ReplError::WorkerPanicked),
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_join_returns_worker_result() {
        let worker = std::thread::spawn(|| Ok(StreamOutcome::Completed));
        let handle = StreamHandle::new(CancelToken::new(), worker);
        assert_eq!(handle.join().unwrap(), StreamOutcome::Completed);
    }

    #[test]
    fn test_drop_without_join_requests_cancel() {
        let token = CancelToken::new();
        let worker = std::thread::spawn(|| Ok(StreamOutcome::Completed));
        let handle = StreamHandle::new(token.clone(), worker);
        drop(handle);
        assert!(token.is_cancelled());
    }
}
