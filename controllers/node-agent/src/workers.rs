//! Per-pod worker scheduling.
//!
//! At most one worker runs per pod; pods never wait on each other.

use futures::FutureExt;
use pod_types::PodFullName;
use std::collections::HashSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Tracks which pods have a worker in flight
#[derive(Debug, Clone, Default)]
pub struct PodWorkerPool {
    busy: Arc<Mutex<HashSet<PodFullName>>>,
}

/// Clears a pod's busy mark however its worker ends
struct BusyGuard {
    busy: Arc<Mutex<HashSet<PodFullName>>>,
    key: PodFullName,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.busy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

impl PodWorkerPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `action` for `key` unless a worker for `key` is still running.
    ///
    /// Returns `None` when the call was dropped. A panic inside `action` is
    /// logged and releases the key like a normal exit.
    pub fn run<F>(&self, key: PodFullName, action: F) -> Option<JoinHandle<()>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        {
            let mut busy = self.busy.lock().unwrap_or_else(PoisonError::into_inner);
            if !busy.insert(key.clone()) {
                debug!("Worker for pod {} is busy, skipping", key);
                return None;
            }
        }

        let guard = BusyGuard {
            busy: self.busy.clone(),
            key,
        };
        Some(tokio::spawn(async move {
            if let Err(panic) = AssertUnwindSafe(action).catch_unwind().await {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!("Worker for pod {} panicked: {}", guard.key, message);
            }
            drop(guard);
        }))
    }

    pub fn is_busy(&self, key: &PodFullName) -> bool {
        self.busy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }
}
