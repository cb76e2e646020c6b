//! One-way cooperative cancellation built on a `watch` channel.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

use crate::error::{StorageError, StorageResult};

/// The single writer side of a cancellation flag.
///
/// The flag starts active and moves to cancelled exactly once; it never resets.
#[derive(Debug)]
pub struct CancellationSource {
    tx: watch::Sender<bool>,
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationSource {
    /// Create an active (not cancelled) source.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Request cancellation.
    ///
    /// Returns `true` only for the call that performed the transition; repeated
    /// calls are no-ops.
    pub fn cancel(&self) -> bool {
        self.tx.send_if_modified(|cancelled| {
            if *cancelled {
                false
            } else {
                *cancelled = true;
                true
            }
        })
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Create an observer of this source.
    #[must_use]
    pub fn signal(&self) -> CancellationSignal {
        CancellationSignal {
            rx: self.tx.subscribe(),
            _keepalive: None,
        }
    }
}

/// Read-only observer of a [`CancellationSource`].
#[derive(Debug, Clone)]
pub struct CancellationSignal {
    rx: watch::Receiver<bool>,
    _keepalive: Option<Arc<watch::Sender<bool>>>,
}

impl CancellationSignal {
    /// A signal that never fires.
    #[must_use]
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            rx,
            _keepalive: Some(Arc::new(tx)),
        }
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation is requested.
    ///
    /// If the source is dropped without cancelling, this never resolves.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() && !self.is_cancelled() {
            std::future::pending::<()>().await;
        }
    }

    /// Drive `fut` to completion unless cancellation is requested first.
    ///
    /// # Errors
    /// Returns [`StorageError::Cancelled`] if the signal fires before `fut` completes.
    pub async fn run_until_cancelled<F: Future>(&self, fut: F) -> StorageResult<F::Output> {
        if self.is_cancelled() {
            return Err(StorageError::Cancelled);
        }
        tokio::select! {
            biased;
            () = self.cancelled() => Err(StorageError::Cancelled),
            output = fut => Ok(output),
        }
    }
}
