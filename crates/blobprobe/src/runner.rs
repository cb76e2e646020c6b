//! Concurrent reader/writer probe loops.
//!
//! This module provides:
//! - [`ProbeRunner`]: starts a reader task and a writer task against one shared [`Storage`]
//! - [`RunningProbe`]: handle for observing, cancelling and joining the two tasks
//! - [`LoopStats`]: live per-loop counters and [`LoopState`]
//!
//! # Loop contract
//!
//! Each loop checks the cancellation signal at the top of every iteration and
//! otherwise never stops on its own. A failed backend call is logged and the
//! next iteration starts immediately: no delay, no backoff, no failure budget.
//! A call aborted by the cancellation signal ends the loop without logging an
//! error.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use blobprobe::runner::ProbeRunner;
//! use blobprobe_store::MemoryStorage;
//!
//! let probe = ProbeRunner::new(Arc::new(MemoryStorage::new())).start();
//! // ... wait for the stop trigger ...
//! let report = probe.stop().await?;
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use blobprobe_store::{CancellationSignal, CancellationSource, Storage, StorageError, StorageKey};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::record::{PROBE_KEY, ProbeRecord, probe_keys};

/// Which loop a diagnostic or statistic belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeSide {
    /// The loop issuing reads.
    Reader,
    /// The loop issuing writes.
    Writer,
}

impl ProbeSide {
    /// Lowercase name used in log fields.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Reader => "reader",
            Self::Writer => "writer",
        }
    }
}

impl fmt::Display for ProbeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of one loop. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LoopState {
    /// Issuing backend calls.
    Running = 0,
    /// Cancellation observed; no further calls will be issued.
    Terminating = 1,
    /// The loop has returned.
    Terminated = 2,
}

impl LoopState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Running,
            1 => Self::Terminating,
            _ => Self::Terminated,
        }
    }
}

/// Result of a single loop iteration.
#[derive(Debug)]
pub enum IterationOutcome {
    /// The backend call succeeded.
    Completed,
    /// The backend call failed; the loop continues.
    Failed(StorageError),
    /// The backend call was aborted by the cancellation signal; the loop ends.
    Cancelled,
}

impl IterationOutcome {
    fn from_result<T>(result: Result<T, StorageError>) -> Self {
        match result {
            Ok(_) => Self::Completed,
            Err(err) if err.is_cancelled() => Self::Cancelled,
            Err(err) => Self::Failed(err),
        }
    }
}

/// How a loop came to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopTermination {
    /// The signal was observed at the top of an iteration.
    Signal,
    /// An in-flight backend call was aborted by the signal.
    InFlightCancel,
}

/// Live counters for one loop, shared with the running task.
#[derive(Debug)]
pub struct LoopStats {
    side: ProbeSide,
    iterations: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    state: AtomicU8,
}

impl LoopStats {
    fn new(side: ProbeSide) -> Self {
        Self {
            side,
            iterations: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            state: AtomicU8::new(LoopState::Running as u8),
        }
    }

    /// Loop these counters belong to.
    #[must_use]
    pub const fn side(&self) -> ProbeSide {
        self.side
    }

    /// Backend calls started.
    #[must_use]
    pub fn iterations(&self) -> u64 {
        self.iterations.load(Ordering::SeqCst)
    }

    /// Backend calls that succeeded.
    #[must_use]
    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::SeqCst)
    }

    /// Backend calls that failed with something other than cancellation.
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::SeqCst)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LoopState {
        LoopState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: LoopState) {
        self.state.fetch_max(state as u8, Ordering::SeqCst);
    }

    fn snapshot(&self) -> LoopSummary {
        LoopSummary {
            side: self.side,
            iterations: self.iterations(),
            successes: self.successes(),
            failures: self.failures(),
        }
    }
}

/// Final counters for one loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSummary {
    /// Loop the counters belong to.
    pub side: ProbeSide,
    /// Backend calls started.
    pub iterations: u64,
    /// Backend calls that succeeded.
    pub successes: u64,
    /// Backend calls that failed.
    pub failures: u64,
}

impl fmt::Display for LoopSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} iterations, {} succeeded, {} failed",
            self.side, self.iterations, self.successes, self.failures
        )
    }
}

/// What a loop returns when it stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopExit {
    /// Loop that stopped.
    pub side: ProbeSide,
    /// Why it stopped.
    pub termination: LoopTermination,
}

/// Outcome of a probe run after both loops have been joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeReport {
    /// Reader loop exit.
    pub reader: LoopExit,
    /// Writer loop exit.
    pub writer: LoopExit,
    /// Reader loop counters.
    pub reader_summary: LoopSummary,
    /// Writer loop counters.
    pub writer_summary: LoopSummary,
}

/// Errors surfacing at the join point.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// A loop task panicked or was aborted by the runtime.
    #[error("{side} loop did not finish cleanly: {source}")]
    LoopPanicked {
        /// Loop that failed.
        side: ProbeSide,
        /// Join error from the runtime.
        #[source]
        source: tokio::task::JoinError,
    },
}

/// Result type for probe orchestration.
pub type ProbeResult<T> = Result<T, ProbeError>;

/// Run the reader loop until cancelled.
///
/// Each iteration reads `keys`; failures are logged with the keys and error and
/// the loop continues.
pub async fn reader_loop(
    storage: Arc<dyn Storage>,
    keys: Arc<[StorageKey]>,
    cancel: CancellationSignal,
    stats: Arc<LoopStats>,
) -> LoopExit {
    run_loop(ProbeSide::Reader, &cancel, &stats, || {
        let storage = Arc::clone(&storage);
        let keys = Arc::clone(&keys);
        let cancel = cancel.clone();
        async move {
            let outcome = IterationOutcome::from_result(storage.read(&keys, &cancel).await);
            if let IterationOutcome::Failed(err) = &outcome {
                error!(side = "reader", keys = ?keys, error = %err, "Reader exception");
            }
            outcome
        }
    })
    .await
}

/// Run the writer loop until cancelled.
///
/// Each iteration writes a fresh [`ProbeRecord`] under the probe key; failures
/// are logged and the loop continues.
pub async fn writer_loop(
    storage: Arc<dyn Storage>,
    cancel: CancellationSignal,
    stats: Arc<LoopStats>,
) -> LoopExit {
    run_loop(ProbeSide::Writer, &cancel, &stats, || {
        let storage = Arc::clone(&storage);
        let cancel = cancel.clone();
        async move {
            let result = match ProbeRecord::fresh().to_changes() {
                Ok(changes) => storage.write(&changes, &cancel).await,
                Err(err) => Err(StorageError::Json(err)),
            };
            let outcome = IterationOutcome::from_result(result);
            if let IterationOutcome::Failed(err) = &outcome {
                error!(side = "writer", key = PROBE_KEY, error = %err, "Writer exception");
            }
            outcome
        }
    })
    .await
}

async fn run_loop<F, Fut>(
    side: ProbeSide,
    cancel: &CancellationSignal,
    stats: &LoopStats,
    mut iteration: F,
) -> LoopExit
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = IterationOutcome>,
{
    debug!(side = side.as_str(), "Probe loop started");

    let termination = loop {
        if cancel.is_cancelled() {
            break LoopTermination::Signal;
        }

        stats.iterations.fetch_add(1, Ordering::SeqCst);
        match iteration().await {
            IterationOutcome::Completed => {
                stats.successes.fetch_add(1, Ordering::SeqCst);
            }
            IterationOutcome::Failed(_) => {
                stats.failures.fetch_add(1, Ordering::SeqCst);
            }
            IterationOutcome::Cancelled => break LoopTermination::InFlightCancel,
        }
    };

    stats.set_state(LoopState::Terminating);
    info!(
        side = side.as_str(),
        termination = ?termination,
        iterations = stats.iterations(),
        failures = stats.failures(),
        "Probe loop stopping"
    );
    stats.set_state(LoopState::Terminated);

    LoopExit { side, termination }
}

/// Starts reader and writer loops against a shared storage backend.
pub struct ProbeRunner {
    storage: Arc<dyn Storage>,
    keys: Arc<[StorageKey]>,
}

impl fmt::Debug for ProbeRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProbeRunner")
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

impl ProbeRunner {
    /// Create a runner over `storage` using the fixed probe key set.
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            keys: probe_keys().into(),
        }
    }

    /// Spawn both loops on the current runtime.
    #[must_use]
    pub fn start(self) -> RunningProbe {
        let source = CancellationSource::new();
        let reader_stats = Arc::new(LoopStats::new(ProbeSide::Reader));
        let writer_stats = Arc::new(LoopStats::new(ProbeSide::Writer));

        let reader = tokio::spawn(reader_loop(
            Arc::clone(&self.storage),
            Arc::clone(&self.keys),
            source.signal(),
            Arc::clone(&reader_stats),
        ));
        let writer = tokio::spawn(writer_loop(
            Arc::clone(&self.storage),
            source.signal(),
            Arc::clone(&writer_stats),
        ));

        info!(keys = ?self.keys, "Reader and writer loops started");

        RunningProbe {
            source,
            reader,
            writer,
            reader_stats,
            writer_stats,
        }
    }
}

/// Handle to a started probe.
#[derive(Debug)]
pub struct RunningProbe {
    source: CancellationSource,
    reader: JoinHandle<LoopExit>,
    writer: JoinHandle<LoopExit>,
    reader_stats: Arc<LoopStats>,
    writer_stats: Arc<LoopStats>,
}

impl RunningProbe {
    /// Request cooperative cancellation of both loops.
    ///
    /// Returns `true` only for the first call.
    pub fn cancel(&self) -> bool {
        let first = self.source.cancel();
        if first {
            info!("Cancellation requested");
        }
        first
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.source.is_cancelled()
    }

    /// Live reader counters.
    #[must_use]
    pub fn reader_stats(&self) -> &LoopStats {
        &self.reader_stats
    }

    /// Live writer counters.
    #[must_use]
    pub fn writer_stats(&self) -> &LoopStats {
        &self.writer_stats
    }

    /// Cancel (if not already cancelled) and wait for both loops to return.
    ///
    /// # Errors
    /// Returns [`ProbeError::LoopPanicked`] if either task panicked. Cancellation
    /// itself is never an error here.
    pub async fn stop(self) -> ProbeResult<ProbeReport> {
        self.cancel();

        let (reader, writer) = tokio::join!(self.reader, self.writer);
        let reader = reader.map_err(|source| ProbeError::LoopPanicked {
            side: ProbeSide::Reader,
            source,
        })?;
        let writer = writer.map_err(|source| ProbeError::LoopPanicked {
            side: ProbeSide::Writer,
            source,
        })?;

        Ok(ProbeReport {
            reader,
            writer,
            reader_summary: self.reader_stats.snapshot(),
            writer_summary: self.writer_stats.snapshot(),
        })
    }
}
