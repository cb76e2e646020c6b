//! Concurrent read/write soak probe for blob-backed key/value storage.
//!
//! Two independent loops hammer one storage backend until the operator stops
//! them: a reader repeatedly reads a fixed key set and a writer repeatedly
//! writes a fresh [`record::ProbeRecord`] under the same key. Backend failures
//! are logged and never stop either loop; only cancellation does.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod logging;
pub mod record;
pub mod runner;
pub mod stop;

pub use config::{ConfigError, ProbeArgs, ProbeConfig};
pub use record::{PROBE_KEY, ProbeRecord, probe_keys};
pub use runner::{
    IterationOutcome, LoopExit, LoopState, LoopStats, LoopSummary, LoopTermination, ProbeError,
    ProbeReport, ProbeResult, ProbeRunner, ProbeSide, RunningProbe,
};
pub use stop::StopTrigger;
