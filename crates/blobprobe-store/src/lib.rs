//! Blob-backed key/value storage collaborators.
//!
//! This crate provides:
//! - [`Storage`]: the read/write/delete contract the probe exercises
//! - [`AzureBlobStorage`]: one JSON blob per key in an Azure Blob Storage container
//! - [`MemoryStorage`]: an in-process backend with latency and fault injection
//! - [`CancellationSource`] / [`CancellationSignal`]: one-way cooperative cancellation
//!
//! Every operation takes a [`CancellationSignal`]. When the signal fires while an
//! operation is waiting on the backend, the wait is abandoned and the operation
//! returns [`StorageError::Cancelled`] instead of a generic failure.
//!
//! # Example
//!
//! ```ignore
//! use blobprobe_store::{CancellationSource, MemoryStorage, Record, Storage, StorageKey};
//!
//! let storage = MemoryStorage::new();
//! let source = CancellationSource::new();
//! let key = StorageKey::new("greeting");
//!
//! let mut record = Record::new();
//! record.insert("text".into(), "hello".into());
//! storage.write(&[(key.clone(), record)].into(), &source.signal()).await?;
//!
//! let found = storage.read(&[key], &source.signal()).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod azure;
mod cancel;
mod error;
mod memory;
mod storage;

pub mod auth;
pub mod connection;

pub use azure::{AzureBlobStorage, blob_name_for_key, validate_container_name};
pub use cancel::{CancellationSignal, CancellationSource};
pub use error::{StorageError, StorageResult};
pub use memory::{MemoryStorage, MemoryStorageStats};
pub use storage::{ETAG_FIELD, Record, Storage, StorageKey, record_etag};
