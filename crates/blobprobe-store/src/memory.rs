//! In-process storage backend with latency and fault injection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::cancel::CancellationSignal;
use crate::error::{StorageError, StorageResult};
use crate::storage::{ETAG_FIELD, Record, Storage, StorageKey, record_etag};

/// Operation counters for a [`MemoryStorage`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStorageStats {
    /// Read calls accepted (including ones that then failed).
    pub reads: u64,
    /// Write calls accepted (including ones that then failed).
    pub writes: u64,
    /// Delete calls accepted.
    pub deletes: u64,
}

#[derive(Debug)]
struct Entry {
    record: Record,
    etag: u64,
}

/// Storage kept in a process-local map.
///
/// ETags are a per-store counter rendered as a quoted string, so conditional
/// writes behave like the blob backend's. Every call yields to the scheduler
/// at least once, which keeps tight probe loops cooperative.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<HashMap<StorageKey, Entry>>,
    next_etag: AtomicU64,
    latency: Mutex<Option<Duration>>,
    fail_reads: AtomicU32,
    fail_writes: AtomicU32,
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
}

impl MemoryStorage {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: delay every operation by `latency`.
    #[must_use]
    pub fn with_latency(self, latency: Duration) -> Self {
        *self.latency.lock() = Some(latency);
        self
    }

    /// Change the per-operation latency of a running store.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Make the next `count` reads fail with [`StorageError::Injected`].
    pub fn fail_next_reads(&self, count: u32) {
        self.fail_reads.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` writes fail with [`StorageError::Injected`].
    pub fn fail_next_writes(&self, count: u32) {
        self.fail_writes.store(count, Ordering::SeqCst);
    }

    /// Snapshot of the operation counters.
    #[must_use]
    pub fn stats(&self) -> MemoryStorageStats {
        MemoryStorageStats {
            reads: self.reads.load(Ordering::SeqCst),
            writes: self.writes.load(Ordering::SeqCst),
            deletes: self.deletes.load(Ordering::SeqCst),
        }
    }

    /// Number of keys currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the store holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    async fn simulate_io(&self, cancel: &CancellationSignal) -> StorageResult<()> {
        let latency = *self.latency.lock();
        match latency {
            Some(delay) => cancel.run_until_cancelled(tokio::time::sleep(delay)).await,
            None => cancel.run_until_cancelled(tokio::task::yield_now()).await,
        }
    }

    fn take_fault(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }

    fn render_etag(etag: u64) -> String {
        format!("\"{etag}\"")
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn read(
        &self,
        keys: &[StorageKey],
        cancel: &CancellationSignal,
    ) -> StorageResult<HashMap<StorageKey, Record>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.simulate_io(cancel).await?;
        if Self::take_fault(&self.fail_reads) {
            return Err(StorageError::Injected("read".into()));
        }

        let entries = self.entries.read();
        Ok(keys
            .iter()
            .filter_map(|key| {
                entries.get(key).map(|entry| {
                    let mut record = entry.record.clone();
                    record.insert(
                        ETAG_FIELD.to_string(),
                        Self::render_etag(entry.etag).into(),
                    );
                    (key.clone(), record)
                })
            })
            .collect())
    }

    async fn write(
        &self,
        changes: &HashMap<StorageKey, Record>,
        cancel: &CancellationSignal,
    ) -> StorageResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.simulate_io(cancel).await?;
        if Self::take_fault(&self.fail_writes) {
            return Err(StorageError::Injected("write".into()));
        }

        let mut entries = self.entries.write();
        for (key, record) in changes {
            if let Some(expected) = record_etag(record) {
                let current = entries.get(key).map(|entry| Self::render_etag(entry.etag));
                if current.as_deref() != Some(expected) {
                    return Err(StorageError::PreconditionFailed {
                        key: key.to_string(),
                    });
                }
            }
        }
        for (key, record) in changes {
            let etag = self.next_etag.fetch_add(1, Ordering::SeqCst) + 1;
            let mut record = record.clone();
            record.remove(ETAG_FIELD);
            entries.insert(key.clone(), Entry { record, etag });
        }
        Ok(())
    }

    async fn delete(&self, keys: &[StorageKey], cancel: &CancellationSignal) -> StorageResult<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.simulate_io(cancel).await?;

        let mut entries = self.entries.write();
        for key in keys {
            entries.remove(key);
        }
        Ok(())
    }
}
