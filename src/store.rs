use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use crate::config::ReadPolicy;
use crate::engines::KvsEngine;
use crate::{KvError, Result};

/// Shared front of the storage engine used by every worker.
///
/// Writes take the exclusive side of a readers-writer lock, so at most one
/// `put` is inside the engine at any time. Reads never wait on other reads;
/// under [`ReadPolicy::Shared`] they wait for an in-flight write to finish,
/// under [`ReadPolicy::Unsynchronized`] they do not.
pub struct Store<E: KvsEngine> {
    engine: E,
    lock: RwLock<()>,
    read_policy: ReadPolicy,
    closed: AtomicBool,
}

impl<E: KvsEngine> Store<E> {
    /// Wraps an opened engine.
    pub fn new(engine: E, read_policy: ReadPolicy) -> Self {
        Self {
            engine,
            lock: RwLock::new(()),
            read_policy,
            closed: AtomicBool::new(false),
        }
    }

    /// Gets the value of `key`, `None` if it was never written.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = match self.read_policy {
            ReadPolicy::Shared => Some(self.lock.read().unwrap_or_else(PoisonError::into_inner)),
            ReadPolicy::Unsynchronized => None,
        };
        self.ensure_open()?;
        self.engine.get(key)
    }

    /// Writes `value` under `key` while holding the writer lock.
    pub fn put(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.lock.write().unwrap_or_else(PoisonError::into_inner);
        self.ensure_open()?;
        self.engine.put(key, value)
    }

    /// Flushes the engine and rejects every later request.
    ///
    /// Waits for an in-flight write to finish. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        let _guard = self.lock.write().unwrap_or_else(PoisonError::into_inner);
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.engine.flush()
    }

    /// Returns `true` once [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Borrows the underlying engine.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(KvError::StoreClosed)
        } else {
            Ok(())
        }
    }
}
