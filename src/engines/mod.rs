use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::protocol::FieldLimits;
use crate::Result;

/// Trait for a persistent key-value storage engine.
///
/// The engine only promises single-call atomicity. Concurrency discipline across
/// calls (one writer at a time, shared readers) is imposed by [`Store`] on top of it,
/// so implementors must be shareable between threads.
///
/// [`Store`]: crate::Store
pub trait KvsEngine: Send + Sync + 'static {
    /// Gets the string value of a given string key.
    ///
    /// Returns `None` if the key does not exist.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Sets the value of a string key to a string.
    ///
    /// If the key already exists, the previous value will be overwritten.
    fn put(&self, key: &str, value: &str) -> Result<()>;

    /// Flushes buffered writes to durable storage.
    fn flush(&self) -> Result<()>;
}

/// How an engine opens its backing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum OpenMode {
    /// Open an existing store; writes are rejected.
    ReadOnly,
    /// Open an existing store for reading and writing.
    ReadWrite,
    /// Open for reading and writing, creating the store if missing.
    #[default]
    ReadWriteCreate,
    /// Discard any existing store and start empty.
    ReadWriteReplace,
}

/// Parameters an engine is opened with.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineOptions {
    /// Open mode.
    pub mode: OpenMode,
    /// Key and value limits enforced on writes.
    pub limits: FieldLimits,
}

mod sled_engine;

pub use self::sled_engine::SledKvsEngine;
