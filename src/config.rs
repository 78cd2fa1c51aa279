//! Server configuration.
//!
//! Defaults match the classic deployment: port 6767, ten queue slots, ten
//! workers. A JSON file can override any subset of fields.

use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::engines::{EngineOptions, OpenMode};
use crate::protocol::{FieldLimits, DEFAULT_KEY_MAX, DEFAULT_VALUE_MAX};
use crate::{KvError, Result};

/// Default listening port.
pub const DEFAULT_PORT: u16 = 6767;

/// Whether reads share a readers-writer lock with writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ReadPolicy {
    /// Reads take the shared side of the store lock and never overlap a write.
    #[default]
    Shared,
    /// Reads bypass the store lock and may overlap a write.
    Unsynchronized,
}

/// What happens to queued and in-flight connections on shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownMode {
    /// Let workers finish queued work until the drain timeout expires.
    #[default]
    Drain,
    /// Drop queued connections at once and detach the workers.
    Immediate,
}

/// Startup configuration of [`KvsServer`](crate::KvsServer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind.
    pub host: IpAddr,
    /// Port to listen on.
    pub port: u16,
    /// Slots in the accepted-connection queue.
    pub queue_capacity: usize,
    /// Number of worker threads.
    pub worker_count: usize,
    /// Location of the on-disk store.
    pub store_path: PathBuf,
    /// Maximum key length in bytes.
    pub key_max: usize,
    /// Maximum value length in bytes.
    pub value_max: usize,
    /// How the store is opened.
    pub open_mode: OpenMode,
    /// Locking discipline for reads.
    pub read_policy: ReadPolicy,
    /// Shutdown behavior.
    pub shutdown_mode: ShutdownMode,
    /// Upper bound on the drain phase, in milliseconds.
    pub drain_timeout_ms: u64,
    /// Socket read timeout per connection, in milliseconds; 0 disables it.
    pub read_timeout_ms: u64,
    /// Socket write timeout per connection, in milliseconds; 0 disables it.
    pub write_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            queue_capacity: 10,
            worker_count: 10,
            store_path: PathBuf::from("kvs.db"),
            key_max: DEFAULT_KEY_MAX,
            value_max: DEFAULT_VALUE_MAX,
            open_mode: OpenMode::ReadWriteCreate,
            read_policy: ReadPolicy::Shared,
            shutdown_mode: ShutdownMode::Drain,
            drain_timeout_ms: 5000,
            read_timeout_ms: 5000,
            write_timeout_ms: 5000,
        }
    }
}

impl ServerConfig {
    /// Loads a configuration from a JSON file; missing fields take defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Checks the invariants the server relies on.
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity < 2 {
            return Err(KvError::Config(format!(
                "queue_capacity must be at least 2, got {}",
                self.queue_capacity
            )));
        }
        if self.worker_count == 0 {
            return Err(KvError::Config("worker_count must be at least 1".to_owned()));
        }
        if self.key_max == 0 || self.value_max == 0 {
            return Err(KvError::Config(
                "key_max and value_max must be non-zero".to_owned(),
            ));
        }
        Ok(())
    }

    /// Address the listener binds.
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Protocol field limits.
    pub fn limits(&self) -> FieldLimits {
        FieldLimits {
            key_max: self.key_max,
            value_max: self.value_max,
        }
    }

    /// Options for opening the storage engine.
    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            mode: self.open_mode,
            limits: self.limits(),
        }
    }

    /// Drain phase deadline.
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// Per-connection read timeout.
    pub fn read_timeout(&self) -> Option<Duration> {
        (self.read_timeout_ms > 0).then(|| Duration::from_millis(self.read_timeout_ms))
    }

    /// Per-connection write timeout.
    pub fn write_timeout(&self) -> Option<Duration> {
        (self.write_timeout_ms > 0).then(|| Duration::from_millis(self.write_timeout_ms))
    }
}
