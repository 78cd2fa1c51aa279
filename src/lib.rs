#![deny(missing_docs)]

//! A multi-threaded key-value server over a plain-text TCP protocol.
//!
//! A single acceptor thread admits connections into a bounded FIFO queue and
//! blocks while it is full, which throttles bursts of clients. A fixed pool of
//! workers drains the queue; each serves exactly one `GET`/`PUT` request per
//! connection against a persistent engine, with writes serialized by a writer
//! lock and reads left concurrent. Waiting and service times are collected and
//! reported on shutdown.

mod client;
mod config;
mod engines;
mod error;
mod load;
pub mod protocol;
mod queue;
mod server;
mod stats;
mod store;
mod worker;

pub use client::KvsClient;
pub use config::{ReadPolicy, ServerConfig, ShutdownMode, DEFAULT_PORT};
pub use engines::{EngineOptions, KvsEngine, OpenMode, SledKvsEngine};
pub use error::{KvError, Result};
pub use load::{LoadGenerator, LoadMode, LoadSummary, MAX_STATION_ID};
pub use protocol::{FieldLimits, Request, Response};
pub use queue::{BoundedQueue, Closed};
pub use server::{KvsServer, ServerContext, ShutdownHandle};
pub use stats::{ServerStats, StatsSnapshot};
pub use store::Store;
pub use worker::{execute, PendingConnection, WorkerPool};
