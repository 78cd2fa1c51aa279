use std::io;
use std::string::FromUtf8Error;

use thiserror::Error;

/// Error type for kvs operations.
#[derive(Error, Debug)]
pub enum KvError {
    /// IO error from sockets or files.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Serialization/deserialization error.
    #[error("Serde error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Error reported by the sled engine.
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    /// Stored bytes were not valid UTF-8.
    #[error("UTF-8 error: {0}")]
    Utf8(#[from] FromUtf8Error),

    /// Invalid server or client configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The store on disk was created with different field limits.
    #[error("Store limits mismatch: {0}")]
    LimitsMismatch(String),

    /// A write was attempted on a store opened read-only.
    #[error("Store is opened read-only")]
    ReadOnly,

    /// The store has already been closed.
    #[error("Store is closed")]
    StoreClosed,

    /// Key longer than the store allows.
    #[error("Key of {len} bytes exceeds the limit of {max}")]
    KeyTooLong {
        /// Actual length in bytes.
        len: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Value longer than the store allows.
    #[error("Value of {len} bytes exceeds the limit of {max}")]
    ValueTooLong {
        /// Actual length in bytes.
        len: usize,
        /// Configured maximum.
        max: usize,
    },

    /// The server sent a line the client could not understand.
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Error with a string message.
    #[error("{0}")]
    StringError(String),
}

/// Result type alias for kvs operations.
pub type Result<T> = std::result::Result<T, KvError>;
