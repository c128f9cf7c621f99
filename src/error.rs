use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to bind {endpoint} endpoint on {addr}: {source}")]
    Bind {
        endpoint: &'static str,
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Ring buffer capacity must exceed the header size, got {0}")]
    InvalidCapacity(usize),

    #[error("Record of {len} bytes does not fit a ring buffer of capacity {capacity}")]
    RecordTooLarge { len: usize, capacity: usize },

    #[error("Durable store error: {0}")]
    Store(String),

    #[error("Failed to serialize record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Module {name} failed: {reason}")]
    Module { name: String, reason: String },

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Operation timeout")]
    Timeout,
}

pub type Result<T> = std::result::Result<T, Error>;
