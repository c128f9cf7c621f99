//! A lightweight pub/sub message broker.
//!
//! Publishers send `"<topic> <payload>"` requests to the ingestion endpoint
//! and receive an acknowledgement; the broker fans each publication out to
//! subscribers on the publish endpoint, optionally logging it to a
//! memory-mapped ring buffer and to a durable store.

pub mod broker;
pub mod client;
pub mod config;
pub mod error;
pub mod module;
pub mod publication;
pub mod queue;
pub mod store;
mod subscription;

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

pub use broker::health::{HealthLevel, HealthMonitor, RECORD_CEILING};
pub use broker::ring_buffer::{RingBufferLog, DEFAULT_CAPACITY, HEADER_SIZE};
pub use broker::{Broker, StatusHandle};
pub use client::{Publisher, Subscriber};
pub use config::{BrokerConfig, BrokerOptions};
pub use error::{Error, Result};
pub use module::{ExtensionModule, ModuleContext, StatusReporter};
pub use publication::{AckState, Publication, DEFAULT_PRIORITY};
pub use queue::DispatchQueue;
pub use store::{DurableStore, JsonLinesStore, MemoryStore, TopicRecord};

/// Unique identifier for a client connection
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ClientId(Uuid);

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientId {
    /// Create a new random client ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the string representation of the client ID
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

/// Statistics about the broker's operation
#[derive(Debug, Clone, Serialize)]
pub struct BrokerStats {
    /// Current health level
    pub health: HealthLevel,
    /// Publications accepted by the ingestion endpoint
    pub records_in_memory: u64,
    /// Publications written to a durable sink
    pub records_persisted: u64,
    /// Publications waiting for dispatch
    pub queue_depth: usize,
    /// Ring buffer cursor, when the log is enabled
    pub write_position: Option<usize>,
    /// Ring buffer data capacity, when the log is enabled
    pub capacity: Option<usize>,
    /// Time since the broker was built
    pub uptime: Duration,
    /// Enabled durable sinks
    pub sinks: Vec<&'static str>,
}
