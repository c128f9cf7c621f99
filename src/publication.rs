//! Publications and their two encodings: the text request/frame format used on
//! the endpoints, and the binary record appended to the ring buffer log.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Priority given to publications that do not carry one
pub const DEFAULT_PRIORITY: i32 = 4;

/// Record field separator in the ring buffer log
const FIELD_SEPARATOR: u8 = 0x00;
/// Record terminator in the ring buffer log
const RECORD_TERMINATOR: u8 = b'\n';

/// Acknowledgement state of a publication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum AckState {
    Pending = 0,
    Ack = 1,
    Rejected = 2,
    Reload = 3,
}

impl AckState {
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A routed message unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publication {
    topic: String,
    payload: String,
    priority: i32,
    state: AckState,
}

impl Publication {
    /// Create a pending publication with the default priority
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self::with_priority(topic, payload, DEFAULT_PRIORITY)
    }

    /// Create a pending publication with an explicit priority
    pub fn with_priority(topic: impl Into<String>, payload: impl Into<String>, priority: i32) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            priority,
            state: AckState::Pending,
        }
    }

    /// Parse an ingestion request.
    ///
    /// Without priorities the request is `"<topic> <payload>"`. With priorities
    /// it is `"<topic> <priority> <payload>"`; when the second token is not an
    /// integer it is dropped and the default priority applies. A request with
    /// a single token becomes a topic with an empty payload.
    pub fn parse_request(request: &str, priority_enabled: bool) -> Self {
        let blocks: Vec<&str> = request.split(' ').collect();

        if blocks.len() < 2 {
            return Self::new(request, "");
        }
        if !priority_enabled || blocks.len() == 2 {
            return Self::new(blocks[0], blocks[1..].join(" "));
        }

        match blocks[1].parse::<i32>() {
            Ok(priority) => Self::with_priority(blocks[0], blocks[2..].join(" "), priority),
            Err(_) => Self::new(blocks[0], blocks[2..].join(" ")),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn state(&self) -> AckState {
        self.state
    }

    /// Mark the publication as acknowledged once it left the publish path
    pub fn acknowledge(&mut self) {
        self.state = AckState::Ack;
    }

    /// Text frame broadcast to subscribers
    pub fn frame(&self) -> String {
        format!("{} {}", self.topic, self.payload)
    }

    /// Length of the binary record without building it
    pub fn record_len(&self) -> usize {
        self.topic.len() + self.payload.len() + 4
    }

    /// Binary record: `topic 0x00 payload 0x00 state 0x0A`
    pub fn to_record(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.record_len());
        buf.put_slice(self.topic.as_bytes());
        buf.put_u8(FIELD_SEPARATOR);
        buf.put_slice(self.payload.as_bytes());
        buf.put_u8(FIELD_SEPARATOR);
        buf.put_u8(self.state.as_byte());
        buf.put_u8(RECORD_TERMINATOR);
        buf.freeze()
    }
}

impl fmt::Display for Publication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.topic, self.payload)
    }
}
