//! The unit stored in every queue list.

use serde::{Deserialize, Serialize};

use crate::error::QueueResult;

/// A typed payload as stored in Redis.
///
/// The wire form is `{"name": "<type name>", "data": "<payload JSON>"}`,
/// so the payload is JSON encoded twice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Type name the payload was registered under.
    pub name: String,
    /// Payload, JSON encoded.
    pub data: String,
}

impl Envelope {
    /// Create a new envelope.
    #[must_use]
    pub const fn new(name: String, data: String) -> Self {
        Self { name, data }
    }

    /// Encode for storage.
    pub fn encode(&self) -> QueueResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a stored envelope.
    pub fn decode(raw: &str) -> QueueResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}
