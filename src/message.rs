//! Message envelope.
//!
//! The unit of data moving through the router: an opaque identifier, a byte
//! payload, and a string metadata map. Handlers and middleware communicate
//! context (failure reasons, originating binding) through metadata rather
//! than by wrapping the payload.

use std::borrow::Cow;
use std::collections::HashMap;

use bytes::Bytes;
use uuid::Uuid;

/// A single message flowing between topics.
///
/// Identifier uniqueness is the producer's responsibility; the router never
/// deduplicates. Payloads are [`Bytes`] so fan-out to multiple subscribers
/// clones cheaply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Opaque identifier. Auto-generated (v4) by [`Message::new`].
    pub uuid: String,
    /// Raw payload bytes.
    pub payload: Bytes,
    /// Key/value context attached to the message.
    pub metadata: HashMap<String, String>,
}

impl Message {
    /// Create a message with a fresh v4 uuid and the given payload.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), payload)
    }

    /// Create a message with a caller-chosen identifier.
    pub fn with_id(uuid: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            uuid: uuid.into(),
            payload: payload.into(),
            metadata: HashMap::new(),
        }
    }

    /// Attach a metadata entry, builder style.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Set a metadata entry, returning the previous value if one existed.
    pub fn set_metadata(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Option<String> {
        self.metadata.insert(key.into(), value.into())
    }

    /// Payload interpreted as UTF-8, with invalid sequences replaced.
    pub fn payload_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}
