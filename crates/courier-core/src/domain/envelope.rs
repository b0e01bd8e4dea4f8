//! Envelope - delivery から取り出した (identifier, payload) の組
//!
//! wire format の違いは `typed::codec::Marshal` が吸収し、
//! consumer は Envelope だけを見ます。

use super::ids::MessageId;
use crate::ports::IdGenerator;

/// Identifier + opaque payload of one message. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    id: MessageId,
    payload: Vec<u8>,
}

impl Envelope {
    pub fn new(id: MessageId, payload: Vec<u8>) -> Self {
        Self { id, payload }
    }

    /// Build an envelope for publishing, with a freshly generated id.
    pub fn generate(ids: &dyn IdGenerator, payload: Vec<u8>) -> Self {
        Self::new(ids.generate_message_id(), payload)
    }

    pub fn id(&self) -> &MessageId {
        &self.id
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_parts(self) -> (MessageId, Vec<u8>) {
        (self.id, self.payload)
    }
}
