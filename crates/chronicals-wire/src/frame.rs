//! Socket-level framing.
//!
//! Every WebSocket text message is one [`Frame`]. `Message` frames carry an
//! opaque payload string and are acked by the receiver; payloads above the
//! sender's chunk threshold travel as a run of `Chunk` frames that the
//! receiver reassembles by `messageId` in `seq` order. Each chunk frame is
//! acked individually, so a sender knows the whole payload arrived once
//! every chunk ack is in.

use serde::{Deserialize, Serialize};

/// A single socket frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Frame {
    /// A whole payload in one frame. Receiver responds with `Ack { id }`.
    Message { id: String, data: String },
    /// Delivery confirmation for a `Message` or `Chunk` frame.
    Ack { id: String },
    /// One ordered piece of a payload too large for a single frame.
    #[serde(rename_all = "camelCase")]
    Chunk {
        /// Frame id, acked like a `Message` id.
        id: String,
        /// Id of the logical message this chunk belongs to.
        message_id: String,
        /// Zero-based position of this chunk.
        seq: u32,
        /// Total number of chunks in the logical message.
        total: u32,
        /// The payload slice.
        part: String,
    },
}

impl Frame {
    /// Serialize for the wire.
    pub fn to_json(&self) -> String {
        // Frame contains only strings and integers; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Parse a frame off the wire.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// Split a payload into chunk parts no longer than `chunk_size` bytes.
///
/// Splits on char boundaries so each part remains valid UTF-8. Returns a
/// single-element vector when the payload already fits.
pub fn split_into_parts(payload: &str, chunk_size: usize) -> Vec<String> {
    if payload.len() <= chunk_size {
        return vec![payload.to_string()];
    }
    let mut parts = Vec::new();
    let mut rest = payload;
    while !rest.is_empty() {
        let mut end = chunk_size.min(rest.len());
        while end < rest.len() && !rest.is_char_boundary(end) {
            end -= 1;
        }
        let (part, tail) = rest.split_at(end);
        parts.push(part.to_string());
        rest = tail;
    }
    parts
}

/// Reassembly buffer for one in-flight chunked message.
#[derive(Debug, Default)]
pub struct ChunkBuffer {
    parts: Vec<Option<String>>,
    received: u32,
}

impl ChunkBuffer {
    /// Record one chunk. Returns the reassembled payload once all chunks
    /// for the message have arrived.
    pub fn accept(&mut self, seq: u32, total: u32, part: String) -> Option<String> {
        if self.parts.len() != total as usize {
            self.parts.resize(total as usize, None);
        }
        let slot = self.parts.get_mut(seq as usize)?;
        if slot.is_none() {
            *slot = Some(part);
            self.received += 1;
        }
        if self.received == total {
            let mut out = String::new();
            for p in self.parts.drain(..) {
                out.push_str(&p?);
            }
            Some(out)
        } else {
            None
        }
    }
}
