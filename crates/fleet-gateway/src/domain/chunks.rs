//! Reassembly of chunked homebase messages.
//!
//! Large frames arrive as `{isChunkedMessage, messageId, chunkIndex,
//! totalChunks, data}` envelopes where `data` is a JSON substring. Buffers
//! are keyed by message id; the slot array is sized once from the first
//! chunk seen and duplicate indices are idempotent.

use std::collections::HashMap;
use thiserror::Error;

/// Upper bound on `totalChunks` accepted for a single message.
pub const MAX_TOTAL_CHUNKS: usize = 2_000;

/// Chunk envelope validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChunkError {
    /// `totalChunks` outside `[1, 2000]`
    #[error("chunk count {0} outside [1, {MAX_TOTAL_CHUNKS}]")]
    InvalidTotal(usize),

    /// `chunkIndex` not below the buffer's `totalChunks`
    #[error("chunk index {index} out of range for {total} chunks")]
    IndexOutOfRange { index: usize, total: usize },

    /// A later chunk disagreed with the buffer's `totalChunks`
    #[error("chunk count changed mid-message ({was} -> {now})")]
    TotalMismatch { was: usize, now: usize },
}

struct ChunkBuffer {
    slots: Vec<Option<String>>,
    filled: usize,
}

impl ChunkBuffer {
    fn new(total: usize) -> Self {
        Self {
            slots: vec![None; total],
            filled: 0,
        }
    }
}

/// Per-link chunk reassembler.
#[derive(Default)]
pub struct ChunkAssembler {
    buffers: HashMap<String, ChunkBuffer>,
}

impl ChunkAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept one chunk.
    ///
    /// Returns `Ok(Some(payload))` when the chunk completes its message: the
    /// concatenation of all `data` fields in index order. The buffer is
    /// removed on completion. Invalid metadata drops the buffer and returns
    /// the error.
    pub fn accept(
        &mut self,
        message_id: &str,
        chunk_index: usize,
        total_chunks: usize,
        data: &str,
    ) -> Result<Option<String>, ChunkError> {
        if !(1..=MAX_TOTAL_CHUNKS).contains(&total_chunks) {
            self.buffers.remove(message_id);
            return Err(ChunkError::InvalidTotal(total_chunks));
        }

        let buffer = self
            .buffers
            .entry(message_id.to_string())
            .or_insert_with(|| ChunkBuffer::new(total_chunks));

        if buffer.slots.len() != total_chunks {
            let was = buffer.slots.len();
            self.buffers.remove(message_id);
            return Err(ChunkError::TotalMismatch {
                was,
                now: total_chunks,
            });
        }

        if chunk_index >= total_chunks {
            self.buffers.remove(message_id);
            return Err(ChunkError::IndexOutOfRange {
                index: chunk_index,
                total: total_chunks,
            });
        }

        // Duplicate indices are idempotent
        if buffer.slots[chunk_index].is_none() {
            buffer.slots[chunk_index] = Some(data.to_string());
            buffer.filled += 1;
        }

        if buffer.filled == total_chunks {
            let buffer = self.buffers.remove(message_id).expect("buffer present");
            let mut payload = String::new();
            for slot in buffer.slots {
                payload.push_str(&slot.expect("slot filled"));
            }
            return Ok(Some(payload));
        }

        Ok(None)
    }

    /// Drop all partial buffers (link teardown).
    pub fn clear(&mut self) {
        self.buffers.clear();
    }

    /// Number of partially assembled messages.
    pub fn pending_count(&self) -> usize {
        self.buffers.len()
    }
}
