//! # Recording Chunk Buffer
//!
//! Collects the chunks produced by a capture stream, in arrival order, until the
//! recording stops and they are concatenated into one audio unit.
//!
//! ## Key Features:
//! - **Ordered**: chunks are kept exactly as they arrived
//! - **Bounded**: a recording can never grow past `max_bytes`; extra chunks are dropped
//!   and counted rather than silently growing memory

use std::collections::VecDeque;

/// Ordered buffer of recorded chunks with a byte ceiling.
#[derive(Debug)]
pub struct ChunkBuffer {
    chunks: VecDeque<Vec<u8>>,
    total_bytes: usize,
    max_bytes: usize,
    dropped_bytes: usize,
}

impl ChunkBuffer {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            total_bytes: 0,
            max_bytes,
            dropped_bytes: 0,
        }
    }

    /// Append one chunk.
    ///
    /// Returns `false` (and keeps nothing) if the chunk would push the buffer past its
    /// ceiling. Empty chunks are ignored.
    pub fn push(&mut self, chunk: Vec<u8>) -> bool {
        if chunk.is_empty() {
            return true;
        }
        if self.total_bytes + chunk.len() > self.max_bytes {
            self.dropped_bytes += chunk.len();
            return false;
        }
        self.total_bytes += chunk.len();
        self.chunks.push_back(chunk);
        true
    }

    /// Concatenate all chunks in order and reset the buffer.
    pub fn take(&mut self) -> Vec<u8> {
        let mut unit = Vec::with_capacity(self.total_bytes);
        for chunk in self.chunks.drain(..) {
            unit.extend_from_slice(&chunk);
        }
        self.total_bytes = 0;
        self.dropped_bytes = 0;
        unit
    }

    pub fn len(&self) -> usize {
        self.total_bytes
    }

    pub fn is_empty(&self) -> bool {
        self.total_bytes == 0
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Bytes rejected since the last `take`.
    pub fn dropped_bytes(&self) -> usize {
        self.dropped_bytes
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.total_bytes = 0;
        self.dropped_bytes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_concatenates_in_order() {
        let mut buffer = ChunkBuffer::new(1024);
        buffer.push(vec![1, 2]);
        buffer.push(vec![]);
        buffer.push(vec![3]);
        buffer.push(vec![4, 5, 6]);
        assert_eq!(buffer.chunk_count(), 3);
        assert_eq!(buffer.len(), 6);

        assert_eq!(buffer.take(), vec![1, 2, 3, 4, 5, 6]);
        assert!(buffer.is_empty());
        assert_eq!(buffer.take(), Vec::<u8>::new());
    }

    #[test]
    fn test_ceiling_drops_overflowing_chunks() {
        let mut buffer = ChunkBuffer::new(4);
        assert!(buffer.push(vec![0; 3]));
        assert!(!buffer.push(vec![0; 2]));
        assert!(buffer.push(vec![9]));
        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.dropped_bytes(), 2);
        assert_eq!(buffer.take(), vec![0, 0, 0, 9]);
        assert_eq!(buffer.dropped_bytes(), 0);
    }
}
