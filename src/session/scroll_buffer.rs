//! Terminal scrollback buffer
//!
//! Bounded FIFO of raw output chunks kept per session so that a freshly
//! bound widget can be restored to what the user saw before navigating away:
//! - Configurable max chunks (default 1,000)
//! - Oldest chunks are evicted first on overflow
//! - Replay in original order
//!
//! The buffer lives inside the registry entry and is only touched under the
//! registry lock, so it needs no synchronization of its own.

use std::collections::VecDeque;

/// Default maximum chunks to keep in buffer
pub const DEFAULT_MAX_CHUNKS: usize = 1_000;

/// Bounded scrollback of output chunks
#[derive(Debug, Clone)]
pub struct ScrollBuffer {
    chunks: VecDeque<String>,
    max_chunks: usize,
}

impl ScrollBuffer {
    /// Create a new scroll buffer with default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_CHUNKS)
    }

    /// Create a new scroll buffer with specified capacity
    pub fn with_capacity(max_chunks: usize) -> Self {
        Self {
            chunks: VecDeque::with_capacity(max_chunks.min(1024)),
            max_chunks,
        }
    }

    /// Append a chunk, evicting the oldest if the buffer is full
    pub fn append(&mut self, chunk: impl Into<String>) {
        if self.max_chunks == 0 {
            return;
        }

        while self.chunks.len() >= self.max_chunks {
            self.chunks.pop_front();
        }
        self.chunks.push_back(chunk.into());
    }

    /// Chunks in original order, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.chunks.iter().map(String::as_str)
    }

    /// Copy of the current contents, oldest first
    pub fn snapshot(&self) -> Vec<String> {
        self.chunks.iter().cloned().collect()
    }

    /// Clear all chunks from the buffer
    pub fn clear(&mut self) {
        self.chunks.clear();
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn max_chunks(&self) -> usize {
        self.max_chunks
    }
}

impl Default for ScrollBuffer {
    fn default() -> Self {
        Self::new()
    }
}
