//! Bounded scrollback ring for PTY output.

use std::collections::VecDeque;

/// Ring capacity: 100 KiB of most-recent output.
pub const RING_CAPACITY: usize = 100 * 1024;

/// Drop-oldest byte ring used to replay recent terminal output to newly
/// attached subscribers.
///
/// Mutated only from the PTY pump task; replayed on subscriber attach.
#[derive(Debug)]
pub struct OutputRing {
    buf: VecDeque<u8>,
    capacity: usize,
}

impl OutputRing {
    /// Creates a ring with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(RING_CAPACITY)
    }

    /// Creates a ring with a custom capacity (tests).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity.min(RING_CAPACITY)),
            capacity,
        }
    }

    /// Appends bytes, dropping the oldest on overflow.
    pub fn extend(&mut self, bytes: &[u8]) {
        if bytes.len() >= self.capacity {
            // The chunk alone fills the ring: keep only its tail.
            self.buf.clear();
            let start = bytes.len() - self.capacity;
            self.buf.extend(bytes.iter().skip(start).copied());
            return;
        }

        let overflow = (self.buf.len() + bytes.len()).saturating_sub(self.capacity);
        if overflow > 0 {
            self.buf.drain(..overflow);
        }
        self.buf.extend(bytes.iter().copied());
    }

    /// Returns the buffered bytes, oldest first.
    pub fn snapshot(&self) -> Vec<u8> {
        self.buf.iter().copied().collect()
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

impl Default for OutputRing {
    fn default() -> Self {
        Self::new()
    }
}
