//! Chunk lookahead buffer
//!
//! A fixed-depth FIFO that holds input bytes back from the state machine so
//! that chunk magics and first-byte predicates can be tested against bytes
//! that have not been committed to a span yet. Implemented as a ring buffer
//! over a fixed array: once full, every push hands back the oldest byte.

use tracing::trace;

/// Number of bytes held back; also the length of chunk magics
pub const LOOKAHEAD_DEPTH: usize = 4;

/// Fixed-capacity lookahead FIFO
#[derive(Debug, Clone, Default)]
pub struct Lookahead {
    /// Ring storage
    bytes: [u8; LOOKAHEAD_DEPTH],
    /// Index of the oldest byte
    head: usize,
    /// Number of bytes currently buffered
    len: usize,
}

impl Lookahead {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == LOOKAHEAD_DEPTH
    }

    /// Append a byte. Returns the evicted oldest byte once the buffer
    /// overflows, or `None` while it is still filling up.
    pub fn push(&mut self, byte: u8) -> Option<u8> {
        trace!("pushing {:#04x} on lookahead buffer", byte);

        if self.len < LOOKAHEAD_DEPTH {
            let idx = (self.head + self.len) % LOOKAHEAD_DEPTH;
            self.bytes[idx] = byte;
            self.len += 1;
            return None;
        }

        // Full: the new byte takes the oldest byte's slot
        let out = self.bytes[self.head];
        self.bytes[self.head] = byte;
        self.head = (self.head + 1) % LOOKAHEAD_DEPTH;
        Some(out)
    }

    /// Force out the oldest byte regardless of fill level (end-of-input drain)
    pub fn evict(&mut self) -> Option<u8> {
        if self.len == 0 {
            return None;
        }
        let out = self.bytes[self.head];
        self.head = (self.head + 1) % LOOKAHEAD_DEPTH;
        self.len -= 1;
        Some(out)
    }

    /// The oldest buffered byte, i.e. the next byte to be delivered
    pub fn peek(&self) -> Option<u8> {
        if self.len == 0 {
            None
        } else {
            Some(self.bytes[self.head])
        }
    }

    /// The full window in delivery order, if the buffer is full
    pub fn window(&self) -> Option<[u8; LOOKAHEAD_DEPTH]> {
        if !self.is_full() {
            return None;
        }
        let mut out = [0u8; LOOKAHEAD_DEPTH];
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = self.bytes[(self.head + i) % LOOKAHEAD_DEPTH];
        }
        Some(out)
    }

    /// Whether the full window equals `magic`
    pub fn matches(&self, magic: &[u8; LOOKAHEAD_DEPTH]) -> bool {
        self.window().as_ref() == Some(magic)
    }
}
