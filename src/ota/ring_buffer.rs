//! Fixed-capacity receive ring buffer.
//!
//! Absorbs transport deliveries until the frame decoder can consume them.
//! When full, the oldest bytes are overwritten: a lossy degradation under
//! backpressure that corrupts frame boundaries but never stalls the link.
//! Any overflow during a transfer surfaces later as a size mismatch or a
//! rejected frame, never as a silent success.
//!
//! ```text
//!   tail (next read)          head (next write)
//!    │                         │
//!  ┌─▼─────────────────────────▼──────────┐
//!  │ . . X X X X X X X X X X X . . . . .  │   count = head - tail (mod C)
//!  └──────────────────────────────────────┘
//! ```

/// Byte queue with overwrite-oldest semantics.
pub struct RingBuffer<const C: usize> {
    storage: [u8; C],
    head: usize,
    tail: usize,
    count: usize,
}

impl<const C: usize> RingBuffer<C> {
    pub const fn new() -> Self {
        Self {
            storage: [0; C],
            head: 0,
            tail: 0,
            count: 0,
        }
    }

    pub const fn capacity(&self) -> usize {
        C
    }

    /// Bytes available for reading.
    pub const fn len(&self) -> usize {
        self.count
    }

    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Copy all of `data` in. Returns how many of the oldest buffered bytes
    /// were discarded to make room (0 when nothing overflowed).
    pub fn append(&mut self, data: &[u8]) -> usize {
        let mut dropped = 0;
        for &byte in data {
            self.storage[self.head] = byte;
            self.head = (self.head + 1) % C;
            if self.count < C {
                self.count += 1;
            } else {
                self.tail = (self.tail + 1) % C;
                dropped += 1;
            }
        }
        dropped
    }

    /// Copy up to `out.len()` bytes without consuming them.
    /// Returns the number of bytes copied.
    pub fn peek(&self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.count);
        let first = n.min(C - self.tail);
        out[..first].copy_from_slice(&self.storage[self.tail..self.tail + first]);
        out[first..n].copy_from_slice(&self.storage[..n - first]);
        n
    }

    /// Like [`peek`](Self::peek) but consumes the copied bytes.
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let n = self.peek(out);
        self.consume(n);
        n
    }

    /// Drop up to `n` bytes from the front. Returns the number dropped.
    pub fn consume(&mut self, n: usize) -> usize {
        let n = n.min(self.count);
        self.tail = (self.tail + n) % C;
        self.count -= n;
        n
    }

    /// Byte at `offset` from the front, if buffered.
    pub fn get(&self, offset: usize) -> Option<u8> {
        (offset < self.count).then(|| self.storage[(self.tail + offset) % C])
    }

    /// Reset to empty and zero the storage so stale image bytes cannot be
    /// re-read by a later session.
    pub fn clear(&mut self) {
        self.storage.fill(0);
        self.head = 0;
        self.tail = 0;
        self.count = 0;
    }
}

impl<const C: usize> Default for RingBuffer<C> {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────
