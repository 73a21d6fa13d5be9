//! Frame decoder over the receive ring buffer.
//!
//! [`try_decode`] looks only at the front of the buffer and yields at most
//! one unit per call. A truncated frame leaves the buffer untouched, so
//! the caller simply retries after the next delivery. The caller loops
//! until [`Decoded::NeedMore`]:
//!
//! ```text
//!  peek tag ──┬── 0x01 ── 5 bytes? ───────────── consume 5 ─────▶ Start
//!             ├── 0x02 ── 3 bytes? ── len ≤ 1021? ─┬─ no ─ consume 3 ─▶ Malformed
//!             │                                    └─ 3+len? consume ─▶ Data
//!             ├── 0x03 ──────────────────────────── consume 1 ─────▶ End
//!             └── other ─────────────────────────── consume 1 ─────▶ Discarded
//! ```

use super::protocol::{
    CMD_DATA, CMD_END, CMD_START, ChunkPayload, DATA_HEADER_LEN, Frame, MAX_CHUNK_PAYLOAD,
    START_FRAME_LEN,
};
use super::ring_buffer::RingBuffer;

/// Result of one decode attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// Front of the buffer is empty or holds a truncated frame.
    NeedMore,
    /// A complete frame was consumed.
    Frame(Frame),
    /// A data header declared more than [`MAX_CHUNK_PAYLOAD`] bytes; only
    /// the 3-byte header was consumed.
    Malformed { declared_len: u16 },
    /// An unknown leading byte was consumed.
    Discarded(u8),
}

/// Decode at most one unit from the front of `buf`.
pub fn try_decode<const C: usize>(buf: &mut RingBuffer<C>) -> Decoded {
    let Some(tag) = buf.get(0) else {
        return Decoded::NeedMore;
    };

    match tag {
        CMD_START => {
            let mut header = [0u8; START_FRAME_LEN];
            if buf.peek(&mut header) < START_FRAME_LEN {
                return Decoded::NeedMore;
            }
            buf.consume(START_FRAME_LEN);
            let total_size = u32::from_be_bytes([header[1], header[2], header[3], header[4]]);
            Decoded::Frame(Frame::StartTransfer { total_size })
        }

        CMD_DATA => {
            let mut header = [0u8; DATA_HEADER_LEN];
            if buf.peek(&mut header) < DATA_HEADER_LEN {
                return Decoded::NeedMore;
            }
            let declared_len = u16::from_be_bytes([header[1], header[2]]);
            let len = usize::from(declared_len);

            if len > MAX_CHUNK_PAYLOAD {
                // Drop the header only; the sender is desynchronised and the
                // following bytes get resynchronised one unit at a time.
                buf.consume(DATA_HEADER_LEN);
                return Decoded::Malformed { declared_len };
            }
            if buf.len() < DATA_HEADER_LEN + len {
                return Decoded::NeedMore;
            }

            buf.consume(DATA_HEADER_LEN);
            let mut scratch = [0u8; MAX_CHUNK_PAYLOAD];
            let copied = buf.read(&mut scratch[..len]);
            match ChunkPayload::from_slice(&scratch[..copied]) {
                Ok(payload) => Decoded::Frame(Frame::DataChunk { payload }),
                Err(()) => Decoded::Malformed { declared_len },
            }
        }

        CMD_END => {
            buf.consume(1);
            Decoded::Frame(Frame::EndTransfer)
        }

        other => {
            buf.consume(1);
            Decoded::Discarded(other)
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────
