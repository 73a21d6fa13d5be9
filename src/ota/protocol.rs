//! OTA wire protocol.
//!
//! Single byte stream, no multiplexing, big-endian integers:
//! ```text
//! ┌──────┬───────────────────────────┬──────────────────────────┐
//! │ 0x01 │ total size (u32 BE)       │                          │  start
//! ├──────┼───────────────────────────┼──────────────────────────┤
//! │ 0x02 │ length L (u16 BE, ≤ 1021) │ L payload bytes          │  data
//! ├──────┼───────────────────────────┴──────────────────────────┤
//! │ 0x03 │                                                      │  end
//! └──────┴──────────────────────────────────────────────────────┘
//! replies: 0xAA = ACK, 0xFF = NAK (one byte per decoded frame)
//! ```
//!
//! Any other leading byte is a desynchronised byte: it is discarded
//! without a reply.

use core::fmt;

pub const CMD_START: u8 = 0x01;
pub const CMD_DATA: u8 = 0x02;
pub const CMD_END: u8 = 0x03;

pub const REPLY_ACK: u8 = 0xAA;
pub const REPLY_NAK: u8 = 0xFF;

/// Largest payload a single data frame may declare. Sized so a whole data
/// frame (3-byte header + payload) fits one 1024-byte SPP message.
pub const MAX_CHUNK_PAYLOAD: usize = 1021;

/// Tag + u32 size.
pub const START_FRAME_LEN: usize = 5;

/// Tag + u16 length.
pub const DATA_HEADER_LEN: usize = 3;

/// Largest encoded data frame.
pub const MAX_DATA_FRAME_LEN: usize = DATA_HEADER_LEN + MAX_CHUNK_PAYLOAD;

/// Owned chunk payload, copied out of the receive buffer.
pub type ChunkPayload = heapless::Vec<u8, MAX_CHUNK_PAYLOAD>;

/// One fully decoded protocol message.
#[derive(Clone, PartialEq, Eq)]
pub enum Frame {
    StartTransfer { total_size: u32 },
    DataChunk { payload: ChunkPayload },
    EndTransfer,
}

impl Frame {
    /// Wire tag of this frame.
    pub const fn tag(&self) -> u8 {
        match self {
            Self::StartTransfer { .. } => CMD_START,
            Self::DataChunk { .. } => CMD_DATA,
            Self::EndTransfer => CMD_END,
        }
    }
}

// Payloads are firmware bytes; print the length instead.
impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StartTransfer { total_size } => {
                write!(f, "StartTransfer {{ total_size: {total_size} }}")
            }
            Self::DataChunk { payload } => write!(f, "DataChunk {{ length: {} }}", payload.len()),
            Self::EndTransfer => write!(f, "EndTransfer"),
        }
    }
}

/// Single-byte acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Ack,
    Nak,
}

impl Reply {
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::Ack => REPLY_ACK,
            Self::Nak => REPLY_NAK,
        }
    }

    /// Interpret a reply byte. Anything that is not an ACK counts as a
    /// NAK on the sender side, but only the two defined values map here.
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            REPLY_ACK => Some(Self::Ack),
            REPLY_NAK => Some(Self::Nak),
            _ => None,
        }
    }
}

// ── Encoders (sender side) ────────────────────────────────────

/// Encode a start frame announcing `total_size` image bytes.
pub fn encode_start(total_size: u32) -> [u8; START_FRAME_LEN] {
    let mut out = [0u8; START_FRAME_LEN];
    out[0] = CMD_START;
    out[1..].copy_from_slice(&total_size.to_be_bytes());
    out
}

/// Encode a data frame into `out_buf`.
///
/// Writes `[0x02][BE-u16 length][payload]`. Returns the total number of
/// bytes written, or `None` if the payload exceeds [`MAX_CHUNK_PAYLOAD`]
/// or `out_buf` is too small.
pub fn encode_chunk(payload: &[u8], out_buf: &mut [u8]) -> Option<usize> {
    let total = DATA_HEADER_LEN + payload.len();
    if payload.len() > MAX_CHUNK_PAYLOAD || total > out_buf.len() {
        return None;
    }

    out_buf[0] = CMD_DATA;
    out_buf[1..DATA_HEADER_LEN].copy_from_slice(&(payload.len() as u16).to_be_bytes());
    out_buf[DATA_HEADER_LEN..total].copy_from_slice(payload);

    Some(total)
}

/// Encode an end frame.
pub const fn encode_end() -> [u8; 1] {
    [CMD_END]
}
