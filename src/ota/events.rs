//! Outbound transfer events.
//!
//! The [`TransferSession`](super::session::TransferSession) and the
//! [`Dispatcher`](super::dispatch::Dispatcher) emit these through the
//! [`EventSink`](super::ports::EventSink) port. They carry no protocol
//! meaning; the client only ever sees ACK/NAK bytes.

use crate::error::StoreError;

/// Structured events emitted by the OTA engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    /// A client connected; the session starts Idle.
    Connected,

    /// The client went away.
    Disconnected,

    /// A write session opened for an image of `expected_size` bytes.
    Started { expected_size: u32 },

    /// The image was finalized and marked bootable.
    Completed(TransferStats),

    /// A transfer ended without a bootable image.
    Failed(FailureReason),

    /// An in-flight transfer was torn down from outside the protocol.
    Aborted(AbortReason),

    /// A frame arrived that the current state does not accept.
    Rejected { tag: u8 },

    /// A data header declared an impossible payload length.
    Malformed { declared_len: u16 },

    /// Receive buffer overwrote unread bytes.
    Overflow { dropped: usize },
}

/// Why a transfer failed at the protocol level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// The store refused an operation.
    Store(StoreError),
    /// Received byte count did not match the declared size.
    SizeMismatch { received: u32, expected: u32 },
}

/// Why a transfer was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    Disconnected,
    IdleTimeout,
    Shutdown,
}

/// Throughput summary of a finished transfer. Observability only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferStats {
    pub bytes: u32,
    pub chunks: u32,
    pub elapsed_ms: u64,
}

impl TransferStats {
    /// Average throughput; a zero elapsed time counts as 1 ms.
    pub fn bytes_per_sec(&self) -> u64 {
        u64::from(self.bytes) * 1000 / self.elapsed_ms.max(1)
    }

    pub fn elapsed_secs(&self) -> f32 {
        self.elapsed_ms as f32 / 1000.0
    }
}
