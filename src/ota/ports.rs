//! Port traits: the boundary between the OTA engine and the platform.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ Dispatcher / TransferSession
//! ```
//!
//! Driven adapters (flash partitions, the SPP link, the system timer, log
//! output) implement these traits. The engine consumes them via generics,
//! so the protocol core never touches ESP-IDF directly.

use crate::error::StoreError;

use super::events::TransferEvent;

// ───────────────────────────────────────────────────────────────
// Firmware store (driven adapter: engine → flash)
// ───────────────────────────────────────────────────────────────

/// Persistent storage able to hold a second firmware image.
///
/// A `Session` is an open write handle on one slot. It is passed by value
/// to [`finalize`](Self::finalize) and [`abort`](Self::abort), so a handle
/// can never be used after the session ends.
pub trait FirmwareStore {
    /// Identifier of a slot (partition) that can hold one image.
    type Slot: Copy + core::fmt::Debug;
    /// Open write session on a slot.
    type Session;

    /// Pick the next writable slot, i.e. one that is not running.
    fn select_slot(&mut self) -> Option<Self::Slot>;

    /// Open a write session on `slot`.
    fn begin(&mut self, slot: Self::Slot) -> Result<Self::Session, StoreError>;

    /// Append bytes to the session.
    fn write(&mut self, session: &mut Self::Session, data: &[u8]) -> Result<(), StoreError>;

    /// Close the session and verify the written image.
    fn finalize(&mut self, session: Self::Session) -> Result<(), StoreError>;

    /// Make `slot` the boot target for the next reset.
    fn mark_bootable(&mut self, slot: Self::Slot) -> Result<(), StoreError>;

    /// Discard the session and everything written through it.
    fn abort(&mut self, session: Self::Session);

    /// Restart the device. Does not return on hardware; simulation stores
    /// record the request and return.
    fn reboot(&mut self);
}

// ───────────────────────────────────────────────────────────────
// Transport (driven adapter: engine → link)
// ───────────────────────────────────────────────────────────────

/// Outbound half of the byte link. Inbound bytes arrive through
/// [`DeliveryHandle`](super::link::DeliveryHandle) instead.
pub trait Transport {
    /// Error type for this transport.
    type Error: core::fmt::Debug;

    /// Send `data` as one outbound message.
    fn write(&mut self, data: &[u8]) -> Result<(), Self::Error>;
}

// ───────────────────────────────────────────────────────────────
// Clock (driven adapter: engine → monotonic timer)
// ───────────────────────────────────────────────────────────────

/// Monotonic millisecond clock used for throughput and idle tracking.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

// ───────────────────────────────────────────────────────────────
// Event sink (driven adapter: engine → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// The engine emits [`TransferEvent`]s through this port. Adapters decide
/// where they go (serial log, a status characteristic, a test recorder).
pub trait EventSink {
    fn emit(&mut self, event: &TransferEvent);
}
