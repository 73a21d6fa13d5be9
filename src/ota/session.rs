//! OTA transfer state machine.
//!
//! Flow: StartTransfer → N × DataChunk → EndTransfer → reboot
//!
//! ```text
//!            Start (slot + begin ok)             End (finalize + mark ok)
//!   ┌──────┐ ─────────────────────────▶ ┌───────────┐ ──────▶ ┌────────┐
//!   │ Idle │                            │ Receiving │         │ Ending │──▶ Idle (+ reboot)
//!   └──────┘ ◀───────────────────────── └───────────┘         └────────┘
//!        write failure / abort / idle timeout      finalize failure ──▶ Idle
//! ```
//!
//! Every decoded frame yields exactly one [`Reply`]. Out-of-sequence frames
//! are NAKed without side effects; firmware store failures abort the write
//! session and fall back to Idle. Nothing here is fatal: the worst outcome
//! is a client restarting from StartTransfer.

use log::{debug, error, info, warn};

use crate::config::SizeMismatchPolicy;
use crate::error::{Error, Result, StoreError};

use super::events::{AbortReason, FailureReason, TransferEvent, TransferStats};
use super::ports::{EventSink, FirmwareStore};
use super::protocol::{Frame, Reply};

// ── State ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// No write session open.
    Idle,
    /// Write session open, accepting chunks.
    Receiving,
    /// EndTransfer accepted, finalizing the image.
    Ending,
}

/// Outcome of handling one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub reply: Reply,
    /// Set only after a successful finalize: the caller reboots once the
    /// ACK has had time to drain.
    pub reboot: bool,
}

impl Step {
    const ACK: Self = Self {
        reply: Reply::Ack,
        reboot: false,
    };
    const NAK: Self = Self {
        reply: Reply::Nak,
        reboot: false,
    };
    const ACK_AND_REBOOT: Self = Self {
        reply: Reply::Ack,
        reboot: true,
    };
}

// ── Session ───────────────────────────────────────────────────

/// One OTA transaction per connection.
///
/// `firmware_handle` and `selected_slot` are `Some` exactly while the state
/// is Receiving or Ending.
pub struct TransferSession<S: FirmwareStore> {
    state: TransferState,
    firmware_handle: Option<S::Session>,
    selected_slot: Option<S::Slot>,
    bytes_received: u32,
    expected_size: u32,
    chunk_count: u32,
    start_ms: u64,
    last_activity_ms: u64,
    size_mismatch: SizeMismatchPolicy,
}

impl<S: FirmwareStore> TransferSession<S> {
    pub fn new(size_mismatch: SizeMismatchPolicy) -> Self {
        Self {
            state: TransferState::Idle,
            firmware_handle: None,
            selected_slot: None,
            bytes_received: 0,
            expected_size: 0,
            chunk_count: 0,
            start_ms: 0,
            last_activity_ms: 0,
            size_mismatch,
        }
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn bytes_received(&self) -> u32 {
        self.bytes_received
    }

    pub fn expected_size(&self) -> u32 {
        self.expected_size
    }

    pub fn chunk_count(&self) -> u32 {
        self.chunk_count
    }

    pub fn selected_slot(&self) -> Option<S::Slot> {
        self.selected_slot
    }

    /// `Ok` while a transfer is in flight, `InvalidState` when Idle.
    pub fn finish_update(&self) -> Result<()> {
        match self.state {
            TransferState::Idle => Err(Error::InvalidState),
            TransferState::Receiving | TransferState::Ending => Ok(()),
        }
    }

    /// Record inbound activity (any delivered bytes, even partial frames).
    pub fn touch(&mut self, now_ms: u64) {
        self.last_activity_ms = now_ms;
    }

    /// Milliseconds left before a Receiving session counts as stalled, or
    /// `None` when no transfer is in flight.
    pub fn idle_remaining_ms(&self, now_ms: u64, timeout_ms: u64) -> Option<u64> {
        (self.state == TransferState::Receiving).then(|| {
            let idle = now_ms.saturating_sub(self.last_activity_ms);
            timeout_ms.saturating_sub(idle)
        })
    }

    /// Handle one decoded frame.
    pub fn handle_frame(
        &mut self,
        frame: &Frame,
        store: &mut S,
        now_ms: u64,
        sink: &mut impl EventSink,
    ) -> Step {
        self.touch(now_ms);
        let expected = match frame {
            Frame::StartTransfer { .. } => TransferState::Idle,
            Frame::DataChunk { .. } | Frame::EndTransfer => TransferState::Receiving,
        };
        if self.state != expected {
            warn!("OTA: {:?} rejected (state {:?})", frame, self.state);
            sink.emit(&TransferEvent::Rejected { tag: frame.tag() });
            return Step::NAK;
        }
        match frame {
            Frame::StartTransfer { total_size } => self.start(*total_size, store, now_ms, sink),
            Frame::DataChunk { payload } => self.chunk(payload, store, sink),
            Frame::EndTransfer => self.end(store, now_ms, sink),
        }
    }

    /// A data header declared an impossible length. NAK, state unchanged.
    pub fn reject_malformed(&mut self, declared_len: u16, sink: &mut impl EventSink) -> Step {
        warn!("OTA: invalid chunk length {} (state {:?})", declared_len, self.state);
        sink.emit(&TransferEvent::Malformed { declared_len });
        Step::NAK
    }

    /// Tear down an in-flight transfer. Returns `true` if there was one.
    pub fn abort(&mut self, store: &mut S, reason: AbortReason, sink: &mut impl EventSink) -> bool {
        if self.state == TransferState::Idle {
            return false;
        }
        warn!(
            "OTA: aborting transfer ({:?}) after {}/{} bytes",
            reason, self.bytes_received, self.expected_size
        );
        self.release(store);
        sink.emit(&TransferEvent::Aborted(reason));
        true
    }

    // ── Frame handlers ────────────────────────────────────────

    fn start(
        &mut self,
        total_size: u32,
        store: &mut S,
        now_ms: u64,
        sink: &mut impl EventSink,
    ) -> Step {
        info!("OTA: start ({} bytes)", total_size);

        let Some(slot) = store.select_slot() else {
            error!("OTA: no update slot available");
            sink.emit(&TransferEvent::Failed(FailureReason::Store(StoreError::NoSlot)));
            return Step::NAK;
        };

        let handle = match store.begin(slot) {
            Ok(handle) => handle,
            Err(e) => {
                error!("OTA: begin on {:?} failed: {}", slot, e);
                sink.emit(&TransferEvent::Failed(FailureReason::Store(e)));
                return Step::NAK;
            }
        };

        self.state = TransferState::Receiving;
        self.firmware_handle = Some(handle);
        self.selected_slot = Some(slot);
        self.bytes_received = 0;
        self.expected_size = total_size;
        self.chunk_count = 0;
        self.start_ms = now_ms;

        info!("OTA: writing to {:?}, expecting {} bytes", slot, total_size);
        sink.emit(&TransferEvent::Started {
            expected_size: total_size,
        });
        Step::ACK
    }

    fn chunk(&mut self, payload: &[u8], store: &mut S, sink: &mut impl EventSink) -> Step {
        let written = match self.firmware_handle.as_mut() {
            Some(handle) => store.write(handle, payload),
            None => Err(StoreError::WriteFailed),
        };

        if let Err(e) = written {
            error!(
                "OTA: write failed at offset {}: {}",
                self.bytes_received, e
            );
            self.release(store);
            sink.emit(&TransferEvent::Failed(FailureReason::Store(e)));
            return Step::NAK;
        }

        self.bytes_received = self.bytes_received.saturating_add(payload.len() as u32);
        self.chunk_count += 1;
        debug!(
            "OTA: chunk {} ({} bytes, total {}/{})",
            self.chunk_count,
            payload.len(),
            self.bytes_received,
            self.expected_size
        );
        Step::ACK
    }

    fn end(&mut self, store: &mut S, now_ms: u64, sink: &mut impl EventSink) -> Step {
        self.state = TransferState::Ending;

        let stats = TransferStats {
            bytes: self.bytes_received,
            chunks: self.chunk_count,
            elapsed_ms: now_ms.saturating_sub(self.start_ms),
        };
        info!(
            "OTA: end | {} bytes in {} chunks | {:.2} s | {:.1} KB/s",
            stats.bytes,
            stats.chunks,
            stats.elapsed_secs(),
            stats.bytes_per_sec() as f32 / 1024.0
        );

        if self.bytes_received != self.expected_size {
            warn!(
                "OTA: size mismatch, received {} of {} bytes",
                self.bytes_received, self.expected_size
            );
            if self.size_mismatch == SizeMismatchPolicy::Reject {
                let reason = FailureReason::SizeMismatch {
                    received: self.bytes_received,
                    expected: self.expected_size,
                };
                self.release(store);
                sink.emit(&TransferEvent::Failed(reason));
                return Step::NAK;
            }
        }

        let (Some(handle), Some(slot)) = (self.firmware_handle.take(), self.selected_slot) else {
            self.release(store);
            sink.emit(&TransferEvent::Failed(FailureReason::Store(
                StoreError::VerifyFailed,
            )));
            return Step::NAK;
        };

        let finished = store
            .finalize(handle)
            .and_then(|()| store.mark_bootable(slot));
        self.reset();

        match finished {
            Ok(()) => {
                info!("OTA: {:?} verified and marked bootable", slot);
                sink.emit(&TransferEvent::Completed(stats));
                Step::ACK_AND_REBOOT
            }
            Err(e) => {
                error!("OTA: finalize of {:?} failed: {}", slot, e);
                sink.emit(&TransferEvent::Failed(FailureReason::Store(e)));
                Step::NAK
            }
        }
    }

    // ── Internal ──────────────────────────────────────────────

    /// Abort any open store session and return to Idle.
    fn release(&mut self, store: &mut S) {
        if let Some(handle) = self.firmware_handle.take() {
            store.abort(handle);
        }
        self.reset();
    }

    fn reset(&mut self) {
        self.state = TransferState::Idle;
        self.firmware_handle = None;
        self.selected_slot = None;
    }
}

// ── Tests ─────────────────────────────────────────────────────
