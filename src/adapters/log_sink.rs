//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing transfer events to the ESP-IDF
//! logger (UART / USB-CDC in production).

use log::{info, warn};

use crate::ota::events::{FailureReason, TransferEvent};
use crate::ota::ports::EventSink;

/// Adapter that logs every [`TransferEvent`] to the serial console.
#[derive(Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &TransferEvent) {
        match event {
            TransferEvent::Connected => info!("LINK | client connected"),
            TransferEvent::Disconnected => info!("LINK | client disconnected"),
            TransferEvent::Started { expected_size } => {
                info!("OTA  | started, expecting {} bytes", expected_size);
            }
            TransferEvent::Completed(stats) => {
                info!(
                    "OTA  | complete | {} bytes | {} chunks | {:.2} s | {} B/s",
                    stats.bytes,
                    stats.chunks,
                    stats.elapsed_secs(),
                    stats.bytes_per_sec(),
                );
            }
            TransferEvent::Failed(FailureReason::Store(e)) => {
                warn!("OTA  | failed: {}", e);
            }
            TransferEvent::Failed(FailureReason::SizeMismatch { received, expected }) => {
                warn!("OTA  | failed: received {} of {} bytes", received, expected);
            }
            TransferEvent::Aborted(reason) => warn!("OTA  | aborted ({:?})", reason),
            TransferEvent::Rejected { tag } => {
                warn!("OTA  | frame 0x{:02X} out of sequence", tag);
            }
            TransferEvent::Malformed { declared_len } => {
                warn!("OTA  | malformed chunk header (len={})", declared_len);
            }
            TransferEvent::Overflow { dropped } => {
                warn!("RX   | buffer overflow, {} bytes lost", dropped);
            }
        }
    }
}
