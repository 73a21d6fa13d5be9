//! OTA engine configuration
//!
//! Runtime-tunable parameters for the update engine. Wire-protocol limits
//! are compile-time constants in [`crate::ota::protocol`] because both
//! ends of the link must agree on them.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Name advertised by the SPP server when none is configured.
pub const DEFAULT_DEVICE_NAME: &str = "ESP32_OTA_SPP";

const _: () = assert!(DEFAULT_DEVICE_NAME.len() <= 32);

/// Upper bound for the reboot grace delay (milliseconds).
const MAX_REBOOT_GRACE_MS: u32 = 10_000;

/// Smallest non-zero idle timeout accepted (milliseconds).
const MIN_IDLE_TIMEOUT_MS: u32 = 1_000;

/// What to do when `EndTransfer` arrives and the received byte count does
/// not match the size declared by `StartTransfer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SizeMismatchPolicy {
    /// Log a warning and finalize anyway.
    Warn,
    /// Abort the write session and NAK.
    Reject,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtaConfig {
    /// Name advertised by the Bluetooth serial server
    pub device_name: heapless::String<32>,
    /// Delay between the final ACK and the reboot (milliseconds)
    pub reboot_grace_ms: u32,
    /// Abort a Receiving session after this long without input (milliseconds, 0 = never)
    pub idle_timeout_ms: u32,
    /// Handling of a byte-count mismatch at EndTransfer
    pub size_mismatch: SizeMismatchPolicy,
    /// Stack size of the dispatch thread (KiB)
    pub dispatch_stack_kb: usize,
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self {
            device_name: heapless::String::try_from(DEFAULT_DEVICE_NAME).unwrap_or_default(),
            reboot_grace_ms: 2000,
            idle_timeout_ms: 30_000,
            size_mismatch: SizeMismatchPolicy::Reject,
            dispatch_stack_kb: 8,
        }
    }
}

impl OtaConfig {
    /// Range-check every field.
    pub fn validate(&self) -> Result<()> {
        if self.device_name.is_empty() {
            return Err(Error::Config("device_name must not be empty"));
        }
        if self.reboot_grace_ms > MAX_REBOOT_GRACE_MS {
            return Err(Error::Config("reboot_grace_ms above 10000"));
        }
        if self.idle_timeout_ms != 0 && self.idle_timeout_ms < MIN_IDLE_TIMEOUT_MS {
            return Err(Error::Config("idle_timeout_ms below 1000 (use 0 to disable)"));
        }
        if self.dispatch_stack_kb < 4 {
            return Err(Error::Config("dispatch_stack_kb below 4"));
        }
        Ok(())
    }

    /// Parse a JSON document and validate it.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let config: Self =
            serde_json::from_slice(bytes).map_err(|_| Error::Config("malformed JSON"))?;
        config.validate()?;
        Ok(config)
    }

    /// Idle timeout as a `Duration`, or `None` when disabled.
    pub fn idle_timeout(&self) -> Option<core::time::Duration> {
        (self.idle_timeout_ms > 0)
            .then(|| core::time::Duration::from_millis(u64::from(self.idle_timeout_ms)))
    }
}
