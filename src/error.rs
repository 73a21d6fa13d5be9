//! Unified error types for the OTA engine.
//!
//! A single `Error` enum that every subsystem can convert into, keeping the
//! dispatch loop's error handling uniform. All variants are `Copy` so they
//! can be passed through the session state machine without allocation.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible operation in the engine funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The firmware store rejected an operation.
    Store(StoreError),
    /// Configuration is invalid or could not be parsed.
    Config(&'static str),
    /// Operation requires an active transfer (or no transfer) and the
    /// session is in the other state.
    InvalidState,
    /// Host-side upload was refused or gave up.
    Upload(UploadError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(e) => write!(f, "store: {e}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::InvalidState => write!(f, "invalid transfer state"),
            Self::Upload(e) => write!(f, "upload: {e}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Firmware store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// No inactive slot is available for writing.
    NoSlot,
    /// Opening a write session on the selected slot failed.
    BeginFailed,
    /// Appending bytes to the write session failed.
    WriteFailed,
    /// Image verification at finalize failed.
    VerifyFailed,
    /// Marking the slot as the next boot target failed.
    BootSetFailed,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSlot => write!(f, "no writable firmware slot"),
            Self::BeginFailed => write!(f, "begin failed"),
            Self::WriteFailed => write!(f, "write failed"),
            Self::VerifyFailed => write!(f, "image verification failed"),
            Self::BootSetFailed => write!(f, "set boot slot failed"),
        }
    }
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

// ---------------------------------------------------------------------------
// Upload (sender side) errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadError {
    /// Image is empty or larger than the 32-bit size field.
    InvalidImage,
    /// Device did not ACK the start frame.
    StartRejected,
    /// A chunk was NAKed or timed out more times than allowed.
    ChunkRetriesExhausted { offset: u32 },
    /// Device did not ACK the end frame.
    EndRejected,
    /// The link failed to send or receive.
    Link,
}

impl fmt::Display for UploadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidImage => write!(f, "image empty or too large"),
            Self::StartRejected => write!(f, "start not acknowledged"),
            Self::ChunkRetriesExhausted { offset } => {
                write!(f, "chunk at offset {offset} not acknowledged")
            }
            Self::EndRejected => write!(f, "end not acknowledged"),
            Self::Link => write!(f, "link I/O failed"),
        }
    }
}

impl From<UploadError> for Error {
    fn from(e: UploadError) -> Self {
        Self::Upload(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
