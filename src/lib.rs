//! Bluetooth serial (SPP) over-the-air firmware update engine.
//!
//! Exposes the protocol core and the host-side adapters for integration
//! testing and host tools. All ESP-IDF-specific code is guarded by
//! `#[cfg(target_os = "espidf")]` within each module.

#![deny(unused_must_use)]

pub mod adapters;
pub mod config;
pub mod error;
pub mod ota;

mod esp_link_shims;

// Links embassy-time's std driver behind `async_io_mini::Timer`.
#[cfg(not(target_os = "espidf"))]
use embassy_time as _;
