//! Integration test driver for `tests/integration/` submodules.
//!
//! Each `mod` below maps to a file that exercises the OTA engine against
//! mock adapters. All tests run on the host (x86_64) with no Bluetooth
//! stack or flash required.

mod dispatch_tests;
mod transfer_flow_tests;
