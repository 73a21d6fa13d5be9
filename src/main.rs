//! OTA-BT firmware: Bluetooth serial update server.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    Adapters (outer ring)                     │
//! │                                                              │
//! │  SPP callback ──▶ DeliveryHandle      SppTransport           │
//! │  EspOtaStore      SystemClock         LogEventSink           │
//! │                                                              │
//! │  ───────────────── Port Trait Boundary ──────────────────    │
//! │                                                              │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │   Dispatcher (own thread)                              │  │
//! │  │   RingBuffer · Decoder · TransferSession               │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use anyhow::{Context, Result};
use log::{error, info};

use ota_bt::adapters::esp_store::{EspOtaStore, check_rollback};
use ota_bt::adapters::log_sink::LogEventSink;
use ota_bt::adapters::spp::{self, SppTransport};
use ota_bt::adapters::time::SystemClock;
use ota_bt::config::OtaConfig;
use ota_bt::ota::dispatch::{self, Dispatcher, RunExit};
use ota_bt::ota::link::Link;

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("OTA-BT v{}", env!("CARGO_PKG_VERSION"));

    // ── 1b. OTA rollback check ────────────────────────────────
    check_rollback();

    // ── 2. Config ─────────────────────────────────────────────
    let config = OtaConfig::default();
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("{e}"))
        .context("default config")?;

    // ── 3. Link + Bluetooth ───────────────────────────────────
    let link = Link::new();
    let peripherals = esp_idf_svc::hal::peripherals::Peripherals::take()?;
    let nvs = esp_idf_svc::nvs::EspDefaultNvsPartition::take()?;
    let _bt = spp::start(peripherals.modem, nvs, config.device_name.as_str(), link.handle())?;

    // ── 4. Dispatcher ─────────────────────────────────────────
    let stack_kb = config.dispatch_stack_kb;
    let worker = dispatch::spawn(stack_kb, move || {
        Dispatcher::new(
            link,
            EspOtaStore::new(),
            SppTransport::new(),
            SystemClock::new(),
            LogEventSink::new(),
            config,
        )
    })
    .context("spawn dispatcher")?;

    info!("System ready. Waiting for an SPP client.");

    // The dispatcher only returns on shutdown; a completed update never
    // gets here because the store restarts the chip.
    match worker.join() {
        Ok(RunExit::Shutdown) => info!("OTA dispatcher stopped"),
        Ok(RunExit::Rebooted) => info!("OTA dispatcher returned after reboot request"),
        Err(_) => error!("OTA dispatcher panicked"),
    }
    Ok(())
}
