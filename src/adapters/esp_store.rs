//! ESP-IDF OTA partition store, backed by the `esp-ota` crate.
//!
//! `esp-ota` picks the next update partition itself on `begin`; the slot
//! returned by [`select_slot`](crate::ota::ports::FirmwareStore::select_slot) is the same
//! partition, looked up up-front so the engine can NAK early when the
//! partition table has no OTA slots.

use log::info;
#[cfg(target_os = "espidf")]
use log::warn;

#[cfg(target_os = "espidf")]
use crate::error::StoreError;
#[cfg(target_os = "espidf")]
use crate::ota::ports::FirmwareStore;

/// Flash address of an OTA app partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionAddr(pub u32);

#[cfg(target_os = "espidf")]
pub struct EspOtaStore {
    completed: Option<esp_ota::CompletedOtaUpdate>,
}

#[cfg(target_os = "espidf")]
impl EspOtaStore {
    pub fn new() -> Self {
        Self { completed: None }
    }
}

#[cfg(target_os = "espidf")]
impl Default for EspOtaStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "espidf")]
impl FirmwareStore for EspOtaStore {
    type Slot = PartitionAddr;
    type Session = esp_ota::OtaUpdate;

    fn select_slot(&mut self) -> Option<PartitionAddr> {
        let partition =
            unsafe { esp_idf_svc::sys::esp_ota_get_next_update_partition(core::ptr::null()) };
        if partition.is_null() {
            return None;
        }
        Some(PartitionAddr(unsafe { (*partition).address }))
    }

    fn begin(&mut self, slot: PartitionAddr) -> Result<esp_ota::OtaUpdate, StoreError> {
        self.completed = None;
        esp_ota::OtaUpdate::begin().map_err(|e| {
            warn!("esp-ota begin on 0x{:08X} failed: {:?}", slot.0, e);
            StoreError::BeginFailed
        })
    }

    fn write(&mut self, session: &mut esp_ota::OtaUpdate, data: &[u8]) -> Result<(), StoreError> {
        session.write(data).map_err(|e| {
            warn!("esp-ota write failed: {:?}", e);
            StoreError::WriteFailed
        })
    }

    fn finalize(&mut self, session: esp_ota::OtaUpdate) -> Result<(), StoreError> {
        let completed = session.finalize().map_err(|e| {
            warn!("esp-ota finalize failed: {:?}", e);
            StoreError::VerifyFailed
        })?;
        self.completed = Some(completed);
        Ok(())
    }

    fn mark_bootable(&mut self, slot: PartitionAddr) -> Result<(), StoreError> {
        let Some(completed) = self.completed.as_mut() else {
            return Err(StoreError::BootSetFailed);
        };
        completed.set_as_boot_partition().map_err(|e| {
            warn!("esp-ota set_as_boot_partition(0x{:08X}) failed: {:?}", slot.0, e);
            StoreError::BootSetFailed
        })
    }

    fn abort(&mut self, session: esp_ota::OtaUpdate) {
        // esp-ota aborts the update when the handle is dropped
        drop(session);
        self.completed = None;
    }

    fn reboot(&mut self) {
        info!("OTA: rebooting into new firmware");
        esp_ota::restart();
    }
}

// ── Boot validation ───────────────────────────────────────────

/// Mark the running image valid so the bootloader does not roll back.
///
/// Without this, the rollback watchdog reverts to the previous firmware
/// after three consecutive failed boots.
#[cfg(target_os = "espidf")]
pub fn check_rollback() {
    match esp_ota::mark_app_valid() {
        Ok(()) => info!("OTA: firmware marked valid (rollback cancelled)"),
        Err(e) => warn!("OTA: mark_app_valid failed: {:?}", e),
    }
}

#[cfg(not(target_os = "espidf"))]
pub fn check_rollback() {
    info!("OTA rollback check (simulation): skipped");
}
