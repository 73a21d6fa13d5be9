//! In-memory firmware store for host builds and tests.
//!
//! Models the ESP32 two-slot OTA layout: one running slot, one writable
//! slot, and a boot selector that takes effect on the next reboot. Each
//! store operation can be made to fail through [`SimFaults`].

use log::info;

use crate::error::StoreError;
use crate::ota::ports::FirmwareStore;

/// Capacity of each simulated slot (1.5 MB app partition).
pub const SIM_SLOT_SIZE: usize = 0x18_0000;

/// Index of a simulated slot (0 or 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimSlot(pub usize);

/// Open write session on a simulated slot.
#[derive(Debug)]
pub struct SimSession {
    slot: usize,
    written: usize,
}

/// Switches that force individual store operations to fail.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimFaults {
    pub no_slot: bool,
    pub fail_begin: bool,
    pub fail_write: bool,
    pub fail_finalize: bool,
    pub fail_mark_bootable: bool,
}

pub struct SimFirmwareStore {
    slots: [Vec<u8>; 2],
    verified: [bool; 2],
    running: usize,
    boot: usize,
    slot_size: usize,
    open_sessions: u32,
    aborted: u32,
    reboots: u32,
    pub faults: SimFaults,
}

impl Default for SimFirmwareStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SimFirmwareStore {
    pub fn new() -> Self {
        Self::with_slot_size(SIM_SLOT_SIZE)
    }

    pub fn with_slot_size(slot_size: usize) -> Self {
        Self {
            slots: [Vec::new(), Vec::new()],
            verified: [true, false],
            running: 0,
            boot: 0,
            slot_size,
            open_sessions: 0,
            aborted: 0,
            reboots: 0,
            faults: SimFaults::default(),
        }
    }

    /// Slot currently executing.
    pub fn running_slot(&self) -> SimSlot {
        SimSlot(self.running)
    }

    /// Slot selected for the next boot.
    pub fn boot_slot(&self) -> SimSlot {
        SimSlot(self.boot)
    }

    /// Image that will run after the next reboot, if it differs from the
    /// running one.
    pub fn boot_image(&self) -> Option<&[u8]> {
        (self.boot != self.running).then(|| self.slots[self.boot].as_slice())
    }

    /// Write sessions begun but neither finalized nor aborted.
    pub fn open_sessions(&self) -> u32 {
        self.open_sessions
    }

    pub fn aborted(&self) -> u32 {
        self.aborted
    }

    pub fn reboots(&self) -> u32 {
        self.reboots
    }
}

impl FirmwareStore for SimFirmwareStore {
    type Slot = SimSlot;
    type Session = SimSession;

    fn select_slot(&mut self) -> Option<SimSlot> {
        if self.faults.no_slot {
            return None;
        }
        Some(SimSlot(1 - self.running))
    }

    fn begin(&mut self, slot: SimSlot) -> Result<SimSession, StoreError> {
        if self.faults.fail_begin || slot.0 == self.running || slot.0 > 1 {
            return Err(StoreError::BeginFailed);
        }
        // Erase on begin, as the real partition API does.
        self.slots[slot.0].clear();
        self.verified[slot.0] = false;
        self.open_sessions += 1;
        Ok(SimSession {
            slot: slot.0,
            written: 0,
        })
    }

    fn write(&mut self, session: &mut SimSession, data: &[u8]) -> Result<(), StoreError> {
        if self.faults.fail_write || session.written + data.len() > self.slot_size {
            return Err(StoreError::WriteFailed);
        }
        self.slots[session.slot].extend_from_slice(data);
        session.written += data.len();
        Ok(())
    }

    fn finalize(&mut self, session: SimSession) -> Result<(), StoreError> {
        self.open_sessions -= 1;
        if self.faults.fail_finalize || session.written == 0 {
            self.slots[session.slot].clear();
            return Err(StoreError::VerifyFailed);
        }
        self.verified[session.slot] = true;
        Ok(())
    }

    fn mark_bootable(&mut self, slot: SimSlot) -> Result<(), StoreError> {
        if self.faults.fail_mark_bootable || !self.verified[slot.0] {
            return Err(StoreError::BootSetFailed);
        }
        self.boot = slot.0;
        Ok(())
    }

    fn abort(&mut self, session: SimSession) {
        self.open_sessions -= 1;
        self.aborted += 1;
        self.slots[session.slot].clear();
    }

    fn reboot(&mut self) {
        info!("sim: reboot into slot {}", self.boot);
        self.reboots += 1;
        self.running = self.boot;
    }
}
