//! Fuzz target: dispatcher receive path
//!
//! Interprets the input as a script of link events (connect, disconnect,
//! data of arbitrary length) against a dispatcher backed by the in-memory
//! store. Every reply must be an ACK or NAK byte, and no sequence may
//! leave a store session open once the client is gone.
//!
//! cargo fuzz run fuzz_receive_pipeline

#![no_main]

use std::cell::RefCell;
use std::rc::Rc;

use libfuzzer_sys::fuzz_target;
use ota_bt::adapters::sim_store::SimFirmwareStore;
use ota_bt::config::OtaConfig;
use ota_bt::ota::events::TransferEvent;
use ota_bt::ota::link::Link;
use ota_bt::ota::ports::{Clock, EventSink, Transport};
use ota_bt::ota::{Dispatcher, TransferState};

#[derive(Clone, Default)]
struct Replies(Rc<RefCell<Vec<u8>>>);

impl Transport for Replies {
    type Error = ();
    fn write(&mut self, data: &[u8]) -> Result<(), ()> {
        for &b in data {
            assert!(b == 0xAA || b == 0xFF, "reply must be ACK or NAK");
        }
        self.0.borrow_mut().extend_from_slice(data);
        Ok(())
    }
}

struct Frozen;

impl Clock for Frozen {
    fn now_ms(&self) -> u64 {
        0
    }
}

struct Ignore;

impl EventSink for Ignore {
    fn emit(&mut self, _event: &TransferEvent) {}
}

fuzz_target!(|data: &[u8]| {
    let link = Link::new();
    let handle = link.handle();
    let config = OtaConfig {
        reboot_grace_ms: 0,
        idle_timeout_ms: 0,
        ..OtaConfig::default()
    };
    let mut dispatcher = Dispatcher::new(
        link,
        SimFirmwareStore::with_slot_size(64 * 1024),
        Replies::default(),
        Frozen,
        Ignore,
        config,
    );

    let mut rest = data;
    while let Some((&op, tail)) = rest.split_first() {
        match op % 8 {
            0 => handle.on_connect(),
            1 => handle.on_disconnect(),
            _ => {
                let n = usize::from(op).min(tail.len());
                handle.on_data(&tail[..n]);
                rest = &tail[n..];
                if dispatcher.pump().is_some() {
                    return;
                }
                continue;
            }
        }
        rest = tail;
        if dispatcher.pump().is_some() {
            return;
        }
        if !dispatcher.is_connected() {
            assert_eq!(dispatcher.store().open_sessions(), 0);
            assert_eq!(dispatcher.transfer_state(), TransferState::Idle);
        }
    }
});
