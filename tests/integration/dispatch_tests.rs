//! The blocking dispatch loop on its own thread, fed from the test thread
//! the way the SPP callback feeds it on hardware.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::mock_link::*;

use ota_bt::adapters::sim_store::SimFirmwareStore;
use ota_bt::adapters::time::SystemClock;
use ota_bt::config::OtaConfig;
use ota_bt::ota::dispatch::{self, Dispatcher, RunExit};
use ota_bt::ota::events::{AbortReason, TransferEvent};
use ota_bt::ota::link::Link;
use ota_bt::ota::ports::EventSink;

/// Event sink readable from the test thread while the loop runs.
#[derive(Clone, Default)]
struct SharedSink(Arc<Mutex<Vec<TransferEvent>>>);

impl SharedSink {
    fn contains(&self, event: &TransferEvent) -> bool {
        self.0.lock().unwrap().contains(event)
    }

    fn wait_for(&self, event: &TransferEvent, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        while Instant::now() < deadline {
            if self.contains(event) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        self.contains(event)
    }
}

impl EventSink for SharedSink {
    fn emit(&mut self, event: &TransferEvent) {
        self.0.lock().unwrap().push(event.clone());
    }
}

fn spawn_loop(transport: RecordingTransport) -> (ota_bt::ota::DeliveryHandle, std::thread::JoinHandle<RunExit>) {
    let link = Link::new();
    let handle = link.handle();
    let config = OtaConfig {
        idle_timeout_ms: 0,
        ..test_config()
    };
    let worker = dispatch::spawn(64, move || {
        Dispatcher::new(
            link,
            SimFirmwareStore::new(),
            transport,
            ManualClock::default(),
            RecordingSink::default(),
            config,
        )
    })
    .expect("spawn dispatcher");
    (handle, worker)
}

#[test]
fn run_returns_after_reboot() {
    let transport = RecordingTransport::default();
    let (handle, worker) = spawn_loop(transport.clone());

    handle.on_connect();
    handle.on_data(&whole_transfer(&image(3000)));

    assert_eq!(worker.join().unwrap(), RunExit::Rebooted);
    // start + 3 chunks + end
    assert_eq!(transport.replies(), vec![ACK; 5]);
}

#[test]
fn run_returns_on_shutdown() {
    let transport = RecordingTransport::default();
    let (handle, worker) = spawn_loop(transport.clone());

    handle.on_connect();
    handle.on_data(&start_frame(64));
    handle.shutdown();

    assert_eq!(worker.join().unwrap(), RunExit::Shutdown);
    assert_eq!(transport.replies(), vec![ACK]);
}

#[test]
fn run_survives_disconnect_and_serves_next_client() {
    let transport = RecordingTransport::default();
    let (handle, worker) = spawn_loop(transport.clone());

    handle.on_connect();
    handle.on_data(&start_frame(10));
    handle.on_disconnect();
    handle.on_connect();
    handle.on_data(&whole_transfer(&image(10)));

    assert_eq!(worker.join().unwrap(), RunExit::Rebooted);
    assert_eq!(transport.replies(), vec![ACK, ACK, ACK, ACK]);
}

#[test]
fn run_exits_when_shutdown_arrives_on_a_full_queue() {
    let link = Link::new();
    let handle = link.handle();
    let transport = RecordingTransport::default();
    let sink = SharedSink::default();

    handle.on_connect();
    handle.on_data(&start_frame(64));
    fill_queue(&handle);
    handle.shutdown();

    let (t, s) = (transport.clone(), sink.clone());
    let worker = dispatch::spawn(64, move || {
        Dispatcher::new(
            link,
            SimFirmwareStore::new(),
            t,
            ManualClock::default(),
            s,
            test_config(),
        )
    })
    .expect("spawn dispatcher");

    assert_eq!(worker.join().unwrap(), RunExit::Shutdown);
    assert_eq!(transport.replies(), vec![ACK]);
    assert!(sink.contains(&TransferEvent::Aborted(AbortReason::Shutdown)));
}

#[test]
fn run_aborts_stalled_transfer_on_idle_timer() {
    let link = Link::new();
    let handle = link.handle();
    let transport = RecordingTransport::default();
    let sink = SharedSink::default();
    let config = OtaConfig {
        idle_timeout_ms: 1000,
        ..test_config()
    };

    let (t, s) = (transport.clone(), sink.clone());
    let worker = dispatch::spawn(64, move || {
        Dispatcher::new(
            link,
            SimFirmwareStore::new(),
            t,
            SystemClock::new(),
            s,
            config,
        )
    })
    .expect("spawn dispatcher");

    handle.on_connect();
    handle.on_data(&start_frame(64));

    let expired = sink.wait_for(
        &TransferEvent::Aborted(AbortReason::IdleTimeout),
        Duration::from_secs(10),
    );
    handle.shutdown();
    assert_eq!(worker.join().unwrap(), RunExit::Shutdown);

    assert!(expired, "idle timer never fired");
    assert_eq!(transport.replies(), vec![ACK]);
    // The session was already gone when the shutdown came in.
    assert!(!sink.contains(&TransferEvent::Aborted(AbortReason::Shutdown)));
}
