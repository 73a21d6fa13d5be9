//! Hand-off between the transport delivery context and the dispatcher.
//!
//! The Bluetooth stack invokes its callback on its own task. That callback
//! must not block and must not touch transfer state, so it only copies the
//! delivered bytes into a bounded `embassy-sync` channel. The dispatcher
//! thread is the sole consumer.
//!
//! ```text
//! ┌────────────────┐  LinkEvent   ┌────────────────┐
//! │ SPP callback   │────────────▶│  Dispatcher    │
//! │ (BT task)      │  depth 16    │  (own thread)  │
//! └────────────────┘              └────────────────┘
//!          │        shutdown signal        ▲
//!          └───────────────────────────────┘
//! ```
//!
//! Data is dropped (and counted) when the queue is full. Every connect and
//! disconnect bumps a connection epoch, even when the notification itself
//! cannot be queued, and every delivery carries the epoch it arrived in.
//! The dispatcher compares epochs to discard a previous client's bytes and
//! to catch up on notifications it never received. Shutdown is a sticky
//! signal outside the queue, so it cannot be lost.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use heapless::Vec;
use log::warn;

/// Largest single delivery forwarded to the dispatcher. Larger deliveries
/// are split.
pub const DELIVERY_CHUNK: usize = 1024;

/// Channel depth for inbound link events.
pub const LINK_QUEUE_DEPTH: usize = 16;

/// Message from the delivery context to the dispatcher. `epoch` is the
/// connection epoch current when the event was produced.
pub enum LinkEvent {
    Connected { epoch: u32 },
    Data { epoch: u32, bytes: Vec<u8, DELIVERY_CHUNK> },
    Disconnected { epoch: u32 },
}

/// `true` when epoch `a` was issued after epoch `b`. Wraps.
pub const fn epoch_after(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) > 0
}

/// Shared state between [`DeliveryHandle`]s and the dispatcher.
pub struct Link {
    queue: Channel<CriticalSectionRawMutex, LinkEvent, LINK_QUEUE_DEPTH>,
    shutdown: Signal<CriticalSectionRawMutex, ()>,
    epoch: AtomicU32,
    connected: AtomicBool,
    dropped_bytes: AtomicU32,
}

impl Link {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            queue: Channel::new(),
            shutdown: Signal::new(),
            epoch: AtomicU32::new(0),
            connected: AtomicBool::new(false),
            dropped_bytes: AtomicU32::new(0),
        })
    }

    /// Producer handle for the transport callback.
    pub fn handle(self: &Arc<Self>) -> DeliveryHandle {
        DeliveryHandle(Arc::clone(self))
    }

    /// Wait for the next event.
    pub async fn receive(&self) -> LinkEvent {
        self.queue.receive().await
    }

    /// Next event if one is queued.
    pub fn try_receive(&self) -> Option<LinkEvent> {
        self.queue.try_receive().ok()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Latest connection epoch, including notifications that were lost.
    pub fn epoch(&self) -> u32 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Whether the most recent notification was a connect.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Whether a shutdown has been requested. Stays set once raised.
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.signaled()
    }

    /// Resolve once a shutdown has been requested.
    pub async fn wait_shutdown(&self) {
        self.shutdown.wait().await;
        // Keep it raised for later `shutdown_requested` checks.
        self.shutdown.signal(());
    }

    /// Total bytes dropped because the queue was full.
    pub fn dropped_bytes(&self) -> u32 {
        self.dropped_bytes.load(Ordering::Relaxed)
    }

    fn notify(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
        let event = if connected {
            LinkEvent::Connected { epoch }
        } else {
            LinkEvent::Disconnected { epoch }
        };
        if self.queue.try_send(event).is_err() {
            warn!(
                "link: queue full, {} notification lost (epoch {})",
                if connected { "connect" } else { "disconnect" },
                epoch
            );
        }
    }
}

/// Cloneable producer side, handed to the transport adapter.
///
/// All methods return immediately.
#[derive(Clone)]
pub struct DeliveryHandle(Arc<Link>);

impl DeliveryHandle {
    pub fn on_connect(&self) {
        self.0.notify(true);
    }

    pub fn on_disconnect(&self) {
        self.0.notify(false);
    }

    /// Queue a delivery. Returns the number of bytes dropped.
    pub fn on_data(&self, data: &[u8]) -> usize {
        let epoch = self.0.epoch();
        let mut dropped = 0;
        for piece in data.chunks(DELIVERY_CHUNK) {
            let queued = Vec::<u8, DELIVERY_CHUNK>::from_slice(piece)
                .is_ok_and(|bytes| self.0.queue.try_send(LinkEvent::Data { epoch, bytes }).is_ok());
            if !queued {
                dropped += piece.len();
            }
        }
        if dropped > 0 {
            self.0
                .dropped_bytes
                .fetch_add(dropped as u32, Ordering::Relaxed);
            warn!("link: queue full, dropped {} bytes", dropped);
        }
        dropped
    }

    /// Ask the dispatcher to stop once the events queued so far are handled.
    pub fn shutdown(&self) {
        self.0.shutdown.signal(());
    }

    pub fn dropped_bytes(&self) -> u32 {
        self.0.dropped_bytes()
    }
}
