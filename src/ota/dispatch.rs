//! Dispatch loop: the single consumer of link events.
//!
//! ```text
//!  LinkEvent ──▶ Connection.rx (ring buffer) ──▶ try_decode ──▶ TransferSession
//!                                                                   │
//!                                              Transport ◀── ACK/NAK┘
//! ```
//!
//! Every piece of transfer state lives inside a [`Connection`] created on
//! connect and dropped on disconnect, so stale bytes or a half-written
//! image can never leak into the next client's session.
//!
//! Link events carry a connection epoch. Bytes from an older epoch are
//! discarded. Once the queue is drained, an epoch mismatch with the link
//! means a notification was lost, and the dispatcher resyncs to the link's
//! current connected state.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use async_io_mini::Timer;
use futures_lite::future;
use log::{debug, info, warn};

use crate::config::OtaConfig;

use super::decoder::{Decoded, try_decode};
use super::events::{AbortReason, TransferEvent};
use super::link::{Link, LinkEvent, epoch_after};
use super::ports::{Clock, EventSink, FirmwareStore, Transport};
use super::protocol::Reply;
use super::ring_buffer::RingBuffer;
use super::session::{TransferSession, TransferState};

/// Receive buffer capacity per connection.
pub const RX_BUFFER_SIZE: usize = 4096;

/// Why [`Dispatcher::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    /// A shutdown request was processed.
    Shutdown,
    /// A finished image was activated and the store asked to restart.
    Rebooted,
}

/// What woke the dispatcher.
enum Wake {
    Link(LinkEvent),
    Shutdown,
    Idle,
}

/// Per-client state.
struct Connection<S: FirmwareStore> {
    rx: RingBuffer<RX_BUFFER_SIZE>,
    transfer: TransferSession<S>,
}

impl<S: FirmwareStore> Connection<S> {
    fn new(config: &OtaConfig) -> Box<Self> {
        Box::new(Self {
            rx: RingBuffer::new(),
            transfer: TransferSession::new(config.size_mismatch),
        })
    }
}

pub struct Dispatcher<S, T, C, E>
where
    S: FirmwareStore,
    T: Transport,
    C: Clock,
    E: EventSink,
{
    link: Arc<Link>,
    store: S,
    transport: T,
    clock: C,
    sink: E,
    config: OtaConfig,
    conn: Option<Box<Connection<S>>>,
    /// Epoch of the last link notification applied.
    epoch: u32,
}

impl<S, T, C, E> Dispatcher<S, T, C, E>
where
    S: FirmwareStore,
    T: Transport,
    C: Clock,
    E: EventSink,
{
    pub fn new(link: Arc<Link>, store: S, transport: T, clock: C, sink: E, config: OtaConfig) -> Self {
        Self {
            link,
            store,
            transport,
            clock,
            sink,
            config,
            conn: None,
            epoch: 0,
        }
    }

    // ── Accessors ─────────────────────────────────────────────

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Transfer state of the current connection (Idle when disconnected).
    pub fn transfer_state(&self) -> TransferState {
        self.conn
            .as_ref()
            .map_or(TransferState::Idle, |c| c.transfer.state())
    }

    pub fn bytes_received(&self) -> u32 {
        self.conn.as_ref().map_or(0, |c| c.transfer.bytes_received())
    }

    /// Bytes waiting in the receive buffer.
    pub fn buffered(&self) -> usize {
        self.conn.as_ref().map_or(0, |c| c.rx.len())
    }

    /// `Ok` while a transfer is in flight, `InvalidState` otherwise.
    pub fn finish_update(&self) -> crate::error::Result<()> {
        match &self.conn {
            Some(c) => c.transfer.finish_update(),
            None => Err(crate::error::Error::InvalidState),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn sink(&self) -> &E {
        &self.sink
    }

    // ── Loop ──────────────────────────────────────────────────

    /// Block on link events until shutdown or reboot.
    pub fn run(&mut self) -> RunExit {
        info!(
            "OTA: dispatcher running (idle timeout {} ms)",
            self.config.idle_timeout_ms
        );
        loop {
            if self.link.is_empty() {
                self.resync();
            }
            let wake = future::block_on(self.next_event());
            if let Some(exit) = self.process(wake) {
                return exit;
            }
        }
    }

    /// Handle every queued event without blocking, then honour a pending
    /// shutdown or expire a stalled transfer.
    pub fn pump(&mut self) -> Option<RunExit> {
        while let Some(event) = self.link.try_receive() {
            if let Some(exit) = self.process(Wake::Link(event)) {
                return Some(exit);
            }
        }
        self.resync();
        if self.link.shutdown_requested() {
            return self.process(Wake::Shutdown);
        }
        self.process(Wake::Idle)
    }

    /// Queued events win over a shutdown request, which wins over the idle
    /// timer.
    async fn next_event(&self) -> Wake {
        let event = async { Wake::Link(self.link.receive().await) };
        let shutdown = async {
            self.link.wait_shutdown().await;
            Wake::Shutdown
        };
        match self.idle_wait() {
            None => future::or(event, shutdown).await,
            Some(wait) => {
                let idle = async {
                    Timer::after(wait).await;
                    Wake::Idle
                };
                future::or(event, future::or(shutdown, idle)).await
            }
        }
    }

    /// Time until the current transfer counts as stalled.
    fn idle_wait(&self) -> Option<Duration> {
        let timeout = self.config.idle_timeout()?;
        let conn = self.conn.as_ref()?;
        conn.transfer
            .idle_remaining_ms(self.clock.now_ms(), timeout.as_millis() as u64)
            .map(Duration::from_millis)
    }

    fn process(&mut self, wake: Wake) -> Option<RunExit> {
        match wake {
            Wake::Idle => self.expire_idle(),
            Wake::Shutdown => {
                info!("OTA: shutdown requested");
                self.drop_connection(AbortReason::Shutdown);
                return Some(RunExit::Shutdown);
            }
            Wake::Link(LinkEvent::Connected { epoch }) => {
                if self.advance_epoch(epoch) {
                    self.on_connect();
                }
            }
            Wake::Link(LinkEvent::Disconnected { epoch }) => {
                if self.advance_epoch(epoch) {
                    self.on_disconnect();
                }
            }
            Wake::Link(LinkEvent::Data { epoch, bytes }) => {
                if epoch_after(self.epoch, epoch) {
                    debug!("OTA: {} bytes from epoch {} discarded", bytes.len(), epoch);
                    return None;
                }
                if epoch_after(epoch, self.epoch) {
                    // Data only flows while connected, so the notifications
                    // in between ended with a connect that never arrived.
                    warn!("OTA: missed connect (epoch {} -> {})", self.epoch, epoch);
                    self.epoch = epoch;
                    self.on_connect();
                }
                return self.on_data(&bytes);
            }
        }
        None
    }

    /// Adopt a notification's epoch. `false` when it is already covered.
    fn advance_epoch(&mut self, epoch: u32) -> bool {
        if !epoch_after(epoch, self.epoch) {
            debug!("OTA: notification from epoch {} already applied", epoch);
            return false;
        }
        self.epoch = epoch;
        true
    }

    // ── Event handlers ────────────────────────────────────────

    fn on_connect(&mut self) {
        if self.conn.is_some() {
            warn!("OTA: connect while connected, resetting session");
            self.drop_connection(AbortReason::Disconnected);
        }
        info!("OTA: client connected");
        self.conn = Some(Connection::new(&self.config));
        self.sink.emit(&TransferEvent::Connected);
    }

    fn on_disconnect(&mut self) {
        info!("OTA: client disconnected");
        self.drop_connection(AbortReason::Disconnected);
        self.sink.emit(&TransferEvent::Disconnected);
    }

    /// Catch up on notifications that were lost because the queue was
    /// full. Only called with the queue drained, so every older event has
    /// already been handled.
    fn resync(&mut self) {
        let epoch = self.link.epoch();
        if epoch == self.epoch {
            return;
        }
        let connected = self.link.is_connected();
        warn!(
            "OTA: link notifications lost (epoch {} -> {}), resyncing",
            self.epoch, epoch
        );
        self.epoch = epoch;
        if self.conn.is_some() {
            self.on_disconnect();
        }
        if connected {
            self.on_connect();
        }
    }

    fn drop_connection(&mut self, reason: AbortReason) {
        if let Some(mut conn) = self.conn.take() {
            conn.transfer.abort(&mut self.store, reason, &mut self.sink);
            conn.rx.clear();
        }
    }

    fn on_data(&mut self, data: &[u8]) -> Option<RunExit> {
        let now = self.clock.now_ms();
        let Some(conn) = self.conn.as_mut() else {
            warn!("OTA: {} bytes with no connection, dropped", data.len());
            return None;
        };
        conn.transfer.touch(now);

        let dropped = conn.rx.append(data);
        if dropped > 0 {
            warn!(
                "OTA: rx buffer overflow ({} byte capacity), {} bytes overwritten",
                conn.rx.capacity(),
                dropped
            );
            self.sink.emit(&TransferEvent::Overflow { dropped });
        }

        let mut reboot = false;
        loop {
            let step = match try_decode(&mut conn.rx) {
                Decoded::NeedMore => break,
                Decoded::Frame(frame) => {
                    debug!("OTA: frame {:?}", frame);
                    conn.transfer
                        .handle_frame(&frame, &mut self.store, now, &mut self.sink)
                }
                Decoded::Malformed { declared_len } => {
                    conn.transfer.reject_malformed(declared_len, &mut self.sink)
                }
                Decoded::Discarded(byte) => {
                    debug!("OTA: discarding stray byte 0x{:02X}", byte);
                    continue;
                }
            };
            send_reply(&mut self.transport, step.reply);
            if step.reboot {
                reboot = true;
                break;
            }
        }

        reboot.then(|| self.reboot())
    }

    fn expire_idle(&mut self) {
        let Some(timeout) = self.config.idle_timeout() else {
            return;
        };
        let now = self.clock.now_ms();
        let Some(conn) = self.conn.as_mut() else {
            return;
        };
        if conn.transfer.idle_remaining_ms(now, timeout.as_millis() as u64) != Some(0) {
            return;
        }
        warn!("OTA: no input for {:?}", timeout);
        conn.transfer
            .abort(&mut self.store, AbortReason::IdleTimeout, &mut self.sink);
        conn.rx.clear();
    }

    fn reboot(&mut self) -> RunExit {
        let grace = u64::from(self.config.reboot_grace_ms);
        info!("OTA: update complete, rebooting in {} ms", grace);
        if grace > 0 {
            std::thread::sleep(Duration::from_millis(grace));
        }
        self.store.reboot();
        RunExit::Rebooted
    }
}

/// Build a dispatcher on a new thread named `ota-dispatch` and run it.
///
/// The dispatcher is constructed on the thread itself, so platform
/// sessions that are not `Send` never cross threads.
pub fn spawn<S, T, C, E, F>(stack_kb: usize, make: F) -> std::io::Result<JoinHandle<RunExit>>
where
    S: FirmwareStore,
    T: Transport,
    C: Clock,
    E: EventSink,
    F: FnOnce() -> Dispatcher<S, T, C, E> + Send + 'static,
{
    info!("Spawning 'ota-dispatch' (stack={}KB)", stack_kb);
    std::thread::Builder::new()
        .name("ota-dispatch".into())
        .stack_size(stack_kb * 1024)
        .spawn(move || make().run())
}

/// Write one reply byte. A failed write is not fatal: the client times out
/// and resends.
fn send_reply<T: Transport>(transport: &mut T, reply: Reply) {
    if let Err(e) = transport.write(&[reply.as_byte()]) {
        warn!("OTA: failed to send {:?}: {:?}", reply, e);
    }
}
