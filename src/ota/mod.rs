//! Bluetooth serial OTA engine.
//!
//! ```text
//! ┌──────────────┐ DeliveryHandle ┌──────┐  LinkEvent  ┌────────────┐
//! │ SPP callback │───────────────▶│ Link │────────────▶│ Dispatcher │
//! └──────────────┘                └──────┘             └─────┬──────┘
//!                                                            │ per connection
//!                          ┌─────────────────────────────────┴─────┐
//!                          │ RingBuffer ─▶ try_decode ─▶ Transfer-  │
//!                          │                             Session    │
//!                          └───────────────────────┬───────────────┘
//!                                                  ▼
//!                                 FirmwareStore · Transport · EventSink
//! ```

pub mod decoder;
pub mod dispatch;
pub mod events;
pub mod link;
pub mod ports;
pub mod protocol;
pub mod ring_buffer;
pub mod session;
pub mod uploader;

pub use decoder::{Decoded, try_decode};
pub use dispatch::{Dispatcher, RX_BUFFER_SIZE, RunExit};
pub use events::{AbortReason, FailureReason, TransferEvent, TransferStats};
pub use link::{DeliveryHandle, Link, LinkEvent};
pub use ports::{Clock, EventSink, FirmwareStore, Transport};
pub use protocol::{Frame, Reply};
pub use ring_buffer::RingBuffer;
pub use session::{Step, TransferSession, TransferState};
pub use uploader::{UploadLink, UploadReport, Uploader};
