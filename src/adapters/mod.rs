//! Adapters: concrete implementations of the OTA port traits.
//!
//! | Adapter     | Implements      | Connects to                        |
//! |-------------|-----------------|------------------------------------|
//! | `esp_store` | FirmwareStore   | ESP-IDF OTA partitions (esp-ota)   |
//! | `sim_store` | FirmwareStore   | In-memory two-slot flash (host)    |
//! | `spp`       | Transport       | Bluedroid SPP server               |
//! |             | (DeliveryHandle)| SPP callback → dispatcher          |
//! | `log_sink`  | EventSink       | Serial log output                  |
//! | `time`      | Clock           | ESP32 system timer                 |

pub mod esp_store;
pub mod log_sink;
pub mod sim_store;
pub mod spp;
pub mod time;
