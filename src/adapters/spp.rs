//! Bluetooth Classic SPP adapter.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: Bluedroid SPP server via raw
//!   `esp_idf_svc::sys` bindings (esp-idf-svc has no SPP wrapper).
//! - **all other targets**: nothing; host tests drive
//!   [`DeliveryHandle`](crate::ota::link::DeliveryHandle) directly.
//!
//! The SPP callback runs on the Bluedroid task. It records the connection
//! handle and forwards connect, data and disconnect notifications to the
//! dispatcher through the delivery handle; it never touches transfer state.
//!
//! | SPP event             | Forwarded as                     |
//! |-----------------------|----------------------------------|
//! | `ESP_SPP_INIT_EVT`    | (starts the server, not forwarded) |
//! | `ESP_SPP_SRV_OPEN_EVT`| `DeliveryHandle::on_connect`     |
//! | `ESP_SPP_DATA_IND_EVT`| `DeliveryHandle::on_data`        |
//! | `ESP_SPP_CLOSE_EVT`   | `DeliveryHandle::on_disconnect`  |

#[cfg(target_os = "espidf")]
pub use esp_impl::{SppTransport, start};

/// Connection handle value meaning "no client".
pub const NO_HANDLE: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SppError {
    NotConnected,
    /// Payload longer than one SPP write.
    TooLong,
    /// Bluedroid returned this `esp_err_t`.
    Stack(i32),
}

impl core::fmt::Display for SppError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotConnected => write!(f, "SPP: no client connected"),
            Self::TooLong => write!(f, "SPP: payload too long"),
            Self::Stack(code) => write!(f, "SPP: stack error {code}"),
        }
    }
}

#[cfg(target_os = "espidf")]
mod esp_impl {
    use core::ffi::CStr;
    use core::sync::atomic::{AtomicU32, Ordering};
    use std::sync::OnceLock;

    use anyhow::{Context, bail};
    use esp_idf_svc::bt::{BtClassic, BtDriver};
    use esp_idf_svc::hal::modem::Modem;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;
    use esp_idf_svc::sys;
    use log::{info, warn};

    use super::{NO_HANDLE, SppError};
    use crate::ota::link::DeliveryHandle;
    use crate::ota::ports::Transport;

    /// Server name, NUL-terminated; also used as the device name.
    static SERVER_NAME: OnceLock<heapless::String<33>> = OnceLock::new();
    static DELIVERY: OnceLock<DeliveryHandle> = OnceLock::new();
    static CONN_HANDLE: AtomicU32 = AtomicU32::new(NO_HANDLE);

    /// Bring up the Bluetooth controller and register the SPP server.
    ///
    /// The returned driver must stay alive for the server to keep running.
    pub fn start(
        modem: Modem,
        nvs: EspDefaultNvsPartition,
        device_name: &str,
        delivery: DeliveryHandle,
    ) -> anyhow::Result<BtDriver<'static, BtClassic>> {
        let mut name = heapless::String::<33>::new();
        if name.push_str(device_name).is_err() || name.push('\0').is_err() {
            bail!("device name '{}' too long", device_name);
        }
        if SERVER_NAME.set(name).is_err() || DELIVERY.set(delivery).is_err() {
            bail!("SPP server already started");
        }

        let driver = BtDriver::<BtClassic>::new(modem, Some(nvs)).context("BT driver init")?;

        let cfg = sys::esp_spp_cfg_t {
            mode: sys::esp_spp_mode_t_ESP_SPP_MODE_CB,
            enable_l2cap_ertm: true,
            tx_buffer_size: 0,
        };
        unsafe {
            sys::esp!(sys::esp_spp_register_callback(Some(spp_callback)))
                .context("esp_spp_register_callback")?;
            sys::esp!(sys::esp_spp_enhanced_init(&cfg)).context("esp_spp_enhanced_init")?;
        }

        info!("SPP: controller up, waiting for init");
        Ok(driver)
    }

    fn server_name() -> &'static CStr {
        SERVER_NAME
            .get()
            .and_then(|n| CStr::from_bytes_with_nul(n.as_bytes()).ok())
            .unwrap_or(c"ESP32_OTA_SPP")
    }

    unsafe extern "C" fn spp_callback(
        event: sys::esp_spp_cb_event_t,
        param: *mut sys::esp_spp_cb_param_t,
    ) {
        let Some(delivery) = DELIVERY.get() else {
            return;
        };

        match event {
            sys::esp_spp_cb_event_t_ESP_SPP_INIT_EVT => {
                let name = server_name();
                unsafe {
                    sys::esp_bt_gap_set_device_name(name.as_ptr());
                    sys::esp_bt_gap_set_scan_mode(
                        sys::esp_bt_connection_mode_t_ESP_BT_CONNECTABLE,
                        sys::esp_bt_discovery_mode_t_ESP_BT_GENERAL_DISCOVERABLE,
                    );
                    sys::esp_spp_start_srv(
                        sys::ESP_SPP_SEC_AUTHENTICATE as sys::esp_spp_sec_t,
                        sys::esp_spp_role_t_ESP_SPP_ROLE_SLAVE,
                        0,
                        name.as_ptr(),
                    );
                }
                info!("SPP: server '{}' started", name.to_string_lossy());
            }

            sys::esp_spp_cb_event_t_ESP_SPP_SRV_OPEN_EVT if !param.is_null() => {
                let handle = unsafe { (*param).srv_open.handle };
                CONN_HANDLE.store(handle, Ordering::Release);
                info!("SPP: client connected (handle {})", handle);
                delivery.on_connect();
            }

            sys::esp_spp_cb_event_t_ESP_SPP_DATA_IND_EVT if !param.is_null() => {
                let ind = unsafe { (*param).data_ind };
                if ind.data.is_null() || ind.len == 0 {
                    return;
                }
                let data = unsafe { core::slice::from_raw_parts(ind.data, usize::from(ind.len)) };
                delivery.on_data(data);
            }

            sys::esp_spp_cb_event_t_ESP_SPP_CLOSE_EVT => {
                CONN_HANDLE.store(NO_HANDLE, Ordering::Release);
                info!("SPP: client disconnected");
                delivery.on_disconnect();
            }

            other => log::debug!("SPP: event {}", other),
        }
    }

    /// Outbound half of the SPP link: writes to the current connection.
    #[derive(Default)]
    pub struct SppTransport;

    impl SppTransport {
        pub fn new() -> Self {
            Self
        }
    }

    impl Transport for SppTransport {
        type Error = SppError;

        fn write(&mut self, data: &[u8]) -> Result<(), SppError> {
            let handle = CONN_HANDLE.load(Ordering::Acquire);
            if handle == NO_HANDLE {
                return Err(SppError::NotConnected);
            }
            let len = i32::try_from(data.len()).map_err(|_| SppError::TooLong)?;
            // Bluedroid copies the buffer before returning.
            let ret = unsafe { sys::esp_spp_write(handle, len, data.as_ptr().cast_mut()) };
            if ret != sys::ESP_OK {
                warn!("SPP: write failed ({})", ret);
                return Err(SppError::Stack(ret));
            }
            Ok(())
        }
    }
}
