// OTA device glue - ESP-IDF implementations of the restarter-core seams.
//
// The update flow itself (check, download, stage, commit, reboot) lives in
// restarter-core; this module only knows how to open connections and touch
// flash on this platform.

mod flash;
mod http;

use restarter_core::{DataPartition, Device, FirmwareSlot, Transport, UpdateError};

pub struct EspDevice {
    transport: http::EspTransport,
}

impl EspDevice {
    pub fn new() -> Self {
        EspDevice {
            transport: http::EspTransport,
        }
    }
}

impl Device for EspDevice {
    fn transport(&self) -> &dyn Transport {
        &self.transport
    }

    fn open_firmware_slot(&self) -> Result<Box<dyn FirmwareSlot>, UpdateError> {
        Ok(Box::new(flash::EspFirmwareSlot::open()?))
    }

    fn open_filesystem_partition(&self) -> Result<Box<dyn DataPartition>, UpdateError> {
        Ok(Box::new(flash::EspDataPartition::find(
            crate::config::FILESYSTEM_PARTITION_LABEL,
        )?))
    }

    fn network_up(&self) -> bool {
        // STA netif holding a non-zero IP means the feed is reachable.
        unsafe {
            let mut ip_info: esp_idf_sys::esp_netif_ip_info_t = std::mem::zeroed();
            let netif = esp_idf_sys::esp_netif_get_handle_from_ifkey(
                b"WIFI_STA_DEF\0".as_ptr() as *const core::ffi::c_char,
            );
            !netif.is_null()
                && esp_idf_sys::esp_netif_get_ip_info(netif, &mut ip_info) == esp_idf_sys::ESP_OK
                && ip_info.ip.addr != 0
        }
    }

    fn pending_verify(&self) -> bool {
        flash::pending_verify()
    }

    fn mark_app_valid(&self) -> Result<(), String> {
        flash::mark_app_valid()
    }

    fn restart(&self) {
        unsafe { esp_idf_sys::esp_restart() }
    }
}
