// Flash write targets - staged OTA slot and raw data partition - plus the
// boot-time rollback mark, over the ESP-IDF OTA/partition API.

use core::ffi::c_void;
use std::ffi::CString;

use esp_idf_sys::{
    esp_ota_abort, esp_ota_begin, esp_ota_end, esp_ota_get_next_update_partition,
    esp_ota_get_running_partition, esp_ota_get_state_partition, esp_ota_handle_t,
    esp_ota_img_states_t, esp_ota_img_states_t_ESP_OTA_IMG_PENDING_VERIFY,
    esp_ota_mark_app_valid_cancel_rollback, esp_ota_set_boot_partition, esp_ota_write,
    esp_partition_erase_range, esp_partition_find_first,
    esp_partition_subtype_t_ESP_PARTITION_SUBTYPE_DATA_SPIFFS, esp_partition_t,
    esp_partition_type_t_ESP_PARTITION_TYPE_DATA, esp_partition_write, ESP_ERR_INVALID_SIZE,
    ESP_OK,
};
use restarter_core::{DataPartition, FirmwareSlot, UpdateError};

/// Staged session in the inactive app slot. `esp_ota_end` +
/// `esp_ota_set_boot_partition` is the atomic activation step; anything
/// short of that leaves the running image bootable.
pub struct EspFirmwareSlot {
    partition: *const esp_partition_t,
    handle: Option<esp_ota_handle_t>,
}

impl EspFirmwareSlot {
    pub fn open() -> Result<Self, UpdateError> {
        let partition = unsafe { esp_ota_get_next_update_partition(core::ptr::null()) };
        if partition.is_null() {
            return Err(UpdateError::InsufficientSpace);
        }
        Ok(EspFirmwareSlot {
            partition,
            handle: None,
        })
    }
}

impl FirmwareSlot for EspFirmwareSlot {
    fn begin(&mut self, total: u64) -> Result<(), UpdateError> {
        if total > u64::from(unsafe { (*self.partition).size }) {
            return Err(UpdateError::InsufficientSpace);
        }

        let mut handle: esp_ota_handle_t = 0;
        let err = unsafe { esp_ota_begin(self.partition, total as _, &mut handle) };
        if err == ESP_ERR_INVALID_SIZE as i32 {
            return Err(UpdateError::InsufficientSpace);
        }
        if err != ESP_OK {
            return Err(UpdateError::WriteFailed(format!(
                "esp_ota_begin failed (err={})",
                err
            )));
        }

        self.handle = Some(handle);
        Ok(())
    }

    fn write(&mut self, chunk: &[u8]) -> Result<(), UpdateError> {
        let handle = self
            .handle
            .ok_or_else(|| UpdateError::WriteFailed("OTA session not started".to_string()))?;
        let err =
            unsafe { esp_ota_write(handle, chunk.as_ptr() as *const c_void, chunk.len() as _) };
        if err != ESP_OK {
            return Err(UpdateError::WriteFailed(format!(
                "esp_ota_write failed (err={})",
                err
            )));
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<(), UpdateError> {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| UpdateError::WriteFailed("OTA session not started".to_string()))?;

        let err = unsafe { esp_ota_end(handle) };
        if err != ESP_OK {
            return Err(UpdateError::WriteFailed(format!(
                "OTA image validation failed (err={})",
                err
            )));
        }

        let err = unsafe { esp_ota_set_boot_partition(self.partition) };
        if err != ESP_OK {
            return Err(UpdateError::WriteFailed(format!(
                "Failed to set boot partition (err={})",
                err
            )));
        }
        Ok(())
    }

    fn abort(&mut self) {
        if let Some(handle) = self.handle.take() {
            unsafe { esp_ota_abort(handle) };
        }
    }
}

impl Drop for EspFirmwareSlot {
    fn drop(&mut self) {
        // Clean up any ongoing OTA session without activating it
        self.abort();
    }
}

/// Raw data partition located by label. Erase granularity is the 4 KiB
/// flash sector; restarter-core rounds erase ranges up before calling in.
pub struct EspDataPartition {
    partition: *const esp_partition_t,
}

impl EspDataPartition {
    pub fn find(label: &str) -> Result<Self, UpdateError> {
        let label = CString::new(label).map_err(|_| UpdateError::PartitionNotFound)?;
        let partition = unsafe {
            esp_partition_find_first(
                esp_partition_type_t_ESP_PARTITION_TYPE_DATA,
                esp_partition_subtype_t_ESP_PARTITION_SUBTYPE_DATA_SPIFFS,
                label.as_ptr(),
            )
        };
        if partition.is_null() {
            return Err(UpdateError::PartitionNotFound);
        }
        Ok(EspDataPartition { partition })
    }
}

impl DataPartition for EspDataPartition {
    fn capacity(&self) -> u64 {
        u64::from(unsafe { (*self.partition).size })
    }

    fn erase(&mut self, len: u64) -> Result<(), UpdateError> {
        let err = unsafe { esp_partition_erase_range(self.partition, 0, len as _) };
        if err != ESP_OK {
            return Err(UpdateError::WriteFailed(format!(
                "LittleFS erase failed (err={})",
                err
            )));
        }
        Ok(())
    }

    fn write(&mut self, offset: u64, chunk: &[u8]) -> Result<(), UpdateError> {
        let err = unsafe {
            esp_partition_write(
                self.partition,
                offset as _,
                chunk.as_ptr() as *const c_void,
                chunk.len() as _,
            )
        };
        if err != ESP_OK {
            return Err(UpdateError::WriteFailed(format!(
                "LittleFS flash write failed (err={})",
                err
            )));
        }
        Ok(())
    }
}

/// True if the bootloader still marks the running slot pending verification.
pub fn pending_verify() -> bool {
    unsafe {
        let running = esp_ota_get_running_partition();
        if running.is_null() {
            return false;
        }
        let mut state: esp_ota_img_states_t = 0;
        esp_ota_get_state_partition(running, &mut state) == ESP_OK
            && state == esp_ota_img_states_t_ESP_OTA_IMG_PENDING_VERIFY
    }
}

/// Mark the running slot valid, cancelling the bootloader's auto-rollback.
pub fn mark_app_valid() -> Result<(), String> {
    let err = unsafe { esp_ota_mark_app_valid_cancel_rollback() };
    if err != ESP_OK {
        return Err(format!("esp_ota_mark_app_valid_cancel_rollback err={}", err));
    }
    Ok(())
}
