use std::time::Duration;

use anyhow::Result;
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs};
use serde::{Deserialize, Serialize};

const CONFIG_NAMESPACE: &str = "restarter";
const CONFIG_KEY: &str = "config";

/// Release feed queried for updates (GitHub releases API).
pub const OTA_RELEASES_URL: &str =
    "https://api.github.com/repos/pcrestarter/pc-restarter/releases/latest";
pub const OTA_CHECK_TIMEOUT: Duration = Duration::from_secs(10);
pub const OTA_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);
/// Grace period between a finished update and the restart, so the final
/// status broadcast can be observed.
pub const OTA_REBOOT_DELAY: Duration = Duration::from_secs(1);
pub const OTA_ACCEPT: &str = "application/vnd.github.v3+json";
pub const OTA_USER_AGENT: &str = "PC-Restarter-OTA/1.0";
/// Label of the raw data partition holding the LittleFS image.
pub const FILESYSTEM_PARTITION_LABEL: &str = "littlefs";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // WiFi settings
    pub wifi_ssid: String,
    pub wifi_password: String,

    // OTA settings
    pub ota_enabled: bool,
    pub ota_check_interval_hours: u32,
}

impl Default for Config {
    fn default() -> Self {
        // WiFi credentials come from wifi_config.h via build.rs; the file is
        // not committed to git.
        Self {
            wifi_ssid: env!("WIFI_SSID").to_string(),
            wifi_password: env!("WIFI_PASSWORD").to_string(),
            ota_enabled: true,
            ota_check_interval_hours: 24,
        }
    }
}

impl Config {
    pub fn save(&self, nvs_partition: EspDefaultNvsPartition) -> Result<()> {
        let mut nvs = EspNvs::new(nvs_partition, CONFIG_NAMESPACE, true)?;
        let json = serde_json::to_vec(self)?;
        nvs.set_blob(CONFIG_KEY, &json)?;
        log::info!("Configuration saved to NVS");
        Ok(())
    }
}

pub fn load_or_default(nvs_partition: EspDefaultNvsPartition) -> Result<Config> {
    match load_from_nvs(nvs_partition.clone()) {
        Ok(config) => {
            log::info!("Loaded configuration from NVS");
            Ok(config)
        }
        Err(e) => {
            log::warn!("Failed to load config from NVS: {:?}, using defaults", e);
            let config = Config::default();

            // Try to save default config to NVS for next time
            if let Err(save_err) = config.save(nvs_partition) {
                log::warn!("Failed to save default config to NVS: {:?}", save_err);
            }

            Ok(config)
        }
    }
}

fn load_from_nvs(nvs_partition: EspDefaultNvsPartition) -> Result<Config> {
    let nvs = EspNvs::new(nvs_partition, CONFIG_NAMESPACE, true)?;

    let mut buf = vec![0u8; 2048]; // Max config size
    let data = nvs
        .get_blob(CONFIG_KEY, &mut buf)?
        .ok_or_else(|| anyhow::anyhow!("Config not found in NVS"))?;

    let config: Config = serde_json::from_slice(data)?;

    Ok(config)
}

/// Fixed OTA parameters handed to the update manager.
pub fn update_config() -> restarter_core::UpdateConfig {
    restarter_core::UpdateConfig {
        releases_url: OTA_RELEASES_URL.to_string(),
        check_timeout: OTA_CHECK_TIMEOUT,
        download_timeout: OTA_DOWNLOAD_TIMEOUT,
        reboot_delay: OTA_REBOOT_DELAY,
    }
}
