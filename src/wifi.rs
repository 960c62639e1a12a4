use anyhow::{bail, Result};
use esp_idf_hal::modem::Modem;
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    nvs::EspDefaultNvsPartition,
    wifi::{AuthMethod, BlockingWifi, ClientConfiguration, Configuration, EspWifi},
};

use crate::config::Config;

/// Bring up the STA interface with the stored credentials. Provisioning and
/// the captive portal live outside this firmware; credentials come from NVS
/// or wifi_config.h.
pub fn connect(
    modem: Modem,
    sysloop: EspSystemEventLoop,
    nvs: EspDefaultNvsPartition,
    config: &Config,
) -> Result<BlockingWifi<EspWifi<'static>>> {
    if config.wifi_ssid.is_empty() {
        bail!("WiFi SSID cannot be empty");
    }

    let mut esp_wifi = EspWifi::new(modem, sysloop.clone(), Some(nvs))?;

    let cfg = Configuration::Client(ClientConfiguration {
        ssid: config
            .wifi_ssid
            .as_str()
            .try_into()
            .map_err(|_| anyhow::anyhow!("Invalid SSID format: {}", config.wifi_ssid))?,
        password: config
            .wifi_password
            .as_str()
            .try_into()
            .map_err(|_| anyhow::anyhow!("Invalid password format"))?,
        auth_method: if config.wifi_password.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        },
        ..Default::default()
    });
    esp_wifi.set_configuration(&cfg)?;

    let mut wifi = BlockingWifi::wrap(esp_wifi, sysloop)?;
    wifi.start()?;
    log::info!("Connecting to WiFi '{}'...", config.wifi_ssid);
    wifi.connect()?;
    wifi.wait_netif_up()?;
    log::info!("WiFi connected");

    Ok(wifi)
}
