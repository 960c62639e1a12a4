#[cfg(target_os = "espidf")]
mod config;
#[cfg(target_os = "espidf")]
mod logging;
#[cfg(target_os = "espidf")]
mod ota;
#[cfg(target_os = "espidf")]
mod version;
#[cfg(target_os = "espidf")]
mod wifi;

// Generate ESP-IDF app descriptor
// Note: This macro generates warnings about cfg conditions but they're harmless
#[cfg(target_os = "espidf")]
#[allow(unexpected_cfgs)]
mod app_desc {
    esp_idf_sys::esp_app_desc!();
}

#[cfg(target_os = "espidf")]
fn main() -> anyhow::Result<()> {
    use esp_idf_hal::delay::FreeRtos;
    use esp_idf_hal::prelude::Peripherals;
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;
    use log::info;
    use restarter_core::UpdateManager;

    // Initialize ESP-IDF
    esp_idf_svc::sys::link_patches();

    logging::init_logger().expect("Failed to initialize logger");

    info!("PC Restarter {} starting", version::FW_VERSION);
    info!("Boot reason: {:?}", unsafe { esp_idf_sys::esp_reset_reason() });
    info!("Free heap: {} bytes", unsafe {
        esp_idf_sys::esp_get_free_heap_size()
    });

    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;

    let config = config::load_or_default(nvs.clone())?;

    let manager = UpdateManager::new(
        ota::EspDevice::new(),
        config::update_config(),
        version::FW_VERSION,
    );
    // Cancel a pending bootloader rollback before anything else can reset us.
    // Must happen every boot, whether or not an update ever runs.
    manager.setup();

    let _wifi = match wifi::connect(peripherals.modem, sysloop, nvs, &config) {
        Ok(wifi) => Some(wifi),
        Err(e) => {
            log::error!("WiFi connect failed: {:?}", e);
            None
        }
    };

    if config.ota_enabled {
        spawn_periodic_check(manager.clone(), config.ota_check_interval_hours);
    }

    // Relay control, web UI and MQTT attach here as external callers; they
    // drive the update manager through check/start/status/busy only.
    loop {
        FreeRtos::delay_ms(1000);
    }
}

#[cfg(target_os = "espidf")]
fn spawn_periodic_check(
    manager: restarter_core::UpdateManager<ota::EspDevice>,
    interval_hours: u32,
) {
    std::thread::spawn(move || loop {
        std::thread::sleep(std::time::Duration::from_secs(u64::from(interval_hours) * 3600));
        log::info!("Periodic OTA check");
        if manager.check_for_update() {
            log::info!("OTA status: {}", manager.status_json());
        }
    });
}

#[cfg(not(target_os = "espidf"))]
fn main() {
    // The firmware binary only runs on ESP-IDF targets; restarter-core holds
    // everything host-testable.
    eprintln!("esp32-pc-restarter must be built for an ESP-IDF target");
}
