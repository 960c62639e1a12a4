// Update manager: the state machine sequencing check -> download firmware ->
// (optional) download filesystem image -> finalize -> reboot.
//
// One background thread does all blocking download/write work. Every other
// operation runs on the caller's context and touches shared state only
// through short locked critical sections; no lock is ever held across a
// network or flash call.

use std::cmp::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::fetch::{get_with_retry, read_to_vec, FetchError, Transport};
use crate::release::{parse_release, Release};
use crate::state::{OtaState, OtaStatus, StateLock};
use crate::version::compare_versions;
use crate::writer::{
    write_filesystem, write_firmware, DataPartition, FirmwareSlot, Progress, Stage, UpdateError,
};

/// Platform seam: everything the update manager needs from the device.
/// Implemented over ESP-IDF in the firmware crate and by in-memory mocks in
/// tests.
pub trait Device: Send + Sync + 'static {
    fn transport(&self) -> &dyn Transport;

    /// Open a staging session target in the inactive firmware slot.
    fn open_firmware_slot(&self) -> Result<Box<dyn FirmwareSlot>, UpdateError>;

    /// Locate the raw filesystem data partition.
    fn open_filesystem_partition(&self) -> Result<Box<dyn DataPartition>, UpdateError>;

    fn network_up(&self) -> bool;

    /// True if the bootloader still marks the running slot pending
    /// verification (it would auto-rollback on the next reset).
    fn pending_verify(&self) -> bool;

    /// Mark the running slot valid, cancelling the pending rollback.
    fn mark_app_valid(&self) -> Result<(), String>;

    fn restart(&self);
}

#[derive(Debug, Clone)]
pub struct UpdateConfig {
    /// Release feed endpoint (GitHub releases API shape).
    pub releases_url: String,
    pub check_timeout: Duration,
    pub download_timeout: Duration,
    /// Pause between a successful update and the restart, so callers can
    /// observe the final status.
    pub reboot_delay: Duration,
}

/// Handle to the OTA subsystem. Cheap to clone; all clones share the same
/// state record and device.
pub struct UpdateManager<D: Device> {
    state: Arc<StateLock>,
    device: Arc<D>,
    config: Arc<UpdateConfig>,
    started: Instant,
}

impl<D: Device> Clone for UpdateManager<D> {
    fn clone(&self) -> Self {
        UpdateManager {
            state: Arc::clone(&self.state),
            device: Arc::clone(&self.device),
            config: Arc::clone(&self.config),
            started: self.started,
        }
    }
}

impl<D: Device> UpdateManager<D> {
    pub fn new(device: D, config: UpdateConfig, current_version: &str) -> Self {
        UpdateManager {
            state: Arc::new(StateLock::new(OtaState::new(current_version))),
            device: Arc::new(device),
            config: Arc::new(config),
            started: Instant::now(),
        }
    }

    /// Boot-time rollback participation. Must run once at startup before any
    /// other call: a crash-looping new image would otherwise auto-revert.
    /// Idempotent - a slot already marked valid is left alone.
    pub fn setup(&self) {
        if !self.device.pending_verify() {
            return;
        }
        match self.device.mark_app_valid() {
            Ok(()) => log::info!("OTA: current app marked valid, rollback cancelled"),
            Err(e) => log::warn!("OTA: failed to mark app valid: {}", e),
        }
    }

    /// Synchronously query the release feed and publish the outcome. Returns
    /// false when refused (busy or lock timeout) or when the check failed.
    pub fn check_for_update(&self) -> bool {
        {
            let Some(mut st) = self.state.lock() else {
                return false;
            };
            if st.checking || st.update_in_progress {
                return false;
            }
            st.checking = true;
            st.last_check_ok = false;
            st.last_error = None;
        }

        // Network round trip runs unlocked.
        let result = self.fetch_release();

        let Some(mut st) = self.state.lock() else {
            return false;
        };
        st.checking = false;
        st.last_check_ms = self.uptime_ms();

        match result {
            Ok(release) => {
                st.update_available =
                    compare_versions(&st.current_version, &release.version) == Ordering::Less;
                log::info!(
                    "OTA check: current {} remote {} (update {})",
                    st.current_version,
                    release.version,
                    if st.update_available { "available" } else { "not needed" }
                );
                st.last_check_ok = true;
                st.remote_version = Some(release.version);
                st.firmware_url = Some(release.firmware_url);
                st.filesystem_url = release.filesystem_url;
                st.notes = release.notes;
                st.last_error = None;
                true
            }
            Err(e) => {
                log::warn!("OTA check failed: {}", e);
                st.last_check_ok = false;
                st.clear_release_info();
                st.last_error = Some(e.to_string());
                false
            }
        }
    }

    fn fetch_release(&self) -> Result<Release, FetchError> {
        let mut body = get_with_retry(
            self.device.transport(),
            &self.config.releases_url,
            self.config.check_timeout,
        )?;
        let bytes = read_to_vec(body.as_mut())?;
        parse_release(&bytes)
    }

    /// Spawn the background update task. Non-blocking; returns whether the
    /// task was accepted. Exactly one of two racing calls can win: the loser
    /// observes `update_in_progress` under the same lock the winner set it.
    pub fn start_update(&self) -> bool {
        let Some(mut st) = self.state.lock() else {
            return false;
        };
        if st.checking || st.update_in_progress {
            return false;
        }
        if !self.device.network_up() {
            st.last_error = Some("WiFi not connected".to_string());
            return false;
        }
        let firmware_url = match (st.update_available, st.firmware_url.clone()) {
            (true, Some(url)) => url,
            _ => {
                st.last_error = Some("No update available".to_string());
                return false;
            }
        };
        let filesystem_url = st.filesystem_url.clone();

        st.update_in_progress = true;
        st.reboot_required = false;
        st.progress = 0;
        st.last_error = None;
        drop(st);

        let worker = self.clone();
        let spawned = thread::Builder::new()
            .name("ota_update".to_string())
            .spawn(move || worker.run_update(firmware_url, filesystem_url));

        if spawned.is_err() {
            if let Some(mut st) = self.state.lock() {
                st.update_in_progress = false;
                st.last_error = Some("Failed to start OTA task".to_string());
            }
            return false;
        }
        true
    }

    /// Used by callers to gate competing operations (e.g. refusing a config
    /// change mid-update).
    pub fn is_busy(&self) -> bool {
        self.state
            .lock()
            .map(|st| st.checking || st.update_in_progress)
            .unwrap_or(false)
    }

    pub fn status(&self) -> OtaStatus {
        match self.state.lock() {
            Some(st) => OtaStatus::from_state(&st),
            None => OtaStatus::unavailable(),
        }
    }

    pub fn status_json(&self) -> String {
        serde_json::to_string(&self.status()).unwrap_or_else(|_| "{}".to_string())
    }

    fn uptime_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    // Background task body. Any failure is recorded into `last_error` and
    // terminates the run; only a fully successful update reboots the device.
    fn run_update(&self, firmware_url: String, filesystem_url: Option<String>) {
        let has_filesystem = filesystem_url.is_some();
        log::info!(
            "OTA update started ({} stage{})",
            if has_filesystem { 2 } else { 1 },
            if has_filesystem { "s" } else { "" }
        );

        let result = self
            .download_firmware(&firmware_url, has_filesystem)
            .and_then(|()| match &filesystem_url {
                Some(url) => {
                    // Firmware slot is committed at this point. A filesystem
                    // failure from here on is reported, not rolled back;
                    // there is no atomic two-image commit.
                    self.publish_progress(50);
                    self.download_filesystem(url)
                }
                None => Ok(()),
            });

        match result {
            Err(e) => {
                log::error!("OTA update failed: {}", e);
                if let Some(mut st) = self.state.lock() {
                    st.last_error = Some(e.to_string());
                    st.update_in_progress = false;
                    st.reboot_required = false;
                }
            }
            Ok(()) => {
                if let Some(mut st) = self.state.lock() {
                    st.progress = 100;
                    st.update_in_progress = false;
                    st.reboot_required = true;
                    st.last_error = None;
                }
                log::info!("OTA update successful, rebooting");
                thread::sleep(self.config.reboot_delay);
                self.device.restart();
            }
        }
    }

    fn download_firmware(&self, url: &str, has_filesystem: bool) -> Result<(), UpdateError> {
        let mut body = get_with_retry(self.device.transport(), url, self.config.download_timeout)?;
        let mut slot = self.device.open_firmware_slot()?;
        write_firmware(body.as_mut(), slot.as_mut(), |p| {
            self.publish_progress(scale_progress(p, has_filesystem));
        })
    }

    fn download_filesystem(&self, url: &str) -> Result<(), UpdateError> {
        let mut body = get_with_retry(self.device.transport(), url, self.config.download_timeout)?;
        let mut partition = self.device.open_filesystem_partition()?;
        write_filesystem(body.as_mut(), partition.as_mut(), |p| {
            self.publish_progress(scale_progress(p, true));
        })
    }

    // Progress is monotonically non-decreasing within a run; stale or
    // out-of-order samples are dropped under the lock.
    fn publish_progress(&self, pct: u8) {
        if let Some(mut st) = self.state.lock() {
            if pct > st.progress {
                st.progress = pct;
            }
        }
    }
}

/// Map raw per-stage progress onto the unified percentage: 0..=100 for a
/// firmware-only run, 0..=50 firmware then 50..=100 filesystem otherwise.
fn scale_progress(p: Progress, has_filesystem: bool) -> u8 {
    if p.total == 0 {
        return 0;
    }
    let pct = u64::min(p.bytes_written * 100 / p.total, 100) as u8;
    match p.stage {
        Stage::Firmware => {
            if has_filesystem {
                pct / 2
            } else {
                pct
            }
        }
        Stage::Filesystem => 50 + pct / 2,
    }
}
