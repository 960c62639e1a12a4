// Shared OTA state record, its bounded-timeout lock, and the status snapshot
// handed to external callers.

use std::sync::{Mutex, MutexGuard, TryLockError};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Upper bound on any state-lock acquisition. No accessor holds the lock
/// across network or flash I/O, so contention windows are short.
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(2);

const LOCK_POLL: Duration = Duration::from_millis(10);

/// The one shared mutable record of the OTA subsystem. Lives for the process
/// lifetime; transient fields are overwritten on every check/update cycle.
#[derive(Debug, Clone, Default)]
pub struct OtaState {
    pub checking: bool,
    pub update_in_progress: bool,
    pub update_available: bool,
    pub last_check_ok: bool,
    pub reboot_required: bool,
    /// Unified 0..=100 percentage across one or two stages, monotonically
    /// non-decreasing within a single update run.
    pub progress: u8,
    /// Milliseconds since process start at the end of the last check.
    pub last_check_ms: u64,
    pub current_version: String,
    pub remote_version: Option<String>,
    pub firmware_url: Option<String>,
    pub filesystem_url: Option<String>,
    pub notes: String,
    pub last_error: Option<String>,
}

impl OtaState {
    pub fn new(current_version: &str) -> Self {
        OtaState {
            current_version: current_version.to_string(),
            ..Default::default()
        }
    }

    /// Drop everything learned from the last successful check.
    pub fn clear_release_info(&mut self) {
        self.update_available = false;
        self.remote_version = None;
        self.firmware_url = None;
        self.filesystem_url = None;
        self.notes.clear();
    }
}

/// Mutex wrapper whose acquisition is bounded by [`LOCK_TIMEOUT`]. A poisoned
/// lock is recovered rather than propagated; the state record stays usable
/// after a panicking holder.
pub struct StateLock {
    inner: Mutex<OtaState>,
}

impl StateLock {
    pub fn new(state: OtaState) -> Self {
        StateLock {
            inner: Mutex::new(state),
        }
    }

    /// Acquire the state lock, giving up after [`LOCK_TIMEOUT`].
    pub fn lock(&self) -> Option<MutexGuard<'_, OtaState>> {
        let deadline = Instant::now() + LOCK_TIMEOUT;
        loop {
            match self.inner.try_lock() {
                Ok(guard) => return Some(guard),
                Err(TryLockError::Poisoned(poisoned)) => return Some(poisoned.into_inner()),
                Err(TryLockError::WouldBlock) => {
                    if Instant::now() >= deadline {
                        log::error!("OTA state lock timed out after {:?}", LOCK_TIMEOUT);
                        return None;
                    }
                    thread::sleep(LOCK_POLL);
                }
            }
        }
    }
}

/// Immutable snapshot served to the web API and log output. Key spelling
/// matches the device's JSON status contract.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OtaStatus {
    pub checking: bool,
    #[serde(rename = "updateInProgress")]
    pub update_in_progress: bool,
    #[serde(rename = "available")]
    pub update_available: bool,
    #[serde(rename = "lastCheckOk")]
    pub last_check_ok: bool,
    #[serde(rename = "rebootRequired")]
    pub reboot_required: bool,
    pub progress: u8,
    #[serde(rename = "lastCheckMs")]
    pub last_check_ms: u64,
    #[serde(rename = "currentVersion")]
    pub current_version: String,
    #[serde(rename = "remoteVersion")]
    pub remote_version: String,
    pub notes: String,
    pub error: String,
}

impl OtaStatus {
    pub fn from_state(state: &OtaState) -> Self {
        OtaStatus {
            checking: state.checking,
            update_in_progress: state.update_in_progress,
            update_available: state.update_available,
            last_check_ok: state.last_check_ok,
            reboot_required: state.reboot_required,
            progress: state.progress,
            last_check_ms: state.last_check_ms,
            current_version: state.current_version.clone(),
            remote_version: state.remote_version.clone().unwrap_or_default(),
            notes: state.notes.clone(),
            error: state.last_error.clone().unwrap_or_default(),
        }
    }

    /// Degraded view returned when the state lock cannot be acquired within
    /// its timeout.
    pub fn unavailable() -> Self {
        OtaStatus {
            error: "OTA status unavailable".to_string(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_release_info_resets_transient_fields() {
        let mut state = OtaState::new("1.0.0");
        state.update_available = true;
        state.remote_version = Some("1.1.0".into());
        state.firmware_url = Some("https://dl/fw.bin".into());
        state.filesystem_url = Some("https://dl/fs.bin".into());
        state.notes = "notes".into();

        state.clear_release_info();

        assert!(!state.update_available);
        assert_eq!(state.remote_version, None);
        assert_eq!(state.firmware_url, None);
        assert_eq!(state.filesystem_url, None);
        assert!(state.notes.is_empty());
        // Unrelated fields survive.
        assert_eq!(state.current_version, "1.0.0");
    }

    #[test]
    fn lock_times_out_while_held_elsewhere() {
        let lock = std::sync::Arc::new(StateLock::new(OtaState::new("1.0.0")));
        let held = lock.lock().unwrap();
        let contender = std::sync::Arc::clone(&lock);
        let waiter = thread::spawn(move || contender.lock().is_none());
        assert!(waiter.join().unwrap());
        drop(held);
        assert!(lock.lock().is_some());
    }

    #[test]
    fn status_json_uses_wire_keys() {
        let mut state = OtaState::new("1.3.0");
        state.remote_version = Some("1.4.0".into());
        state.update_available = true;
        state.last_check_ok = true;
        let json = serde_json::to_string(&OtaStatus::from_state(&state)).unwrap();
        for key in [
            "\"checking\"",
            "\"updateInProgress\"",
            "\"available\"",
            "\"lastCheckOk\"",
            "\"rebootRequired\"",
            "\"progress\"",
            "\"lastCheckMs\"",
            "\"currentVersion\"",
            "\"remoteVersion\"",
            "\"notes\"",
            "\"error\"",
        ] {
            assert!(json.contains(key), "missing {key} in {json}");
        }
    }

    #[test]
    fn unavailable_view_carries_only_the_error() {
        let status = OtaStatus::unavailable();
        assert_eq!(status.error, "OTA status unavailable");
        assert_eq!(status.progress, 0);
        assert!(!status.update_in_progress);
    }
}
