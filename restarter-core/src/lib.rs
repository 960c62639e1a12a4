//! Restarter Core - hardware-independent OTA update logic for the PC Restarter
//!
//! This crate contains the update manager state machine, release feed parsing,
//! version comparison and image streaming logic. Everything here builds and
//! tests on the host; the firmware crate supplies ESP-IDF implementations of
//! the `Transport`, `FirmwareSlot`, `DataPartition` and `Device` seams.

pub mod fetch;
pub mod manager;
pub mod release;
pub mod state;
pub mod version;
pub mod writer;

pub use fetch::{HttpBody, Transport, TransportError};
pub use manager::{Device, UpdateConfig, UpdateManager};
pub use state::{OtaState, OtaStatus, StateLock};
pub use writer::{DataPartition, FirmwareSlot, Progress, Stage, UpdateError};
