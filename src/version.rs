// Centralized version information

/// Firmware version compared against the release feed's tag.
pub const FW_VERSION: &str = env!("CARGO_PKG_VERSION");
