//! Constants and configuration values for the hot-plug core
//!
//! Centralizes all magic numbers, paths, and configuration defaults.
//! This is the SINGLE SOURCE OF TRUTH for all configuration values.
//! Never use magic numbers in other files - add them here first.

use std::time::Duration;

/// Hot-plug pin and port enumeration sizes
pub mod pins {
    /// Number of physical hot-plug detect pins (raw mask bits 0..NUM_PINS)
    pub const NUM_PINS: usize = 10;

    /// Number of logical output ports (raw mask bits 0..NUM_PORTS)
    pub const NUM_PORTS: usize = 6;
}

/// Interrupt storm detection and mitigation
pub mod storm {
    use super::Duration;

    /// Length of one counting window in milliseconds
    pub const DETECT_PERIOD_MS: u64 = 1000;

    /// Delay before storm-disabled pins get their interrupt back (2 minutes)
    pub const REENABLE_DELAY_MS: u64 = 2 * 60 * 1000;

    /// Default weighted-count threshold per window.
    /// Five long pulses per second are tolerated, the sixth is a storm.
    pub const DEFAULT_THRESHOLD: u32 = 50;

    /// Weight of a long pulse (cable plug/unplug chatter)
    pub const LONG_PULSE_WEIGHT: u32 = 10;

    /// Weight of a short pulse (sink IRQ / sideband traffic)
    pub const SHORT_PULSE_WEIGHT: u32 = 1;

    /// Default detection period
    pub const DETECT_PERIOD: Duration = Duration::from_millis(DETECT_PERIOD_MS);

    /// Default re-enable delay
    pub const REENABLE_DELAY: Duration = Duration::from_millis(REENABLE_DELAY_MS);
}

/// Names of the deferred work items (used in logs)
pub mod work {
    pub const DIG_PORT: &str = "hotplug.dig_port";
    pub const HOTPLUG: &str = "hotplug.hotplug";
    pub const POLL_INIT: &str = "hotplug.poll_init";
    pub const REENABLE: &str = "hotplug.reenable";
}

/// Settings file locations
pub mod paths {
    /// Environment variable overriding the settings file location
    pub const SETTINGS_ENV: &str = "HPDSTORM_SETTINGS";

    /// Configuration directory
    pub const CONFIG_DIR: &str = "/etc/hpdstorm";

    /// Settings file name inside CONFIG_DIR
    pub const SETTINGS_FILE: &str = "hotplug.json";

    /// Maximum accepted settings file size (bytes)
    pub const MAX_SETTINGS_SIZE: u64 = 64 * 1024;
}
