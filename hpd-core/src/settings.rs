//! Hot-plug settings
//!
//! Persistent settings stored as JSON (default /etc/hpdstorm/hotplug.json,
//! overridable through `HPDSTORM_SETTINGS`). Every field has a default so
//! partial files are fine.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use hpd_error::{HotplugError, Result};

use crate::constants::{paths, storm};
use crate::stats::StormConfig;

/// Hot-plug settings
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HotplugSettings {
    /// What the display hardware can do
    #[serde(default)]
    pub platform: PlatformCaps,

    /// Storm detection tunables
    #[serde(default)]
    pub storm: StormSettings,
}

/// Platform capability flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformCaps {
    /// Port F shares the port E hot-plug pin
    #[serde(default)]
    pub alternate_pin_port: bool,

    /// Interrupt masking does not stop the hot-plug status bits from latching,
    /// so interrupts on disabled pins are expected
    #[serde(default)]
    pub gmch_display: bool,

    /// Hardware hot-plug detection exists at all
    #[serde(default = "default_true")]
    pub has_hotplug: bool,

    /// Multi-stream transport is supported (short pulses are sideband noise)
    #[serde(default)]
    pub dp_mst: bool,
}

impl Default for PlatformCaps {
    fn default() -> Self {
        Self {
            alternate_pin_port: false,
            gmch_display: false,
            has_hotplug: true,
            dp_mst: false,
        }
    }
}

impl PlatformCaps {
    /// Short storm detection default for this platform
    pub fn short_storm_default(&self) -> bool {
        !self.dp_mst
    }
}

/// Storm detection settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StormSettings {
    /// Weighted interrupts per period before a pin is declared storming (0 = off)
    #[serde(default = "default_threshold")]
    pub threshold: u32,

    /// Count short pulses; `None` picks the platform default
    #[serde(default)]
    pub short_storm_enabled: Option<bool>,

    /// Counting window in milliseconds
    #[serde(default = "default_detect_period_ms")]
    pub detect_period_ms: u64,

    /// Delay before storm-disabled pins are re-enabled, in milliseconds
    #[serde(default = "default_reenable_delay_ms")]
    pub reenable_delay_ms: u64,

    /// Also auto re-enable pins routed through a digital port
    #[serde(default)]
    pub reenable_digital_pins: bool,
}

impl Default for StormSettings {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            short_storm_enabled: None,
            detect_period_ms: default_detect_period_ms(),
            reenable_delay_ms: default_reenable_delay_ms(),
            reenable_digital_pins: false,
        }
    }
}

impl StormSettings {
    pub fn detect_period(&self) -> Duration {
        Duration::from_millis(self.detect_period_ms)
    }

    pub fn reenable_delay(&self) -> Duration {
        Duration::from_millis(self.reenable_delay_ms)
    }
}

fn default_true() -> bool {
    true
}

fn default_threshold() -> u32 {
    storm::DEFAULT_THRESHOLD
}

fn default_detect_period_ms() -> u64 {
    storm::DETECT_PERIOD_MS
}

fn default_reenable_delay_ms() -> u64 {
    storm::REENABLE_DELAY_MS
}

impl HotplugSettings {
    /// Check values that would break the storm state machine
    pub fn validate(&self) -> Result<()> {
        if self.storm.detect_period_ms == 0 {
            return Err(HotplugError::invalid_config(
                "storm.detect_period_ms",
                "must be greater than zero",
            ));
        }
        if self.storm.reenable_delay_ms == 0 {
            return Err(HotplugError::invalid_config(
                "storm.reenable_delay_ms",
                "must be greater than zero",
            ));
        }
        if self.storm.reenable_delay_ms < self.storm.detect_period_ms {
            return Err(HotplugError::invalid_config(
                "storm.reenable_delay_ms",
                "must not be shorter than storm.detect_period_ms",
            ));
        }
        Ok(())
    }

    /// Storm detector configuration derived from these settings
    pub fn storm_config(&self) -> StormConfig {
        StormConfig {
            threshold: self.storm.threshold,
            short_storm_enabled: self
                .storm
                .short_storm_enabled
                .unwrap_or_else(|| self.platform.short_storm_default()),
            detect_period: self.storm.detect_period(),
        }
    }
}

/// Settings file path, honoring HPDSTORM_SETTINGS
pub fn settings_path() -> PathBuf {
    match std::env::var_os(paths::SETTINGS_ENV) {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => Path::new(paths::CONFIG_DIR).join(paths::SETTINGS_FILE),
    }
}

/// Load settings from `path`; a missing file yields defaults
pub fn load_settings(path: &Path) -> Result<HotplugSettings> {
    if !path.exists() {
        debug!("No settings file at {:?}, using defaults", path);
        return Ok(HotplugSettings::default());
    }

    let size = fs::metadata(path)
        .map_err(|source| HotplugError::FileRead {
            path: path.to_path_buf(),
            source,
        })?
        .len();
    if size > paths::MAX_SETTINGS_SIZE {
        return Err(HotplugError::config(format!(
            "Settings file {:?} too large ({} bytes, max {})",
            path,
            size,
            paths::MAX_SETTINGS_SIZE
        )));
    }

    let content = fs::read_to_string(path).map_err(|source| HotplugError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;

    let settings: HotplugSettings = serde_json::from_str(&content)?;
    settings.validate()?;
    Ok(settings)
}

/// Write settings to `path` as pretty JSON, creating parent directories
pub fn save_settings(path: &Path, settings: &HotplugSettings) -> Result<()> {
    settings.validate()?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| HotplugError::FileWrite {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let json = serde_json::to_string_pretty(settings)?;
    fs::write(path, json).map_err(|source| HotplugError::FileWrite {
        path: path.to_path_buf(),
        source,
    })
}
