//! Storm control knobs
//!
//! Text interface for the storm threshold and short-pulse counting, meant
//! for automated hot-plug testing only. Writing either knob also clears the
//! per-pin counters and flushes a pending re-enable.

use std::fmt;
use std::str::FromStr;

use hpd_error::HotplugError;

/// Threshold knob value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StormCtl {
    /// Back to the default threshold
    Reset,
    /// Explicit threshold (0 disables detection)
    Threshold(u32),
}

impl FromStr for StormCtl {
    type Err = HotplugError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim();
        if value == "reset" {
            return Ok(StormCtl::Reset);
        }
        value
            .parse::<u32>()
            .map(StormCtl::Threshold)
            .map_err(|_| HotplugError::InvalidStormCtl(s.to_string()))
    }
}

/// Short-pulse counting knob value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShortStormCtl {
    /// Back to the platform default
    Reset,
    Enabled(bool),
}

impl FromStr for ShortStormCtl {
    type Err = HotplugError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim();
        if value == "reset" {
            return Ok(ShortStormCtl::Reset);
        }
        parse_bool(value)
            .map(ShortStormCtl::Enabled)
            .ok_or_else(|| HotplugError::InvalidStormCtl(s.to_string()))
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "y" | "yes" | "1" | "on" | "true" => Some(true),
        "n" | "no" | "0" | "off" | "false" => Some(false),
        _ => None,
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

/// Threshold knob readout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StormStatus {
    pub threshold: u32,
    /// A storm was mitigated and the re-enable is still pending
    pub detected: bool,
}

impl fmt::Display for StormStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Threshold: {}", self.threshold)?;
        writeln!(f, "Detected: {}", yes_no(self.detected))
    }
}

/// Short-pulse knob readout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShortStormStatus {
    pub enabled: bool,
}

impl fmt::Display for ShortStormStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Enabled: {}", yes_no(self.enabled))
    }
}
