/*
 * This file is part of hpdstorm.
 *
 * Copyright (C) 2025 hpdstorm contributors
 *
 * hpdstorm is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * hpdstorm is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with hpdstorm. If not, see <https://www.gnu.org/licenses/>.
 */

//! Scenario files
//!
//! A scenario describes the simulated display hardware (connectors and
//! digital ports) and a list of steps to drive through the hot-plug core.
//!
//! ```json
//! {
//!   "connectors": [{"name": "HDMI-A-1", "pin": "port_b"}],
//!   "steps": [
//!     {"op": "init"},
//!     {"op": "irq", "pins": ["port_b"], "long": ["port_b"], "repeat": 6},
//!     {"op": "wait", "ms": 120000}
//!   ]
//! }
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use hpd_core::{HotplugSettings, Pin, PollMode, Port, ShortStormCtl, StormCtl};
use hpd_error::{HotplugError, Result};
use serde::{Deserialize, Serialize};

/// Largest scenario file we are willing to parse
const MAX_SCENARIO_SIZE: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub name: Option<String>,

    /// Overrides the settings file when present
    #[serde(default)]
    pub settings: Option<HotplugSettings>,

    #[serde(default)]
    pub connectors: Vec<ConnectorSpec>,

    #[serde(default)]
    pub digital_ports: Vec<DigitalPortSpec>,

    pub steps: Vec<Step>,
}

/// Simulated display output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorSpec {
    pub name: String,

    #[serde(default)]
    pub pin: Option<Pin>,

    #[serde(default)]
    pub poll_preference: PollMode,

    /// Sink attached at start
    #[serde(default)]
    pub connected: bool,

    #[serde(default)]
    pub mst: bool,
}

/// Simulated digital port and which pulses it handles itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigitalPortSpec {
    pub port: Port,

    #[serde(default = "default_true")]
    pub handles_long: bool,

    #[serde(default = "default_true")]
    pub handles_short: bool,
}

fn default_true() -> bool {
    true
}

fn default_repeat() -> u32 {
    1
}

/// One scenario step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    /// Fire an interrupt for `pins`; `long` lists the pins with long pulses
    Irq {
        pins: Vec<Pin>,
        #[serde(default)]
        long: Vec<Pin>,
        #[serde(default = "default_repeat")]
        repeat: u32,
    },
    /// Fire an interrupt from raw status masks
    Raw {
        pin_mask: u32,
        #[serde(default)]
        long_mask: u32,
    },
    Wait {
        ms: u64,
    },
    /// Attach or detach the sink of a connector
    Plug {
        connector: String,
        connected: bool,
    },
    DisablePin {
        pin: Pin,
    },
    EnablePin {
        pin: Pin,
    },
    ForcePolling {
        on: bool,
    },
    /// Turn display interrupts on or off at the platform
    IrqsEnabled {
        on: bool,
    },
    StormCtl {
        value: String,
    },
    ShortStormCtl {
        value: String,
    },
    Init,
}

impl Scenario {
    /// Reject scenarios that would fail half way through
    pub fn validate(&self) -> Result<()> {
        if let Some(settings) = &self.settings {
            settings.validate()?;
        }

        let mut names = HashSet::new();
        for connector in &self.connectors {
            if connector.name.is_empty() {
                return Err(HotplugError::scenario("connector with empty name"));
            }
            if !names.insert(connector.name.as_str()) {
                return Err(HotplugError::scenario(format!(
                    "duplicate connector {}",
                    connector.name
                )));
            }
        }

        let mut ports = HashSet::new();
        for digital in &self.digital_ports {
            if !ports.insert(digital.port) {
                return Err(HotplugError::scenario(format!(
                    "duplicate digital port {}",
                    digital.port
                )));
            }
        }

        for (index, step) in self.steps.iter().enumerate() {
            match step {
                Step::Plug { connector, .. } if !names.contains(connector.as_str()) => {
                    return Err(HotplugError::UnknownConnector(connector.clone()));
                }
                Step::StormCtl { value } => {
                    value.parse::<StormCtl>().map_err(|e| {
                        HotplugError::scenario(format!("step {}: {}", index, e))
                    })?;
                }
                Step::ShortStormCtl { value } => {
                    value.parse::<ShortStormCtl>().map_err(|e| {
                        HotplugError::scenario(format!("step {}: {}", index, e))
                    })?;
                }
                _ => {}
            }
        }

        Ok(())
    }
}

/// Parse and validate a scenario from JSON text
pub fn parse_scenario(json: &str) -> Result<Scenario> {
    let scenario: Scenario = serde_json::from_str(json)?;
    scenario.validate()?;
    Ok(scenario)
}

/// Load a scenario file
pub fn load_scenario(path: &Path) -> Result<Scenario> {
    let size = fs::metadata(path)
        .map_err(|source| HotplugError::FileRead {
            path: path.to_path_buf(),
            source,
        })?
        .len();
    if size > MAX_SCENARIO_SIZE {
        return Err(HotplugError::scenario(format!(
            "{:?} too large ({} bytes, max {})",
            path, size, MAX_SCENARIO_SIZE
        )));
    }

    let content = fs::read_to_string(path).map_err(|source| HotplugError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;
    parse_scenario(&content)
}
