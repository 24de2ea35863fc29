//! Per-pin storm statistics and the pin state machine
//!
//! # How It Works
//!
//! 1. **Counting**: every interrupt on an enabled pin adds a weight to the
//!    pin's counter (10 for a long pulse, 1 for a short one).
//!
//! 2. **Windowing**: the counter only covers `[window_start, window_start + period)`.
//!    An interrupt outside that range resets the window wholesale; nothing
//!    decays in between.
//!
//! 3. **Threshold**: a counter strictly above the threshold marks the pin
//!    `AutoDisabled`. The generic hot-plug work later moves it to `Disabled`
//!    and the delayed re-enable work brings it back to `Enabled`.
//!
//! The table is only reachable through the subsystem's state lock.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use crate::constants::pins::NUM_PINS;
use crate::constants::storm;
use crate::pin::{Pin, PinSet};

/// Lifecycle of a hot-plug pin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinState {
    /// Interrupts are processed normally
    Enabled,
    /// Interrupt-driven detection is off; outputs rely on polling
    Disabled,
    /// Storm just detected; waiting for the switch to polling
    AutoDisabled,
}

/// Storm detection tunables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StormConfig {
    /// Weighted interrupts allowed per period (0 disables detection)
    pub threshold: u32,
    /// Count short pulses towards the threshold
    pub short_storm_enabled: bool,
    /// Length of one counting window
    pub detect_period: Duration,
}

impl Default for StormConfig {
    fn default() -> Self {
        Self {
            threshold: storm::DEFAULT_THRESHOLD,
            short_storm_enabled: true,
            detect_period: storm::DETECT_PERIOD,
        }
    }
}

/// Storm statistics for one pin
#[derive(Debug, Clone, Copy)]
pub struct PinStats {
    window_start: Option<Instant>,
    count: u32,
    state: PinState,
    /// Disabled by the polling fallback (as opposed to an explicit disable)
    mitigated: bool,
}

impl PinStats {
    const fn new() -> Self {
        Self {
            window_start: None,
            count: 0,
            state: PinState::Enabled,
            mitigated: false,
        }
    }

    pub fn state(&self) -> PinState {
        self.state
    }

    /// Weighted count in the current window
    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn window_start(&self) -> Option<Instant> {
        self.window_start
    }

    /// Whether the pin was disabled by storm mitigation
    pub fn is_mitigated(&self) -> bool {
        self.mitigated
    }
}

/// Serializable snapshot of one pin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinStatus {
    pub pin: Pin,
    pub state: PinState,
    pub count: u32,
    pub mitigated: bool,
}

/// Storm statistics and state for every pin
#[derive(Debug, Clone)]
pub struct PinTable {
    stats: [PinStats; NUM_PINS],
    config: StormConfig,
}

impl PinTable {
    pub fn new(config: StormConfig) -> Self {
        Self {
            stats: [PinStats::new(); NUM_PINS],
            config,
        }
    }

    pub fn config(&self) -> &StormConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut StormConfig {
        &mut self.config
    }

    pub fn stats(&self, pin: Pin) -> &PinStats {
        &self.stats[pin.index()]
    }

    pub fn state(&self, pin: Pin) -> PinState {
        self.stats[pin.index()].state
    }

    /// Every pin back to `Enabled` with zeroed counters
    pub fn reset(&mut self) {
        for stats in &mut self.stats {
            stats.count = 0;
            stats.state = PinState::Enabled;
            stats.mitigated = false;
        }
    }

    /// Zero all counters without touching states
    pub fn clear_counts(&mut self) {
        for stats in &mut self.stats {
            stats.count = 0;
        }
    }

    /// Gather stats about an interrupt on `pin` and detect a storm
    ///
    /// Only the pin's own stats and state change; the caller is responsible
    /// for further action. Returns true if a storm was detected.
    pub fn detect_storm(&mut self, pin: Pin, long_hpd: bool, now: Instant) -> bool {
        let config = self.config;

        if config.threshold == 0 || (!long_hpd && !config.short_storm_enabled) {
            return false;
        }

        let stats = &mut self.stats[pin.index()];
        let in_window = stats
            .window_start
            .map_or(false, |start| now >= start && now < start + config.detect_period);
        if !in_window {
            stats.window_start = Some(now);
            stats.count = 0;
        }

        let increment = if long_hpd {
            storm::LONG_PULSE_WEIGHT
        } else {
            storm::SHORT_PULSE_WEIGHT
        };
        stats.count = stats.count.saturating_add(increment);

        if stats.count > config.threshold {
            stats.state = PinState::AutoDisabled;
            debug!("HPD interrupt storm detected on pin {}", pin);
            true
        } else {
            debug!("Received HPD interrupt on pin {} - cnt: {}", pin, stats.count);
            false
        }
    }

    /// Move a storming pin over to polling (`AutoDisabled` -> `Disabled`)
    ///
    /// Returns false if the pin was not auto-disabled.
    pub fn mark_mitigated(&mut self, pin: Pin) -> bool {
        let stats = &mut self.stats[pin.index()];
        if stats.state != PinState::AutoDisabled {
            return false;
        }
        stats.state = PinState::Disabled;
        stats.mitigated = true;
        true
    }

    /// Administrative disable. Returns true only if the pin was enabled.
    pub fn disable(&mut self, pin: Pin) -> bool {
        let stats = &mut self.stats[pin.index()];
        if stats.state != PinState::Enabled {
            return false;
        }
        stats.state = PinState::Disabled;
        true
    }

    /// Administrative enable, regardless of the current state
    pub fn enable(&mut self, pin: Pin) {
        let stats = &mut self.stats[pin.index()];
        stats.state = PinState::Enabled;
        stats.mitigated = false;
    }

    /// Pins currently in `state`
    pub fn pins_in(&self, state: PinState) -> PinSet {
        Pin::ALL
            .into_iter()
            .filter(|pin| self.state(*pin) == state)
            .collect()
    }

    /// Snapshot of every pin
    pub fn status(&self) -> Vec<PinStatus> {
        Pin::ALL
            .into_iter()
            .map(|pin| {
                let stats = self.stats(pin);
                PinStatus {
                    pin,
                    state: stats.state,
                    count: stats.count,
                    mitigated: stats.mitigated,
                }
            })
            .collect()
    }
}

impl Default for PinTable {
    fn default() -> Self {
        Self::new(StormConfig::default())
    }
}
