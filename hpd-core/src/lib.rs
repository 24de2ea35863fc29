//! hpdstorm Core Library
//!
//! Display hot-plug handling with interrupt storm mitigation.
//!
//! # Features
//!
//! - **Storm Detection**: Weighted per-pin interrupt counting over a coarse window
//! - **Polling Fallback**: Storming outputs move to polling, then get their interrupt back
//! - **Deferred Work**: Coalescing worker tasks keep the interrupt path short
//! - **Digital Ports**: Port-specific pulse handling with a generic fallback
//! - **Settings**: Platform capabilities and storm tunables from JSON
//!
//! # Module Structure
//!
//! - `pin` - Pins, ports, their pairing, and bitmask sets
//! - `stats` - Storm detector and the per-pin state machine
//! - `hotplug` - Interrupt dispatch and the deferred processors
//! - `work` - Coalescing work items driven by tokio tasks
//! - `hooks` / `connector` - Collaborator traits and the connector registry
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use hpd_core::{HotplugBuilder, HotplugSettings};
//! # use hpd_core::{DisplayHelper, HotplugPlatform, PinTable};
//! # struct Platform;
//! # impl HotplugPlatform for Platform {
//! #     fn hpd_irq_setup(&self, _pins: &PinTable) {}
//! #     fn display_irqs_enabled(&self) -> bool { true }
//! # }
//! # struct Helper;
//! # impl DisplayHelper for Helper {
//! #     fn poll_enable(&self) {}
//! #     fn hotplug_event(&self) {}
//! #     fn hpd_irq_event(&self) {}
//! # }
//! # async fn run() -> hpd_core::Result<()> {
//! let hotplug = HotplugBuilder::new(Arc::new(Platform), Arc::new(Helper))
//!     .settings(&HotplugSettings::default())
//!     .build();
//! hotplug.start()?;
//! hotplug.init();
//!
//! // From the interrupt handler
//! hotplug.handle_interrupt(0b10_0000, 0b10_0000);
//! # Ok(())
//! # }
//! ```

pub mod connector;
pub mod constants;
pub mod hooks;
pub mod hotplug;
pub mod pin;
pub mod settings;
pub mod stats;
pub mod storm_ctl;
pub mod work;

pub use connector::{Connector, ConnectorList, PollMode};
pub use hooks::{ConnectorProbe, DigitalPort, DisplayHelper, HotplugPlatform, PulseResult};
pub use hotplug::{Hotplug, HotplugBuilder};
pub use pin::{pin_for_port, port_for_pin, Pin, PinSet, Port, PortSet};
pub use settings::{load_settings, save_settings, settings_path, HotplugSettings, PlatformCaps, StormSettings};
pub use stats::{PinState, PinStats, PinStatus, PinTable, StormConfig};
pub use storm_ctl::{ShortStormCtl, ShortStormStatus, StormCtl, StormStatus};

// Re-export the shared error type
pub use hpd_error::{HotplugError, Result};
