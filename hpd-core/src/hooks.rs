//! Collaborator seams
//!
//! The core never touches hardware or the display stack directly. Everything
//! it needs from the outside world comes through these traits.

use crate::stats::PinTable;

/// Outcome of handing a pulse to a digital port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PulseResult {
    /// The port consumed the pulse
    Handled,
    /// Not a port-specific event; fall back to generic hot-plug processing
    NotHandled,
}

/// Platform interrupt layer
pub trait HotplugPlatform: Send + Sync {
    /// Reprogram hot-plug interrupt enables to match the per-pin states.
    ///
    /// Called with the state lock held, from interrupt or worker context.
    /// Must not block.
    fn hpd_irq_setup(&self, pins: &PinTable);

    /// Whether display interrupts are currently enabled
    fn display_irqs_enabled(&self) -> bool;
}

/// Digital output port with its own pulse handling
pub trait DigitalPort: Send + Sync {
    fn hpd_pulse(&self, long_hpd: bool) -> PulseResult;
}

/// Per-connector detect hook
pub trait ConnectorProbe: Send + Sync {
    /// Re-probe the connector and report whether its status changed.
    ///
    /// Called with the mode-config lock held.
    fn detect_and_compare(&self) -> bool;
}

/// Higher-level display configuration helpers
pub trait DisplayHelper: Send + Sync {
    /// Start the periodic output polling machinery
    fn poll_enable(&self);

    /// Tell the presentation layer the output topology changed
    fn hotplug_event(&self);

    /// Run one immediate detection pass over hot-plug capable outputs
    fn hpd_irq_event(&self);
}
