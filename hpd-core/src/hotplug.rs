//! Hot-plug interrupt dispatch and deferred processing
//!
//! # How It Works
//!
//! 1. **Interrupt path**: [`Hotplug::irq_handler`] runs in interrupt context.
//!    It classifies each fired pin under the state lock, feeds the storm
//!    detector, and queues deferred work. It never waits on anything but
//!    the state lock.
//!
//! 2. **Digital ports**: pulses on pins that belong to a registered
//!    [`DigitalPort`] are handed to that port first. Pulses it does not
//!    handle fall back to the generic path.
//!
//! 3. **Generic path**: drains the pending pins, switches storming pins to
//!    polling, then re-probes the affected connectors under the mode-config
//!    lock and emits a single hot-plug event if anything changed.
//!
//! 4. **Recovery**: two minutes after a storm was mitigated the re-enable
//!    work hands the pins back to interrupt-driven detection.
//!
//! Lock order: the state lock is never held across an await and is always
//! dropped before the mode-config lock is taken.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use hpd_error::{HotplugError, Result};

use crate::connector::{ConnectorList, PollMode};
use crate::constants::{pins::NUM_PORTS, storm, work as work_names};
use crate::hooks::{DigitalPort, DisplayHelper, HotplugPlatform, PulseResult};
use crate::pin::{pin_for_port, port_for_pin, Pin, PinSet, Port, PortSet};
use crate::settings::{HotplugSettings, PlatformCaps};
use crate::stats::{PinState, PinStatus, PinTable};
use crate::storm_ctl::{ShortStormCtl, ShortStormStatus, StormCtl, StormStatus};
use crate::work::{DelayedWork, Work};

/// Everything guarded by the state lock
#[derive(Debug)]
struct HotplugState {
    pins: PinTable,
    long_ports: PortSet,
    short_ports: PortSet,
    event_pins: PinSet,
}

impl HotplugState {
    fn clear_pending(&mut self) {
        self.long_ports = PortSet::empty();
        self.short_ports = PortSet::empty();
        self.event_pins = PinSet::empty();
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Assembles a [`Hotplug`] from settings and collaborators
pub struct HotplugBuilder {
    platform: Arc<dyn HotplugPlatform>,
    helper: Arc<dyn DisplayHelper>,
    settings: HotplugSettings,
    connectors: Arc<ConnectorList>,
    digital_ports: [Option<Arc<dyn DigitalPort>>; NUM_PORTS],
    mode_config: Arc<AsyncMutex<()>>,
}

impl HotplugBuilder {
    pub fn new(platform: Arc<dyn HotplugPlatform>, helper: Arc<dyn DisplayHelper>) -> Self {
        Self {
            platform,
            helper,
            settings: HotplugSettings::default(),
            connectors: Arc::new(ConnectorList::new()),
            digital_ports: Default::default(),
            mode_config: Arc::new(AsyncMutex::new(())),
        }
    }

    pub fn settings(mut self, settings: &HotplugSettings) -> Self {
        self.settings = settings.clone();
        self
    }

    /// Connector registry to iterate over (shared with the display layer)
    pub fn connectors(mut self, connectors: Arc<ConnectorList>) -> Self {
        self.connectors = connectors;
        self
    }

    /// Register the pulse handler of a digital output port
    pub fn digital_port(mut self, port: Port, handler: Arc<dyn DigitalPort>) -> Self {
        self.digital_ports[port.index()] = Some(handler);
        self
    }

    /// Mode-config lock shared with the presentation layer
    pub fn mode_config(mut self, lock: Arc<AsyncMutex<()>>) -> Self {
        self.mode_config = lock;
        self
    }

    pub fn build(self) -> Arc<Hotplug> {
        let storm = self.settings.storm;
        Arc::new(Hotplug {
            state: Mutex::new(HotplugState {
                pins: PinTable::new(self.settings.storm_config()),
                long_ports: PortSet::empty(),
                short_ports: PortSet::empty(),
                event_pins: PinSet::empty(),
            }),
            caps: self.settings.platform,
            reenable_delay: storm.reenable_delay(),
            reenable_digital: storm.reenable_digital_pins,
            platform: self.platform,
            helper: self.helper,
            connectors: self.connectors,
            digital_ports: self.digital_ports,
            mode_config: self.mode_config,
            poll_forced: AtomicBool::new(false),
            disabled_irq_warned: AtomicBool::new(false),
            dig_port_work: Arc::new(Work::new(work_names::DIG_PORT)),
            hotplug_work: Arc::new(Work::new(work_names::HOTPLUG)),
            poll_init_work: Arc::new(Work::new(work_names::POLL_INIT)),
            reenable_work: Arc::new(DelayedWork::new(work_names::REENABLE)),
            tasks: Mutex::new(Vec::new()),
        })
    }
}

// ============================================================================
// Hotplug
// ============================================================================

/// Hot-plug storm detection and deferred hot-plug processing
pub struct Hotplug {
    state: Mutex<HotplugState>,
    caps: PlatformCaps,
    reenable_delay: Duration,
    reenable_digital: bool,

    platform: Arc<dyn HotplugPlatform>,
    helper: Arc<dyn DisplayHelper>,
    connectors: Arc<ConnectorList>,
    digital_ports: [Option<Arc<dyn DigitalPort>>; NUM_PORTS],
    mode_config: Arc<AsyncMutex<()>>,

    poll_forced: AtomicBool,
    disabled_irq_warned: AtomicBool,

    dig_port_work: Arc<Work>,
    hotplug_work: Arc<Work>,
    poll_init_work: Arc<Work>,
    reenable_work: Arc<DelayedWork>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Hotplug {
    /// Spawn the worker tasks on the current tokio runtime
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let handle = Handle::try_current().map_err(|_| HotplugError::NoRuntime)?;

        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return Err(HotplugError::AlreadyStarted);
        }

        let weak = Arc::downgrade(self);
        let work = Arc::clone(&self.dig_port_work);
        tasks.push(handle.spawn(async move {
            loop {
                let _run = work.next().await;
                trace!("running {}", work.name());
                let Some(hotplug) = weak.upgrade() else { break };
                hotplug.dig_port_work_fn();
            }
        }));

        let weak = Arc::downgrade(self);
        let work = Arc::clone(&self.hotplug_work);
        tasks.push(handle.spawn(async move {
            loop {
                let _run = work.next().await;
                trace!("running {}", work.name());
                let Some(hotplug) = weak.upgrade() else { break };
                hotplug.hotplug_work_fn().await;
            }
        }));

        let weak = Arc::downgrade(self);
        let work = Arc::clone(&self.poll_init_work);
        tasks.push(handle.spawn(async move {
            loop {
                let _run = work.next().await;
                trace!("running {}", work.name());
                let Some(hotplug) = weak.upgrade() else { break };
                hotplug.poll_init_work_fn().await;
            }
        }));

        let weak: Weak<Hotplug> = Arc::downgrade(self);
        let work = Arc::clone(&self.reenable_work);
        tasks.push(handle.spawn(async move {
            loop {
                let _run = work.next().await;
                trace!("running {}", work.name());
                let Some(hotplug) = weak.upgrade() else { break };
                hotplug.reenable_work_fn();
            }
        }));

        debug!("Started {} hotplug workers", tasks.len());
        Ok(())
    }

    /// (Re)initialize: every pin enabled, polling off, interrupts reprogrammed
    pub fn init(&self) {
        {
            let mut state = self.state.lock();
            state.pins.reset();
        }

        // Connector setup may run under the mode-config lock, so leave the
        // poll mode update to the worker.
        self.poll_forced.store(false, Ordering::Release);
        self.poll_init_work.queue();

        let state = self.state.lock();
        if self.platform.display_irqs_enabled() {
            self.platform.hpd_irq_setup(&state.pins);
        }
    }

    /// Force output polling on (runtime suspend) and update poll modes
    pub fn set_polling_forced(&self, forced: bool) {
        self.poll_forced.store(forced, Ordering::Release);
        self.poll_init_work.queue();
    }

    pub fn polling_forced(&self) -> bool {
        self.poll_forced.load(Ordering::Acquire)
    }

    /// Drop all pending events and work, waiting for in-flight runs
    ///
    /// The subsystem stays usable afterwards.
    pub async fn cancel_all(&self) {
        {
            let mut state = self.state.lock();
            state.clear_pending();
        }

        self.dig_port_work.cancel().await;
        self.hotplug_work.cancel().await;
        self.poll_init_work.cancel().await;
        self.reenable_work.cancel().await;
    }

    /// Cancel all work and stop the worker tasks
    pub async fn shutdown(&self) {
        self.cancel_all().await;

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            // Aborted tasks report a cancellation error
            let _ = task.await;
        }
        debug!("Hotplug workers stopped");
    }

    // ========================================================================
    // Interrupt Path
    // ========================================================================

    /// Entry point for raw interrupt status masks
    pub fn handle_interrupt(&self, pin_mask: u32, long_mask: u32) {
        let unknown = PinSet::unknown_bits(pin_mask | long_mask);
        if unknown != 0 {
            debug!("Ignoring unknown hotplug bits {:#x}", unknown);
        }
        self.irq_handler(
            PinSet::from_bits_truncate(pin_mask),
            PinSet::from_bits_truncate(long_mask),
        );
    }

    /// Hot-plug interrupt handler
    ///
    /// `fired` holds the pins that triggered, `long` those whose pulse may
    /// have been long.
    pub fn irq_handler(&self, fired: PinSet, long: PinSet) {
        if fired.is_empty() {
            return;
        }

        let now = Instant::now();
        let mut storm_detected = false;
        let mut queue_dig = false;
        let mut queue_hp = false;

        {
            let mut state = self.state.lock();

            for pin in fired.iter() {
                let mut long_hpd = true;
                let digital = match self.digital_port_for_pin(pin) {
                    Some(port) => {
                        long_hpd = long.contains(pin);
                        debug!(
                            "digital hpd port {} - {}",
                            port,
                            if long_hpd { "long" } else { "short" }
                        );
                        if long_hpd {
                            state.long_ports.insert(port);
                        } else {
                            state.short_ports.insert(port);
                        }
                        queue_dig = true;
                        true
                    }
                    None => false,
                };

                match state.pins.state(pin) {
                    PinState::Disabled => {
                        self.report_disabled_irq(pin);
                        continue;
                    }
                    PinState::AutoDisabled => continue,
                    PinState::Enabled => {}
                }

                if !digital {
                    state.event_pins.insert(pin);
                    queue_hp = true;
                }

                if state.pins.detect_storm(pin, long_hpd, now) {
                    state.event_pins.remove(pin);
                    storm_detected = true;
                    queue_hp = true;
                }
            }

            if storm_detected && self.platform.display_irqs_enabled() {
                self.platform.hpd_irq_setup(&state.pins);
            }
        }

        if queue_dig {
            self.dig_port_work.queue();
        }
        if queue_hp {
            self.hotplug_work.queue();
        }
    }

    fn report_disabled_irq(&self, pin: Pin) {
        // Masking does not stop the status bits from latching on GMCH
        if self.caps.gmch_display || self.disabled_irq_warned.swap(true, Ordering::Relaxed) {
            debug!("Received HPD interrupt on pin {} although disabled", pin);
        } else {
            warn!("Received HPD interrupt on pin {} although disabled", pin);
        }
    }

    fn digital_port_for_pin(&self, pin: Pin) -> Option<Port> {
        let port = port_for_pin(pin, self.caps.alternate_pin_port)?;
        self.digital_ports[port.index()].as_ref().map(|_| port)
    }

    // ========================================================================
    // Deferred Work
    // ========================================================================

    fn dig_port_work_fn(&self) {
        let (long_ports, short_ports) = {
            let mut state = self.state.lock();
            (state.long_ports.take(), state.short_ports.take())
        };

        let mut fallback = PinSet::empty();
        for (index, handler) in self.digital_ports.iter().enumerate() {
            let (Some(handler), Some(port)) = (handler, Port::from_index(index)) else {
                continue;
            };

            let long_hpd = long_ports.contains(port);
            if !long_hpd && !short_ports.contains(port) {
                continue;
            }

            if handler.hpd_pulse(long_hpd) == PulseResult::NotHandled {
                if let Some(pin) = pin_for_port(port, self.caps.alternate_pin_port) {
                    fallback.insert(pin);
                }
            }
        }

        if !fallback.is_empty() {
            {
                let mut state = self.state.lock();
                state.event_pins |= fallback;
            }
            self.hotplug_work.queue();
        }
    }

    async fn hotplug_work_fn(&self) {
        debug!("running encoder hotplug functions");

        let (event_pins, switched) = {
            let mut state = self.state.lock();
            let event_pins = state.event_pins.take();
            let switched = self.switch_to_polling(&mut state);
            (event_pins, switched)
        };

        if switched {
            self.helper.poll_enable();
            self.reenable_work.schedule(self.reenable_delay);
        }

        let mut changed = false;
        {
            let _mode_config = self.mode_config.lock().await;
            for connector in self.connectors.snapshot() {
                let Some(pin) = connector.hpd_pin() else {
                    continue;
                };
                if !event_pins.contains(pin) {
                    continue;
                }
                debug!("Connector {} received hotplug event", connector.name());
                changed |= connector.detect_and_compare();
            }
        }

        if changed {
            self.helper.hotplug_event();
        }
    }

    /// Move storming pins over to output polling
    ///
    /// Returns true if any pin was switched; the caller then enables polling
    /// and arms the re-enable work.
    fn switch_to_polling(&self, state: &mut HotplugState) -> bool {
        let storming = state.pins.pins_in(PinState::AutoDisabled);
        if storming.is_empty() {
            return false;
        }

        for connector in self.connectors.with_poll_mode(PollMode::Hpd) {
            let Some(pin) = connector.hpd_pin() else {
                continue;
            };
            if !storming.contains(pin) {
                continue;
            }
            info!(
                "HPD interrupt storm detected on connector {}: switching from hotplug detection to polling",
                connector.name()
            );
            connector.set_polled(PollMode::ConnectDisconnect);
        }

        for pin in storming.iter() {
            state.pins.mark_mitigated(pin);
        }
        true
    }

    async fn poll_init_work_fn(&self) {
        // Outputs on masked pins keep polling whatever the forced state
        let disabled = self.state.lock().pins.pins_in(PinState::Disabled);

        let forced = {
            let _mode_config = self.mode_config.lock().await;
            let forced = self.polling_forced();
            let mut polling = forced;

            for connector in self.connectors.snapshot() {
                connector.set_polled(connector.poll_preference());

                // MST connectors are reprobed by the MST helpers
                if connector.is_mst() {
                    continue;
                }

                if connector.polled() == PollMode::None
                    && self.caps.has_hotplug
                    && connector.hpd_pin().is_some()
                {
                    connector.set_polled(if forced {
                        PollMode::ConnectDisconnect
                    } else {
                        PollMode::Hpd
                    });
                }

                if connector.polled() == PollMode::Hpd
                    && connector.hpd_pin().is_some_and(|pin| disabled.contains(pin))
                {
                    debug!(
                        "Connector {} stays on polling, its HPD pin is disabled",
                        connector.name()
                    );
                    connector.set_polled(PollMode::ConnectDisconnect);
                    polling = true;
                }
            }

            if polling {
                self.helper.poll_enable();
            }
            forced
        };

        // Catch hot-plugs that happened while polling was being turned off
        if !forced {
            self.helper.hpd_irq_event();
        }
    }

    fn reenable_work_fn(&self) {
        let mut state = self.state.lock();

        let mut reenabled = PinSet::empty();
        for pin in state.pins.pins_in(PinState::Disabled).iter() {
            if !state.pins.stats(pin).is_mitigated() {
                continue;
            }
            if !self.reenable_digital && self.digital_port_for_pin(pin).is_some() {
                trace!("Leaving digital pin {} on polling", pin);
                continue;
            }

            state.pins.enable(pin);
            reenabled.insert(pin);

            for connector in self.connectors.snapshot() {
                if connector.hpd_pin() != Some(pin) || connector.is_mst() {
                    continue;
                }
                let restored = match connector.poll_preference() {
                    PollMode::None => PollMode::Hpd,
                    preference => preference,
                };
                if connector.polled() != restored {
                    debug!("Reenabling HPD on connector {}", connector.name());
                }
                connector.set_polled(restored);
            }
        }

        if reenabled.is_empty() {
            return;
        }
        info!("Re-enabled HPD on pins {:?}", reenabled);

        if self.platform.display_irqs_enabled() {
            self.platform.hpd_irq_setup(&state.pins);
        }
    }

    // ========================================================================
    // Pin Control
    // ========================================================================

    /// Turn off interrupt-driven detection on `pin`
    ///
    /// Returns true only if the pin was enabled.
    pub fn disable_pin(&self, pin: Pin) -> bool {
        self.state.lock().pins.disable(pin)
    }

    /// Turn interrupt-driven detection on `pin` back on
    pub fn enable_pin(&self, pin: Pin) {
        self.state.lock().pins.enable(pin);
    }

    pub fn pin_state(&self, pin: Pin) -> PinState {
        self.state.lock().pins.state(pin)
    }

    pub fn pin_status(&self) -> Vec<PinStatus> {
        self.state.lock().pins.status()
    }

    pub fn port_for_pin(&self, pin: Pin) -> Option<Port> {
        port_for_pin(pin, self.caps.alternate_pin_port)
    }

    pub fn pin_for_port(&self, port: Port) -> Option<Pin> {
        pin_for_port(port, self.caps.alternate_pin_port)
    }

    pub fn connectors(&self) -> &Arc<ConnectorList> {
        &self.connectors
    }

    pub fn mode_config(&self) -> &Arc<AsyncMutex<()>> {
        &self.mode_config
    }

    pub fn caps(&self) -> &PlatformCaps {
        &self.caps
    }

    // ========================================================================
    // Storm Control
    // ========================================================================

    /// Apply a threshold knob write
    pub async fn set_storm_ctl(&self, ctl: StormCtl) {
        let threshold = match ctl {
            StormCtl::Reset => storm::DEFAULT_THRESHOLD,
            StormCtl::Threshold(threshold) => threshold,
        };

        if threshold > 0 {
            debug!("Setting HPD storm detection threshold to {}", threshold);
        } else {
            debug!("Disabling HPD storm detection");
        }

        {
            let mut state = self.state.lock();
            state.pins.config_mut().threshold = threshold;
            state.pins.clear_counts();
        }

        self.flush_reenable().await;
    }

    /// Apply a short-pulse counting knob write
    pub async fn set_short_storm_ctl(&self, ctl: ShortStormCtl) {
        let enabled = match ctl {
            ShortStormCtl::Reset => self.caps.short_storm_default(),
            ShortStormCtl::Enabled(enabled) => enabled,
        };

        debug!(
            "{}abling short HPD storm detection",
            if enabled { "En" } else { "Dis" }
        );

        {
            let mut state = self.state.lock();
            state.pins.config_mut().short_storm_enabled = enabled;
            state.pins.clear_counts();
        }

        self.flush_reenable().await;
    }

    /// Re-enable right away if a storm is being mitigated
    async fn flush_reenable(&self) {
        if let Some(_run) = self.reenable_work.take_now().await {
            self.reenable_work_fn();
        }
    }

    pub fn storm_status(&self) -> StormStatus {
        StormStatus {
            threshold: self.state.lock().pins.config().threshold,
            detected: self.reenable_work.is_pending(),
        }
    }

    pub fn short_storm_status(&self) -> ShortStormStatus {
        ShortStormStatus {
            enabled: self.state.lock().pins.config().short_storm_enabled,
        }
    }
}

impl Drop for Hotplug {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::Connector;
    use crate::hooks::ConnectorProbe;
    use std::sync::atomic::AtomicUsize;

    // ------------------------------------------------------------------------
    // Fakes
    // ------------------------------------------------------------------------

    struct FakePlatform {
        irq_setups: AtomicUsize,
        irqs_enabled: AtomicBool,
    }

    impl FakePlatform {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                irq_setups: AtomicUsize::new(0),
                irqs_enabled: AtomicBool::new(true),
            })
        }

        fn setups(&self) -> usize {
            self.irq_setups.load(Ordering::SeqCst)
        }
    }

    impl HotplugPlatform for FakePlatform {
        fn hpd_irq_setup(&self, _pins: &PinTable) {
            self.irq_setups.fetch_add(1, Ordering::SeqCst);
        }

        fn display_irqs_enabled(&self) -> bool {
            self.irqs_enabled.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct FakeHelper {
        poll_enables: AtomicUsize,
        hotplug_events: AtomicUsize,
        irq_events: AtomicUsize,
    }

    impl DisplayHelper for FakeHelper {
        fn poll_enable(&self) {
            self.poll_enables.fetch_add(1, Ordering::SeqCst);
        }

        fn hotplug_event(&self) {
            self.hotplug_events.fetch_add(1, Ordering::SeqCst);
        }

        fn hpd_irq_event(&self) {
            self.irq_events.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct FakeProbe {
        detects: AtomicUsize,
    }

    impl FakeProbe {
        fn detects(&self) -> usize {
            self.detects.load(Ordering::SeqCst)
        }
    }

    impl ConnectorProbe for FakeProbe {
        fn detect_and_compare(&self) -> bool {
            self.detects.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    struct FakeDigitalPort {
        result: PulseResult,
        pulses: Mutex<Vec<bool>>,
    }

    impl FakeDigitalPort {
        fn new(result: PulseResult) -> Arc<Self> {
            Arc::new(Self {
                result,
                pulses: Mutex::new(Vec::new()),
            })
        }
    }

    impl DigitalPort for FakeDigitalPort {
        fn hpd_pulse(&self, long_hpd: bool) -> PulseResult {
            self.pulses.lock().push(long_hpd);
            self.result
        }
    }

    struct Rig {
        hotplug: Arc<Hotplug>,
        platform: Arc<FakePlatform>,
        helper: Arc<FakeHelper>,
        connectors: Arc<ConnectorList>,
    }

    impl Rig {
        fn new(settings: &HotplugSettings, digital: &[(Port, Arc<FakeDigitalPort>)]) -> Self {
            let platform = FakePlatform::new();
            let helper = Arc::new(FakeHelper::default());
            let connectors = Arc::new(ConnectorList::new());
            let mut builder = HotplugBuilder::new(platform.clone(), helper.clone())
                .settings(settings)
                .connectors(Arc::clone(&connectors));
            for (port, handler) in digital {
                builder = builder.digital_port(*port, handler.clone());
            }
            let hotplug = builder.build();
            hotplug.start().unwrap();
            Self {
                hotplug,
                platform,
                helper,
                connectors,
            }
        }

        fn add_connector(&self, name: &str, pin: Pin) -> Arc<FakeProbe> {
            let probe = Arc::new(FakeProbe::default());
            self.connectors
                .register(Connector::new(name, Some(pin), probe.clone()));
            probe
        }

        fn long_pulses(&self, pin: Pin, count: usize) {
            let set: PinSet = [pin].into_iter().collect();
            for _ in 0..count {
                self.hotplug.irq_handler(set, set);
            }
        }

        fn short_pulse(&self, pin: Pin) {
            let set: PinSet = [pin].into_iter().collect();
            self.hotplug.irq_handler(set, PinSet::empty());
        }

        fn count(counter: &AtomicUsize) -> usize {
            counter.load(Ordering::SeqCst)
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    // ------------------------------------------------------------------------
    // Tests
    // ------------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_fails() {
        let rig = Rig::new(&HotplugSettings::default(), &[]);
        assert!(matches!(rig.hotplug.start(), Err(HotplugError::AlreadyStarted)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_init_sets_hpd_polling_and_reprograms() {
        let rig = Rig::new(&HotplugSettings::default(), &[]);
        rig.add_connector("HDMI-A-1", Pin::PortB);
        rig.hotplug.init();
        settle().await;

        assert_eq!(rig.platform.setups(), 1);
        assert_eq!(Rig::count(&rig.helper.irq_events), 1);
        assert_eq!(Rig::count(&rig.helper.poll_enables), 0);
        let connector = rig.connectors.find("HDMI-A-1").unwrap();
        assert_eq!(connector.polled(), PollMode::Hpd);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_polling_uses_connect_disconnect() {
        let rig = Rig::new(&HotplugSettings::default(), &[]);
        rig.add_connector("DP-1", Pin::PortC);
        rig.hotplug.set_polling_forced(true);
        settle().await;

        let connector = rig.connectors.find("DP-1").unwrap();
        assert_eq!(connector.polled(), PollMode::ConnectDisconnect);
        assert_eq!(Rig::count(&rig.helper.poll_enables), 1);
        assert_eq!(Rig::count(&rig.helper.irq_events), 0);

        rig.hotplug.init();
        settle().await;
        assert_eq!(connector.polled(), PollMode::Hpd);
        assert_eq!(Rig::count(&rig.helper.irq_events), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unforcing_keeps_storm_disabled_outputs_polled() {
        let rig = Rig::new(&HotplugSettings::default(), &[]);
        rig.add_connector("HDMI-A-1", Pin::PortB);
        rig.add_connector("DP-1", Pin::PortC);
        rig.hotplug.init();
        settle().await;

        rig.long_pulses(Pin::PortB, 6);
        settle().await;
        assert_eq!(rig.hotplug.pin_state(Pin::PortB), PinState::Disabled);

        rig.hotplug.set_polling_forced(true);
        settle().await;
        rig.hotplug.set_polling_forced(false);
        settle().await;

        let hdmi = rig.connectors.find("HDMI-A-1").unwrap();
        let dp = rig.connectors.find("DP-1").unwrap();
        assert_eq!(rig.hotplug.pin_state(Pin::PortB), PinState::Disabled);
        assert_eq!(hdmi.polled(), PollMode::ConnectDisconnect);
        assert_eq!(dp.polled(), PollMode::Hpd);
        // Storm, forced on, then forced off with an output still polled
        assert_eq!(Rig::count(&rig.helper.poll_enables), 3);

        tokio::time::sleep(storm::REENABLE_DELAY).await;
        assert_eq!(rig.hotplug.pin_state(Pin::PortB), PinState::Enabled);
        assert_eq!(hdmi.polled(), PollMode::Hpd);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_init_leaves_mst_connectors_on_preference() {
        let rig = Rig::new(&HotplugSettings::default(), &[]);
        let mst = rig.connectors.register(
            Connector::new("DP-1-1", Some(Pin::PortD), Arc::new(FakeProbe::default())).with_mst(true),
        );
        rig.hotplug.init();
        settle().await;
        assert_eq!(mst.polled(), PollMode::None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_coalesced_interrupts_probe_once() {
        let rig = Rig::new(&HotplugSettings::default(), &[]);
        let probe = rig.add_connector("HDMI-A-1", Pin::PortB);
        let other = rig.add_connector("HDMI-A-2", Pin::PortD);

        rig.long_pulses(Pin::PortB, 3);
        settle().await;

        assert_eq!(probe.detects(), 1);
        assert_eq!(other.detects(), 0);
        assert_eq!(Rig::count(&rig.helper.hotplug_events), 1);
        assert_eq!(rig.hotplug.pin_state(Pin::PortB), PinState::Enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_interrupt_ignores_unknown_bits() {
        let rig = Rig::new(&HotplugSettings::default(), &[]);
        let probe = rig.add_connector("HDMI-A-1", Pin::PortB);

        let raw = (1 << Pin::PortB.index()) | (1 << 20);
        rig.hotplug.handle_interrupt(raw, raw);
        settle().await;
        assert_eq!(probe.detects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_storm_falls_back_to_polling_then_recovers() {
        let rig = Rig::new(&HotplugSettings::default(), &[]);
        let probe = rig.add_connector("HDMI-A-1", Pin::PortB);
        rig.hotplug.init();
        settle().await;
        assert_eq!(rig.platform.setups(), 1);

        // Sixth long pulse in one window crosses the default threshold
        rig.long_pulses(Pin::PortB, 6);
        assert_eq!(rig.hotplug.pin_state(Pin::PortB), PinState::AutoDisabled);
        assert_eq!(rig.platform.setups(), 2);
        settle().await;

        let connector = rig.connectors.find("HDMI-A-1").unwrap();
        assert_eq!(rig.hotplug.pin_state(Pin::PortB), PinState::Disabled);
        assert_eq!(connector.polled(), PollMode::ConnectDisconnect);
        assert_eq!(Rig::count(&rig.helper.poll_enables), 1);
        assert_eq!(probe.detects(), 0);
        assert!(rig.hotplug.storm_status().detected);

        // Ignored while disabled
        rig.long_pulses(Pin::PortB, 1);
        settle().await;
        assert_eq!(probe.detects(), 0);

        tokio::time::sleep(storm::REENABLE_DELAY).await;
        assert_eq!(rig.hotplug.pin_state(Pin::PortB), PinState::Enabled);
        assert_eq!(connector.polled(), PollMode::Hpd);
        assert_eq!(rig.platform.setups(), 3);
        assert!(!rig.hotplug.storm_status().detected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_pin_warns_once() {
        let rig = Rig::new(&HotplugSettings::default(), &[]);
        let probe = rig.add_connector("HDMI-A-1", Pin::PortB);
        rig.hotplug.disable_pin(Pin::PortB);
        assert!(!rig.hotplug.disabled_irq_warned.load(Ordering::Relaxed));

        rig.long_pulses(Pin::PortB, 2);
        settle().await;
        assert!(rig.hotplug.disabled_irq_warned.load(Ordering::Relaxed));
        assert_eq!(probe.detects(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_pin_warning_suppressed_on_gmch() {
        let mut settings = HotplugSettings::default();
        settings.platform.gmch_display = true;
        let rig = Rig::new(&settings, &[]);
        rig.hotplug.disable_pin(Pin::PortB);

        rig.long_pulses(Pin::PortB, 2);
        settle().await;
        assert!(!rig.hotplug.disabled_irq_warned.load(Ordering::Relaxed));
        assert_eq!(rig.hotplug.pin_state(Pin::PortB), PinState::Disabled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_irqs_off_skips_reprogramming() {
        let rig = Rig::new(&HotplugSettings::default(), &[]);
        rig.platform.irqs_enabled.store(false, Ordering::SeqCst);
        rig.long_pulses(Pin::PortB, 6);
        assert_eq!(rig.hotplug.pin_state(Pin::PortB), PinState::AutoDisabled);
        assert_eq!(rig.platform.setups(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unhandled_digital_pulse_falls_back() {
        let port = FakeDigitalPort::new(PulseResult::NotHandled);
        let rig = Rig::new(&HotplugSettings::default(), &[(Port::C, port.clone())]);
        let probe = rig.add_connector("DP-1", Pin::PortC);

        rig.short_pulse(Pin::PortC);
        settle().await;

        assert_eq!(*port.pulses.lock(), vec![false]);
        assert_eq!(probe.detects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handled_digital_pulse_skips_generic_path() {
        let port = FakeDigitalPort::new(PulseResult::Handled);
        let rig = Rig::new(&HotplugSettings::default(), &[(Port::C, port.clone())]);
        let probe = rig.add_connector("DP-1", Pin::PortC);

        rig.long_pulses(Pin::PortC, 1);
        rig.short_pulse(Pin::PortC);
        settle().await;

        // Both bits drained by a single run; the long pulse wins
        assert_eq!(*port.pulses.lock(), vec![true]);
        assert_eq!(probe.detects(), 0);
        assert_eq!(Rig::count(&rig.helper.hotplug_events), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_alternate_pairing_routes_port_e_pin_to_port_f() {
        let mut settings = HotplugSettings::default();
        settings.platform.alternate_pin_port = true;
        let port_f = FakeDigitalPort::new(PulseResult::Handled);
        let rig = Rig::new(&settings, &[(Port::F, port_f.clone())]);

        assert_eq!(rig.hotplug.port_for_pin(Pin::PortE), Some(Port::F));
        assert_eq!(rig.hotplug.pin_for_port(Port::F), Some(Pin::PortE));

        rig.short_pulse(Pin::PortE);
        settle().await;
        assert_eq!(*port_f.pulses.lock(), vec![false]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_digital_pin_stays_disabled_after_storm() {
        let port = FakeDigitalPort::new(PulseResult::Handled);
        let rig = Rig::new(&HotplugSettings::default(), &[(Port::B, port)]);
        rig.add_connector("DP-2", Pin::PortB);
        rig.hotplug.init();
        settle().await;

        rig.long_pulses(Pin::PortB, 6);
        settle().await;
        assert_eq!(rig.hotplug.pin_state(Pin::PortB), PinState::Disabled);

        tokio::time::sleep(storm::REENABLE_DELAY).await;
        assert_eq!(rig.hotplug.pin_state(Pin::PortB), PinState::Disabled);

        rig.hotplug.enable_pin(Pin::PortB);
        assert_eq!(rig.hotplug.pin_state(Pin::PortB), PinState::Enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_digital_pin_reenabled_when_configured() {
        let mut settings = HotplugSettings::default();
        settings.storm.reenable_digital_pins = true;
        let port = FakeDigitalPort::new(PulseResult::Handled);
        let rig = Rig::new(&settings, &[(Port::B, port)]);
        rig.add_connector("DP-2", Pin::PortB);
        rig.hotplug.init();
        settle().await;

        rig.long_pulses(Pin::PortB, 6);
        settle().await;
        tokio::time::sleep(storm::REENABLE_DELAY).await;
        assert_eq!(rig.hotplug.pin_state(Pin::PortB), PinState::Enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_admin_disabled_pin_not_reenabled() {
        let rig = Rig::new(&HotplugSettings::default(), &[]);
        rig.add_connector("HDMI-A-1", Pin::PortB);
        rig.hotplug.init();
        settle().await;

        assert!(rig.hotplug.disable_pin(Pin::PortD));
        assert!(!rig.hotplug.disable_pin(Pin::PortD));

        rig.long_pulses(Pin::PortB, 6);
        settle().await;
        tokio::time::sleep(storm::REENABLE_DELAY).await;

        assert_eq!(rig.hotplug.pin_state(Pin::PortB), PinState::Enabled);
        assert_eq!(rig.hotplug.pin_state(Pin::PortD), PinState::Disabled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_drops_queued_work() {
        let rig = Rig::new(&HotplugSettings::default(), &[]);
        let probe = rig.add_connector("HDMI-A-1", Pin::PortB);

        rig.long_pulses(Pin::PortB, 1);
        rig.hotplug.cancel_all().await;
        settle().await;
        assert_eq!(probe.detects(), 0);

        // Still usable afterwards
        rig.long_pulses(Pin::PortB, 1);
        settle().await;
        assert_eq!(probe.detects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_storm_ctl_flushes_reenable() {
        let rig = Rig::new(&HotplugSettings::default(), &[]);
        rig.add_connector("HDMI-A-1", Pin::PortB);
        rig.hotplug.init();
        settle().await;

        rig.long_pulses(Pin::PortB, 6);
        settle().await;
        assert_eq!(rig.hotplug.pin_state(Pin::PortB), PinState::Disabled);

        rig.hotplug.set_storm_ctl(StormCtl::Threshold(5)).await;
        assert_eq!(rig.hotplug.pin_state(Pin::PortB), PinState::Enabled);
        assert_eq!(
            rig.hotplug.storm_status(),
            StormStatus {
                threshold: 5,
                detected: false
            }
        );
        assert!(rig.hotplug.pin_status().iter().all(|status| status.count == 0));

        rig.hotplug.set_storm_ctl(StormCtl::Reset).await;
        assert_eq!(rig.hotplug.storm_status().threshold, storm::DEFAULT_THRESHOLD);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_storm_ctl_reset_follows_platform() {
        let mut settings = HotplugSettings::default();
        settings.platform.dp_mst = true;
        let rig = Rig::new(&settings, &[]);
        assert!(!rig.hotplug.short_storm_status().enabled);

        rig.hotplug.set_short_storm_ctl(ShortStormCtl::Enabled(true)).await;
        assert!(rig.hotplug.short_storm_status().enabled);

        rig.hotplug.set_short_storm_ctl(ShortStormCtl::Reset).await;
        assert!(!rig.hotplug.short_storm_status().enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_workers() {
        let rig = Rig::new(&HotplugSettings::default(), &[]);
        let probe = rig.add_connector("HDMI-A-1", Pin::PortB);
        rig.hotplug.shutdown().await;

        rig.long_pulses(Pin::PortB, 1);
        settle().await;
        assert_eq!(probe.detects(), 0);
    }
}
