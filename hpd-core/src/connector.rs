//! Display connectors and the registry the core iterates over

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::hooks::ConnectorProbe;
use crate::pin::Pin;

/// How a connector's status is monitored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollMode {
    /// No preference / not polled
    #[default]
    None,
    /// Hot-plug interrupt driven
    Hpd,
    /// Periodic connect and disconnect polling
    ConnectDisconnect,
}

impl PollMode {
    fn to_raw(self) -> u8 {
        match self {
            PollMode::None => 0,
            PollMode::Hpd => 1,
            PollMode::ConnectDisconnect => 2,
        }
    }

    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => PollMode::Hpd,
            2 => PollMode::ConnectDisconnect,
            _ => PollMode::None,
        }
    }
}

/// A display output
///
/// The poll mode is adjusted by the hot-plug core from both the state-lock
/// and mode-config-lock paths, so it lives in an atomic.
pub struct Connector {
    name: String,
    hpd_pin: Option<Pin>,
    mst: bool,
    poll_preference: PollMode,
    polled: AtomicU8,
    probe: Arc<dyn ConnectorProbe>,
}

impl Connector {
    /// Create a connector whose encoder is wired to `hpd_pin`
    pub fn new(name: impl Into<String>, hpd_pin: Option<Pin>, probe: Arc<dyn ConnectorProbe>) -> Self {
        Self {
            name: name.into(),
            hpd_pin,
            mst: false,
            poll_preference: PollMode::None,
            polled: AtomicU8::new(PollMode::None.to_raw()),
            probe,
        }
    }

    /// Set the connector's own poll preference (also the initial poll mode)
    pub fn with_poll_preference(mut self, mode: PollMode) -> Self {
        self.poll_preference = mode;
        self.polled = AtomicU8::new(mode.to_raw());
        self
    }

    /// Mark as an MST stream connector; those are reprobed by MST helpers
    pub fn with_mst(mut self, mst: bool) -> Self {
        self.mst = mst;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hpd_pin(&self) -> Option<Pin> {
        self.hpd_pin
    }

    pub fn is_mst(&self) -> bool {
        self.mst
    }

    pub fn poll_preference(&self) -> PollMode {
        self.poll_preference
    }

    pub fn polled(&self) -> PollMode {
        PollMode::from_raw(self.polled.load(Ordering::Acquire))
    }

    pub fn set_polled(&self, mode: PollMode) {
        self.polled.store(mode.to_raw(), Ordering::Release);
    }

    pub(crate) fn detect_and_compare(&self) -> bool {
        self.probe.detect_and_compare()
    }
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("name", &self.name)
            .field("hpd_pin", &self.hpd_pin)
            .field("mst", &self.mst)
            .field("poll_preference", &self.poll_preference)
            .field("polled", &self.polled())
            .finish()
    }
}

/// Registry of connectors
///
/// Iteration hands out a snapshot so no registry lock is held while
/// connector hooks run.
#[derive(Debug, Default)]
pub struct ConnectorList {
    connectors: RwLock<Vec<Arc<Connector>>>,
}

impl ConnectorList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, connector: Connector) -> Arc<Connector> {
        let connector = Arc::new(connector);
        self.connectors.write().push(Arc::clone(&connector));
        connector
    }

    /// Remove a connector by name. Returns true if one was removed.
    pub fn unregister(&self, name: &str) -> bool {
        let mut connectors = self.connectors.write();
        let before = connectors.len();
        connectors.retain(|c| c.name() != name);
        connectors.len() != before
    }

    pub fn find(&self, name: &str) -> Option<Arc<Connector>> {
        self.connectors.read().iter().find(|c| c.name() == name).cloned()
    }

    pub fn len(&self) -> usize {
        self.connectors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.read().is_empty()
    }

    /// All connectors
    pub fn snapshot(&self) -> Vec<Arc<Connector>> {
        self.connectors.read().clone()
    }

    /// Connectors currently monitored with `mode`
    pub fn with_poll_mode(&self, mode: PollMode) -> Vec<Arc<Connector>> {
        self.connectors
            .read()
            .iter()
            .filter(|c| c.polled() == mode)
            .cloned()
            .collect()
    }
}
