//! Coalescing deferred work items
//!
//! Each kind of deferred work has exactly one long-lived worker task that
//! waits on its work item. Queueing from interrupt context is a single
//! atomic swap plus a `Notify` wake, so it never blocks.
//!
//! Semantics:
//! - queueing an item that is already pending is a no-op (coalesced)
//! - queueing while the item is running results in exactly one more run
//! - cancelling disarms the item and waits for an in-flight run to finish

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard, Notify};
use tokio::time::Instant;
use tracing::trace;

/// Held by a worker for the duration of one run
pub type RunGuard<'a> = AsyncMutexGuard<'a, ()>;

// ============================================================================
// Immediate Work
// ============================================================================

/// Work item that runs as soon as its worker gets scheduled
#[derive(Debug)]
pub struct Work {
    name: &'static str,
    pending: AtomicBool,
    notify: Notify,
    running: AsyncMutex<()>,
}

impl Work {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            pending: AtomicBool::new(false),
            notify: Notify::new(),
            running: AsyncMutex::new(()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Queue the work. Returns false if it was already pending.
    pub fn queue(&self) -> bool {
        if self.pending.swap(true, Ordering::AcqRel) {
            trace!("{} already pending", self.name);
            return false;
        }
        self.notify.notify_one();
        true
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Wait until the work is due and claim it for one run
    pub async fn next(&self) -> RunGuard<'_> {
        loop {
            self.notify.notified().await;
            let guard = self.running.lock().await;
            // Checked under the run lock so a concurrent cancel wins
            if self.pending.swap(false, Ordering::AcqRel) {
                return guard;
            }
        }
    }

    /// Drop a pending run and wait for an in-flight one to finish
    pub async fn cancel(&self) {
        self.pending.store(false, Ordering::Release);
        let _running = self.running.lock().await;
        trace!("{} cancelled", self.name);
    }
}

// ============================================================================
// Delayed Work
// ============================================================================

/// Work item armed with a deadline
///
/// Re-arming replaces the deadline instead of stacking timers.
#[derive(Debug)]
pub struct DelayedWork {
    name: &'static str,
    deadline: Mutex<Option<Instant>>,
    notify: Notify,
    running: AsyncMutex<()>,
}

impl DelayedWork {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            deadline: Mutex::new(None),
            notify: Notify::new(),
            running: AsyncMutex::new(()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Arm (or re-arm) the work to run `delay` from now
    pub fn schedule(&self, delay: Duration) {
        *self.deadline.lock() = Some(Instant::now() + delay);
        self.notify.notify_one();
        trace!("{} armed in {:?}", self.name, delay);
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.lock().is_some()
    }

    /// Wait until the deadline passes and claim the work for one run
    pub async fn next(&self) -> RunGuard<'_> {
        loop {
            let deadline = *self.deadline.lock();
            match deadline {
                None => self.notify.notified().await,
                Some(at) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(at) => {}
                        _ = self.notify.notified() => continue,
                    }
                    let guard = self.running.lock().await;
                    if self.take_expired() {
                        return guard;
                    }
                }
            }
        }
    }

    /// Disarm and run-claim immediately if armed (flush)
    ///
    /// Returns the run guard when the caller should run the work now.
    pub async fn take_now(&self) -> Option<RunGuard<'_>> {
        let guard = self.running.lock().await;
        let armed = self.deadline.lock().take().is_some();
        self.notify.notify_one();
        armed.then_some(guard)
    }

    /// Disarm and wait for an in-flight run to finish
    pub async fn cancel(&self) {
        *self.deadline.lock() = None;
        self.notify.notify_one();
        let _running = self.running.lock().await;
        trace!("{} cancelled", self.name);
    }

    fn take_expired(&self) -> bool {
        let mut deadline = self.deadline.lock();
        match *deadline {
            Some(at) if at <= Instant::now() => {
                *deadline = None;
                true
            }
            _ => false,
        }
    }
}
