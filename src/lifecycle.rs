//! Lifecycle states shared by engines and schedulers

use std::fmt::{self, Display};

use crossbeam::atomic::AtomicCell;

/// Lifecycle of an engine or scheduler.
///
/// States only move forward: `Ready → Active → Exiting → Dead`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    /// Created, not yet running
    Ready,
    /// Running
    Active,
    /// Shutdown requested, draining
    Exiting,
    /// Finished; inert
    Dead,
}

impl Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Lifecycle::Ready => "ready",
            Lifecycle::Active => "active",
            Lifecycle::Exiting => "exiting",
            Lifecycle::Dead => "dead",
        };
        f.write_str(name)
    }
}

/// A lifecycle readable and advanced from any thread
#[derive(Debug)]
pub(crate) struct SharedLifecycle(AtomicCell<Lifecycle>);

impl SharedLifecycle {
    pub(crate) fn new() -> Self {
        SharedLifecycle(AtomicCell::new(Lifecycle::Ready))
    }

    pub(crate) fn get(&self) -> Lifecycle {
        self.0.load()
    }

    /// Move from `from` to `to`; fails if another state was observed
    pub(crate) fn transition(&self, from: Lifecycle, to: Lifecycle) -> Result<(), Lifecycle> {
        self.0.compare_exchange(from, to).map(|_| ())
    }

    /// Unconditionally mark as dead
    pub(crate) fn kill(&self) {
        self.0.store(Lifecycle::Dead);
    }
}
