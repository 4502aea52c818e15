//! Host environment notifications.
//!
//! The timer never installs global listeners. Everything it reacts to (the
//! periodic tick, visibility changes, storage writes from other tabs) arrives
//! through a [`Host`] subscription, so tests can substitute a fake source and
//! drive time deterministically.

mod driver;
mod local;

pub use driver::run_ticks;
pub use local::LocalHost;

use serde::{Deserialize, Serialize};

/// A write made to shared storage by another tab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageChange {
    pub key: String,
    /// New value, or `None` when the key was removed.
    pub new_value: Option<String>,
}

/// Notifications delivered by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HostEvent {
    /// Nominal periodic tick.
    Tick,
    /// The page became visible or hidden.
    Visibility { visible: bool },
    /// Shared storage changed in another tab.
    Storage(StorageChange),
}

impl HostEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            HostEvent::Tick => EventKind::Tick,
            HostEvent::Visibility { .. } => EventKind::Visibility,
            HostEvent::Storage(_) => EventKind::Storage,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Tick,
    Visibility,
    Storage,
}

/// Handle returned by [`Host::subscribe`]; pass it back to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionToken(pub(crate) u64);

pub type EventHandler = Box<dyn FnMut(&HostEvent)>;

/// Subscription interface to the host's notifications.
pub trait Host {
    fn subscribe(&self, kind: EventKind, handler: EventHandler) -> SubscriptionToken;

    /// Returns false if the token was unknown or already removed.
    fn unsubscribe(&self, token: SubscriptionToken) -> bool;

    fn is_visible(&self) -> bool;
}
