//! Observer fabric shared by device, command and mode
//!
//! Each core entity holds an `ObserverSet` of non-owning subscriber
//! references and notifies them synchronously after every committed state
//! mutation. Delivery is fire-and-forget: no return value is consulted and
//! subscribers run in subscription order within the caller's context.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::command::{Command, CommandReport, CommandStatus};
use crate::device::Device;
use crate::mode::{Mode, ModeEvent};

/// Subscriber to device connection/state changes
pub trait DeviceObserver: Send + Sync {
    /// Called after any state-mutating device operation, with the device
    /// already reflecting the new state.
    fn on_device_state_changed(&self, device: &Device);
}

/// Subscriber to command execution outcomes
pub trait CommandObserver: Send + Sync {
    /// Called once per `execute` with the terminal status and its payload.
    fn on_command_executed(&self, command: &Command, status: CommandStatus, report: &CommandReport);
}

/// Subscriber to mode state-machine events
pub trait ModeObserver: Send + Sync {
    fn on_mode_state_changed(&self, mode: &Mode, event: &ModeEvent);
}

/// Ordered set of weak subscriber references.
///
/// Subscribing the same observer twice is a no-op; unsubscribing is legal at
/// any time, including from inside a notification callback. The set never
/// owns its subscribers: a dropped observer simply stops receiving events.
pub struct ObserverSet<T: ?Sized> {
    subscribers: RwLock<Vec<Weak<T>>>,
}

impl<T: ?Sized> Default for ObserverSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> ObserverSet<T> {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Add a subscriber. Re-adding the same `Arc` is a no-op.
    pub fn subscribe(&self, observer: &Arc<T>) {
        let mut subs = self.subscribers.write();
        // Dropped subscribers are pruned here rather than during delivery.
        subs.retain(|w| w.strong_count() > 0);
        let weak = Arc::downgrade(observer);
        if !subs.iter().any(|w| w.ptr_eq(&weak)) {
            subs.push(weak);
        }
    }

    /// Remove a subscriber if present.
    pub fn unsubscribe(&self, observer: &Arc<T>) {
        let weak = Arc::downgrade(observer);
        self.subscribers.write().retain(|w| !w.ptr_eq(&weak));
    }

    /// Number of live subscribers.
    pub fn len(&self) -> usize {
        self.subscribers
            .read()
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver an event to every live subscriber, in subscription order.
    ///
    /// Iterates over a snapshot taken before the first callback, so a
    /// subscriber may unsubscribe (itself or others) while being notified.
    pub fn notify(&self, mut deliver: impl FnMut(&T)) {
        let snapshot: Vec<Arc<T>> = self
            .subscribers
            .read()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for subscriber in snapshot {
            deliver(&subscriber);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    trait Probe: Send + Sync {
        fn poke(&self);
    }

    struct Counter(AtomicUsize);

    impl Probe for Counter {
        fn poke(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_subscribe_is_idempotent() {
        let set: ObserverSet<dyn Probe> = ObserverSet::new();
        let probe: Arc<dyn Probe> = Arc::new(Counter(AtomicUsize::new(0)));

        set.subscribe(&probe);
        set.subscribe(&probe);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_notify_reaches_all_subscribers_in_order() {
        let set: ObserverSet<dyn Probe> = ObserverSet::new();
        let a: Arc<dyn Probe> = Arc::new(Counter(AtomicUsize::new(0)));
        let b: Arc<dyn Probe> = Arc::new(Counter(AtomicUsize::new(0)));

        set.subscribe(&a);
        set.subscribe(&b);

        let mut order = Vec::new();
        set.notify(|p| {
            p.poke();
            order.push(set.len());
        });
        assert_eq!(order.len(), 2);
    }

    #[test]
    fn test_unsubscribe_during_notify_is_safe() {
        let set: ObserverSet<dyn Probe> = ObserverSet::new();
        let a: Arc<dyn Probe> = Arc::new(Counter(AtomicUsize::new(0)));
        let b: Arc<dyn Probe> = Arc::new(Counter(AtomicUsize::new(0)));

        set.subscribe(&a);
        set.subscribe(&b);

        let mut delivered = 0;
        set.notify(|p| {
            // First delivery removes the second subscriber; the snapshot
            // still carries it for this round.
            set.unsubscribe(&b);
            p.poke();
            delivered += 1;
        });
        assert_eq!(delivered, 2);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_dropped_subscriber_stops_receiving() {
        let set: ObserverSet<dyn Probe> = ObserverSet::new();
        let a: Arc<dyn Probe> = Arc::new(Counter(AtomicUsize::new(0)));
        {
            let transient: Arc<dyn Probe> = Arc::new(Counter(AtomicUsize::new(0)));
            set.subscribe(&transient);
        }
        set.subscribe(&a);

        let mut delivered = 0;
        set.notify(|_| delivered += 1);
        assert_eq!(delivered, 1);
    }
}
