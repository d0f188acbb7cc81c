//! Listener seam for adaptive state changes.
//!
//! Listeners are weakly held and invoked synchronously on the adjuster's
//! call path, in adjustment order. A listener is an isolation boundary: a
//! panic inside one is caught and logged, never rethrown, and dropped
//! listeners are pruned on the next notification.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::warn;

use crate::pattern::adaptive::state::Phase;

#[allow(unused_variables)]
pub trait AdaptiveListener: Send + Sync {
    fn on_phase_transition(&self, from: Phase, to: Phase, tps: f64) {}
    fn on_tps_change(&self, from: f64, to: f64) {}
    fn on_stability_detected(&self, tps: f64) {}
    fn on_recovery(&self, tps: f64) {}
}

#[derive(Default)]
pub(crate) struct ListenerSet {
    listeners: RwLock<Vec<Weak<dyn AdaptiveListener>>>,
}

impl ListenerSet {
    pub fn add(&self, listener: &Arc<dyn AdaptiveListener>) {
        self.listeners.write().push(Arc::downgrade(listener));
    }

    /// Invoke `call` on every live listener, pruning the dead ones.
    pub fn notify(&self, call: impl Fn(&dyn AdaptiveListener)) {
        let live: Vec<Arc<dyn AdaptiveListener>> = {
            let mut guard = self.listeners.write();
            guard.retain(|weak| weak.strong_count() > 0);
            guard.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in live {
            if catch_unwind(AssertUnwindSafe(|| call(listener.as_ref()))).is_err() {
                warn!("adaptive listener panicked; continuing");
            }
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct Counting {
        calls: AtomicU64,
    }

    impl AdaptiveListener for Counting {
        fn on_tps_change(&self, _from: f64, _to: f64) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Panicking;

    impl AdaptiveListener for Panicking {
        fn on_tps_change(&self, _from: f64, _to: f64) {
            panic!("listener bug");
        }
    }

    #[test]
    fn test_notify_reaches_live_listeners() {
        let set = ListenerSet::default();
        let listener = Arc::new(Counting {
            calls: AtomicU64::new(0),
        });
        set.add(&(listener.clone() as Arc<dyn AdaptiveListener>));
        set.notify(|l| l.on_tps_change(10.0, 20.0));
        assert_eq!(listener.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dropped_listeners_are_pruned() {
        let set = ListenerSet::default();
        {
            let short_lived = Arc::new(Counting {
                calls: AtomicU64::new(0),
            });
            set.add(&(short_lived.clone() as Arc<dyn AdaptiveListener>));
        }
        set.notify(|l| l.on_tps_change(1.0, 2.0));
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn test_listener_panic_is_contained() {
        let set = ListenerSet::default();
        let panicking = Arc::new(Panicking);
        let counting = Arc::new(Counting {
            calls: AtomicU64::new(0),
        });
        set.add(&(panicking.clone() as Arc<dyn AdaptiveListener>));
        set.add(&(counting.clone() as Arc<dyn AdaptiveListener>));
        set.notify(|l| l.on_tps_change(1.0, 2.0));
        // The panicking listener did not prevent the second from running.
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
    }
}
