//! Identifier-keyed listener fan-out.
//!
//! A [`ListenerRegistry`] maps keys to ordered listener registrations.
//! Registrations are either strong (the registry keeps the listener alive
//! until it is unregistered) or weak (the registry holds a [`Weak`] and
//! drops the registration once the caller's `Arc` is gone).
//!
//! [`ListenerRegistry::call`] snapshots the live listeners for a key, releases
//! the lock, then invokes each one. A listener that panics is logged and
//! skipped for that call only; it stays registered and the remaining
//! listeners still run.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, warn};

/// A change callback.
pub type Listener<V> = Arc<dyn Fn(&V) + Send + Sync>;

type WeakListener<V> = Weak<dyn Fn(&V) + Send + Sync>;

/// Opaque handle identifying one registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerHandle(u64);

enum Retention<V> {
    Strong(Listener<V>),
    Weak(WeakListener<V>),
}

impl<V> Retention<V> {
    fn upgrade(&self) -> Option<Listener<V>> {
        match self {
            Retention::Strong(listener) => Some(Arc::clone(listener)),
            Retention::Weak(listener) => listener.upgrade(),
        }
    }
}

struct Registration<V> {
    handle: ListenerHandle,
    retention: Retention<V>,
}

/// Multi-subscriber registry keyed by `K`, delivering `&V`.
pub struct ListenerRegistry<K, V> {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<K, Vec<Registration<V>>>>,
}

impl<K, V> Default for ListenerRegistry<K, V> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            listeners: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> ListenerRegistry<K, V>
where
    K: Eq + Hash + Clone + Debug,
{
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener that stays alive until unregistered.
    pub fn register(&self, key: K, listener: Listener<V>) -> ListenerHandle {
        self.insert(key, Retention::Strong(listener))
    }

    /// Register a listener held weakly. It is dropped once every external
    /// `Arc` to it is gone.
    pub fn register_weak(&self, key: K, listener: &Listener<V>) -> ListenerHandle {
        self.insert(key, Retention::Weak(Arc::downgrade(listener)))
    }

    fn insert(&self, key: K, retention: Retention<V>) -> ListenerHandle {
        let handle = ListenerHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .entry(key)
            .or_default()
            .push(Registration { handle, retention });
        handle
    }

    /// Remove one registration. Returns `false` if it was not present.
    pub fn unregister(&self, handle: ListenerHandle) -> bool {
        let mut listeners = self.listeners.lock();
        let mut found = false;
        listeners.retain(|_, registrations| {
            let before = registrations.len();
            registrations.retain(|r| r.handle != handle);
            found |= registrations.len() < before;
            !registrations.is_empty()
        });
        found
    }

    /// Remove every registration for `key`. Returns how many were removed.
    pub fn remove_all(&self, key: &K) -> usize {
        self.listeners.lock().remove(key).map_or(0, |r| r.len())
    }

    /// Invoke every live listener for `key` with `value`.
    ///
    /// Returns the number of listeners that completed without panicking.
    pub fn call(&self, key: &K, value: &V) -> usize {
        let live = self.live_listeners(key);
        let mut delivered = 0;
        for (handle, listener) in live {
            match catch_unwind(AssertUnwindSafe(|| listener(value))) {
                Ok(()) => delivered += 1,
                Err(panic) => {
                    warn!(
                        key = ?key,
                        listener = handle.0,
                        panic = panic_message(panic.as_ref()),
                        "listener panicked, skipping"
                    );
                }
            }
        }
        delivered
    }

    fn live_listeners(&self, key: &K) -> Vec<(ListenerHandle, Listener<V>)> {
        let mut listeners = self.listeners.lock();
        let Some(registrations) = listeners.get_mut(key) else {
            return Vec::new();
        };
        let mut live = Vec::with_capacity(registrations.len());
        registrations.retain(|r| match r.retention.upgrade() {
            Some(listener) => {
                live.push((r.handle, listener));
                true
            }
            None => false,
        });
        if registrations.is_empty() {
            let _ = listeners.remove(key);
            debug!(key = ?key, "pruned dead weak listeners");
        }
        live
    }

    /// Keys with at least one registration.
    pub fn keys(&self) -> Vec<K> {
        self.listeners.lock().keys().cloned().collect()
    }

    /// Whether `key` has at least one live listener.
    pub fn has_listeners(&self, key: &K) -> bool {
        self.listeners
            .lock()
            .get(key)
            .is_some_and(|r| r.iter().any(|r| r.retention.upgrade().is_some()))
    }

    /// Remove every registration.
    pub fn clear(&self) {
        self.listeners.lock().clear();
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tracing::Level;
    use warden_core::logging::capture_logs;

    fn counter() -> (Arc<AtomicUsize>, Listener<i32>) {
        let count = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&count);
        let listener: Listener<i32> = Arc::new(move |_| {
            let _ = sink.fetch_add(1, Ordering::SeqCst);
        });
        (count, listener)
    }

    #[test]
    fn call_reaches_only_matching_key() {
        let registry = ListenerRegistry::<String, i32>::new();
        let (a, la) = counter();
        let (b, lb) = counter();
        let _ = registry.register("a".into(), la);
        let _ = registry.register("b".into(), lb);

        assert_eq!(registry.call(&"a".into(), &1), 1);
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 0);
        assert_eq!(registry.call(&"missing".into(), &1), 0);
    }

    #[test]
    fn values_are_delivered() {
        let registry = ListenerRegistry::<&str, i32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _ = registry.register("k", Arc::new(move |v: &i32| sink.lock().push(*v)));
        let _ = registry.call(&"k", &7);
        let _ = registry.call(&"k", &9);
        assert_eq!(*seen.lock(), vec![7, 9]);
    }

    #[test]
    fn unregister_removes_one() {
        let registry = ListenerRegistry::<&str, i32>::new();
        let (count, listener) = counter();
        let first = registry.register("k", Arc::clone(&listener));
        let _second = registry.register("k", listener);

        assert!(registry.unregister(first));
        assert!(!registry.unregister(first));
        assert_eq!(registry.call(&"k", &0), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remove_all_clears_key() {
        let registry = ListenerRegistry::<&str, i32>::new();
        let (_, listener) = counter();
        let _ = registry.register("k", Arc::clone(&listener));
        let _ = registry.register("k", listener);
        assert_eq!(registry.remove_all(&"k"), 2);
        assert!(!registry.has_listeners(&"k"));
        assert!(registry.keys().is_empty());
    }

    #[test]
    fn weak_registration_expires_with_owner() {
        let registry = ListenerRegistry::<&str, i32>::new();
        let (count, listener) = counter();
        let _ = registry.register_weak("k", &listener);

        assert!(registry.has_listeners(&"k"));
        assert_eq!(registry.call(&"k", &0), 1);

        drop(listener);
        assert!(!registry.has_listeners(&"k"));
        assert_eq!(registry.call(&"k", &0), 0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        // pruned on the call above
        assert!(registry.keys().is_empty());
    }

    #[test]
    fn strong_registration_outlives_caller_arc() {
        let registry = ListenerRegistry::<&str, i32>::new();
        let (count, listener) = counter();
        let _ = registry.register("k", listener);
        assert_eq!(registry.call(&"k", &0), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_listener_is_isolated() {
        let (logs, _guard) = capture_logs();
        let registry = ListenerRegistry::<&str, i32>::new();
        let (before, l1) = counter();
        let (after, l2) = counter();
        let _ = registry.register("k", l1);
        let _ = registry.register("k", Arc::new(|_: &i32| panic!("listener exploded")));
        let _ = registry.register("k", l2);

        assert_eq!(registry.call(&"k", &0), 2);
        assert_eq!(before.load(Ordering::SeqCst), 1);
        assert_eq!(after.load(Ordering::SeqCst), 1);
        assert!(logs.has_event(Level::WARN, "listener panicked"));
        let event = logs
            .events()
            .into_iter()
            .find(|e| e.message.contains("listener panicked"))
            .unwrap();
        assert_eq!(event.field("panic"), Some("listener exploded"));

        // skipped for that call only
        assert_eq!(registry.call(&"k", &0), 2);
        assert_eq!(before.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn listener_may_register_during_call() {
        let registry = Arc::new(ListenerRegistry::<&str, i32>::new());
        let inner = Arc::clone(&registry);
        let _ = registry.register(
            "k",
            Arc::new(move |_: &i32| {
                let _ = inner.register("other", Arc::new(|_: &i32| {}));
            }),
        );
        assert_eq!(registry.call(&"k", &0), 1);
        assert!(registry.has_listeners(&"other"));
    }
}
