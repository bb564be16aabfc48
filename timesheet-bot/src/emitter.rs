//! Keyed change notifications.
//!
//! An [`Emitter`] keeps an ordered list of listeners, each registered under
//! an optional key. Publishing a key calls exactly the listeners registered
//! under that key (`None` is a key of its own), in registration order.
//!
//! Listeners are plain synchronous closures. The registry lock is never held
//! while a listener runs, so a listener may subscribe, dispose, or publish
//! again on the same emitter.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

type Listener<P> = Arc<dyn Fn(&P) + Send + Sync>;

struct Entry<K, P> {
    key: Option<K>,
    listener: Listener<P>,
}

struct Registry<K, P> {
    next_id: u64,
    entries: BTreeMap<u64, Entry<K, P>>,
}

impl<K, P> Default for Registry<K, P> {
    fn default() -> Self {
        Self {
            next_id: 0,
            entries: BTreeMap::new(),
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Something a [`Subscription`] can detach its registrations from.
trait Detach: Send + Sync {
    fn detach(&self, ids: &[u64]);
}

impl<K: Send, P> Detach for Mutex<Registry<K, P>> {
    fn detach(&self, ids: &[u64]) {
        let mut registry = lock(self);
        for id in ids {
            registry.entries.remove(id);
        }
    }
}

/// Keyed listener registry.
pub struct Emitter<K, P = ()> {
    inner: Arc<Mutex<Registry<K, P>>>,
}

impl<K, P> Clone for Emitter<K, P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, P> std::fmt::Debug for Emitter<K, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter")
            .field("listeners", &lock(&self.inner).entries.len())
            .finish()
    }
}

impl<K, P> Default for Emitter<K, P>
where
    K: PartialEq + Clone + Send + 'static,
    P: 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, P> Emitter<K, P>
where
    K: PartialEq + Clone + Send + 'static,
    P: 'static,
{
    /// Create an emitter with no listeners.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Registry::default())),
        }
    }

    /// Register `listener` under `key`.
    pub fn subscribe<F>(&self, key: Option<K>, listener: F) -> Subscription
    where
        F: Fn(&P) + Send + Sync + 'static,
    {
        self.subscribe_many([key], listener)
    }

    /// Register the same listener under every key in `keys`.
    ///
    /// The returned subscription disposes all of them at once.
    pub fn subscribe_many<I, F>(&self, keys: I, listener: F) -> Subscription
    where
        I: IntoIterator<Item = Option<K>>,
        F: Fn(&P) + Send + Sync + 'static,
    {
        let listener: Listener<P> = Arc::new(listener);
        let mut registry = lock(&self.inner);
        let mut ids = Vec::new();
        for key in keys {
            let id = registry.next_id;
            registry.next_id += 1;
            registry.entries.insert(
                id,
                Entry {
                    key,
                    listener: Arc::clone(&listener),
                },
            );
            ids.push(id);
        }
        drop(registry);

        let inner: Arc<dyn Detach> = self.inner.clone();
        Subscription {
            source: Arc::downgrade(&inner),
            ids,
        }
    }

    /// Call every listener registered under exactly `key`.
    ///
    /// A listener disposed by an earlier listener of the same publish is
    /// skipped.
    pub fn publish(&self, key: Option<K>, payload: &P) {
        let snapshot: Vec<(u64, Listener<P>)> = lock(&self.inner)
            .entries
            .iter()
            .filter(|(_, entry)| entry.key == key)
            .map(|(id, entry)| (*id, Arc::clone(&entry.listener)))
            .collect();

        for (id, listener) in snapshot {
            if !lock(&self.inner).entries.contains_key(&id) {
                continue;
            }
            listener(payload);
        }
    }

    /// Number of registrations under `key`.
    #[must_use]
    pub fn listener_count(&self, key: Option<&K>) -> usize {
        lock(&self.inner)
            .entries
            .values()
            .filter(|entry| entry.key.as_ref() == key)
            .count()
    }

    /// Whether no listener is registered at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        lock(&self.inner).entries.is_empty()
    }
}

/// Handle that removes the registrations created by one subscribe call.
///
/// Dropping the handle keeps the listener registered; call
/// [`Subscription::dispose`] to remove it.
#[must_use = "a dropped subscription can no longer be disposed"]
pub struct Subscription {
    source: Weak<dyn Detach>,
    ids: Vec<u64>,
}

impl Subscription {
    /// Remove the registrations. Calling it again does nothing.
    pub fn dispose(&mut self) {
        let ids = std::mem::take(&mut self.ids);
        if ids.is_empty() {
            return;
        }
        if let Some(source) = self.source.upgrade() {
            source.detach(&ids);
        }
    }

    /// Whether the registrations are still in place.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.ids.is_empty() && self.source.strong_count() > 0
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("ids", &self.ids)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq)]
    enum Key {
        A,
        B,
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&()) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (count, move |(): &()| {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_publish_matches_exact_key() {
        let emitter: Emitter<Key> = Emitter::new();
        let (none_hits, on_none) = counter();
        let (a_hits, on_a) = counter();
        let _s1 = emitter.subscribe(None, on_none);
        let _s2 = emitter.subscribe(Some(Key::A), on_a);

        emitter.publish(None, &());
        emitter.publish(Some(Key::A), &());
        emitter.publish(Some(Key::B), &());

        assert_eq!(none_hits.load(Ordering::SeqCst), 1);
        assert_eq!(a_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_registration_order() {
        let emitter: Emitter<Key, Vec<u8>> = Emitter::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut subs = Vec::new();
        for n in 0..3u8 {
            let seen = Arc::clone(&seen);
            subs.push(emitter.subscribe(None, move |_: &Vec<u8>| seen.lock().unwrap().push(n)));
        }
        emitter.publish(None, &Vec::new());
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let emitter: Emitter<Key> = Emitter::new();
        let (hits, on_any) = counter();
        let mut sub = emitter.subscribe(None, on_any);
        let (other_hits, on_other) = counter();
        let _keep = emitter.subscribe(None, on_other);

        sub.dispose();
        sub.dispose();
        assert!(!sub.is_active());

        emitter.publish(None, &());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(other_hits.load(Ordering::SeqCst), 1);
        assert_eq!(emitter.listener_count(None), 1);
    }

    #[test]
    fn test_subscribe_many_disposes_all_keys() {
        let emitter: Emitter<Key> = Emitter::new();
        let (hits, on_any) = counter();
        let mut sub = emitter.subscribe_many([None, Some(Key::A), Some(Key::B)], on_any);

        emitter.publish(Some(Key::B), &());
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        sub.dispose();
        assert!(emitter.is_empty());
        emitter.publish(None, &());
        emitter.publish(Some(Key::A), &());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listener_disposed_mid_publish_is_skipped() {
        let emitter: Emitter<Key> = Emitter::new();
        let victim: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let (victim_hits, on_victim) = counter();

        let slot = Arc::clone(&victim);
        let _killer = emitter.subscribe(None, move |()| {
            if let Some(mut sub) = slot.lock().unwrap().take() {
                sub.dispose();
            }
        });
        *victim.lock().unwrap() = Some(emitter.subscribe(None, on_victim));

        emitter.publish(None, &());
        assert_eq!(victim_hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_reentrant_publish() {
        let emitter: Emitter<Key> = Emitter::new();
        let (b_hits, on_b) = counter();
        let _b = emitter.subscribe(Some(Key::B), on_b);

        let inner = emitter.clone();
        let _a = emitter.subscribe(Some(Key::A), move |()| inner.publish(Some(Key::B), &()));

        emitter.publish(Some(Key::A), &());
        assert_eq!(b_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dispose_after_emitter_dropped() {
        let emitter: Emitter<Key> = Emitter::new();
        let mut sub = emitter.subscribe(None, |()| {});
        drop(emitter);
        assert!(!sub.is_active());
        sub.dispose();
    }
}
