//! Keeps Rust-side objects alive while native code refers to them by token.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use tracing::trace;
use uwsgi_ffi::SIGNAL_TABLE_SIZE;

/// Values reachable from native code through an opaque key.
///
/// Entries live exactly from `retain` to `release`. Concurrent use from
/// different workers is fine as long as they touch different keys.
pub struct HandleRegistry<K, V> {
    entries: DashMap<K, V>,
}

impl<K, V> HandleRegistry<K, V>
where
    K: Eq + Hash + fmt::Debug,
{
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Store `value` under `key`, returning what it replaced.
    pub fn retain(&self, key: K, value: V) -> Option<V> {
        trace!(?key, "retaining registry entry");
        self.entries.insert(key, value)
    }

    pub fn with<R>(&self, key: &K, f: impl FnOnce(&V) -> R) -> Option<R> {
        self.entries.get(key).map(|entry| f(entry.value()))
    }

    pub fn with_mut<R>(&self, key: &K, f: impl FnOnce(&mut V) -> R) -> Option<R> {
        self.entries.get_mut(key).map(|mut entry| f(entry.value_mut()))
    }

    pub fn release(&self, key: &K) -> Option<V> {
        trace!(?key, "releasing registry entry");
        self.entries.remove(key).map(|(_, value)| value)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K, V> Default for HandleRegistry<K, V>
where
    K: Eq + Hash + fmt::Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash, V> fmt::Debug for HandleRegistry<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleRegistry")
            .field("entries", &self.entries.len())
            .finish()
    }
}

/// A registered signal handler.
pub struct SignalCallback(Box<dyn Fn(u8) + Send + Sync>);

impl SignalCallback {
    pub fn new(f: impl Fn(u8) + Send + Sync + 'static) -> Self {
        Self(Box::new(f))
    }

    pub fn call(&self, signum: u8) {
        (self.0)(signum)
    }
}

impl fmt::Debug for SignalCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SignalCallback")
    }
}

/// One callback slot per signal number. Slots are only ever overwritten.
pub struct SignalTable {
    slots: Vec<ArcSwapOption<SignalCallback>>,
}

impl SignalTable {
    pub fn new() -> Self {
        Self {
            slots: (0..SIGNAL_TABLE_SIZE).map(|_| ArcSwapOption::empty()).collect(),
        }
    }

    pub fn set(&self, signum: u8, callback: SignalCallback) {
        self.slots[usize::from(signum)].store(Some(Arc::new(callback)));
    }

    pub fn get(&self, signum: u8) -> Option<Arc<SignalCallback>> {
        self.slots[usize::from(signum)].load_full()
    }

    pub fn is_set(&self, signum: u8) -> bool {
        self.slots[usize::from(signum)].load().is_some()
    }
}

impl Default for SignalTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SignalTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let set: Vec<usize> = (0..self.slots.len())
            .filter(|&i| self.slots[i].load().is_some())
            .collect();
        f.debug_struct("SignalTable").field("set", &set).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn entries_live_from_retain_to_release() {
        let registry = HandleRegistry::new();
        assert!(registry.retain(7u32, "env".to_string()).is_none());
        assert_eq!(registry.with(&7, |v| v.clone()), Some("env".to_string()));

        registry.with_mut(&7, |v| v.push('!'));
        assert_eq!(registry.release(&7), Some("env!".to_string()));
        assert!(!registry.contains(&7));
        assert_eq!(registry.with(&7, |v| v.len()), None);
    }

    #[test]
    fn debug_shows_entry_count() {
        let registry = HandleRegistry::new();
        registry.retain("a", 1);
        registry.retain("b", 2);
        assert_eq!(format!("{registry:?}"), "HandleRegistry { entries: 2 }");
    }

    #[test]
    fn workers_on_disjoint_keys_do_not_interfere() {
        let registry = Arc::new(HandleRegistry::new());
        let workers: Vec<_> = (0..8u32)
            .map(|worker| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for i in 0..100 {
                        let key = worker * 1000 + i;
                        registry.retain(key, key * 2);
                        assert_eq!(registry.with(&key, |v| *v), Some(key * 2));
                        if i % 2 == 0 {
                            assert_eq!(registry.release(&key), Some(key * 2));
                        }
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(registry.len(), 8 * 50);
    }

    #[test]
    fn signal_slot_holds_last_callback() {
        let table = SignalTable::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let first = Arc::clone(&hits);
        table.set(255, SignalCallback::new(move |_| {
            first.fetch_add(1, Ordering::SeqCst);
        }));
        let second = Arc::clone(&hits);
        table.set(255, SignalCallback::new(move |_| {
            second.fetch_add(10, Ordering::SeqCst);
        }));

        table.get(255).unwrap().call(255);
        assert_eq!(hits.load(Ordering::SeqCst), 10);
        assert!(table.is_set(255));
        assert!(!table.is_set(0));
    }
}
