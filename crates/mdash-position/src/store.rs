//! Observable in-memory store shared by both registries.
//!
//! Holds the entity list plus `loading`/`error` flags behind a single
//! `RwLock`, so readers always see a consistent triple. Every mutation
//! bumps `version` and notifies subscribers with a fresh snapshot after the
//! lock is released; callbacks may read the store again without deadlock.
//!
//! The store also carries the sync epoch. A sync instance registers itself
//! with [`Store::begin_epoch`] and applies results only through the
//! `*_if_current` methods, which check the epoch under the write lock.

use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

/// Point-in-time copy of a store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreSnapshot<T> {
    pub items: Vec<T>,
    pub loading: bool,
    pub error: Option<String>,
    /// Incremented on every mutation.
    pub version: u64,
}

type Callback<T> = Arc<dyn Fn(&StoreSnapshot<T>) + Send + Sync>;

struct Subscribers<T> {
    next_id: u64,
    callbacks: Vec<(u64, Callback<T>)>,
}

struct State<T> {
    items: Vec<T>,
    loading: bool,
    error: Option<String>,
    version: u64,
    epoch: u64,
}

impl<T: Clone> State<T> {
    fn snapshot(&self) -> StoreSnapshot<T> {
        StoreSnapshot {
            items: self.items.clone(),
            loading: self.loading,
            error: self.error.clone(),
            version: self.version,
        }
    }
}

/// Handle returned by [`Store::subscribe`]. Dropping it detaches the
/// callback.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    detach: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.detach_now();
    }

    fn detach_now(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("attached", &self.detach.is_some())
            .finish()
    }
}

pub struct Store<T> {
    state: RwLock<State<T>>,
    subscribers: Arc<Mutex<Subscribers<T>>>,
}

impl<T: Clone + Send + Sync + 'static> Default for Store<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + 'static> Store<T> {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State {
                items: Vec::new(),
                loading: false,
                error: None,
                version: 0,
                epoch: 0,
            }),
            subscribers: Arc::new(Mutex::new(Subscribers {
                next_id: 0,
                callbacks: Vec::new(),
            })),
        }
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn snapshot(&self) -> StoreSnapshot<T> {
        self.state.read().snapshot()
    }

    /// Run `f` against the current items under the read lock.
    pub fn read<R>(&self, f: impl FnOnce(&[T]) -> R) -> R {
        f(&self.state.read().items)
    }

    pub fn is_loading(&self) -> bool {
        self.state.read().loading
    }

    pub fn error(&self) -> Option<String> {
        self.state.read().error.clone()
    }

    pub fn len(&self) -> usize {
        self.state.read().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().items.is_empty()
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Mutate the items. Notifies subscribers afterwards.
    pub fn mutate<R>(&self, f: impl FnOnce(&mut Vec<T>) -> R) -> R {
        let (result, snapshot) = {
            let mut state = self.state.write();
            let result = f(&mut state.items);
            state.version += 1;
            (result, state.snapshot())
        };
        self.notify(&snapshot);
        result
    }

    /// Replace all items, clearing `loading` and `error`.
    pub fn replace_all(&self, items: Vec<T>) {
        self.write_state(|state| {
            state.items = items;
            state.loading = false;
            state.error = None;
        });
    }

    pub fn set_loading(&self, loading: bool) {
        self.write_state(|state| state.loading = loading);
    }

    /// Set or clear the error. Setting an error also clears `loading`.
    pub fn set_error(&self, error: Option<String>) {
        self.write_state(|state| {
            if error.is_some() {
                state.loading = false;
            }
            state.error = error;
        });
    }

    /// Drop all items and reset flags.
    pub fn clear(&self) {
        self.write_state(|state| {
            state.items.clear();
            state.loading = false;
            state.error = None;
        });
    }

    fn write_state(&self, f: impl FnOnce(&mut State<T>)) {
        let snapshot = {
            let mut state = self.state.write();
            f(&mut state);
            state.version += 1;
            state.snapshot()
        };
        self.notify(&snapshot);
    }

    // ------------------------------------------------------------------
    // Epochs
    // ------------------------------------------------------------------

    /// Start a new sync epoch; results tagged with older epochs are
    /// rejected from now on.
    pub fn begin_epoch(&self) -> u64 {
        let mut state = self.state.write();
        state.epoch += 1;
        state.epoch
    }

    pub fn current_epoch(&self) -> u64 {
        self.state.read().epoch
    }

    /// Apply `f` only if `epoch` is still current. Returns whether it ran.
    pub fn apply_if_current(&self, epoch: u64, f: impl FnOnce(&mut Vec<T>)) -> bool {
        self.write_if_current(epoch, |state| {
            f(&mut state.items);
            state.loading = false;
            state.error = None;
        })
    }

    pub fn set_loading_if_current(&self, epoch: u64, loading: bool) -> bool {
        self.write_if_current(epoch, |state| state.loading = loading)
    }

    /// Record a failure for `epoch`, leaving the items untouched.
    pub fn set_error_if_current(&self, epoch: u64, error: String) -> bool {
        self.write_if_current(epoch, |state| {
            state.loading = false;
            state.error = Some(error);
        })
    }

    fn write_if_current(&self, epoch: u64, f: impl FnOnce(&mut State<T>)) -> bool {
        let snapshot = {
            let mut state = self.state.write();
            if state.epoch != epoch {
                return false;
            }
            f(&mut state);
            state.version += 1;
            state.snapshot()
        };
        self.notify(&snapshot);
        true
    }

    // ------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------

    /// Register a callback invoked with a snapshot after every mutation.
    pub fn subscribe(
        &self,
        callback: impl Fn(&StoreSnapshot<T>) + Send + Sync + 'static,
    ) -> Subscription {
        let id = {
            let mut subs = self.subscribers.lock();
            let id = subs.next_id;
            subs.next_id += 1;
            subs.callbacks.push((id, Arc::new(callback)));
            id
        };

        let weak: Weak<Mutex<Subscribers<T>>> = Arc::downgrade(&self.subscribers);
        Subscription {
            detach: Some(Box::new(move || {
                if let Some(subs) = weak.upgrade() {
                    subs.lock().callbacks.retain(|(sid, _)| *sid != id);
                }
            })),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().callbacks.len()
    }

    fn notify(&self, snapshot: &StoreSnapshot<T>) {
        // Clone the list so callbacks run without the mutex held.
        let callbacks: Vec<Callback<T>> = self
            .subscribers
            .lock()
            .callbacks
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for cb in callbacks {
            cb(snapshot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_replace_all_clears_flags() {
        let store: Store<u32> = Store::new();
        store.set_loading(true);
        store.set_error(Some("boom".to_string()));
        assert!(!store.is_loading());

        store.set_loading(true);
        store.replace_all(vec![1, 2, 3]);

        let snap = store.snapshot();
        assert_eq!(snap.items, vec![1, 2, 3]);
        assert!(!snap.loading);
        assert!(snap.error.is_none());
    }

    #[test]
    fn test_subscribe_and_unsubscribe() {
        let store: Store<u32> = Store::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        let sub = store.subscribe(move |snap| {
            counter.fetch_add(1, Ordering::SeqCst);
            assert!(snap.version > 0);
        });

        store.replace_all(vec![1]);
        store.mutate(|items| items.push(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        sub.unsubscribe();
        assert_eq!(store.subscriber_count(), 0);
        store.clear();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_drop_subscription_detaches() {
        let store: Store<u32> = Store::new();
        {
            let _sub = store.subscribe(|_| {});
            assert_eq!(store.subscriber_count(), 1);
        }
        assert_eq!(store.subscriber_count(), 0);
    }

    #[test]
    fn test_callback_can_read_store() {
        let store: Arc<Store<u32>> = Arc::new(Store::new());
        let seen = Arc::new(AtomicUsize::new(0));

        let reader = Arc::clone(&store);
        let seen_cb = Arc::clone(&seen);
        let _sub = store.subscribe(move |_| {
            seen_cb.store(reader.len(), Ordering::SeqCst);
        });

        store.replace_all(vec![7, 8]);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_stale_epoch_is_rejected() {
        let store: Store<u32> = Store::new();
        let old = store.begin_epoch();
        let new = store.begin_epoch();

        assert!(!store.apply_if_current(old, |items| items.push(1)));
        assert!(!store.set_error_if_current(old, "late".to_string()));
        assert!(store.is_empty());
        assert!(store.error().is_none());

        assert!(store.apply_if_current(new, |items| items.push(2)));
        assert_eq!(store.snapshot().items, vec![2]);
    }

    #[test]
    fn test_error_preserves_items() {
        let store: Store<u32> = Store::new();
        let epoch = store.begin_epoch();
        store.apply_if_current(epoch, |items| *items = vec![5, 6]);
        store.set_loading_if_current(epoch, true);
        store.set_error_if_current(epoch, "HTTP 500".to_string());

        let snap = store.snapshot();
        assert_eq!(snap.items, vec![5, 6]);
        assert_eq!(snap.error.as_deref(), Some("HTTP 500"));
        assert!(!snap.loading);
    }
}
