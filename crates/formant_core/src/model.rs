//! Observable state container
//!
//! `Model<S>` is the generic basis for form, field, and virtual-field state.
//! Mutations go through an explicit copy-on-write update: the mutator runs on
//! a cloned draft, the draft is diffed against the previous state per declared
//! key, and only keys that actually changed enter the dirty set. Subscribers
//! receive exactly one notification per logical operation; a `batch` scope
//! coalesces any number of mutations into a single notification carrying the
//! union of their dirty keys.

use crate::error::FormError;
use rustc_hash::FxHashSet;
use slotmap::{new_key_type, SlotMap};
use smallvec::SmallVec;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

new_key_type! {
    /// Handle for an installed state subscriber
    pub struct SubscriberId;
}

/// A state shape with declared, diffable keys.
pub trait StateType: Clone + Send + Sync + 'static {
    /// Discriminant for one declared state key
    type Key: Copy + Eq + Hash + Debug + Send + Sync + 'static;

    /// Every declared key, used when dirty tracking is disabled
    const ALL_KEYS: &'static [Self::Key];

    /// Keys whose values differ between `prev` and `next`
    fn diff(prev: &Self, next: &Self) -> SmallVec<[Self::Key; 8]>;
}

/// Set of keys changed since the last notification
pub type DirtySet<S> = FxHashSet<<S as StateType>::Key>;

/// Subscriber callback: receives a state snapshot and the dirty-key set
pub type Subscriber<S> = Arc<dyn Fn(&S, &DirtySet<S>) + Send + Sync>;

struct ModelInner<S: StateType> {
    state: S,
    dirty: DirtySet<S>,
    batch_depth: u32,
    /// Dirty set of the notification currently being dispatched, if any
    publishing: Option<DirtySet<S>>,
}

/// Generic observable-state container with dirty tracking and batched
/// notification.
pub struct Model<S: StateType> {
    inner: Mutex<ModelInner<S>>,
    subscribers: Mutex<SlotMap<SubscriberId, Subscriber<S>>>,
    use_dirty: bool,
}

impl<S: StateType> Model<S> {
    pub fn new(initial: S) -> Self {
        Self::with_dirty_tracking(initial, true)
    }

    /// When `use_dirty` is false, every notification reports all declared
    /// keys as dirty; change detection still gates whether one fires.
    pub fn with_dirty_tracking(initial: S, use_dirty: bool) -> Self {
        Self {
            inner: Mutex::new(ModelInner {
                state: initial,
                dirty: FxHashSet::default(),
                batch_depth: 0,
                publishing: None,
            }),
            subscribers: Mutex::new(SlotMap::with_key()),
            use_dirty,
        }
    }

    /// Read the state through a selector without cloning the whole snapshot
    pub fn get_state<R>(&self, selector: impl FnOnce(&S) -> R) -> R {
        let inner = self.inner.lock().unwrap();
        selector(&inner.state)
    }

    /// Clone the full state snapshot
    pub fn state(&self) -> S {
        self.inner.lock().unwrap().state.clone()
    }

    /// Apply `mutator` to a draft, commit it, and record changed keys in the
    /// dirty set without notifying. Returns the keys changed by this call.
    pub fn apply(&self, mutator: impl FnOnce(&mut S)) -> SmallVec<[S::Key; 8]> {
        let mut inner = self.inner.lock().unwrap();
        let mut draft = inner.state.clone();
        mutator(&mut draft);
        let changed = S::diff(&inner.state, &draft);
        if !changed.is_empty() {
            inner.state = draft;
            inner.dirty.extend(changed.iter().copied());
        }
        changed
    }

    /// Apply `mutator` and notify subscribers unless inside a batch
    pub fn set_state(&self, mutator: impl FnOnce(&mut S)) {
        self.apply(mutator);
        self.notify();
    }

    /// Apply `mutator` without notifying; the changed keys stay dirty and
    /// ride along with the next notification.
    pub fn set_state_silent(&self, mutator: impl FnOnce(&mut S)) {
        self.apply(mutator);
    }

    /// Run `f` inside a batch scope: mutations accumulate dirty keys and
    /// exactly one notification fires when the outermost batch closes.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        self.inner.lock().unwrap().batch_depth += 1;
        let result = f();
        self.inner.lock().unwrap().batch_depth -= 1;
        self.notify();
        result
    }

    /// Fire one notification carrying the accumulated dirty set. No-op when
    /// batching or when nothing changed.
    pub fn notify(&self) {
        let (snapshot, published) = {
            let mut inner = self.inner.lock().unwrap();
            if inner.batch_depth > 0 || inner.dirty.is_empty() {
                return;
            }
            let dirty = std::mem::take(&mut inner.dirty);
            let published = if self.use_dirty {
                dirty
            } else {
                S::ALL_KEYS.iter().copied().collect()
            };
            inner.publishing = Some(published.clone());
            (inner.state.clone(), published)
        };
        let subscribers: Vec<Subscriber<S>> =
            self.subscribers.lock().unwrap().values().cloned().collect();
        for subscriber in subscribers {
            subscriber(&snapshot, &published);
        }
        self.inner.lock().unwrap().publishing = None;
    }

    /// Whether `key` changed in the notification currently being dispatched.
    ///
    /// Only valid synchronously inside a subscriber callback; any other call
    /// site gets `FormError::IllegalDirtyAccess`.
    pub fn has_changed(&self, key: S::Key) -> Result<bool, FormError> {
        let inner = self.inner.lock().unwrap();
        match &inner.publishing {
            Some(published) => Ok(published.contains(&key)),
            None => Err(FormError::IllegalDirtyAccess),
        }
    }

    /// The full dirty set of the in-flight notification
    pub fn get_changed(&self) -> Result<DirtySet<S>, FormError> {
        let inner = self.inner.lock().unwrap();
        inner
            .publishing
            .clone()
            .ok_or(FormError::IllegalDirtyAccess)
    }

    pub fn subscribe(
        &self,
        callback: impl Fn(&S, &DirtySet<S>) + Send + Sync + 'static,
    ) -> SubscriberId {
        self.subscribers.lock().unwrap().insert(Arc::new(callback))
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        self.subscribers.lock().unwrap().remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Debug, Default, PartialEq)]
    struct Counter {
        count: i64,
        label: String,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    enum CounterKey {
        Count,
        Label,
    }

    impl StateType for Counter {
        type Key = CounterKey;
        const ALL_KEYS: &'static [CounterKey] = &[CounterKey::Count, CounterKey::Label];

        fn diff(prev: &Self, next: &Self) -> SmallVec<[CounterKey; 8]> {
            let mut changed = SmallVec::new();
            if prev.count != next.count {
                changed.push(CounterKey::Count);
            }
            if prev.label != next.label {
                changed.push(CounterKey::Label);
            }
            changed
        }
    }

    #[test]
    fn test_set_state_notifies_with_changed_keys() {
        let model = Model::new(Counter::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        model.subscribe(move |state: &Counter, dirty: &DirtySet<Counter>| {
            seen_clone
                .lock()
                .unwrap()
                .push((state.count, dirty.clone()));
        });

        model.set_state(|s| s.count = 1);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, 1);
        assert!(seen[0].1.contains(&CounterKey::Count));
        assert!(!seen[0].1.contains(&CounterKey::Label));
    }

    #[test]
    fn test_no_notification_without_change() {
        let model = Model::new(Counter::default());
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        model.subscribe(move |_, _| {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });

        // Writes the same value: no dirty keys, no notification
        model.set_state(|s| s.count = 0);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_batch_fires_exactly_one_notification_with_union() {
        let model = Model::new(Counter::default());
        let notifications = Arc::new(Mutex::new(Vec::new()));
        let notifications_clone = notifications.clone();
        model.subscribe(move |_, dirty: &DirtySet<Counter>| {
            notifications_clone.lock().unwrap().push(dirty.clone());
        });

        model.batch(|| {
            model.set_state(|s| s.count = 5);
            model.set_state(|s| s.label = "five".into());
        });

        let notifications = notifications.lock().unwrap();
        assert_eq!(notifications.len(), 1);
        assert!(notifications[0].contains(&CounterKey::Count));
        assert!(notifications[0].contains(&CounterKey::Label));
    }

    #[test]
    fn test_silent_changes_ride_next_notification() {
        let model = Model::new(Counter::default());
        let notifications = Arc::new(Mutex::new(Vec::new()));
        let notifications_clone = notifications.clone();
        model.subscribe(move |_, dirty: &DirtySet<Counter>| {
            notifications_clone.lock().unwrap().push(dirty.clone());
        });

        model.set_state_silent(|s| s.label = "quiet".into());
        assert!(notifications.lock().unwrap().is_empty());

        model.set_state(|s| s.count = 2);
        let notifications = notifications.lock().unwrap();
        assert_eq!(notifications.len(), 1);
        assert!(notifications[0].contains(&CounterKey::Label));
        assert!(notifications[0].contains(&CounterKey::Count));
    }

    #[test]
    fn test_has_changed_only_inside_callback() {
        let model = Arc::new(Model::new(Counter::default()));
        assert!(matches!(
            model.has_changed(CounterKey::Count),
            Err(FormError::IllegalDirtyAccess)
        ));

        let model_clone = model.clone();
        let observed = Arc::new(Mutex::new(None));
        let observed_clone = observed.clone();
        model.subscribe(move |_, _| {
            *observed_clone.lock().unwrap() =
                Some(model_clone.has_changed(CounterKey::Count).unwrap());
        });
        model.set_state(|s| s.count = 9);
        assert_eq!(*observed.lock().unwrap(), Some(true));

        // Dirty information is gone once the dispatch ends
        assert!(model.has_changed(CounterKey::Count).is_err());
    }

    #[test]
    fn test_disabled_dirty_tracking_reports_all_keys() {
        let model = Model::with_dirty_tracking(Counter::default(), false);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        model.subscribe(move |_, dirty: &DirtySet<Counter>| {
            seen_clone.lock().unwrap().push(dirty.clone());
        });

        model.set_state(|s| s.count = 1);
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].len(), Counter::ALL_KEYS.len());
    }
}
