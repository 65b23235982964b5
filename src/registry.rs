//! Generic indexed container with deferred mutation.
//!
//! [`SharedResource<K, T>`] is read frequently by one thread (the scheduler,
//! via [`SharedResource::exec_one`]/[`SharedResource::exec_all`]) and
//! mutated by many threads (Api handlers, the directory watcher). Mutations
//! requested while a pass is in progress are queued and applied atomically
//! at [`SharedResource::end_pass`], never blocking the caller on the pass
//! itself; see `DESIGN.md` for why a lock isn't held across module
//! execution.

use rustc_hash::{FxHashMap, FxHashSet};
use std::hash::Hash;

use crate::errors::{Result, TvError};

struct State<K, T> {
    items: FxHashMap<K, T>,
    pending_add: Vec<(K, T)>,
    /// Removals requested from outside the current pass (Api callers).
    pending_remove: Vec<K>,
    /// Removals triggered by a tag (`ExecAndRemove`) or self-removal
    /// (`Removable`) from within the pass itself; drained after
    /// `pending_remove` so externally-requested removals always win ties.
    pending_self_remove: Vec<K>,
    queued_ids: FxHashSet<K>,
    iterating: bool,
}

impl<K: Eq + Hash + Copy, T> Default for State<K, T> {
    fn default() -> Self {
        Self {
            items: FxHashMap::default(),
            pending_add: Vec::new(),
            pending_remove: Vec::new(),
            pending_self_remove: Vec::new(),
            queued_ids: FxHashSet::default(),
            iterating: false,
        }
    }
}

pub struct SharedResource<K, T> {
    state: parking_lot::Mutex<State<K, T>>,
}

impl<K: Eq + Hash + Copy, T> Default for SharedResource<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Copy + std::fmt::Debug, T> SharedResource<K, T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: parking_lot::Mutex::new(State::default()),
        }
    }

    /// Constructs a new element under `id`. If a pass is in progress the
    /// construction is enqueued and becomes visible on the very next pass;
    /// otherwise it takes effect immediately.
    pub fn allocate(&self, id: K, value: T) -> Result<()> {
        let mut state = self.state.lock();
        if state.items.contains_key(&id) || state.queued_ids.contains(&id) {
            return Err(TvError::DuplicateId(0).retag(id));
        }
        state.queued_ids.insert(id);
        if state.iterating {
            state.pending_add.push((id, value));
        } else {
            state.queued_ids.remove(&id);
            state.items.insert(id, value);
        }
        Ok(())
    }

    /// Requests removal of `id`, called by an external Api handler. Deferred
    /// the same way as `allocate`; the element is destroyed once the
    /// current pass (if any) completes.
    pub fn remove(&self, id: K) -> Result<()> {
        let mut state = self.state.lock();
        self.request_remove(&mut state, id, false)
    }

    /// Requests removal of `id` from within its own pass visit (tag-driven
    /// `ExecAndRemove`, or a `Removable`-tagged self-removal). Applied after
    /// externally-requested removals in the same pass.
    pub fn remove_self(&self, id: K) -> Result<()> {
        let mut state = self.state.lock();
        self.request_remove(&mut state, id, true)
    }

    fn request_remove(&self, state: &mut State<K, T>, id: K, is_self: bool) -> Result<()> {
        let live = state.items.contains_key(&id) || state.pending_add.iter().any(|(k, _)| *k == id);
        let already_queued = state.pending_remove.contains(&id) || state.pending_self_remove.contains(&id);
        if !live || already_queued {
            return Err(TvError::UnconfiguredId(0).retag(id));
        }
        if state.iterating {
            if is_self {
                state.pending_self_remove.push(id);
            } else {
                state.pending_remove.push(id);
            }
        } else {
            state.items.remove(&id);
        }
        Ok(())
    }

    /// True if `id` currently names a live element (not one only pending
    /// addition or already marked for removal).
    #[must_use]
    pub fn managed(&self, id: K) -> bool {
        let state = self.state.lock();
        state.items.contains_key(&id) && !state.pending_remove.contains(&id) && !state.pending_self_remove.contains(&id)
    }

    /// Read-only access to a single live element.
    pub fn read<R>(&self, id: K, f: impl FnOnce(&T) -> R) -> Option<R> {
        let state = self.state.lock();
        state.items.get(&id).map(f)
    }

    /// Read-only access to a single live element, mutably.
    pub fn write<R>(&self, id: K, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut state = self.state.lock();
        state.items.get_mut(&id).map(f)
    }

    #[must_use]
    pub fn count_if(&self, pred: impl Fn(&T) -> bool) -> usize {
        let state = self.state.lock();
        state.items.values().filter(|v| pred(v)).count()
    }

    pub fn foreach(&self, mut f: impl FnMut(K, &T)) {
        let state = self.state.lock();
        for (id, item) in &state.items {
            f(*id, item);
        }
    }

    /// Empties every live element out, discarding any pending mutation, and
    /// hands them back for the caller to dispose of. Used only at shutdown,
    /// never mid-pass.
    pub fn drain(&self) -> Vec<(K, T)> {
        let mut state = self.state.lock();
        state.pending_add.clear();
        state.pending_remove.clear();
        state.pending_self_remove.clear();
        state.queued_ids.clear();
        state.items.drain().collect()
    }

    /// Marks a pass as in progress. Must be paired with [`Self::end_pass`].
    pub fn begin_pass(&self) {
        self.state.lock().iterating = true;
    }

    /// Drains pending mutations in order: externally-requested removals,
    /// then additions, then tag-driven self-removals.
    pub fn end_pass(&self) {
        let mut state = self.state.lock();
        for id in std::mem::take(&mut state.pending_remove) {
            state.items.remove(&id);
            state.queued_ids.remove(&id);
        }
        for (id, value) in std::mem::take(&mut state.pending_add) {
            state.items.insert(id, value);
            state.queued_ids.remove(&id);
        }
        for id in std::mem::take(&mut state.pending_self_remove) {
            state.items.remove(&id);
            state.queued_ids.remove(&id);
        }
        state.iterating = false;
    }

    /// Invokes `f` on the element named by `id`, if it is currently live.
    /// Assumes a pass has already been started with [`Self::begin_pass`].
    pub fn exec_one(&self, id: K, f: impl FnOnce(&mut T)) -> Result<()> {
        let mut state = self.state.lock();
        debug_assert!(state.iterating, "exec_one called outside a pass");
        match state.items.get_mut(&id) {
            Some(item) => {
                f(item);
                Ok(())
            }
            None => Err(TvError::UnconfiguredId(0).retag(id)),
        }
    }

    /// Runs one full pass over every element live at the start of the pass,
    /// in arbitrary order, then applies deferred mutations.
    pub fn exec_all(&self, mut f: impl FnMut(K, &mut T)) {
        self.begin_pass();
        let ids: Vec<K> = {
            let state = self.state.lock();
            state.items.keys().copied().collect()
        };
        for id in ids {
            let _ = self.exec_one(id, |item| f(id, item));
        }
        self.end_pass();
    }
}

// `TvError::DuplicateId`/`UnconfiguredId` carry an `i32`; `SharedResource` is
// generic over any `Copy + Debug` key, so this helper renders the key into
// the error without requiring `K: Into<i32>`.
trait RetagWithKey<K> {
    fn retag(self, id: K) -> TvError;
}

impl<K: std::fmt::Debug> RetagWithKey<K> for TvError {
    fn retag(self, id: K) -> TvError {
        match self {
            TvError::DuplicateId(_) => {
                TvError::InvalidConfiguration(format!("duplicate id: {id:?}"))
            }
            TvError::UnconfiguredId(_) => {
                TvError::InvalidConfiguration(format!("unconfigured id: {id:?}"))
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::SharedResource;

    #[test]
    fn allocate_is_immediate_outside_a_pass() {
        let registry: SharedResource<i32, &'static str> = SharedResource::new();
        registry.allocate(1, "a").unwrap();
        assert!(registry.managed(1));
    }

    #[test]
    fn duplicate_allocate_fails() {
        let registry: SharedResource<i32, &'static str> = SharedResource::new();
        registry.allocate(1, "a").unwrap();
        assert!(registry.allocate(1, "b").is_err());
    }

    #[test]
    fn allocate_during_a_pass_is_invisible_until_end_pass() {
        let registry: SharedResource<i32, &'static str> = SharedResource::new();
        registry.begin_pass();
        registry.allocate(2, "b").unwrap();
        assert!(!registry.managed(2), "must not be visible mid-pass");
        registry.end_pass();
        assert!(registry.managed(2), "must be visible after end_pass");
    }

    #[test]
    fn remove_during_a_pass_executes_once_more_then_disappears() {
        let registry: SharedResource<i32, i32> = SharedResource::new();
        registry.allocate(1, 0).unwrap();

        registry.begin_pass();
        registry.exec_one(1, |v| *v += 1).unwrap();
        registry.remove(1).unwrap();
        // still present for the remainder of this pass
        registry.exec_one(1, |v| *v += 1).unwrap();
        registry.end_pass();

        assert!(!registry.managed(1));
    }

    #[test]
    fn double_remove_is_unconfigured_id() {
        let registry: SharedResource<i32, i32> = SharedResource::new();
        registry.allocate(1, 0).unwrap();
        registry.remove(1).unwrap();
        assert!(registry.remove(1).is_err());
    }

    #[test]
    fn exec_all_visits_every_live_element_exactly_once() {
        let registry: SharedResource<i32, i32> = SharedResource::new();
        for id in 0..5 {
            registry.allocate(id, 0).unwrap();
        }
        let mut visits = 0usize;
        registry.exec_all(|_, v| {
            *v += 1;
            visits += 1;
        });
        assert_eq!(visits, 5);
        registry.foreach(|_, v| assert_eq!(*v, 1));
    }

    #[test]
    fn explicit_removal_precedes_self_removal_in_drain_order() {
        let registry: SharedResource<i32, Vec<i32>> = SharedResource::new();
        registry.allocate(1, Vec::new()).unwrap();
        registry.allocate(2, Vec::new()).unwrap();

        registry.begin_pass();
        registry.remove(1).unwrap();
        registry.remove_self(2).unwrap();
        registry.end_pass();

        assert!(!registry.managed(1));
        assert!(!registry.managed(2));
    }
}
