//! Shared-state coordination (spec §3, §4.6, §5), ground-truthed against
//! `examples/original_source/include/{CountedRecursiveMutex,SharedAccessor}.h`.
//!
//! Lets several decorators targeting overlapping regions of one underlying
//! register cooperate safely: a reference-counted recursive mutex, a
//! shared user-buffer typed once by the first accessor, and a per-target
//! "instance count" used to recognise the last decorator in a transfer
//! group.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

use crate::error::LogicError;
use crate::register_path::RegisterPath;

/// Stable identifier of a concrete transfer-performing accessor, used as the
/// key to the per-target instance-count map (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferElementID(u64);

impl TransferElementID {
    pub fn new() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        TransferElementID(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for TransferElementID {
    fn default() -> Self {
        Self::new()
    }
}

/// A recursive mutex that counts how many times it is currently held (by any
/// thread that has recursed into it), so callers can distinguish "first
/// decorator to enter a transfer group" from "last decorator to leave it".
/// The count is only meaningful while a guard is held.
#[derive(Debug, Default)]
pub struct CountedRecursiveMutex {
    inner: ReentrantMutex<()>,
    use_count: AtomicUsize,
    finish_count: AtomicUsize,
}

pub struct CountedMutexGuard<'a> {
    _inner: ReentrantMutexGuard<'a, ()>,
    mutex: &'a CountedRecursiveMutex,
    /// `use_count` observed immediately after this guard was created.
    observed_count: usize,
}

impl CountedRecursiveMutex {
    pub fn new() -> Self {
        Self {
            inner: ReentrantMutex::new(()),
            use_count: AtomicUsize::new(0),
            finish_count: AtomicUsize::new(0),
        }
    }

    pub fn lock(&self) -> CountedMutexGuard<'_> {
        let guard = self.inner.lock();
        let observed_count = self.use_count.fetch_add(1, Ordering::AcqRel) + 1;
        CountedMutexGuard {
            _inner: guard,
            mutex: self,
            observed_count,
        }
    }

    /// Use-count right now; only reliable while holding the lock.
    pub fn use_count(&self) -> usize {
        self.use_count.load(Ordering::Acquire)
    }

    /// Mark one sibling decorator entering the read/write phase for this
    /// tick. Returns `true` if it is the first to do so -- the one that
    /// must perform the real transfer on the shared target (spec §4.6).
    /// Pairs with [`Self::finish`]; does not hold the lock across calls, so
    /// it is only safe under the crate's single-thread-per-tick execution
    /// model (a `TransferGroup` runs its phases sequentially on the calling
    /// thread -- concurrent use of one accessor handle from multiple
    /// threads is explicitly out of scope, spec §1).
    pub fn enter(&self) -> bool {
        let _serialize = self.inner.lock();
        self.use_count.fetch_add(1, Ordering::AcqRel) + 1 == 1
    }

    /// Mark one sibling decorator leaving the phase. Returns
    /// `(is_first_finisher, is_last_finisher)`: the first finisher is the
    /// one that must perform the real target's `postRead`/`postWrite`
    /// before anyone else observes its updated version/validity; the last
    /// resets the counters for the next tick.
    pub fn finish(&self) -> (bool, bool) {
        let _serialize = self.inner.lock();
        let total = self.use_count.load(Ordering::Acquire).max(1);
        let finished = self.finish_count.fetch_add(1, Ordering::AcqRel) + 1;
        let is_first = finished == 1;
        let is_last = finished >= total;
        if is_last {
            self.use_count.store(0, Ordering::Release);
            self.finish_count.store(0, Ordering::Release);
        }
        (is_first, is_last)
    }
}

impl CountedMutexGuard<'_> {
    /// True if no other holder was active when this guard was acquired --
    /// i.e. this is the first decorator entering a shared transfer.
    pub fn is_first_holder(&self) -> bool {
        self.observed_count == 1
    }

    /// Current use count as observed right after acquiring.
    pub fn observed_count(&self) -> usize {
        self.observed_count
    }
}

impl Drop for CountedMutexGuard<'_> {
    fn drop(&mut self) {
        self.mutex.use_count.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Per-register shared state: the recursive mutex plus the typed buffer
/// co-owned by every decorator targeting this register. The buffer is typed
/// once (by the first accessor to request it) and any subsequent request
/// with a different `UserType` is rejected with a [`LogicError`].
pub struct SharedTargetState {
    pub mutex: CountedRecursiveMutex,
    buffer: parking_lot::Mutex<Option<Box<dyn Any + Send>>>,
}

impl SharedTargetState {
    fn new() -> Self {
        SharedTargetState {
            mutex: CountedRecursiveMutex::new(),
            buffer: parking_lot::Mutex::new(None),
        }
    }

    /// Access the shared buffer as `Vec<Vec<T>>` (channels x samples),
    /// initialising it from `init` on first use. Fails with
    /// [`LogicError::TypeMismatch`] if a different `T` was already stored.
    pub fn with_buffer<T, R>(
        &self,
        path: &RegisterPath,
        init: impl FnOnce() -> Vec<Vec<T>>,
        f: impl FnOnce(&mut Vec<Vec<T>>) -> R,
    ) -> Result<R, LogicError>
    where
        T: 'static + Send,
    {
        let mut slot = self.buffer.lock();
        if slot.is_none() {
            *slot = Some(Box::new(init()));
        }
        let buf = slot
            .as_mut()
            .unwrap()
            .downcast_mut::<Vec<Vec<T>>>()
            .ok_or_else(|| LogicError::TypeMismatch {
                path: path.to_string(),
            })?;
        Ok(f(buf))
    }
}

/// Key into the shared-state registry: the owning backend's identity plus
/// the register path it targets. The backend identity is an opaque `usize`
/// (typically the backend's address) rather than a trait object pointer, to
/// keep the registry independent of any particular `Backend` trait object
/// layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SharedAccessorKey {
    pub backend_id: usize,
    pub path: RegisterPath,
}

/// Process-wide registry of [`SharedTargetState`]s and transfer-element
/// instance counts (spec §3, §5). Mirrors
/// `ChimeraTK::detail::SharedAccessors`, generalised from a C++ singleton
/// accessed via `getInstance()` to an explicit `&'static` handle obtained
/// through [`shared_accessors`].
#[derive(Default)]
pub struct SharedAccessors {
    targets: parking_lot::Mutex<HashMap<SharedAccessorKey, Arc<SharedTargetState>>>,
    instance_counts: parking_lot::Mutex<HashMap<TransferElementID, usize>>,
}

impl SharedAccessors {
    pub fn get_target_shared_state(&self, key: SharedAccessorKey) -> Arc<SharedTargetState> {
        let mut targets = self.targets.lock();
        targets
            .entry(key)
            .or_insert_with(|| Arc::new(SharedTargetState::new()))
            .clone()
    }

    /// Register a new transfer element, starting its instance count at 1.
    pub fn add_transfer_element(&self, id: TransferElementID) {
        *self.instance_counts.lock().entry(id).or_insert(0) += 1;
    }

    /// Drop one reference to a transfer element; the registry entry is
    /// removed once the count reaches zero.
    pub fn remove_transfer_element(&self, id: TransferElementID) {
        let mut counts = self.instance_counts.lock();
        if let Some(count) = counts.get_mut(&id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                counts.remove(&id);
            }
        }
    }

    /// Fold the instance counts of two transfer elements into one, used
    /// when a `TransferGroup` replaces `old` with `new` (spec §4.10).
    pub fn combine_transfer_shared_states(&self, old: TransferElementID, new: TransferElementID) {
        let mut counts = self.instance_counts.lock();
        let old_count = counts.remove(&old).unwrap_or(0);
        *counts.entry(new).or_insert(0) += old_count;
    }

    pub fn instance_count(&self, id: TransferElementID) -> usize {
        *self.instance_counts.lock().get(&id).unwrap_or(&0)
    }

    /// Drop the entire shared state for `key`; used when the last owning
    /// decorator is dropped. No-op if still referenced elsewhere.
    pub fn release_if_unused(&self, key: &SharedAccessorKey) {
        let mut targets = self.targets.lock();
        if let Some(state) = targets.get(key) {
            if Arc::strong_count(state) <= 1 {
                targets.remove(key);
            }
        }
    }
}

static REGISTRY: once_cell::sync::Lazy<SharedAccessors> =
    once_cell::sync::Lazy::new(SharedAccessors::default);

/// The process-wide [`SharedAccessors`] registry.
pub fn shared_accessors() -> &'static SharedAccessors {
    &REGISTRY
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_is_typed_once_and_rejects_mismatch() {
        let state = SharedTargetState::new();
        let path = RegisterPath::new("A");
        state
            .with_buffer::<i32, _>(&path, || vec![vec![0; 4]], |buf| buf[0][0] = 7)
            .unwrap();
        let result = state.with_buffer::<f64, _>(&path, || vec![vec![0.0; 4]], |_| ());
        assert!(result.is_err());
    }

    #[test]
    fn counted_mutex_tracks_first_and_last_holder() {
        let m = CountedRecursiveMutex::new();
        let g1 = m.lock();
        assert!(g1.is_first_holder());
        assert_eq!(m.use_count(), 1);
        drop(g1);
        assert_eq!(m.use_count(), 0);
    }

    #[test]
    fn enter_and_finish_identify_first_and_last_sibling() {
        let m = CountedRecursiveMutex::new();
        assert!(m.enter());
        assert!(!m.enter());
        assert!(!m.enter());
        assert_eq!(m.finish(), (true, false));
        assert_eq!(m.finish(), (false, false));
        assert_eq!(m.finish(), (false, true));
    }

    #[test]
    fn instance_counts_combine_on_replacement() {
        let registry = SharedAccessors::default();
        let a = TransferElementID::new();
        let b = TransferElementID::new();
        registry.add_transfer_element(a);
        registry.add_transfer_element(a);
        registry.add_transfer_element(b);
        registry.combine_transfer_shared_states(a, b);
        assert_eq!(registry.instance_count(a), 0);
        assert_eq!(registry.instance_count(b), 3);
    }
}
