//! Tracks which request each display target is currently waiting on.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::trace;

use crate::domain::entities::{CacheKey, TargetId};

/// Association of a target with the key it was last asked to show.
///
/// Generations increase strictly in binding order, so a re-request for the
/// same key still supersedes the earlier one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    target: TargetId,
    key: CacheKey,
    generation: u64,
}

impl Binding {
    /// Bound target.
    #[must_use]
    pub const fn target(&self) -> &TargetId {
        &self.target
    }

    /// Requested key.
    #[must_use]
    pub const fn key(&self) -> &CacheKey {
        &self.key
    }
}

#[derive(Default)]
struct Table {
    current: HashMap<TargetId, Binding>,
    next_generation: u64,
}

/// Binding table keyed by target.
#[derive(Default)]
pub struct BindingTracker {
    table: Mutex<Table>,
}

impl BindingTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `target` now wants `key`, superseding any prior binding.
    pub fn bind(&self, target: TargetId, key: CacheKey) -> Binding {
        let mut table = self.table.lock();
        table.next_generation += 1;
        let binding = Binding {
            target: target.clone(),
            key,
            generation: table.next_generation,
        };
        if let Some(previous) = table.current.insert(target, binding.clone()) {
            trace!(target_id = %binding.target, stale = %previous.key, key = %binding.key, "Superseded binding");
        }
        binding
    }

    /// Returns whether `target` is currently bound to `key`.
    #[must_use]
    pub fn is_current_binding(&self, target: &TargetId, key: &CacheKey) -> bool {
        self.table
            .lock()
            .current
            .get(target)
            .is_some_and(|b| &b.key == key)
    }

    /// Returns whether `binding` has not been superseded or released.
    #[must_use]
    pub fn is_current(&self, binding: &Binding) -> bool {
        self.table.lock().current.get(&binding.target) == Some(binding)
    }

    /// Runs `deliver` while holding the table lock, only if `binding` is still
    /// current. Holding the lock orders deliveries with later `bind` calls.
    pub fn deliver_if_current(&self, binding: &Binding, deliver: impl FnOnce()) -> bool {
        let table = self.table.lock();
        if table.current.get(&binding.target) != Some(binding) {
            trace!(target_id = %binding.target, key = %binding.key, "Dropping stale delivery");
            return false;
        }
        deliver();
        true
    }

    /// Forgets the binding of a destroyed target.
    pub fn release(&self, target: &TargetId) -> Option<Binding> {
        self.table.lock().current.remove(target)
    }

    /// Number of bound targets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.lock().current.len()
    }

    /// Returns true if no target is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
