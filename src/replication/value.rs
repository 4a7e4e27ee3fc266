//! Replicated Value Primitive
//!
//! A single versioned field owned by one authority and mirrored read-only
//! everywhere else. Write access is a capability, not a runtime check: the
//! only mutable owner of any `ReplicatedValue` is the `AuthorityContext`
//! inside the authority task, and the observer-side mirror
//! ([`ReplicaView`](crate::replication::session::ReplicaView)) exposes no
//! write API at all. A non-authority endpoint cannot express an
//! unauthorized write in the type system.

use serde::{Deserialize, Serialize};

/// A versioned, authority-owned field.
///
/// Every committed write bumps the version monotonically, so observers can
/// discard duplicated or re-delivered updates. Readers only ever see values
/// that were actually committed; there is no partial write to observe.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReplicatedValue<T> {
    value: T,
    version: u64,
    dirty: bool,
}

impl<T> ReplicatedValue<T> {
    /// Create with an initial value, committed as version 0 and not dirty.
    ///
    /// The initial value reaches observers through the join snapshot, not
    /// through a change broadcast.
    pub fn new(value: T) -> Self {
        Self { value, version: 0, dirty: false }
    }

    /// Last committed value.
    pub fn read(&self) -> &T {
        &self.value
    }

    /// Version of the last committed write.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Does this field have a committed write not yet broadcast?
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Commit a new value (authority only, by construction).
    pub fn write(&mut self, value: T) {
        self.value = value;
        self.version += 1;
        self.dirty = true;
    }

    /// Read-modify-write commit (authority only, by construction).
    pub fn update(&mut self, f: impl FnOnce(&T) -> T) {
        let next = f(&self.value);
        self.write(next);
    }

    /// Re-mark the committed value for broadcast without a new commit.
    ///
    /// Used when a broadcast failed to reach a subscriber: the next flush
    /// re-sends the same `(version, value)`, and observers that already saw
    /// it drop the duplicate by version.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }
}

impl<T: Clone> ReplicatedValue<T> {
    /// Drain the pending broadcast, if any: returns the committed
    /// `(version, value)` and clears the dirty flag.
    pub fn take_dirty(&mut self) -> Option<(u64, T)> {
        if self.dirty {
            self.dirty = false;
            Some((self.version, self.value.clone()))
        } else {
            None
        }
    }

    /// Snapshot the current `(version, value)` regardless of dirtiness.
    ///
    /// Used to synchronize late joiners to present state.
    pub fn snapshot(&self) -> (u64, T) {
        (self.version, self.value.clone())
    }
}

impl<T: Default> Default for ReplicatedValue<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
