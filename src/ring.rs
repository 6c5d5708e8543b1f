// SPDX-License-Identifier: Apache-2.0
//! Fixed-capacity append-only history of telemetry snapshots.
//!
//! Touched only by the tick driver thread; no internal synchronization.
//! Capacity is fixed at construction (`--history-capacity`), not at compile
//! time, so it can be sized from runtime configuration.

use crate::payload::StatePayload;

/// Bounded history of the last `capacity` [`StatePayload`]s in chronological
/// order.
///
/// `push` overwrites the oldest element once full. Indexing is stable
/// regardless of how many items have been overwritten: `at(0)` is always the
/// oldest retained entry and `at(size() - 1)` is always the newest.
pub struct HistoryRing {
    buf: Box<[StatePayload]>,
    capacity: usize,
    /// Index the next `push` will write to.
    head: usize,
    /// Number of valid entries, saturating at `capacity`.
    len: usize,
}

impl HistoryRing {
    /// Build an empty ring holding up to `capacity` entries. `capacity` must
    /// be at least 1.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "history ring requires capacity >= 1");
        Self {
            buf: vec![StatePayload::default(); capacity].into_boxed_slice(),
            capacity,
            head: 0,
            len: 0,
        }
    }

    /// Number of valid entries currently retained, saturating at `capacity()`.
    pub fn size(&self) -> usize {
        self.len
    }

    /// Capacity of the ring.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a new snapshot, overwriting the oldest entry once full.
    pub fn push(&mut self, payload: StatePayload) {
        self.buf[self.head] = payload;
        self.head = (self.head + 1) % self.capacity;
        if self.len < self.capacity {
            self.len += 1;
        }
    }

    /// The oldest-retained-first view: `at(0)` is the oldest, `at(size() - 1)`
    /// is the newest. Returns `None` if `i >= size()`.
    pub fn at(&self, i: usize) -> Option<&StatePayload> {
        if i >= self.len {
            return None;
        }
        let start = if self.len < self.capacity { 0 } else { self.head };
        Some(&self.buf[(start + i) % self.capacity])
    }

    /// The most recently pushed entry, or `None` if empty.
    pub fn latest(&self) -> Option<&StatePayload> {
        self.at(self.len.checked_sub(1)?)
    }

    /// The oldest retained entry, or `None` if empty.
    pub fn oldest(&self) -> Option<&StatePayload> {
        self.at(0)
    }

    /// Discard all entries without releasing the backing allocation.
    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }
}
