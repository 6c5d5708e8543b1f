// SPDX-License-Identifier: Apache-2.0
//! Broadcast buffer pool (spec §4.C).
//!
//! Hands out a round-robin scratch write-target per tick; once the tick
//! driver has encoded into it, the bytes are frozen into a [`Slot`] — a
//! cheaply-`Clone`able, immutable handle shared by reference with every
//! session. Because `Slot` wraps an immutable, reference-counted byte buffer
//! rather than a byte region mutated in place, the "no mutation while any
//! reference is outstanding" invariant from spec §3 holds unconditionally
//! instead of depending on K outpacing write completion (see DESIGN.md).

use axum::extract::ws::Utf8Bytes;

/// A broadcast handle: one tick's encoded state frame, shared by reference.
///
/// Cloning is an atomic refcount bump, not a byte copy.
#[derive(Debug, Clone)]
pub struct Slot(Utf8Bytes);

impl Slot {
    /// Borrow the encoded frame as text.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Consume the slot, yielding the underlying `Utf8Bytes` ready for
    /// `axum::extract::ws::Message::Text`.
    pub fn into_utf8_bytes(self) -> Utf8Bytes {
        self.0
    }
}

/// Round-robin pool of `K` fixed-capacity scratch buffers used as the
/// encoder's write target, one per tick.
pub struct BroadcastPool {
    scratch: Vec<Vec<u8>>,
    next: usize,
}

impl BroadcastPool {
    /// Build a pool of `k` scratch buffers, each pre-allocated to
    /// `slot_capacity` bytes. `k` must be at least 2 (spec §3).
    pub fn new(k: usize, slot_capacity: usize) -> Self {
        assert!(k >= 2, "broadcast pool requires at least 2 slots");
        Self {
            scratch: (0..k).map(|_| vec![0u8; slot_capacity]).collect(),
            next: 0,
        }
    }

    /// Number of scratch buffers owned by the pool.
    pub fn size(&self) -> usize {
        self.scratch.len()
    }

    /// Borrow the next scratch buffer in round-robin order. The caller
    /// writes an encoded frame into its prefix and reports the length back
    /// via [`BroadcastPool::freeze`].
    pub fn next_scratch(&mut self) -> &mut Vec<u8> {
        let idx = self.next;
        self.next = (self.next + 1) % self.scratch.len();
        &mut self.scratch[idx]
    }

    /// Freeze the first `len` bytes of `scratch` (as returned by
    /// [`BroadcastPool::next_scratch`]) into a shareable [`Slot`]. Returns
    /// `None` if the bytes are not valid UTF-8 (cannot happen for frames
    /// produced by `codec::encode_state`, which only ever emits ASCII JSON).
    pub fn freeze(scratch: &[u8], len: usize) -> Option<Slot> {
        let text = std::str::from_utf8(&scratch[..len]).ok()?;
        Some(Slot(Utf8Bytes::from(text.to_owned())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scratch_buffers_rotate_round_robin() {
        let mut pool = BroadcastPool::new(3, 16);
        let ptrs: Vec<*const u8> = (0..6)
            .map(|_| pool.next_scratch().as_ptr())
            .collect();
        assert_eq!(ptrs[0], ptrs[3]);
        assert_eq!(ptrs[1], ptrs[4]);
        assert_eq!(ptrs[2], ptrs[5]);
    }

    #[test]
    fn freeze_produces_independent_cheap_clones() {
        let mut pool = BroadcastPool::new(2, 16);
        let scratch = pool.next_scratch();
        scratch[..5].copy_from_slice(b"hello");
        let slot = BroadcastPool::freeze(&scratch[..], 5).unwrap();
        let clone = slot.clone();
        assert_eq!(slot.as_str(), "hello");
        assert_eq!(clone.as_str(), "hello");
    }

    #[test]
    #[should_panic]
    fn pool_requires_at_least_two_slots() {
        let _ = BroadcastPool::new(1, 16);
    }
}
