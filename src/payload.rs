// SPDX-License-Identifier: Apache-2.0
//! The atomic unit of telemetry and a wait-free publish/load cell for it.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};

/// One tick's worth of crank-slider telemetry.
///
/// Copy-trivial and fixed-width so it can be published across threads without
/// allocation. `timestamp_ms` is sourced from a steady monotonic clock with an
/// arbitrary epoch — it is **not** comparable across hosts and clients must
/// treat it as opaque modulo their own calibration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatePayload {
    /// Crankshaft speed in rpm, clamped to `[0, 8000]`.
    pub rpm: f64,
    /// Crank angle in radians, always in `[0, 2*PI)`.
    pub angle_rad: f64,
    /// Centrifugal stress in pascals.
    pub stress_pa: f64,
    /// `stress_pa` normalized to the value at `rpm = 8000`, clamped to `[0, 1]`.
    pub stress_factor: f64,
    /// Net piston (wrist-pin) force, newtons.
    pub piston_force_n: f64,
    /// Connecting rod axial force, newtons.
    pub rod_force_n: f64,
    /// Tangential (crank-pin) force component, newtons.
    pub tangential_force_n: f64,
    /// Crank torque, newton-metres.
    pub torque_nm: f64,
    /// Side thrust on the cylinder wall, newtons.
    pub side_thrust_n: f64,
    /// Monotonic millisecond counter since an arbitrary process-start epoch.
    pub timestamp_ms: u64,
}

impl Default for StatePayload {
    fn default() -> Self {
        Self {
            rpm: 0.0,
            angle_rad: 0.0,
            stress_pa: 0.0,
            stress_factor: 0.0,
            piston_force_n: 0.0,
            rod_force_n: 0.0,
            tangential_force_n: 0.0,
            torque_nm: 0.0,
            side_thrust_n: 0.0,
            timestamp_ms: 0,
        }
    }
}

/// Wait-free single-producer/multi-consumer publish cell for a `Copy` value
/// wider than a single atomic word.
///
/// The writer increments an odd sequence counter, writes the payload, then
/// increments the counter to even ("commit"). Readers load the counter, copy
/// the payload, then reload the counter; if either load is odd or the two
/// loads disagree, the read was torn and must retry. This is the
/// sequence-counter pattern spec design notes call for in place of a lock
/// (see the `ShmSlot` grounding in DESIGN.md).
pub struct SeqLock<T: Copy> {
    seq: AtomicU64,
    value: UnsafeCell<T>,
}

// SAFETY: all access to `value` is gated by the `seq` handshake below: writers
// hold exclusive access by construction (single producer), and readers never
// trust a payload read across an odd or changing sequence number.
unsafe impl<T: Copy> Sync for SeqLock<T> {}

impl<T: Copy> SeqLock<T> {
    /// Construct a new cell with an initial value. The initial sequence is
    /// even (committed) so the first `load()` never spins.
    pub fn new(initial: T) -> Self {
        Self {
            seq: AtomicU64::new(0),
            value: UnsafeCell::new(initial),
        }
    }

    /// Publish a new value. Must only be called from the single writer
    /// thread; concurrent calls from multiple writers are not supported.
    pub fn store(&self, value: T) {
        let seq = self.seq.load(Ordering::Relaxed);
        self.seq.store(seq.wrapping_add(1), Ordering::Relaxed);
        // SAFETY: we just made the sequence odd, so any concurrent reader
        // will detect the in-progress write and retry rather than observe
        // this write.
        unsafe {
            *self.value.get() = value;
        }
        self.seq.store(seq.wrapping_add(2), Ordering::Release);
    }

    /// Load the most recently published value, retrying on a torn read.
    pub fn load(&self) -> T {
        loop {
            let before = self.seq.load(Ordering::Acquire);
            if before & 1 == 1 {
                std::hint::spin_loop();
                continue;
            }
            // SAFETY: `before` was even, meaning no write was in progress at
            // the time of this load; we validate that no write completed
            // during the copy by re-checking the sequence below.
            let value = unsafe { *self.value.get() };
            let after = self.seq.load(Ordering::Acquire);
            if after == before {
                return value;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seqlock_round_trips_single_threaded() {
        let cell = SeqLock::new(StatePayload::default());
        let mut p = StatePayload::default();
        p.rpm = 1234.5;
        p.timestamp_ms = 99;
        cell.store(p);
        let got = cell.load();
        assert_eq!(got.rpm, 1234.5);
        assert_eq!(got.timestamp_ms, 99);
    }

    #[test]
    fn seqlock_visible_across_threads() {
        use std::sync::Arc;
        let cell = Arc::new(SeqLock::new(StatePayload::default()));
        let writer_cell = cell.clone();
        let handle = std::thread::spawn(move || {
            for i in 0..1000u64 {
                let mut p = StatePayload::default();
                p.timestamp_ms = i;
                p.rpm = i as f64;
                writer_cell.store(p);
            }
        });
        handle.join().unwrap();
        let got = cell.load();
        assert_eq!(got.timestamp_ms, 999);
        assert_eq!(got.rpm, 999.0);
    }
}
