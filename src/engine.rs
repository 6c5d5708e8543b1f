// SPDX-License-Identifier: Apache-2.0
//! Deterministic 100 Hz crank-slider physics engine (spec §4.D).

use crate::payload::{SeqLock, StatePayload};
use crate::ring::HistoryRing;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Fixed integration timestep, seconds. 100 Hz.
pub const DT_SECS: f64 = 0.01;
/// RPM response time constant, seconds (spec §4.D step 2).
const TAU_SECS: f64 = 0.35;
/// Minimum accepted rpm target.
pub const RPM_MIN: f64 = 0.0;
/// Maximum accepted rpm target.
pub const RPM_MAX: f64 = 8000.0;

/// Reciprocating mass, kg (spec §4.D step 4).
const CENTRIFUGAL_MASS_KG: f64 = 2.5;
/// Crank radius used for the centrifugal stress term, metres.
const CENTRIFUGAL_RADIUS_M: f64 = 0.08;
/// Cross-sectional area, square metres.
const CROSS_SECTION_M2: f64 = 4e-4;

/// Crank throw, metres (spec §4.D step 5).
const CRANK_THROW_M: f64 = 0.04;
/// Connecting rod length, metres.
const ROD_LENGTH_M: f64 = 0.128;
/// `lambda = R / L`, the glossary's crank-to-rod ratio.
const LAMBDA: f64 = CRANK_THROW_M / ROD_LENGTH_M;
/// Reciprocating piston mass, kg.
const PISTON_MASS_KG: f64 = 0.4;
/// Below this `cos(phi)`, rod/side-thrust forces are defined as zero rather
/// than dividing by a near-zero cosine (spec §4.D step 5).
const COS_PHI_EPSILON: f64 = 1e-4;

const TWO_PI: f64 = std::f64::consts::TAU;

fn rpm_max_angular_velocity() -> f64 {
    RPM_MAX * TWO_PI / 60.0
}

fn centrifugal_stress_pa(omega: f64) -> f64 {
    CENTRIFUGAL_MASS_KG * CENTRIFUGAL_RADIUS_M * omega * omega / CROSS_SECTION_M2
}

/// Mutable accumulator state owned exclusively by the tick driver thread.
#[derive(Debug, Clone, Copy, Default)]
struct PhysicsState {
    rpm: f64,
    angle_rad: f64,
}

/// The physics engine: sole owner of physics state and history, with a
/// lock-free cross-thread surface for the rpm target and latest snapshot.
pub struct Engine {
    /// `f64` bits of the published rpm target, clamped to `[RPM_MIN, RPM_MAX]`.
    rpm_target_bits: AtomicU64,
    state: std::cell::UnsafeCell<PhysicsState>,
    latest: SeqLock<StatePayload>,
    history: std::cell::UnsafeCell<HistoryRing>,
    stress_max: f64,
    start: Instant,
}

// SAFETY: `state` and `history` are only ever touched from the tick driver
// thread (the sole mutator, per spec §4.D/§9); cross-thread access goes only
// through `rpm_target_bits` (atomic) and `latest` (SeqLock). `Engine` is
// `Sync` so it can be shared via `Arc` with session tasks that only ever call
// `set_rpm_target`/`rpm_target`/`snapshot`.
unsafe impl Sync for Engine {}

impl Engine {
    /// Build a new engine. `default_rpm_target` is clamped to
    /// `[RPM_MIN, RPM_MAX]` and seeds both the target and the initial rpm.
    /// `history_capacity` sizes the retained [`HistoryRing`] (`--history-capacity`).
    pub fn new(default_rpm_target: f64, history_capacity: usize) -> Self {
        let clamped = default_rpm_target.clamp(RPM_MIN, RPM_MAX);
        let stress_max = centrifugal_stress_pa(rpm_max_angular_velocity());
        let mut state = PhysicsState::default();
        state.rpm = clamped;
        Self {
            rpm_target_bits: AtomicU64::new(clamped.to_bits()),
            state: std::cell::UnsafeCell::new(state),
            latest: SeqLock::new(StatePayload::default()),
            history: std::cell::UnsafeCell::new(HistoryRing::new(history_capacity)),
            stress_max,
            start: Instant::now(),
        }
    }

    /// Set the rpm target. Callable from any thread; clamps to
    /// `[RPM_MIN, RPM_MAX]` and publishes atomically. Never blocks.
    pub fn set_rpm_target(&self, target: f64) {
        let clamped = target.clamp(RPM_MIN, RPM_MAX);
        self.rpm_target_bits.store(clamped.to_bits(), Ordering::Relaxed);
    }

    /// Read the currently published rpm target. Callable from any thread.
    pub fn rpm_target(&self) -> f64 {
        f64::from_bits(self.rpm_target_bits.load(Ordering::Relaxed))
    }

    /// Read the most recently published telemetry snapshot. Callable from
    /// any thread.
    pub fn snapshot(&self) -> StatePayload {
        self.latest.load()
    }

    /// Advance the simulation by one fixed timestep. Callable only from the
    /// tick driver thread.
    pub fn step(&self) {
        // SAFETY: sole mutator thread invariant (spec §4.D).
        let state = unsafe { &mut *self.state.get() };

        let target = self.rpm_target();
        let alpha = 1.0 - (-DT_SECS / TAU_SECS).exp();
        state.rpm = (state.rpm + (target - state.rpm) * alpha).clamp(RPM_MIN, RPM_MAX);

        let omega = state.rpm * TWO_PI / 60.0;
        state.angle_rad = (state.angle_rad + omega * DT_SECS).rem_euclid(TWO_PI);
        let theta = state.angle_rad;

        let stress_pa = centrifugal_stress_pa(omega);
        let stress_factor = (stress_pa / self.stress_max).clamp(0.0, 1.0);

        let piston_accel = -CRANK_THROW_M * omega * omega * (theta.cos() + LAMBDA * (2.0 * theta).cos());
        let piston_force_n = PISTON_MASS_KG * piston_accel;

        let sin_phi = (LAMBDA * theta.sin()).clamp(-1.0, 1.0);
        let phi = sin_phi.asin();
        let cos_phi = phi.cos();

        let (rod_force_n, side_thrust_n) = if cos_phi > COS_PHI_EPSILON {
            (piston_force_n / cos_phi, piston_force_n * phi.tan())
        } else {
            (0.0, 0.0)
        };
        let tangential_force_n = rod_force_n * (theta + phi).sin();
        let torque_nm = tangential_force_n * CRANK_THROW_M;

        let timestamp_ms = self.start.elapsed().as_millis() as u64;

        let payload = StatePayload {
            rpm: state.rpm,
            angle_rad: state.angle_rad,
            stress_pa,
            stress_factor,
            piston_force_n,
            rod_force_n,
            tangential_force_n,
            torque_nm,
            side_thrust_n,
            timestamp_ms,
        };

        // SAFETY: sole mutator thread invariant (spec §4.D/§9).
        let history = unsafe { &mut *self.history.get() };
        history.push(payload);

        self.latest.store(payload);
    }

    /// Borrow the history ring. Callers must ensure no concurrent `step()`
    /// during traversal — the tick driver is the sole mutator and the sole
    /// intended caller of this method.
    pub fn history(&self) -> &HistoryRing {
        // SAFETY: sole mutator thread invariant; this method is documented
        // as tick-driver-only.
        unsafe { &*self.history.get() }
    }
}
