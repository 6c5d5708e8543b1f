// SPDX-License-Identifier: Apache-2.0
//! Tick driver: the main-thread, fixed-period physics/broadcast loop
//! (spec §4.G). The sole caller of `Engine::step`.

use crate::codec::encode_state;
use crate::engine::Engine;
use crate::pool::BroadcastPool;
use crate::session::SessionSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// Target tick period: 100 Hz.
pub const TICK_PERIOD: Duration = Duration::from_millis(10);

/// Run the tick driver loop until `stop` is set. Never returns before then.
///
/// Each iteration: step the engine, encode its snapshot into the next pool
/// slot, fan the slot out to every registered session, occasionally emit
/// statistics, then sleep out the remainder of the tick period.
pub fn run(
    engine: Arc<Engine>,
    sessions: Arc<SessionSet>,
    mut pool: BroadcastPool,
    stop: Arc<AtomicBool>,
    stats_interval: Duration,
) {
    let mut last_stats = Instant::now();
    let mut ticks_since_stats: u64 = 0;

    while !stop.load(Ordering::Relaxed) {
        let t_start = Instant::now();

        engine.step();

        let snapshot = engine.snapshot();
        let scratch = pool.next_scratch();
        let len = encode_state(&snapshot, scratch);
        if len > 0 {
            if let Some(slot) = BroadcastPool::freeze(&scratch[..], len) {
                sessions.broadcast(&slot);
            }
        }

        ticks_since_stats += 1;
        if last_stats.elapsed() >= stats_interval {
            let secs = last_stats.elapsed().as_secs_f64();
            let rate = if secs > 0.0 {
                ticks_since_stats as f64 / secs
            } else {
                0.0
            };
            info!(
                clients = sessions.len(),
                broadcast_hz = rate,
                rpm = snapshot.rpm,
                "tick driver stats"
            );
            last_stats = Instant::now();
            ticks_since_stats = 0;
        }

        let elapsed = t_start.elapsed();
        if let Some(remaining) = TICK_PERIOD.checked_sub(elapsed) {
            std::thread::sleep(remaining);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_exits_promptly_once_stop_is_set() {
        let engine = Arc::new(Engine::new(1200.0, 1000));
        let sessions = Arc::new(SessionSet::new());
        let pool = BroadcastPool::new(4, 512);
        let stop = Arc::new(AtomicBool::new(false));

        let stop_clone = stop.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            stop_clone.store(true, Ordering::Relaxed);
        });

        let start = Instant::now();
        run(engine.clone(), sessions, pool, stop, Duration::from_secs(2));
        handle.join().unwrap();

        assert!(start.elapsed() < Duration::from_millis(200));
        assert!(engine.history().size() > 0);
    }
}
