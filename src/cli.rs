// SPDX-License-Identifier: Apache-2.0
//! Process configuration: command-line flags only, no persisted config file
//! (spec §6, "Persisted state: none").

use clap::Parser;
use std::net::SocketAddr;

/// Real-time digital twin server for a reciprocating crankshaft-piston
/// mechanism.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Args {
    /// TCP listener for dashboard clients.
    #[arg(long, default_value = "0.0.0.0:3001")]
    pub listen: SocketAddr,

    /// Initial rpm target, clamped to [0, 8000] at startup.
    #[arg(long, default_value_t = 1200.0)]
    pub default_rpm: f64,

    /// Number of StatePayloads retained in the history ring.
    #[arg(long, default_value_t = 1000)]
    pub history_capacity: usize,

    /// Per-session outbound queue capacity. Defaults to `pool_size - 1`
    /// (spec §3: K strictly greater than the max tolerated lag).
    #[arg(long)]
    pub max_queue: Option<usize>,

    /// Number of broadcast scratch buffers (K in spec §3; must be >= 2).
    #[arg(long, default_value_t = 4)]
    pub pool_size: usize,

    /// Byte capacity of each broadcast scratch buffer.
    #[arg(long, default_value_t = 512)]
    pub slot_capacity: usize,

    /// Allowed WebSocket upgrade Origin values (repeatable). Empty accepts
    /// all origins.
    #[arg(long)]
    pub allow_origin: Vec<String>,

    /// Interval between tick-driver statistics log lines.
    #[arg(long, default_value_t = 2)]
    pub stats_interval_secs: u64,
}

impl Args {
    /// Effective per-session outbound queue capacity: `--max-queue` if set,
    /// otherwise `pool_size - 1`.
    pub fn effective_max_queue(&self) -> usize {
        self.max_queue.unwrap_or_else(|| self.pool_size.saturating_sub(1).max(1))
    }
}
