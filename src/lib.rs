// SPDX-License-Identifier: Apache-2.0
//! Real-time digital twin server for a reciprocating crankshaft-piston
//! mechanism: a fixed-rate physics engine fanning out telemetry to many
//! WebSocket dashboard clients over a lock-free publish path.

pub mod cli;
pub mod codec;
pub mod engine;
pub mod payload;
pub mod pool;
pub mod ring;
pub mod server;
pub mod session;
pub mod tick;

pub use engine::Engine;
pub use payload::StatePayload;
pub use pool::BroadcastPool;
pub use session::SessionSet;
