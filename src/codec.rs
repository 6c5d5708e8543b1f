// SPDX-License-Identifier: Apache-2.0
//! Wire codec: outbound fixed-precision JSON state frames, inbound control
//! frame decoding.

use crate::payload::StatePayload;
use std::io::Write;

/// Decoded outcome of an inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    /// `{"type":"set_rpm","payload":{"rpm_target":<number>}}`.
    SetRpm {
        /// Raw, unclamped target as sent by the client. Clamping happens at
        /// the engine boundary (spec §4.B), not here.
        rpm_target: f64,
    },
    /// `{"type":"replay","payload":{"mode":...,"t_ms":...}}`.
    Replay {
        /// One of `"live" | "freeze" | "seek"`.
        mode: ReplayMode,
        /// Present only for `mode == "seek"`, optional otherwise.
        t_ms: Option<u64>,
    },
    /// Malformed JSON, a missing required field, or an unrecognized `type`.
    Unknown,
}

/// Replay mode requested by a client. Accepted and parsed; the core's
/// current contract is to no-op on it (spec §9 Open Question — replay
/// semantics).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayMode {
    /// Resume following the live tick stream.
    Live,
    /// Stop advancing and hold the current frame.
    Freeze,
    /// Jump to a specific point in history.
    Seek,
}

/// Encode a [`StatePayload`] as `{"type":"state","payload":{...}}` directly
/// into `buf`, in the fixed key order and numeric precision spec §4.B
/// mandates. Returns the number of bytes written, or `0` if `buf` is too
/// small to hold the frame (the caller skips that tick's broadcast).
pub fn encode_state(payload: &StatePayload, buf: &mut [u8]) -> usize {
    let mut cursor = std::io::Cursor::new(&mut *buf);
    let result = write!(
        cursor,
        concat!(
            "{{\"type\":\"state\",\"payload\":{{",
            "\"rpm\":{:.2},",
            "\"angle_rad\":{:.6},",
            "\"stress_pa\":{:.2},",
            "\"stress_factor\":{:.6},",
            "\"piston_force_n\":{:.2},",
            "\"rod_force_n\":{:.2},",
            "\"tangential_force_n\":{:.2},",
            "\"torque_nm\":{:.4},",
            "\"side_thrust_n\":{:.2},",
            "\"timestamp_ms\":{}}}}}",
        ),
        payload.rpm,
        payload.angle_rad,
        payload.stress_pa,
        payload.stress_factor,
        payload.piston_force_n,
        payload.rod_force_n,
        payload.tangential_force_n,
        payload.torque_nm,
        payload.side_thrust_n,
        payload.timestamp_ms,
    );
    match result {
        Ok(()) => cursor.position() as usize,
        Err(_) => 0,
    }
}

/// Decode an inbound text frame into a [`ControlMessage`]. Never errors:
/// anything that isn't recognized collapses to `Unknown` and is silently
/// dropped by the caller (spec §4.B, §7.1).
pub fn decode_control(text: &str) -> ControlMessage {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(text) else {
        return ControlMessage::Unknown;
    };
    let Some(msg_type) = value.get("type").and_then(|v| v.as_str()) else {
        return ControlMessage::Unknown;
    };
    let payload = value.get("payload");
    match msg_type {
        "set_rpm" => {
            let Some(rpm_target) = payload
                .and_then(|p| p.get("rpm_target"))
                .and_then(|v| v.as_f64())
            else {
                return ControlMessage::Unknown;
            };
            ControlMessage::SetRpm { rpm_target }
        }
        "replay" => {
            let Some(mode_str) = payload
                .and_then(|p| p.get("mode"))
                .and_then(|v| v.as_str())
            else {
                return ControlMessage::Unknown;
            };
            let mode = match mode_str {
                "live" => ReplayMode::Live,
                "freeze" => ReplayMode::Freeze,
                "seek" => ReplayMode::Seek,
                _ => return ControlMessage::Unknown,
            };
            let t_ms = payload.and_then(|p| p.get("t_ms")).and_then(|v| v.as_u64());
            ControlMessage::Replay { mode, t_ms }
        }
        _ => ControlMessage::Unknown,
    }
}
