// SPDX-License-Identifier: Apache-2.0
//! Per-connection session lifecycle and outbound fan-out registration
//! (spec §4.E).
//!
//! A session owns exactly two tasks: a reader (inbound control frames) and a
//! writer (outbound broadcast frames raced against a ping interval). The
//! [`SessionSet`] is the registry the tick driver thread locks briefly, once
//! per tick, to fan a [`Slot`] out to every session's bounded outbound queue.

use crate::codec::{decode_control, ControlMessage};
use crate::engine::Engine;
use crate::pool::Slot;
use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{AbortHandle, JoinError};
use tokio::time;
use tracing::{error, warn};

type TaskResult<T> = std::result::Result<T, JoinError>;

/// Lifecycle of a single WebSocket session (spec §4.E).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    /// Upgrade accepted; reader/writer tasks not yet registered.
    Opening = 0,
    /// Registered in the session set, eligible for broadcast fan-out.
    Open = 1,
    /// Shutdown in progress: either peer or tick driver initiated teardown.
    Closing = 2,
    /// Tasks joined and deregistered.
    Closed = 3,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => SessionState::Opening,
            1 => SessionState::Open,
            2 => SessionState::Closing,
            _ => SessionState::Closed,
        }
    }
}

/// Unique per-connection identifier, assigned at registration.
pub type SessionId = u64;

struct SessionAborts {
    reader: AbortHandle,
    writer: AbortHandle,
}

struct SessionEntry {
    outbound: mpsc::Sender<Slot>,
    aborts: SessionAborts,
    state: Arc<AtomicU8>,
}

/// Registry of live sessions. Locked briefly by the tick driver thread once
/// per tick (spec §4.G) and by session tasks on register/deregister; never
/// held across an `.await`.
pub struct SessionSet {
    next_id: AtomicU64,
    inner: Mutex<HashMap<SessionId, SessionEntry>>,
}

impl SessionSet {
    /// Build an empty session set.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Number of currently registered sessions.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Current lifecycle state of a registered session, if still present.
    pub fn state_of(&self, id: SessionId) -> Option<SessionState> {
        let sessions = self.inner.lock();
        sessions
            .get(&id)
            .map(|entry| SessionState::from_u8(entry.state.load(Ordering::Relaxed)))
    }

    fn alloc_id(&self) -> SessionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn register(
        &self,
        id: SessionId,
        outbound: mpsc::Sender<Slot>,
        aborts: SessionAborts,
        state: Arc<AtomicU8>,
    ) {
        state.store(SessionState::Open as u8, Ordering::Relaxed);
        self.inner.lock().insert(
            id,
            SessionEntry {
                outbound,
                aborts,
                state,
            },
        );
    }

    fn remove(&self, id: SessionId) {
        if let Some(entry) = self.inner.lock().remove(&id) {
            entry
                .state
                .store(SessionState::Closed as u8, Ordering::Relaxed);
        }
    }

    /// Tick-driver-only: fan `slot` out to every registered session via a
    /// non-blocking send. A session whose queue is full has violated its
    /// backpressure bound (spec §4.E, capacity `K-1`) and is force-closed:
    /// its tasks are aborted and it is dropped from the set.
    pub fn broadcast(&self, slot: &Slot) {
        let mut violators = Vec::new();
        {
            let sessions = self.inner.lock();
            for (&id, entry) in sessions.iter() {
                match entry.outbound.try_send(slot.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(session_id = id, "backpressure bound exceeded; closing session");
                        entry
                            .state
                            .store(SessionState::Closing as u8, Ordering::Relaxed);
                        entry.aborts.reader.abort();
                        entry.aborts.writer.abort();
                        violators.push(id);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        violators.push(id);
                    }
                }
            }
        }
        if !violators.is_empty() {
            let mut sessions = self.inner.lock();
            for id in violators {
                sessions.remove(&id);
            }
        }
    }
}

impl Default for SessionSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Drive one upgraded WebSocket connection end to end: register it in
/// `sessions`, run its reader/writer tasks until either exits or the tick
/// driver force-closes it, then deregister.
pub async fn handle_socket(
    socket: WebSocket,
    engine: Arc<Engine>,
    sessions: Arc<SessionSet>,
    peer: SocketAddr,
    max_queue: usize,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let id = sessions.alloc_id();
    let state = Arc::new(AtomicU8::new(SessionState::Opening as u8));

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Slot>(max_queue.max(1));

    let writer = tokio::spawn(async move {
        let mut interval = time::interval(Duration::from_secs(30));
        // tokio's interval ticks immediately; discard the first tick so we
        // don't ping before the handshake has settled.
        interval.tick().await;
        loop {
            tokio::select! {
                maybe_slot = out_rx.recv() => {
                    match maybe_slot {
                        Some(slot) => {
                            if ws_tx.send(Message::Text(slot.into_utf8_bytes())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = interval.tick() => {
                    if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
                // Process shutdown: stop draining and fall through to send
                // our own close frame below, rather than getting cut off
                // mid-`select!` when the reactor runtime is torn down.
                _ = shutdown_rx.changed() => {
                    break;
                }
            }
        }
        let _ = ws_tx
            .send(Message::Close(Some(CloseFrame {
                code: axum::extract::ws::close_code::NORMAL,
                reason: "".into(),
            })))
            .await;
    });

    let reader_engine = engine.clone();
    let reader = tokio::spawn(async move {
        while let Some(msg) = ws_rx.next().await {
            match msg {
                Ok(Message::Text(text)) => match decode_control(text.as_str()) {
                    ControlMessage::SetRpm { rpm_target } => {
                        reader_engine.set_rpm_target(rpm_target);
                    }
                    ControlMessage::Replay { .. } => {
                        // No-op: replay semantics are an Open Question resolved
                        // to "preserve current no-op behavior" (see DESIGN.md).
                    }
                    ControlMessage::Unknown => {}
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(err) => {
                    warn!(?err, ?peer, "ws recv error");
                    break;
                }
            }
        }
    });

    let aborts = SessionAborts {
        reader: reader.abort_handle(),
        writer: writer.abort_handle(),
    };
    sessions.register(id, out_tx.clone(), aborts, state.clone());
    drop(out_tx);

    enum EndReason {
        Reader(TaskResult<()>),
        Writer(TaskResult<()>),
    }

    let mut reader = reader;
    let mut writer = writer;
    let reason = tokio::select! {
        res = &mut reader => EndReason::Reader(res),
        res = &mut writer => EndReason::Writer(res),
    };

    state.store(SessionState::Closing as u8, Ordering::Relaxed);
    match &reason {
        EndReason::Reader(_) => writer.abort(),
        EndReason::Writer(_) => reader.abort(),
    }

    // Await the aborted counterpart to surface a real panic, if any
    // (cancellation itself is expected and logged as a no-op).
    match reason {
        EndReason::Reader(res) => {
            log_task_result("reader", peer, res);
            log_task_result("writer", peer, writer.await);
        }
        EndReason::Writer(res) => {
            log_task_result("writer", peer, res);
            log_task_result("reader", peer, reader.await);
        }
    }

    sessions.remove(id);
}

fn log_task_result(name: &'static str, peer: SocketAddr, res: TaskResult<()>) {
    match res {
        Ok(()) => {}
        Err(err) if err.is_cancelled() => {}
        Err(err) if err.is_panic() => error!(?peer, ?err, "{name} task panicked"),
        Err(err) => warn!(?peer, ?err, "{name} task failed"),
    }
}
