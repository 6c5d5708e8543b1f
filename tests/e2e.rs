//! End-to-end scenarios run against a live server instance (spec §8).

use cranktwin::engine::Engine;
use cranktwin::pool::BroadcastPool;
use cranktwin::server::{self, AppState};
use cranktwin::session::SessionSet;
use cranktwin::tick;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message as WsMessage;

struct TestServer {
    addr: SocketAddr,
    stop: Arc<AtomicBool>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    session_shutdown_tx: Option<tokio::sync::watch::Sender<bool>>,
    tick_thread: Option<std::thread::JoinHandle<()>>,
}

impl TestServer {
    async fn spawn() -> Self {
        let engine = Arc::new(Engine::new(1200.0, 1000));
        let sessions = Arc::new(SessionSet::new());
        let pool = BroadcastPool::new(4, 512);
        let stop = Arc::new(AtomicBool::new(false));

        let (session_shutdown_tx, session_shutdown_rx) = tokio::sync::watch::channel(false);
        let state = Arc::new(AppState::new(
            engine.clone(),
            sessions.clone(),
            None,
            3,
            session_shutdown_rx,
        ));
        let app = server::router(state).into_make_service_with_connect_info::<SocketAddr>();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await;
        });

        let tick_stop = stop.clone();
        let tick_thread = std::thread::spawn(move || {
            tick::run(engine, sessions, pool, tick_stop, Duration::from_secs(60));
        });

        // Give the reactor a moment to start accepting before tests connect.
        tokio::time::sleep(Duration::from_millis(30)).await;

        TestServer {
            addr,
            stop,
            shutdown_tx: Some(shutdown_tx),
            session_shutdown_tx: Some(session_shutdown_tx),
            tick_thread: Some(tick_thread),
        }
    }

    fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    async fn raw_http_get(&self, path: &str) -> String {
        let mut stream = TcpStream::connect(self.addr).await.unwrap();
        let req = format!(
            "GET {path} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
            self.addr
        );
        stream.write_all(req.as_bytes()).await.unwrap();
        let mut resp = String::new();
        stream.read_to_string(&mut resp).await.unwrap();
        resp
    }

    async fn shutdown(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(tx) = self.session_shutdown_tx.take() {
            let _ = tx.send(true);
        }
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.tick_thread.take() {
            let _ = tokio::task::spawn_blocking(move || handle.join()).await;
        }
    }
}

#[tokio::test]
async fn scenario_1_boot_and_health() {
    let server = TestServer::spawn().await;
    let resp = server.raw_http_get("/health").await;
    assert!(resp.starts_with("HTTP/1.1 200"));
    assert!(resp.ends_with("ok"));
    server.shutdown().await;
}

#[tokio::test]
async fn scenario_2_steady_broadcast_rate() {
    let server = TestServer::spawn().await;
    let (mut ws, _) = tokio_tungstenite::connect_async(server.ws_url()).await.unwrap();

    let mut count = 0u32;
    let window = Duration::from_millis(1500);
    let deadline = Instant::now() + window;
    while Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(200), ws.next()).await {
            Ok(Some(Ok(WsMessage::Text(_)))) => count += 1,
            Ok(Some(Ok(_))) => {}
            _ => {}
        }
    }
    let rate = count as f64 / window.as_secs_f64();
    assert!(rate > 50.0, "observed broadcast rate too low: {rate}/s");

    server.shutdown().await;
}

#[tokio::test]
async fn scenario_3_rpm_command_converges_within_tolerance() {
    let server = TestServer::spawn().await;
    let (mut ws, _) = tokio_tungstenite::connect_async(server.ws_url()).await.unwrap();

    ws.send(WsMessage::Text(
        r#"{"type":"set_rpm","payload":{"rpm_target":4000}}"#.into(),
    ))
    .await
    .unwrap();

    let mut last_rpm = None;
    let deadline = Instant::now() + Duration::from_millis(3200);
    while Instant::now() < deadline {
        if let Ok(Some(Ok(WsMessage::Text(text)))) =
            tokio::time::timeout(Duration::from_millis(200), ws.next()).await
        {
            let value: Value = serde_json::from_str(&text).unwrap();
            last_rpm = value["payload"]["rpm"].as_f64();
        }
    }

    let rpm = last_rpm.expect("received at least one state frame");
    assert!((rpm - 4000.0).abs() / 4000.0 < 0.01, "rpm={rpm}");

    server.shutdown().await;
}

#[tokio::test]
async fn scenario_4_rpm_target_is_clamped() {
    let server = TestServer::spawn().await;
    let (mut ws, _) = tokio_tungstenite::connect_async(server.ws_url()).await.unwrap();

    ws.send(WsMessage::Text(
        r#"{"type":"set_rpm","payload":{"rpm_target":500000}}"#.into(),
    ))
    .await
    .unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if let Ok(Some(Ok(WsMessage::Text(text)))) =
            tokio::time::timeout(Duration::from_millis(200), ws.next()).await
        {
            let value: Value = serde_json::from_str(&text).unwrap();
            let rpm = value["payload"]["rpm"].as_f64().unwrap();
            assert!(rpm <= 8000.0 + 1e-6, "rpm exceeded clamp: {rpm}");
        }
    }

    server.shutdown().await;
}

#[tokio::test]
async fn scenario_5_malformed_input_does_not_break_the_session() {
    let server = TestServer::spawn().await;
    let (mut ws, _) = tokio_tungstenite::connect_async(server.ws_url()).await.unwrap();

    ws.send(WsMessage::Text("not json at all".into())).await.unwrap();
    ws.send(WsMessage::Text(r#"{"type":"set_rpm"}"#.into())).await.unwrap();
    ws.send(WsMessage::Text(r#"{"type":"bogus"}"#.into())).await.unwrap();

    let got_frame_after_garbage = tokio::time::timeout(Duration::from_millis(500), async {
        loop {
            if let Some(Ok(WsMessage::Text(_))) = ws.next().await {
                return true;
            }
        }
    })
    .await
    .unwrap_or(false);
    assert!(got_frame_after_garbage, "session should survive malformed frames");

    let resp = server.raw_http_get("/health").await;
    assert!(resp.starts_with("HTTP/1.1 200"));

    server.shutdown().await;
}

#[tokio::test]
async fn scenario_6_shutdown_closes_sockets_promptly() {
    let server = TestServer::spawn().await;
    let (mut ws, _) = tokio_tungstenite::connect_async(server.ws_url()).await.unwrap();

    // Drain at least one frame so the session is fully established.
    let _ = tokio::time::timeout(Duration::from_millis(500), ws.next()).await;

    let start = Instant::now();
    server.shutdown().await;

    let closed = tokio::time::timeout(Duration::from_millis(500), async {
        loop {
            match ws.next().await {
                Some(Ok(WsMessage::Close(_))) | None => return true,
                Some(Ok(_)) => continue,
                Some(Err(_)) => return true,
            }
        }
    })
    .await
    .unwrap_or(false);

    assert!(closed, "expected a clean close after shutdown");
    assert!(start.elapsed() < Duration::from_millis(500));
}
