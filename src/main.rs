// SPDX-License-Identifier: Apache-2.0
//! Process entry point: parses configuration, wires the engine/session set/
//! broadcast pool, spawns the single I/O reactor thread, and runs the tick
//! driver on the main thread until a shutdown signal fires (spec §5-§6).

use anyhow::{Context, Result};
use clap::Parser;
use cranktwin::cli::Args;
use cranktwin::engine::Engine;
use cranktwin::pool::BroadcastPool;
use cranktwin::server;
use cranktwin::session::SessionSet;
use cranktwin::tick;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let engine = Arc::new(Engine::new(args.default_rpm, args.history_capacity));
    let sessions = Arc::new(SessionSet::new());
    let pool = BroadcastPool::new(args.pool_size, args.slot_capacity);
    let max_queue = args.effective_max_queue();

    let allow_origins = if args.allow_origin.is_empty() {
        None
    } else {
        Some(args.allow_origin.iter().cloned().collect())
    };

    let stop = Arc::new(AtomicBool::new(false));
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let reactor_engine = engine.clone();
    let reactor_sessions = sessions.clone();
    let reactor_stop = stop.clone();
    let listen = args.listen;
    let reactor = std::thread::Builder::new()
        .name("io-reactor".into())
        .spawn(move || -> Result<()> {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("build reactor runtime")?;
            runtime.block_on(run_reactor(
                listen,
                reactor_engine,
                reactor_sessions,
                allow_origins,
                max_queue,
                reactor_stop,
                shutdown_tx,
                shutdown_rx,
            ))
        })
        .context("spawn io reactor thread")?;

    info!(listen = %args.listen, "cranktwin server starting");
    tick::run(
        engine,
        sessions,
        pool,
        stop,
        Duration::from_secs(args.stats_interval_secs),
    );

    reactor
        .join()
        .map_err(|_| anyhow::anyhow!("io reactor thread panicked"))??;
    Ok(())
}

async fn run_reactor(
    listen: std::net::SocketAddr,
    engine: Arc<Engine>,
    sessions: Arc<SessionSet>,
    allow_origins: Option<std::collections::HashSet<String>>,
    max_queue: usize,
    stop: Arc<AtomicBool>,
    shutdown_tx: tokio::sync::watch::Sender<bool>,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
) -> Result<()> {
    let state = Arc::new(server::AppState::new(
        engine,
        sessions,
        allow_origins,
        max_queue,
        shutdown_rx,
    ));
    let app = server::router(state).into_make_service_with_connect_info::<std::net::SocketAddr>();

    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("bind {listen}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Stop the tick driver as soon as the signal is observed, in
            // step with the reactor beginning its own graceful drain,
            // rather than waiting for the drain to finish (spec §4.G).
            stop.store(true, Ordering::Relaxed);
            // Wake every live session's writer so it sends its own close
            // frame instead of getting cut off when this runtime tears down.
            let _ = shutdown_tx.send(true);
        })
        .await
        .context("serve")?;

    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
