use std::sync::Arc;

use tokio::sync::mpsc;

use aqwatch_proto::client::HttpDataClient;
use aqwatch_proto::config::Config;

use aqwatch_daemon::core::{MonitorCore, MonitorEvent};
use aqwatch_daemon::http;
use aqwatch_daemon::state::ViewStateManager;
use aqwatch_daemon::timer::IntervalTimer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let data_dir = aqwatch_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;

    let log_path = data_dir.join("daemon.log");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    // Allow RUST_LOG override; default to debug for app code but suppress
    // noisy connection-level DEBUG from HTTP client internals.
    let log_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "debug,hyper_util=warn,reqwest=warn,hyper=warn".to_string());
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(log_filter.as_str())
        .with_ansi(false)
        .init();

    // Print log path to stderr so the operator can tail it immediately.
    eprintln!("aqwatch log: {}", log_path.display());

    tracing::info!("aqwatch-daemon starting…");

    // ── Load config ──────────────────────────────────────────────────────────
    let config = Config::load().unwrap_or_default();

    // ── MonitorEvent channel (HTTP/timer/fetches → MonitorCore) ──────────────
    let (event_tx, event_rx) = mpsc::channel::<MonitorEvent>(1024);

    // ── View state + persisted station reference ─────────────────────────────
    let state = Arc::new(ViewStateManager::new(
        config.monitor.state_file.clone(),
        config.monitor.interval_secs,
    ));
    // Config hint wins; otherwise the station remembered from last session.
    let hint = config.monitor.station_hint.or(state.persisted_station());

    // ── Remote client ────────────────────────────────────────────────────────
    let client = Arc::new(HttpDataClient::new(&config.remote.base_url)?);

    // ── Refresh clock — one instance per session ─────────────────────────────
    let timer = IntervalTimer::spawn(event_tx.clone());
    let countdown = timer.countdown();

    // ── HTTP server ──────────────────────────────────────────────────────────
    if config.http.enabled {
        http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            state.clone(),
            event_tx.clone(),
            countdown,
        );
    }

    // ── Build + initialize MonitorCore ───────────────────────────────────────
    let mut monitor = MonitorCore::new(config, client, state, event_tx.clone(), timer);
    if let Err(e) = monitor.initialize(hint).await {
        // Station-list failure is fatal; release the clock before bailing.
        monitor.teardown().await;
        return Err(e);
    }

    // ── Spawn MonitorCore event loop ─────────────────────────────────────────
    let run = tokio::spawn(monitor.run(event_rx));

    tokio::signal::ctrl_c().await?;
    tracing::info!("ctrl-c received, shutting down");
    let _ = event_tx.send(MonitorEvent::Shutdown).await;
    run.await??;

    Ok(())
}
