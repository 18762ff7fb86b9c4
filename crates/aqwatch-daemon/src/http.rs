//! HTTP API — read-side projection of the view state plus user-action
//! entry points (station/item selection, manual refresh, notice ack).
//! Presentation clients poll `/api/view`; commands flow into the monitor
//! core through its event channel, never by mutating state directly.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use aqwatch_proto::model::{Reading, Station, TimeSeriesPoint};

use crate::core::{MonitorCommand, MonitorEvent};
use crate::state::ViewStateManager;

#[derive(Clone)]
struct HttpState {
    view: Arc<ViewStateManager>,
    event_tx: mpsc::Sender<MonitorEvent>,
    countdown: watch::Receiver<Option<Instant>>,
}

#[derive(Serialize)]
struct ApiView {
    rev: u64,
    stations: Vec<Station>,
    selected_station: Option<u32>,
    selected_item: Option<String>,
    readings: Vec<ApiReading>,
    series: Vec<TimeSeriesPoint>,
    notice: Option<String>,
    last_error: Option<String>,
    interval_secs: u64,
    last_refresh_at: Option<DateTime<Utc>>,
    /// Seconds until the next automatic refresh; `None` while the clock is
    /// not armed.
    refresh_in_secs: Option<u64>,
}

#[derive(Serialize)]
struct ApiReading {
    #[serde(flatten)]
    reading: Reading,
    /// Derived at snapshot time: measurement is two hours old or more.
    stale: bool,
}

pub fn start_server(
    bind_address: String,
    port: u16,
    view: Arc<ViewStateManager>,
    event_tx: mpsc::Sender<MonitorEvent>,
    countdown: watch::Receiver<Option<Instant>>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let http_state = HttpState {
            view,
            event_tx,
            countdown,
        };

        let app = Router::new()
            .route("/api/view", get(get_view))
            .route("/api/station/:code", post(select_station))
            .route("/api/item/:code", post(select_item))
            .route("/api/refresh", post(refresh_now))
            .route("/api/notice/ack", post(ack_notice))
            .layer(CorsLayer::permissive())
            .with_state(http_state);

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

async fn get_view(State(state): State<HttpState>) -> Json<ApiView> {
    let view = state.view.snapshot().await;

    let now = Local::now().naive_local();
    let readings: Vec<ApiReading> = view
        .readings
        .into_iter()
        .map(|reading| ApiReading {
            stale: reading.is_stale(now),
            reading,
        })
        .collect();

    let deadline = *state.countdown.borrow();
    let refresh_in_secs =
        deadline.map(|d| d.saturating_duration_since(Instant::now()).as_secs());

    Json(ApiView {
        rev: view.rev,
        stations: view.stations,
        selected_station: view.selected_station,
        selected_item: view.selected_item,
        readings,
        series: view.series,
        notice: view.notice,
        last_error: view.last_error,
        interval_secs: view.interval_secs,
        last_refresh_at: view.last_refresh_at,
        refresh_in_secs,
    })
}

async fn select_station(
    State(state): State<HttpState>,
    Path(code): Path<u32>,
) -> StatusCode {
    let known = state
        .view
        .snapshot()
        .await
        .stations
        .iter()
        .any(|s| s.code == code);
    if !known {
        return StatusCode::NOT_FOUND;
    }

    info!("HTTP API: select station {}", code);
    send_command(&state, MonitorCommand::SelectStation { code }).await
}

async fn select_item(State(state): State<HttpState>, Path(code): Path<String>) -> StatusCode {
    info!("HTTP API: select item {}", code);
    send_command(&state, MonitorCommand::SelectItem { code }).await
}

async fn refresh_now(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: manual refresh");
    send_command(&state, MonitorCommand::RefreshNow).await
}

async fn ack_notice(State(state): State<HttpState>) -> StatusCode {
    send_command(&state, MonitorCommand::AckNotice).await
}

async fn send_command(state: &HttpState, cmd: MonitorCommand) -> StatusCode {
    if state
        .event_tx
        .send(MonitorEvent::Command(cmd))
        .await
        .is_err()
    {
        error!("Failed to send command to monitor core");
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    StatusCode::OK
}
