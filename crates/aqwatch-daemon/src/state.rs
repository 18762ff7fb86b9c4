//! ViewState — the orchestrator's read-only projection for presentation.
//!
//! Only the monitor core writes here; the HTTP layer takes snapshots.  The
//! manager also owns the persisted station reference: the selected station
//! code is written to a small JSON file whenever it changes, and read back
//! once at the next startup as the selection hint.  That file is the
//! shareable external reference; it is never polled after startup.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use aqwatch_proto::model::{Reading, Station, TimeSeriesPoint};

/// Notice text shown when the series fetch returns the no-data sentinel.
pub const NO_DATA_NOTICE: &str = "No data available to draw the chart.";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistentRef {
    pub station_code: Option<u32>,
}

/// Full state of the view.  `rev` is a monotonically increasing counter
/// incremented on every change; clients can use it to detect updates.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ViewState {
    pub rev: u64,
    pub stations: Vec<Station>,
    pub selected_station: Option<u32>,
    /// Item code whose series is currently shown.  Follows explicit item
    /// selection, otherwise the cascade's fallback derivation.
    pub selected_item: Option<String>,
    pub readings: Vec<Reading>,
    pub series: Vec<TimeSeriesPoint>,
    /// Pending user-facing notice (empty-series acknowledgment).
    pub notice: Option<String>,
    /// Last non-fatal fetch error.  Prior data stays visible alongside it.
    pub last_error: Option<String>,
    pub interval_secs: u64,
    pub last_refresh_at: Option<DateTime<Utc>>,
}

pub struct ViewStateManager {
    state: Arc<RwLock<ViewState>>,
    state_file: PathBuf,
    persisted: PersistentRef,
}

impl ViewStateManager {
    pub fn new(state_file: PathBuf, interval_secs: u64) -> Self {
        let persisted = Self::load_persistent(&state_file);
        let state = ViewState {
            interval_secs,
            ..ViewState::default()
        };
        Self {
            state: Arc::new(RwLock::new(state)),
            state_file,
            persisted,
        }
    }

    /// Station code remembered from the previous session, if any.
    pub fn persisted_station(&self) -> Option<u32> {
        self.persisted.station_code
    }

    pub async fn snapshot(&self) -> ViewState {
        self.state.read().await.clone()
    }

    pub async fn set_stations(&self, stations: Vec<Station>) {
        let mut state = self.state.write().await;
        state.stations = stations;
        state.rev += 1;
    }

    /// Reassign the selected station and publish it as the external
    /// reference.
    pub async fn set_selected_station(&self, code: u32) -> anyhow::Result<()> {
        {
            let mut state = self.state.write().await;
            state.selected_station = Some(code);
            state.rev += 1;
        }
        self.save(code).await
    }

    /// Record the selection without rewriting the external reference; used
    /// at startup when the resolved station is the hinted one, so the
    /// reference only changes when the selection actually moves.
    pub async fn restore_selected_station(&self, code: u32) {
        let mut state = self.state.write().await;
        state.selected_station = Some(code);
        state.rev += 1;
    }

    pub async fn set_selected_item(&self, item_code: String) {
        let mut state = self.state.write().await;
        state.selected_item = Some(item_code);
        state.rev += 1;
    }

    /// Replace the readings wholesale.  Entries from a previous station or
    /// cycle never persist.
    pub async fn set_readings(&self, readings: Vec<Reading>) {
        let mut state = self.state.write().await;
        state.readings = readings;
        state.last_error = None;
        state.rev += 1;
    }

    pub async fn set_series(&self, series: Vec<TimeSeriesPoint>) {
        let mut state = self.state.write().await;
        state.series = series;
        state.notice = None;
        state.last_error = None;
        state.rev += 1;
    }

    /// Empty-series sentinel: clear the displayed series (not stale, gone)
    /// and raise the acknowledgment notice.  The fetch itself succeeded, so
    /// any earlier fetch error is cleared too.
    pub async fn set_series_no_data(&self) {
        let mut state = self.state.write().await;
        state.series.clear();
        state.notice = Some(NO_DATA_NOTICE.to_string());
        state.last_error = None;
        state.rev += 1;
    }

    pub async fn ack_notice(&self) {
        let mut state = self.state.write().await;
        state.notice = None;
        state.rev += 1;
    }

    pub async fn set_error(&self, message: String) {
        let mut state = self.state.write().await;
        state.last_error = Some(message);
        state.rev += 1;
    }

    /// Record that a refresh cascade was triggered (tick, manual refresh, or
    /// initialization) — drives the countdown display.
    pub async fn mark_refreshed(&self) {
        let mut state = self.state.write().await;
        state.last_refresh_at = Some(Utc::now());
        state.rev += 1;
    }

    async fn save(&self, code: u32) -> anyhow::Result<()> {
        let persistent = PersistentRef {
            station_code: Some(code),
        };

        if let Some(parent) = self.state_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_string_pretty(&persistent)?;
        tokio::fs::write(&self.state_file, json).await?;
        Ok(())
    }

    fn load_persistent(state_file: &PathBuf) -> PersistentRef {
        if let Ok(content) = std::fs::read_to_string(state_file) {
            if let Ok(persistent) = serde_json::from_str::<PersistentRef>(&content) {
                return persistent;
            }
        }
        PersistentRef::default()
    }
}
