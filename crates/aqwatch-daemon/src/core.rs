//! MonitorCore — single-owner event loop for the refresh cascade.
//!
//! All inputs (user commands from the HTTP layer, timer ticks, fetch
//! completions) arrive as `MonitorEvent` messages on one mpsc channel.
//! MonitorCore owns the selection state exclusively and projects it into
//! `ViewStateManager`; no other task writes either.
//!
//! The cascade is dependency-ordered: a current-readings fetch is always
//! followed by a time-series fetch once the readings result is applied, so
//! the series' staleness tracks the readings' refresh cadence.
//! Fetches run as spawned tasks and report back with a [`FetchTag`]; a
//! completion whose generation no longer matches the current one is
//! superseded and dropped without touching state.  Nothing is ever aborted
//! mid-flight — tag-and-discard is the whole race story.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use aqwatch_proto::client::{DataClient, FetchError};
use aqwatch_proto::config::Config;
use aqwatch_proto::model::{Reading, SeriesFetch};

use crate::state::ViewStateManager;
use crate::timer::IntervalTimer;

// ── MonitorEvent ──────────────────────────────────────────────────────────────

/// Version marker attached to every in-flight readings/series request.  At
/// completion time the generation is compared against the current one; the
/// station and item codes ride along for logging and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTag {
    pub generation: u64,
    pub station_code: u32,
    pub item_code: Option<String>,
}

/// A user action, from the HTTP API.
#[derive(Debug, Clone)]
pub enum MonitorCommand {
    SelectStation { code: u32 },
    SelectItem { code: String },
    RefreshNow,
    AckNotice,
}

/// All inputs into the MonitorCore loop.
#[derive(Debug)]
pub enum MonitorEvent {
    Command(MonitorCommand),
    /// Periodic refresh signal from the interval timer.
    Tick,
    ReadingsFetched {
        tag: FetchTag,
        result: Result<Vec<Reading>, FetchError>,
    },
    SeriesFetched {
        tag: FetchTag,
        result: Result<SeriesFetch, FetchError>,
    },
    Shutdown,
}

// ── MonitorCore ───────────────────────────────────────────────────────────────

pub struct MonitorCore<C: DataClient> {
    config: Config,
    client: Arc<C>,
    state: Arc<ViewStateManager>,
    /// Channel to feed fetch completions back into our own event loop.
    event_tx: mpsc::Sender<MonitorEvent>,
    timer: IntervalTimer,
    /// Codes of the loaded station set, fixed after initialization.
    station_codes: Vec<u32>,
    selected_station: Option<u32>,
    /// Item the user explicitly opened.  Stays `None` until a click, so the
    /// cascade keeps defaulting to each station's first reading.
    opened_item: Option<String>,
    readings_gen: u64,
    series_gen: u64,
}

impl<C: DataClient> MonitorCore<C> {
    pub fn new(
        config: Config,
        client: Arc<C>,
        state: Arc<ViewStateManager>,
        event_tx: mpsc::Sender<MonitorEvent>,
        timer: IntervalTimer,
    ) -> Self {
        Self {
            config,
            client,
            state,
            event_tx,
            timer,
            station_codes: Vec::new(),
            selected_station: None,
            opened_item: None,
            readings_gen: 0,
            series_gen: 0,
        }
    }

    /// Load the station list, resolve the selection, kick off the first
    /// cascade and arm the refresh clock.  A station-list failure (or an
    /// empty list) is fatal: nothing downstream can proceed without one.
    pub async fn initialize(&mut self, hint: Option<u32>) -> anyhow::Result<()> {
        let stations = self
            .client
            .fetch_stations(&self.config.remote.site_filter)
            .await
            .context("station list fetch failed")?;
        anyhow::ensure!(!stations.is_empty(), "remote returned an empty station list");

        let selected = stations
            .iter()
            .find(|s| Some(s.code) == hint)
            .unwrap_or(&stations[0])
            .code;
        info!(
            station = selected,
            "MonitorCore: loaded {} stations",
            stations.len()
        );

        self.station_codes = stations.iter().map(|s| s.code).collect();
        self.selected_station = Some(selected);
        self.state.set_stations(stations).await;
        // Publish the external reference only when the selection moved: a
        // hint that resolved to itself is already the published value.
        if hint == Some(selected) {
            self.state.restore_selected_station(selected).await;
        } else {
            self.state.set_selected_station(selected).await?;
        }

        self.spawn_readings_fetch(selected);
        self.arm_clock().await;
        Ok(())
    }

    /// Run the event loop.  Returns when a `Shutdown` event is received or
    /// the event channel is closed.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<MonitorEvent>) -> anyhow::Result<()> {
        info!("MonitorCore: starting event loop");

        loop {
            let evt = event_rx.recv().await;
            match evt {
                None => {
                    info!("MonitorCore: event channel closed, shutting down");
                    break;
                }

                Some(MonitorEvent::Shutdown) => {
                    info!("MonitorCore: shutdown requested");
                    break;
                }

                Some(MonitorEvent::Command(cmd)) => {
                    debug!("MonitorCore: command {:?}", cmd);
                    if let Err(e) = self.handle_command(cmd).await {
                        error!("MonitorCore: command error: {}", e);
                    }
                }

                Some(MonitorEvent::Tick) => {
                    debug!("MonitorCore: refresh tick");
                    self.refresh().await;
                }

                Some(MonitorEvent::ReadingsFetched { tag, result }) => {
                    self.handle_readings(tag, result).await;
                }

                Some(MonitorEvent::SeriesFetched { tag, result }) => {
                    self.handle_series(tag, result).await;
                }
            }
        }

        self.teardown().await;
        Ok(())
    }

    /// Release session resources.  Also called from the error exit in main
    /// when initialization fails, so the timer never outlives the session.
    pub async fn teardown(&self) {
        self.timer.stop().await;
        info!("MonitorCore: stopped");
    }

    // ── command handlers ──────────────────────────────────────────────────────

    async fn handle_command(&mut self, cmd: MonitorCommand) -> anyhow::Result<()> {
        match cmd {
            MonitorCommand::SelectStation { code } => self.select_station(code).await?,
            MonitorCommand::SelectItem { code } => self.select_item(code).await,
            MonitorCommand::RefreshNow => {
                info!("MonitorCore: manual refresh");
                self.refresh().await;
            }
            MonitorCommand::AckNotice => self.state.ack_notice().await,
        }
        Ok(())
    }

    async fn select_station(&mut self, code: u32) -> anyhow::Result<()> {
        if !self.station_codes.contains(&code) {
            warn!(station = code, "MonitorCore: ignoring unknown station code");
            return Ok(());
        }

        // The previously opened item is kept on purpose; if the new station
        // does not measure it, the cascade falls back to its first item.
        self.selected_station = Some(code);
        self.state.set_selected_station(code).await?;
        self.spawn_readings_fetch(code);
        Ok(())
    }

    async fn select_item(&mut self, item_code: String) {
        let Some(station) = self.selected_station else {
            return;
        };
        self.opened_item = Some(item_code.clone());
        self.state.set_selected_item(item_code.clone()).await;
        self.spawn_series_fetch(station, item_code);
    }

    /// Shared by ticks and manual refresh: rearm the clock to a full
    /// interval and re-run the readings stage for the selected station.
    async fn refresh(&mut self) {
        self.arm_clock().await;
        if let Some(code) = self.selected_station {
            self.spawn_readings_fetch(code);
        }
    }

    async fn arm_clock(&self) {
        self.timer
            .start(Duration::from_secs(self.config.monitor.interval_secs))
            .await;
        self.state.mark_refreshed().await;
    }

    // ── fetch stages ──────────────────────────────────────────────────────────

    fn spawn_readings_fetch(&mut self, station_code: u32) {
        self.readings_gen += 1;
        let tag = FetchTag {
            generation: self.readings_gen,
            station_code,
            item_code: None,
        };
        let client = Arc::clone(&self.client);
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            let result = client.fetch_readings(station_code).await;
            let _ = event_tx
                .send(MonitorEvent::ReadingsFetched { tag, result })
                .await;
        });
    }

    fn spawn_series_fetch(&mut self, station_code: u32, item_code: String) {
        self.series_gen += 1;
        let tag = FetchTag {
            generation: self.series_gen,
            station_code,
            item_code: Some(item_code.clone()),
        };
        let client = Arc::clone(&self.client);
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            let result = client.fetch_series(station_code, &item_code).await;
            let _ = event_tx
                .send(MonitorEvent::SeriesFetched { tag, result })
                .await;
        });
    }

    async fn handle_readings(&mut self, tag: FetchTag, result: Result<Vec<Reading>, FetchError>) {
        if tag.generation != self.readings_gen || Some(tag.station_code) != self.selected_station {
            debug!(
                generation = tag.generation,
                station = tag.station_code,
                "MonitorCore: discarding superseded readings response"
            );
            return;
        }

        let readings = match result {
            Ok(readings) => readings,
            Err(e) => {
                warn!(station = tag.station_code, "readings fetch failed: {}", e);
                self.state
                    .set_error(format!("readings fetch failed: {e}"))
                    .await;
                return;
            }
        };

        // Every applied readings refresh re-derives and re-fetches the
        // series, using the opened item if the new readings still measure
        // it, else the first reading's item.
        let item = self
            .opened_item
            .as_ref()
            .filter(|code| readings.iter().any(|r| &r.item_code == *code))
            .cloned()
            .or_else(|| readings.first().map(|r| r.item_code.clone()));

        self.state.set_readings(readings).await;

        match item {
            Some(item) => {
                self.state.set_selected_item(item.clone()).await;
                self.spawn_series_fetch(tag.station_code, item);
            }
            None => debug!(
                station = tag.station_code,
                "MonitorCore: no readings, skipping series stage"
            ),
        }
    }

    async fn handle_series(&mut self, tag: FetchTag, result: Result<SeriesFetch, FetchError>) {
        if tag.generation != self.series_gen || Some(tag.station_code) != self.selected_station {
            debug!(
                generation = tag.generation,
                station = tag.station_code,
                item = tag.item_code.as_deref().unwrap_or(""),
                "MonitorCore: discarding superseded series response"
            );
            return;
        }

        match result {
            Ok(SeriesFetch::Points(points)) => {
                debug!(
                    station = tag.station_code,
                    item = tag.item_code.as_deref().unwrap_or(""),
                    points = points.len(),
                    "MonitorCore: series applied"
                );
                self.state.set_series(points).await;
            }
            Ok(SeriesFetch::NoData) => {
                info!(
                    station = tag.station_code,
                    item = tag.item_code.as_deref().unwrap_or(""),
                    "MonitorCore: series returned no data"
                );
                self.state.set_series_no_data().await;
            }
            Err(e) => {
                warn!(station = tag.station_code, "series fetch failed: {}", e);
                self.state
                    .set_error(format!("series fetch failed: {e}"))
                    .await;
            }
        }
    }
}
