//! End-to-end tests for the monitor core event loop, driven by a scripted
//! remote client: selection resolution, cascade ordering, supersession of
//! stale responses, and the no-data notice path.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use tokio::sync::mpsc;

use aqwatch_proto::client::{DataClient, FetchError};
use aqwatch_proto::config::Config;
use aqwatch_proto::model::{Reading, SeriesFetch, Station, TimeSeriesPoint};

use aqwatch_daemon::core::{MonitorCommand, MonitorCore, MonitorEvent};
use aqwatch_daemon::state::{ViewState, ViewStateManager, NO_DATA_NOTICE};
use aqwatch_daemon::timer::IntervalTimer;

// ── Scripted client ───────────────────────────────────────────────────────────

#[derive(Default)]
struct Script {
    stations: Vec<Station>,
    readings: HashMap<u32, Vec<Reading>>,
    readings_delay: HashMap<u32, Duration>,
    series: HashMap<(u32, String), SeriesFetch>,
    series_delay: HashMap<(u32, String), Duration>,
}

/// Remote client whose responses come from a fixed script.  Every call is
/// recorded so tests can assert on request ordering.
#[derive(Clone)]
struct ScriptedClient {
    script: Arc<Script>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl ScriptedClient {
    fn new(script: Script) -> Self {
        Self {
            script: Arc::new(script),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl DataClient for ScriptedClient {
    async fn fetch_stations(&self, _site_filter: &str) -> Result<Vec<Station>, FetchError> {
        self.calls.lock().unwrap().push("stations".to_string());
        if self.script.stations.is_empty() {
            return Err(FetchError::Malformed("no stations scripted".to_string()));
        }
        Ok(self.script.stations.clone())
    }

    async fn fetch_readings(&self, station_code: u32) -> Result<Vec<Reading>, FetchError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("readings:{station_code}"));
        if let Some(delay) = self.script.readings_delay.get(&station_code) {
            tokio::time::sleep(*delay).await;
        }
        self.script.readings.get(&station_code).cloned().ok_or_else(|| {
            FetchError::Malformed(format!("readings not scripted for {station_code}"))
        })
    }

    async fn fetch_series(
        &self,
        station_code: u32,
        item_code: &str,
    ) -> Result<SeriesFetch, FetchError> {
        let key = (station_code, item_code.to_string());
        self.calls
            .lock()
            .unwrap()
            .push(format!("series:{station_code}:{item_code}"));
        if let Some(delay) = self.script.series_delay.get(&key) {
            tokio::time::sleep(*delay).await;
        }
        self.script.series.get(&key).cloned().ok_or_else(|| {
            FetchError::Malformed(format!("series not scripted for {station_code}/{item_code}"))
        })
    }
}

// ── Harness ───────────────────────────────────────────────────────────────────

struct Harness {
    state: Arc<ViewStateManager>,
    event_tx: mpsc::Sender<MonitorEvent>,
    client: ScriptedClient,
}

static STATE_FILE_SEQ: AtomicU64 = AtomicU64::new(0);

fn temp_state_file() -> PathBuf {
    let seq = STATE_FILE_SEQ.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!(
        "aqwatch-orch-test-{}-{seq}.json",
        std::process::id()
    ))
}

async fn start(script: Script, hint: Option<u32>) -> anyhow::Result<Harness> {
    let client = ScriptedClient::new(script);
    let (event_tx, event_rx) = mpsc::channel::<MonitorEvent>(64);
    let state = Arc::new(ViewStateManager::new(temp_state_file(), 300));
    let timer = IntervalTimer::spawn(event_tx.clone());

    let mut core = MonitorCore::new(
        Config::default(),
        Arc::new(client.clone()),
        state.clone(),
        event_tx.clone(),
        timer,
    );
    core.initialize(hint).await?;
    tokio::spawn(core.run(event_rx));

    Ok(Harness {
        state,
        event_tx,
        client,
    })
}

async fn wait_for<F>(state: &ViewStateManager, mut cond: F) -> ViewState
where
    F: FnMut(&ViewState) -> bool,
{
    for _ in 0..200 {
        let view = state.snapshot().await;
        if cond(&view) {
            return view;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let view = state.snapshot().await;
    panic!("condition not met within 2s; last view: {view:?}");
}

async fn send(harness: &Harness, cmd: MonitorCommand) {
    harness
        .event_tx
        .send(MonitorEvent::Command(cmd))
        .await
        .expect("event channel closed");
}

// ── Fixture builders ──────────────────────────────────────────────────────────

fn t(hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 8, 29)
        .unwrap()
        .and_hms_opt(hour, 0, 0)
        .unwrap()
}

fn station(code: u32, name: &str) -> Station {
    Station {
        code,
        name: name.to_string(),
    }
}

fn reading(item: &str, conc: f64) -> Reading {
    Reading {
        item_code: item.to_string(),
        item_name: item.to_string(),
        unit: "ppm".to_string(),
        concentration: conc,
        measured_at: t(10),
    }
}

fn points(item: &str) -> SeriesFetch {
    SeriesFetch::Points(vec![TimeSeriesPoint {
        measured_at: t(9),
        concentration: 0.003,
        item_name: item.to_string(),
        unit: "ppm".to_string(),
    }])
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn initialize_selects_hint_when_present() {
    let mut script = Script::default();
    script.stations = vec![station(422001, "Station A"), station(422002, "Station B")];
    script.readings.insert(422002, vec![reading("PM10", 31.0)]);
    script
        .series
        .insert((422002, "PM10".to_string()), points("PM10"));

    let harness = start(script, Some(422002)).await.unwrap();
    let view = wait_for(&harness.state, |v| !v.readings.is_empty()).await;

    assert_eq!(view.selected_station, Some(422002));
    assert_eq!(view.readings[0].item_code, "PM10");
}

#[tokio::test]
async fn initialize_falls_back_to_first_station() {
    let mut script = Script::default();
    script.stations = vec![station(422001, "Station A"), station(422002, "Station B")];
    script.readings.insert(422001, vec![reading("SO2", 0.004)]);
    script
        .series
        .insert((422001, "SO2".to_string()), points("SO2"));

    // Hint does not match any loaded station.
    let harness = start(script, Some(999999)).await.unwrap();
    let view = wait_for(&harness.state, |v| !v.readings.is_empty()).await;

    assert_eq!(view.selected_station, Some(422001));
}

#[tokio::test]
async fn initialize_with_matching_hint_keeps_reference_untouched() {
    let mut script = Script::default();
    script.stations = vec![station(422001, "Station A"), station(422002, "Station B")];
    script.readings.insert(422002, vec![reading("PM10", 31.0)]);
    script
        .series
        .insert((422002, "PM10".to_string()), points("PM10"));
    script.readings.insert(422001, vec![reading("SO2", 0.004)]);
    script
        .series
        .insert((422001, "SO2".to_string()), points("SO2"));

    // Wired by hand so the test can watch the reference file itself.
    let path = temp_state_file();
    let client = ScriptedClient::new(script);
    let (event_tx, event_rx) = mpsc::channel::<MonitorEvent>(64);
    let state = Arc::new(ViewStateManager::new(path.clone(), 300));
    let timer = IntervalTimer::spawn(event_tx.clone());
    let mut core = MonitorCore::new(
        Config::default(),
        Arc::new(client),
        state.clone(),
        event_tx.clone(),
        timer,
    );
    core.initialize(Some(422002)).await.unwrap();
    tokio::spawn(core.run(event_rx));

    let view = wait_for(&state, |v| !v.readings.is_empty()).await;
    assert_eq!(view.selected_station, Some(422002));
    // The hint resolved to itself, so the external reference is not rewritten.
    assert!(!path.exists(), "matching hint must not rewrite the reference");

    // An actual selection change publishes it as usual.
    event_tx
        .send(MonitorEvent::Command(MonitorCommand::SelectStation {
            code: 422001,
        }))
        .await
        .unwrap();
    wait_for(&state, |v| v.selected_station == Some(422001)).await;
    wait_for(&state, |_| path.exists()).await;

    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn initialize_fails_when_station_list_unavailable() {
    let err = match start(Script::default(), None).await {
        Err(e) => e,
        Ok(_) => panic!("initialization succeeded without a station list"),
    };
    assert!(format!("{err:#}").contains("station list fetch failed"));
}

#[tokio::test]
async fn no_data_series_raises_notice_and_clears_chart() {
    // Spec scenario: one station, one SO2 reading, empty-series sentinel.
    let mut script = Script::default();
    script.stations = vec![station(422001, "Station A")];
    script.readings.insert(422001, vec![reading("SO2", 0.004)]);
    script
        .series
        .insert((422001, "SO2".to_string()), SeriesFetch::NoData);

    let harness = start(script, None).await.unwrap();
    let view = wait_for(&harness.state, |v| v.notice.is_some()).await;

    assert_eq!(view.selected_station, Some(422001));
    assert_eq!(view.selected_item.as_deref(), Some("SO2"));
    assert!(view.series.is_empty());
    assert_eq!(view.notice.as_deref(), Some(NO_DATA_NOTICE));
    assert!(view.last_error.is_none(), "no-data is not an error");

    // The session is still live: acknowledgment clears the notice.
    send(&harness, MonitorCommand::AckNotice).await;
    wait_for(&harness.state, |v| v.notice.is_none()).await;
}

#[tokio::test]
async fn series_is_requested_only_after_readings_apply() {
    let mut script = Script::default();
    script.stations = vec![station(422001, "Station A")];
    script.readings.insert(422001, vec![reading("SO2", 0.004)]);
    script
        .series
        .insert((422001, "SO2".to_string()), points("SO2"));

    let harness = start(script, None).await.unwrap();
    wait_for(&harness.state, |v| !v.series.is_empty()).await;

    send(&harness, MonitorCommand::RefreshNow).await;
    send(&harness, MonitorCommand::RefreshNow).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Causal ordering: at every point of the call log, readings requests
    // must be at least as numerous as series requests.
    let calls = harness.client.calls();
    let mut readings_seen = 0usize;
    let mut series_seen = 0usize;
    for call in &calls {
        if call.starts_with("readings:") {
            readings_seen += 1;
        } else if call.starts_with("series:") {
            series_seen += 1;
        }
        assert!(
            readings_seen >= series_seen,
            "series requested before its readings cycle: {calls:?}"
        );
    }
    // Back-to-back refreshes supersede each other, so only the surviving
    // cycle of the pair produces a series fetch.
    assert!(series_seen >= 2, "expected a series fetch per applied cycle: {calls:?}");
}

#[tokio::test]
async fn slow_response_for_previous_station_is_discarded() {
    let mut script = Script::default();
    script.stations = vec![station(422001, "Station A"), station(422002, "Station B")];
    script.readings.insert(422001, vec![reading("AAA", 1.0)]);
    script
        .readings_delay
        .insert(422001, Duration::from_millis(300));
    script.readings.insert(422002, vec![reading("BBB", 2.0)]);
    script
        .series
        .insert((422002, "BBB".to_string()), points("BBB"));

    let harness = start(script, Some(422001)).await.unwrap();

    // Switch stations while station A's readings are still in flight.
    send(&harness, MonitorCommand::SelectStation { code: 422002 }).await;
    wait_for(&harness.state, |v| !v.readings.is_empty()).await;

    // Let station A's response arrive; it must not overwrite station B.
    tokio::time::sleep(Duration::from_millis(400)).await;
    let view = harness.state.snapshot().await;
    assert_eq!(view.selected_station, Some(422002));
    assert_eq!(view.readings.len(), 1);
    assert_eq!(view.readings[0].item_code, "BBB");
}

#[tokio::test]
async fn slow_series_for_previous_item_is_discarded() {
    // Spec scenario: PM10 opened while the SO2 series is still pending.
    let mut script = Script::default();
    script.stations = vec![station(422001, "Station A")];
    script
        .readings
        .insert(422001, vec![reading("SO2", 0.004), reading("PM10", 31.0)]);
    script
        .series
        .insert((422001, "SO2".to_string()), points("SO2"));
    script
        .series_delay
        .insert((422001, "SO2".to_string()), Duration::from_millis(300));
    script
        .series
        .insert((422001, "PM10".to_string()), points("PM10"));

    let harness = start(script, None).await.unwrap();
    wait_for(&harness.state, |v| !v.readings.is_empty()).await;

    send(
        &harness,
        MonitorCommand::SelectItem {
            code: "PM10".to_string(),
        },
    )
    .await;
    wait_for(&harness.state, |v| {
        v.series.first().map(|p| p.item_name.as_str()) == Some("PM10")
    })
    .await;

    // Let the SO2 response land; only PM10 may remain on screen.
    tokio::time::sleep(Duration::from_millis(400)).await;
    let view = harness.state.snapshot().await;
    assert_eq!(view.selected_item.as_deref(), Some("PM10"));
    assert_eq!(view.series[0].item_name, "PM10");

    // The stale request really was issued and then dropped.
    assert!(harness
        .client
        .calls()
        .contains(&"series:422001:SO2".to_string()));
}

#[tokio::test]
async fn station_switch_preserves_opened_item() {
    let mut script = Script::default();
    script.stations = vec![station(422001, "Station A"), station(422002, "Station B")];
    script
        .readings
        .insert(422001, vec![reading("SO2", 0.004), reading("PM10", 31.0)]);
    script
        .readings
        .insert(422002, vec![reading("O3", 0.02), reading("PM10", 18.0)]);
    script
        .series
        .insert((422001, "SO2".to_string()), points("SO2"));
    script
        .series
        .insert((422001, "PM10".to_string()), points("PM10"));
    script
        .series
        .insert((422002, "PM10".to_string()), points("PM10"));

    let harness = start(script, None).await.unwrap();
    wait_for(&harness.state, |v| !v.readings.is_empty()).await;

    send(
        &harness,
        MonitorCommand::SelectItem {
            code: "PM10".to_string(),
        },
    )
    .await;
    wait_for(&harness.state, |v| v.selected_item.as_deref() == Some("PM10")).await;

    // The new station also measures PM10, so the drill-down sticks to it.
    send(&harness, MonitorCommand::SelectStation { code: 422002 }).await;
    let view = wait_for(&harness.state, |v| {
        v.readings.first().map(|r| r.item_code.as_str()) == Some("O3")
    })
    .await;
    assert_eq!(view.selected_item.as_deref(), Some("PM10"));
}

#[tokio::test]
async fn station_switch_falls_back_when_item_absent() {
    let mut script = Script::default();
    script.stations = vec![station(422001, "Station A"), station(422002, "Station B")];
    script
        .readings
        .insert(422001, vec![reading("SO2", 0.004), reading("PM10", 31.0)]);
    script.readings.insert(422002, vec![reading("O3", 0.02)]);
    script
        .series
        .insert((422001, "SO2".to_string()), points("SO2"));
    script
        .series
        .insert((422001, "PM10".to_string()), points("PM10"));
    script
        .series
        .insert((422002, "O3".to_string()), points("O3"));

    let harness = start(script, None).await.unwrap();
    wait_for(&harness.state, |v| !v.readings.is_empty()).await;

    send(
        &harness,
        MonitorCommand::SelectItem {
            code: "PM10".to_string(),
        },
    )
    .await;
    wait_for(&harness.state, |v| v.selected_item.as_deref() == Some("PM10")).await;

    // Station B does not measure PM10: the cascade falls back to its first item.
    send(&harness, MonitorCommand::SelectStation { code: 422002 }).await;
    let view = wait_for(&harness.state, |v| {
        v.series.first().map(|p| p.item_name.as_str()) == Some("O3")
    })
    .await;
    assert_eq!(view.selected_item.as_deref(), Some("O3"));
}

#[tokio::test]
async fn manual_refresh_rearms_clock_and_refetches() {
    let mut script = Script::default();
    script.stations = vec![station(422001, "Station A")];
    script.readings.insert(422001, vec![reading("SO2", 0.004)]);
    script
        .series
        .insert((422001, "SO2".to_string()), points("SO2"));

    let harness = start(script, None).await.unwrap();
    let view = wait_for(&harness.state, |v| v.last_refresh_at.is_some()).await;
    let armed_at = view.last_refresh_at.unwrap();
    let readings_before = harness
        .client
        .calls()
        .iter()
        .filter(|c| c.starts_with("readings:"))
        .count();

    tokio::time::sleep(Duration::from_millis(20)).await;
    send(&harness, MonitorCommand::RefreshNow).await;
    let view = wait_for(&harness.state, |v| {
        v.last_refresh_at.map(|at| at > armed_at).unwrap_or(false)
    })
    .await;
    assert!(view.last_refresh_at.unwrap() > armed_at);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let readings_after = harness
        .client
        .calls()
        .iter()
        .filter(|c| c.starts_with("readings:"))
        .count();
    assert!(readings_after > readings_before);
}

#[tokio::test]
async fn readings_failure_is_reported_but_not_fatal() {
    let mut script = Script::default();
    script.stations = vec![station(422001, "Station A"), station(422002, "Station B")];
    // Station A's readings are unscripted and fail; station B works.
    script.readings.insert(422002, vec![reading("O3", 0.02)]);
    script
        .series
        .insert((422002, "O3".to_string()), points("O3"));

    let harness = start(script, None).await.unwrap();
    let view = wait_for(&harness.state, |v| v.last_error.is_some()).await;
    assert!(view.last_error.unwrap().contains("readings fetch failed"));
    assert_eq!(view.stations.len(), 2, "stations survive a readings failure");

    // The loop is still alive and recovers on the next selection.
    send(&harness, MonitorCommand::SelectStation { code: 422002 }).await;
    let view = wait_for(&harness.state, |v| !v.readings.is_empty()).await;
    assert_eq!(view.readings[0].item_code, "O3");
    assert!(view.last_error.is_none(), "error cleared by a successful fetch");
}

#[tokio::test]
async fn empty_readings_skip_the_series_stage() {
    let mut script = Script::default();
    script.stations = vec![station(422001, "Station A")];
    script.readings.insert(422001, Vec::new());

    let harness = start(script, None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let view = harness.state.snapshot().await;
    assert!(view.readings.is_empty());
    assert!(view.last_error.is_none());
    assert!(
        !harness.client.calls().iter().any(|c| c.starts_with("series:")),
        "no series fetch without readings"
    );
}
