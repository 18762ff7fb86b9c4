//! Remote data client for the measurement service.
//!
//! All three data categories go through one POST endpoint discriminated by a
//! `page` field in the JSON body.  The orchestrator is generic over
//! [`DataClient`] so tests can script responses; [`HttpDataClient`] is the
//! production reqwest implementation.  Failures surface as [`FetchError`]
//! with no retry; the caller decides what is fatal.

use std::future::Future;
use std::time::Duration;

use serde_json::json;
use thiserror::Error;
use tracing::debug;

use crate::model::{
    parse_readings, parse_series, parse_stations, Envelope, Reading, SeriesFetch, Station,
};

/// Request path shared by all three pages.
pub const DATA_PATH: &str = "/caqis/srch/datas.do";

pub const PAGE_STATIONS: &str = "caq/site";
pub const PAGE_READINGS: &str = "caq/selectlastdata1";
pub const PAGE_SERIES: &str = "caq/selectlast72hour";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("remote returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("malformed response: {0}")]
    Malformed(String),
}

pub trait DataClient: Send + Sync + 'static {
    fn fetch_stations(
        &self,
        site_filter: &str,
    ) -> impl Future<Output = Result<Vec<Station>, FetchError>> + Send;

    fn fetch_readings(
        &self,
        station_code: u32,
    ) -> impl Future<Output = Result<Vec<Reading>, FetchError>> + Send;

    fn fetch_series(
        &self,
        station_code: u32,
        item_code: &str,
    ) -> impl Future<Output = Result<SeriesFetch, FetchError>> + Send;
}

// ── Request bodies ────────────────────────────────────────────────────────────

/// `sitecd` doubles as a filter on the station page: a concrete code narrows
/// the list, `"all"` returns every station.
pub fn stations_body(site_filter: &str) -> serde_json::Value {
    json!({ "page": PAGE_STATIONS, "sitecd": site_filter })
}

pub fn readings_body(station_code: u32) -> serde_json::Value {
    json!({ "page": PAGE_READINGS, "sitecd": station_code })
}

pub fn series_body(station_code: u32, item_code: &str) -> serde_json::Value {
    json!({ "page": PAGE_SERIES, "sitecd": station_code, "itemcd": item_code })
}

// ── HTTP implementation ───────────────────────────────────────────────────────

pub struct HttpDataClient {
    http: reqwest::Client,
    url: String,
}

impl HttpDataClient {
    pub fn new(base_url: &str) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            url: format!("{}{}", base_url.trim_end_matches('/'), DATA_PATH),
        })
    }

    async fn post(&self, body: serde_json::Value) -> Result<Envelope, FetchError> {
        debug!(page = body["page"].as_str().unwrap_or(""), "posting data request");
        let response = self.http.post(&self.url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(FetchError::Status(response.status()));
        }
        let envelope = response
            .json::<Envelope>()
            .await
            .map_err(|e| FetchError::Malformed(format!("bad envelope: {e}")))?;
        Ok(envelope)
    }
}

impl DataClient for HttpDataClient {
    async fn fetch_stations(&self, site_filter: &str) -> Result<Vec<Station>, FetchError> {
        let envelope = self.post(stations_body(site_filter)).await?;
        parse_stations(envelope)
    }

    async fn fetch_readings(&self, station_code: u32) -> Result<Vec<Reading>, FetchError> {
        let envelope = self.post(readings_body(station_code)).await?;
        parse_readings(envelope)
    }

    async fn fetch_series(
        &self,
        station_code: u32,
        item_code: &str,
    ) -> Result<SeriesFetch, FetchError> {
        let envelope = self.post(series_body(station_code, item_code)).await?;
        parse_series(envelope)
    }
}
