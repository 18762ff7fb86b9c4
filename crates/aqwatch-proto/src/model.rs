use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::client::FetchError;

/// Elapsed seconds after which a reading is considered stale.
pub const STALE_AFTER_SECS: i64 = 2 * 60 * 60;

/// A fixed physical measurement site.  The station set is loaded once at
/// startup and never refreshed on timer ticks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Station {
    pub code: u32,
    pub name: String,
}

/// Latest measured value for one substance at one station.  The whole set is
/// replaced on every refresh; entries never survive a station switch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub item_code: String,
    pub item_name: String,
    pub unit: String,
    pub concentration: f64,
    pub measured_at: NaiveDateTime,
}

impl Reading {
    /// True when the reading's measurement time is at least two hours in the
    /// past.  Derived at snapshot time, never stored.
    pub fn is_stale(&self, now: NaiveDateTime) -> bool {
        now.signed_duration_since(self.measured_at).num_seconds() >= STALE_AFTER_SECS
    }
}

/// One point of the 72-hour history for a (station, substance) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub measured_at: NaiveDateTime,
    pub concentration: f64,
    pub item_name: String,
    pub unit: String,
}

/// Outcome of a time-series fetch.  The remote signals "nothing to chart"
/// with a sentinel row rather than an empty list or an error, so absence is
/// modelled explicitly and never parsed into a malformed point.
#[derive(Debug, Clone, PartialEq)]
pub enum SeriesFetch {
    Points(Vec<TimeSeriesPoint>),
    NoData,
}

// ── Wire rows ─────────────────────────────────────────────────────────────────

/// Sentinel string the remote places in `rstList` when a series is empty.
const NO_DATA_SENTINEL: &str = "NO DATA";

/// Response envelope for all three `datas.do` pages.  `rstList` is left as a
/// raw value because the series page reuses it for both data rows and the
/// NO DATA sentinel.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    #[serde(rename = "rstList", default)]
    pub rst_list: Option<serde_json::Value>,
    #[serde(rename = "rstList2", default)]
    pub rst_list2: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct StationRow {
    sitecd: u32,
    site: String,
}

#[derive(Debug, Deserialize)]
struct ReadingRow {
    #[serde(rename = "itemCd")]
    item_cd: String,
    #[serde(rename = "itemNm")]
    item_nm: String,
    #[serde(rename = "itemUnit", default)]
    item_unit: String,
    conc: f64,
    mdatetime: String,
}

#[derive(Debug, Deserialize)]
struct SeriesRow {
    mdatetime: String,
    conc: f64,
    #[serde(rename = "itemNm", default)]
    item_nm: String,
    #[serde(rename = "itemUnit", default)]
    item_unit: String,
}

/// Timestamp formats observed on the wire.  Readings use dashed datetimes,
/// series rows use slashed ones; hour-only series rows are handled by the
/// fallback in [`parse_wire_time`] since chrono cannot fill in minutes.
const WIRE_TIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
];

fn parse_wire_time(raw: &str) -> Result<NaiveDateTime, FetchError> {
    let raw = raw.trim();
    for fmt in WIRE_TIME_FORMATS {
        if let Ok(t) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(t);
        }
    }
    // Hour-only rows ("2026/08/28 09"): chrono refuses a datetime format
    // with no minutes field, so split off the hour and parse the date alone.
    if let Some((date, hour)) = raw.rsplit_once(' ') {
        if let (Ok(date), Ok(hour)) = (
            NaiveDate::parse_from_str(date.trim(), "%Y/%m/%d"),
            hour.trim().parse::<u32>(),
        ) {
            if let Some(t) = date.and_hms_opt(hour, 0, 0) {
                return Ok(t);
            }
        }
    }
    Err(FetchError::Malformed(format!(
        "unparseable measurement time {raw:?}"
    )))
}

fn take_rows<T: serde::de::DeserializeOwned>(
    value: Option<serde_json::Value>,
    field: &str,
) -> Result<Vec<T>, FetchError> {
    let value = value.ok_or_else(|| FetchError::Malformed(format!("missing {field}")))?;
    serde_json::from_value(value)
        .map_err(|e| FetchError::Malformed(format!("bad {field} rows: {e}")))
}

/// Parse the `caq/site` response into the station set.
pub fn parse_stations(envelope: Envelope) -> Result<Vec<Station>, FetchError> {
    let rows: Vec<StationRow> = take_rows(envelope.rst_list, "rstList")?;
    Ok(rows
        .into_iter()
        .map(|r| Station {
            code: r.sitecd,
            name: r.site,
        })
        .collect())
}

/// Parse the `caq/selectlastdata1` response into the current readings.
pub fn parse_readings(envelope: Envelope) -> Result<Vec<Reading>, FetchError> {
    let rows: Vec<ReadingRow> = take_rows(envelope.rst_list2, "rstList2")?;
    rows.into_iter()
        .map(|r| {
            Ok(Reading {
                measured_at: parse_wire_time(&r.mdatetime)?,
                item_code: r.item_cd,
                item_name: r.item_nm,
                unit: r.item_unit,
                concentration: r.conc,
            })
        })
        .collect()
}

/// Parse the `caq/selectlast72hour` response.  A leading `"NO DATA"` string
/// in `rstList` is the remote's empty-series sentinel.
pub fn parse_series(envelope: Envelope) -> Result<SeriesFetch, FetchError> {
    let value = envelope
        .rst_list
        .ok_or_else(|| FetchError::Malformed("missing rstList".into()))?;

    if let Some(first) = value.as_array().and_then(|a| a.first()) {
        if first.as_str() == Some(NO_DATA_SENTINEL) {
            return Ok(SeriesFetch::NoData);
        }
    }

    let rows: Vec<SeriesRow> = serde_json::from_value(value)
        .map_err(|e| FetchError::Malformed(format!("bad rstList rows: {e}")))?;
    let points = rows
        .into_iter()
        .map(|r| {
            Ok(TimeSeriesPoint {
                measured_at: parse_wire_time(&r.mdatetime)?,
                concentration: r.conc,
                item_name: r.item_nm,
                unit: r.item_unit,
            })
        })
        .collect::<Result<Vec<_>, FetchError>>()?;
    Ok(SeriesFetch::Points(points))
}
