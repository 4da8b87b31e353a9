use std::collections::BTreeMap;
use std::fmt;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// One observation of a metric. `date` is either `YYYY` (annual cadence) or
/// `YYYY-MM-DD` (monthly/daily cadence).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub date: String,
    pub value: f64,
}

impl SeriesPoint {
    pub fn new(date: impl Into<String>, value: f64) -> Self {
        Self {
            date: date.into(),
            value,
        }
    }

    pub fn annual(year: i32, value: f64) -> Self {
        Self::new(format!("{year:04}"), value)
    }

    pub fn monthly(year: i32, month: u32, value: f64) -> Self {
        Self::new(format!("{year:04}-{month:02}-01"), value)
    }
}

pub type Series = Vec<SeriesPoint>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HotspotType {
    Driver,
    Impact,
}

impl fmt::Display for HotspotType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HotspotType::Driver => write!(f, "driver"),
            HotspotType::Impact => write!(f, "impact"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricStatus {
    Implemented,
    Planned,
}

/// `[lonMin, latMin, lonMax, latMax]` in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BoundingBox {
    pub lon_min: f64,
    pub lat_min: f64,
    pub lon_max: f64,
    pub lat_max: f64,
}

pub const DEFAULT_BBOX_RADIUS_DEG: f64 = 2.0;

impl BoundingBox {
    pub fn around(lat: f64, lng: f64, radius: f64) -> Self {
        Self {
            lon_min: lng - radius,
            lat_min: lat - radius,
            lon_max: lng + radius,
            lat_max: lat + radius,
        }
    }

    pub fn to_arg(&self) -> String {
        format!(
            "{},{},{},{}",
            self.lon_min, self.lat_min, self.lon_max, self.lat_max
        )
    }

    /// Closed GeoJSON polygon ring, counter-clockwise from the south-west corner.
    pub fn to_geojson_polygon(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "Polygon",
            "coordinates": [[
                [self.lon_min, self.lat_min],
                [self.lon_max, self.lat_min],
                [self.lon_max, self.lat_max],
                [self.lon_min, self.lat_max],
                [self.lon_min, self.lat_min],
            ]],
        })
    }
}

impl From<[f64; 4]> for BoundingBox {
    fn from(value: [f64; 4]) -> Self {
        Self {
            lon_min: value[0],
            lat_min: value[1],
            lon_max: value[2],
            lat_max: value[3],
        }
    }
}

impl From<BoundingBox> for [f64; 4] {
    fn from(value: BoundingBox) -> Self {
        [value.lon_min, value.lat_min, value.lon_max, value.lat_max]
    }
}

/// Input handed to every fetcher. Built fresh by the orchestrator for each
/// (hotspot, metric) entry.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    pub hotspot_id: String,
    pub metric_key: String,
    pub lat: f64,
    pub lng: f64,
    pub bbox: BoundingBox,
    pub unit: Option<String>,
    pub sources: Vec<String>,
}

impl RequestDescriptor {
    pub fn new(hotspot_id: &str, metric_key: &str, lat: f64, lng: f64) -> Self {
        Self {
            hotspot_id: hotspot_id.to_string(),
            metric_key: metric_key.to_string(),
            lat,
            lng,
            bbox: BoundingBox::around(lat, lng, DEFAULT_BBOX_RADIUS_DEG),
            unit: None,
            sources: Vec::new(),
        }
    }

    pub fn unit_is_megatonnes(&self) -> bool {
        self.unit
            .as_deref()
            .map(|unit| unit.trim_start().starts_with("Mt"))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DateKey {
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

/// Parses `YYYY`, `YYYY-MM` or `YYYY-MM-DD` (anything after the first ten
/// characters, such as a time component, is ignored).
pub fn date_key(date: &str) -> Option<DateKey> {
    let date = date.trim();
    if date.len() == 4 {
        let year = date.parse::<i32>().ok()?;
        return Some(DateKey {
            year,
            month: 0,
            day: 0,
        });
    }
    if date.len() == 7 {
        let (year, month) = date.split_once('-')?;
        let month = month.parse::<u32>().ok().filter(|m| (1..=12).contains(m))?;
        return Some(DateKey {
            year: year.parse().ok()?,
            month,
            day: 0,
        });
    }
    let head = date.get(..10)?;
    let parsed = NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()?;
    Some(DateKey {
        year: parsed.year(),
        month: parsed.month(),
        day: parsed.day(),
    })
}

/// Sorts ascending by parsed date and keeps the last value written for a
/// repeated date. Points with an unparseable date or a non-finite value are
/// dropped.
pub fn normalize_series(points: Series) -> Series {
    let mut by_date: BTreeMap<DateKey, SeriesPoint> = BTreeMap::new();
    for point in points {
        if !point.value.is_finite() {
            continue;
        }
        if let Some(key) = date_key(&point.date) {
            by_date.insert(key, point);
        }
    }
    by_date.into_values().collect()
}

pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnitConversion {
    Identity,
    Factor(f64),
    /// Values above 1,000,000 are assumed to be raw tonnes and divided down
    /// to megatonnes; smaller values are assumed to already be in Mt.
    LegacyTonnesToMt,
}

pub const LEGACY_TONNES_THRESHOLD: f64 = 1_000_000.0;

impl UnitConversion {
    pub fn apply(&self, value: f64) -> f64 {
        match self {
            UnitConversion::Identity => value,
            UnitConversion::Factor(factor) => value * factor,
            UnitConversion::LegacyTonnesToMt => {
                if value > LEGACY_TONNES_THRESHOLD {
                    value / 1_000_000.0
                } else {
                    value
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YearReduce {
    Sum,
    Max,
}

/// Collapses `(year, value)` observations into one annual point per year.
pub fn aggregate_by_year<I>(rows: I, reduce: YearReduce) -> Series
where
    I: IntoIterator<Item = (i32, f64)>,
{
    let mut years: BTreeMap<i32, f64> = BTreeMap::new();
    for (year, value) in rows {
        if !value.is_finite() {
            continue;
        }
        years
            .entry(year)
            .and_modify(|current| match reduce {
                YearReduce::Sum => *current += value,
                YearReduce::Max => *current = current.max(value),
            })
            .or_insert(value);
    }
    years
        .into_iter()
        .map(|(year, value)| SeriesPoint::annual(year, value))
        .collect()
}

/// Year prefix of a `YYYY...` date string.
pub fn year_of(date: &str) -> Option<i32> {
    date_key(date).map(|key| key.year)
}
