use serde::Deserialize;

use crate::domain::{Series, SeriesPoint, normalize_series};
use crate::error::EcoError;

const EMDAT_FALLBACK: &str = include_str!("../../data/fallback/emdat.json");
const CORAL_FALLBACK: &str = include_str!("../../data/fallback/coral_bleaching.json");
const IEA_METHANE_FALLBACK: &str = include_str!("../../data/fallback/iea_methane.json");

/// Curated series used when a source has no live or local data. Shipped as
/// versioned JSON under `data/fallback/`.
#[derive(Debug, Clone, Deserialize)]
pub struct FallbackTable {
    pub version: u32,
    #[serde(default)]
    pub source: Option<String>,
    entries: Vec<FallbackEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FallbackEntry {
    hotspot_id: String,
    metric_key: String,
    series: Vec<SeriesPoint>,
}

impl FallbackTable {
    pub fn emdat() -> Result<Self, EcoError> {
        Self::parse(EMDAT_FALLBACK)
    }

    pub fn coral_bleaching() -> Result<Self, EcoError> {
        Self::parse(CORAL_FALLBACK)
    }

    pub fn iea_methane() -> Result<Self, EcoError> {
        Self::parse(IEA_METHANE_FALLBACK)
    }

    pub fn parse(content: &str) -> Result<Self, EcoError> {
        serde_json::from_str(content)
            .map_err(|err| EcoError::Parse(format!("fallback table: {err}")))
    }

    pub fn empty() -> Self {
        Self {
            version: 0,
            source: None,
            entries: Vec::new(),
        }
    }

    pub fn lookup(&self, hotspot_id: &str, metric_key: &str) -> Option<Series> {
        self.entries
            .iter()
            .find(|entry| entry.hotspot_id == hotspot_id && entry.metric_key == metric_key)
            .map(|entry| normalize_series(entry.series.clone()))
            .filter(|series| !series.is_empty())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shipped_tables_parse() {
        let emdat = FallbackTable::emdat().unwrap();
        let coral = FallbackTable::coral_bleaching().unwrap();
        let methane = FallbackTable::iea_methane().unwrap();
        assert_eq!(emdat.version, 1);
        assert_eq!(methane.len(), 2);
        assert!(!emdat.is_empty());
        let gbr = coral.lookup("hs-003", "bleaching_dhw").unwrap();
        assert_eq!(gbr.first().unwrap().date, "1998");
    }

    #[test]
    fn lookup_is_keyed_by_hotspot_and_metric() {
        let table = FallbackTable::parse(
            r#"{"version":2,"entries":[{"hotspotId":"a","metricKey":"m","series":[{"date":"2001","value":2},{"date":"2000","value":1}]}]}"#,
        )
        .unwrap();
        let series = table.lookup("a", "m").unwrap();
        assert_eq!(series[0], SeriesPoint::new("2000", 1.0));
        assert!(table.lookup("a", "other").is_none());
        assert!(table.lookup("b", "m").is_none());
    }
}
