use std::sync::{Arc, LazyLock};

use regex::Regex;

use crate::domain::{RequestDescriptor, Series, YearReduce, aggregate_by_year, round3};
use crate::error::EcoError;
use crate::fetchers::{FallbackTable, FetchOutcome, Fetcher, not_applicable, upstream_failure};
use crate::http::{UpstreamClient, UpstreamRequest};

pub const SOURCE_ID: &str = "noaa_crw";
pub const STATION_BASE_URL: &str = "https://coralreefwatch.noaa.gov/product/vs/data";

const METRIC_KEY: &str = "bleaching_dhw";

/// Hotspot → Coral Reef Watch virtual station.
const STATIONS: &[(&str, &str)] = &[
    ("hs-003", "great_barrier_reef_central"),
    ("hs-016", "coral_triangle_sulu_sea"),
];

// YYYY MM DD SST_MIN SST_MAX SST@90th_HS SSTA@90th_HS 90th_HS>0 DHW_from_90th_HS>1 BAA_7day_max
const YEAR_COL: usize = 0;
const DHW_COL: usize = 8;

static DATA_ROW: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}\s").expect("static data row pattern"));

/// Peak degree heating weeks per year from a virtual-station time series,
/// falling back to curated bleaching-event peaks when the station is down.
pub struct CoralBleachingFetcher {
    client: Arc<dyn UpstreamClient>,
    fallback: FallbackTable,
    base_url: String,
}

impl CoralBleachingFetcher {
    pub fn new(client: Arc<dyn UpstreamClient>, fallback: FallbackTable) -> Self {
        Self::with_base_url(client, fallback, STATION_BASE_URL)
    }

    pub fn with_base_url(
        client: Arc<dyn UpstreamClient>,
        fallback: FallbackTable,
        base_url: &str,
    ) -> Self {
        Self {
            client,
            fallback,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn live(&self, station: &str) -> Result<Series, EcoError> {
        let url = format!("{}/{station}.txt", self.base_url);
        let text = self.client.get_text(&UpstreamRequest::get(url))?;
        let series = annual_peak_dhw(&text);
        if series.is_empty() {
            return Err(EcoError::Parse(format!(
                "station {station} returned no readable rows"
            )));
        }
        Ok(series)
    }
}

impl Fetcher for CoralBleachingFetcher {
    fn name(&self) -> &'static str {
        "coral-bleaching"
    }

    fn fetch(&self, request: &RequestDescriptor) -> Result<Series, FetchOutcome> {
        if request.metric_key != METRIC_KEY {
            return Err(not_applicable(
                self.name(),
                request,
                "Coral Reef Watch only serves degree heating weeks",
            ));
        }
        let Some((_, station)) = STATIONS
            .iter()
            .find(|(hotspot, _)| request.hotspot_id == *hotspot)
        else {
            return Err(not_applicable(
                self.name(),
                request,
                "no virtual station for hotspot",
            ));
        };

        match self.live(station) {
            Ok(series) => Ok(series),
            Err(err) => match self.fallback.lookup(&request.hotspot_id, &request.metric_key) {
                Some(series) => {
                    tracing::warn!(
                        hotspot = %request.hotspot_id,
                        station,
                        error = %err,
                        "station unavailable, using curated bleaching peaks"
                    );
                    Ok(series)
                }
                None => Err(upstream_failure(self.name(), request, err)),
            },
        }
    }
}

/// Keeps rows that start with a four-digit year and reduces the DHW column to
/// its yearly maximum.
pub fn annual_peak_dhw(text: &str) -> Series {
    let rows = text
        .lines()
        .map(str::trim)
        .filter(|line| DATA_ROW.is_match(line))
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            let year = cols.get(YEAR_COL)?.parse::<i32>().ok()?;
            let dhw = cols.get(DHW_COL)?.parse::<f64>().ok()?;
            (dhw >= 0.0).then_some((year, dhw))
        });
    aggregate_by_year(rows, YearReduce::Max)
        .into_iter()
        .map(|mut point| {
            point.value = round3(point.value);
            point
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SeriesPoint;

    struct Offline;

    impl UpstreamClient for Offline {
        fn get_text(&self, _request: &UpstreamRequest) -> Result<String, EcoError> {
            Err(EcoError::Http("connection refused".into()))
        }
    }

    const STATION: &str = "\
Name:
Great Barrier Reef Central
Polygon Middle Longitude: 147.0
YYYY MM DD SST_MIN SST_MAX SST@90th_HS SSTA@90th_HS 90th_HS>0 DHW_from_90th_HS>1 BAA_7day_max
2020 01 01 28.10 28.90 28.50 0.40 0.40 3.0 1
2020 06 01 27.00 27.80 27.40 0.10 0.10 8.5 2
2020 12 01 27.90 28.60 28.20 0.30 0.30 2.0 1
2021 03 01 28.00 28.40 28.10 0.20 0.20 1.25 0
";

    #[test]
    fn reduces_to_annual_maximum() {
        assert_eq!(
            annual_peak_dhw(STATION),
            vec![SeriesPoint::annual(2020, 8.5), SeriesPoint::annual(2021, 1.25)]
        );
    }

    #[test]
    fn offline_station_uses_curated_peaks() {
        let fetcher = CoralBleachingFetcher::new(
            Arc::new(Offline),
            FallbackTable::coral_bleaching().unwrap(),
        );
        let request = RequestDescriptor::new("hs-003", METRIC_KEY, -18.0, 147.0);
        let series = fetcher.fetch(&request).unwrap();
        assert_eq!(series[0], SeriesPoint::annual(1998, 6.5));
    }

    #[test]
    fn offline_without_fallback_is_upstream_failure() {
        let fetcher = CoralBleachingFetcher::new(Arc::new(Offline), FallbackTable::empty());
        let request = RequestDescriptor::new("hs-016", METRIC_KEY, 5.0, 120.0);
        assert!(matches!(
            fetcher.fetch(&request),
            Err(FetchOutcome::UpstreamFailure(_))
        ));
    }
}
