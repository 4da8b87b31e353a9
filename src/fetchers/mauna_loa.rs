use std::sync::Arc;

use crate::domain::{RequestDescriptor, Series, SeriesPoint, normalize_series, round3};
use crate::fetchers::{FetchOutcome, Fetcher, not_applicable, upstream_failure};
use crate::http::{UpstreamClient, UpstreamRequest};

pub const SOURCE_ID: &str = "noaa_mauna_loa";
pub const MONTHLY_URL: &str = "https://gml.noaa.gov/webdata/ccgg/trends/co2/co2_mm_mlo.txt";

const APPLICABLE: &[(&str, &str)] = &[("global-atmosphere", "co2_ppm")];

// year month decimal-date average de-seasonalized #days st.dev unc
const YEAR_COL: usize = 0;
const MONTH_COL: usize = 1;
const AVERAGE_COL: usize = 3;
const MISSING: f64 = -99.99;

pub struct MaunaLoaFetcher {
    client: Arc<dyn UpstreamClient>,
    url: String,
}

impl MaunaLoaFetcher {
    pub fn new(client: Arc<dyn UpstreamClient>) -> Self {
        Self::with_url(client, MONTHLY_URL)
    }

    pub fn with_url(client: Arc<dyn UpstreamClient>, url: &str) -> Self {
        Self {
            client,
            url: url.to_string(),
        }
    }
}

impl Fetcher for MaunaLoaFetcher {
    fn name(&self) -> &'static str {
        "mauna-loa"
    }

    fn fetch(&self, request: &RequestDescriptor) -> Result<Series, FetchOutcome> {
        let applicable = APPLICABLE.iter().any(|(hotspot, metric)| {
            request.hotspot_id == *hotspot && request.metric_key == *metric
        });
        if !applicable {
            return Err(not_applicable(
                self.name(),
                request,
                "Mauna Loa only feeds the global CO2 record",
            ));
        }

        let text = self
            .client
            .get_text(&UpstreamRequest::get(&self.url))
            .map_err(|err| upstream_failure(self.name(), request, err))?;
        Ok(parse_monthly_means(&text))
    }
}

/// Whitespace-delimited monthly file. Comment lines, short or non-numeric rows
/// and the missing-value sentinel are dropped.
pub fn parse_monthly_means(text: &str) -> Series {
    let points = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            let year = cols.get(YEAR_COL)?.parse::<i32>().ok()?;
            let month = cols
                .get(MONTH_COL)?
                .parse::<u32>()
                .ok()
                .filter(|month| (1..=12).contains(month))?;
            let value = cols.get(AVERAGE_COL)?.parse::<f64>().ok()?;
            if is_missing(value) {
                return None;
            }
            Some(SeriesPoint::monthly(year, month, round3(value)))
        })
        .collect();
    normalize_series(points)
}

fn is_missing(value: f64) -> bool {
    (value - MISSING).abs() < 1e-9 || value < 0.0
}
