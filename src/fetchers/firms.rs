use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;

use crate::csv::{Table, cell};
use crate::domain::{RequestDescriptor, Series, SeriesPoint};
use crate::error::EcoError;
use crate::fetchers::{
    FetchOutcome, Fetcher, missing_dependency, not_applicable, upstream_failure,
};
use crate::http::{UpstreamClient, UpstreamRequest};

pub const SOURCE_ID: &str = "nasa_firms";
pub const AREA_API: &str = "https://firms.modaps.eosdis.nasa.gov/api/area/csv";

const METRIC_KEY: &str = "fire_detections";
const PRODUCT: &str = "VIIRS_SNPP_NRT";
/// The area API caps a single request at ten days.
const DAY_RANGE: u32 = 10;

/// Daily active-fire detection counts inside the request bbox.
pub struct FirmsFetcher {
    client: Arc<dyn UpstreamClient>,
    map_key: Option<String>,
    base_url: String,
}

impl FirmsFetcher {
    pub fn new(client: Arc<dyn UpstreamClient>, map_key: Option<String>) -> Self {
        Self {
            client,
            map_key,
            base_url: AREA_API.to_string(),
        }
    }

    fn area_url(&self, map_key: &str, request: &RequestDescriptor) -> String {
        format!(
            "{}/{map_key}/{PRODUCT}/{}/{DAY_RANGE}",
            self.base_url,
            request.bbox.to_arg()
        )
    }
}

impl Fetcher for FirmsFetcher {
    fn name(&self) -> &'static str {
        "firms"
    }

    fn fetch(&self, request: &RequestDescriptor) -> Result<Series, FetchOutcome> {
        if request.metric_key != METRIC_KEY {
            return Err(not_applicable(
                self.name(),
                request,
                "FIRMS only serves fire detection counts",
            ));
        }
        let Some(map_key) = self.map_key.as_deref() else {
            return Err(missing_dependency(self.name(), request, "FIRMS_MAP_KEY not set"));
        };

        let body = self
            .client
            .get_text(&UpstreamRequest::get(self.area_url(map_key, request)))
            .map_err(|err| upstream_failure(self.name(), request, err))?;
        count_detections(&body).map_err(|err| upstream_failure(self.name(), request, err))
    }
}

/// Counts rows per `acq_date`. FIRMS answers invalid keys and quota errors
/// with a plain-text line instead of CSV, which surfaces as a missing column.
pub fn count_detections(body: &str) -> Result<Series, EcoError> {
    let table = Table::parse(body)?;
    let date_col = table.require_column(&["acq_date"])?;
    let mut per_day: BTreeMap<NaiveDate, u64> = BTreeMap::new();
    for row in table.rows() {
        let Some(date) = cell(row, date_col)
            .and_then(|value| NaiveDate::parse_from_str(value, "%Y-%m-%d").ok())
        else {
            continue;
        };
        *per_day.entry(date).or_default() += 1;
    }
    Ok(per_day
        .into_iter()
        .map(|(date, count)| {
            SeriesPoint::new(date.format("%Y-%m-%d").to_string(), count as f64)
        })
        .collect())
}
