use std::sync::Arc;

use chrono::{Datelike, Utc};
use serde_json::Value;

use crate::domain::{
    RequestDescriptor, Series, SeriesPoint, UnitConversion, YearReduce, aggregate_by_year, round3,
};
use crate::error::EcoError;
use crate::fetchers::extract::{Strategy, first_of, number_field, records, year_field};
use crate::fetchers::{FetchOutcome, Fetcher, not_applicable, upstream_failure};
use crate::http::{UpstreamClient, UpstreamRequest};

pub const SOURCE_ID: &str = "climate_trace";
pub const EMISSIONS_URL: &str = "https://api.climatetrace.org/v6/country/emissions";

const FIRST_YEAR: i32 = 2015;

/// Hotspot → (ISO3 country, Climate TRACE sector).
const HOTSPOT_SCOPES: &[(&str, &str, &str)] = &[
    ("hs-002", "CAN", "fossil-fuel-operations"),
    ("hs-006", "CHN", "power"),
    ("hs-009", "USA", "fossil-fuel-operations"),
];

const RECORD_KEYS: &[&str] = &["emissions", "data", "results"];

const YEAR_STRATEGIES: &[Strategy<i32>] = &[
    |record| year_field(record, "year"),
    |record| year_field(record, "Year"),
    |record| year_field(record, "date"),
    |record| year_field(record, "start_time"),
];

const VALUE_STRATEGIES: &[Strategy<f64>] = &[
    |record| number_field(record, "co2e_100yr"),
    |record| number_field(record, "emissionsQuantity"),
    |record| record.get("emissions").and_then(|nested| number_field(nested, "co2e_100yr")),
    |record| number_field(record, "emissions"),
    |record| number_field(record, "value"),
];

pub struct ClimateTraceFetcher {
    client: Arc<dyn UpstreamClient>,
    url: String,
}

impl ClimateTraceFetcher {
    pub fn new(client: Arc<dyn UpstreamClient>) -> Self {
        Self::with_url(client, EMISSIONS_URL)
    }

    pub fn with_url(client: Arc<dyn UpstreamClient>, url: &str) -> Self {
        Self {
            client,
            url: url.to_string(),
        }
    }

    fn build_request(&self, country: &str, sector: &str) -> UpstreamRequest {
        let last_year = Utc::now().year() - 1;
        UpstreamRequest::get(&self.url)
            .query("countries", country)
            .query("sector", sector)
            .query("since", FIRST_YEAR)
            .query("to", last_year)
    }
}

impl Fetcher for ClimateTraceFetcher {
    fn name(&self) -> &'static str {
        "climate-trace"
    }

    fn fetch(&self, request: &RequestDescriptor) -> Result<Series, FetchOutcome> {
        let Some((_, country, sector)) = HOTSPOT_SCOPES
            .iter()
            .find(|(hotspot, _, _)| request.hotspot_id == *hotspot)
        else {
            return Err(not_applicable(
                self.name(),
                request,
                "no Climate TRACE country/sector scope for hotspot",
            ));
        };

        let body = self
            .client
            .get_text(&self.build_request(country, sector))
            .map_err(|err| upstream_failure(self.name(), request, err))?;
        parse_emissions(&body).map_err(|err| upstream_failure(self.name(), request, err))
    }
}

/// Accepts a flat array of yearly records or one nested under
/// `emissions`/`data`/`results`. Rows for the same year are summed, then the
/// legacy tonnes→Mt rule and 3-decimal rounding apply.
pub fn parse_emissions(body: &str) -> Result<Series, EcoError> {
    let payload: Value =
        serde_json::from_str(body).map_err(|err| EcoError::Parse(err.to_string()))?;
    let rows = records(&payload, RECORD_KEYS).iter().filter_map(|record| {
        let year = first_of(record, YEAR_STRATEGIES)?;
        let value = first_of(record, VALUE_STRATEGIES)?;
        Some((year, value))
    });
    let conversion = UnitConversion::LegacyTonnesToMt;
    Ok(aggregate_by_year(rows, YearReduce::Sum)
        .into_iter()
        .map(|point| SeriesPoint {
            value: round3(conversion.apply(point.value)),
            ..point
        })
        .collect())
}
