use std::sync::Arc;

use serde_json::Value;

use crate::domain::{
    RequestDescriptor, Series, SeriesPoint, UnitConversion, YearReduce, aggregate_by_year, round3,
};
use crate::error::EcoError;
use crate::fetchers::extract::{Strategy, first_of, number_field, records, year_field};
use crate::fetchers::{
    FetchOutcome, Fetcher, missing_dependency, not_applicable, upstream_failure,
};
use crate::http::{UpstreamClient, UpstreamRequest};

pub const SOURCE_ID: &str = "gfw_tree_cover_loss";
pub const HANSEN_SOURCE_ID: &str = "hansen_gfc";
pub const QUERY_URL: &str =
    "https://data-api.globalforestwatch.org/dataset/umd_tree_cover_loss/latest/query/json";

const METRIC_PREFIX: &str = "tree_cover_loss";
const CANOPY_THRESHOLD: u32 = 30;
const HECTARES_TO_KHA: f64 = 0.001;

const YEAR_STRATEGIES: &[Strategy<i32>] = &[
    |record| year_field(record, "umd_tree_cover_loss__year"),
    |record| year_field(record, "year"),
];

const VALUE_STRATEGIES: &[Strategy<f64>] = &[
    |record| number_field(record, "area__ha"),
    |record| number_field(record, "loss_ha"),
    |record| number_field(record, "sum"),
    |record| number_field(record, "value"),
];

/// Tree cover loss from the Global Forest Watch data API. Both the GFW and the
/// Hansen source ids route here.
pub struct ForestLossFetcher {
    client: Arc<dyn UpstreamClient>,
    api_key: Option<String>,
    url: String,
}

impl ForestLossFetcher {
    pub fn new(client: Arc<dyn UpstreamClient>, api_key: Option<String>) -> Self {
        Self {
            client,
            api_key,
            url: QUERY_URL.to_string(),
        }
    }

    fn build_request(&self, request: &RequestDescriptor, api_key: &str) -> UpstreamRequest {
        let sql = format!(
            "SELECT umd_tree_cover_loss__year, SUM(area__ha) AS area__ha FROM results \
             WHERE umd_tree_cover_density_2000__threshold >= {CANOPY_THRESHOLD} \
             GROUP BY umd_tree_cover_loss__year"
        );
        UpstreamRequest::get(&self.url)
            .query("sql", sql)
            .query("geometry", request.bbox.to_geojson_polygon())
            .header("x-api-key", api_key)
    }
}

impl Fetcher for ForestLossFetcher {
    fn name(&self) -> &'static str {
        "forest-loss"
    }

    fn fetch(&self, request: &RequestDescriptor) -> Result<Series, FetchOutcome> {
        if !request.metric_key.starts_with(METRIC_PREFIX) {
            return Err(not_applicable(
                self.name(),
                request,
                "forest loss only serves tree cover loss metrics",
            ));
        }
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(missing_dependency(self.name(), request, "GFW_API_KEY not set"));
        };

        let body = self
            .client
            .get_text(&self.build_request(request, api_key))
            .map_err(|err| upstream_failure(self.name(), request, err))?;
        parse_loss(&body).map_err(|err| upstream_failure(self.name(), request, err))
    }
}

/// `{"data": [{"umd_tree_cover_loss__year": 2001, "area__ha": 1234.5}, ...]}`
/// in hectares, reported in kha.
pub fn parse_loss(body: &str) -> Result<Series, EcoError> {
    let payload: Value =
        serde_json::from_str(body).map_err(|err| EcoError::Parse(err.to_string()))?;
    if let Some(status) = payload.get("status").and_then(Value::as_str) {
        if status != "success" {
            let message = payload
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or(status);
            return Err(EcoError::Parse(format!("GFW query failed: {message}")));
        }
    }
    let rows = records(&payload, &["data"]).iter().filter_map(|record| {
        Some((
            first_of(record, YEAR_STRATEGIES)?,
            first_of(record, VALUE_STRATEGIES)?,
        ))
    });
    let conversion = UnitConversion::Factor(HECTARES_TO_KHA);
    Ok(aggregate_by_year(rows, YearReduce::Sum)
        .into_iter()
        .map(|point| SeriesPoint {
            value: round3(conversion.apply(point.value)),
            ..point
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hectares_to_kha() {
        let body = r#"{"status": "success", "data": [
            {"umd_tree_cover_loss__year": 2002, "area__ha": 250.0},
            {"umd_tree_cover_loss__year": 2001, "area__ha": 123456.0},
            {"year": 2002, "loss_ha": 750}
        ]}"#;
        assert_eq!(
            parse_loss(body).unwrap(),
            vec![
                SeriesPoint::annual(2001, 123.456),
                SeriesPoint::annual(2002, 1.0)
            ]
        );
    }

    #[test]
    fn failed_status_is_an_error() {
        let body = r#"{"status": "failed", "message": "Geometry too large"}"#;
        let err = parse_loss(body).unwrap_err();
        assert!(err.to_string().contains("Geometry too large"));
    }
}
