use std::fs;

use camino::Utf8PathBuf;

use crate::csv::{Table, cell, number};
use crate::domain::{RequestDescriptor, Series, YearReduce, aggregate_by_year};
use crate::error::EcoError;
use crate::fetchers::{
    FallbackTable, FetchOutcome, Fetcher, missing_dependency, not_applicable, upstream_failure,
};

pub const SOURCE_ID: &str = "emdat";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisasterScope {
    pub hotspot_id: &'static str,
    pub iso3: &'static [&'static str],
    pub disaster_types: &'static [&'static str],
    /// Substring the `Location` column must contain, for sub-national hotspots.
    pub location: Option<&'static str>,
}

const SCOPES: &[DisasterScope] = &[
    DisasterScope {
        hotspot_id: "hs-007",
        iso3: &["MLI", "NER", "BFA", "TCD", "MRT", "SEN"],
        disaster_types: &["Drought"],
        location: None,
    },
    DisasterScope {
        hotspot_id: "hs-008",
        iso3: &["BGD"],
        disaster_types: &["Flood", "Storm"],
        location: None,
    },
    DisasterScope {
        hotspot_id: "hs-011",
        iso3: &["USA"],
        disaster_types: &["Wildfire"],
        location: Some("California"),
    },
    DisasterScope {
        hotspot_id: "hs-015",
        iso3: &["PAK"],
        disaster_types: &["Flood"],
        location: None,
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Measure {
    Events,
    Deaths,
    Affected,
}

impl Measure {
    pub fn for_metric(metric_key: &str) -> Option<Self> {
        if metric_key.ends_with("_events") {
            Some(Measure::Events)
        } else if metric_key.ends_with("_deaths") {
            Some(Measure::Deaths)
        } else if metric_key.ends_with("_affected") {
            Some(Measure::Affected)
        } else {
            None
        }
    }
}

/// Disaster counts and impacts from a local EM-DAT export, with a curated
/// table standing in when no export is present.
pub struct EmdatFetcher {
    csv_path: Utf8PathBuf,
    fallback: FallbackTable,
}

impl EmdatFetcher {
    pub fn new(csv_path: Utf8PathBuf, fallback: FallbackTable) -> Self {
        Self { csv_path, fallback }
    }
}

impl Fetcher for EmdatFetcher {
    fn name(&self) -> &'static str {
        "emdat"
    }

    fn fetch(&self, request: &RequestDescriptor) -> Result<Series, FetchOutcome> {
        let Some(scope) = scope_for(&request.hotspot_id) else {
            return Err(not_applicable(
                self.name(),
                request,
                "no EM-DAT country scope for hotspot",
            ));
        };
        let Some(measure) = Measure::for_metric(&request.metric_key) else {
            return Err(not_applicable(
                self.name(),
                request,
                "metric is not an event, death or affected count",
            ));
        };

        if !self.csv_path.as_std_path().is_file() {
            return match self.fallback.lookup(&request.hotspot_id, &request.metric_key) {
                Some(series) => {
                    tracing::info!(
                        hotspot = %request.hotspot_id,
                        metric = %request.metric_key,
                        "no EM-DAT export, using curated fallback"
                    );
                    Ok(series)
                }
                None => Err(missing_dependency(
                    self.name(),
                    request,
                    format!("no EM-DAT export at {} and no curated fallback", self.csv_path),
                )),
            };
        }

        let text = fs::read_to_string(self.csv_path.as_std_path())
            .map_err(|err| EcoError::Filesystem(format!("read {}: {err}", self.csv_path)))
            .map_err(|err| upstream_failure(self.name(), request, err))?;
        aggregate_disasters(&text, scope, measure)
            .map_err(|err| upstream_failure(self.name(), request, err))
    }
}

/// Sums matching disaster rows per start year.
pub fn aggregate_disasters(
    text: &str,
    scope: &DisasterScope,
    measure: Measure,
) -> Result<Series, EcoError> {
    let table = Table::parse(text)?;
    let year_col = table.require_column(&["Start Year", "Year"])?;
    let iso_col = table.require_column(&["ISO", "ISO3", "Country ISO"])?;
    let type_col = table.require_column(&["Disaster Type"])?;
    let location_col = table.column(&["Location"]);
    let value_col = match measure {
        Measure::Events => None,
        Measure::Deaths => Some(table.require_column(&["Total Deaths"])?),
        Measure::Affected => Some(table.require_column(&["Total Affected"])?),
    };

    let rows = table.rows().iter().filter_map(|row| {
        let iso = cell(row, iso_col)?;
        if !scope.iso3.iter().any(|code| code.eq_ignore_ascii_case(iso)) {
            return None;
        }
        let kind = cell(row, type_col)?;
        if !scope
            .disaster_types
            .iter()
            .any(|wanted| wanted.eq_ignore_ascii_case(kind))
        {
            return None;
        }
        if let Some(needle) = scope.location {
            let location = location_col.and_then(|col| cell(row, col))?;
            if !location.to_lowercase().contains(&needle.to_lowercase()) {
                return None;
            }
        }
        let year = cell(row, year_col)?.parse::<i32>().ok()?;
        let value = match value_col {
            None => 1.0,
            Some(col) => number(row, col)?,
        };
        Some((year, value))
    });
    Ok(aggregate_by_year(rows, YearReduce::Sum))
}

pub fn scope_for(hotspot_id: &str) -> Option<&'static DisasterScope> {
    SCOPES.iter().find(|scope| scope.hotspot_id == hotspot_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SeriesPoint;

    const EXPORT: &str = "\
DisNo.,Disaster Type,ISO,Country,Location,Start Year,Total Deaths,Total Affected
2020-0001-BGD,Flood,BGD,Bangladesh,\"Sylhet, Sunamganj\",2020,45,\"1,200,000\"
2020-0002-BGD,Storm,BGD,Bangladesh,Khulna,2020,26,800000
2019-0003-BGD,Flood,BGD,Bangladesh,Dhaka,2019,,50000
2020-0004-IND,Flood,IND,India,Assam,2020,120,2000000
2020-0005-USA,Wildfire,USA,United States of America,\"Oregon, California\",2020,31,
2020-0006-USA,Wildfire,USA,United States of America,Colorado,2020,2,
";

    #[test]
    fn counts_events_per_year() {
        let scope = scope_for("hs-008").unwrap();
        let series = aggregate_disasters(EXPORT, scope, Measure::Events).unwrap();
        assert_eq!(
            series,
            vec![SeriesPoint::annual(2019, 1.0), SeriesPoint::annual(2020, 2.0)]
        );
    }

    #[test]
    fn sums_deaths_and_skips_blank_cells() {
        let scope = scope_for("hs-008").unwrap();
        let series = aggregate_disasters(EXPORT, scope, Measure::Deaths).unwrap();
        assert_eq!(series, vec![SeriesPoint::annual(2020, 71.0)]);
        let affected = aggregate_disasters(EXPORT, scope, Measure::Affected).unwrap();
        assert_eq!(affected[1], SeriesPoint::annual(2020, 2_000_000.0));
    }

    #[test]
    fn location_filter_for_subnational_scope() {
        let scope = scope_for("hs-011").unwrap();
        let series = aggregate_disasters(EXPORT, scope, Measure::Events).unwrap();
        assert_eq!(series, vec![SeriesPoint::annual(2020, 1.0)]);
    }

    #[test]
    fn multiline_location_keeps_its_event() {
        let export = "\
Disaster Type,ISO,Location,Start Year,Total Deaths
Flood,BGD,\"Sylhet,\nSunamganj\",2020,45
Flood,BGD,Dhaka,2019,10
";
        let scope = scope_for("hs-008").unwrap();
        let series = aggregate_disasters(export, scope, Measure::Deaths).unwrap();
        assert_eq!(
            series,
            vec![SeriesPoint::annual(2019, 10.0), SeriesPoint::annual(2020, 45.0)]
        );
    }

    #[test]
    fn measure_from_metric_suffix() {
        assert_eq!(Measure::for_metric("flood_deaths"), Some(Measure::Deaths));
        assert_eq!(Measure::for_metric("co2_emissions_mt"), None);
    }
}
