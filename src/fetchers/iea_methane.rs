use std::fs;

use camino::Utf8PathBuf;

use crate::csv::{Table, cell, number};
use crate::domain::{
    RequestDescriptor, Series, SeriesPoint, UnitConversion, YearReduce, aggregate_by_year, round3,
};
use crate::error::EcoError;
use crate::fetchers::{
    FallbackTable, FetchOutcome, Fetcher, missing_dependency, not_applicable, upstream_failure,
};

pub const SOURCE_ID: &str = "src-iea-methane";

const KT_TO_MT: f64 = 0.001;

/// Which rows of the methane tracker export belong to a hotspot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethaneSelector {
    pub hotspot_id: String,
    pub countries: Vec<String>,
    /// Estimate provider in the `source` column.
    pub source: String,
    pub kind: String,
    pub segment: String,
    pub reason: String,
}

impl MethaneSelector {
    /// IEA's own energy-sector total for the listed countries.
    pub fn energy_total(hotspot_id: &str, countries: &[&str]) -> Self {
        Self {
            hotspot_id: hotspot_id.to_string(),
            countries: countries.iter().map(|country| country.to_string()).collect(),
            source: "IEA".to_string(),
            kind: "Energy".to_string(),
            segment: "Total".to_string(),
            reason: "All".to_string(),
        }
    }
}

pub fn default_selectors() -> Vec<MethaneSelector> {
    vec![
        MethaneSelector::energy_total("hs-009", &["Russia"]),
        MethaneSelector::energy_total(
            "hs-013",
            &[
                "Saudi Arabia",
                "Qatar",
                "United Arab Emirates",
                "Kuwait",
                "Bahrain",
                "Iran",
            ],
        ),
    ]
}

/// Annual methane emissions from a local IEA Global Methane Tracker export
/// (kt), reported in Mt. A curated table stands in when no export is present.
pub struct IeaMethaneFetcher {
    csv_path: Utf8PathBuf,
    fallback: FallbackTable,
    selectors: Vec<MethaneSelector>,
}

impl IeaMethaneFetcher {
    pub fn new(csv_path: Utf8PathBuf, fallback: FallbackTable) -> Self {
        Self::with_selectors(csv_path, fallback, default_selectors())
    }

    pub fn with_selectors(
        csv_path: Utf8PathBuf,
        fallback: FallbackTable,
        selectors: Vec<MethaneSelector>,
    ) -> Self {
        Self {
            csv_path,
            fallback,
            selectors,
        }
    }
}

impl Fetcher for IeaMethaneFetcher {
    fn name(&self) -> &'static str {
        "iea-methane"
    }

    fn fetch(&self, request: &RequestDescriptor) -> Result<Series, FetchOutcome> {
        let Some(selector) = self
            .selectors
            .iter()
            .find(|selector| selector.hotspot_id == request.hotspot_id)
        else {
            return Err(not_applicable(
                self.name(),
                request,
                "no methane tracker selector for hotspot",
            ));
        };

        if !self.csv_path.as_std_path().is_file() {
            return match self.fallback.lookup(&request.hotspot_id, &request.metric_key) {
                Some(series) => {
                    tracing::info!(
                        hotspot = %request.hotspot_id,
                        metric = %request.metric_key,
                        "no methane tracker export, using curated fallback"
                    );
                    Ok(series)
                }
                None => Err(missing_dependency(
                    self.name(),
                    request,
                    format!(
                        "no methane tracker export at {} and no curated fallback",
                        self.csv_path
                    ),
                )),
            };
        }

        let text = fs::read_to_string(self.csv_path.as_std_path())
            .map_err(|err| EcoError::Filesystem(format!("read {}: {err}", self.csv_path)))
            .map_err(|err| upstream_failure(self.name(), request, err))?;
        aggregate_methane(&text, selector)
            .map_err(|err| upstream_failure(self.name(), request, err))
    }
}

/// Filters rows by the selector, sums kt per year and converts to Mt.
pub fn aggregate_methane(text: &str, selector: &MethaneSelector) -> Result<Series, EcoError> {
    let table = Table::parse(text)?;
    let country_col = table.require_column(&["country", "region"])?;
    let year_col = table.require_column(&["baseYear", "year"])?;
    let value_col = table.require_column(&["emissions", "emissions (kt)"])?;
    let filters = [
        (table.column(&["source"]), selector.source.as_str()),
        (table.column(&["type"]), selector.kind.as_str()),
        (table.column(&["segment"]), selector.segment.as_str()),
        (table.column(&["reason"]), selector.reason.as_str()),
    ];

    let rows = table.rows().iter().filter_map(|row| {
        let country = cell(row, country_col)?;
        if !selector
            .countries
            .iter()
            .any(|wanted| wanted.eq_ignore_ascii_case(country))
        {
            return None;
        }
        for (col, wanted) in &filters {
            if let Some(col) = col {
                if !cell(row, *col)?.eq_ignore_ascii_case(wanted) {
                    return None;
                }
            }
        }
        let year = cell(row, year_col)?.parse::<i32>().ok()?;
        Some((year, number(row, value_col)?))
    });

    let conversion = UnitConversion::Factor(KT_TO_MT);
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

    const EXPORT: &str = "\
region,country,emissions,source,type,segment,reason,baseYear,notes
Europe,Russia,16840.6,IEA,Energy,Total,All,2022,
Europe,Russia,17950.0,Climate TRACE,Energy,Total,All,2022,
Europe,Russia,4100.0,IEA,Energy,Onshore oil,Vented,2022,
Europe,Russia,2200.0,IEA,Agriculture,Total,All,2022,
North America,United States,16923.6,IEA,Energy,Total,All,2022,
Middle East,Qatar,1020.0,IEA,Energy,Total,All,2022,
Middle East,Kuwait,\"1,481.2\",IEA,Energy,Total,All,2022,
Middle East,Qatar,990.0,IEA,Energy,Total,All,2021,
";

    #[test]
    fn filters_source_and_segment_and_converts_kt() {
        let selectors = default_selectors();
        let series = aggregate_methane(EXPORT, &selectors[0]).unwrap();
        assert_eq!(series, vec![SeriesPoint::annual(2022, 16.841)]);
    }

    #[test]
    fn sums_countries_in_one_year() {
        let selectors = default_selectors();
        let series = aggregate_methane(EXPORT, &selectors[1]).unwrap();
        assert_eq!(
            series,
            vec![SeriesPoint::annual(2021, 0.99), SeriesPoint::annual(2022, 2.501)]
        );
    }

    #[test]
    fn export_without_source_column_is_not_filtered_on_it() {
        let export = "country,type,segment,reason,year,emissions\nRussia,Energy,Total,All,2020,14987.7\n";
        let series = aggregate_methane(export, &default_selectors()[0]).unwrap();
        assert_eq!(series, vec![SeriesPoint::annual(2020, 14.988)]);
    }

    #[test]
    fn missing_export_uses_curated_series() {
        let fetcher = IeaMethaneFetcher::new(
            Utf8PathBuf::from("/nonexistent/methane.csv"),
            FallbackTable::iea_methane().unwrap(),
        );
        let request = RequestDescriptor::new("hs-013", "flaring_methane_mt", 26.0, 51.0);
        let series = fetcher.fetch(&request).unwrap();
        assert_eq!(series.first(), Some(&SeriesPoint::annual(2015, 10.214)));

        let bare = IeaMethaneFetcher::new(
            Utf8PathBuf::from("/nonexistent/methane.csv"),
            FallbackTable::empty(),
        );
        assert!(matches!(
            bare.fetch(&request),
            Err(FetchOutcome::MissingDependency(_))
        ));
    }
}
