use std::fs;
use std::process::Command;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::Builder;

use crate::domain::{
    RequestDescriptor, Series, SeriesPoint, UnitConversion, normalize_series, round3,
};
use crate::error::EcoError;
use crate::fetchers::{
    FetchOutcome, Fetcher, missing_dependency, not_applicable, upstream_failure,
};
use crate::process::run_with_timeout;

pub const SOURCE_ID: &str = "edgar_jrc";
pub const AGGREGATION_TIMEOUT: Duration = Duration::from_secs(120);

const TONNES_TO_MT: f64 = 1e-6;

/// Metric key → NetCDF variable holding the gridded emissions.
const METRIC_VARIABLES: &[(&str, &str)] = &[
    ("co2_emissions_mt", "emissions"),
    ("ch4_emissions_mt", "emissions"),
];

/// Gridded EDGAR emissions summed over the request bbox by an external
/// aggregation script. Both the raw NetCDF directory and the script are
/// optional; without them the fetcher reports a missing dependency.
pub struct EdgarFetcher {
    input_dir: Utf8PathBuf,
    program: String,
    script: Utf8PathBuf,
    timeout: Duration,
}

impl EdgarFetcher {
    pub fn new(input_dir: Utf8PathBuf, program: String, script: Utf8PathBuf) -> Self {
        Self {
            input_dir,
            program,
            script,
            timeout: AGGREGATION_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn aggregate(
        &self,
        request: &RequestDescriptor,
        variable: &str,
        inputs: &[Utf8PathBuf],
    ) -> Result<Series, EcoError> {
        // Deleted when dropped, on every return path.
        let output = Builder::new()
            .prefix(&format!(
                "edgar-{}-{}-",
                request.hotspot_id, request.metric_key
            ))
            .suffix(".json")
            .tempfile()
            .map_err(|err| EcoError::Filesystem(format!("create temp file: {err}")))?;

        let joined = inputs
            .iter()
            .map(|path| path.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let mut command = Command::new(&self.program);
        command
            .arg(self.script.as_std_path())
            .arg("--input")
            .arg(joined)
            .arg(format!("--bbox={}", request.bbox.to_arg()))
            .arg("--var")
            .arg(variable)
            .arg("--output")
            .arg(output.path());

        let result = run_with_timeout(command, self.timeout)?;
        if !result.status.success() {
            return Err(EcoError::Subprocess(format!(
                "{} exited with {}: {}",
                self.script,
                result.status,
                result.diagnostic()
            )));
        }
        tracing::debug!(stdout = %result.stdout.trim(), "aggregation finished");

        let content = fs::read_to_string(output.path())
            .map_err(|err| EcoError::Filesystem(format!("read aggregation output: {err}")))?;
        let points: Vec<SeriesPoint> = serde_json::from_str(&content)
            .map_err(|err| EcoError::Parse(format!("aggregation output: {err}")))?;

        let conversion = if request.unit_is_megatonnes() {
            UnitConversion::Factor(TONNES_TO_MT)
        } else {
            UnitConversion::Identity
        };
        Ok(normalize_series(
            points
                .into_iter()
                .map(|point| SeriesPoint {
                    value: round3(conversion.apply(point.value)),
                    ..point
                })
                .collect(),
        ))
    }
}

impl Fetcher for EdgarFetcher {
    fn name(&self) -> &'static str {
        "edgar"
    }

    fn fetch(&self, request: &RequestDescriptor) -> Result<Series, FetchOutcome> {
        let Some((_, variable)) = METRIC_VARIABLES
            .iter()
            .find(|(metric, _)| request.metric_key == *metric)
        else {
            return Err(not_applicable(
                self.name(),
                request,
                "no EDGAR variable for metric",
            ));
        };
        if !self.input_dir.as_std_path().is_dir() {
            return Err(missing_dependency(
                self.name(),
                request,
                format!("no gridded input directory at {}", self.input_dir),
            ));
        }
        let inputs = netcdf_files(&self.input_dir)
            .map_err(|err| upstream_failure(self.name(), request, err))?;
        if inputs.is_empty() {
            return Err(missing_dependency(
                self.name(),
                request,
                format!("no .nc files in {}", self.input_dir),
            ));
        }
        if !self.script.as_std_path().is_file() {
            return Err(missing_dependency(
                self.name(),
                request,
                format!("aggregation script not found at {}", self.script),
            ));
        }

        self.aggregate(request, variable, &inputs)
            .map_err(|err| upstream_failure(self.name(), request, err))
    }
}

/// `.nc` files directly under `dir`, sorted so the argument list is stable.
pub fn netcdf_files(dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>, EcoError> {
    let entries = dir
        .read_dir_utf8()
        .map_err(|err| EcoError::Filesystem(format!("read {dir}: {err}")))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| EcoError::Filesystem(err.to_string()))?;
        let path = entry.path();
        let is_netcdf = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("nc"))
            .unwrap_or(false);
        if is_netcdf && path.is_file() {
            files.push(path.to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}
