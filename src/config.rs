use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::domain::{BoundingBox, HotspotType, MetricStatus};
use crate::error::EcoError;

const BUILTIN_MAPPING: &str = include_str!("../data/source_mapping.json");

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMapping {
    #[serde(default)]
    pub schema_version: Option<u32>,
    pub sources: Vec<SourceInfo>,
    pub hotspots: Vec<HotspotMapping>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceInfo {
    pub id: String,
    pub name: String,
    pub url: String,
    pub publisher: String,
    pub cadence: String,
    pub format: String,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HotspotMapping {
    pub hotspot_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: HotspotType,
    pub category: String,
    #[serde(default)]
    pub primary_gas: Option<String>,
    #[serde(default)]
    pub bbox: Option<BoundingBox>,
    pub metrics: Vec<MetricMapping>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricMapping {
    pub key: String,
    pub unit: String,
    pub description: String,
    pub sources: Vec<String>,
    pub status: MetricStatus,
    #[serde(default)]
    pub data_path: Option<String>,
}

impl SourceMapping {
    pub fn source(&self, id: &str) -> Option<&SourceInfo> {
        self.sources.iter().find(|source| source.id == id)
    }

    pub fn hotspot(&self, id: &str) -> Option<&HotspotMapping> {
        self.hotspots.iter().find(|hotspot| hotspot.hotspot_id == id)
    }

    pub fn metric_count(&self) -> usize {
        self.hotspots.iter().map(|hotspot| hotspot.metrics.len()).sum()
    }
}

pub struct MappingLoader;

impl MappingLoader {
    /// The registry shipped with the crate.
    pub fn builtin() -> Result<SourceMapping, EcoError> {
        Self::parse(BUILTIN_MAPPING)
    }

    pub fn from_path(path: &Utf8Path) -> Result<SourceMapping, EcoError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|_| EcoError::MappingRead(path.as_std_path().to_path_buf()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<SourceMapping, EcoError> {
        let mapping: SourceMapping = serde_json::from_str(content)
            .map_err(|err| EcoError::MappingParse(err.to_string()))?;
        Self::validate(&mapping)?;
        Ok(mapping)
    }

    pub fn validate(mapping: &SourceMapping) -> Result<(), EcoError> {
        let source_ids: BTreeSet<&str> = mapping
            .sources
            .iter()
            .map(|source| source.id.as_str())
            .collect();
        if source_ids.len() != mapping.sources.len() {
            return Err(EcoError::MappingInvalid(
                "duplicate source id in sources[]".to_string(),
            ));
        }

        let mut hotspot_ids = BTreeSet::new();
        for hotspot in &mapping.hotspots {
            if !hotspot_ids.insert(hotspot.hotspot_id.as_str()) {
                return Err(EcoError::MappingInvalid(format!(
                    "duplicate hotspot {}",
                    hotspot.hotspot_id
                )));
            }
            let mut metric_keys = BTreeSet::new();
            for metric in &hotspot.metrics {
                if !metric_keys.insert(metric.key.as_str()) {
                    return Err(EcoError::MappingInvalid(format!(
                        "duplicate metric {} on {}",
                        metric.key, hotspot.hotspot_id
                    )));
                }
                if let Some(unknown) = metric
                    .sources
                    .iter()
                    .find(|id| !source_ids.contains(id.as_str()))
                {
                    return Err(EcoError::MappingInvalid(format!(
                        "metric {}/{} references undeclared source {unknown}",
                        hotspot.hotspot_id, metric.key
                    )));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HotspotLocation {
    pub id: String,
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub severity: Option<serde_json::Value>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<HotspotType>,
}

/// Hotspot coordinates keyed by id. Ids that are not listed (such as the
/// `global-atmosphere` pseudo-hotspot) resolve to (0, 0).
#[derive(Debug, Clone, Default)]
pub struct HotspotLocations {
    by_id: BTreeMap<String, HotspotLocation>,
}

impl HotspotLocations {
    pub fn load(path: &Utf8Path) -> Result<Self, EcoError> {
        let content =
            fs::read_to_string(path.as_std_path()).map_err(|err| EcoError::HotspotsRead {
                path: path.as_std_path().to_path_buf(),
                message: err.to_string(),
            })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, EcoError> {
        let list: Vec<HotspotLocation> = serde_json::from_str(content)
            .map_err(|err| EcoError::HotspotsParse(err.to_string()))?;
        Ok(Self::from_list(list))
    }

    pub fn from_list(list: Vec<HotspotLocation>) -> Self {
        let by_id = list
            .into_iter()
            .map(|location| (location.id.clone(), location))
            .collect();
        Self { by_id }
    }

    pub fn get(&self, id: &str) -> Option<&HotspotLocation> {
        self.by_id.get(id)
    }

    pub fn coordinates(&self, id: &str) -> (f64, f64) {
        self.by_id
            .get(id)
            .map(|location| (location.lat, location.lng))
            .unwrap_or((0.0, 0.0))
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// Runtime settings, read from the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    pub data_dir: Utf8PathBuf,
    pub hotspots_path: Utf8PathBuf,
    pub output_dir: Utf8PathBuf,
    pub raw_dir: Utf8PathBuf,
    pub mapping_path: Option<Utf8PathBuf>,
    pub edgar_script: Utf8PathBuf,
    pub python: String,
    pub http_timeout: Duration,
    pub gfw_api_key: Option<String>,
    pub firms_map_key: Option<String>,
}

pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;

impl Settings {
    pub fn from_env() -> Result<Self, EcoError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, EcoError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let data_dir =
            Utf8PathBuf::from(value("ECOATLAS_DATA_DIR").unwrap_or_else(|| "data".to_string()));
        let mut settings = Self::with_data_dir(data_dir);

        if let Some(path) = value("ECOATLAS_HOTSPOTS") {
            settings.hotspots_path = path.into();
        }
        if let Some(path) = value("ECOATLAS_OUTPUT_DIR") {
            settings.output_dir = path.into();
        }
        if let Some(path) = value("ECOATLAS_RAW_DIR") {
            settings.raw_dir = path.into();
        }
        settings.mapping_path = value("ECOATLAS_MAPPING").map(Utf8PathBuf::from);
        if let Some(path) = value("ECOATLAS_EDGAR_SCRIPT") {
            settings.edgar_script = path.into();
        }
        if let Some(python) = value("ECOATLAS_PYTHON") {
            settings.python = python;
        }
        if let Some(secs) = value("ECOATLAS_HTTP_TIMEOUT_SECS") {
            let secs = secs
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or_else(|| EcoError::InvalidSetting {
                    name: "ECOATLAS_HTTP_TIMEOUT_SECS".to_string(),
                    message: format!("expected a positive number of seconds, got {secs}"),
                })?;
            settings.http_timeout = Duration::from_secs(secs);
        }
        settings.gfw_api_key = value("GFW_API_KEY");
        settings.firms_map_key = value("FIRMS_MAP_KEY");
        Ok(settings)
    }

    /// Defaults rooted at `data_dir`, with no credentials.
    pub fn with_data_dir(data_dir: Utf8PathBuf) -> Self {
        Self {
            hotspots_path: data_dir.join("hotspots.json"),
            output_dir: data_dir.join("series"),
            raw_dir: data_dir.join("raw"),
            data_dir,
            mapping_path: None,
            edgar_script: Utf8PathBuf::from("scripts/edgar/aggregate_bbox.py"),
            python: "python3".to_string(),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            gfw_api_key: None,
            firms_map_key: None,
        }
    }

    pub fn load_mapping(&self) -> Result<SourceMapping, EcoError> {
        match &self.mapping_path {
            Some(path) => MappingLoader::from_path(path),
            None => MappingLoader::builtin(),
        }
    }
}
