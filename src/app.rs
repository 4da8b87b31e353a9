use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::{HotspotLocations, HotspotMapping, MetricMapping, SourceMapping};
use crate::domain::{
    BoundingBox, DEFAULT_BBOX_RADIUS_DEG, RequestDescriptor, Series, normalize_series,
};
use crate::fetchers::{FetchOutcome, Fetcher, FetcherRegistry};
use crate::store::SeriesStore;

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoFetcher,
    Filtered,
    Empty,
    NotApplicable,
    MissingDependency,
    UpstreamFailure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "cause", rename_all = "snake_case")]
pub enum EntryOutcome {
    Written,
    Skipped(SkipReason),
    Failed(String),
}

impl fmt::Display for EntryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryOutcome::Written => write!(f, "written"),
            EntryOutcome::Skipped(reason) => write!(f, "skipped ({reason:?})"),
            EntryOutcome::Failed(_) => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EntryReport {
    pub hotspot_id: String,
    pub metric_key: String,
    pub source_id: Option<String>,
    pub outcome: EntryOutcome,
    pub reason: Option<String>,
    pub path: Option<String>,
    pub points: usize,
}

impl EntryReport {
    fn new(hotspot: &HotspotMapping, metric: &MetricMapping, source_id: Option<&str>) -> Self {
        Self {
            hotspot_id: hotspot.hotspot_id.clone(),
            metric_key: metric.key.clone(),
            source_id: source_id.map(str::to_string),
            outcome: EntryOutcome::Skipped(SkipReason::NoFetcher),
            reason: None,
            path: None,
            points: 0,
        }
    }

    fn skipped(mut self, reason: SkipReason, detail: Option<String>) -> Self {
        self.outcome = EntryOutcome::Skipped(reason);
        self.reason = detail;
        self
    }

    fn failed(mut self, detail: String) -> Self {
        self.outcome = EntryOutcome::Failed(detail);
        self
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub written: usize,
    pub skipped: usize,
    pub failed: usize,
    pub entries: Vec<EntryReport>,
}

impl RunSummary {
    fn record(&mut self, report: EntryReport) {
        match report.outcome {
            EntryOutcome::Written => self.written += 1,
            EntryOutcome::Skipped(_) => self.skipped += 1,
            EntryOutcome::Failed(_) => self.failed += 1,
        }
        self.entries.push(report);
    }

    pub fn entry(&self, hotspot_id: &str, metric_key: &str) -> Option<&EntryReport> {
        self.entries
            .iter()
            .find(|entry| entry.hotspot_id == hotspot_id && entry.metric_key == metric_key)
    }
}

/// Drives one ingestion pass over every (hotspot, metric) in the mapping.
/// Entries are processed one at a time; nothing that goes wrong inside an
/// entry stops the pass.
pub struct Orchestrator {
    mapping: SourceMapping,
    registry: FetcherRegistry,
    store: SeriesStore,
}

impl Orchestrator {
    pub fn new(mapping: SourceMapping, registry: FetcherRegistry, store: SeriesStore) -> Self {
        Self {
            mapping,
            registry,
            store,
        }
    }

    pub fn mapping(&self) -> &SourceMapping {
        &self.mapping
    }

    pub fn store(&self) -> &SeriesStore {
        &self.store
    }

    /// First candidate source with a registered fetcher, in mapping order.
    pub fn select_source<'a>(
        &self,
        metric: &'a MetricMapping,
    ) -> Option<(&'a str, Arc<dyn Fetcher>)> {
        metric.sources.iter().find_map(|source_id| {
            self.registry
                .resolve(source_id)
                .map(|fetcher| (source_id.as_str(), fetcher))
        })
    }

    pub fn run(
        &self,
        locations: &HotspotLocations,
        source_filter: Option<&str>,
        sink: &dyn ProgressSink,
    ) -> RunSummary {
        let mut summary = RunSummary::default();
        for hotspot in &self.mapping.hotspots {
            for metric in &hotspot.metrics {
                let started = Instant::now();
                let report = self.process(hotspot, metric, locations, source_filter);
                tracing::info!(
                    hotspot = %report.hotspot_id,
                    metric = %report.metric_key,
                    source = report.source_id.as_deref().unwrap_or("-"),
                    outcome = %report.outcome,
                    points = report.points,
                    "entry processed"
                );
                sink.event(ProgressEvent {
                    message: format!(
                        "{}/{} {}",
                        report.hotspot_id, report.metric_key, report.outcome
                    ),
                    elapsed: Some(started.elapsed()),
                });
                summary.record(report);
            }
        }
        summary
    }

    fn process(
        &self,
        hotspot: &HotspotMapping,
        metric: &MetricMapping,
        locations: &HotspotLocations,
        source_filter: Option<&str>,
    ) -> EntryReport {
        let selected = self.select_source(metric);
        let source_id = selected.as_ref().map(|(id, _)| *id);
        let report = EntryReport::new(hotspot, metric, source_id);

        if let Some(filter) = source_filter {
            if source_id != Some(filter) {
                return report.skipped(SkipReason::Filtered, None);
            }
        }
        let Some((source_id, fetcher)) = selected else {
            return report.skipped(
                SkipReason::NoFetcher,
                Some(format!("no registered fetcher among {:?}", metric.sources)),
            );
        };

        let request = describe(hotspot, metric, locations);
        let series = match invoke(fetcher.as_ref(), &request) {
            Ok(series) => series,
            Err(Invocation::Outcome(outcome)) => {
                let reason = match &outcome {
                    FetchOutcome::NotApplicable(_) => SkipReason::NotApplicable,
                    FetchOutcome::MissingDependency(_) => SkipReason::MissingDependency,
                    FetchOutcome::UpstreamFailure(_) => SkipReason::UpstreamFailure,
                };
                return report.skipped(reason, Some(outcome.to_string()));
            }
            Err(Invocation::Panicked(detail)) => {
                tracing::error!(
                    source = source_id,
                    hotspot = %request.hotspot_id,
                    metric = %request.metric_key,
                    "fetcher panicked: {detail}"
                );
                return report.failed(format!("fetcher {} panicked: {detail}", fetcher.name()));
            }
        };

        // Persisted series are always sorted with unique dates.
        let series = normalize_series(series);
        if series.is_empty() {
            return report.skipped(SkipReason::Empty, None);
        }

        match self
            .store
            .write_series(&hotspot.hotspot_id, &metric.key, &series)
        {
            Ok(path) => EntryReport {
                outcome: EntryOutcome::Written,
                path: Some(path.to_string()),
                points: series.len(),
                ..report
            },
            Err(err) => {
                tracing::error!(
                    hotspot = %hotspot.hotspot_id,
                    metric = %metric.key,
                    error = %err,
                    "failed to persist series"
                );
                report.failed(err.to_string())
            }
        }
    }
}

enum Invocation {
    Outcome(FetchOutcome),
    Panicked(String),
}

fn invoke(fetcher: &dyn Fetcher, request: &RequestDescriptor) -> Result<Series, Invocation> {
    match panic::catch_unwind(AssertUnwindSafe(|| fetcher.fetch(request))) {
        Ok(result) => result.map_err(Invocation::Outcome),
        Err(payload) => {
            let detail = payload
                .downcast_ref::<&str>()
                .map(|msg| msg.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(Invocation::Panicked(detail))
        }
    }
}

/// Hotspots missing from the location list (such as `global-atmosphere`)
/// sit at (0, 0).
pub fn describe(
    hotspot: &HotspotMapping,
    metric: &MetricMapping,
    locations: &HotspotLocations,
) -> RequestDescriptor {
    let (lat, lng) = locations.coordinates(&hotspot.hotspot_id);
    RequestDescriptor {
        hotspot_id: hotspot.hotspot_id.clone(),
        metric_key: metric.key.clone(),
        lat,
        lng,
        bbox: hotspot
            .bbox
            .unwrap_or_else(|| BoundingBox::around(lat, lng, DEFAULT_BBOX_RADIUS_DEG)),
        unit: Some(metric.unit.clone()),
        sources: metric.sources.clone(),
    }
}
