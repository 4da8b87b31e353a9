use std::fs;
use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use ecoatlas_ingest::app::{
    EntryOutcome, Orchestrator, ProgressEvent, ProgressSink, RunSummary, SkipReason,
};
use ecoatlas_ingest::config::{HotspotLocations, MappingLoader, SourceMapping};
use ecoatlas_ingest::domain::{RequestDescriptor, Series, SeriesPoint, date_key};
use ecoatlas_ingest::fetchers::iea_methane;
use ecoatlas_ingest::fetchers::{
    FallbackTable, FetchOutcome, Fetcher, FetcherRegistry, IeaMethaneFetcher,
};
use ecoatlas_ingest::store::SeriesStore;

fn fixture(name: &str) -> Utf8PathBuf {
    Utf8PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn mapping() -> SourceMapping {
    MappingLoader::from_path(&fixture("mapping.json")).unwrap()
}

fn locations() -> HotspotLocations {
    HotspotLocations::load(&fixture("hotspots.json")).unwrap()
}

fn scratch() -> (tempfile::TempDir, SeriesStore) {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(dir.path().join("series")).unwrap();
    (dir, SeriesStore::new(root))
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Returns the same series for every request and remembers what it was asked.
struct Canned {
    series: Series,
    requests: Mutex<Vec<RequestDescriptor>>,
}

impl Canned {
    fn new(series: Series) -> Arc<Self> {
        Arc::new(Self {
            series,
            requests: Mutex::new(Vec::new()),
        })
    }
}

impl Fetcher for Canned {
    fn name(&self) -> &'static str {
        "canned"
    }

    fn fetch(&self, request: &RequestDescriptor) -> Result<Series, FetchOutcome> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(self.series.clone())
    }
}

struct Failing(FetchOutcome);

impl Fetcher for Failing {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn fetch(&self, _request: &RequestDescriptor) -> Result<Series, FetchOutcome> {
        Err(self.0.clone())
    }
}

struct Panicking;

impl Fetcher for Panicking {
    fn name(&self) -> &'static str {
        "panicking"
    }

    fn fetch(&self, _request: &RequestDescriptor) -> Result<Series, FetchOutcome> {
        panic!("index out of bounds in upstream payload")
    }
}

fn emissions() -> Series {
    vec![
        SeriesPoint::new("2021", 3.5),
        SeriesPoint::new("2019", 1.25),
        SeriesPoint::new("2020", 2.0),
        SeriesPoint::new("2021", 3.75),
    ]
}

fn run(registry: FetcherRegistry, store: SeriesStore, filter: Option<&str>) -> RunSummary {
    let orchestrator = Orchestrator::new(mapping(), registry, store);
    orchestrator.run(&locations(), filter, &RecordingSink::default())
}

#[test]
fn first_registered_candidate_wins() {
    let (_dir, store) = scratch();
    let canned = Canned::new(emissions());
    let registry = FetcherRegistry::new().with("climate_trace", canned.clone());

    let summary = run(registry, store.clone(), None);

    let entry = summary.entry("hs-002", "co2_emissions_mt").unwrap();
    assert_eq!(entry.source_id.as_deref(), Some("climate_trace"));
    assert_eq!(entry.outcome, EntryOutcome::Written);
    assert!(store.path_for("hs-002", "co2_emissions_mt").as_std_path().is_file());

    let requests = canned.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].sources, vec!["unregistered_src", "climate_trace"]);
    assert_eq!((requests[0].lat, requests[0].lng), (57.0, -111.5));
}

#[test]
fn unresolved_metrics_are_skipped() {
    let (_dir, store) = scratch();
    let summary = run(FetcherRegistry::new(), store, None);
    assert_eq!(summary.written, 0);
    assert_eq!(summary.skipped, 4);
    assert_eq!(summary.failed, 0);
    let planned = summary.entry("global-atmosphere", "placeholder").unwrap();
    assert_eq!(planned.outcome, EntryOutcome::Skipped(SkipReason::NoFetcher));
    assert!(planned.source_id.is_none());
}

#[test]
fn source_filter_only_runs_matching_entries() {
    let (_dir, store) = scratch();
    let trace = Canned::new(emissions());
    let edgar = Canned::new(vec![SeriesPoint::new("2020", 510.0)]);
    let registry = FetcherRegistry::new()
        .with("climate_trace", trace.clone())
        .with("edgar_jrc", edgar.clone());

    let summary = run(registry, store, Some("edgar_jrc"));

    assert_eq!(summary.written, 1);
    assert_eq!(summary.skipped, 3);
    assert_eq!(
        summary.entry("hs-002", "co2_emissions_mt").unwrap().outcome,
        EntryOutcome::Skipped(SkipReason::Filtered)
    );
    assert!(trace.requests.lock().unwrap().is_empty());

    let edgar_requests = edgar.requests.lock().unwrap();
    assert_eq!(edgar_requests.len(), 1);
    assert_eq!(
        <[f64; 4]>::from(edgar_requests[0].bbox),
        [110.0, 34.5, 114.5, 40.8]
    );
}

#[test]
fn empty_result_leaves_previous_file_alone() {
    let (_dir, store) = scratch();
    let path = store.path_for("hs-002", "co2_emissions_mt");
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, "[{\"date\":\"2018\",\"value\":1.0}]\n").unwrap();

    let registry = FetcherRegistry::new().with("climate_trace", Canned::new(Vec::new()));
    let summary = run(registry, store, None);

    assert_eq!(
        summary.entry("hs-002", "co2_emissions_mt").unwrap().outcome,
        EntryOutcome::Skipped(SkipReason::Empty)
    );
    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "[{\"date\":\"2018\",\"value\":1.0}]\n"
    );
}

#[test]
fn fetch_outcomes_are_preserved_per_entry() {
    let (_dir, store) = scratch();
    let registry = FetcherRegistry::new()
        .with(
            "climate_trace",
            Arc::new(Failing(FetchOutcome::UpstreamFailure("status 503".into()))),
        )
        .with(
            "edgar_jrc",
            Arc::new(Failing(FetchOutcome::MissingDependency("no .nc files".into()))),
        );

    let summary = run(registry, store, None);

    assert_eq!(summary.failed, 0);
    let trace = summary.entry("hs-002", "co2_emissions_mt").unwrap();
    assert_eq!(trace.outcome, EntryOutcome::Skipped(SkipReason::UpstreamFailure));
    assert!(trace.reason.as_deref().unwrap().contains("status 503"));
    assert_matches!(
        summary.entry("hs-006", "co2_emissions_mt").unwrap().outcome,
        EntryOutcome::Skipped(SkipReason::MissingDependency)
    );
}

#[test]
fn panicking_fetcher_fails_its_entry_only() {
    let (_dir, store) = scratch();
    let registry = FetcherRegistry::new()
        .with("climate_trace", Arc::new(Panicking))
        .with("edgar_jrc", Canned::new(emissions()));

    let summary = run(registry, store, None);

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.written, 1);
    assert_matches!(
        &summary.entry("hs-002", "co2_emissions_mt").unwrap().outcome,
        EntryOutcome::Failed(detail) if detail.contains("index out of bounds")
    );
}

#[test]
fn unwritable_output_fails_the_entry() {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(dir.path().join("series")).unwrap();
    // A plain file where the hotspot directory should go.
    fs::create_dir_all(&root).unwrap();
    fs::write(root.join("hs-002"), "not a directory").unwrap();

    let registry = FetcherRegistry::new()
        .with("climate_trace", Canned::new(emissions()))
        .with("edgar_jrc", Canned::new(emissions()));
    let summary = run(registry, SeriesStore::new(root), None);

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.written, 1);
    assert_matches!(
        summary.entry("hs-002", "co2_emissions_mt").unwrap().outcome,
        EntryOutcome::Failed(_)
    );
}

#[test]
fn persisted_series_are_sorted_unique_and_deterministic() {
    let outputs: Vec<Vec<u8>> = (0..2)
        .map(|_| {
            let (_dir, store) = scratch();
            let registry = FetcherRegistry::new().with("climate_trace", Canned::new(emissions()));
            run(registry, store.clone(), None);
            fs::read(store.path_for("hs-002", "co2_emissions_mt")).unwrap()
        })
        .collect();
    assert_eq!(outputs[0], outputs[1]);

    let series: Vec<SeriesPoint> = serde_json::from_slice(&outputs[0]).unwrap();
    assert_eq!(
        series,
        vec![
            SeriesPoint::new("2019", 1.25),
            SeriesPoint::new("2020", 2.0),
            SeriesPoint::new("2021", 3.75),
        ]
    );
    for pair in series.windows(2) {
        assert!(date_key(&pair[0].date).unwrap() < date_key(&pair[1].date).unwrap());
    }
    assert!(outputs[0].ends_with(b"]\n"));
}

#[test]
fn progress_event_per_entry() {
    let (_dir, store) = scratch();
    let sink = RecordingSink::default();
    let orchestrator = Orchestrator::new(mapping(), FetcherRegistry::new(), store);
    orchestrator.run(&locations(), None, &sink);
    let events = sink.events.lock().unwrap();
    assert_eq!(events.len(), 4);
    assert!(events[0].message.starts_with("hs-002/co2_emissions_mt"));
}

#[test]
fn permian_methane_from_tracker_export() {
    let (_dir, store) = scratch();
    let fetcher =
        IeaMethaneFetcher::new(fixture("iea_methane_russia.csv"), FallbackTable::empty());
    let registry = FetcherRegistry::new().with(iea_methane::SOURCE_ID, Arc::new(fetcher));

    let summary = run(registry, store.clone(), None);

    let entry = summary
        .entry("hs-009", "permian_methane_leakage_mt")
        .unwrap();
    assert_eq!(entry.source_id.as_deref(), Some("src-iea-methane"));
    assert_eq!(entry.outcome, EntryOutcome::Written);
    assert_eq!(entry.points, 6);
    assert_eq!(
        store
            .read_series("hs-009", "permian_methane_leakage_mt")
            .unwrap(),
        vec![
            SeriesPoint::annual(2015, 15.32),
            SeriesPoint::annual(2016, 15.812),
            SeriesPoint::annual(2017, 16.277),
            SeriesPoint::annual(2018, 16.841),
            SeriesPoint::annual(2019, 16.512),
            SeriesPoint::annual(2020, 14.988),
        ]
    );
}
