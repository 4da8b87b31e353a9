//! Source fetchers: one per upstream family, all behind [`Fetcher`].
//!
//! A fetcher turns a [`RequestDescriptor`] into a normalised [`Series`]. It
//! never panics on bad upstream data and never writes to the output tree;
//! every failure comes back as a [`FetchOutcome`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Settings;
use crate::domain::{RequestDescriptor, Series};
use crate::error::EcoError;
use crate::http::{UpstreamClient, UpstreamHttpClient};

pub mod climate_trace;
pub mod coral;
pub mod edgar;
pub mod emdat;
pub mod extract;
pub mod fallback;
pub mod firms;
pub mod forest_loss;
pub mod iea_methane;
pub mod mauna_loa;

pub use climate_trace::ClimateTraceFetcher;
pub use coral::CoralBleachingFetcher;
pub use edgar::EdgarFetcher;
pub use emdat::EmdatFetcher;
pub use fallback::FallbackTable;
pub use firms::FirmsFetcher;
pub use forest_loss::ForestLossFetcher;
pub use iea_methane::IeaMethaneFetcher;
pub use mauna_loa::MaunaLoaFetcher;

/// Why a fetcher produced no series.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// The fetcher does not cover this hotspot/metric.
    NotApplicable(String),
    /// A credential, local file or helper tool is absent.
    MissingDependency(String),
    /// The upstream call or its payload failed.
    UpstreamFailure(String),
}

impl fmt::Display for FetchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchOutcome::NotApplicable(reason) => write!(f, "not applicable: {reason}"),
            FetchOutcome::MissingDependency(reason) => write!(f, "missing dependency: {reason}"),
            FetchOutcome::UpstreamFailure(detail) => write!(f, "upstream failure: {detail}"),
        }
    }
}

pub trait Fetcher: Send + Sync {
    fn name(&self) -> &'static str;
    fn fetch(&self, request: &RequestDescriptor) -> Result<Series, FetchOutcome>;
}

pub(crate) fn not_applicable(
    fetcher: &str,
    request: &RequestDescriptor,
    reason: impl Into<String>,
) -> FetchOutcome {
    let reason = reason.into();
    info!(
        fetcher,
        hotspot = %request.hotspot_id,
        metric = %request.metric_key,
        "{reason}"
    );
    FetchOutcome::NotApplicable(reason)
}

pub(crate) fn missing_dependency(
    fetcher: &str,
    request: &RequestDescriptor,
    reason: impl Into<String>,
) -> FetchOutcome {
    let reason = reason.into();
    info!(
        fetcher,
        hotspot = %request.hotspot_id,
        metric = %request.metric_key,
        "skipping: {reason}"
    );
    FetchOutcome::MissingDependency(reason)
}

pub(crate) fn upstream_failure(
    fetcher: &str,
    request: &RequestDescriptor,
    err: EcoError,
) -> FetchOutcome {
    warn!(
        fetcher,
        hotspot = %request.hotspot_id,
        metric = %request.metric_key,
        error = %err,
        "upstream fetch failed"
    );
    FetchOutcome::UpstreamFailure(err.to_string())
}

/// Source id → fetcher. Several ids may share one fetcher instance.
#[derive(Clone, Default)]
pub struct FetcherRegistry {
    fetchers: BTreeMap<String, Arc<dyn Fetcher>>,
}

impl FetcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, source_id: &str, fetcher: Arc<dyn Fetcher>) {
        self.fetchers.insert(source_id.to_string(), fetcher);
    }

    pub fn with(mut self, source_id: &str, fetcher: Arc<dyn Fetcher>) -> Self {
        self.register(source_id, fetcher);
        self
    }

    pub fn resolve(&self, source_id: &str) -> Option<Arc<dyn Fetcher>> {
        self.fetchers.get(source_id).cloned()
    }

    pub fn contains(&self, source_id: &str) -> bool {
        self.fetchers.contains_key(source_id)
    }

    pub fn source_ids(&self) -> impl Iterator<Item = &str> {
        self.fetchers.keys().map(String::as_str)
    }

    /// Every production fetcher, wired to a live HTTP client.
    pub fn standard(settings: &Settings) -> Result<Self, EcoError> {
        let client: Arc<dyn UpstreamClient> =
            Arc::new(UpstreamHttpClient::new(settings.http_timeout)?);
        Self::standard_with_client(settings, client)
    }

    pub fn standard_with_client(
        settings: &Settings,
        client: Arc<dyn UpstreamClient>,
    ) -> Result<Self, EcoError> {
        let forest_loss: Arc<dyn Fetcher> = Arc::new(ForestLossFetcher::new(
            client.clone(),
            settings.gfw_api_key.clone(),
        ));

        let registry = Self::new()
            .with(
                mauna_loa::SOURCE_ID,
                Arc::new(MaunaLoaFetcher::new(client.clone())),
            )
            .with(
                climate_trace::SOURCE_ID,
                Arc::new(ClimateTraceFetcher::new(client.clone())),
            )
            .with(forest_loss::SOURCE_ID, forest_loss.clone())
            .with(forest_loss::HANSEN_SOURCE_ID, forest_loss)
            .with(
                firms::SOURCE_ID,
                Arc::new(FirmsFetcher::new(
                    client.clone(),
                    settings.firms_map_key.clone(),
                )),
            )
            .with(
                emdat::SOURCE_ID,
                Arc::new(EmdatFetcher::new(
                    settings.raw_dir.join("emdat").join("emdat.csv"),
                    FallbackTable::emdat()?,
                )),
            )
            .with(
                iea_methane::SOURCE_ID,
                Arc::new(IeaMethaneFetcher::new(
                    settings.raw_dir.join("iea").join("methane.csv"),
                    FallbackTable::iea_methane()?,
                )),
            )
            .with(
                edgar::SOURCE_ID,
                Arc::new(EdgarFetcher::new(
                    settings.raw_dir.join("edgar"),
                    settings.python.clone(),
                    settings.edgar_script.clone(),
                )),
            )
            .with(
                coral::SOURCE_ID,
                Arc::new(CoralBleachingFetcher::new(
                    client,
                    FallbackTable::coral_bleaching()?,
                )),
            );
        Ok(registry)
    }
}
