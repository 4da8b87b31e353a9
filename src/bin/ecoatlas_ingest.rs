use std::process::ExitCode;

use clap::Parser;
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use ecoatlas_ingest::app::Orchestrator;
use ecoatlas_ingest::config::{HotspotLocations, Settings};
use ecoatlas_ingest::error::EcoError;
use ecoatlas_ingest::fetchers::FetcherRegistry;
use ecoatlas_ingest::output::{LogProgress, SummaryOutput};
use ecoatlas_ingest::store::SeriesStore;

#[derive(Parser)]
#[command(name = "ecoatlas-ingest")]
#[command(about = "Refresh EcoAtlas metric series from every configured upstream source")]
#[command(version)]
struct Cli {
    /// Only process metrics whose resolved source id matches.
    #[arg(long, value_name = "SOURCE_ID")]
    source: Option<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(eco) = report.downcast_ref::<EcoError>() {
            return ExitCode::from(map_exit_code(eco));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &EcoError) -> u8 {
    match error {
        EcoError::HotspotsRead { .. } | EcoError::HotspotsParse(_) => 2,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = Settings::from_env()?;
    let mapping = settings.load_mapping()?;
    let locations = HotspotLocations::load(&settings.hotspots_path)?;
    let registry = FetcherRegistry::standard(&settings)?;

    if let Some(source) = cli.source.as_deref() {
        if !registry.contains(source) {
            tracing::warn!(source, "no fetcher is registered under this source id");
        }
    }
    tracing::info!(
        hotspots = locations.len(),
        metrics = mapping.metric_count(),
        output = %settings.output_dir,
        "starting ingestion run"
    );

    let orchestrator = Orchestrator::new(
        mapping,
        registry,
        SeriesStore::new(settings.output_dir.clone()),
    );
    let summary = orchestrator.run(&locations, cli.source.as_deref(), &LogProgress);
    SummaryOutput::print(&summary).into_diagnostic()?;
    Ok(())
}
