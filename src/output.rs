use std::io::{self, Write};

use crate::app::{ProgressEvent, ProgressSink, RunSummary};

/// Progress sink that forwards entry events to the debug log; the per-entry
/// `info!` line is emitted by the orchestrator itself.
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => tracing::debug!(
                elapsed_ms = elapsed.as_millis() as u64,
                "{}",
                event.message
            ),
            None => tracing::debug!("{}", event.message),
        }
    }
}

pub struct SummaryOutput;

impl SummaryOutput {
    pub fn line(summary: &RunSummary) -> String {
        format!(
            "written={} skipped={} failed={}",
            summary.written, summary.skipped, summary.failed
        )
    }

    pub fn print(summary: &RunSummary) -> io::Result<()> {
        let mut stdout = io::stdout();
        stdout.write_all(Self::line(summary).as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}
