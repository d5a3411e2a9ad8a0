use std::io::{self, Write};

use camino::Utf8PathBuf;
use serde::Serialize;
use tracing::{info, warn};

use crate::app::{FinalizeResult, HarvestResult, ProgressEvent, ProgressSink, StatusResult};
use crate::fs_util;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_harvest(result: &HarvestResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_status(result: &StatusResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_finalize(result: &FinalizeResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Prints one line per event to stderr for interactive runs.
pub struct ConsoleProgress;

impl ProgressSink for ConsoleProgress {
    fn event(&self, event: ProgressEvent) {
        eprintln!(
            "  {} +{} (total: {}) {}",
            event.partition, event.records_added, event.total_records, event.status
        );
    }
}

/// Append-only, human-readable harvest log. Write failures are reported
/// through tracing and never interrupt a run; nothing reads this file back.
pub struct OperationalLog<'a> {
    path: Utf8PathBuf,
    inner: &'a dyn ProgressSink,
}

impl<'a> OperationalLog<'a> {
    pub fn new(path: Utf8PathBuf, inner: &'a dyn ProgressSink) -> Self {
        Self { path, inner }
    }

    pub fn format_line(timestamp: &str, event: &ProgressEvent) -> String {
        let mut line = format!(
            "[{timestamp}] {} +{} (total: {}) {}",
            event.partition, event.records_added, event.total_records, event.status
        );
        if let Some(message) = &event.message {
            line.push_str(" - ");
            line.push_str(message);
        }
        line
    }
}

impl ProgressSink for OperationalLog<'_> {
    fn event(&self, event: ProgressEvent) {
        let line = Self::format_line(&chrono::Utc::now().to_rfc3339(), &event);
        info!(target: "harvest", "{line}");
        if let Err(err) = fs_util::append_lines(&self.path, [&line]) {
            warn!(path = %self.path, error = %err, "failed to write operational log");
        }
        self.inner.event(event);
    }
}
