use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};

use camino::Utf8Path;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::error::KiraError;
use crate::pipeline::{ProgressEvent, ProgressSink, ResearchState};
use crate::scoring::AssessmentResult;

#[derive(Debug, Clone, Serialize)]
pub struct ResearchOutput<'a> {
    pub condition: &'a str,
    pub compiled_report: Option<&'a crate::pipeline::CompiledReport>,
    pub summary: Option<&'a str>,
    pub error: Option<&'a str>,
    pub progress: &'a [String],
}

impl<'a> From<&'a ResearchState> for ResearchOutput<'a> {
    fn from(state: &'a ResearchState) -> Self {
        Self {
            condition: &state.condition,
            compiled_report: state.compiled_report.as_ref(),
            summary: state.final_summary.as_deref(),
            error: state.error.as_deref(),
            progress: &state.progress_log,
        }
    }
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_research(state: &ResearchState) -> io::Result<()> {
        Self::print_json(&ResearchOutput::from(state))
    }

    pub fn print_assessment(results: &BTreeMap<String, AssessmentResult>) -> io::Result<()> {
        Self::print_json(results)
    }

    pub fn print_json<T: Serialize + ?Sized>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }

    /// Writes through a sibling temp file so readers never see a partial document.
    pub fn write_json<T: Serialize + ?Sized>(value: &T, path: &Utf8Path) -> Result<(), KiraError> {
        let json = serde_json::to_string_pretty(value)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_str().is_empty() => parent,
            _ => Utf8Path::new("."),
        };
        fs::create_dir_all(dir.as_std_path()).map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let mut temp = NamedTempFile::new_in(dir.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        temp.write_all(json.as_bytes())
            .and_then(|_| temp.write_all(b"\n"))
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| KiraError::Filesystem(format!("persist {path}: {}", err.error)))?;
        Ok(())
    }
}

/// Forwards pipeline progress to the log.
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn event(&self, event: ProgressEvent) {
        let elapsed_ms = event.elapsed.map(|d| d.as_millis() as u64);
        tracing::info!(elapsed_ms, "{}", event.message);
    }
}
