use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::aggregate::{DiscoveryStatus, EvidenceMap, VariantAggregator};
use crate::domain::RsId;
use crate::gwas::GwasCatalog;
use crate::pacing::Pause;
use crate::rank::rank_markers;
use crate::search::{EvidenceFetcher, SearchMode, SearchTransport};

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Turns a compiled report into narrative text. Implementations never fail:
/// problems come back as a descriptive string.
pub trait NarrativeSummarizer {
    fn summarize(&self, report_json: &str, model: &str) -> String;
}

impl<N: NarrativeSummarizer + ?Sized> NarrativeSummarizer for &N {
    fn summarize(&self, report_json: &str, model: &str) -> String {
        (**self).summarize(report_json, model)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SkipSummarizer;

impl NarrativeSummarizer for SkipSummarizer {
    fn summarize(&self, _report_json: &str, model: &str) -> String {
        format!("Narrative summarisation skipped (no summarizer configured for model {model}).")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledReport {
    pub condition_researched: String,
    pub identified_rsids: Vec<RsId>,
    pub variant_details: EvidenceMap,
    pub web_research_summary: BTreeMap<String, String>,
    pub discovery_status: DiscoveryStatus,
    pub compiled_at: String,
}

/// State threaded through the research stages. Each run owns its own value.
#[derive(Debug, Clone, Serialize)]
pub struct ResearchState {
    pub condition: String,
    pub rsids: Vec<RsId>,
    pub variant_details: EvidenceMap,
    pub discovery_status: Option<DiscoveryStatus>,
    pub web_research_summary: BTreeMap<String, String>,
    pub compiled_report: Option<CompiledReport>,
    pub final_summary: Option<String>,
    pub error: Option<String>,
    pub current_step_message: String,
    pub progress_log: Vec<String>,
}

impl ResearchState {
    pub fn new(condition: &str) -> Self {
        Self {
            condition: condition.trim().to_string(),
            rsids: Vec::new(),
            variant_details: EvidenceMap::new(),
            discovery_status: None,
            web_research_summary: BTreeMap::new(),
            compiled_report: None,
            final_summary: None,
            error: None,
            current_step_message: "Workflow initiated.".to_string(),
            progress_log: Vec::new(),
        }
    }

    fn apply(mut self, update: StateUpdate) -> Self {
        if let Some(rsids) = update.rsids {
            self.rsids = rsids;
        }
        if let Some(details) = update.variant_details {
            self.variant_details = details;
        }
        if let Some(status) = update.discovery_status {
            self.discovery_status = Some(status);
        }
        if let Some(summary) = update.web_research_summary {
            self.web_research_summary = summary;
        }
        if let Some(report) = update.compiled_report {
            self.compiled_report = Some(report);
        }
        if let Some(summary) = update.final_summary {
            self.final_summary = Some(summary);
        }
        if let Some(error) = update.error {
            self.error = Some(error);
        }
        self.progress_log.push(update.message.clone());
        self.current_step_message = update.message;
        self
    }
}

/// Partial state produced by one stage.
#[derive(Debug, Default)]
pub struct StateUpdate {
    pub rsids: Option<Vec<RsId>>,
    pub variant_details: Option<EvidenceMap>,
    pub discovery_status: Option<DiscoveryStatus>,
    pub web_research_summary: Option<BTreeMap<String, String>>,
    pub compiled_report: Option<CompiledReport>,
    pub final_summary: Option<String>,
    pub error: Option<String>,
    pub message: String,
}

type Stage<Pl> = (&'static str, fn(&Pl, &ResearchState) -> StateUpdate);

pub struct ResearchPipeline<G, T, P, N>
where
    G: GwasCatalog,
    T: SearchTransport,
    P: Pause,
    N: NarrativeSummarizer,
{
    aggregator: VariantAggregator<G, P>,
    fetcher: EvidenceFetcher<T, P>,
    summarizer: N,
    max_markers: usize,
    summary_model: String,
}

impl<G, T, P, N> ResearchPipeline<G, T, P, N>
where
    G: GwasCatalog,
    T: SearchTransport,
    P: Pause,
    N: NarrativeSummarizer,
{
    pub fn new(
        aggregator: VariantAggregator<G, P>,
        fetcher: EvidenceFetcher<T, P>,
        summarizer: N,
        max_markers: usize,
        summary_model: &str,
    ) -> Self {
        Self {
            aggregator,
            fetcher,
            summarizer,
            max_markers,
            summary_model: summary_model.to_string(),
        }
    }

    const STAGES: [Stage<Self>; 4] = [
        ("gwas_search", Self::discover_markers),
        ("web_research", Self::gather_web_evidence),
        ("compile_report", Self::compile_report),
        ("narrative_summary", Self::summarize),
    ];

    pub fn run(&self, condition: &str, sink: &dyn ProgressSink) -> ResearchState {
        let started = Instant::now();
        info!(condition, "starting genetic research");
        let state = Self::STAGES
            .iter()
            .fold(ResearchState::new(condition), |state, (name, stage)| {
                info!(stage = *name, "running stage");
                let update = stage(self, &state);
                sink.event(ProgressEvent {
                    message: format!("stage={name}; {}", update.message),
                    elapsed: Some(started.elapsed()),
                });
                state.apply(update)
            });
        info!(condition, message = %state.current_step_message, "research complete");
        state
    }

    fn discover_markers(&self, state: &ResearchState) -> StateUpdate {
        if state.condition.is_empty() {
            return StateUpdate {
                discovery_status: Some(DiscoveryStatus::NoStudies),
                message: "Skipping GWAS Catalog search, no condition specified.".to_string(),
                ..StateUpdate::default()
            };
        }
        let discovery = self.aggregator.discover(&state.condition);
        let rsids = rank_markers(&discovery.evidence, self.max_markers);
        let message = match &discovery.status {
            DiscoveryStatus::Found => format!(
                "Found {} potential rsIDs from GWAS Catalog ({} unique across {} studies, {} studies failed).",
                rsids.len(),
                discovery.markers.len(),
                discovery.studies_searched,
                discovery.studies_failed.len()
            ),
            DiscoveryStatus::NoStudies => format!(
                "No studies found in GWAS Catalog for '{}'. Subsequent steps might yield limited results.",
                state.condition
            ),
            DiscoveryStatus::NoMarkers => format!(
                "No rsIDs found in GWAS Catalog for '{}'. Subsequent steps might yield limited results.",
                state.condition
            ),
            DiscoveryStatus::SearchFailed(reason) => format!(
                "GWAS Catalog search for '{}' failed ({reason}). Subsequent steps might yield limited results.",
                state.condition
            ),
        };
        let error = match &discovery.status {
            DiscoveryStatus::SearchFailed(reason) => Some(reason.clone()),
            _ => None,
        };
        StateUpdate {
            rsids: Some(rsids),
            variant_details: Some(discovery.evidence),
            discovery_status: Some(discovery.status),
            error,
            message,
            ..StateUpdate::default()
        }
    }

    fn gather_web_evidence(&self, state: &ResearchState) -> StateUpdate {
        let (summary, message) = if !state.rsids.is_empty() {
            let terms: Vec<String> = state.rsids.iter().map(RsId::to_string).collect();
            let summary = self.fetcher.fetch(&terms, SearchMode::Marker);
            (summary, format!("Completed web research for {} rsIDs.", terms.len()))
        } else if !state.condition.is_empty() {
            warn!(condition = %state.condition, "no rsIDs, falling back to condition research");
            let summary = self
                .fetcher
                .fetch(std::slice::from_ref(&state.condition), SearchMode::Condition);
            (
                summary,
                format!(
                    "Completed general web research for condition '{}' as no specific rsIDs were found by GWAS.",
                    state.condition
                ),
            )
        } else {
            (
                BTreeMap::new(),
                "Skipping web research, no rsIDs and no condition specified.".to_string(),
            )
        };
        StateUpdate {
            web_research_summary: Some(summary),
            message,
            ..StateUpdate::default()
        }
    }

    fn compile_report(&self, state: &ResearchState) -> StateUpdate {
        let report = CompiledReport {
            condition_researched: state.condition.clone(),
            identified_rsids: state.rsids.clone(),
            variant_details: state.variant_details.clone(),
            web_research_summary: state.web_research_summary.clone(),
            discovery_status: state
                .discovery_status
                .clone()
                .unwrap_or(DiscoveryStatus::NoStudies),
            compiled_at: chrono::Utc::now().to_rfc3339(),
        };
        StateUpdate {
            compiled_report: Some(report),
            message: "Report compiled.".to_string(),
            ..StateUpdate::default()
        }
    }

    fn summarize(&self, state: &ResearchState) -> StateUpdate {
        let Some(report) = state.compiled_report.as_ref() else {
            let message = "Skipping narrative summary, no compiled report.".to_string();
            return StateUpdate {
                final_summary: Some(message.clone()),
                message,
                ..StateUpdate::default()
            };
        };
        let summary = match serde_json::to_string_pretty(report) {
            Ok(json) => self.summarizer.summarize(&json, &self.summary_model),
            Err(err) => format!("Narrative summarisation failed: {err}"),
        };
        StateUpdate {
            final_summary: Some(summary),
            message: "Narrative summary generated.".to_string(),
            ..StateUpdate::default()
        }
    }
}
