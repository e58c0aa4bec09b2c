use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use serde_json::json;

use kira_gwas_prs::aggregate::{DiscoveryStatus, VariantAggregator};
use kira_gwas_prs::config::RetryPolicy;
use kira_gwas_prs::error::KiraError;
use kira_gwas_prs::gwas::{Association, GwasCatalog, Study};
use kira_gwas_prs::output::{JsonOutput, ResearchOutput};
use kira_gwas_prs::pacing::Pause;
use kira_gwas_prs::pipeline::{
    NarrativeSummarizer, ProgressEvent, ProgressSink, ResearchPipeline, SkipSummarizer,
};
use kira_gwas_prs::search::{
    CONDITION_NOT_CONFIGURED, EvidenceFetcher, SearchReply, SearchTransport,
};

struct NoWait;

impl Pause for NoWait {
    fn pause(&self, _duration: Duration) {}
}

#[derive(Default)]
struct MockCatalog {
    associations: BTreeMap<&'static str, Vec<Association>>,
}

impl GwasCatalog for MockCatalog {
    fn find_studies(&self, _disease_trait: &str, _limit: usize) -> Result<Vec<Study>, KiraError> {
        Ok(self
            .associations
            .keys()
            .map(|id| Study {
                accession_id: Some(id.to_string()),
                title: None,
            })
            .collect())
    }

    fn study_associations(&self, accession_id: &str) -> Result<Vec<Association>, KiraError> {
        Ok(self.associations.get(accession_id).cloned().unwrap_or_default())
    }
}

#[derive(Default)]
struct EchoTransport {
    queries: Mutex<Vec<String>>,
}

impl SearchTransport for EchoTransport {
    fn execute(&self, query: &str) -> Result<SearchReply, KiraError> {
        self.queries.lock().unwrap().push(query.to_string());
        let body = json!({"items": [{"snippet": format!("about {query}")}]});
        Ok(SearchReply {
            status: 200,
            body: body.to_string(),
        })
    }
}

#[derive(Default)]
struct RecordingSink {
    messages: Mutex<Vec<String>>,
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        assert!(event.elapsed.is_some());
        self.messages.lock().unwrap().push(event.message);
    }
}

#[derive(Default)]
struct CapturingSummarizer {
    seen: Mutex<Option<(String, String)>>,
}

impl NarrativeSummarizer for CapturingSummarizer {
    fn summarize(&self, report_json: &str, model: &str) -> String {
        *self.seen.lock().unwrap() = Some((report_json.to_string(), model.to_string()));
        "narrative".to_string()
    }
}

fn association(name: &str, pvalue: f64) -> Association {
    serde_json::from_value(json!({
        "pvalue": pvalue,
        "orPerCopyNum": 1.3,
        "loci": [{"strongestRiskAlleles": [{"riskAlleleName": name}]}]
    }))
    .unwrap()
}

fn policy() -> RetryPolicy {
    RetryPolicy {
        inter_term_delay: Duration::ZERO,
        ..RetryPolicy::default()
    }
}

#[test]
fn markers_are_ranked_and_researched() {
    let mut associations = BTreeMap::new();
    associations.insert("GCST1", vec![association("rs2-A", 1e-5), association("rs1-G", 1e-3)]);
    associations.insert("GCST2", vec![association("rs1-G", 1e-4)]);
    associations.insert("GCST3", vec![association("rs3-T", 1e-9)]);
    let catalog = MockCatalog { associations };
    let transport = EchoTransport::default();
    let summarizer = CapturingSummarizer::default();
    let pipeline = ResearchPipeline::new(
        VariantAggregator::new(&catalog, NoWait, 50, Duration::ZERO),
        EvidenceFetcher::new(Some(&transport), policy(), NoWait),
        &summarizer,
        2,
        "palmyra-med",
    );
    let sink = RecordingSink::default();

    let state = pipeline.run("  Crohn disease ", &sink);

    assert_eq!(state.condition, "Crohn disease");
    let ids: Vec<&str> = state.rsids.iter().map(|id| id.as_str()).collect();
    assert_eq!(ids, vec!["rs1", "rs3"]);
    assert_eq!(state.variant_details.len(), 3);
    assert_eq!(
        state.web_research_summary.keys().collect::<Vec<_>>(),
        vec!["rs1", "rs3"]
    );
    assert_eq!(transport.queries.lock().unwrap().len(), 2);

    let report = state.compiled_report.as_ref().unwrap();
    assert_eq!(report.discovery_status, DiscoveryStatus::Found);
    assert_eq!(report.identified_rsids.len(), 2);
    assert_eq!(state.final_summary.as_deref(), Some("narrative"));

    let (report_json, model) = summarizer.seen.lock().unwrap().clone().unwrap();
    assert_eq!(model, "palmyra-med");
    assert!(report_json.contains("\"condition_researched\": \"Crohn disease\""));

    let messages = sink.messages.lock().unwrap();
    assert_eq!(messages.len(), 4);
    assert!(messages[0].starts_with("stage=gwas_search;"));
    assert!(messages[3].starts_with("stage=narrative_summary;"));
    assert_eq!(state.progress_log.len(), 4);
    assert_eq!(state.current_step_message, "Narrative summary generated.");
}

#[test]
fn no_markers_falls_back_to_condition_research() {
    let catalog = MockCatalog::default();
    let pipeline = ResearchPipeline::new(
        VariantAggregator::new(&catalog, NoWait, 50, Duration::ZERO),
        EvidenceFetcher::<EchoTransport, _>::new(None, policy(), NoWait),
        SkipSummarizer,
        50,
        "palmyra",
    );
    let sink = RecordingSink::default();

    let state = pipeline.run("rare syndrome", &sink);

    assert!(state.rsids.is_empty());
    assert_eq!(state.discovery_status, Some(DiscoveryStatus::NoStudies));
    assert_eq!(
        state.web_research_summary["rare syndrome"],
        CONDITION_NOT_CONFIGURED
    );
    assert!(state.progress_log[1].starts_with("Completed general web research"));
    let report = state.compiled_report.as_ref().unwrap();
    assert!(report.variant_details.is_empty());
    assert!(state.final_summary.unwrap().contains("skipped"));
}

#[test]
fn research_output_round_trips_through_disk() {
    let mut associations = BTreeMap::new();
    associations.insert("GCST1", vec![association("rs10-C", 1e-6)]);
    let catalog = MockCatalog { associations };
    let pipeline = ResearchPipeline::new(
        VariantAggregator::new(&catalog, NoWait, 50, Duration::ZERO),
        EvidenceFetcher::<EchoTransport, _>::new(None, policy(), NoWait),
        SkipSummarizer,
        50,
        "palmyra",
    );
    let state = pipeline.run("gout", &RecordingSink::default());

    let dir = tempfile::tempdir().unwrap();
    let path = camino::Utf8PathBuf::from_path_buf(dir.path().join("out/gout.json")).unwrap();
    JsonOutput::write_json(&ResearchOutput::from(&state), &path).unwrap();

    let saved: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    let record = &saved["compiled_report"]["variant_details"]["rs10"];
    assert_eq!(record["mention_count"], 1);
    assert_eq!(record["risk_allele"], "C");
    assert_eq!(saved["compiled_report"]["discovery_status"]["kind"], "found");
    assert_eq!(saved["progress"].as_array().unwrap().len(), 4);
}
