use std::collections::BTreeMap;
use std::fs;
use std::sync::Mutex;
use std::time::Duration;

use serde_json::{Value, json};

use kira_gwas_prs::aggregate::{DiscoveryStatus, EvidenceMap, VariantAggregator, merge_study};
use kira_gwas_prs::domain::RsId;
use kira_gwas_prs::error::KiraError;
use kira_gwas_prs::gwas::{Association, GwasCatalog, Study};
use kira_gwas_prs::pacing::Pause;

#[derive(Default)]
struct RecordingPause {
    waits: Mutex<Vec<Duration>>,
}

impl Pause for RecordingPause {
    fn pause(&self, duration: Duration) {
        self.waits.lock().unwrap().push(duration);
    }
}

#[derive(Default)]
struct MockCatalog {
    search_error: Option<String>,
    studies: Vec<&'static str>,
    associations: BTreeMap<&'static str, Vec<Association>>,
    requested: Mutex<Vec<String>>,
}

impl GwasCatalog for MockCatalog {
    fn find_studies(&self, _disease_trait: &str, limit: usize) -> Result<Vec<Study>, KiraError> {
        if let Some(message) = &self.search_error {
            return Err(KiraError::GwasHttp(message.clone()));
        }
        Ok(self
            .studies
            .iter()
            .take(limit)
            .map(|id| Study {
                accession_id: Some(id.to_string()),
                title: None,
            })
            .collect())
    }

    fn study_associations(&self, accession_id: &str) -> Result<Vec<Association>, KiraError> {
        self.requested.lock().unwrap().push(accession_id.to_string());
        self.associations
            .get(accession_id)
            .cloned()
            .ok_or_else(|| KiraError::GwasStatus {
                status: 500,
                message: "internal error".to_string(),
            })
    }
}

fn association(value: Value) -> Association {
    serde_json::from_value(value).unwrap()
}

fn hit(name: &str, pvalue: f64) -> Association {
    association(json!({
        "pvalue": pvalue,
        "loci": [{"strongestRiskAlleles": [{"riskAlleleName": name}]}]
    }))
}

fn rsid(id: &str) -> RsId {
    id.parse().unwrap()
}

fn fixture_associations() -> Vec<Association> {
    let raw = fs::read_to_string("tests/fixtures/gwas_associations_GCST000001.json").unwrap();
    let value: Value = serde_json::from_str(&raw).unwrap();
    serde_json::from_value(value["_embedded"]["associations"].clone()).unwrap()
}

#[test]
fn catalog_page_is_merged_into_evidence() {
    let mut evidence = EvidenceMap::new();
    let sightings = merge_study(&mut evidence, "GCST000001", &fixture_associations());

    assert_eq!(sightings, 3);
    assert_eq!(evidence.len(), 3);

    let apoe = &evidence[&rsid("rs429358")];
    assert_eq!(apoe.risk_allele.as_deref(), Some("C"));
    assert_eq!(apoe.odds_ratio, Some(1.42));
    assert_eq!(apoe.reported_gene.as_deref(), Some("APOE"));
    assert_eq!(apoe.p_value, Some(2e-12));

    let second = &evidence[&rsid("rs7412")];
    assert_eq!(second.odds_ratio, None);
    assert_eq!(second.beta, Some(0.08));
    assert_eq!(second.p_value, Some(3e-8));
    assert_eq!(second.reported_gene, None);

    let third = &evidence[&rsid("rs2075650")];
    assert_eq!(third.risk_allele, None);
    assert_eq!(third.odds_ratio, Some(0.91));
}

#[test]
fn repeated_study_does_not_inflate_mention_count() {
    let assoc = hit("rs123-A", 1e-6);
    let mut evidence = EvidenceMap::new();
    merge_study(&mut evidence, "GCST1", std::slice::from_ref(&assoc));
    merge_study(&mut evidence, "GCST1", std::slice::from_ref(&assoc));

    let record = &evidence[&rsid("rs123")];
    assert_eq!(record.mention_count(), 1);
    assert_eq!(record.study_ids().len(), 1);

    merge_study(&mut evidence, "GCST2", &[assoc]);
    assert_eq!(evidence[&rsid("rs123")].mention_count(), 2);
}

#[test]
fn merged_p_value_is_the_minimum() {
    let mut evidence = EvidenceMap::new();
    for (study, p) in [("GCST1", 0.05), ("GCST2", 0.001), ("GCST3", 0.02)] {
        merge_study(&mut evidence, study, &[hit("rs55-T", p)]);
    }
    let record = &evidence[&rsid("rs55")];
    assert_eq!(record.p_value, Some(0.001));
    assert_eq!(record.mention_count(), 3);
}

#[test]
fn effect_sizes_are_kept_from_first_sighting() {
    let first = association(json!({
        "orPerCopyNum": 1.3,
        "loci": [{"strongestRiskAlleles": [{"riskAlleleName": "rs8-G"}]}]
    }));
    let second = association(json!({
        "orPerCopyNum": 2.7,
        "betaNum": 0.5,
        "loci": [{"strongestRiskAlleles": [{"riskAlleleName": "rs8-A"}]}]
    }));
    let mut evidence = EvidenceMap::new();
    merge_study(&mut evidence, "GCST1", &[first]);
    merge_study(&mut evidence, "GCST2", &[second]);

    let record = &evidence[&rsid("rs8")];
    assert_eq!(record.odds_ratio, Some(1.3));
    assert_eq!(record.beta, None);
    assert_eq!(record.risk_allele.as_deref(), Some("G"));
}

#[test]
fn failing_study_is_skipped_and_paced() {
    let mut associations = BTreeMap::new();
    associations.insert("GCST1", vec![hit("rs1-A", 1e-8)]);
    associations.insert("GCST3", vec![hit("rs1-A", 1e-9), hit("rs2-C", 1e-5)]);
    let catalog = MockCatalog {
        studies: vec!["GCST1", "GCST2", "GCST3"],
        associations,
        ..MockCatalog::default()
    };
    let pause = RecordingPause::default();
    let aggregator = VariantAggregator::new(&catalog, &pause, 50, Duration::from_millis(300));

    let discovery = aggregator.discover("alzheimer disease");

    assert_eq!(discovery.status, DiscoveryStatus::Found);
    assert_eq!(discovery.studies_searched, 3);
    assert_eq!(discovery.studies_failed, vec!["GCST2".to_string()]);
    assert_eq!(discovery.markers.len(), 2);
    assert_eq!(discovery.evidence[&rsid("rs1")].mention_count(), 2);
    assert_eq!(discovery.evidence[&rsid("rs1")].p_value, Some(1e-9));
    assert_eq!(
        *pause.waits.lock().unwrap(),
        vec![Duration::from_millis(300); 2]
    );
}

#[test]
fn study_limit_is_respected() {
    let catalog = MockCatalog {
        studies: vec!["GCST1", "GCST2", "GCST3", "GCST4"],
        ..MockCatalog::default()
    };
    let pause = RecordingPause::default();
    let aggregator = VariantAggregator::new(&catalog, &pause, 2, Duration::ZERO);

    let discovery = aggregator.discover("asthma");

    assert_eq!(*catalog.requested.lock().unwrap(), vec!["GCST1", "GCST2"]);
    assert_eq!(discovery.status, DiscoveryStatus::NoMarkers);
    assert!(discovery.is_empty());
}

#[test]
fn empty_and_failed_searches_are_statuses() {
    let pause = RecordingPause::default();

    let empty = MockCatalog::default();
    let discovery = VariantAggregator::new(&empty, &pause, 50, Duration::ZERO).discover("x");
    assert_eq!(discovery.status, DiscoveryStatus::NoStudies);

    let failing = MockCatalog {
        search_error: Some("connection refused".to_string()),
        ..MockCatalog::default()
    };
    let discovery = VariantAggregator::new(&failing, &pause, 50, Duration::ZERO).discover("x");
    match discovery.status {
        DiscoveryStatus::SearchFailed(reason) => assert!(reason.contains("connection refused")),
        other => panic!("unexpected status {other:?}"),
    }
    assert!(pause.waits.lock().unwrap().is_empty());
}
