use kira_gwas_prs::aggregate::{EvidenceMap, VariantEvidence};
use kira_gwas_prs::rank::rank_markers;

fn record(id: &str, studies: usize, p_value: f64) -> VariantEvidence {
    let mut record = VariantEvidence::new(id.parse().unwrap());
    for n in 0..studies {
        record.add_study(&format!("GCST{n}"));
    }
    record.p_value = Some(p_value);
    record
}

#[test]
fn study_count_outranks_significance() {
    let mut evidence = EvidenceMap::new();
    for record in [
        record("rs300", 1, 0.0001),
        record("rs200", 3, 0.05),
        record("rs100", 3, 0.01),
    ] {
        evidence.insert(record.id.clone(), record);
    }

    let ranked: Vec<String> = rank_markers(&evidence, 50)
        .into_iter()
        .map(|id| id.to_string())
        .collect();

    assert_eq!(ranked, vec!["rs100", "rs200", "rs300"]);
}

#[test]
fn saved_evidence_ids_are_normalized_or_rejected() {
    let saved: EvidenceMap = serde_json::from_value(serde_json::json!({
        "RS7": {"id": "RS7", "p_value": 0.01, "study_ids": ["GCST1", "GCST2"]}
    }))
    .unwrap();
    let ranked = rank_markers(&saved, 50);
    assert_eq!(ranked.len(), 1);
    assert_eq!(ranked[0].as_str(), "rs7");
    assert_eq!(saved[&ranked[0]].mention_count(), 2);

    let rejected = serde_json::from_value::<EvidenceMap>(serde_json::json!({
        "banana": {"id": "banana"}
    }));
    assert!(rejected.is_err());
}
