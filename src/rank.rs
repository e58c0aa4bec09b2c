use std::cmp::Ordering;

use crate::aggregate::{EvidenceMap, VariantEvidence};
use crate::domain::RsId;

pub const DEFAULT_MAX_RANKED: usize = 50;

/// Orders markers by study count (descending), then p-value (ascending, absent
/// p-values sort as 1.0), then id, keeping at most `max` of them.
pub fn rank_markers(evidence: &EvidenceMap, max: usize) -> Vec<RsId> {
    let mut records: Vec<&VariantEvidence> = evidence.values().collect();
    records.sort_by(|a, b| compare_reliability(a, b));
    records
        .into_iter()
        .take(max)
        .map(|record| record.id.clone())
        .collect()
}

pub fn compare_reliability(a: &VariantEvidence, b: &VariantEvidence) -> Ordering {
    b.mention_count()
        .cmp(&a.mention_count())
        .then_with(|| a.p_value.unwrap_or(1.0).total_cmp(&b.p_value.unwrap_or(1.0)))
        .then_with(|| a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evidence(id: &str, studies: &[&str], p_value: Option<f64>) -> VariantEvidence {
        let mut record = VariantEvidence::new(id.parse().unwrap());
        for study in studies {
            record.add_study(study);
        }
        record.p_value = p_value;
        record
    }

    #[test]
    fn missing_p_value_sorts_as_least_significant() {
        let mut map = EvidenceMap::new();
        for record in [
            evidence("rs1", &["S1"], None),
            evidence("rs2", &["S1"], Some(0.5)),
            evidence("rs3", &["S1"], Some(1.0)),
        ] {
            map.insert(record.id.clone(), record);
        }
        let ranked: Vec<String> = rank_markers(&map, 10)
            .iter()
            .map(|id| id.to_string())
            .collect();
        assert_eq!(ranked, vec!["rs2", "rs1", "rs3"]);
    }

    #[test]
    fn truncates_to_max() {
        let mut map = EvidenceMap::new();
        for n in 0..5 {
            let record = evidence(&format!("rs{n}"), &["S1"], Some(0.01 * f64::from(n + 1)));
            map.insert(record.id.clone(), record);
        }
        assert_eq!(rank_markers(&map, 2).len(), 2);
        assert!(rank_markers(&EvidenceMap::new(), DEFAULT_MAX_RANKED).is_empty());
    }
}
