use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::domain::{AlleleEffect, ProfileVariant, complement};
use crate::error::KiraError;
use crate::genotype::{Genotype, GenotypeLoader, GenotypeMap};

/// Marker id → evidence for one condition.
pub type ConditionProfile = BTreeMap<String, ProfileVariant>;

/// Condition name → raw profile entry. Entries are shape-checked one condition
/// at a time so a malformed condition does not spoil its siblings.
pub type EvidenceProfile = BTreeMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssessmentStatus {
    AnalysisComplete,
    NoProfileVariants,
    ProfileFormatError,
    PatientDataLoadFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrandMatch {
    Direct,
    Complement,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FoundVariant {
    pub rsid: String,
    pub patient_genotype: String,
    pub expected_risk_allele: Option<String>,
    pub expected_protective_allele: Option<String>,
    pub odds_ratio: Option<f64>,
    pub reported_gene: Option<String>,
    pub p_value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredVariant {
    pub rsid: String,
    pub patient_genotype: String,
    pub effect_allele: String,
    pub allele_type_in_profile: AlleleEffect,
    pub strand_match: StrandMatch,
    pub odds_ratio: f64,
    pub reported_gene: Option<String>,
    pub p_value: Option<f64>,
    pub profile_mention_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissingVariant {
    pub rsid: String,
    pub risk_allele_in_profile: Option<String>,
    pub protective_allele_in_profile: Option<String>,
    pub odds_ratio_in_profile: Option<f64>,
    pub reported_gene_in_profile: Option<String>,
    pub p_value_in_profile: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssessmentResult {
    pub status: AssessmentStatus,
    pub polygenic_risk_score: f64,
    pub risk_variants: Vec<ScoredVariant>,
    pub protective_variants: Vec<ScoredVariant>,
    pub found_variants: Vec<FoundVariant>,
    pub missing_variants: Vec<MissingVariant>,
    pub risk_variants_count: usize,
    pub protective_variants_count: usize,
    pub found_variants_count: usize,
    pub missing_variants_count: usize,
    pub total_profile_variants: usize,
    pub notes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AssessmentResult {
    fn empty(status: AssessmentStatus) -> Self {
        Self {
            status,
            polygenic_risk_score: 0.0,
            risk_variants: Vec::new(),
            protective_variants: Vec::new(),
            found_variants: Vec::new(),
            missing_variants: Vec::new(),
            risk_variants_count: 0,
            protective_variants_count: 0,
            found_variants_count: 0,
            missing_variants_count: 0,
            total_profile_variants: 0,
            notes: Vec::new(),
            error: None,
        }
    }

    pub fn failed(status: AssessmentStatus, error: impl Into<String>) -> Self {
        let mut result = Self::empty(status);
        result.error = Some(error.into());
        result
    }
}

/// Checks whether either call carries `effect_allele`, on the reported strand
/// or, for the four standard bases, on the opposite strand.
pub fn strand_match(genotype: &Genotype, effect_allele: &str) -> Option<StrandMatch> {
    let calls = genotype.calls();
    if calls.contains(&effect_allele) {
        return Some(StrandMatch::Direct);
    }
    complement(effect_allele)
        .filter(|flipped| calls.contains(flipped))
        .map(|_| StrandMatch::Complement)
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// A condition profile with the markers whose evidence could not be read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedProfile {
    pub variants: ConditionProfile,
    pub rejected: Vec<String>,
}

pub struct RiskScoreEngine;

impl RiskScoreEngine {
    /// Only a non-object entry is a shape error. A marker whose evidence does
    /// not parse is left out and noted in `rejected`.
    pub fn parse_condition_profile(
        condition: &str,
        entry: &Value,
    ) -> Result<ParsedProfile, KiraError> {
        let Value::Object(markers) = entry else {
            return Err(KiraError::ProfileShape(condition.to_string()));
        };
        let mut parsed = ParsedProfile::default();
        for (rsid, evidence) in markers {
            match ProfileVariant::deserialize(evidence) {
                Ok(variant) => {
                    parsed.variants.insert(rsid.clone(), variant);
                }
                Err(err) => {
                    warn!(condition, rsid = %rsid, error = %err, "skipping malformed profile marker");
                    parsed
                        .rejected
                        .push(format!("Skipping rsID {rsid}: malformed evidence in profile ({err})."));
                }
            }
        }
        Ok(parsed)
    }

    /// Scores one condition. Item-level problems end up in `notes`.
    pub fn assess_condition(
        genotypes: &GenotypeMap,
        condition: &str,
        profile: &ConditionProfile,
    ) -> AssessmentResult {
        info!(condition, variants = profile.len(), "assessing condition");
        if profile.is_empty() {
            let mut result = AssessmentResult::empty(AssessmentStatus::NoProfileVariants);
            result.notes.push(format!(
                "No genetic risk factors provided in the profile for {condition}."
            ));
            return result;
        }

        let mut result = AssessmentResult::empty(AssessmentStatus::AnalysisComplete);
        let mut score = 0.0f64;

        for (rsid, variant) in profile {
            let Some(genotype) = genotypes.get(rsid) else {
                result.missing_variants.push(MissingVariant {
                    rsid: rsid.clone(),
                    risk_allele_in_profile: variant.risk_allele.clone(),
                    protective_allele_in_profile: variant.protective_allele.clone(),
                    odds_ratio_in_profile: variant.odds_ratio,
                    reported_gene_in_profile: variant.reported_gene.clone(),
                    p_value_in_profile: variant.p_value,
                });
                continue;
            };

            result.found_variants.push(FoundVariant {
                rsid: rsid.clone(),
                patient_genotype: genotype.to_string(),
                expected_risk_allele: variant.risk_allele.clone(),
                expected_protective_allele: variant.protective_allele.clone(),
                odds_ratio: variant.odds_ratio,
                reported_gene: variant.reported_gene.clone(),
                p_value: variant.p_value,
            });

            let Some((effect_allele, effect)) = variant.effect_allele() else {
                result
                    .notes
                    .push(format!("Skipping rsID {rsid}: no risk or protective allele in profile."));
                continue;
            };
            let Some(strand) = strand_match(genotype, &effect_allele) else {
                continue;
            };

            let odds_ratio = match variant.odds_ratio {
                Some(odds_ratio) if odds_ratio > 0.0 => odds_ratio,
                Some(odds_ratio) => {
                    result.notes.push(format!(
                        "Skipping rsID {rsid} for PRS due to invalid odds_ratio for log: {odds_ratio}"
                    ));
                    continue;
                }
                None => {
                    result
                        .notes
                        .push(format!("Skipping rsID {rsid} for PRS: no odds_ratio in profile."));
                    continue;
                }
            };
            let contribution = odds_ratio.ln();
            if !contribution.is_finite() {
                result.notes.push(format!(
                    "Skipping rsID {rsid} for PRS due to invalid odds_ratio for log: {odds_ratio}"
                ));
                continue;
            }
            score += contribution;

            let scored = ScoredVariant {
                rsid: rsid.clone(),
                patient_genotype: genotype.to_string(),
                effect_allele,
                allele_type_in_profile: effect,
                strand_match: strand,
                odds_ratio,
                reported_gene: variant.reported_gene.clone(),
                p_value: variant.p_value,
                profile_mention_count: variant.mention_count.unwrap_or(1),
            };
            if odds_ratio > 1.0 {
                result.risk_variants.push(scored);
            } else if odds_ratio < 1.0 {
                result.protective_variants.push(scored);
            } else {
                result.notes.push(format!(
                    "rsID {rsid} matched with odds_ratio 1.0; neutral, not classified as risk or protective."
                ));
            }
        }

        result.polygenic_risk_score = round4(score);
        result.risk_variants_count = result.risk_variants.len();
        result.protective_variants_count = result.protective_variants.len();
        result.found_variants_count = result.found_variants.len();
        result.missing_variants_count = result.missing_variants.len();
        result.total_profile_variants = profile.len();

        if result.missing_variants_count > 0 {
            warn!(
                condition,
                missing = result.missing_variants_count,
                total = result.total_profile_variants,
                "profile variants absent from patient data"
            );
            result.notes.push(format!(
                "WARNING: {}/{} variants for {condition} were NOT FOUND in the patient's DNA data. Results may be incomplete.",
                result.missing_variants_count, result.total_profile_variants
            ));
        }
        info!(
            condition,
            prs = result.polygenic_risk_score,
            risk = result.risk_variants_count,
            protective = result.protective_variants_count,
            "condition assessed"
        );
        result
    }

    /// Assesses every condition in `profiles`. A genotype load failure, or an
    /// empty genotype map, marks every condition `PatientDataLoadFailed`.
    pub fn assess_profiles(
        genotypes: Result<GenotypeMap, KiraError>,
        profiles: &EvidenceProfile,
    ) -> BTreeMap<String, AssessmentResult> {
        let genotypes = match genotypes {
            Ok(map) if !map.is_empty() => map,
            outcome => {
                let message = match outcome {
                    Err(err) => format!("Failed to load patient DNA: {err}"),
                    Ok(_) => "Failed to load patient DNA data or no valid genotypes found.".to_string(),
                };
                warn!(error = %message, "patient genotype load failed");
                return profiles
                    .keys()
                    .map(|condition| {
                        let result =
                            AssessmentResult::failed(AssessmentStatus::PatientDataLoadFailed, &message);
                        (condition.clone(), result)
                    })
                    .collect();
            }
        };

        profiles
            .iter()
            .map(|(condition, entry)| {
                let result = match Self::parse_condition_profile(condition, entry) {
                    Ok(parsed) => {
                        let mut result =
                            Self::assess_condition(&genotypes, condition, &parsed.variants);
                        result.notes.splice(0..0, parsed.rejected);
                        result
                    }
                    Err(err) => {
                        warn!(condition, error = %err, "skipping malformed profile");
                        AssessmentResult::failed(AssessmentStatus::ProfileFormatError, err.to_string())
                    }
                };
                (condition.clone(), result)
            })
            .collect()
    }

    /// Lifts a compiled research report (or a research output wrapping one) into
    /// a `(condition, profile entry)` pair.
    pub fn profile_entry_from_report(document: &Value) -> Option<(String, Value)> {
        let report = document.get("compiled_report").unwrap_or(document);
        let condition = report.get("condition_researched")?.as_str()?.to_string();
        let details = report.get("variant_details")?.clone();
        Some((condition, details))
    }

    /// Keeps only the `wanted` conditions and returns the requested names that
    /// have no profile. An empty `wanted` keeps everything.
    pub fn select_conditions(profiles: &mut EvidenceProfile, wanted: &[String]) -> Vec<String> {
        if wanted.is_empty() {
            return Vec::new();
        }
        profiles.retain(|condition, _| wanted.contains(condition));
        wanted
            .iter()
            .filter(|name| !profiles.contains_key(*name))
            .cloned()
            .collect()
    }

    pub fn assess_file(path: &Path, profiles: &EvidenceProfile) -> BTreeMap<String, AssessmentResult> {
        Self::assess_profiles(GenotypeLoader::load(path), profiles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complement_only_for_standard_bases() {
        let genotype = Genotype::new("T", "T");
        assert_eq!(strand_match(&genotype, "A"), Some(StrandMatch::Complement));
        assert_eq!(strand_match(&genotype, "T"), Some(StrandMatch::Direct));
        assert_eq!(strand_match(&genotype, "G"), None);

        let indel = Genotype::new("D", "I");
        assert_eq!(strand_match(&indel, "I"), Some(StrandMatch::Direct));
        assert_eq!(strand_match(&Genotype::new("A", "A"), "D"), None);
    }

    #[test]
    fn rounding_to_four_places() {
        assert_eq!(round4(2.0f64.ln()), 0.6931);
        assert_eq!(round4(-0.123456), -0.1235);
    }
}
