use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::{RsId, lenient_f64, parse_risk_allele_name};
use crate::gwas::{Association, GwasCatalog, Locus};
use crate::pacing::Pause;

/// Merged evidence for one marker across every study that reported it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "StoredEvidence")]
pub struct VariantEvidence {
    pub id: RsId,
    pub risk_allele: Option<String>,
    pub odds_ratio: Option<f64>,
    pub beta: Option<f64>,
    pub p_value: Option<f64>,
    pub reported_gene: Option<String>,
    mention_count: usize,
    study_ids: BTreeSet<String>,
}

/// Saved form of [`VariantEvidence`]; the mention count is always rebuilt from
/// the study ids.
#[derive(Debug, Deserialize)]
struct StoredEvidence {
    id: RsId,
    #[serde(default)]
    risk_allele: Option<String>,
    #[serde(default)]
    odds_ratio: Option<f64>,
    #[serde(default)]
    beta: Option<f64>,
    #[serde(default)]
    p_value: Option<f64>,
    #[serde(default)]
    pvalue: Option<f64>,
    #[serde(default)]
    reported_gene: Option<String>,
    #[serde(default)]
    study_ids: BTreeSet<String>,
}

impl From<StoredEvidence> for VariantEvidence {
    fn from(stored: StoredEvidence) -> Self {
        let mut evidence = VariantEvidence::new(stored.id);
        evidence.risk_allele = stored.risk_allele;
        evidence.odds_ratio = stored.odds_ratio;
        evidence.beta = stored.beta;
        evidence.p_value = stored.p_value.or(stored.pvalue);
        evidence.reported_gene = stored.reported_gene;
        for study in &stored.study_ids {
            evidence.add_study(study);
        }
        evidence
    }
}

impl VariantEvidence {
    pub fn new(id: RsId) -> Self {
        Self {
            id,
            risk_allele: None,
            odds_ratio: None,
            beta: None,
            p_value: None,
            reported_gene: None,
            mention_count: 0,
            study_ids: BTreeSet::new(),
        }
    }

    pub fn mention_count(&self) -> usize {
        self.mention_count
    }

    pub fn study_ids(&self) -> &BTreeSet<String> {
        &self.study_ids
    }

    /// Returns `false` when the study was already counted.
    pub fn add_study(&mut self, accession_id: &str) -> bool {
        let inserted = self.study_ids.insert(accession_id.to_string());
        self.mention_count = self.study_ids.len();
        inserted
    }

    /// Keeps the most significant p-value seen.
    pub fn offer_p_value(&mut self, p_value: Option<f64>) {
        if let Some(candidate) = p_value {
            match self.p_value {
                Some(current) if current <= candidate => {}
                _ => self.p_value = Some(candidate),
            }
        }
    }

    /// First non-empty gene wins; later sources never overwrite it.
    pub fn offer_gene(&mut self, gene: Option<&str>) {
        if self.reported_gene.is_none() {
            if let Some(gene) = gene.filter(|g| !g.is_empty() && !g.eq_ignore_ascii_case("unknown"))
            {
                self.reported_gene = Some(gene.to_string());
            }
        }
    }

    pub fn offer_risk_allele(&mut self, allele: Option<&str>) {
        if self.risk_allele.is_none() {
            self.risk_allele = allele.map(str::to_string);
        }
    }
}

pub type EvidenceMap = BTreeMap<RsId, VariantEvidence>;

/// One `riskAlleleName` sighting inside a study's association listing.
#[derive(Debug, Clone, Copy)]
pub struct Sighting<'a> {
    pub study_id: &'a str,
    pub association: &'a Association,
    pub locus: &'a Locus,
    pub risk_allele_name: &'a str,
}

/// Folds a single sighting into `evidence`. Returns the marker when the name
/// carried a parseable rsID.
pub fn merge_sighting(evidence: &mut EvidenceMap, sighting: Sighting<'_>) -> Option<RsId> {
    let (id, allele) = parse_risk_allele_name(sighting.risk_allele_name)?;
    let p_value = sighting.association.pvalue.as_ref().and_then(lenient_f64);
    let gene = sighting.locus.reported_gene();

    match evidence.get_mut(&id) {
        Some(current) => {
            current.add_study(sighting.study_id);
            current.offer_p_value(p_value);
            current.offer_gene(gene);
            current.offer_risk_allele(allele.as_deref());
        }
        None => {
            let mut record = VariantEvidence::new(id.clone());
            record.add_study(sighting.study_id);
            record.risk_allele = allele;
            record.p_value = p_value;
            record.offer_gene(gene);
            record.odds_ratio = sighting.association.or_per_copy_num.as_ref().and_then(lenient_f64);
            record.beta = sighting.association.beta_num.as_ref().and_then(lenient_f64);
            info!(marker = %id, risk_allele = ?record.risk_allele, "new marker");
            evidence.insert(id.clone(), record);
        }
    }
    Some(id)
}

/// Merges every sighting in one study's associations.
pub fn merge_study(evidence: &mut EvidenceMap, study_id: &str, associations: &[Association]) -> usize {
    let mut sightings = 0usize;
    for association in associations {
        for locus in &association.loci {
            for risk_allele in &locus.strongest_risk_alleles {
                let Some(name) = risk_allele.risk_allele_name.as_deref() else {
                    continue;
                };
                let sighting = Sighting {
                    study_id,
                    association,
                    locus,
                    risk_allele_name: name,
                };
                if merge_sighting(evidence, sighting).is_some() {
                    sightings += 1;
                }
            }
        }
    }
    sightings
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum DiscoveryStatus {
    Found,
    NoStudies,
    NoMarkers,
    SearchFailed(String),
}

#[derive(Debug, Clone)]
pub struct Discovery {
    pub status: DiscoveryStatus,
    pub markers: BTreeSet<RsId>,
    pub evidence: EvidenceMap,
    pub studies_searched: usize,
    pub studies_failed: Vec<String>,
}

impl Discovery {
    fn empty(status: DiscoveryStatus) -> Self {
        Self {
            status,
            markers: BTreeSet::new(),
            evidence: EvidenceMap::new(),
            studies_searched: 0,
            studies_failed: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.evidence.is_empty()
    }
}

pub struct VariantAggregator<G: GwasCatalog, P: Pause> {
    catalog: G,
    pause: P,
    max_studies: usize,
    study_pacing: Duration,
}

impl<G: GwasCatalog, P: Pause> VariantAggregator<G, P> {
    pub fn new(catalog: G, pause: P, max_studies: usize, study_pacing: Duration) -> Self {
        Self {
            catalog,
            pause,
            max_studies,
            study_pacing,
        }
    }

    /// Collects every marker the catalog associates with `condition`. A failing
    /// study is logged and skipped; empty outcomes are reported through
    /// [`DiscoveryStatus`] rather than as errors.
    pub fn discover(&self, condition: &str) -> Discovery {
        info!(condition, "searching GWAS Catalog studies");
        let studies = match self.catalog.find_studies(condition, self.max_studies) {
            Ok(studies) => studies,
            Err(err) => {
                warn!(condition, error = %err, "GWAS Catalog study search failed");
                return Discovery::empty(DiscoveryStatus::SearchFailed(err.to_string()));
            }
        };
        if studies.is_empty() {
            warn!(condition, "no studies found");
            return Discovery::empty(DiscoveryStatus::NoStudies);
        }
        info!(condition, count = studies.len(), "found studies");

        let mut discovery = Discovery::empty(DiscoveryStatus::Found);
        let accessions: Vec<&str> = studies
            .iter()
            .take(self.max_studies)
            .filter_map(|study| study.accession_id.as_deref())
            .collect();
        for (index, accession) in accessions.iter().enumerate() {
            if index > 0 {
                self.pause.pause(self.study_pacing);
            }
            discovery.studies_searched += 1;
            match self.catalog.study_associations(accession) {
                Ok(associations) => {
                    let sightings = merge_study(&mut discovery.evidence, accession, &associations);
                    info!(
                        study = accession,
                        associations = associations.len(),
                        sightings,
                        "merged study associations"
                    );
                }
                Err(err) => {
                    warn!(study = accession, error = %err, "skipping study");
                    discovery.studies_failed.push(accession.to_string());
                }
            }
        }

        discovery.markers = discovery.evidence.keys().cloned().collect();
        if discovery.markers.is_empty() {
            discovery.status = DiscoveryStatus::NoMarkers;
        }
        info!(condition, markers = discovery.markers.len(), "marker discovery finished");
        discovery
    }
}
