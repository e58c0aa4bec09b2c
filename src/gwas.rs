use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::GwasSettings;
use crate::error::KiraError;

const MAX_ASSOCIATION_PAGES: usize = 20;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Study {
    #[serde(default)]
    pub accession_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Association {
    #[serde(default)]
    pub pvalue: Option<Value>,
    #[serde(default)]
    pub or_per_copy_num: Option<Value>,
    #[serde(default)]
    pub beta_num: Option<Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub loci: Vec<Locus>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Locus {
    #[serde(default, deserialize_with = "null_as_default")]
    pub strongest_risk_alleles: Vec<RiskAllele>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub author_reported_genes: Vec<ReportedGene>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAllele {
    #[serde(default)]
    pub risk_allele_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportedGene {
    #[serde(default)]
    pub gene_name: Option<String>,
}

impl Locus {
    /// First author-reported gene, ignoring the catalog's "Unknown" placeholder.
    pub fn reported_gene(&self) -> Option<&str> {
        self.author_reported_genes
            .first()
            .and_then(|gene| gene.gene_name.as_deref())
            .map(str::trim)
            .filter(|name| !name.is_empty() && !name.eq_ignore_ascii_case("unknown"))
    }
}

/// Read-only access to the GWAS Catalog REST API.
pub trait GwasCatalog: Send + Sync {
    fn find_studies(&self, disease_trait: &str, limit: usize) -> Result<Vec<Study>, KiraError>;
    fn study_associations(&self, accession_id: &str) -> Result<Vec<Association>, KiraError>;
}

impl<G: GwasCatalog + ?Sized> GwasCatalog for &G {
    fn find_studies(&self, disease_trait: &str, limit: usize) -> Result<Vec<Study>, KiraError> {
        (**self).find_studies(disease_trait, limit)
    }

    fn study_associations(&self, accession_id: &str) -> Result<Vec<Association>, KiraError> {
        (**self).study_associations(accession_id)
    }
}

#[derive(Debug, Deserialize)]
struct HalPage<E> {
    #[serde(rename = "_embedded")]
    embedded: Option<E>,
    #[serde(rename = "_links", default)]
    links: Option<HalLinks>,
}

#[derive(Debug, Default, Deserialize)]
struct HalLinks {
    #[serde(default)]
    next: Option<HalLink>,
}

#[derive(Debug, Deserialize)]
struct HalLink {
    href: String,
}

#[derive(Debug, Deserialize)]
struct StudyList {
    #[serde(default, deserialize_with = "null_as_default")]
    studies: Vec<Study>,
}

#[derive(Debug, Deserialize)]
struct AssociationList {
    #[serde(default, deserialize_with = "null_as_default")]
    associations: Vec<Association>,
}

impl<E> HalPage<E> {
    fn next_href(&self) -> Option<&str> {
        self.links
            .as_ref()
            .and_then(|links| links.next.as_ref())
            .map(|link| link.href.as_str())
    }
}

#[derive(Clone)]
pub struct GwasCatalogHttpClient {
    client: Client,
    base_url: String,
}

impl GwasCatalogHttpClient {
    pub fn new(settings: &GwasSettings) -> Result<Self, KiraError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-prs/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| KiraError::GwasHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(45))
            .build()
            .map_err(|err| KiraError::GwasHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn get_page<E: DeserializeOwned>(
        &self,
        request: reqwest::blocking::RequestBuilder,
    ) -> Result<HalPage<E>, KiraError> {
        let response = request
            .send()
            .map_err(|err| KiraError::GwasHttp(err.to_string()))?;
        let response = Self::handle_status(response)?;
        response
            .json()
            .map_err(|err| KiraError::GwasHttp(err.to_string()))
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, KiraError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "GWAS Catalog request failed".to_string());
        Err(KiraError::GwasStatus { status, message })
    }
}

impl GwasCatalog for GwasCatalogHttpClient {
    fn find_studies(&self, disease_trait: &str, limit: usize) -> Result<Vec<Study>, KiraError> {
        let url = format!("{}/studies/search/findByDiseaseTrait", self.base_url);
        let mut page: HalPage<StudyList> = self.get_page(
            self.client
                .get(&url)
                .query(&[("diseaseTrait", disease_trait)]),
        )?;
        let mut studies = Vec::new();
        loop {
            if let Some(list) = page.embedded.take() {
                studies.extend(list.studies);
            }
            if studies.len() >= limit {
                studies.truncate(limit);
                break;
            }
            let Some(next) = page.next_href().map(str::to_string) else {
                break;
            };
            debug!(url = %next, "following study search page");
            page = self.get_page(self.client.get(&next))?;
        }
        Ok(studies)
    }

    fn study_associations(&self, accession_id: &str) -> Result<Vec<Association>, KiraError> {
        let url = format!("{}/studies/{}/associations", self.base_url, accession_id);
        let first: HalPage<AssociationList> = self.get_page(self.client.get(&url))?;
        let (lists, truncated) = follow_pages(first, MAX_ASSOCIATION_PAGES, |next| {
            self.get_page(self.client.get(next))
        })?;
        let associations: Vec<Association> =
            lists.into_iter().flat_map(|list| list.associations).collect();
        if truncated {
            warn!(
                study = accession_id,
                pages = MAX_ASSOCIATION_PAGES,
                associations = associations.len(),
                "association page limit reached, remaining pages skipped"
            );
        }
        Ok(associations)
    }
}

/// Collects the embedded payloads of up to `max_pages` linked pages. The flag
/// is set when a `next` link was left unfollowed.
fn follow_pages<E, F>(
    first: HalPage<E>,
    max_pages: usize,
    mut fetch: F,
) -> Result<(Vec<E>, bool), KiraError>
where
    F: FnMut(&str) -> Result<HalPage<E>, KiraError>,
{
    let mut page = first;
    let mut items = Vec::new();
    let mut pages = 1usize;
    loop {
        if let Some(embedded) = page.embedded.take() {
            items.push(embedded);
        }
        let Some(next) = page.next_href().map(str::to_string) else {
            return Ok((items, false));
        };
        if pages >= max_pages {
            return Ok((items, true));
        }
        page = fetch(&next)?;
        pages += 1;
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
