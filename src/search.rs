use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::config::{RetryPolicy, SearchCredentials};
use crate::error::KiraError;
use crate::pacing::Pause;

pub const NOT_CONFIGURED: &str = "Web search not configured";
pub const CONDITION_NOT_CONFIGURED: &str = "Web search not configured for condition research.";
const MAX_SNIPPETS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Condition,
    Marker,
}

impl SearchMode {
    pub fn query(self, term: &str) -> String {
        match self {
            SearchMode::Condition => {
                format!("{term} genetic basis OR overview OR symptoms OR genetic risk factors")
            }
            SearchMode::Marker => format!("{term} genomics significance OR association OR function"),
        }
    }

    fn not_configured(self) -> &'static str {
        match self {
            SearchMode::Condition => CONDITION_NOT_CONFIGURED,
            SearchMode::Marker => NOT_CONFIGURED,
        }
    }
}

pub fn no_results(term: &str) -> String {
    format!("No significant web results found for {term}.")
}

#[derive(Debug, Clone)]
pub struct SearchReply {
    pub status: u16,
    pub body: String,
}

/// One keyed search request. Transport failures are errors; HTTP statuses,
/// 429 included, come back in the reply.
pub trait SearchTransport: Send + Sync {
    fn execute(&self, query: &str) -> Result<SearchReply, KiraError>;
}

impl<T: SearchTransport + ?Sized> SearchTransport for &T {
    fn execute(&self, query: &str) -> Result<SearchReply, KiraError> {
        (**self).execute(query)
    }
}

#[derive(Clone)]
pub struct CustomSearchHttpClient {
    client: Client,
    base_url: String,
    credentials: SearchCredentials,
}

impl CustomSearchHttpClient {
    pub fn new(credentials: SearchCredentials, base_url: &str) -> Result<Self, KiraError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-prs/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| KiraError::SearchHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| KiraError::SearchHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.to_string(),
            credentials,
        })
    }
}

impl SearchTransport for CustomSearchHttpClient {
    fn execute(&self, query: &str) -> Result<SearchReply, KiraError> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("key", self.credentials.api_key.as_str()),
                ("cx", self.credentials.engine_id.as_str()),
                ("q", query),
            ])
            .send()
            .map_err(|err| KiraError::SearchHttp(err.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|err| KiraError::SearchHttp(err.to_string()))?;
        Ok(SearchReply { status, body })
    }
}

/// Sequential, rate-limit-aware web evidence lookup. Every term gets an entry
/// in the result, failures included.
pub struct EvidenceFetcher<T: SearchTransport, P: Pause> {
    transport: Option<T>,
    policy: RetryPolicy,
    pause: P,
}

impl<T: SearchTransport, P: Pause> EvidenceFetcher<T, P> {
    /// `transport` is `None` when no search credentials are configured.
    pub fn new(transport: Option<T>, policy: RetryPolicy, pause: P) -> Self {
        Self {
            transport,
            policy,
            pause,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.transport.is_some()
    }

    pub fn fetch(&self, terms: &[String], mode: SearchMode) -> BTreeMap<String, String> {
        let Some(transport) = self.transport.as_ref() else {
            return terms
                .iter()
                .map(|term| (term.clone(), mode.not_configured().to_string()))
                .collect();
        };

        info!(count = terms.len(), ?mode, "searching web evidence");
        let mut evidence = BTreeMap::new();
        for (index, term) in terms.iter().enumerate() {
            info!(term, position = index + 1, total = terms.len(), "web search");
            let text = match self.search_term(transport, term, mode) {
                Ok(text) => text,
                Err(err) => {
                    warn!(term, error = %err, "web search failed");
                    format!("Error searching web for {term}: {err}")
                }
            };
            evidence.insert(term.clone(), text);
            if index + 1 < terms.len() {
                self.pause.pause(self.policy.inter_term_delay);
            }
        }
        evidence
    }

    fn search_term(&self, transport: &T, term: &str, mode: SearchMode) -> Result<String, KiraError> {
        let query = mode.query(term);
        let max_attempts = self.policy.max_attempts.max(1);
        let mut delay = self.policy.initial_delay;
        for attempt in 1..=max_attempts {
            let reply = transport.execute(&query)?;
            if reply.status == 429 {
                if attempt == max_attempts {
                    return Err(KiraError::RateLimited {
                        attempts: max_attempts,
                    });
                }
                warn!(
                    term,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "rate limited, backing off"
                );
                self.pause.pause(delay);
                delay = delay.saturating_mul(2);
                continue;
            }
            if !(200..300).contains(&reply.status) {
                return Err(KiraError::SearchStatus {
                    status: reply.status,
                    message: reply.body,
                });
            }
            let body: Value = serde_json::from_str(&reply.body)
                .map_err(|err| KiraError::SearchHttp(err.to_string()))?;
            return Ok(join_snippets(&body).unwrap_or_else(|| no_results(term)));
        }
        Err(KiraError::RateLimited {
            attempts: max_attempts,
        })
    }
}

/// Space-joins the first three non-empty result snippets.
pub fn join_snippets(body: &Value) -> Option<String> {
    let items = body.get("items").and_then(|v| v.as_array())?;
    let joined = items
        .iter()
        .take(MAX_SNIPPETS)
        .filter_map(|item| item.get("snippet").and_then(|v| v.as_str()))
        .map(str::trim)
        .filter(|snippet| !snippet.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    (!joined.is_empty()).then_some(joined)
}
