use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::KiraError;

pub const CONFIG_FILE_NAME: &str = "kira-prs.json";
pub const DEFAULT_GWAS_BASE_URL: &str = "https://www.ebi.ac.uk/gwas/rest/api";
pub const DEFAULT_SEARCH_BASE_URL: &str = "https://www.googleapis.com/customsearch/v1";
pub const DEFAULT_MAX_MARKERS: usize = 50;
pub const DEFAULT_SUMMARY_MODEL: &str = "palmyra";

pub const SEARCH_API_KEY_ENV: &str = "GOOGLE_SEARCH_API_KEY";
pub const SEARCH_ENGINE_ID_ENV: &str = "GOOGLE_CUSTOM_SEARCH_CX";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub gwas: Option<GwasSection>,
    #[serde(default)]
    pub search: Option<SearchSection>,
    #[serde(default)]
    pub retry: Option<RetrySection>,
    #[serde(default)]
    pub max_markers: Option<usize>,
    #[serde(default)]
    pub summary_model: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct GwasSection {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub max_studies: Option<usize>,
    #[serde(default)]
    pub study_pacing_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct SearchSection {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub engine_id: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RetrySection {
    #[serde(default)]
    pub max_attempts: Option<usize>,
    #[serde(default)]
    pub initial_delay_ms: Option<u64>,
    #[serde(default)]
    pub inter_term_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchCredentials {
    pub api_key: String,
    pub engine_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per term, the first try included.
    pub max_attempts: usize,
    pub initial_delay: Duration,
    pub inter_term_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            inter_term_delay: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GwasSettings {
    pub base_url: String,
    pub max_studies: usize,
    pub study_pacing: Duration,
}

impl Default for GwasSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_GWAS_BASE_URL.to_string(),
            max_studies: 50,
            study_pacing: Duration::from_millis(300),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub gwas: GwasSettings,
    pub search_base_url: String,
    pub credentials: Option<SearchCredentials>,
    pub retry: RetryPolicy,
    pub max_markers: usize,
    pub summary_model: String,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            gwas: GwasSettings::default(),
            search_base_url: DEFAULT_SEARCH_BASE_URL.to_string(),
            credentials: None,
            retry: RetryPolicy::default(),
            max_markers: DEFAULT_MAX_MARKERS,
            summary_model: DEFAULT_SUMMARY_MODEL.to_string(),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path` if given, otherwise `./kira-prs.json`, otherwise the file in
    /// the user config directory. No implicit file means defaults.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, KiraError> {
        let config_path = match path {
            Some(path) => {
                let explicit = PathBuf::from(path);
                if !explicit.exists() {
                    return Err(KiraError::MissingConfig(explicit));
                }
                Some(explicit)
            }
            None => Self::implicit_path(),
        };

        let config = match config_path {
            Some(config_path) => {
                let content = fs::read_to_string(&config_path)
                    .map_err(|_| KiraError::ConfigRead(config_path.clone()))?;
                serde_json::from_str(&content)
                    .map_err(|err| KiraError::ConfigParse(err.to_string()))?
            }
            None => Config::default(),
        };

        let env_key = std::env::var(SEARCH_API_KEY_ENV).ok();
        let env_cx = std::env::var(SEARCH_ENGINE_ID_ENV).ok();
        Ok(Self::resolve_config(config, env_key, env_cx))
    }

    fn implicit_path() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return Some(local);
        }
        ProjectDirs::from("", "", "kira-prs")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
            .filter(|path| path.exists())
    }

    /// Environment credentials take precedence over file credentials.
    pub fn resolve_config(
        config: Config,
        env_api_key: Option<String>,
        env_engine_id: Option<String>,
    ) -> ResolvedConfig {
        let defaults = ResolvedConfig::default();
        let gwas = config.gwas.unwrap_or_default();
        let search = config.search.unwrap_or_default();
        let retry = config.retry.unwrap_or_default();

        let api_key = non_blank(env_api_key).or_else(|| non_blank(search.api_key));
        let engine_id = non_blank(env_engine_id).or_else(|| non_blank(search.engine_id));
        let credentials = match (api_key, engine_id) {
            (Some(api_key), Some(engine_id)) => Some(SearchCredentials { api_key, engine_id }),
            _ => None,
        };

        ResolvedConfig {
            gwas: GwasSettings {
                base_url: gwas.base_url.unwrap_or(defaults.gwas.base_url),
                max_studies: gwas.max_studies.unwrap_or(defaults.gwas.max_studies),
                study_pacing: gwas
                    .study_pacing_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.gwas.study_pacing),
            },
            search_base_url: search.base_url.unwrap_or(defaults.search_base_url),
            credentials,
            retry: RetryPolicy {
                max_attempts: retry
                    .max_attempts
                    .unwrap_or(defaults.retry.max_attempts)
                    .max(1),
                initial_delay: retry
                    .initial_delay_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.retry.initial_delay),
                inter_term_delay: retry
                    .inter_term_delay_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.retry.inter_term_delay),
            },
            max_markers: config.max_markers.unwrap_or(defaults.max_markers),
            summary_model: config.summary_model.unwrap_or(defaults.summary_model),
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
