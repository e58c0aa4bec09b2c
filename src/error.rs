use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum KiraError {
    #[error("invalid marker id: {0}")]
    InvalidMarkerId(String),

    #[error("missing config file kira-prs.json at {0}")]
    MissingConfig(PathBuf),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("GWAS Catalog request failed: {0}")]
    GwasHttp(String),

    #[error("GWAS Catalog returned status {status}: {message}")]
    GwasStatus { status: u16, message: String },

    #[error("web search request failed: {0}")]
    SearchHttp(String),

    #[error("web search returned status {status}: {message}")]
    SearchStatus { status: u16, message: String },

    #[error("web search rate limited (429) after {attempts} attempts")]
    RateLimited { attempts: usize },

    #[error(
        "genotype file is missing required columns (expected: {required:?}). Found columns: {found:?}. Missing: {missing:?}"
    )]
    #[diagnostic(help("the identifier column may also be named `rs id`, `snp id` or `marker`"))]
    MissingColumns {
        required: Vec<String>,
        found: Vec<String>,
        missing: Vec<String>,
    },

    #[error("failed to read genotype file {path}: {message}")]
    GenotypeRead { path: PathBuf, message: String },

    #[error("failed to parse genotype file: {0}")]
    GenotypeParse(String),

    #[error("invalid evidence profile for {0}: expected a mapping of marker id to evidence")]
    ProfileShape(String),

    #[error("failed to parse evidence profile: {0}")]
    ProfileParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
