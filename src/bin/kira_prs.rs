use std::fs;
use std::process::ExitCode;

use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use kira_gwas_prs::aggregate::{EvidenceMap, VariantAggregator};
use kira_gwas_prs::config::{ConfigLoader, ResolvedConfig};
use kira_gwas_prs::error::KiraError;
use kira_gwas_prs::gwas::GwasCatalogHttpClient;
use kira_gwas_prs::output::{JsonOutput, ResearchOutput, TracingProgress};
use kira_gwas_prs::pacing::ThreadPause;
use kira_gwas_prs::pipeline::{ResearchPipeline, SkipSummarizer};
use kira_gwas_prs::rank::{DEFAULT_MAX_RANKED, rank_markers};
use kira_gwas_prs::scoring::{EvidenceProfile, RiskScoreEngine};
use kira_gwas_prs::search::{CustomSearchHttpClient, EvidenceFetcher};

#[derive(Parser)]
#[command(name = "kira-prs")]
#[command(about = "GWAS Catalog evidence aggregation and polygenic risk scoring")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Collect and rank GWAS evidence for a condition")]
    Research(ResearchArgs),
    #[command(about = "Score a genotype file against condition risk profiles")]
    Assess(AssessArgs),
    #[command(about = "Rank a saved variant evidence map by cross-study reliability")]
    Rank(RankArgs),
}

#[derive(Args)]
struct ResearchArgs {
    condition: String,

    #[arg(long)]
    max_markers: Option<usize>,

    #[arg(long)]
    output: Option<Utf8PathBuf>,
}

#[derive(Args)]
struct AssessArgs {
    #[arg(long)]
    genotypes: Utf8PathBuf,

    /// JSON mapping of condition -> marker -> evidence
    #[arg(long)]
    profile: Option<Utf8PathBuf>,

    /// Output of `kira-prs research`, used as the profile for its condition
    #[arg(long)]
    research: Vec<Utf8PathBuf>,

    /// Only assess these conditions
    #[arg(long = "condition")]
    conditions: Vec<String>,

    #[arg(long)]
    output: Option<Utf8PathBuf>,
}

#[derive(Args)]
struct RankArgs {
    #[arg(long)]
    evidence: Utf8PathBuf,

    #[arg(long, default_value_t = DEFAULT_MAX_RANKED)]
    max: usize,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(kira) = report.downcast_ref::<KiraError>() {
            return ExitCode::from(map_exit_code(kira));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &KiraError) -> u8 {
    match error {
        KiraError::MissingConfig(_)
        | KiraError::ConfigRead(_)
        | KiraError::ConfigParse(_)
        | KiraError::MissingColumns { .. }
        | KiraError::GenotypeRead { .. }
        | KiraError::GenotypeParse(_)
        | KiraError::ProfileShape(_)
        | KiraError::ProfileParse(_)
        | KiraError::InvalidMarkerId(_) => 2,
        KiraError::GwasHttp(_)
        | KiraError::GwasStatus { .. }
        | KiraError::SearchHttp(_)
        | KiraError::SearchStatus { .. }
        | KiraError::RateLimited { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ConfigLoader::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Research(args) => run_research(args, config),
        Commands::Assess(args) => run_assess(args),
        Commands::Rank(args) => run_rank(args),
    }
}

fn run_research(args: ResearchArgs, config: ResolvedConfig) -> miette::Result<()> {
    let catalog = GwasCatalogHttpClient::new(&config.gwas)?;
    let aggregator = VariantAggregator::new(
        catalog,
        ThreadPause,
        config.gwas.max_studies,
        config.gwas.study_pacing,
    );
    let transport = match config.credentials.clone() {
        Some(credentials) => Some(CustomSearchHttpClient::new(
            credentials,
            &config.search_base_url,
        )?),
        None => {
            tracing::warn!("web search credentials not configured; web evidence will be skipped");
            None
        }
    };
    let fetcher = EvidenceFetcher::new(transport, config.retry, ThreadPause);
    let pipeline = ResearchPipeline::new(
        aggregator,
        fetcher,
        SkipSummarizer,
        args.max_markers.unwrap_or(config.max_markers),
        &config.summary_model,
    );

    let state = pipeline.run(&args.condition, &TracingProgress);
    match args.output {
        Some(path) => {
            JsonOutput::write_json(&ResearchOutput::from(&state), &path)?;
            eprintln!("{}", state.current_step_message);
            Ok(())
        }
        None => JsonOutput::print_research(&state).into_diagnostic(),
    }
}

fn run_assess(args: AssessArgs) -> miette::Result<()> {
    let mut profiles = EvidenceProfile::new();
    if let Some(path) = &args.profile {
        let value = read_json(path)?;
        let Value::Object(entries) = value else {
            return Err(KiraError::ProfileParse(format!(
                "{path}: expected an object of condition -> variants"
            ))
            .into());
        };
        profiles.extend(entries);
    }
    for path in &args.research {
        let value = read_json(path)?;
        let (condition, entry) = RiskScoreEngine::profile_entry_from_report(&value).ok_or_else(
            || KiraError::ProfileParse(format!("{path}: not a research report")),
        )?;
        profiles.insert(condition, entry);
    }
    if profiles.is_empty() {
        return Err(miette::Report::msg(
            "no risk profiles given (use --profile or --research)",
        ));
    }
    let unknown = RiskScoreEngine::select_conditions(&mut profiles, &args.conditions);
    for condition in &unknown {
        tracing::warn!(condition = %condition, "no risk profile loaded for requested condition");
    }
    if profiles.is_empty() {
        return Err(miette::Report::msg(format!(
            "none of the requested conditions have a risk profile: {}",
            unknown.join(", ")
        )));
    }

    let results = RiskScoreEngine::assess_file(args.genotypes.as_std_path(), &profiles);
    match args.output {
        Some(path) => Ok(JsonOutput::write_json(&results, &path)?),
        None => JsonOutput::print_assessment(&results).into_diagnostic(),
    }
}

fn run_rank(args: RankArgs) -> miette::Result<()> {
    let value = read_json(&args.evidence)?;
    let details = RiskScoreEngine::profile_entry_from_report(&value)
        .map(|(_, details)| details)
        .unwrap_or(value);
    let evidence: EvidenceMap = serde_json::from_value(details)
        .map_err(|err| KiraError::ProfileParse(err.to_string()))?;
    let ranked = rank_markers(&evidence, args.max);
    JsonOutput::print_json(&ranked).into_diagnostic()
}

fn read_json(path: &Utf8Path) -> Result<Value, KiraError> {
    let content = fs::read_to_string(path.as_std_path())
        .map_err(|err| KiraError::Filesystem(format!("read {path}: {err}")))?;
    serde_json::from_str(&content).map_err(|err| KiraError::ProfileParse(format!("{path}: {err}")))
}
