//! Command-line surface.
//!
//! Every command resolves the review by name, opens the store under the
//! configured data directory, and delegates to the library modules. The
//! CLI owns provider wiring (API keys from the environment) so the
//! orchestrator and extractor stay injectable.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use crate::citations::{self, ris};
use crate::config::{self, Config};
use crate::extraction::DataExtractor;
use crate::filters::{self, SecondaryFilter};
use crate::llm;
use crate::model::{Review, Stage};
use crate::prisma::FlowReport;
use crate::protocol::{
    ExtractionVariable, ReviewProtocol, ReviewerConfig, ReviewerRole, VariableType,
};
use crate::screening::{PromptKind, ReviewerHandle, ScreeningOrchestrator};
use crate::store::Store;

#[derive(Parser)]
#[command(name = "sysrev", version, about = "LLM-assisted systematic review screening")]
pub struct Cli {
    /// Alternate config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a review and its protocol file.
    Init {
        /// Review name.
        name: String,
        /// Existing protocol YAML; omit to generate a starter protocol.
        #[arg(long)]
        protocol: Option<PathBuf>,
    },
    /// Import citations from an RIS file, deduplicating against the review.
    Import {
        review: String,
        /// RIS file path.
        file: PathBuf,
    },
    /// Attach extracted full text to a citation.
    Attach {
        review: String,
        citation_id: i64,
        /// Plain-text file with the article content.
        file: PathBuf,
    },
    /// Run a screening stage.
    Screen {
        review: String,
        #[arg(value_enum)]
        stage: StageArg,
    },
    /// Extract protocol variables from full-text-included citations.
    Extract { review: String },
    /// Run the protocol's secondary filters over extracted citations.
    Filter { review: String },
    /// Show review progress.
    Status { review: String },
    /// Print the PRISMA flow report.
    Report {
        review: String,
        /// Emit JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Write extraction records as JSON.
    Export {
        review: String,
        /// Output file path.
        output: PathBuf,
    },
    /// List reviews.
    Reviews,
}

#[derive(Clone, Copy, ValueEnum)]
enum StageArg {
    Abstract,
    Fulltext,
}

impl From<StageArg> for Stage {
    fn from(s: StageArg) -> Self {
        match s {
            StageArg::Abstract => Stage::Abstract,
            StageArg::Fulltext => Stage::Fulltext,
        }
    }
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    let store = Store::open(&config.db_path())?;

    match cli.command {
        Command::Init { name, protocol } => init(&store, &name, protocol.as_deref()),
        Command::Import { review, file } => import(&store, &review, &file),
        Command::Attach {
            review,
            citation_id,
            file,
        } => attach(&store, &review, citation_id, &file),
        Command::Screen { review, stage } => {
            screen(&config, store, &review, stage.into()).await
        }
        Command::Extract { review } => extract(&config, &store, &review).await,
        Command::Filter { review } => filter(&store, &review),
        Command::Status { review } | Command::Report { review, json: false } => {
            let r = find_review(&store, &review)?;
            let report = FlowReport::compute(&store, r.id, &r.name)?;
            print!("{}", report.render_text());
            Ok(())
        }
        Command::Report { review, json: true } => {
            let r = find_review(&store, &review)?;
            let report = FlowReport::compute(&store, r.id, &r.name)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Export { review, output } => export(&store, &review, &output),
        Command::Reviews => {
            for r in store.list_reviews()? {
                println!("{}  (created {})", r.name, r.created_at.format("%Y-%m-%d"));
            }
            Ok(())
        }
    }
}

fn find_review(store: &Store, name: &str) -> Result<Review> {
    store
        .review_by_name(name)?
        .with_context(|| format!("No review named '{name}'. Run `sysrev init {name}` first."))
}

/// Protocol for a review: the path recorded at init time.
fn load_protocol(review: &Review) -> Result<ReviewProtocol> {
    let path = review
        .protocol_path
        .as_deref()
        .with_context(|| format!("Review '{}' has no protocol file recorded", review.name))?;
    ReviewProtocol::from_yaml(Path::new(path))
}

fn init(store: &Store, name: &str, protocol: Option<&Path>) -> Result<()> {
    let path = match protocol {
        Some(p) => {
            // Validate before recording the path.
            ReviewProtocol::from_yaml(p)?;
            p.to_path_buf()
        }
        None => {
            let path = PathBuf::from(format!("{name}.protocol.yaml"));
            if path.exists() {
                anyhow::bail!(
                    "Refusing to overwrite existing {}; pass --protocol to use it",
                    path.display()
                );
            }
            starter_protocol(name).to_yaml(&path)?;
            println!("Wrote starter protocol to {}", path.display());
            path
        }
    };

    store.create_review(name, Some(&path.to_string_lossy()))?;
    println!("Created review '{name}'");
    Ok(())
}

/// A two-reviewer starter protocol the user edits before screening.
fn starter_protocol(name: &str) -> ReviewProtocol {
    let reviewer = |n: &str, template: PromptKind, role| ReviewerConfig {
        name: n.into(),
        model: "claude-haiku-4-5".into(),
        provider: crate::protocol::Provider::Anthropic,
        prompt_template: template,
        custom_prompt: None,
        role,
    };
    ReviewProtocol {
        name: name.into(),
        objective: "Describe the review question here".into(),
        inclusion_criteria: vec!["First inclusion criterion".into()],
        exclusion_criteria: vec!["First exclusion criterion".into()],
        extraction_variables: vec![ExtractionVariable {
            name: "sample_size".into(),
            description: "Number of participants analyzed".into(),
            var_type: VariableType::Integer,
            options: None,
        }],
        model: "claude-sonnet-4-5".into(),
        reviewers: vec![
            reviewer("screener-1", PromptKind::Rigorous, ReviewerRole::Primary),
            reviewer("screener-2", PromptKind::Sensitive, ReviewerRole::Primary),
            ReviewerConfig {
                name: "tiebreaker".into(),
                model: "claude-sonnet-4-5".into(),
                provider: crate::protocol::Provider::Anthropic,
                prompt_template: PromptKind::Rigorous,
                custom_prompt: None,
                role: ReviewerRole::Tiebreaker,
            },
        ],
        escalate_uncertain: false,
        secondary_filters: None,
    }
}

fn import(store: &Store, review: &str, file: &Path) -> Result<()> {
    let r = find_review(store, review)?;
    let parsed = ris::parse_file(file)?;
    let total = parsed.len();
    let summary = citations::import_citations(store, r.id, parsed)?;
    println!(
        "Parsed {total} records: {} new, {} merged into existing citations",
        summary.imported, summary.merged
    );
    Ok(())
}

fn attach(store: &Store, review: &str, citation_id: i64, file: &Path) -> Result<()> {
    let r = find_review(store, review)?;
    let citation = store
        .citation(citation_id)?
        .filter(|c| c.review_id == r.id)
        .with_context(|| format!("No citation {citation_id} in review '{review}'"))?;
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read full text: {}", file.display()))?;
    if text.trim().is_empty() {
        anyhow::bail!("Full-text file is empty: {}", file.display());
    }
    store.attach_fulltext(citation.id, &text)?;
    println!("Attached full text to citation {citation_id} ({})", citation.title);
    Ok(())
}

async fn screen(config: &Config, store: Store, review: &str, stage: Stage) -> Result<()> {
    let r = find_review(&store, review)?;
    let protocol = load_protocol(&r)?;
    let handles = reviewer_handles(&protocol)?;

    let orchestrator = ScreeningOrchestrator::new(
        protocol,
        Arc::new(store),
        handles,
        config.retry,
        config.concurrency,
    )?;
    let summary = orchestrator.run_stage(r.id, stage).await?;

    println!(
        "Screened {} citations at {stage}: {} included, {} excluded, {} uncertain{}{}",
        summary.screened,
        summary.included,
        summary.excluded,
        summary.uncertain,
        if stage == Stage::Fulltext {
            format!(", {} without PDF", summary.pdf_unavailable)
        } else {
            String::new()
        },
        if summary.needs_retry > 0 {
            format!(
                " ({} need retry; run `sysrev screen` again)",
                summary.needs_retry
            )
        } else {
            String::new()
        },
    );
    Ok(())
}

/// One handle per effective reviewer, keys resolved from the environment.
fn reviewer_handles(protocol: &ReviewProtocol) -> Result<Vec<ReviewerHandle>> {
    protocol
        .effective_reviewers()
        .into_iter()
        .map(|config| {
            let key = config::api_key(config.provider)?;
            let client = llm::create_client(config.provider, &key)?;
            Ok(ReviewerHandle { config, client })
        })
        .collect()
}

async fn extract(config: &Config, store: &Store, review: &str) -> Result<()> {
    let r = find_review(store, review)?;
    let protocol = load_protocol(&r)?;
    let key = config::api_key(crate::protocol::Provider::Anthropic)?;
    let client = llm::create_client(crate::protocol::Provider::Anthropic, &key)?;

    let extractor = DataExtractor::new(protocol, client, config.retry, config.concurrency);
    let summary = extractor.run(store, r.id).await?;
    println!(
        "Extracted {} citations ({} without full text, {} failed)",
        summary.extracted, summary.missing_fulltext, summary.failed
    );
    Ok(())
}

fn filter(store: &Store, review: &str) -> Result<()> {
    let r = find_review(store, review)?;
    let protocol = load_protocol(&r)?;
    let rules = protocol.secondary_filters.with_context(|| {
        format!("Protocol for '{review}' defines no secondary_filters section")
    })?;

    let mut items = Vec::new();
    for record in store.extractions(r.id)? {
        let citation = store.citation(record.citation_id)?.with_context(|| {
            format!("Extraction references missing citation {}", record.citation_id)
        })?;
        items.push((citation, record));
    }

    let findings = SecondaryFilter::new(rules).apply(&items);
    if findings.is_empty() {
        println!("All {} extracted citations pass the secondary filters", items.len());
        return Ok(());
    }
    for f in &findings {
        println!("  citation {}: {} ({})", f.citation_id, f.reason, f.details);
    }
    for (reason, count) in filters::summary(&findings) {
        println!("{reason}: {count}");
    }
    println!("Flagged {} of {} extracted citations", findings.len(), items.len());
    Ok(())
}

fn export(store: &Store, review: &str, output: &Path) -> Result<()> {
    let r = find_review(store, review)?;
    let records = store.extractions(r.id)?;

    let mut rows = Vec::with_capacity(records.len());
    for record in &records {
        let citation = store
            .citation(record.citation_id)?
            .with_context(|| format!("Extraction references missing citation {}", record.citation_id))?;
        rows.push(serde_json::json!({
            "citation_id": record.citation_id,
            "title": citation.title,
            "authors": citation.authors,
            "year": citation.year,
            "doi": citation.doi,
            "model": record.model,
            "data": record.data,
        }));
    }

    std::fs::write(output, serde_json::to_string_pretty(&rows)?)
        .with_context(|| format!("Failed to write export: {}", output.display()))?;
    println!("Wrote {} extraction records to {}", rows.len(), output.display());
    Ok(())
}
