use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mcw_core::PageDraft;
use mcw_quality::{fingerprint, rank_rising_keywords, KeywordTrend, QualityValidator, RankedKeyword, ValidationReport};
use mcw_sync::{load_quality_config, report_recent_runs_markdown, SyncConfig};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "mcw-cli")]
#[command(about = "Market Content Watch command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Crawl every enabled market once and write a run report.
    Sync,
    /// Run syncs on the configured cron schedules until Ctrl-C.
    Schedule,
    /// Serve the JSON dashboard API.
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
    /// Validate and score page drafts from a JSON file (one object or an array).
    Assess { file: PathBuf },
    /// Rank keyword trends from a JSON file by rising score.
    Rising {
        file: PathBuf,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Summarize the most recent sync runs as markdown.
    Report {
        #[arg(long, default_value_t = 5)]
        runs: usize,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DraftInput {
    Many(Vec<PageDraft>),
    One(Box<PageDraft>),
}

#[derive(Debug, Serialize)]
struct AssessedDraft {
    url: Option<String>,
    #[serde(flatten)]
    validation: ValidationReport,
    quality_score: u8,
    fingerprint: String,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn read_drafts(path: &Path) -> Result<Vec<PageDraft>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let input: DraftInput = serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    Ok(match input {
        DraftInput::Many(drafts) => drafts,
        DraftInput::One(draft) => vec![*draft],
    })
}

fn assess_drafts(validator: &QualityValidator, drafts: Vec<PageDraft>) -> Vec<AssessedDraft> {
    drafts
        .into_iter()
        .map(|draft| draft.with_derived_word_count())
        .map(|draft| AssessedDraft {
            validation: validator.validate_for_storage(&draft),
            quality_score: validator.calculate_quality_score(&draft),
            fingerprint: fingerprint(draft.text_content.as_deref()),
            url: draft.url,
        })
        .collect()
}

fn rank_file(path: &Path, limit: usize) -> Result<Vec<RankedKeyword>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let trends: Vec<KeywordTrend> =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    let mut ranked = rank_rising_keywords(&trends);
    ranked.truncate(limit);
    Ok(ranked)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("serializing output")?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let summary = mcw_sync::run_sync_once(config).await?;
            println!(
                "sync complete: run_id={} markets={} created={} updated={} skipped={} reports={}",
                summary.run_id,
                summary.enabled_markets,
                summary.created,
                summary.updated,
                summary.skipped,
                summary.reports_dir
            );
        }
        Commands::Schedule => mcw_sync::run_scheduler_until_ctrl_c(&config).await?,
        Commands::Serve { port } => match port {
            Some(port) => mcw_web::serve(config.workspace_root, port).await?,
            None => mcw_web::serve_from_env().await?,
        },
        Commands::Assess { file } => {
            let validator = QualityValidator::new(load_quality_config(&config.workspace_root)?)
                .context("validating quality rules")?;
            print_json(&assess_drafts(&validator, read_drafts(&file)?))?;
        }
        Commands::Rising { file, limit } => print_json(&rank_file(&file, limit)?)?,
        Commands::Report { runs } => {
            println!("{}", report_recent_runs_markdown(runs, &config.reports_root())?);
        }
    }

    Ok(())
}
