use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{RecordBatch, StringArray, UInt32Array};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use chrono::{DateTime, Utc};
use mcw_core::{PageEvent, PageSnapshot, TimelineEvent};
use mcw_quality::PatternReport;
use mcw_storage::ArtifactStore;
use parquet::arrow::ArrowWriter;
use serde::{Deserialize, Serialize};
use tokio::fs;
use uuid::Uuid;

pub const TIMELINE_FILE: &str = "timeline.json";
pub const DAILY_BRIEF_FILE: &str = "daily_brief.md";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketTally {
    pub crawled: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: String,
    pub persistence_mode: String,
    pub markets: BTreeMap<String, MarketTally>,
}

impl RunInfo {
    pub fn totals(&self) -> MarketTally {
        self.markets.values().fold(MarketTally::default(), |mut acc, t| {
            acc.crawled += t.crawled;
            acc.created += t.created;
            acc.updated += t.updated;
            acc.unchanged += t.unchanged;
            acc.skipped += t.skipped;
            acc
        })
    }
}

/// Contents of `reports/<run_id>/timeline.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run: RunInfo,
    pub events: Vec<TimelineEvent>,
    pub pattern: PatternReport,
    pub pages: Vec<PageSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParquetManifest {
    pub schema_version: u32,
    pub files: Vec<ParquetManifestFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParquetManifestFile {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

pub async fn write_reports(reports_root: &Path, report: &RunReport) -> Result<PathBuf> {
    let reports_dir = reports_root.join(report.run.run_id.to_string());
    fs::create_dir_all(&reports_dir)
        .await
        .with_context(|| format!("creating {}", reports_dir.display()))?;

    fs::write(reports_dir.join(DAILY_BRIEF_FILE), daily_brief(report))
        .await
        .with_context(|| format!("writing {DAILY_BRIEF_FILE}"))?;

    let json = serde_json::to_vec_pretty(report).context("serializing run report")?;
    fs::write(reports_dir.join(TIMELINE_FILE), json)
        .await
        .with_context(|| format!("writing {TIMELINE_FILE}"))?;

    Ok(reports_dir)
}

fn daily_brief(report: &RunReport) -> String {
    let run = &report.run;
    let totals = run.totals();
    let mut lines = vec![
        "# Market Content Watch Daily Brief".to_string(),
        String::new(),
        format!("- Run ID: `{}`", run.run_id),
        format!("- Started: {}", run.started_at),
        format!("- Finished: {}", run.finished_at),
        format!("- Persistence: {}", run.persistence_mode),
        format!(
            "- Pages: {} crawled, {} created, {} updated, {} unchanged, {} skipped",
            totals.crawled, totals.created, totals.updated, totals.unchanged, totals.skipped
        ),
        String::new(),
        "## Markets".to_string(),
    ];
    for (market, t) in &run.markets {
        match &t.error {
            Some(err) => lines.push(format!("- {market}: failed ({err})")),
            None => lines.push(format!(
                "- {market}: {} crawled, {} created, {} updated, {} skipped",
                t.crawled, t.created, t.updated, t.skipped
            )),
        }
    }
    lines.push(String::new());
    lines.push("## Pattern".to_string());
    match (&report.pattern.pattern_type, &report.pattern.affected_markets) {
        (Some(kind), Some(markets)) => lines.push(format!(
            "- {} across {} (confidence {:.2})",
            kind.as_str(),
            markets.join(", "),
            report.pattern.confidence.unwrap_or_default()
        )),
        _ => lines.push("- none detected".to_string()),
    }
    lines.push(String::new());
    lines.push("## Top events".to_string());
    for event in report.events.iter().take(10) {
        lines.push(format!(
            "- [{}] {} {}",
            event.market.as_deref().unwrap_or("all"),
            event.event_type.map(|t| t.as_str()).unwrap_or("unknown"),
            event.title.as_deref().unwrap_or("(untitled)")
        ));
    }
    lines.push(String::new());
    lines.join("\n")
}

pub async fn export_parquet_snapshots(
    reports_dir: &Path,
    pages: &[PageSnapshot],
    events: &[PageEvent],
) -> Result<PathBuf> {
    let snapshot_dir = reports_dir.join("snapshots");
    fs::create_dir_all(&snapshot_dir)
        .await
        .with_context(|| format!("creating {}", snapshot_dir.display()))?;

    let pages_path = snapshot_dir.join("pages.parquet");
    let events_path = snapshot_dir.join("events.parquet");
    write_pages_parquet(&pages_path, pages)?;
    write_events_parquet(&events_path, events)?;

    let manifest = ParquetManifest {
        schema_version: 1,
        files: vec![
            manifest_entry("pages", reports_dir, &pages_path)?,
            manifest_entry("events", reports_dir, &events_path)?,
        ],
    };

    let manifest_path = snapshot_dir.join("manifest.json");
    let bytes = serde_json::to_vec_pretty(&manifest).context("serializing parquet manifest")?;
    fs::write(&manifest_path, bytes)
        .await
        .with_context(|| format!("writing {}", manifest_path.display()))?;
    Ok(manifest_path)
}

fn write_parquet(path: &Path, batch: RecordBatch) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(())
}

fn write_pages_parquet(path: &Path, pages: &[PageSnapshot]) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("url", DataType::Utf8, false),
        ArrowField::new("market", DataType::Utf8, false),
        ArrowField::new("language", DataType::Utf8, true),
        ArrowField::new("title", DataType::Utf8, true),
        ArrowField::new("category", DataType::Utf8, true),
        ArrowField::new("content_type", DataType::Utf8, true),
        ArrowField::new("word_count", DataType::UInt32, false),
        ArrowField::new("change_pct", DataType::UInt32, false),
        ArrowField::new("quality_score", DataType::UInt32, false),
        ArrowField::new("change_hash", DataType::Utf8, false),
        ArrowField::new("last_modified_at", DataType::Utf8, false),
    ]));

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(StringArray::from(pages.iter().map(|p| Some(p.url.as_str())).collect::<Vec<_>>())),
            Arc::new(StringArray::from(pages.iter().map(|p| Some(p.market.as_str())).collect::<Vec<_>>())),
            Arc::new(StringArray::from(pages.iter().map(|p| p.language.as_deref()).collect::<Vec<_>>())),
            Arc::new(StringArray::from(pages.iter().map(|p| p.title.as_deref()).collect::<Vec<_>>())),
            Arc::new(StringArray::from(pages.iter().map(|p| p.category.as_deref()).collect::<Vec<_>>())),
            Arc::new(StringArray::from(pages.iter().map(|p| p.content_type.as_deref()).collect::<Vec<_>>())),
            Arc::new(UInt32Array::from(pages.iter().map(|p| p.word_count).collect::<Vec<_>>())),
            Arc::new(UInt32Array::from(pages.iter().map(|p| u32::from(p.change_pct)).collect::<Vec<_>>())),
            Arc::new(UInt32Array::from(pages.iter().map(|p| u32::from(p.quality_score)).collect::<Vec<_>>())),
            Arc::new(StringArray::from(pages.iter().map(|p| Some(p.change_hash.as_str())).collect::<Vec<_>>())),
            Arc::new(StringArray::from(
                pages.iter().map(|p| Some(p.last_modified_at.to_rfc3339())).collect::<Vec<_>>(),
            )),
        ],
    )
    .context("building pages record batch")?;
    write_parquet(path, batch)
}

fn write_events_parquet(path: &Path, events: &[PageEvent]) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("id", DataType::Utf8, false),
        ArrowField::new("event_type", DataType::Utf8, false),
        ArrowField::new("event_at", DataType::Utf8, false),
        ArrowField::new("market", DataType::Utf8, true),
        ArrowField::new("page_url", DataType::Utf8, true),
        ArrowField::new("title", DataType::Utf8, true),
        ArrowField::new("change_pct", DataType::UInt32, true),
        ArrowField::new("impact", DataType::Utf8, true),
    ]));

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(StringArray::from(events.iter().map(|e| Some(e.id.to_string())).collect::<Vec<_>>())),
            Arc::new(StringArray::from(
                events.iter().map(|e| Some(e.event_type.as_str())).collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                events.iter().map(|e| Some(e.event_at.to_rfc3339())).collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(events.iter().map(|e| e.market.as_deref()).collect::<Vec<_>>())),
            Arc::new(StringArray::from(events.iter().map(|e| e.page_url.as_deref()).collect::<Vec<_>>())),
            Arc::new(StringArray::from(events.iter().map(|e| e.title.as_deref()).collect::<Vec<_>>())),
            Arc::new(UInt32Array::from(
                events.iter().map(|e| e.change_pct.map(u32::from)).collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                events.iter().map(|e| e.impact.map(|i| i.as_str())).collect::<Vec<_>>(),
            )),
        ],
    )
    .context("building events record batch")?;
    write_parquet(path, batch)
}

fn manifest_entry(name: &str, reports_dir: &Path, path: &Path) -> Result<ParquetManifestFile> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let rel = path.strip_prefix(reports_dir).unwrap_or(path).display().to_string();
    Ok(ParquetManifestFile {
        name: name.to_string(),
        path: rel,
        sha256: ArtifactStore::sha256_hex(&bytes),
        bytes: bytes.len() as u64,
    })
}

/// Run reports under `reports_root`, newest first by `finished_at`. Unreadable runs are skipped.
pub fn list_run_reports(reports_root: &Path) -> Result<Vec<RunReport>> {
    if !reports_root.exists() {
        return Ok(Vec::new());
    }
    let mut reports = Vec::new();
    for entry in std::fs::read_dir(reports_root).with_context(|| format!("reading {}", reports_root.display()))? {
        let entry = entry.with_context(|| format!("listing {}", reports_root.display()))?;
        let path = entry.path().join(TIMELINE_FILE);
        let Ok(text) = std::fs::read_to_string(&path) else {
            continue;
        };
        match serde_json::from_str::<RunReport>(&text) {
            Ok(report) => reports.push(report),
            Err(err) => tracing::warn!(path = %path.display(), error = %err, "skipping unreadable run report"),
        }
    }
    reports.sort_by(|a, b| b.run.finished_at.cmp(&a.run.finished_at));
    Ok(reports)
}

pub fn latest_run_report(reports_root: &Path) -> Result<Option<RunReport>> {
    Ok(list_run_reports(reports_root)?.into_iter().next())
}

/// Markdown digest of the most recent `runs` sync runs.
pub fn report_recent_runs_markdown(runs: usize, reports_root: &Path) -> Result<String> {
    let reports = list_run_reports(reports_root)?;
    let mut lines = vec!["# Market Content Watch Recent Runs".to_string(), String::new()];
    for report in reports.iter().take(runs.max(1)) {
        let totals = report.run.totals();
        let dir = reports_root.join(report.run.run_id.to_string());
        lines.push(format!("## Run `{}`", report.run.run_id));
        lines.push(format!("- finished: {}", report.run.finished_at));
        lines.push(format!("- markets: {}", report.run.markets.len()));
        lines.push(format!(
            "- pages: {} created, {} updated, {} skipped",
            totals.created, totals.updated, totals.skipped
        ));
        lines.push(format!("- timeline events: {}", report.events.len()));
        if let Some(kind) = report.pattern.pattern_type {
            lines.push(format!("- pattern: {}", kind.as_str()));
        }
        let manifest = dir.join("snapshots").join("manifest.json");
        if manifest.exists() {
            lines.push(format!("- parquet manifest: `{}`", manifest.display()));
        }
        lines.push(String::new());
    }
    Ok(lines.join("\n"))
}
