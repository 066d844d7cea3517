//! Sync pipeline orchestration: crawl each enabled market, assess pages, persist snapshots and
//! events, detect cross-market patterns and write run reports.

mod assess;
mod config;
mod enrich;
mod report;
mod store;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use mcw_core::{EventType, Impact, PageEvent, TimelineEvent};
use mcw_crawl::{CrawlContext, CrawlSource, FixtureCrawlSource, ScrapingApiSource};
use mcw_quality::{detect_cross_market_patterns_at, sort_events_by_relevance, PatternReport, PatternType, QualityValidator};
use mcw_storage::{ArtifactStore, HttpClientConfig, HttpFetcher, TokenBucketConfig};
use serde::Serialize;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub use assess::{Assessment, PageAssessor};
pub use config::{load_quality_config, CrawlMode, MarketConfig, MarketRegistry, SyncConfig};
pub use enrich::{
    EnrichmentChain, EnrichmentHook, LeadSummaryEnrichmentHook, NoopEnrichmentHook, YamlRuleEnrichmentHook,
    DEFAULT_SUMMARY_CHARS,
};
pub use report::{
    export_parquet_snapshots, latest_run_report, list_run_reports, report_recent_runs_markdown, write_reports,
    MarketTally, ParquetManifest, ParquetManifestFile, RunInfo, RunReport, DAILY_BRIEF_FILE, TIMELINE_FILE,
};
pub use store::{MemoryPageStore, PageStore, PgPageStore};

pub const CRATE_NAME: &str = "mcw-sync";

const PATTERN_LOOKBACK_HOURS: i64 = 1;

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub enabled_markets: usize,
    pub crawled_pages: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub pattern: Option<PatternType>,
    pub reports_dir: String,
    pub parquet_manifest: String,
}

pub struct SyncPipeline {
    config: SyncConfig,
    store: Arc<dyn PageStore>,
    assessor: PageAssessor,
    fixture_source: Arc<dyn CrawlSource>,
    api_source: Option<Arc<dyn CrawlSource>>,
    enrichment: Box<dyn EnrichmentHook>,
}

impl SyncPipeline {
    pub fn new(config: SyncConfig, store: Arc<dyn PageStore>) -> Result<Self> {
        let quality = load_quality_config(&config.workspace_root)?;
        let validator = QualityValidator::new(quality).context("validating quality rules")?;
        let fixture_source: Arc<dyn CrawlSource> = Arc::new(FixtureCrawlSource::new(config.fixtures_root()));

        let api_source = match &config.scraping_api {
            Some(api) => {
                let http = HttpFetcher::new(HttpClientConfig {
                    timeout: Duration::from_secs(config.http_timeout_secs),
                    user_agent: Some(config.user_agent.clone()),
                    token_bucket: TokenBucketConfig::per_minute(config.scraping_api_rate_per_min),
                    ..Default::default()
                })?;
                let source = ScrapingApiSource::new(
                    Arc::new(http),
                    ArtifactStore::new(config.artifacts_dir.clone()),
                    api.clone(),
                );
                Some(Arc::new(source) as Arc<dyn CrawlSource>)
            }
            None => None,
        };

        Ok(Self {
            config,
            store,
            assessor: PageAssessor::new(validator),
            fixture_source,
            api_source,
            enrichment: Box::<NoopEnrichmentHook>::default(),
        })
    }

    pub fn with_enrichment(mut self, enrichment: Box<dyn EnrichmentHook>) -> Self {
        self.enrichment = enrichment;
        self
    }

    /// Replace the crawl source used for markets in `mode`.
    pub fn with_source(mut self, mode: CrawlMode, source: Arc<dyn CrawlSource>) -> Self {
        match mode {
            CrawlMode::Fixture => self.fixture_source = source,
            CrawlMode::ScrapingApi => self.api_source = Some(source),
        }
        self
    }

    pub fn store(&self) -> &Arc<dyn PageStore> {
        &self.store
    }

    fn source_for(&self, mode: CrawlMode) -> Option<&Arc<dyn CrawlSource>> {
        match mode {
            CrawlMode::Fixture => Some(&self.fixture_source),
            CrawlMode::ScrapingApi => self.api_source.as_ref(),
        }
    }

    pub async fn run_once(&self) -> Result<SyncRunSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let registry = MarketRegistry::load(&self.config.workspace_root).await?;
        let enabled: Vec<&MarketConfig> = registry.enabled().collect();
        let ctx = CrawlContext {
            run_id,
            fetched_at: started_at,
        };

        let mut tallies = BTreeMap::new();
        let mut run_events = Vec::new();
        for market in &enabled {
            let span = info_span!("market_sync", %run_id, market = %market.market);
            let tally = match self.sync_market(&ctx, market, &mut run_events).instrument(span).await {
                Ok(tally) => tally,
                Err(err) => {
                    warn!(market = %market.market, error = %format!("{err:#}"), "market sync failed");
                    MarketTally {
                        error: Some(format!("{err:#}")),
                        ..Default::default()
                    }
                }
            };
            tallies.insert(market.market.clone(), tally);
        }

        let pattern = if run_events.is_empty() {
            PatternReport::default()
        } else {
            self.detect_patterns(started_at).await?
        };
        if let Some(event) = pattern_event(&pattern, Utc::now()) {
            self.store.append_event(&event).await?;
            run_events.push(event);
        }

        let validator = self.assessor.validator();
        let timeline = sort_events_by_relevance(
            run_events
                .iter()
                .map(TimelineEvent::from)
                .filter(|e| validator.validate_event_for_timeline(e))
                .collect(),
        );

        let pages = self.store.all_pages().await?;
        self.store.flush().await.context("flushing page store")?;

        let finished_at = Utc::now();
        let status = if tallies.values().any(|t| t.error.is_some()) {
            "completed_with_errors"
        } else {
            "completed"
        };
        let report = RunReport {
            run: RunInfo {
                run_id,
                started_at,
                finished_at,
                status: status.to_string(),
                persistence_mode: self.store.persistence_mode().to_string(),
                markets: tallies,
            },
            events: timeline,
            pattern,
            pages,
        };
        let reports_dir = write_reports(&self.config.reports_root(), &report).await?;
        let manifest_path = export_parquet_snapshots(&reports_dir, &report.pages, &run_events).await?;

        let totals = report.run.totals();
        let summary = SyncRunSummary {
            run_id,
            started_at,
            finished_at,
            enabled_markets: enabled.len(),
            crawled_pages: totals.crawled,
            created: totals.created,
            updated: totals.updated,
            unchanged: totals.unchanged,
            skipped: totals.skipped,
            pattern: report.pattern.pattern_type,
            reports_dir: reports_dir.display().to_string(),
            parquet_manifest: manifest_path.display().to_string(),
        };
        info!(
            %run_id,
            markets = summary.enabled_markets,
            created = summary.created,
            updated = summary.updated,
            skipped = summary.skipped,
            "sync run finished"
        );
        Ok(summary)
    }

    async fn sync_market(
        &self,
        ctx: &CrawlContext,
        market: &MarketConfig,
        events: &mut Vec<PageEvent>,
    ) -> Result<MarketTally> {
        let source = self
            .source_for(market.mode)
            .with_context(|| format!("no crawl source configured for {:?} mode", market.mode))?;
        let drafts = source
            .crawl(ctx, &market.crawl_target())
            .await
            .with_context(|| format!("crawling market {} via {}", market.market, source.source_id()))?;
        let drafts = self.enrichment.apply(drafts).context("enriching drafts")?;

        let mut tally = MarketTally {
            crawled: drafts.len(),
            ..Default::default()
        };
        for draft in drafts {
            let previous = match draft.url.as_deref() {
                Some(url) if !url.is_empty() => self.store.find_page(url).await?,
                _ => None,
            };
            match self.assessor.assess(&draft, previous.as_ref(), Utc::now()) {
                Assessment::Rejected { url, reasons } => {
                    debug!(url = url.as_deref().unwrap_or("<none>"), ?reasons, "page rejected");
                    tally.skipped += 1;
                }
                Assessment::Created { snapshot, event } => {
                    self.store.upsert_page(&snapshot).await?;
                    self.store.append_event(&event).await?;
                    tally.created += 1;
                    events.push(event);
                }
                Assessment::Updated { snapshot, event } => {
                    self.store.upsert_page(&snapshot).await?;
                    self.store.append_event(&event).await?;
                    tally.updated += 1;
                    events.push(event);
                }
                Assessment::Unchanged { snapshot } => {
                    self.store.upsert_page(&snapshot).await?;
                    tally.unchanged += 1;
                }
            }
        }
        info!(
            crawled = tally.crawled,
            created = tally.created,
            updated = tally.updated,
            skipped = tally.skipped,
            "market synced"
        );
        Ok(tally)
    }

    async fn detect_patterns(&self, started_at: DateTime<Utc>) -> Result<PatternReport> {
        let since = started_at - chrono::Duration::hours(PATTERN_LOOKBACK_HOURS);
        let recent: Vec<TimelineEvent> = self
            .store
            .events_since(since)
            .await?
            .iter()
            .filter(|e| !e.event_type.is_synthetic())
            .map(TimelineEvent::from)
            .collect();
        Ok(detect_cross_market_patterns_at(&recent, Utc::now()))
    }
}

/// Synthetic timeline entry describing a detected pattern.
fn pattern_event(pattern: &PatternReport, at: DateTime<Utc>) -> Option<PageEvent> {
    let (Some(kind), Some(markets)) = (pattern.pattern_type, pattern.affected_markets.as_ref()) else {
        return None;
    };
    let (title, impact) = match kind {
        PatternType::SimultaneousUpdate => ("Simultaneous update", Impact::High),
        PatternType::SimilarContent => ("Similar content", Impact::Medium),
    };
    Some(PageEvent {
        id: Uuid::new_v4(),
        page_url: None,
        market: None,
        title: Some(format!("{title} across {}", markets.join(", "))),
        event_type: EventType::Pattern,
        event_at: at,
        change_pct: None,
        impact: Some(impact),
        description: pattern
            .confidence
            .map(|c| format!("{} detected with confidence {c:.2}", kind.as_str())),
    })
}

/// Postgres when `DATABASE_URL` is set, otherwise the JSON-backed store under `state/`.
pub async fn open_store(config: &SyncConfig) -> Result<Arc<dyn PageStore>> {
    match &config.database_url {
        Some(url) => Ok(Arc::new(PgPageStore::connect(url).await?)),
        None => Ok(Arc::new(MemoryPageStore::open(config.state_path()).await?)),
    }
}

/// Category rules from the workspace (when loadable) followed by lead-sentence summaries.
pub fn enrichment_for(config: &SyncConfig) -> Box<dyn EnrichmentHook> {
    let mut chain = EnrichmentChain::default();
    match YamlRuleEnrichmentHook::from_workspace_root(&config.workspace_root) {
        Ok(hook) => chain = chain.then(Box::new(hook)),
        Err(err) => warn!(error = %format!("{err:#}"), "category rules unavailable; skipping category enrichment"),
    }
    Box::new(chain.then(Box::<LeadSummaryEnrichmentHook>::default()))
}

pub async fn run_sync_once(config: SyncConfig) -> Result<SyncRunSummary> {
    let store = open_store(&config).await?;
    let enrichment = enrichment_for(&config);
    let pipeline = SyncPipeline::new(config, store)?.with_enrichment(enrichment);
    pipeline.run_once().await
}

pub async fn run_sync_once_from_env() -> Result<SyncRunSummary> {
    run_sync_once(SyncConfig::from_env()).await
}

pub async fn maybe_build_scheduler(config: &SyncConfig) -> Result<Option<JobScheduler>> {
    if !config.scheduler_enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    for cron in [&config.sync_cron_1, &config.sync_cron_2] {
        let job_config = config.clone();
        let job = Job::new_async(cron.as_str(), move |_uuid, _l| {
            let config = job_config.clone();
            Box::pin(async move {
                match run_sync_once(config).await {
                    Ok(summary) => info!(run_id = %summary.run_id, "scheduled sync finished"),
                    Err(err) => error!(error = %format!("{err:#}"), "scheduled sync failed"),
                }
            })
        })
        .with_context(|| format!("creating scheduler job for cron {cron}"))?;
        sched.add(job).await.context("adding scheduler job")?;
    }
    Ok(Some(sched))
}

/// Run scheduled syncs until Ctrl-C.
pub async fn run_scheduler_until_ctrl_c(config: &SyncConfig) -> Result<()> {
    let Some(mut sched) = maybe_build_scheduler(config).await? else {
        bail!("scheduler disabled; set MCW_SCHEDULER_ENABLED=1");
    };
    sched.start().await.context("starting scheduler")?;
    info!(cron_1 = %config.sync_cron_1, cron_2 = %config.sync_cron_2, "scheduler started");
    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    sched.shutdown().await.context("stopping scheduler")?;
    Ok(())
}
