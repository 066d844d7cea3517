//! Crawl source contracts, fixture-first and scraping-API sources, and HTML page extraction.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use mcw_core::{word_count, PageDraft, PageSignals};
use mcw_storage::{build_api_url, ArtifactStore, FetchOutcome, HttpFetcher};
use scraper::{Html, Selector};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "mcw-crawl";

const WORDS_PER_MINUTE: u32 = 200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlContext {
    pub run_id: Uuid,
    pub fetched_at: DateTime<Utc>,
}

/// One market to crawl: its code, content language and the page URLs tracked for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlTarget {
    pub market: String,
    pub language: Option<String>,
    #[serde(default)]
    pub urls: Vec<String>,
}

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

#[async_trait]
pub trait CrawlSource: Send + Sync {
    fn source_id(&self) -> &'static str;

    async fn crawl(&self, ctx: &CrawlContext, target: &CrawlTarget) -> Result<Vec<PageDraft>, CrawlError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlBundle {
    pub market: String,
    #[serde(default)]
    pub language: Option<String>,
    pub fetched_at: DateTime<Utc>,
    pub pages: Vec<FixturePage>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// A captured page. Values extracted from the raw HTML win over the recorded fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FixturePage {
    pub url: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub text_content: Option<String>,
    pub raw_html_path: Option<String>,
    pub inline_html: Option<String>,
    pub publish_date: Option<DateTime<Utc>>,
    pub summary: Option<String>,
    pub summary_en: Option<String>,
    pub category: Option<String>,
    pub content_type: Option<String>,
}

pub fn load_crawl_bundle(path: impl AsRef<Path>) -> Result<CrawlBundle> {
    let path = path.as_ref();
    let mut bundle: CrawlBundle = read_json_file(path)?;
    hydrate_inline_html(path, &mut bundle)?;
    Ok(bundle)
}

fn read_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

fn hydrate_inline_html(bundle_path: &Path, bundle: &mut CrawlBundle) -> Result<()> {
    let base = bundle_path.parent().unwrap_or_else(|| Path::new("."));
    for page in &mut bundle.pages {
        if page.inline_html.is_some() {
            continue;
        }
        let Some(rel_path) = &page.raw_html_path else {
            continue;
        };
        let raw_path = base.join(rel_path);
        if !raw_path.exists() {
            continue;
        }
        let raw = fs::read_to_string(&raw_path)
            .with_context(|| format!("reading fixture raw html {}", raw_path.display()))?;
        page.inline_html = Some(raw);
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExtractedPage {
    pub title: Option<String>,
    pub description: Option<String>,
    pub text_content: Option<String>,
    pub publish_date: Option<DateTime<Utc>>,
    pub signals: PageSignals,
}

fn text_or_none(value: String) -> Option<String> {
    let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

fn selector(css: &str) -> Result<Selector, CrawlError> {
    Selector::parse(css).map_err(|e| CrawlError::Message(format!("selector {css:?}: {e}")))
}

fn select_first_text(document: &Html, css: &str) -> Result<Option<String>, CrawlError> {
    let sel = selector(css)?;
    Ok(document
        .select(&sel)
        .next()
        .and_then(|n| text_or_none(n.text().collect::<String>())))
}

fn select_first_attr(document: &Html, css: &str, attr: &str) -> Result<Option<String>, CrawlError> {
    let sel = selector(css)?;
    Ok(document
        .select(&sel)
        .next()
        .and_then(|n| n.value().attr(attr))
        .and_then(|s| text_or_none(s.to_string())))
}

fn has_match(document: &Html, css: &str) -> Result<bool, CrawlError> {
    let sel = selector(css)?;
    Ok(document.select(&sel).next().is_some())
}

fn visible_body_text(document: &Html) -> Result<Option<String>, CrawlError> {
    let body_sel = selector("body")?;
    let Some(body) = document.select(&body_sel).next() else {
        return Ok(None);
    };
    let mut parts = Vec::new();
    for node in body.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| matches!(e.name(), "script" | "style" | "noscript" | "template"))
        });
        let text = text.trim();
        if !hidden && !text.is_empty() {
            parts.push(text.to_string());
        }
    }
    Ok(text_or_none(parts.join(" ")))
}

fn parse_publish_date(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value.get(..10)?, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

fn reading_time_minutes(words: u32) -> Option<u32> {
    (words > 0).then(|| words.div_ceil(WORDS_PER_MINUTE))
}

/// Pull title, description, visible text, publish date and page signals out of raw HTML.
pub fn extract_page(html: &str) -> Result<ExtractedPage, CrawlError> {
    let document = Html::parse_document(html);

    let title = select_first_text(&document, "title")?.or(select_first_text(&document, "h1")?);
    let description = select_first_attr(&document, "meta[name='description']", "content")?
        .or(select_first_attr(&document, "meta[property='og:description']", "content")?);
    let text_content = visible_body_text(&document)?;

    let publish_date = select_first_attr(&document, "meta[property='article:published_time']", "content")?
        .or(select_first_attr(&document, "meta[name='date']", "content")?)
        .or(select_first_attr(&document, "time[datetime]", "datetime")?)
        .and_then(|raw| parse_publish_date(&raw));

    let words = text_content.as_deref().map(word_count).unwrap_or(0);
    let title_mentions_calculator = title
        .as_deref()
        .is_some_and(|t| t.to_lowercase().contains("calculator"));
    let signals = PageSignals {
        has_video: has_match(
            &document,
            "video, iframe[src*='youtube'], iframe[src*='vimeo'], iframe[src*='wistia']",
        )?,
        has_calculator: title_mentions_calculator
            || has_match(&document, "[class*='calculator'], [id*='calculator'], [data-calculator]")?,
        has_form: has_match(&document, "form")?,
        reading_time_minutes: reading_time_minutes(words),
    };

    Ok(ExtractedPage {
        title,
        description,
        text_content,
        publish_date,
        signals,
    })
}

fn override_value<T>(slot: &mut Option<T>, value: Option<T>) {
    if let Some(value) = value {
        *slot = Some(value);
    }
}

fn apply_extracted(draft: &mut PageDraft, extracted: ExtractedPage) {
    override_value(&mut draft.title, extracted.title);
    override_value(&mut draft.description, extracted.description);
    override_value(&mut draft.text_content, extracted.text_content);
    override_value(&mut draft.publish_date, extracted.publish_date);
    draft.signals = Some(extracted.signals);
}

pub fn bundle_to_drafts(bundle: &CrawlBundle) -> Result<Vec<PageDraft>, CrawlError> {
    bundle
        .pages
        .iter()
        .map(|page| {
            let mut draft = PageDraft {
                url: page.url.clone(),
                market: Some(bundle.market.clone()),
                language: bundle.language.clone(),
                title: page.title.clone(),
                description: page.description.clone(),
                text_content: page.text_content.clone(),
                word_count: None,
                publish_date: page.publish_date,
                summary: page.summary.clone(),
                summary_en: page.summary_en.clone(),
                category: page.category.clone(),
                content_type: page.content_type.clone(),
                signals: None,
                fetched_at: Some(bundle.fetched_at),
            };
            if let Some(html) = page.inline_html.as_deref() {
                apply_extracted(&mut draft, extract_page(html)?);
            }
            Ok(draft.with_derived_word_count())
        })
        .collect()
}

/// Reads pre-captured crawl bundles from `<fixtures_root>/<market>/sample/bundle.json`.
#[derive(Debug, Clone)]
pub struct FixtureCrawlSource {
    fixtures_root: PathBuf,
}

impl FixtureCrawlSource {
    pub fn new(fixtures_root: impl Into<PathBuf>) -> Self {
        Self {
            fixtures_root: fixtures_root.into(),
        }
    }

    pub fn bundle_path(&self, market: &str) -> PathBuf {
        self.fixtures_root.join(market).join("sample").join("bundle.json")
    }
}

#[async_trait]
impl CrawlSource for FixtureCrawlSource {
    fn source_id(&self) -> &'static str {
        "fixture"
    }

    async fn crawl(&self, _ctx: &CrawlContext, target: &CrawlTarget) -> Result<Vec<PageDraft>, CrawlError> {
        let bundle = load_crawl_bundle(self.bundle_path(&target.market))?;
        if bundle.market != target.market {
            return Err(CrawlError::Message(format!(
                "bundle for {} declares market {}",
                target.market, bundle.market
            )));
        }
        let mut drafts = bundle_to_drafts(&bundle)?;
        if bundle.language.is_none() {
            for draft in &mut drafts {
                draft.language = target.language.clone();
            }
        }
        Ok(drafts)
    }
}

#[derive(Debug, Clone)]
pub struct ScrapingApiConfig {
    pub endpoint: String,
    pub api_key: String,
}

/// Fetches each tracked URL through a third-party scraping API and extracts a draft from the
/// returned HTML. Raw HTML is kept in the artifact store.
pub struct ScrapingApiSource {
    http: Arc<HttpFetcher>,
    artifacts: ArtifactStore,
    config: ScrapingApiConfig,
}

impl ScrapingApiSource {
    pub fn new(http: Arc<HttpFetcher>, artifacts: ArtifactStore, config: ScrapingApiConfig) -> Self {
        Self {
            http,
            artifacts,
            config,
        }
    }

    fn api_url(&self, target_url: &str) -> Result<String> {
        build_api_url(
            &self.config.endpoint,
            &[("api_key", self.config.api_key.as_str()), ("url", target_url)],
        )
    }
}

#[async_trait]
impl CrawlSource for ScrapingApiSource {
    fn source_id(&self) -> &'static str {
        "scraping_api"
    }

    async fn crawl(&self, ctx: &CrawlContext, target: &CrawlTarget) -> Result<Vec<PageDraft>, CrawlError> {
        let mut drafts = Vec::with_capacity(target.urls.len());
        for url in &target.urls {
            let api_url = self.api_url(url)?;
            let response = match self.http.fetch(ctx.run_id, &target.market, &api_url).await {
                FetchOutcome::Ok(response) => response,
                FetchOutcome::RateLimited { retry_after, .. } => {
                    warn!(market = %target.market, url, ?retry_after, "scraping api rate limited; skipping rest of market");
                    break;
                }
                FetchOutcome::Failed(err) => {
                    warn!(market = %target.market, url, error = %err, "scraping api fetch failed; skipping page");
                    continue;
                }
            };

            let stored = self
                .artifacts
                .store_bytes(ctx.fetched_at, &target.market, "html", &response.body)
                .await?;
            info!(market = %target.market, url, artifact = %stored.relative_path.display(), "stored raw page");

            let html = String::from_utf8_lossy(&response.body);
            let mut draft = PageDraft {
                url: Some(url.clone()),
                market: Some(target.market.clone()),
                language: target.language.clone(),
                fetched_at: Some(ctx.fetched_at),
                ..Default::default()
            };
            apply_extracted(&mut draft, extract_page(&html)?);
            drafts.push(draft.with_derived_word_count());
        }
        Ok(drafts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<!doctype html>
<html><head>
  <title>  BMI Calculator | Brand  </title>
  <meta name="description" content="Calculate your body mass index in seconds">
  <meta property="article:published_time" content="2026-03-01T09:00:00Z">
  <style>.x { color: red }</style>
</head>
<body>
  <h1>BMI Calculator</h1>
  <p>Enter your height and weight.</p>
  <script>var tracking = "should not appear";</script>
  <div class="bmi-calculator"><form><input name="height"></form></div>
  <iframe src="https://www.youtube.com/embed/abc"></iframe>
</body></html>"#;

    fn workspace_root() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
    }

    #[test]
    fn extracts_metadata_text_and_signals() {
        let page = extract_page(PAGE).unwrap();
        assert_eq!(page.title.as_deref(), Some("BMI Calculator | Brand"));
        assert_eq!(
            page.description.as_deref(),
            Some("Calculate your body mass index in seconds")
        );
        let text = page.text_content.unwrap();
        assert!(text.contains("Enter your height and weight."));
        assert!(!text.contains("tracking"));
        assert!(!text.contains("color: red"));
        assert_eq!(
            page.publish_date,
            Some(DateTime::parse_from_rfc3339("2026-03-01T09:00:00Z").unwrap().with_timezone(&Utc))
        );
        assert!(page.signals.has_video);
        assert!(page.signals.has_calculator);
        assert!(page.signals.has_form);
        assert_eq!(page.signals.reading_time_minutes, Some(1));
    }

    #[test]
    fn empty_document_extracts_nothing() {
        let page = extract_page("").unwrap();
        assert_eq!(page.title, None);
        assert_eq!(page.text_content, None);
        assert_eq!(page.signals, PageSignals::default());
    }

    #[test]
    fn date_only_publish_dates_parse_to_midnight() {
        let parsed = parse_publish_date("2026-01-15").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2026-01-15T00:00:00+00:00");
        assert_eq!(parse_publish_date("soon"), None);
    }

    #[test]
    fn inline_html_overrides_recorded_fields() {
        let bundle = CrawlBundle {
            market: "de".into(),
            language: Some("de".into()),
            fetched_at: Utc::now(),
            pages: vec![FixturePage {
                url: Some("https://brand.example/de/bmi".into()),
                title: Some("WRONG".into()),
                summary: Some("Rechner".into()),
                inline_html: Some(PAGE.to_string()),
                ..Default::default()
            }],
            notes: None,
        };
        let drafts = bundle_to_drafts(&bundle).unwrap();
        let draft = &drafts[0];
        assert_eq!(draft.title.as_deref(), Some("BMI Calculator | Brand"));
        assert_eq!(draft.summary.as_deref(), Some("Rechner"));
        assert_eq!(draft.market.as_deref(), Some("de"));
        assert!(draft.word_count.unwrap() > 0);
        assert!(draft.signals.unwrap().has_form);
    }

    #[tokio::test]
    async fn fixture_source_reads_workspace_bundle() {
        let source = FixtureCrawlSource::new(workspace_root().join("fixtures"));
        let ctx = CrawlContext {
            run_id: Uuid::new_v4(),
            fetched_at: Utc::now(),
        };
        let target = CrawlTarget {
            market: "de".into(),
            language: Some("de".into()),
            urls: vec![],
        };
        let drafts = source.crawl(&ctx, &target).await.unwrap();
        assert!(!drafts.is_empty());
        assert!(drafts.iter().all(|d| d.market.as_deref() == Some("de")));
        assert!(drafts.iter().all(|d| d.word_count.is_some() || d.text_content.is_none()));
    }

    #[tokio::test]
    async fn fixture_source_errors_for_unknown_market() {
        let source = FixtureCrawlSource::new(workspace_root().join("fixtures"));
        let ctx = CrawlContext {
            run_id: Uuid::new_v4(),
            fetched_at: Utc::now(),
        };
        let err = source
            .crawl(
                &ctx,
                &CrawlTarget {
                    market: "missing-market".into(),
                    language: None,
                    urls: vec![],
                },
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("missing-market"));
    }
}
