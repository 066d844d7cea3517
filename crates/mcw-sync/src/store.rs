use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mcw_core::{EventType, Impact, PageEvent, PageSignals, PageSnapshot};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tokio::fs;
use tokio::sync::Mutex;

/// Persistence collaborator for page snapshots and the append-only event log.
#[async_trait]
pub trait PageStore: Send + Sync {
    async fn find_page(&self, url: &str) -> Result<Option<PageSnapshot>>;
    async fn upsert_page(&self, page: &PageSnapshot) -> Result<()>;
    async fn append_event(&self, event: &PageEvent) -> Result<()>;
    /// Events at or after `since`, oldest first.
    async fn events_since(&self, since: DateTime<Utc>) -> Result<Vec<PageEvent>>;
    async fn all_pages(&self) -> Result<Vec<PageSnapshot>>;
    async fn flush(&self) -> Result<()>;

    fn persistence_mode(&self) -> &'static str;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreState {
    pages: BTreeMap<String, PageSnapshot>,
    events: Vec<PageEvent>,
}

/// In-process store, optionally saved as JSON on `flush`.
#[derive(Debug, Default)]
pub struct MemoryPageStore {
    state: Mutex<StoreState>,
    persist_path: Option<PathBuf>,
}

impl MemoryPageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load state from `path` if it exists; later flushes write back to it.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = match fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => StoreState::default(),
            Err(err) => return Err(err).with_context(|| format!("reading {}", path.display())),
        };
        Ok(Self {
            state: Mutex::new(state),
            persist_path: Some(path),
        })
    }

    pub fn persist_path(&self) -> Option<&Path> {
        self.persist_path.as_deref()
    }
}

#[async_trait]
impl PageStore for MemoryPageStore {
    async fn find_page(&self, url: &str) -> Result<Option<PageSnapshot>> {
        Ok(self.state.lock().await.pages.get(url).cloned())
    }

    async fn upsert_page(&self, page: &PageSnapshot) -> Result<()> {
        self.state.lock().await.pages.insert(page.url.clone(), page.clone());
        Ok(())
    }

    async fn append_event(&self, event: &PageEvent) -> Result<()> {
        self.state.lock().await.events.push(event.clone());
        Ok(())
    }

    async fn events_since(&self, since: DateTime<Utc>) -> Result<Vec<PageEvent>> {
        let state = self.state.lock().await;
        let mut events: Vec<_> = state.events.iter().filter(|e| e.event_at >= since).cloned().collect();
        events.sort_by_key(|e| e.event_at);
        Ok(events)
    }

    async fn all_pages(&self) -> Result<Vec<PageSnapshot>> {
        Ok(self.state.lock().await.pages.values().cloned().collect())
    }

    async fn flush(&self) -> Result<()> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };
        let bytes = {
            let state = self.state.lock().await;
            serde_json::to_vec_pretty(&*state).context("serializing page store")?
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .await
            .with_context(|| format!("renaming {} to {}", tmp.display(), path.display()))?;
        Ok(())
    }

    fn persistence_mode(&self) -> &'static str {
        if self.persist_path.is_some() {
            "json-file"
        } else {
            "memory"
        }
    }
}

/// Postgres-backed store over the tables in `sql/schema.sql`.
pub struct PgPageStore {
    pool: PgPool,
}

impl PgPageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await.context("connecting to postgres")?;
        Ok(Self { pool })
    }
}

const PAGE_COLUMNS: &str = "id, url, market, language, title, description, text_content, word_count, \
     change_hash, change_pct, quality_score, last_crawled_at, last_modified_at, publish_date, \
     summary, summary_en, category, content_type, signals_json";

fn small_to_pct(value: i16) -> u8 {
    u8::try_from(value.clamp(0, 100)).unwrap_or(0)
}

fn signals_from_json(value: serde_json::Value) -> Result<PageSignals> {
    serde_json::from_value(value).context("decoding signals_json")
}

fn page_from_row(row: &PgRow) -> Result<PageSnapshot> {
    let url: String = row.try_get("url")?;
    let signals = signals_from_json(row.try_get("signals_json")?).with_context(|| format!("loading page {url}"))?;
    let word_count: i32 = row.try_get("word_count")?;
    Ok(PageSnapshot {
        id: row.try_get("id")?,
        url,
        market: row.try_get("market")?,
        language: row.try_get("language")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        text_content: row.try_get("text_content")?,
        word_count: u32::try_from(word_count).unwrap_or(0),
        change_hash: row.try_get("change_hash")?,
        change_pct: small_to_pct(row.try_get("change_pct")?),
        quality_score: small_to_pct(row.try_get("quality_score")?),
        last_crawled_at: row.try_get("last_crawled_at")?,
        last_modified_at: row.try_get("last_modified_at")?,
        publish_date: row.try_get("publish_date")?,
        summary: row.try_get("summary")?,
        summary_en: row.try_get("summary_en")?,
        category: row.try_get("category")?,
        content_type: row.try_get("content_type")?,
        signals,
    })
}

fn event_from_row(row: &PgRow) -> Result<PageEvent> {
    let event_type: String = row.try_get("event_type")?;
    let impact: Option<String> = row.try_get("impact")?;
    let change_pct: Option<i16> = row.try_get("change_pct")?;
    Ok(PageEvent {
        id: row.try_get("id")?,
        page_url: row.try_get("page_url")?,
        market: row.try_get("market")?,
        title: row.try_get("title")?,
        event_type: EventType::parse(&event_type)
            .with_context(|| format!("unknown event_type {event_type}"))?,
        event_at: row.try_get("event_at")?,
        change_pct: change_pct.map(small_to_pct),
        impact: impact.as_deref().and_then(Impact::parse),
        description: row.try_get("description")?,
    })
}

#[async_trait]
impl PageStore for PgPageStore {
    async fn find_page(&self, url: &str) -> Result<Option<PageSnapshot>> {
        let row = sqlx::query(&format!("SELECT {PAGE_COLUMNS} FROM content_pages WHERE url = $1"))
            .bind(url)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("loading page {url}"))?;
        row.as_ref().map(page_from_row).transpose()
    }

    async fn upsert_page(&self, page: &PageSnapshot) -> Result<()> {
        let signals = serde_json::to_value(page.signals).context("serializing page signals")?;
        sqlx::query(
            r#"
            INSERT INTO content_pages (
                id, url, market, language, title, description, text_content, word_count,
                change_hash, change_pct, quality_score, last_crawled_at, last_modified_at,
                publish_date, summary, summary_en, category, content_type, signals_json
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            ON CONFLICT (url) DO UPDATE SET
                market = EXCLUDED.market,
                language = EXCLUDED.language,
                title = EXCLUDED.title,
                description = EXCLUDED.description,
                text_content = EXCLUDED.text_content,
                word_count = EXCLUDED.word_count,
                change_hash = EXCLUDED.change_hash,
                change_pct = EXCLUDED.change_pct,
                quality_score = EXCLUDED.quality_score,
                last_crawled_at = EXCLUDED.last_crawled_at,
                last_modified_at = EXCLUDED.last_modified_at,
                publish_date = EXCLUDED.publish_date,
                summary = EXCLUDED.summary,
                summary_en = EXCLUDED.summary_en,
                category = EXCLUDED.category,
                content_type = EXCLUDED.content_type,
                signals_json = EXCLUDED.signals_json
            "#,
        )
        .bind(page.id)
        .bind(&page.url)
        .bind(&page.market)
        .bind(&page.language)
        .bind(&page.title)
        .bind(&page.description)
        .bind(&page.text_content)
        .bind(i32::try_from(page.word_count).unwrap_or(i32::MAX))
        .bind(&page.change_hash)
        .bind(i16::from(page.change_pct))
        .bind(i16::from(page.quality_score))
        .bind(page.last_crawled_at)
        .bind(page.last_modified_at)
        .bind(page.publish_date)
        .bind(&page.summary)
        .bind(&page.summary_en)
        .bind(&page.category)
        .bind(&page.content_type)
        .bind(signals)
        .execute(&self.pool)
        .await
        .with_context(|| format!("upserting page {}", page.url))?;
        Ok(())
    }

    async fn append_event(&self, event: &PageEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO page_events (id, page_url, market, title, event_type, event_at, change_pct, impact, description)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(event.id)
        .bind(&event.page_url)
        .bind(&event.market)
        .bind(&event.title)
        .bind(event.event_type.as_str())
        .bind(event.event_at)
        .bind(event.change_pct.map(i16::from))
        .bind(event.impact.map(Impact::as_str))
        .bind(&event.description)
        .execute(&self.pool)
        .await
        .with_context(|| format!("appending {} event", event.event_type))?;
        Ok(())
    }

    async fn events_since(&self, since: DateTime<Utc>) -> Result<Vec<PageEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, page_url, market, title, event_type, event_at, change_pct, impact, description
            FROM page_events
            WHERE event_at >= $1
            ORDER BY event_at ASC
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .context("loading recent page events")?;
        rows.iter().map(event_from_row).collect()
    }

    async fn all_pages(&self) -> Result<Vec<PageSnapshot>> {
        let rows = sqlx::query(&format!("SELECT {PAGE_COLUMNS} FROM content_pages ORDER BY url"))
            .fetch_all(&self.pool)
            .await
            .context("loading content pages")?;
        rows.iter().map(page_from_row).collect()
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn persistence_mode(&self) -> &'static str {
        "postgres"
    }
}
