//! JSON API over sync run reports: timeline, patterns, coverage, runs and markets.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use mcw_core::TimelineEvent;
use mcw_quality::{sort_events_by_relevance, PatternReport, QualityValidator};
use mcw_sync::{list_run_reports, load_quality_config, MarketConfig, MarketRegistry, MarketTally, RunReport};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::info;

pub const CRATE_NAME: &str = "mcw-web";

const DEFAULT_TIMELINE_LIMIT: usize = 50;
const MAX_TIMELINE_LIMIT: usize = 500;
const UNCATEGORIZED: &str = "uncategorized";

#[derive(Clone)]
pub struct AppState {
    pub workspace_root: PathBuf,
}

impl AppState {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
        }
    }

    fn reports(&self) -> anyhow::Result<Vec<RunReport>> {
        list_run_reports(&reports_root(&self.workspace_root))
    }
}

fn reports_root(workspace_root: &Path) -> PathBuf {
    workspace_root.join("reports")
}

#[derive(Debug, Clone, Serialize)]
pub struct MarketRow {
    #[serde(flatten)]
    pub config: MarketConfig,
    pub tracked_pages: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimelineQuery {
    pub market: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunPattern {
    pub run_id: String,
    pub finished_at: String,
    pub pattern: PatternReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunRow {
    pub run_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub status: String,
    pub persistence_mode: String,
    pub totals: MarketTally,
    pub events: usize,
    pub pages: usize,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/markets", get(markets_handler))
        .route("/api/timeline", get(timeline_handler))
        .route("/api/patterns", get(patterns_handler))
        .route("/api/coverage", get(coverage_handler))
        .route("/api/reports", get(reports_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(workspace_root: impl Into<PathBuf>, port: u16) -> anyhow::Result<()> {
    let state = AppState::new(workspace_root);
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding port {port}"))?;
    info!(port, workspace = %state.workspace_root.display(), "serving dashboard api");
    axum::serve(listener, app(state)).await.context("serving http")?;
    Ok(())
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let port: u16 = std::env::var("MCW_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);
    let root = std::env::var("MCW_WORKSPACE").unwrap_or_else(|_| ".".to_string());
    serve(root, port).await
}

async fn health_handler() -> Response {
    Json(serde_json::json!({ "status": "ok" })).into_response()
}

async fn markets_handler(State(state): State<Arc<AppState>>) -> Response {
    match load_markets(&state).await {
        Ok(rows) => Json(rows).into_response(),
        Err(err) => server_error(err),
    }
}

async fn timeline_handler(State(state): State<Arc<AppState>>, Query(query): Query<TimelineQuery>) -> Response {
    match load_timeline(&state, &query) {
        Ok(events) => Json(events).into_response(),
        Err(err) => server_error(err),
    }
}

async fn patterns_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.reports() {
        Ok(reports) => {
            let patterns: Vec<RunPattern> = reports
                .into_iter()
                .filter(|r| r.pattern.has_pattern)
                .map(|r| RunPattern {
                    run_id: r.run.run_id.to_string(),
                    finished_at: r.run.finished_at.to_rfc3339(),
                    pattern: r.pattern,
                })
                .collect();
            Json(patterns).into_response()
        }
        Err(err) => server_error(err),
    }
}

async fn coverage_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.reports() {
        Ok(reports) => Json(coverage_matrix(reports.first())).into_response(),
        Err(err) => server_error(err),
    }
}

async fn reports_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.reports() {
        Ok(reports) => {
            let rows: Vec<RunRow> = reports
                .iter()
                .map(|r| RunRow {
                    run_id: r.run.run_id.to_string(),
                    started_at: r.run.started_at.to_rfc3339(),
                    finished_at: r.run.finished_at.to_rfc3339(),
                    status: r.run.status.clone(),
                    persistence_mode: r.run.persistence_mode.clone(),
                    totals: r.run.totals(),
                    events: r.events.len(),
                    pages: r.pages.len(),
                })
                .collect();
            Json(rows).into_response()
        }
        Err(err) => server_error(err),
    }
}

fn server_error(err: anyhow::Error) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": format!("{err:#}") })),
    )
        .into_response()
}

async fn load_markets(state: &AppState) -> anyhow::Result<Vec<MarketRow>> {
    let registry = MarketRegistry::load(&state.workspace_root).await?;
    let reports = state.reports()?;
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    if let Some(latest) = reports.first() {
        for page in &latest.pages {
            *counts.entry(page.market.as_str()).or_default() += 1;
        }
    }
    Ok(registry
        .markets
        .iter()
        .map(|m| MarketRow {
            tracked_pages: counts.get(m.market.as_str()).copied().unwrap_or(0),
            config: m.clone(),
        })
        .collect())
}

/// Events from every stored run, deduplicated by id, filtered for display and relevance-sorted.
///
/// With a market filter, market-free events (patterns, alerts) stay in.
fn load_timeline(state: &AppState, query: &TimelineQuery) -> anyhow::Result<Vec<TimelineEvent>> {
    let validator = QualityValidator::new(load_quality_config(&state.workspace_root)?)
        .context("validating quality rules")?;
    let mut seen = HashSet::new();
    let events: Vec<TimelineEvent> = state
        .reports()?
        .into_iter()
        .flat_map(|r| r.events)
        .filter(|e| seen.insert(e.id.clone()))
        .filter(|e| match (&query.market, &e.market) {
            (Some(wanted), Some(market)) => wanted == market,
            _ => true,
        })
        .filter(|e| validator.validate_event_for_timeline(e))
        .collect();

    let limit = query.limit.unwrap_or(DEFAULT_TIMELINE_LIMIT).min(MAX_TIMELINE_LIMIT);
    let mut sorted = sort_events_by_relevance(events);
    sorted.truncate(limit);
    Ok(sorted)
}

/// Market × category page counts for the latest run.
fn coverage_matrix(latest: Option<&RunReport>) -> BTreeMap<String, BTreeMap<String, usize>> {
    let mut matrix: BTreeMap<String, BTreeMap<String, usize>> = BTreeMap::new();
    let Some(report) = latest else {
        return matrix;
    };
    for page in &report.pages {
        let category = page.category.clone().unwrap_or_else(|| UNCATEGORIZED.to_string());
        *matrix
            .entry(page.market.clone())
            .or_default()
            .entry(category)
            .or_default() += 1;
    }
    matrix
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use chrono::{TimeZone, Utc};
    use http_body_util::BodyExt;
    use mcw_core::{EventType, Impact, PageSignals, PageSnapshot};
    use mcw_quality::PatternType;
    use mcw_sync::{write_reports, RunInfo};
    use tower::ServiceExt;
    use uuid::Uuid;

    fn event(id: &str, market: Option<&str>, event_type: EventType, impact: Option<Impact>, title: &str) -> TimelineEvent {
        TimelineEvent {
            id: id.into(),
            event_type: Some(event_type),
            event_at: Some(Utc.with_ymd_and_hms(2026, 9, 30, 6, 0, 0).unwrap()),
            market: market.map(str::to_string),
            title: Some(title.into()),
            url: market.map(|m| format!("https://brand.example/{m}/{id}")),
            impact,
            ..Default::default()
        }
    }

    fn page(market: &str, path: &str, category: Option<&str>) -> PageSnapshot {
        let at = Utc.with_ymd_and_hms(2026, 9, 30, 6, 0, 0).unwrap();
        PageSnapshot {
            id: Uuid::new_v4(),
            url: format!("https://brand.example/{market}/{path}"),
            market: market.into(),
            language: None,
            title: Some("Weekly treatment overview".into()),
            description: None,
            text_content: None,
            word_count: 0,
            change_hash: "00".into(),
            change_pct: 100,
            quality_score: 20,
            last_crawled_at: at,
            last_modified_at: at,
            publish_date: None,
            summary: Some("summary".into()),
            summary_en: None,
            category: category.map(str::to_string),
            content_type: None,
            signals: PageSignals::default(),
        }
    }

    async fn seeded_workspace() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let repo = Path::new(env!("CARGO_MANIFEST_DIR")).join("../..");
        std::fs::copy(repo.join("markets.yaml"), dir.path().join("markets.yaml")).unwrap();

        let at = Utc.with_ymd_and_hms(2026, 9, 30, 6, 30, 0).unwrap();
        let report = RunReport {
            run: RunInfo {
                run_id: Uuid::new_v4(),
                started_at: at,
                finished_at: at,
                status: "completed".into(),
                persistence_mode: "memory".into(),
                markets: BTreeMap::new(),
            },
            events: vec![
                event("a", Some("de"), EventType::Created, Some(Impact::Low), "Behandlung im Alltag"),
                event("b", Some("fr"), EventType::Updated, Some(Impact::High), "Traitement hebdomadaire"),
                event("c", None, EventType::Pattern, Some(Impact::High), "Simultaneous update across de, fr, jp"),
                event("d", Some("de"), EventType::Updated, None, "404 Seite nicht gefunden"),
            ],
            pattern: PatternReport {
                has_pattern: true,
                pattern_type: Some(PatternType::SimultaneousUpdate),
                affected_markets: Some(vec!["de".into(), "fr".into(), "jp".into()]),
                confidence: Some(0.6),
            },
            pages: vec![
                page("de", "a", Some("treatment")),
                page("de", "b", None),
                page("fr", "c", Some("treatment")),
            ],
        };
        write_reports(&reports_root(dir.path()), &report).await.unwrap();
        dir
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let resp = app
            .oneshot(axum::http::Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn health_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = get_json(app(AppState::new(dir.path())), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn timeline_is_filtered_and_relevance_sorted() {
        let dir = seeded_workspace().await;
        let (status, body) = get_json(app(AppState::new(dir.path())), "/api/timeline").await;
        assert_eq!(status, StatusCode::OK);
        let ids: Vec<_> = body.as_array().unwrap().iter().map(|e| e["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn timeline_market_filter_keeps_patterns_and_limit_applies() {
        let dir = seeded_workspace().await;
        let router = app(AppState::new(dir.path()));
        let (_, body) = get_json(router.clone(), "/api/timeline?market=de").await;
        let ids: Vec<_> = body.as_array().unwrap().iter().map(|e| e["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["c", "a"]);

        let (_, body) = get_json(router, "/api/timeline?limit=1").await;
        assert_eq!(body.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn coverage_counts_market_by_category() {
        let dir = seeded_workspace().await;
        let (_, body) = get_json(app(AppState::new(dir.path())), "/api/coverage").await;
        assert_eq!(body["de"]["treatment"], 1);
        assert_eq!(body["de"][UNCATEGORIZED], 1);
        assert_eq!(body["fr"]["treatment"], 1);
    }

    #[tokio::test]
    async fn patterns_and_reports_list_runs() {
        let dir = seeded_workspace().await;
        let router = app(AppState::new(dir.path()));
        let (_, patterns) = get_json(router.clone(), "/api/patterns").await;
        assert_eq!(patterns[0]["pattern"]["pattern_type"], "simultaneous_update");

        let (_, reports) = get_json(router, "/api/reports").await;
        assert_eq!(reports.as_array().unwrap().len(), 1);
        assert_eq!(reports[0]["pages"], 3);
        assert_eq!(reports[0]["events"], 4);
    }

    #[tokio::test]
    async fn markets_include_tracked_page_counts() {
        let dir = seeded_workspace().await;
        let (status, body) = get_json(app(AppState::new(dir.path())), "/api/markets").await;
        assert_eq!(status, StatusCode::OK);
        let de = body.as_array().unwrap().iter().find(|m| m["market"] == "de").unwrap();
        assert_eq!(de["tracked_pages"], 2);
        assert_eq!(de["mode"], "fixture");
    }

    #[tokio::test]
    async fn empty_workspace_has_empty_timeline() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = get_json(app(AppState::new(dir.path())), "/api/timeline").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!([]));
    }
}
