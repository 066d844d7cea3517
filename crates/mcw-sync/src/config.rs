use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use mcw_crawl::{CrawlTarget, ScrapingApiConfig};
use mcw_quality::QualityConfig;
use serde::{Deserialize, Serialize};
use tokio::fs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlMode {
    Fixture,
    ScrapingApi,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketRegistry {
    pub markets: Vec<MarketConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    pub market: String,
    pub display_name: String,
    #[serde(default)]
    pub language: Option<String>,
    pub enabled: bool,
    pub mode: CrawlMode,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl MarketConfig {
    pub fn crawl_target(&self) -> CrawlTarget {
        CrawlTarget {
            market: self.market.clone(),
            language: self.language.clone(),
            urls: self.urls.clone(),
        }
    }
}

impl MarketRegistry {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("parsing market registry")
    }

    pub async fn load(workspace_root: &Path) -> Result<Self> {
        let path = workspace_root.join("markets.yaml");
        let text = fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn enabled(&self) -> impl Iterator<Item = &MarketConfig> {
        self.markets.iter().filter(|m| m.enabled)
    }
}

/// Load `rules/quality.yaml`, falling back to built-in defaults when the file is absent.
pub fn load_quality_config(workspace_root: &Path) -> Result<QualityConfig> {
    let path = workspace_root.join("rules").join("quality.yaml");
    if !path.exists() {
        return Ok(QualityConfig::default());
    }
    let text = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
    QualityConfig::from_yaml_str(&text).with_context(|| format!("parsing {}", path.display()))
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database_url: Option<String>,
    pub workspace_root: PathBuf,
    pub artifacts_dir: PathBuf,
    pub scheduler_enabled: bool,
    pub sync_cron_1: String,
    pub sync_cron_2: String,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub scraping_api: Option<ScrapingApiConfig>,
    pub scraping_api_rate_per_min: u32,
}

impl SyncConfig {
    /// Defaults rooted at `workspace_root`, without reading the environment.
    pub fn for_workspace(workspace_root: impl Into<PathBuf>) -> Self {
        let workspace_root = workspace_root.into();
        Self {
            database_url: None,
            artifacts_dir: workspace_root.join("artifacts"),
            workspace_root,
            scheduler_enabled: false,
            sync_cron_1: "0 0 6 * * *".to_string(),
            sync_cron_2: "0 0 18 * * *".to_string(),
            user_agent: "mcw-bot/0.1".to_string(),
            http_timeout_secs: 60,
            scraping_api: None,
            scraping_api_rate_per_min: 30,
        }
    }

    pub fn from_env() -> Self {
        let workspace_root = std::env::var("MCW_WORKSPACE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));
        let mut config = Self::for_workspace(workspace_root);

        config.database_url = std::env::var("DATABASE_URL").ok().filter(|v| !v.is_empty());
        if let Ok(dir) = std::env::var("ARTIFACTS_DIR") {
            config.artifacts_dir = PathBuf::from(dir);
        }
        config.scheduler_enabled = std::env::var("MCW_SCHEDULER_ENABLED")
            .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
            .unwrap_or(false);
        if let Ok(cron) = std::env::var("SYNC_CRON_1") {
            config.sync_cron_1 = cron;
        }
        if let Ok(cron) = std::env::var("SYNC_CRON_2") {
            config.sync_cron_2 = cron;
        }
        if let Ok(agent) = std::env::var("MCW_USER_AGENT") {
            config.user_agent = agent;
        }
        if let Some(secs) = std::env::var("MCW_HTTP_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok()) {
            config.http_timeout_secs = secs;
        }
        config.scraping_api = match (
            std::env::var("SCRAPING_API_ENDPOINT"),
            std::env::var("SCRAPING_API_KEY"),
        ) {
            (Ok(endpoint), Ok(api_key)) if !endpoint.is_empty() && !api_key.is_empty() => {
                Some(ScrapingApiConfig { endpoint, api_key })
            }
            _ => None,
        };
        if let Some(rate) = std::env::var("SCRAPING_API_RATE_PER_MIN").ok().and_then(|v| v.parse().ok()) {
            config.scraping_api_rate_per_min = rate;
        }
        config
    }

    pub fn state_path(&self) -> PathBuf {
        self.workspace_root.join("state").join("pages.json")
    }

    pub fn fixtures_root(&self) -> PathBuf {
        self.workspace_root.join("fixtures")
    }

    pub fn reports_root(&self) -> PathBuf {
        self.workspace_root.join("reports")
    }
}
