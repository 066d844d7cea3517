//! Core domain model for market content watch: crawl drafts, page snapshots and events.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "mcw-core";

/// Fixed set of page features read by the dashboard. Missing keys deserialize as unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PageSignals {
    pub has_video: bool,
    pub has_calculator: bool,
    pub has_form: bool,
    pub reading_time_minutes: Option<u32>,
}

/// Handoff contract from crawl sources into the sync pipeline.
///
/// Every field is optional so validation can report exactly what a crawl failed to produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PageDraft {
    pub url: Option<String>,
    pub market: Option<String>,
    pub language: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub text_content: Option<String>,
    pub word_count: Option<u32>,
    pub publish_date: Option<DateTime<Utc>>,
    pub summary: Option<String>,
    pub summary_en: Option<String>,
    pub category: Option<String>,
    pub content_type: Option<String>,
    pub signals: Option<PageSignals>,
    pub fetched_at: Option<DateTime<Utc>>,
}

impl PageDraft {
    /// Fill `word_count` from `text_content` when the crawl did not supply one.
    pub fn with_derived_word_count(mut self) -> Self {
        if self.word_count.is_none() {
            if let Some(text) = &self.text_content {
                self.word_count = Some(word_count(text));
            }
        }
        self
    }
}

/// Whitespace-token count used for `word_count` everywhere.
pub fn word_count(text: &str) -> u32 {
    u32::try_from(text.split_whitespace().count()).unwrap_or(u32::MAX)
}

/// Persisted page record (`ContentPage`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub id: Uuid,
    pub url: String,
    pub market: String,
    pub language: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub text_content: Option<String>,
    pub word_count: u32,
    pub change_hash: String,
    pub change_pct: u8,
    pub quality_score: u8,
    pub last_crawled_at: DateTime<Utc>,
    pub last_modified_at: DateTime<Utc>,
    pub publish_date: Option<DateTime<Utc>>,
    pub summary: Option<String>,
    pub summary_en: Option<String>,
    pub category: Option<String>,
    pub content_type: Option<String>,
    #[serde(default)]
    pub signals: PageSignals,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Created,
    Updated,
    Pattern,
    Alert,
}

impl EventType {
    /// System-generated events that are not tied to a single page.
    pub fn is_synthetic(self) -> bool {
        matches!(self, EventType::Pattern | EventType::Alert)
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "created" => Some(EventType::Created),
            "updated" => Some(EventType::Updated),
            "pattern" => Some(EventType::Pattern),
            "alert" => Some(EventType::Alert),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Created => "created",
            EventType::Updated => "updated",
            EventType::Pattern => "pattern",
            EventType::Alert => "alert",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Impact {
    High,
    Medium,
    Low,
}

impl Impact {
    pub fn rank(self) -> u8 {
        match self {
            Impact::High => 3,
            Impact::Medium => 2,
            Impact::Low => 1,
        }
    }

    /// Impact bucket for a content change of the given magnitude.
    pub fn from_change_pct(change_pct: u8) -> Option<Self> {
        match change_pct {
            0 => None,
            1..=19 => Some(Impact::Low),
            20..=49 => Some(Impact::Medium),
            _ => Some(Impact::High),
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "high" => Some(Impact::High),
            "medium" => Some(Impact::Medium),
            "low" => Some(Impact::Low),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Impact::High => "high",
            Impact::Medium => "medium",
            Impact::Low => "low",
        }
    }
}

/// Rank of an optional impact; unspecified ranks below `low`.
pub fn impact_rank(impact: Option<Impact>) -> u8 {
    impact.map(Impact::rank).unwrap_or(0)
}

/// Immutable append-only log entry (`PageEvent`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageEvent {
    pub id: Uuid,
    pub page_url: Option<String>,
    pub market: Option<String>,
    pub title: Option<String>,
    pub event_type: EventType,
    pub event_at: DateTime<Utc>,
    pub change_pct: Option<u8>,
    pub impact: Option<Impact>,
    pub description: Option<String>,
}

impl PageEvent {
    pub fn for_page(snapshot: &PageSnapshot, event_type: EventType, event_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            page_url: Some(snapshot.url.clone()),
            market: Some(snapshot.market.clone()),
            title: snapshot.title.clone(),
            event_type,
            event_at,
            change_pct: Some(snapshot.change_pct),
            impact: Impact::from_change_pct(snapshot.change_pct),
            description: None,
        }
    }
}

/// Presentation view of an event as consumed by timeline ordering and validation.
///
/// `event_type` and `event_at` are optional because rows may come from loosely-typed report JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TimelineEvent {
    pub id: String,
    pub event_type: Option<EventType>,
    pub event_at: Option<DateTime<Utc>>,
    pub market: Option<String>,
    pub title: Option<String>,
    pub url: Option<String>,
    pub impact: Option<Impact>,
    pub change_percent: Option<f64>,
    pub description: Option<String>,
}

impl From<&PageEvent> for TimelineEvent {
    fn from(event: &PageEvent) -> Self {
        Self {
            id: event.id.to_string(),
            event_type: Some(event.event_type),
            event_at: Some(event.event_at),
            market: event.market.clone(),
            title: event.title.clone(),
            url: event.page_url.clone(),
            impact: event.impact,
            change_percent: event.change_pct.map(f64::from),
            description: event.description.clone(),
        }
    }
}
