use chrono::{DateTime, Utc};
use mcw_core::{word_count, EventType, PageDraft, PageEvent, PageSnapshot};
use mcw_quality::{estimate_change, fingerprint, QualityValidator, RejectionReason};
use uuid::Uuid;

/// What one crawled draft means for the store.
#[derive(Debug, Clone, PartialEq)]
pub enum Assessment {
    Rejected {
        url: Option<String>,
        reasons: Vec<RejectionReason>,
    },
    Created {
        snapshot: PageSnapshot,
        event: PageEvent,
    },
    Updated {
        snapshot: PageSnapshot,
        event: PageEvent,
    },
    /// Same fingerprint as the stored page: metadata refreshed, no event.
    Unchanged { snapshot: PageSnapshot },
}

pub struct PageAssessor {
    validator: QualityValidator,
}

impl PageAssessor {
    pub fn new(validator: QualityValidator) -> Self {
        Self { validator }
    }

    pub fn validator(&self) -> &QualityValidator {
        &self.validator
    }

    pub fn assess(&self, draft: &PageDraft, previous: Option<&PageSnapshot>, now: DateTime<Utc>) -> Assessment {
        let report = self.validator.validate_for_storage(draft);
        let (Some(url), Some(market), true) = (draft.url.as_deref(), draft.market.as_deref(), report.is_valid)
        else {
            return Assessment::Rejected {
                url: draft.url.clone(),
                reasons: report.reasons,
            };
        };

        let text = draft.text_content.as_deref();
        let change_hash = fingerprint(text);
        let quality_score = self.validator.calculate_quality_score(draft);

        let mut snapshot = PageSnapshot {
            id: previous.map(|p| p.id).unwrap_or_else(Uuid::new_v4),
            url: url.to_string(),
            market: market.to_string(),
            language: draft.language.clone(),
            title: draft.title.clone(),
            description: draft.description.clone(),
            text_content: draft.text_content.clone(),
            word_count: draft.word_count.unwrap_or_else(|| text.map(word_count).unwrap_or(0)),
            change_hash,
            change_pct: 0,
            quality_score,
            last_crawled_at: now,
            last_modified_at: now,
            publish_date: draft.publish_date,
            summary: draft.summary.clone(),
            summary_en: draft.summary_en.clone(),
            category: draft.category.clone(),
            content_type: draft.content_type.clone(),
            signals: draft.signals.unwrap_or_default(),
        };

        match previous {
            None => {
                snapshot.change_pct = estimate_change(None, text);
                let event = PageEvent::for_page(&snapshot, EventType::Created, now);
                Assessment::Created { snapshot, event }
            }
            Some(prev) if prev.change_hash == snapshot.change_hash => {
                snapshot.change_pct = prev.change_pct;
                snapshot.last_modified_at = prev.last_modified_at;
                Assessment::Unchanged { snapshot }
            }
            Some(prev) => {
                snapshot.change_pct = estimate_change(prev.text_content.as_deref(), text);
                let event = PageEvent::for_page(&snapshot, EventType::Updated, now);
                Assessment::Updated { snapshot, event }
            }
        }
    }
}
