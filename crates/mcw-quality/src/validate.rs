use std::fmt;

use mcw_core::{PageDraft, TimelineEvent};
use serde::{Serialize, Serializer};

use crate::config::{QualityConfig, PRIORITY_CONTENT_TYPES};
use crate::error::QualityConfigError;

/// Why a page was refused storage. Reasons are independent; a page may carry several.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectionReason {
    MissingUrl,
    ExcludedUrl,
    MissingTitle,
    ExcludedTitle,
    BelowQualityThreshold,
    MissingMarket,
    MissingSummary,
}

impl RejectionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RejectionReason::MissingUrl => "missing URL",
            RejectionReason::ExcludedUrl => "URL matches exclusion pattern",
            RejectionReason::MissingTitle => "missing title",
            RejectionReason::ExcludedTitle => "title matches exclusion pattern",
            RejectionReason::BelowQualityThreshold => "does not meet quality threshold",
            RejectionReason::MissingMarket => "missing market",
            RejectionReason::MissingSummary => "missing summary",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for RejectionReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub reasons: Vec<RejectionReason>,
}

impl ValidationReport {
    fn from_reasons(reasons: Vec<RejectionReason>) -> Self {
        Self {
            is_valid: reasons.is_empty(),
            reasons,
        }
    }
}

fn present(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

fn char_len(value: &str) -> usize {
    value.chars().count()
}

/// Decides whether crawled pages are real content and scores them for timeline ranking.
#[derive(Debug, Clone)]
pub struct QualityValidator {
    config: QualityConfig,
}

impl Default for QualityValidator {
    fn default() -> Self {
        Self {
            config: QualityConfig::default().normalized(),
        }
    }
}

impl QualityValidator {
    pub fn new(config: QualityConfig) -> Result<Self, QualityConfigError> {
        config.check()?;
        Ok(Self {
            config: config.normalized(),
        })
    }

    pub fn config(&self) -> &QualityConfig {
        &self.config
    }

    pub fn is_excluded_title(&self, title: Option<&str>) -> bool {
        let Some(title) = present(title) else {
            return true;
        };
        let lower = title.to_lowercase();
        self.config
            .title_exclusions
            .iter()
            .any(|needle| lower.contains(needle.as_str()))
    }

    pub fn is_excluded_url(&self, url: Option<&str>) -> bool {
        let Some(url) = present(url) else {
            return true;
        };
        let lower = url.to_lowercase();
        self.config
            .url_exclusions
            .iter()
            .any(|needle| lower.contains(needle.as_str()))
            || char_len(url) > self.config.thresholds.max_url_length
            || self
                .config
                .non_page_suffixes
                .iter()
                .any(|suffix| lower.ends_with(suffix.as_str()))
    }

    /// Title length bounds, minimum word count and placeholder-content check.
    ///
    /// An absent `word_count` passes; only an explicit count below the minimum fails.
    pub fn meets_quality_threshold(&self, page: &PageDraft) -> bool {
        let thresholds = &self.config.thresholds;
        let Some(title) = present(page.title.as_deref()) else {
            return false;
        };
        let title_len = char_len(title);
        if title_len < thresholds.min_title_length || title_len > thresholds.max_title_length {
            return false;
        }
        if page.word_count.is_some_and(|count| count < thresholds.min_word_count) {
            return false;
        }
        if let Some(text) = page.text_content.as_deref() {
            let lower = text.to_lowercase();
            if self
                .config
                .content_indicators
                .iter()
                .any(|needle| lower.contains(needle.as_str()))
            {
                return false;
            }
        }
        true
    }

    /// Collect every reason a page should not be stored. Does not stop at the first failure.
    pub fn validate_for_storage(&self, page: &PageDraft) -> ValidationReport {
        let mut reasons = Vec::new();
        let url = present(page.url.as_deref());
        let title = present(page.title.as_deref());

        if url.is_none() {
            reasons.push(RejectionReason::MissingUrl);
        } else if self.is_excluded_url(url) {
            reasons.push(RejectionReason::ExcludedUrl);
        }

        if title.is_none() {
            reasons.push(RejectionReason::MissingTitle);
        } else if self.is_excluded_title(title) {
            reasons.push(RejectionReason::ExcludedTitle);
        }

        if !self.meets_quality_threshold(page) {
            reasons.push(RejectionReason::BelowQualityThreshold);
        }
        if present(page.market.as_deref()).is_none() {
            reasons.push(RejectionReason::MissingMarket);
        }
        if present(page.summary.as_deref()).is_none() && present(page.summary_en.as_deref()).is_none() {
            reasons.push(RejectionReason::MissingSummary);
        }

        ValidationReport::from_reasons(reasons)
    }

    pub fn validate_event_for_timeline(&self, event: &TimelineEvent) -> bool {
        let (Some(event_type), Some(_)) = (event.event_type, event.event_at) else {
            return false;
        };
        if event_type.is_synthetic() {
            return true;
        }
        if let Some(title) = event.title.as_deref() {
            if self.is_excluded_title(Some(title)) {
                return false;
            }
        }
        if let Some(url) = event.url.as_deref() {
            if self.is_excluded_url(Some(url)) {
                return false;
            }
        }
        true
    }

    /// Additive completeness score, 0-100.
    pub fn calculate_quality_score(&self, page: &PageDraft) -> u8 {
        let thresholds = &self.config.thresholds;
        let mut score: u32 = 0;

        if page
            .title
            .as_deref()
            .is_some_and(|t| char_len(t) > thresholds.min_title_length)
        {
            score += 20;
        }
        if page
            .description
            .as_deref()
            .is_some_and(|d| char_len(d) > thresholds.min_description_length)
        {
            score += 15;
        }
        if page.publish_date.is_some() {
            score += 15;
        }
        if page.summary_en.as_deref().is_some_and(|s| char_len(s) > 50) {
            score += 20;
        }
        if page.word_count.is_some_and(|count| count > 300) {
            score += 15;
        }
        if page
            .content_type
            .as_deref()
            .is_some_and(|ct| PRIORITY_CONTENT_TYPES.contains(&ct))
        {
            score += 15;
        }

        score.min(100) as u8
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use mcw_core::{EventType, Impact};

    use super::*;

    fn prose(words: usize) -> String {
        let vocab = ["healthy", "weight", "management", "starts", "with", "informed", "choices", "daily"];
        (0..words).map(|i| vocab[i % vocab.len()]).collect::<Vec<_>>().join(" ")
    }

    fn bmi_page() -> PageDraft {
        PageDraft {
            url: Some("https://example.com/bmi-calculator".into()),
            market: Some("de".into()),
            title: Some("BMI Calculator".into()),
            description: Some("Calculate your BMI in under a minute".into()),
            text_content: Some(prose(450)),
            word_count: Some(450),
            publish_date: Some(Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()),
            summary_en: Some("x".repeat(80)),
            content_type: Some("resource".into()),
            ..Default::default()
        }
    }

    #[test]
    fn title_exclusion_is_case_insensitive() {
        let v = QualityValidator::default();
        assert!(v.is_excluded_title(Some("404 Not Found")));
        assert!(v.is_excluded_title(Some("404 NOT FOUND")));
        assert!(v.is_excluded_title(Some("Site Under Construction")));
        assert!(v.is_excluded_title(None));
        assert!(v.is_excluded_title(Some("")));
        assert!(!v.is_excluded_title(Some("Weekly dosing explained")));
    }

    #[test]
    fn url_exclusion_covers_patterns_length_and_suffixes() {
        let v = QualityValidator::default();
        assert!(v.is_excluded_url(None));
        assert!(v.is_excluded_url(Some("https://example.com/WP-ADMIN/options")));
        assert!(v.is_excluded_url(Some("https://example.com/files/leaflet.PDF")));
        let long = format!("https://example.com/{}", "a".repeat(500));
        assert!(v.is_excluded_url(Some(&long)));
        assert!(!v.is_excluded_url(Some("https://example.com/treatment/overview")));
    }

    #[test]
    fn absent_word_count_does_not_fail_threshold() {
        let v = QualityValidator::default();
        let mut page = bmi_page();
        page.word_count = None;
        assert!(v.meets_quality_threshold(&page));
        page.word_count = Some(99);
        assert!(!v.meets_quality_threshold(&page));
    }

    #[test]
    fn placeholder_text_and_title_bounds_fail_threshold() {
        let v = QualityValidator::default();
        let mut page = bmi_page();
        page.text_content = Some(format!("{} Lorem Ipsum dolor", prose(200)));
        assert!(!v.meets_quality_threshold(&page));

        let mut page = bmi_page();
        page.title = Some("Short".into());
        assert!(!v.meets_quality_threshold(&page));
        page.title = Some("T".repeat(201));
        assert!(!v.meets_quality_threshold(&page));
    }

    #[test]
    fn complete_page_is_valid_and_scores_full_marks() {
        let v = QualityValidator::default();
        let page = bmi_page();
        let report = v.validate_for_storage(&page);
        assert_eq!(report, ValidationReport { is_valid: true, reasons: vec![] });
        assert_eq!(v.calculate_quality_score(&page), 100);
    }

    #[test]
    fn error_page_collects_url_and_title_exclusions() {
        let v = QualityValidator::default();
        let page = PageDraft {
            title: Some("404".into()),
            url: Some("https://example.com/404".into()),
            text_content: None,
            word_count: Some(0),
            ..Default::default()
        };
        assert!(v.is_excluded_title(page.title.as_deref()));
        assert!(v.is_excluded_url(page.url.as_deref()));
        let report = v.validate_for_storage(&page);
        assert!(!report.is_valid);
        assert!(report.reasons.contains(&RejectionReason::ExcludedUrl));
        assert!(report.reasons.contains(&RejectionReason::ExcludedTitle));
    }

    #[test]
    fn missing_url_and_title_are_both_reported() {
        let v = QualityValidator::default();
        let report = v.validate_for_storage(&PageDraft::default());
        assert!(!report.is_valid);
        assert!(report.reasons.contains(&RejectionReason::MissingUrl));
        assert!(report.reasons.contains(&RejectionReason::MissingTitle));
        assert!(!report.reasons.contains(&RejectionReason::ExcludedUrl));
        assert!(!report.reasons.contains(&RejectionReason::ExcludedTitle));
        assert!(report.reasons.contains(&RejectionReason::MissingMarket));
        assert!(report.reasons.contains(&RejectionReason::MissingSummary));
    }

    #[test]
    fn local_summary_alone_satisfies_summary_requirement() {
        let v = QualityValidator::default();
        let mut page = bmi_page();
        page.summary_en = None;
        page.summary = Some("BMI-Rechner für Patienten".into());
        assert!(v.validate_for_storage(&page).is_valid);
    }

    #[test]
    fn reasons_serialize_as_messages() {
        let report = ValidationReport::from_reasons(vec![RejectionReason::MissingMarket]);
        let json = serde_json::to_string(&report).unwrap();
        assert_eq!(json, r#"{"is_valid":false,"reasons":["missing market"]}"#);
    }

    #[test]
    fn adding_satisfied_conditions_never_lowers_score() {
        let v = QualityValidator::default();
        let mut page = bmi_page();
        page.publish_date = None;
        let without = v.calculate_quality_score(&page);
        page.publish_date = Some(Utc::now());
        let with = v.calculate_quality_score(&page);
        assert_eq!(without, 85);
        assert!(with >= without);
        assert_eq!(with, 100);
    }

    #[test]
    fn score_thresholds_are_strict() {
        let v = QualityValidator::default();
        let page = PageDraft {
            title: Some("0123456789".into()),
            description: Some("d".repeat(20)),
            summary_en: Some("s".repeat(50)),
            word_count: Some(300),
            content_type: Some("faq".into()),
            ..Default::default()
        };
        assert_eq!(v.calculate_quality_score(&page), 0);
    }

    #[test]
    fn synthetic_events_always_pass_timeline_validation() {
        let v = QualityValidator::default();
        let at = Some(Utc::now());
        let pattern = TimelineEvent {
            id: "p".into(),
            event_type: Some(EventType::Pattern),
            event_at: at,
            title: Some("404".into()),
            ..Default::default()
        };
        assert!(v.validate_event_for_timeline(&pattern));

        let update = TimelineEvent {
            id: "u".into(),
            event_type: Some(EventType::Updated),
            event_at: at,
            title: Some("Page not found".into()),
            impact: Some(Impact::High),
            ..Default::default()
        };
        assert!(!v.validate_event_for_timeline(&update));

        let bare = TimelineEvent {
            id: "b".into(),
            event_type: Some(EventType::Created),
            event_at: at,
            ..Default::default()
        };
        assert!(v.validate_event_for_timeline(&bare));

        let undated = TimelineEvent {
            event_at: None,
            ..bare.clone()
        };
        assert!(!v.validate_event_for_timeline(&undated));

        let untyped = TimelineEvent {
            event_type: None,
            ..bare.clone()
        };
        assert!(!v.validate_event_for_timeline(&untyped));

        let login = TimelineEvent {
            url: Some("https://brand.example/de/login".into()),
            title: Some("Anmeldung für Fachkreise".into()),
            ..bare.clone()
        };
        assert!(!v.validate_event_for_timeline(&login));

        let pattern_on_excluded_url = TimelineEvent {
            url: Some("https://brand.example/wp-admin".into()),
            ..pattern.clone()
        };
        assert!(v.validate_event_for_timeline(&pattern_on_excluded_url));
    }

    #[test]
    fn custom_config_is_applied_case_insensitively() {
        let config = QualityConfig {
            title_exclusions: vec!["DRAFT".into()],
            ..QualityConfig::default()
        };
        let v = QualityValidator::new(config).unwrap();
        assert!(v.is_excluded_title(Some("Draft: new campaign")));
        assert!(!v.is_excluded_title(Some("404")));
    }
}
