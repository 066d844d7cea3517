use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Duration, Utc};
use mcw_core::TimelineEvent;
use serde::{Deserialize, Serialize};

const SIMULTANEOUS_WINDOW_MINUTES: i64 = 60;
const SIMULTANEOUS_MIN_MARKETS: usize = 3;
const SIMILAR_TITLE_THRESHOLD: f64 = 0.7;
const SIMILAR_MIN_EVENTS: usize = 3;
const SIMILAR_CONFIDENCE: f64 = 0.75;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    SimultaneousUpdate,
    SimilarContent,
}

impl PatternType {
    pub fn as_str(self) -> &'static str {
        match self {
            PatternType::SimultaneousUpdate => "simultaneous_update",
            PatternType::SimilarContent => "similar_content",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PatternReport {
    pub has_pattern: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern_type: Option<PatternType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affected_markets: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl PatternReport {
    fn none() -> Self {
        Self::default()
    }

    fn found(pattern_type: PatternType, markets: BTreeSet<&str>, confidence: f64) -> Self {
        Self {
            has_pattern: true,
            pattern_type: Some(pattern_type),
            affected_markets: Some(markets.into_iter().map(str::to_string).collect()),
            confidence: Some(confidence),
        }
    }
}

fn title_words(title: Option<&str>) -> Vec<String> {
    title
        .unwrap_or_default()
        .to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Dice-style overlap of two titles: `2 * common / (len_a + len_b)` over lower-cased words.
///
/// `common` counts each word of `a` that appears anywhere in `b`.
pub fn title_similarity(a: Option<&str>, b: Option<&str>) -> f64 {
    let words_a = title_words(a);
    let words_b = title_words(b);
    let total = words_a.len() + words_b.len();
    if total == 0 {
        return 0.0;
    }
    let set_b: HashSet<&str> = words_b.iter().map(String::as_str).collect();
    let common = words_a.iter().filter(|w| set_b.contains(w.as_str())).count();
    (2 * common) as f64 / total as f64
}

/// Detect coordinated activity across markets, evaluated at the current time.
pub fn detect_cross_market_patterns(events: &[TimelineEvent]) -> PatternReport {
    detect_cross_market_patterns_at(events, Utc::now())
}

/// Detect coordinated activity across markets as seen from `now`.
///
/// Three or more markets active within the last hour is a simultaneous update and wins over
/// the similar-content check, which needs three or more events whose titles closely match an
/// event from another market.
pub fn detect_cross_market_patterns_at(events: &[TimelineEvent], now: DateTime<Utc>) -> PatternReport {
    let window = Duration::minutes(SIMULTANEOUS_WINDOW_MINUTES);
    let recent_markets: BTreeSet<&str> = events
        .iter()
        .filter(|e| e.event_at.is_some_and(|at| now.signed_duration_since(at) < window))
        .filter_map(|e| e.market.as_deref())
        .collect();

    if recent_markets.len() >= SIMULTANEOUS_MIN_MARKETS {
        // 0.2 per market, expressed in tenths to keep 3 markets at exactly 0.6
        let confidence = ((recent_markets.len() * 2) as f64 / 10.0).min(0.9);
        return PatternReport::found(PatternType::SimultaneousUpdate, recent_markets, confidence);
    }

    let matched: Vec<&TimelineEvent> = events
        .iter()
        .filter(|event| {
            let Some(market) = event.market.as_deref() else {
                return false;
            };
            events.iter().any(|other| {
                other.market.as_deref().is_some_and(|m| m != market)
                    && title_similarity(event.title.as_deref(), other.title.as_deref())
                        > SIMILAR_TITLE_THRESHOLD
            })
        })
        .collect();

    if matched.len() >= SIMILAR_MIN_EVENTS {
        let markets = matched.iter().copied().filter_map(|e| e.market.as_deref()).collect();
        return PatternReport::found(PatternType::SimilarContent, markets, SIMILAR_CONFIDENCE);
    }

    PatternReport::none()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use mcw_core::EventType;

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 10, 15, 0, 0).unwrap()
    }

    fn event(market: &str, title: &str, minutes_ago: i64) -> TimelineEvent {
        TimelineEvent {
            id: format!("{market}-{minutes_ago}"),
            event_type: Some(EventType::Updated),
            event_at: Some(now() - Duration::minutes(minutes_ago)),
            market: Some(market.into()),
            title: Some(title.into()),
            ..Default::default()
        }
    }

    #[test]
    fn two_recent_markets_are_not_simultaneous() {
        let events = vec![
            event("de", "Dosing guide", 5),
            event("fr", "Guide posologique", 10),
            event("de", "Side effects", 20),
        ];
        let report = detect_cross_market_patterns_at(&events, now());
        assert!(!report.has_pattern);
        assert_eq!(report.pattern_type, None);
        assert_eq!(report.confidence, None);
    }

    #[test]
    fn three_recent_markets_trigger_simultaneous_update() {
        let events = vec![
            event("de", "Dosing guide", 5),
            event("fr", "Guide posologique", 10),
            event("jp", "Dosage", 59),
            event("br", "Guia", 120),
        ];
        let report = detect_cross_market_patterns_at(&events, now());
        assert!(report.has_pattern);
        assert_eq!(report.pattern_type, Some(PatternType::SimultaneousUpdate));
        assert_eq!(report.confidence, Some(0.6));
        assert_eq!(
            report.affected_markets,
            Some(vec!["de".to_string(), "fr".to_string(), "jp".to_string()])
        );
    }

    #[test]
    fn simultaneous_confidence_caps_at_point_nine() {
        let events: Vec<_> = ["de", "fr", "jp", "br", "it", "es"]
            .iter()
            .map(|m| event(m, "Update", 1))
            .collect();
        let report = detect_cross_market_patterns_at(&events, now());
        assert_eq!(report.confidence, Some(0.9));
    }

    #[test]
    fn similar_titles_across_markets_are_detected() {
        let events = vec![
            event("de", "New weekly pen dosing guide", 300),
            event("fr", "New weekly pen dosing guide", 400),
            event("it", "new WEEKLY pen dosing guide", 500),
            event("de", "Unrelated careers page", 600),
        ];
        let report = detect_cross_market_patterns_at(&events, now());
        assert!(report.has_pattern);
        assert_eq!(report.pattern_type, Some(PatternType::SimilarContent));
        assert_eq!(report.confidence, Some(0.75));
        assert_eq!(
            report.affected_markets,
            Some(vec!["de".to_string(), "fr".to_string(), "it".to_string()])
        );
    }

    #[test]
    fn similar_titles_within_one_market_do_not_count() {
        let events = vec![
            event("de", "Weekly pen dosing guide", 300),
            event("de", "Weekly pen dosing guide", 400),
            event("de", "Weekly pen dosing guide", 500),
        ];
        assert!(!detect_cross_market_patterns_at(&events, now()).has_pattern);
    }

    #[test]
    fn simultaneous_check_takes_precedence() {
        let events = vec![
            event("de", "Weekly pen dosing guide", 1),
            event("fr", "Weekly pen dosing guide", 2),
            event("it", "Weekly pen dosing guide", 3),
        ];
        let report = detect_cross_market_patterns_at(&events, now());
        assert_eq!(report.pattern_type, Some(PatternType::SimultaneousUpdate));
    }

    #[test]
    fn title_similarity_handles_missing_titles() {
        assert_eq!(title_similarity(None, None), 0.0);
        assert_eq!(title_similarity(Some("a b"), Some("A B")), 1.0);
        assert_eq!(title_similarity(Some("a b"), Some("a c")), 0.5);
    }

    #[test]
    fn empty_events_have_no_pattern() {
        assert_eq!(detect_cross_market_patterns(&[]), PatternReport::none());
    }
}
