//! Content change detection and quality assessment for crawled pages.
//!
//! Everything here is a pure function over in-memory data: no I/O, no shared state.
//! Callers may run any of it concurrently for many URLs without coordination.

mod change;
mod config;
mod error;
mod fingerprint;
mod patterns;
mod timeline;
mod trends;
mod validate;

pub use change::estimate_change;
pub use config::{QualityConfig, QualityThresholds, PRIORITY_CONTENT_TYPES};
pub use error::QualityConfigError;
pub use fingerprint::fingerprint;
pub use patterns::{
    detect_cross_market_patterns, detect_cross_market_patterns_at, title_similarity, PatternReport,
    PatternType,
};
pub use timeline::sort_events_by_relevance;
pub use trends::{rank_rising_keywords, rising_score, KeywordTrend, RankedKeyword};
pub use validate::{QualityValidator, RejectionReason, ValidationReport};

pub const CRATE_NAME: &str = "mcw-quality";
