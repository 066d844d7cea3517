use serde::{Deserialize, Serialize};

use crate::error::QualityConfigError;

/// Content types that earn the content-type bonus in the quality score.
pub const PRIORITY_CONTENT_TYPES: &[&str] = &[
    "article",
    "landing_page",
    "product_page",
    "campaign",
    "blog_post",
    "press_release",
    "news",
    "guide",
    "resource",
];

const DEFAULT_TITLE_EXCLUSIONS: &[&str] = &[
    "404",
    "not found",
    "error",
    "page not found",
    "oops",
    "coming soon",
    "under construction",
    "maintenance",
    "access denied",
    "forbidden",
    "unauthorized",
];

const DEFAULT_URL_EXCLUSIONS: &[&str] = &[
    "/404",
    "/error",
    "/admin",
    "/login",
    "/wp-admin",
    "/wp-login",
    "/test",
    "/_next",
    "/api/",
    "/cgi-bin/",
    "/.well-known/",
    "/robots.txt",
    "/sitemap.xml",
];

const DEFAULT_CONTENT_INDICATORS: &[&str] = &[
    "lorem ipsum",
    "coming soon",
    "under development",
    "test content",
    "example content",
];

const DEFAULT_NON_PAGE_SUFFIXES: &[&str] = &[".pdf", ".jpg", ".png", ".gif", ".zip", ".exe"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    pub min_word_count: u32,
    pub min_title_length: usize,
    pub max_title_length: usize,
    pub min_description_length: usize,
    pub max_url_length: usize,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            min_word_count: 100,
            min_title_length: 10,
            max_title_length: 200,
            min_description_length: 20,
            max_url_length: 500,
        }
    }
}

/// Exclusion patterns and thresholds. All pattern matching is case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub title_exclusions: Vec<String>,
    pub url_exclusions: Vec<String>,
    pub content_indicators: Vec<String>,
    pub non_page_suffixes: Vec<String>,
    pub thresholds: QualityThresholds,
}

fn owned(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| (*s).to_string()).collect()
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            title_exclusions: owned(DEFAULT_TITLE_EXCLUSIONS),
            url_exclusions: owned(DEFAULT_URL_EXCLUSIONS),
            content_indicators: owned(DEFAULT_CONTENT_INDICATORS),
            non_page_suffixes: owned(DEFAULT_NON_PAGE_SUFFIXES),
            thresholds: QualityThresholds::default(),
        }
    }
}

impl QualityConfig {
    /// Parse a YAML override. Omitted keys keep their defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, QualityConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.check()?;
        Ok(config)
    }

    pub fn check(&self) -> Result<(), QualityConfigError> {
        for (list, patterns) in [
            ("title_exclusions", &self.title_exclusions),
            ("url_exclusions", &self.url_exclusions),
            ("content_indicators", &self.content_indicators),
            ("non_page_suffixes", &self.non_page_suffixes),
        ] {
            if let Some(index) = patterns.iter().position(|p| p.trim().is_empty()) {
                return Err(QualityConfigError::EmptyPattern { list, index });
            }
        }

        let t = &self.thresholds;
        if t.min_title_length > t.max_title_length {
            return Err(QualityConfigError::TitleBounds {
                min: t.min_title_length,
                max: t.max_title_length,
            });
        }
        if t.max_url_length == 0 {
            return Err(QualityConfigError::ZeroMaxUrlLength);
        }
        Ok(())
    }

    /// Lower-cased copy used for matching.
    pub(crate) fn normalized(&self) -> Self {
        let lower = |list: &[String]| list.iter().map(|p| p.to_lowercase()).collect::<Vec<_>>();
        Self {
            title_exclusions: lower(&self.title_exclusions),
            url_exclusions: lower(&self.url_exclusions),
            content_indicators: lower(&self.content_indicators),
            non_page_suffixes: lower(&self.non_page_suffixes),
            thresholds: self.thresholds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = QualityConfig::default();
        assert_eq!(config.title_exclusions.len(), 11);
        assert_eq!(config.url_exclusions.len(), 13);
        assert_eq!(config.thresholds.min_word_count, 100);
        assert_eq!(config.thresholds.max_url_length, 500);
        assert!(config.check().is_ok());
    }

    #[test]
    fn yaml_overrides_only_named_keys() {
        let config = QualityConfig::from_yaml_str(
            "thresholds:\n  min_word_count: 40\ntitle_exclusions:\n  - Placeholder\n",
        )
        .unwrap();
        assert_eq!(config.thresholds.min_word_count, 40);
        assert_eq!(config.thresholds.min_title_length, 10);
        assert_eq!(config.title_exclusions, vec!["Placeholder".to_string()]);
        assert_eq!(config.url_exclusions.len(), 13);
    }

    #[test]
    fn empty_pattern_is_rejected() {
        let err = QualityConfig::from_yaml_str("url_exclusions:\n  - /admin\n  - ''\n").unwrap_err();
        assert!(matches!(
            err,
            QualityConfigError::EmptyPattern { list: "url_exclusions", index: 1 }
        ));
    }

    #[test]
    fn inverted_title_bounds_are_rejected() {
        let err = QualityConfig::from_yaml_str(
            "thresholds:\n  min_title_length: 50\n  max_title_length: 20\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("50"));
    }
}
