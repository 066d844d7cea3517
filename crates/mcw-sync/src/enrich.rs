use std::path::Path;

use anyhow::{Context, Result};
use mcw_core::PageDraft;
use serde::Deserialize;

/// Post-crawl enrichment applied to every draft before assessment.
pub trait EnrichmentHook: Send + Sync {
    fn apply(&self, drafts: Vec<PageDraft>) -> Result<Vec<PageDraft>>;
}

#[derive(Default)]
pub struct NoopEnrichmentHook;

impl EnrichmentHook for NoopEnrichmentHook {
    fn apply(&self, drafts: Vec<PageDraft>) -> Result<Vec<PageDraft>> {
        Ok(drafts)
    }
}

/// Runs hooks in order, each seeing the output of the previous one.
#[derive(Default)]
pub struct EnrichmentChain {
    hooks: Vec<Box<dyn EnrichmentHook>>,
}

impl EnrichmentChain {
    pub fn new(hooks: Vec<Box<dyn EnrichmentHook>>) -> Self {
        Self { hooks }
    }

    pub fn then(mut self, hook: Box<dyn EnrichmentHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

impl EnrichmentHook for EnrichmentChain {
    fn apply(&self, drafts: Vec<PageDraft>) -> Result<Vec<PageDraft>> {
        self.hooks.iter().try_fold(drafts, |drafts, hook| hook.apply(drafts))
    }
}

pub const DEFAULT_SUMMARY_CHARS: usize = 280;

/// Extractive summary for pages that arrive without one.
///
/// Fills `summary` from the leading sentences of the page text, or from the description when
/// there is no text. Drafts that already carry `summary` or `summary_en` are left alone.
pub struct LeadSummaryEnrichmentHook {
    max_chars: usize,
}

impl Default for LeadSummaryEnrichmentHook {
    fn default() -> Self {
        Self::new(DEFAULT_SUMMARY_CHARS)
    }
}

impl LeadSummaryEnrichmentHook {
    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars: max_chars.max(1),
        }
    }
}

impl EnrichmentHook for LeadSummaryEnrichmentHook {
    fn apply(&self, mut drafts: Vec<PageDraft>) -> Result<Vec<PageDraft>> {
        for draft in &mut drafts {
            if has_text(draft.summary.as_deref()) || has_text(draft.summary_en.as_deref()) {
                continue;
            }
            draft.summary = draft
                .text_content
                .as_deref()
                .and_then(|text| lead_summary(text, self.max_chars))
                .or_else(|| {
                    draft
                        .description
                        .as_deref()
                        .and_then(|text| lead_summary(text, self.max_chars))
                });
        }
        Ok(drafts)
    }
}

fn has_text(value: Option<&str>) -> bool {
    value.is_some_and(|v| !v.trim().is_empty())
}

fn is_sentence_end(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | '。' | '！' | '？')
}

/// Whole leading sentences up to `max_chars`; a first sentence that is already too long is cut
/// at a word boundary.
fn lead_summary(text: &str, max_chars: usize) -> Option<String> {
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.is_empty() {
        return None;
    }

    let mut out = String::new();
    let mut out_len = 0;
    for sentence in normalized.split_inclusive(is_sentence_end) {
        let sentence = sentence.trim();
        if sentence.is_empty() {
            continue;
        }
        let len = sentence.chars().count();
        let joined = if out.is_empty() { len } else { out_len + 1 + len };
        if joined > max_chars {
            break;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(sentence);
        out_len = joined;
    }
    if !out.is_empty() {
        return Some(out);
    }

    for word in normalized.split(' ') {
        let len = word.chars().count();
        let joined = if out.is_empty() { len } else { out_len + 1 + len };
        if joined > max_chars {
            break;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
        out_len = joined;
    }
    if out.is_empty() {
        out = normalized.chars().take(max_chars).collect();
    }
    Some(out)
}

#[derive(Debug, Clone, Deserialize)]
struct CategoryRulesFile {
    #[allow(dead_code)]
    version: u32,
    #[serde(default)]
    rules: Vec<CategoryRule>,
}

#[derive(Debug, Clone, Deserialize)]
struct CategoryRule {
    category: String,
    #[serde(default)]
    content_type: Option<String>,
    contains_any: Vec<String>,
}

impl CategoryRule {
    fn matches(&self, haystack: &str) -> bool {
        self.contains_any
            .iter()
            .any(|needle| haystack.contains(&needle.to_lowercase()))
    }
}

/// Keyword rules from `rules/categories.yaml` matched against title and description.
///
/// The first matching rule wins. Values already set by the crawl are left alone.
pub struct YamlRuleEnrichmentHook {
    rules: Vec<CategoryRule>,
}

impl YamlRuleEnrichmentHook {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let file: CategoryRulesFile = serde_yaml::from_str(yaml).context("parsing category rules")?;
        Ok(Self { rules: file.rules })
    }

    pub fn from_workspace_root(root: &Path) -> Result<Self> {
        let path = root.join("rules").join("categories.yaml");
        let text = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("loading {}", path.display()))
    }
}

impl EnrichmentHook for YamlRuleEnrichmentHook {
    fn apply(&self, mut drafts: Vec<PageDraft>) -> Result<Vec<PageDraft>> {
        for draft in &mut drafts {
            if draft.category.is_some() && draft.content_type.is_some() {
                continue;
            }
            let combined = format!(
                "{} {}",
                draft.title.as_deref().unwrap_or_default(),
                draft.description.as_deref().unwrap_or_default()
            )
            .to_lowercase();

            let Some(rule) = self.rules.iter().find(|rule| rule.matches(&combined)) else {
                continue;
            };
            if draft.category.is_none() {
                draft.category = Some(rule.category.clone());
            }
            if draft.content_type.is_none() {
                draft.content_type = rule.content_type.clone();
            }
        }
        Ok(drafts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RULES: &str = r#"
version: 1
rules:
  - category: treatment
    content_type: guide
    contains_any: ["Behandlung", "treatment"]
  - category: tools
    content_type: resource
    contains_any: ["bmi"]
"#;

    fn draft(title: &str) -> PageDraft {
        PageDraft {
            title: Some(title.into()),
            ..Default::default()
        }
    }

    #[test]
    fn first_matching_rule_sets_category_and_content_type() {
        let hook = YamlRuleEnrichmentHook::from_yaml_str(RULES).unwrap();
        let out = hook
            .apply(vec![draft("Behandlung mit BMI-Check"), draft("Careers")])
            .unwrap();
        assert_eq!(out[0].category.as_deref(), Some("treatment"));
        assert_eq!(out[0].content_type.as_deref(), Some("guide"));
        assert_eq!(out[1].category, None);
    }

    #[test]
    fn crawl_supplied_values_are_kept() {
        let hook = YamlRuleEnrichmentHook::from_yaml_str(RULES).unwrap();
        let mut page = draft("BMI calculator");
        page.content_type = Some("landing_page".into());
        let out = hook.apply(vec![page]).unwrap();
        assert_eq!(out[0].category.as_deref(), Some("tools"));
        assert_eq!(out[0].content_type.as_deref(), Some("landing_page"));
    }

    #[test]
    fn lead_summary_takes_whole_sentences_within_limit() {
        let mut page = draft("Weekly treatment overview");
        page.text_content = Some(
            "The weekly injection supports weight management.  It is prescribed by a doctor. \
             Results vary between patients and depend on diet and activity."
                .into(),
        );
        let out = LeadSummaryEnrichmentHook::new(90).apply(vec![page]).unwrap();
        assert_eq!(
            out[0].summary.as_deref(),
            Some("The weekly injection supports weight management. It is prescribed by a doctor.")
        );
    }

    #[test]
    fn lead_summary_cuts_long_first_sentence_at_word_boundary() {
        let mut page = draft("Overview");
        page.text_content = Some("alpha beta gamma delta epsilon".into());
        let out = LeadSummaryEnrichmentHook::new(16).apply(vec![page]).unwrap();
        assert_eq!(out[0].summary.as_deref(), Some("alpha beta gamma"));
    }

    #[test]
    fn lead_summary_falls_back_to_description_and_keeps_existing() {
        let mut bare = draft("Overview");
        bare.description = Some("Treatment information for adults.".into());
        let mut translated = draft("Übersicht");
        translated.text_content = Some("Ein Satz.".into());
        translated.summary_en = Some("Existing English summary".into());

        let out = LeadSummaryEnrichmentHook::default()
            .apply(vec![bare, translated, draft("Empty")])
            .unwrap();
        assert_eq!(out[0].summary.as_deref(), Some("Treatment information for adults."));
        assert_eq!(out[1].summary, None);
        assert_eq!(out[2].summary, None);
    }

    #[test]
    fn chain_applies_hooks_in_order() {
        let chain = EnrichmentChain::default()
            .then(Box::new(YamlRuleEnrichmentHook::from_yaml_str(RULES).unwrap()))
            .then(Box::<LeadSummaryEnrichmentHook>::default());
        assert_eq!(chain.len(), 2);

        let mut page = draft("Treatment guide");
        page.text_content = Some("Dosing is weekly. Ask your doctor.".into());
        let out = chain.apply(vec![page]).unwrap();
        assert_eq!(out[0].category.as_deref(), Some("treatment"));
        assert_eq!(out[0].summary.as_deref(), Some("Dosing is weekly. Ask your doctor."));
    }

    #[test]
    fn workspace_rules_file_loads() {
        let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("../..");
        let hook = YamlRuleEnrichmentHook::from_workspace_root(&root).unwrap();
        let out = hook.apply(vec![draft("Actualités du programme")]).unwrap();
        assert_eq!(out[0].category.as_deref(), Some("news"));
    }
}
