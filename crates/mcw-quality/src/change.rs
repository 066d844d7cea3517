use std::collections::HashSet;

/// Estimate how much page text changed between two crawls, as a 0-100 percentage.
///
/// Words are compared by set membership, not position: a word counts as added only if it
/// appears nowhere in the old text, and as removed only if it appears nowhere in the new
/// text. Reordered text with the same vocabulary therefore scores as unchanged.
pub fn estimate_change(old_text: Option<&str>, new_text: Option<&str>) -> u8 {
    let old_text = old_text.unwrap_or_default();
    let new_text = new_text.unwrap_or_default();

    match (old_text.is_empty(), new_text.is_empty()) {
        (true, true) => return 0,
        (true, false) | (false, true) => return 100,
        (false, false) => {}
    }

    let old_words: Vec<&str> = old_text.split_whitespace().collect();
    let new_words: Vec<&str> = new_text.split_whitespace().collect();
    let old_set: HashSet<&str> = old_words.iter().copied().collect();
    let new_set: HashSet<&str> = new_words.iter().copied().collect();

    let added = new_words.iter().filter(|w| !old_set.contains(*w)).count();
    let removed = old_words.iter().filter(|w| !new_set.contains(*w)).count();
    let total_changes = added + removed;
    let total_words = old_words.len().max(new_words.len()).max(1);

    let pct = (100.0 * total_changes as f64 / total_words as f64).round();
    pct.clamp(0.0, 100.0) as u8
}
