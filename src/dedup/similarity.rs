use std::collections::BTreeSet;

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "how", "in", "is", "it", "its",
    "of", "on", "or", "that", "the", "this", "to", "vs", "was", "what", "why", "with", "you", "your",
    "show", "ask", "hn",
];

/// Lowercased alphanumeric tokens of a title, minus stop words and
/// single-character tokens.
pub fn title_tokens(title: &str) -> BTreeSet<String> {
    title
        .split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|t| t.chars().count() > 1 && !STOP_WORDS.contains(&t.as_str()))
        .collect()
}

/// Jaccard overlap of the two token sets, in `[0, 1]`. Titles with no
/// usable tokens are never similar.
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(b).count();
    let union = a.len() + b.len() - shared;
    shared as f64 / union as f64
}

pub fn title_similarity(a: &str, b: &str) -> f64 {
    jaccard(&title_tokens(a), &title_tokens(b))
}
