//! Token-sort similarity

/// Default acceptance threshold
pub const DEFAULT_THRESHOLD: u8 = 90;

/// Similarity of `a` and `b` from 0 to 100, ignoring word order, case and
/// punctuation. Empty input scores 0.
pub fn token_sort_ratio(a: &str, b: &str) -> u8 {
    let (a, b) = (normalize(a), normalize(b));
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    (strsim::normalized_levenshtein(&a, &b) * 100.0).round() as u8
}

fn normalize(text: &str) -> String {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    let mut tokens: Vec<&str> = cleaned.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}
