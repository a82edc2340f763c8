//! Name similarity scoring for catalog lookup

use strsim::normalized_levenshtein;

/// Lowercase and collapse runs of whitespace into a single space.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Similarity between two product names on a 0-100 scale.
///
/// Compares the normalized names and also the names with punctuation stripped
/// (labels often drop apostrophes and commas: "lays" vs "Lay's"), keeping the
/// better score. Not symmetric-by-contract, but always deterministic.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a = normalize_name(a);
    let b = normalize_name(b);

    if a.is_empty() && b.is_empty() {
        return 100.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let base = normalized_levenshtein(&a, &b);

    let a_stripped: String = a.chars().filter(|c| c.is_alphanumeric()).collect();
    let b_stripped: String = b.chars().filter(|c| c.is_alphanumeric()).collect();
    let stripped = if !a_stripped.is_empty() && !b_stripped.is_empty() {
        normalized_levenshtein(&a_stripped, &b_stripped)
    } else {
        0.0
    };

    base.max(stripped) * 100.0
}
