// src/resolver/similarity.rs - Site-key construction and approximate matching

use once_cell::sync::Lazy;
use regex::Regex;
use strsim::normalized_levenshtein;

static WHITESPACE_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));

/// The grouping identity for a raw location: "facility, city, country" with
/// trimmed components.
pub fn build_site_key(facility: &str, city: &str, country: &str) -> String {
    format!("{}, {}, {}", facility, city, country)
}

/// Canonical comparison form of a site key: lower-cased, runs of whitespace
/// collapsed. Group keys keep their as-entered text; only the comparison uses
/// this form.
pub fn normalize_key(key: &str) -> String {
    WHITESPACE_RUNS
        .replace_all(key.trim(), " ")
        .to_lowercase()
}

/// Normalized edit-distance similarity between two already-normalized keys,
/// on the 0-100 scale the matching threshold is calibrated against.
pub fn similarity_ratio(a: &str, b: &str) -> f64 {
    normalized_levenshtein(a, b) * 100.0
}
