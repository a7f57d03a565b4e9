//! Entity-name cleaning and trigram extraction.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;

static EMAIL_DOMAIN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\S)@[a-z0-9-]+\.[a-z]{2,6}$").unwrap());

static NON_ALPHANUMERIC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

/// Clean an entity name for matching.
///
/// Casefolds, strips a trailing `@domain.tld` email suffix, then removes
/// everything that is not `[a-z0-9]`. Falls back to the casefolded name when
/// nothing survives.
pub fn clean_name(name: &str) -> String {
    let folded = name.to_lowercase();
    let without_email = EMAIL_DOMAIN.replace(&folded, "$1");
    let cleaned = NON_ALPHANUMERIC.replace_all(&without_email, "");
    if cleaned.is_empty() {
        folded
    } else {
        cleaned.into_owned()
    }
}

/// Whether a name contains a digit.
pub fn has_digit(name: &str) -> bool {
    name.chars().any(|c| c.is_numeric())
}

/// Word trigrams of a name, padded the way `pg_trgm` pads them
/// (two leading spaces, one trailing).
pub fn name_trigrams(name: &str) -> BTreeSet<String> {
    let folded = name.to_lowercase();
    let mut trigrams = BTreeSet::new();
    for word in folded.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
        let padded: Vec<char> = format!("  {} ", word).chars().collect();
        for window in padded.windows(3) {
            trigrams.insert(window.iter().collect());
        }
    }
    trigrams
}
