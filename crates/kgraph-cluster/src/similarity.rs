//! String similarity used to rerank candidate entities.
//!
//! Two signals over cleaned names:
//! - character n-gram overlap (uni/bi/tri), each order scored as
//!   `|Q ∩ C| / min(|Q|, |C|)` and blended by configurable weights
//! - normalized Damerau-Levenshtein similarity

use std::collections::{HashMap, HashSet};

/// Character n-grams of a string as a set of windows.
fn ngrams(chars: &[char], n: usize) -> HashSet<&[char]> {
    chars.windows(n).collect()
}

fn overlap(a: &HashSet<&[char]>, b: &HashSet<&[char]>) -> f64 {
    let shared = a.intersection(b).count();
    shared as f64 / a.len().min(b.len()).max(1) as f64
}

/// Weighted uni/bi/tri-gram overlap in `[0, 1]`.
///
/// When either string is too short for an order, the score is renormalized
/// over the orders both strings can produce. Empty strings score 0.
pub fn ngram_score(query: &str, candidate: &str, weights: [f64; 3]) -> f64 {
    let q: Vec<char> = query.chars().collect();
    let c: Vec<char> = candidate.chars().collect();
    if q.is_empty() || c.is_empty() {
        return 0.0;
    }

    let mut weighted = 0.0;
    for (i, weight) in weights.iter().enumerate() {
        weighted += weight * overlap(&ngrams(&q, i + 1), &ngrams(&c, i + 1));
    }

    // highest order (0-based) both strings reach, capped at trigrams
    let orders_used = (q.len() - 1).min(c.len() - 1).min(2);
    let scale: f64 = weights[..=orders_used].iter().sum();
    if scale <= 0.0 {
        return 0.0;
    }
    weighted / scale
}

/// Unrestricted Damerau-Levenshtein distance (insertions, deletions,
/// substitutions and transpositions of adjacent characters, where
/// transposed characters may be edited further).
pub fn damerau_levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (m, n) = (a.len(), b.len());
    if m == 0 {
        return n;
    }
    if n == 0 {
        return m;
    }

    let max_dist = m + n;
    // d[i + 1][j + 1] is the distance between a[..i] and b[..j]; row and
    // column 0 hold the sentinel.
    let mut d = vec![vec![0usize; n + 2]; m + 2];
    d[0][0] = max_dist;
    for i in 0..=m {
        d[i + 1][0] = max_dist;
        d[i + 1][1] = i;
    }
    for j in 0..=n {
        d[0][j + 1] = max_dist;
        d[1][j + 1] = j;
    }

    // last row in which each character of `a` was seen
    let mut last_row: HashMap<char, usize> = HashMap::new();

    for i in 1..=m {
        let mut last_match_col = 0;
        for j in 1..=n {
            let i1 = last_row.get(&b[j - 1]).copied().unwrap_or(0);
            let j1 = last_match_col;
            let cost = if a[i - 1] == b[j - 1] {
                last_match_col = j;
                0
            } else {
                1
            };

            let substitution = d[i][j] + cost;
            let insertion = d[i + 1][j] + 1;
            let deletion = d[i][j + 1] + 1;
            let transposition = d[i1][j1] + (i - i1 - 1) + 1 + (j - j1 - 1);
            d[i + 1][j + 1] = substitution.min(insertion).min(deletion).min(transposition);
        }
        last_row.insert(a[i - 1], i);
    }

    d[m + 1][n + 1]
}

/// `1 - distance / max(len)`; two empty strings are identical.
pub fn edit_similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - damerau_levenshtein(a, b) as f64 / max_len as f64
}

/// Blend of n-gram overlap and edit similarity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityScorer {
    pub ngram_weights: [f64; 3],
    pub levenshtein_weight: f64,
}

impl SimilarityScorer {
    pub fn new(ngram_weights: [f64; 3], levenshtein_weight: f64) -> Self {
        Self {
            ngram_weights,
            levenshtein_weight: levenshtein_weight.clamp(0.0, 1.0),
        }
    }

    /// `(1 - w_lev) * ngram + w_lev * edit_similarity`.
    pub fn score(&self, query: &str, candidate: &str) -> f64 {
        let lev = self.levenshtein_weight;
        let ngram = if lev < 1.0 {
            ngram_score(query, candidate, self.ngram_weights)
        } else {
            0.0
        };
        (1.0 - lev) * ngram + lev * edit_similarity(query, candidate)
    }
}
