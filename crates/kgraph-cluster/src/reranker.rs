//! Picks the best candidate by combined string similarity.

use kgraph_core::text::{clean_name, has_digit};
use kgraph_core::KgConfig;
use kgraph_store::Candidate;

use crate::similarity::SimilarityScorer;

/// The winning candidate and its combined score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankedMatch<'a> {
    pub candidate: &'a Candidate,
    pub score: f64,
}

/// Scores retrieved candidates against a cleaned query name.
#[derive(Debug, Clone, Copy)]
pub struct SimilarityReranker {
    scorer: SimilarityScorer,
    threshold: f64,
}

impl SimilarityReranker {
    pub fn new(scorer: SimilarityScorer, threshold: f64) -> Self {
        Self { scorer, threshold }
    }

    pub fn from_config(config: &KgConfig) -> Self {
        Self::new(
            SimilarityScorer::new(config.ngram_weights, config.levenshtein_weight),
            config.rerank_threshold,
        )
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Highest-scoring candidate at or above the threshold.
    ///
    /// Names containing a digit never match, on either side, so `v1` and
    /// `v2` style variants stay apart. On equal scores the earlier candidate
    /// wins.
    pub fn best_match<'a>(&self, query: &str, candidates: &'a [Candidate]) -> Option<RankedMatch<'a>> {
        if has_digit(query) {
            return None;
        }

        let mut best: Option<RankedMatch<'a>> = None;
        for candidate in candidates {
            let cleaned = clean_name(&candidate.entity.name);
            if has_digit(&cleaned) {
                continue;
            }
            let score = self.scorer.score(query, &cleaned);
            if score < self.threshold {
                continue;
            }
            if best.map_or(true, |b| score > b.score) {
                best = Some(RankedMatch { candidate, score });
            }
        }
        best
    }
}
