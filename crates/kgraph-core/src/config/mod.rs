//! Configuration for clustering runs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{KgError, KgResult};

/// Tunables for candidate retrieval, reranking and batch orchestration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KgConfig {
    /// Maximum candidates returned by trigram retrieval (default: 20)
    pub retrieve_limit: usize,
    /// Minimum trigram overlap for a candidate to be retrieved (default: 0.3)
    pub retrieve_threshold: f64,
    /// Unigram, bigram and trigram weights for the rerank score; must sum to 1
    pub ngram_weights: [f64; 3],
    /// Weight of edit similarity in the combined score (default: 0.2)
    pub levenshtein_weight: f64,
    /// Minimum combined score for a merge (default: 0.75)
    pub rerank_threshold: f64,
    /// Staged entities per batch (default: 64)
    pub batch_size: usize,
    /// Staged relationships per batch (default: 128)
    pub relationship_batch_size: usize,
    /// Passes of the parent-chain climb (default: 2)
    pub max_parent_recursion_depth: usize,
    /// Concurrent parent-child and index-sync tasks (default: 4)
    pub worker_concurrency: usize,
    /// Lifetime requested on each lock renewal, in seconds (default: 300)
    pub lock_timeout_secs: u64,
    /// How long a renewal may take before the run aborts, in seconds (default: 10)
    pub lock_renew_deadline_secs: u64,
}

impl Default for KgConfig {
    fn default() -> Self {
        Self {
            retrieve_limit: 20,
            retrieve_threshold: 0.3,
            ngram_weights: [0.1, 0.4, 0.5],
            levenshtein_weight: 0.2,
            rerank_threshold: 0.75,
            batch_size: 64,
            relationship_batch_size: 128,
            max_parent_recursion_depth: 2,
            worker_concurrency: 4,
            lock_timeout_secs: 300,
            lock_renew_deadline_secs: 10,
        }
    }
}

impl KgConfig {
    /// Load configuration from `KG_*` environment variables over the defaults.
    ///
    /// Unparseable values keep the default.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(v) = env_parse("KG_RETRIEVE_LIMIT") {
            config.retrieve_limit = v;
        }
        if let Some(v) = env_parse("KG_RETRIEVE_THRESHOLD") {
            config.retrieve_threshold = v;
        }
        if let Ok(raw) = std::env::var("KG_NGRAM_WEIGHTS") {
            let parsed: Vec<f64> = raw
                .split(',')
                .filter_map(|w| w.trim().parse().ok())
                .collect();
            if let [w1, w2, w3] = parsed.as_slice() {
                config.ngram_weights = [*w1, *w2, *w3];
            }
        }
        if let Some(v) = env_parse("KG_LEVENSHTEIN_WEIGHT") {
            config.levenshtein_weight = v;
        }
        if let Some(v) = env_parse("KG_RERANK_THRESHOLD") {
            config.rerank_threshold = v;
        }
        if let Some(v) = env_parse("KG_BATCH_SIZE") {
            config.batch_size = v;
        }
        if let Some(v) = env_parse("KG_RELATIONSHIP_BATCH_SIZE") {
            config.relationship_batch_size = v;
        }
        if let Some(v) = env_parse("KG_MAX_PARENT_RECURSION_DEPTH") {
            config.max_parent_recursion_depth = v;
        }
        if let Some(v) = env_parse("KG_WORKER_CONCURRENCY") {
            config.worker_concurrency = v;
        }
        if let Some(v) = env_parse("KG_LOCK_TIMEOUT_SECS") {
            config.lock_timeout_secs = v;
        }
        if let Some(v) = env_parse("KG_LOCK_RENEW_DEADLINE_SECS") {
            config.lock_renew_deadline_secs = v;
        }

        config
    }

    /// Load a `.env` file if present, then read the environment.
    pub fn from_dotenv() -> Self {
        if let Err(e) = dotenvy::dotenv() {
            tracing::debug!("No .env file loaded: {}", e);
        }
        Self::from_env()
    }

    pub fn with_retrieve_limit(mut self, limit: usize) -> Self {
        self.retrieve_limit = limit.max(1);
        self
    }

    pub fn with_retrieve_threshold(mut self, threshold: f64) -> Self {
        self.retrieve_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn with_ngram_weights(mut self, weights: [f64; 3]) -> Self {
        self.ngram_weights = weights;
        self
    }

    pub fn with_levenshtein_weight(mut self, weight: f64) -> Self {
        self.levenshtein_weight = weight.clamp(0.0, 1.0);
        self
    }

    pub fn with_rerank_threshold(mut self, threshold: f64) -> Self {
        self.rerank_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_relationship_batch_size(mut self, batch_size: usize) -> Self {
        self.relationship_batch_size = batch_size.max(1);
        self
    }

    pub fn with_max_parent_recursion_depth(mut self, depth: usize) -> Self {
        self.max_parent_recursion_depth = depth;
        self
    }

    pub fn with_worker_concurrency(mut self, workers: usize) -> Self {
        self.worker_concurrency = workers.max(1);
        self
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    pub fn lock_renew_deadline(&self) -> Duration {
        Duration::from_secs(self.lock_renew_deadline_secs)
    }

    /// Check the invariants the scoring code relies on.
    pub fn validate(&self) -> KgResult<()> {
        if self.ngram_weights.iter().any(|w| *w < 0.0) {
            return Err(KgError::Configuration(
                "ngram weights must be non-negative".to_string(),
            ));
        }
        let sum: f64 = self.ngram_weights.iter().sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(KgError::Configuration(format!(
                "ngram weights must sum to 1, got {}",
                sum
            )));
        }
        if !(0.0..=1.0).contains(&self.levenshtein_weight) {
            return Err(KgError::Configuration(
                "levenshtein weight must be within [0, 1]".to_string(),
            ));
        }
        if self.batch_size == 0 || self.relationship_batch_size == 0 {
            return Err(KgError::Configuration("batch sizes must be positive".to_string()));
        }
        if self.worker_concurrency == 0 {
            return Err(KgError::Configuration(
                "worker concurrency must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = KgConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_parent_recursion_depth, 2);
        assert!((config.rerank_threshold - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_builder_clamps() {
        let config = KgConfig::default()
            .with_rerank_threshold(1.5)
            .with_batch_size(0)
            .with_levenshtein_weight(-1.0);
        assert_eq!(config.rerank_threshold, 1.0);
        assert_eq!(config.batch_size, 1);
        assert_eq!(config.levenshtein_weight, 0.0);
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let config = KgConfig::default().with_ngram_weights([0.5, 0.5, 0.5]);
        assert!(matches!(config.validate(), Err(KgError::Configuration(_))));
    }

    #[test]
    fn test_from_env_overrides() {
        std::env::set_var("KG_MAX_PARENT_RECURSION_DEPTH", "5");
        std::env::set_var("KG_NGRAM_WEIGHTS", "0.2, 0.3, 0.5");
        std::env::set_var("KG_BATCH_SIZE", "not-a-number");
        let config = KgConfig::from_env();
        std::env::remove_var("KG_MAX_PARENT_RECURSION_DEPTH");
        std::env::remove_var("KG_NGRAM_WEIGHTS");
        std::env::remove_var("KG_BATCH_SIZE");

        assert_eq!(config.max_parent_recursion_depth, 5);
        assert_eq!(config.ngram_weights, [0.2, 0.3, 0.5]);
        assert_eq!(config.batch_size, 64);
    }
}
