//! Retrieval of stored knowledge for an incoming question

use tracing::debug;

use super::normalize::normalize;
use super::store::KnowledgeStore;
use super::KnowledgeEntry;
use crate::config::KnowledgeConfig;

/// Outcome of a retrieval attempt
#[derive(Debug, Clone)]
pub enum RetrievalResult {
    Hit {
        /// Entry after its hit was recorded
        entry: KnowledgeEntry,
        /// 1.0 for exact matches, the similarity otherwise
        score: f64,
        exact: bool,
    },
    Miss,
}

impl RetrievalResult {
    pub fn is_hit(&self) -> bool {
        matches!(self, RetrievalResult::Hit { .. })
    }
}

/// Exact-then-fuzzy matcher over the knowledge store
#[derive(Clone)]
pub struct RetrievalEngine {
    store: KnowledgeStore,
    acceptance_threshold: f64,
    min_confidence_floor: f64,
    candidate_limit: usize,
}

impl RetrievalEngine {
    pub fn new(store: KnowledgeStore, config: &KnowledgeConfig) -> Self {
        Self {
            store,
            acceptance_threshold: config.acceptance_threshold,
            min_confidence_floor: config.min_confidence_floor,
            candidate_limit: config.candidate_limit.max(1),
        }
    }

    /// Find the stored answer for a raw question
    pub async fn retrieve(&self, question: &str) -> RetrievalResult {
        self.retrieve_key(&normalize(question)).await
    }

    /// Find the stored answer for an already normalized key
    pub async fn retrieve_key(&self, key: &str) -> RetrievalResult {
        match self.resolve_key(key).await {
            Some((matched, score, exact)) => self.hit(&matched, score, exact).await,
            None => RetrievalResult::Miss,
        }
    }

    /// Key of the entry a question would be answered from, with its score
    /// and whether it matched exactly. Records no hit.
    pub async fn resolve_key(&self, key: &str) -> Option<(String, f64, bool)> {
        if key.is_empty() {
            return None;
        }

        if self.store.get(key).await.is_some() {
            return Some((key.to_string(), 1.0, true));
        }

        let candidates = self.store.find_candidates(key, self.candidate_limit).await;
        let Some((best, score)) = candidates.into_iter().next() else {
            debug!("No candidates for '{}'", key);
            return None;
        };

        if score >= self.acceptance_threshold && best.confidence >= self.min_confidence_floor {
            debug!("Fuzzy match '{}' -> '{}' ({:.2})", key, best.key, score);
            Some((best.key, score, false))
        } else {
            debug!(
                "Best candidate for '{}' rejected: '{}' score {:.2}, confidence {:.2}",
                key, best.key, score, best.confidence
            );
            None
        }
    }

    async fn hit(&self, key: &str, score: f64, exact: bool) -> RetrievalResult {
        // The entry may have been forgotten since it was matched
        match self.store.record_hit(key).await {
            Ok(entry) => RetrievalResult::Hit { entry, score, exact },
            Err(_) => RetrievalResult::Miss,
        }
    }
}
