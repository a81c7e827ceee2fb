//! Knowledge Store - the single owner of every knowledge entry
//!
//! Entries live in an in-memory map behind an async RwLock. Writers hold the
//! write lock for their whole read-modify-write, so two mutations of the same
//! key never interleave. Readers share the read lock and always observe whole
//! entries. Durability comes from snapshotting the map to a
//! [`PersistenceMedium`].

use chrono::Utc;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::normalize::normalize;
use super::similarity::similarity;
use super::{clamp_confidence, KnowledgeEntry, Provenance};
use crate::error::{KnowledgeError, KnowledgeResult};
use crate::storage::PersistenceMedium;

/// What `update_entry` should do with the entry after the closure ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryFate {
    Keep,
    Remove,
}

/// Result of an atomic entry mutation
#[derive(Debug, Clone)]
pub enum Mutation {
    /// Entry as stored after the update
    Updated(KnowledgeEntry),
    /// Entry as it was when removed
    Removed(KnowledgeEntry),
}

/// Aggregate view of the store
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreSummary {
    pub total: usize,
    pub seed: usize,
    pub acquired: usize,
    pub feedback_corrected: usize,
    pub mean_confidence: f64,
    pub total_hits: u64,
    pub positive_feedback: u64,
    pub negative_feedback: u64,
}

/// Shared handle to the knowledge store. Clones share the same entries.
#[derive(Clone, Default)]
pub struct KnowledgeStore {
    entries: Arc<RwLock<HashMap<String, KnowledgeEntry>>>,
    /// Bumped on every mutation
    generation: Arc<AtomicU64>,
    /// Generation captured by the last successful save or load
    saved_generation: Arc<AtomicU64>,
    /// Held for a whole save so snapshots reach the medium in order
    save_lock: Arc<Mutex<()>>,
}

impl KnowledgeStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Exact lookup by normalized key
    pub async fn get(&self, key: &str) -> Option<KnowledgeEntry> {
        self.entries.read().await.get(key).cloned()
    }

    /// Up to `limit` entries ranked by similarity to `key`.
    ///
    /// Ties on similarity prefer higher confidence, then the most recently
    /// used entry, then the smaller key so the order is total.
    pub async fn find_candidates(&self, key: &str, limit: usize) -> Vec<(KnowledgeEntry, f64)> {
        if limit == 0 {
            return Vec::new();
        }

        let entries = self.entries.read().await;
        let mut scored: Vec<(&KnowledgeEntry, f64)> = entries
            .values()
            .map(|entry| (entry, similarity(key, &entry.key)))
            .collect();
        scored.sort_by(|a, b| rank(a, b));
        scored.truncate(limit);

        scored.into_iter().map(|(entry, score)| (entry.clone(), score)).collect()
    }

    /// Insert or overwrite by key
    pub async fn put(&self, mut entry: KnowledgeEntry) -> KnowledgeResult<()> {
        validate(&mut entry)?;

        let mut entries = self.entries.write().await;
        debug!("Storing knowledge '{}' ({}, confidence {:.2})", entry.key, entry.provenance, entry.confidence);
        entries.insert(entry.key.clone(), entry);
        self.touch();
        Ok(())
    }

    /// Insert unless the key is already stored. Returns the stored entry.
    pub async fn put_if_absent(&self, mut entry: KnowledgeEntry) -> KnowledgeResult<KnowledgeEntry> {
        validate(&mut entry)?;

        let mut entries = self.entries.write().await;
        if let Some(existing) = entries.get(&entry.key) {
            debug!("Knowledge '{}' already stored, keeping it", entry.key);
            return Ok(existing.clone());
        }
        entries.insert(entry.key.clone(), entry.clone());
        self.touch();
        Ok(entry)
    }

    /// Adjust confidence by `delta`, clamped to [0, 1].
    ///
    /// A positive delta counts as positive feedback and resets the negative
    /// streak; a negative delta counts as negative feedback and extends it.
    pub async fn update_confidence(&self, key: &str, delta: f64) -> KnowledgeResult<KnowledgeEntry> {
        let mutation = self
            .update_entry(key, |entry| {
                entry.confidence = clamp_confidence(entry.confidence + delta);
                if delta > 0.0 {
                    entry.positive_feedback += 1;
                    entry.negative_streak = 0;
                } else if delta < 0.0 {
                    entry.negative_feedback += 1;
                    entry.negative_streak = entry.negative_streak.saturating_add(1);
                }
                EntryFate::Keep
            })
            .await?;

        match mutation {
            Mutation::Updated(entry) | Mutation::Removed(entry) => Ok(entry),
        }
    }

    /// Run `f` on the entry under the write lock, then keep or remove it.
    ///
    /// The key and the confidence bounds are restored after `f` runs, so a
    /// closure cannot break the store's invariants.
    pub async fn update_entry<F>(&self, key: &str, f: F) -> KnowledgeResult<Mutation>
    where
        F: FnOnce(&mut KnowledgeEntry) -> EntryFate,
    {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(key)
            .ok_or_else(|| KnowledgeError::NotFound(format!("no knowledge for '{}'", key)))?;

        let fate = f(entry);
        entry.key = key.to_string();
        entry.confidence = clamp_confidence(entry.confidence);
        let snapshot = entry.clone();

        if fate == EntryFate::Remove {
            entries.remove(key);
        }
        self.touch();

        Ok(match fate {
            EntryFate::Keep => Mutation::Updated(snapshot),
            EntryFate::Remove => Mutation::Removed(snapshot),
        })
    }

    /// Count a retrieval hit and refresh the last-used timestamp
    pub async fn record_hit(&self, key: &str) -> KnowledgeResult<KnowledgeEntry> {
        let mutation = self
            .update_entry(key, |entry| {
                entry.hit_count += 1;
                entry.last_used_at = Utc::now();
                EntryFate::Keep
            })
            .await?;

        match mutation {
            Mutation::Updated(entry) | Mutation::Removed(entry) => Ok(entry),
        }
    }

    /// Remove an entry. Returns whether it existed.
    pub async fn delete(&self, key: &str) -> bool {
        let removed = self.entries.write().await.remove(key).is_some();
        if removed {
            self.touch();
            debug!("Deleted knowledge '{}'", key);
        }
        removed
    }

    /// Every entry, ordered by key
    pub async fn all(&self) -> Vec<KnowledgeEntry> {
        let mut all: Vec<KnowledgeEntry> = self.entries.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        all
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Counts per provenance, mean confidence and feedback totals
    pub async fn summary(&self) -> StoreSummary {
        let entries = self.entries.read().await;
        let mut summary = StoreSummary {
            total: entries.len(),
            ..Default::default()
        };

        let mut confidence_sum = 0.0;
        for entry in entries.values() {
            match entry.provenance {
                Provenance::Seed => summary.seed += 1,
                Provenance::Acquired => summary.acquired += 1,
                Provenance::FeedbackCorrected => summary.feedback_corrected += 1,
            }
            confidence_sum += entry.confidence;
            summary.total_hits += entry.hit_count;
            summary.positive_feedback += entry.positive_feedback;
            summary.negative_feedback += entry.negative_feedback;
        }
        if summary.total > 0 {
            summary.mean_confidence = confidence_sum / summary.total as f64;
        }
        summary
    }

    /// Whether the store changed since the last save or load
    pub fn is_dirty(&self) -> bool {
        self.generation.load(AtomicOrdering::SeqCst) != self.saved_generation.load(AtomicOrdering::SeqCst)
    }

    /// Replace the contents with everything in `medium`.
    ///
    /// The new map is built aside and swapped in only when every entry is
    /// valid. On any failure the store is left empty and the error returned.
    pub async fn load_from(&self, medium: &dyn PersistenceMedium) -> KnowledgeResult<usize> {
        let loaded = medium.load_all().await.and_then(build_map);

        let mut entries = self.entries.write().await;
        match loaded {
            Ok(map) => {
                let count = map.len();
                *entries = map;
                let generation = self.generation.fetch_add(1, AtomicOrdering::SeqCst) + 1;
                self.saved_generation.store(generation, AtomicOrdering::SeqCst);
                info!("Loaded {} knowledge entries", count);
                Ok(count)
            }
            Err(e) => {
                entries.clear();
                self.touch();
                warn!("Failed to load knowledge, starting with an empty store: {}", e);
                Err(e)
            }
        }
    }

    /// Snapshot the store into `medium`. Memory is untouched on failure.
    ///
    /// Saves never overlap: a save that starts later also writes later, so
    /// the newest snapshot is the one left on the medium.
    pub async fn save_to(&self, medium: &dyn PersistenceMedium) -> KnowledgeResult<usize> {
        let _saving = self.save_lock.lock().await;
        let (snapshot, generation) = {
            let entries = self.entries.read().await;
            let mut snapshot: Vec<KnowledgeEntry> = entries.values().cloned().collect();
            snapshot.sort_by(|a, b| a.key.cmp(&b.key));
            (snapshot, self.generation.load(AtomicOrdering::SeqCst))
        };

        medium.save_all(&snapshot).await.map_err(|e| {
            error!("Failed to save knowledge: {}", e);
            e
        })?;
        self.saved_generation.store(generation, AtomicOrdering::SeqCst);
        debug!("Saved {} knowledge entries", snapshot.len());
        Ok(snapshot.len())
    }

    /// Save to `medium` every `interval` while the store is dirty
    pub fn spawn_checkpoint(&self, medium: Arc<dyn PersistenceMedium>, interval: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if store.is_dirty() {
                    if let Err(e) = store.save_to(medium.as_ref()).await {
                        warn!("Knowledge checkpoint failed: {}", e);
                    }
                }
            }
        })
    }

    fn touch(&self) {
        self.generation.fetch_add(1, AtomicOrdering::SeqCst);
    }
}

/// Whether `key` is already in normalized form
fn is_normalized(key: &str) -> bool {
    normalize(key) == key
}

/// Reject empty or unnormalized keys and empty answers, clamp confidence
fn validate(entry: &mut KnowledgeEntry) -> KnowledgeResult<()> {
    if entry.key.trim().is_empty() {
        return Err(KnowledgeError::Validation("knowledge key is empty".to_string()));
    }
    if !is_normalized(&entry.key) {
        return Err(KnowledgeError::Validation(format!(
            "knowledge key '{}' is not normalized (expected '{}')",
            entry.key,
            normalize(&entry.key)
        )));
    }
    if entry.answer.trim().is_empty() {
        return Err(KnowledgeError::Validation(format!("answer for '{}' is empty", entry.key)));
    }
    entry.confidence = clamp_confidence(entry.confidence);
    Ok(())
}

/// Ranking order for fuzzy candidates, best first
fn rank(a: &(&KnowledgeEntry, f64), b: &(&KnowledgeEntry, f64)) -> Ordering {
    b.1.partial_cmp(&a.1)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.0.confidence.partial_cmp(&a.0.confidence).unwrap_or(Ordering::Equal))
        .then_with(|| b.0.last_used_at.cmp(&a.0.last_used_at))
        .then_with(|| a.0.key.cmp(&b.0.key))
}

fn build_map(entries: Vec<KnowledgeEntry>) -> KnowledgeResult<HashMap<String, KnowledgeEntry>> {
    let mut map = HashMap::with_capacity(entries.len());
    for entry in entries {
        if entry.key.trim().is_empty() || entry.answer.trim().is_empty() {
            return Err(KnowledgeError::Persistence(format!(
                "stored entry '{}' has an empty key or answer",
                entry.key
            )));
        }
        if !is_normalized(&entry.key) {
            return Err(KnowledgeError::Persistence(format!(
                "stored entry '{}' has an unnormalized key",
                entry.key
            )));
        }
        if !(0.0..=1.0).contains(&entry.confidence) {
            return Err(KnowledgeError::Persistence(format!(
                "stored entry '{}' has confidence {} outside [0, 1]",
                entry.key, entry.confidence
            )));
        }
        if map.contains_key(&entry.key) {
            return Err(KnowledgeError::Persistence(format!("duplicate stored key '{}'", entry.key)));
        }
        map.insert(entry.key.clone(), entry);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqlitePersistence;
    use async_trait::async_trait;

    fn entry(key: &str, answer: &str, confidence: f64) -> KnowledgeEntry {
        KnowledgeEntry::new(key, key, answer, confidence, Provenance::Acquired)
    }

    struct BrokenMedium;

    #[async_trait]
    impl PersistenceMedium for BrokenMedium {
        async fn load_all(&self) -> KnowledgeResult<Vec<KnowledgeEntry>> {
            Err(KnowledgeError::Persistence("truncated file".to_string()))
        }

        async fn save_all(&self, _entries: &[KnowledgeEntry]) -> KnowledgeResult<()> {
            Err(KnowledgeError::Persistence("disk full".to_string()))
        }
    }

    struct FixedMedium(Vec<KnowledgeEntry>);

    #[async_trait]
    impl PersistenceMedium for FixedMedium {
        async fn load_all(&self) -> KnowledgeResult<Vec<KnowledgeEntry>> {
            Ok(self.0.clone())
        }

        async fn save_all(&self, _entries: &[KnowledgeEntry]) -> KnowledgeResult<()> {
            Ok(())
        }
    }

    /// Records the size of each snapshot when its write completes.
    /// Single-entry snapshots take ten seconds to write.
    #[derive(Default)]
    struct SlowMedium(std::sync::Mutex<Vec<usize>>);

    #[async_trait]
    impl PersistenceMedium for SlowMedium {
        async fn load_all(&self) -> KnowledgeResult<Vec<KnowledgeEntry>> {
            Ok(Vec::new())
        }

        async fn save_all(&self, entries: &[KnowledgeEntry]) -> KnowledgeResult<()> {
            if entries.len() == 1 {
                tokio::time::sleep(Duration::from_secs(10)).await;
            }
            self.0.lock().unwrap().push(entries.len());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let store = KnowledgeStore::new();
        store.put(entry("qual a capital do brasil", "Brasília", 1.0)).await.unwrap();

        let found = store.get("qual a capital do brasil").await.unwrap();
        assert_eq!(found.answer, "Brasília");
        assert!(store.get("unknown").await.is_none());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_put_rejects_empty_answer() {
        let store = KnowledgeStore::new();
        let err = store.put(entry("key", "   ", 0.5)).await.unwrap_err();
        assert!(matches!(err, KnowledgeError::Validation(_)));
        let err = store.put(entry("", "answer", 0.5)).await.unwrap_err();
        assert!(matches!(err, KnowledgeError::Validation(_)));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_put_rejects_unnormalized_key() {
        let store = KnowledgeStore::new();
        let raw = KnowledgeEntry::new("Qual é a Capital?", "Qual é a Capital?", "Brasília", 1.0, Provenance::Seed);

        let err = store.put(raw.clone()).await.unwrap_err();
        assert!(matches!(err, KnowledgeError::Validation(_)));
        let err = store.put_if_absent(raw).await.unwrap_err();
        assert!(matches!(err, KnowledgeError::Validation(_)));

        store.put(KnowledgeEntry::seed("qual a capital", "Brasília")).await.unwrap();
        let keys: Vec<String> = store.all().await.into_iter().map(|e| e.key).collect();
        assert_eq!(keys, vec!["qual a capital".to_string()]);
    }

    #[tokio::test]
    async fn test_put_overwrites_and_clamps() {
        let store = KnowledgeStore::new();
        store.put(entry("k", "first", 0.5)).await.unwrap();
        let mut replacement = entry("k", "second", 0.5);
        replacement.confidence = 3.0;
        store.put(replacement).await.unwrap();

        let found = store.get("k").await.unwrap();
        assert_eq!(found.answer, "second");
        assert_eq!(found.confidence, 1.0);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_put_if_absent_keeps_existing() {
        let store = KnowledgeStore::new();
        let first = store.put_if_absent(entry("k", "first", 1.0)).await.unwrap();
        assert_eq!(first.answer, "first");

        let second = store.put_if_absent(entry("k", "second", 0.3)).await.unwrap();
        assert_eq!(second.answer, "first");
        assert_eq!(store.get("k").await.unwrap().confidence, 1.0);
    }

    #[tokio::test]
    async fn test_update_confidence_clamps_and_counts() {
        let store = KnowledgeStore::new();
        store.put(entry("k", "a", 0.95)).await.unwrap();

        let up = store.update_confidence("k", 0.1).await.unwrap();
        assert_eq!(up.confidence, 1.0);
        assert_eq!(up.positive_feedback, 1);

        let down = store.update_confidence("k", -5.0).await.unwrap();
        assert_eq!(down.confidence, 0.0);
        assert_eq!(down.negative_feedback, 1);
        assert_eq!(down.negative_streak, 1);

        let err = store.update_confidence("missing", 0.1).await.unwrap_err();
        assert!(matches!(err, KnowledgeError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_update_entry_can_remove() {
        let store = KnowledgeStore::new();
        store.put(entry("k", "a", 0.5)).await.unwrap();

        let mutation = store.update_entry("k", |_| EntryFate::Remove).await.unwrap();
        assert!(matches!(mutation, Mutation::Removed(ref e) if e.key == "k"));
        assert!(store.get("k").await.is_none());
    }

    #[tokio::test]
    async fn test_update_entry_cannot_break_invariants() {
        let store = KnowledgeStore::new();
        store.put(entry("k", "a", 0.5)).await.unwrap();

        store
            .update_entry("k", |e| {
                e.key = "other".to_string();
                e.confidence = -1.0;
                EntryFate::Keep
            })
            .await
            .unwrap();

        let found = store.get("k").await.unwrap();
        assert_eq!(found.key, "k");
        assert_eq!(found.confidence, 0.0);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = KnowledgeStore::new();
        store.put(entry("k", "a", 0.5)).await.unwrap();
        assert!(store.delete("k").await);
        assert!(!store.delete("k").await);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_find_candidates_ranking() {
        let store = KnowledgeStore::new();
        store.put(entry("qual a capital do brasil", "Brasília", 0.9)).await.unwrap();
        store.put(entry("qual a capital da franca", "Paris", 0.9)).await.unwrap();
        store.put(entry("quem descobriu a penicilina", "Fleming", 0.9)).await.unwrap();

        let candidates = store.find_candidates("qual a capital do brazil", 2).await;
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].0.key, "qual a capital do brasil");
        assert!(candidates[0].1 >= candidates[1].1);

        assert!(store.find_candidates("anything", 0).await.is_empty());
    }

    #[tokio::test]
    async fn test_find_candidates_tie_breaks_on_confidence_then_recency() {
        let store = KnowledgeStore::new();
        // Both differ from the query by one character at the same position
        store.put(entry("abcx", "low", 0.4)).await.unwrap();
        store.put(entry("abcy", "high", 0.8)).await.unwrap();

        let candidates = store.find_candidates("abcz", 2).await;
        assert_eq!(candidates[0].1, candidates[1].1);
        assert_eq!(candidates[0].0.answer, "high");

        store.put(entry("abcw", "recent", 0.8)).await.unwrap();
        store.record_hit("abcw").await.unwrap();
        let candidates = store.find_candidates("abcz", 3).await;
        assert_eq!(candidates[0].0.answer, "recent");
    }

    #[tokio::test]
    async fn test_record_hit() {
        let store = KnowledgeStore::new();
        store.put(entry("k", "a", 0.5)).await.unwrap();
        let before = store.get("k").await.unwrap().last_used_at;

        let hit = store.record_hit("k").await.unwrap();
        assert_eq!(hit.hit_count, 1);
        assert!(hit.last_used_at >= before);
        assert!(store.record_hit("missing").await.is_err());
    }

    #[tokio::test]
    async fn test_summary() {
        let store = KnowledgeStore::new();
        store.put(KnowledgeEntry::seed("seed question", "a")).await.unwrap();
        store.put(entry("acquired question", "b", 0.3)).await.unwrap();
        store.update_confidence("acquired question", -0.1).await.unwrap();

        let summary = store.summary().await;
        assert_eq!(summary.total, 2);
        assert_eq!(summary.seed, 1);
        assert_eq!(summary.acquired, 1);
        assert_eq!(summary.negative_feedback, 1);
        assert!((summary.mean_confidence - 0.6).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let db = SqlitePersistence::in_memory().unwrap();
        let store = KnowledgeStore::new();
        store.put(KnowledgeEntry::seed("Qual é a capital do Brasil?", "Brasília")).await.unwrap();
        assert!(store.is_dirty());

        assert_eq!(store.save_to(&db).await.unwrap(), 1);
        assert!(!store.is_dirty());

        let restored = KnowledgeStore::new();
        assert_eq!(restored.load_from(&db).await.unwrap(), 1);
        assert_eq!(restored.all().await, store.all().await);
        assert!(!restored.is_dirty());
    }

    #[tokio::test]
    async fn test_failed_load_leaves_store_empty() {
        let store = KnowledgeStore::new();
        store.put(entry("stale", "a", 0.5)).await.unwrap();

        let err = store.load_from(&BrokenMedium).await.unwrap_err();
        assert!(matches!(err, KnowledgeError::Persistence(_)));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_invalid_rows_reject_whole_load() {
        let mut bad = entry("bad", "a", 0.5);
        bad.confidence = 4.0;
        let medium = FixedMedium(vec![entry("good", "a", 0.5), bad]);

        let store = KnowledgeStore::new();
        assert!(store.load_from(&medium).await.is_err());
        assert!(store.is_empty().await);

        let medium = FixedMedium(vec![entry("dup", "a", 0.5), entry("dup", "b", 0.5)]);
        assert!(store.load_from(&medium).await.is_err());
        assert!(store.is_empty().await);

        let medium = FixedMedium(vec![entry("qual a capital", "a", 0.5), entry("Qual é a Capital?", "b", 0.5)]);
        let err = store.load_from(&medium).await.unwrap_err();
        assert!(matches!(err, KnowledgeError::Persistence(_)));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_failed_save_keeps_memory() {
        let store = KnowledgeStore::new();
        store.put(entry("k", "a", 0.5)).await.unwrap();

        assert!(store.save_to(&BrokenMedium).await.is_err());
        assert_eq!(store.len().await, 1);
        assert!(store.is_dirty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_saves_land_in_order() {
        let medium = Arc::new(SlowMedium::default());
        let store = KnowledgeStore::new();
        store.put(entry("a", "1", 0.5)).await.unwrap();

        let slow = {
            let store = store.clone();
            let medium = medium.clone();
            tokio::spawn(async move { store.save_to(medium.as_ref()).await })
        };
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }

        store.put(entry("b", "2", 0.5)).await.unwrap();
        assert_eq!(store.save_to(medium.as_ref()).await.unwrap(), 2);
        assert_eq!(slow.await.unwrap().unwrap(), 1);

        assert_eq!(*medium.0.lock().unwrap(), vec![1, 2]);
        assert!(!store.is_dirty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_checkpoint_saves_dirty_store() {
        let db = Arc::new(SqlitePersistence::in_memory().unwrap());
        let store = KnowledgeStore::new();
        store.put(entry("k", "a", 0.5)).await.unwrap();

        let handle = store.spawn_checkpoint(db.clone(), Duration::from_secs(60));
        tokio::time::sleep(Duration::from_secs(61)).await;
        for _ in 0..10 {
            if !store.is_dirty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        handle.abort();

        assert!(!store.is_dirty());
        assert_eq!(db.load_all().await.unwrap().len(), 1);
    }
}
