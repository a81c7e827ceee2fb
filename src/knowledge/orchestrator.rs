//! Core orchestrator - one entry point per question and per feedback signal
//!
//! A question is normalized, answered from the store when possible, and
//! otherwise handed to the acquisition pipeline. Nothing here fails the
//! caller: every error becomes a `Rejected`, `Unanswerable` or `NotFound`
//! reply.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::acquisition::{AcquisitionPipeline, AcquisitionResult};
use super::feedback::{FeedbackEngine, FeedbackOutcome};
use super::normalize::normalize;
use super::retrieval::{RetrievalEngine, RetrievalResult};
use super::store::{EntryFate, KnowledgeStore, Mutation, StoreSummary};
use super::{FeedbackSignal, KnowledgeEntry, Provenance};
use crate::config::KnowledgeConfig;
use crate::error::{KnowledgeError, KnowledgeResult};
use crate::storage::{InteractionLog, InteractionOutcome, InteractionRecord};

/// Where an answer came from
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnswerOrigin {
    Retrieved { score: f64, exact: bool },
    Acquired,
}

/// Reply to a question
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Answer {
    Answered {
        /// Key feedback on this answer should target
        key: String,
        text: String,
        confidence: f64,
        origin: AnswerOrigin,
    },
    /// Question normalized to nothing
    Rejected,
    /// No stored answer and acquisition failed
    Unanswerable { reason: String },
}

impl Answer {
    pub fn key(&self) -> Option<&str> {
        match self {
            Answer::Answered { key, .. } => Some(key),
            _ => None,
        }
    }
}

/// Reply to a feedback signal
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FeedbackReply {
    Adjusted { entry: KnowledgeEntry },
    Forgotten { key: String },
    /// Target key no longer exists; nothing changed
    NotFound { key: String },
}

/// Session counters plus the store summary
#[derive(Debug, Clone, Default, Serialize)]
pub struct CoreStats {
    pub interactions: u64,
    pub answered_from_store: u64,
    pub acquired: u64,
    pub unanswerable: u64,
    pub rejected: u64,
    pub positive_feedback: u64,
    pub negative_feedback: u64,
    pub forgotten: u64,
    pub store: StoreSummary,
}

#[derive(Default)]
struct SessionCounters {
    interactions: AtomicU64,
    answered_from_store: AtomicU64,
    acquired: AtomicU64,
    unanswerable: AtomicU64,
    rejected: AtomicU64,
    positive_feedback: AtomicU64,
    negative_feedback: AtomicU64,
    forgotten: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Knowledge core wired around one shared store
pub struct KnowledgeCore {
    store: KnowledgeStore,
    retrieval: RetrievalEngine,
    acquisition: Option<AcquisitionPipeline>,
    feedback: FeedbackEngine,
    interactions: Option<Arc<dyn InteractionLog>>,
    seed_confidence: f64,
    counters: SessionCounters,
}

impl KnowledgeCore {
    /// Core that answers only from `store`
    pub fn new(store: KnowledgeStore, config: &KnowledgeConfig) -> Self {
        Self {
            retrieval: RetrievalEngine::new(store.clone(), config),
            feedback: FeedbackEngine::new(store.clone(), config),
            store,
            acquisition: None,
            interactions: None,
            seed_confidence: config.seed_confidence,
            counters: SessionCounters::default(),
        }
    }

    /// Acquire unknown answers through `pipeline`
    pub fn with_acquisition(mut self, pipeline: AcquisitionPipeline) -> Self {
        self.acquisition = Some(pipeline);
        self
    }

    /// Record every answered or unanswerable question in `log`
    pub fn with_interaction_log(mut self, log: Arc<dyn InteractionLog>) -> Self {
        self.interactions = Some(log);
        self
    }

    pub fn store(&self) -> &KnowledgeStore {
        &self.store
    }

    /// Answer a question from `user_id`
    pub async fn ask(&self, user_id: &str, text: &str) -> Answer {
        bump(&self.counters.interactions);

        let key = normalize(text);
        if key.is_empty() {
            bump(&self.counters.rejected);
            debug!("Rejected empty question from {}", user_id);
            return Answer::Rejected;
        }

        if let RetrievalResult::Hit { entry, score, exact } = self.retrieval.retrieve_key(&key).await {
            bump(&self.counters.answered_from_store);
            self.log_interaction(user_id, text, &entry.key, Some(&entry.answer), InteractionOutcome::Retrieved)
                .await;
            return Answer::Answered {
                key: entry.key,
                text: entry.answer,
                confidence: entry.confidence,
                origin: AnswerOrigin::Retrieved { score, exact },
            };
        }

        let result = match &self.acquisition {
            Some(pipeline) => pipeline.acquire(text).await,
            None => AcquisitionResult::Failure(KnowledgeError::NotFound("no knowledge source configured".to_string())),
        };

        match result {
            AcquisitionResult::Success(entry) => {
                bump(&self.counters.acquired);
                self.log_interaction(user_id, text, &entry.key, Some(&entry.answer), InteractionOutcome::Acquired)
                    .await;
                Answer::Answered {
                    key: entry.key,
                    text: entry.answer,
                    confidence: entry.confidence,
                    origin: AnswerOrigin::Acquired,
                }
            }
            AcquisitionResult::Failure(e) => {
                bump(&self.counters.unanswerable);
                info!("Could not answer '{}': {}", key, e);
                self.log_interaction(user_id, text, &key, None, InteractionOutcome::Unanswerable)
                    .await;
                Answer::Unanswerable { reason: e.to_string() }
            }
        }
    }

    /// Key of the entry `question` would be answered from, exact or fuzzy.
    /// Falls back to the normalized question when nothing matches.
    pub async fn resolve(&self, question: &str) -> String {
        let key = normalize(question);
        match self.retrieval.resolve_key(&key).await {
            Some((matched, _, _)) => matched,
            None => key,
        }
    }

    /// Apply a feedback signal from `user_id` to the entry under `key`
    pub async fn feedback(&self, user_id: &str, key: &str, signal: FeedbackSignal) -> FeedbackReply {
        match self.feedback.apply_feedback(key, signal).await {
            Ok(outcome) => {
                match signal {
                    FeedbackSignal::Positive => bump(&self.counters.positive_feedback),
                    FeedbackSignal::Negative => bump(&self.counters.negative_feedback),
                }
                match outcome {
                    FeedbackOutcome::Adjusted(entry) => FeedbackReply::Adjusted { entry },
                    FeedbackOutcome::Forgotten(entry) => {
                        bump(&self.counters.forgotten);
                        FeedbackReply::Forgotten { key: entry.key }
                    }
                }
            }
            Err(e) => {
                debug!("Feedback from {} on '{}' ignored: {}", user_id, key, e);
                FeedbackReply::NotFound { key: key.to_string() }
            }
        }
    }

    /// Store a curated answer.
    ///
    /// A new question becomes a seed entry. Re-teaching a known question
    /// replaces its answer, restores full confidence and keeps its counters.
    pub async fn teach(&self, question: &str, answer: &str) -> KnowledgeResult<KnowledgeEntry> {
        let key = normalize(question);
        if key.is_empty() {
            return Err(KnowledgeError::Validation("question is empty".to_string()));
        }
        let answer = answer.trim();
        if answer.is_empty() {
            return Err(KnowledgeError::Validation("answer is empty".to_string()));
        }

        let confidence = self.seed_confidence;
        let corrected = self
            .store
            .update_entry(&key, |entry| {
                entry.answer = answer.to_string();
                entry.provenance = Provenance::FeedbackCorrected;
                entry.confidence = confidence;
                entry.negative_streak = 0;
                entry.source = None;
                EntryFate::Keep
            })
            .await;

        match corrected {
            Ok(Mutation::Updated(entry)) | Ok(Mutation::Removed(entry)) => {
                info!("Corrected knowledge for '{}'", entry.key);
                Ok(entry)
            }
            Err(KnowledgeError::NotFound(_)) => {
                let entry = KnowledgeEntry::new(key, question.trim(), answer, confidence, Provenance::Seed);
                self.store.put(entry.clone()).await?;
                info!("Learned '{}' from a curated answer", entry.key);
                Ok(entry)
            }
            Err(e) => Err(e),
        }
    }

    /// Remove the entry for `question`. Returns whether it existed.
    pub async fn forget(&self, question: &str) -> bool {
        let key = normalize(question);
        !key.is_empty() && self.store.delete(&key).await
    }

    pub async fn stats(&self) -> CoreStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        CoreStats {
            interactions: load(&self.counters.interactions),
            answered_from_store: load(&self.counters.answered_from_store),
            acquired: load(&self.counters.acquired),
            unanswerable: load(&self.counters.unanswerable),
            rejected: load(&self.counters.rejected),
            positive_feedback: load(&self.counters.positive_feedback),
            negative_feedback: load(&self.counters.negative_feedback),
            forgotten: load(&self.counters.forgotten),
            store: self.store.summary().await,
        }
    }

    async fn log_interaction(
        &self,
        user_id: &str,
        question: &str,
        key: &str,
        answer: Option<&str>,
        outcome: InteractionOutcome,
    ) {
        let Some(log) = &self.interactions else {
            return;
        };
        let record = InteractionRecord::new(user_id, question, key, answer.map(str::to_string), outcome);
        if let Err(e) = log.record(&record).await {
            warn!("Failed to record interaction: {}", e);
        }
    }
}
