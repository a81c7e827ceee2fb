//! Feedback Engine - reinforcement, decay and forgetting
//!
//! Positive signals raise an entry's confidence, negative ones lower it by a
//! larger step. An entry whose confidence sits at zero after enough
//! consecutive negatives is removed from the store.

use tracing::{debug, info};

use super::store::{EntryFate, KnowledgeStore, Mutation};
use super::{clamp_confidence, FeedbackEvent, FeedbackSignal, KnowledgeEntry};
use crate::config::KnowledgeConfig;
use crate::error::KnowledgeResult;

/// What a feedback signal did to its entry
#[derive(Debug, Clone)]
pub enum FeedbackOutcome {
    /// Entry as stored after the adjustment
    Adjusted(KnowledgeEntry),
    /// Entry was removed; holds its final state
    Forgotten(KnowledgeEntry),
}

/// Applies feedback signals through the store
#[derive(Clone)]
pub struct FeedbackEngine {
    store: KnowledgeStore,
    step_positive: f64,
    step_negative: f64,
    deletion_threshold: u32,
}

impl FeedbackEngine {
    pub fn new(store: KnowledgeStore, config: &KnowledgeConfig) -> Self {
        Self {
            store,
            step_positive: config.feedback_step_positive.abs(),
            step_negative: config.feedback_step_negative.abs(),
            deletion_threshold: config.deletion_negative_threshold.max(1),
        }
    }

    /// Apply one signal to the entry stored under `key`.
    ///
    /// Fails with `NotFound` when there is no such entry. The whole update,
    /// including a possible removal, happens under one store write lock.
    pub async fn apply_feedback(&self, key: &str, signal: FeedbackSignal) -> KnowledgeResult<FeedbackOutcome> {
        let step_positive = self.step_positive;
        let step_negative = self.step_negative;
        let threshold = self.deletion_threshold;

        let mutation = self
            .store
            .update_entry(key, move |entry| {
                match signal {
                    FeedbackSignal::Positive => {
                        entry.positive_feedback += 1;
                        entry.negative_streak = 0;
                        entry.confidence = clamp_confidence(entry.confidence + step_positive);
                    }
                    FeedbackSignal::Negative => {
                        entry.negative_feedback += 1;
                        entry.negative_streak = entry.negative_streak.saturating_add(1);
                        entry.confidence = clamp_confidence(entry.confidence - step_negative);
                    }
                }

                if entry.confidence <= 0.0 && entry.negative_streak >= threshold {
                    EntryFate::Remove
                } else {
                    EntryFate::Keep
                }
            })
            .await?;

        Ok(match mutation {
            Mutation::Updated(entry) => {
                debug!(
                    "Feedback {:?} on '{}': confidence {:.2}, streak {}",
                    signal, entry.key, entry.confidence, entry.negative_streak
                );
                FeedbackOutcome::Adjusted(entry)
            }
            Mutation::Removed(entry) => {
                info!(
                    "Forgot '{}' after {} consecutive negative signals",
                    entry.key, entry.negative_streak
                );
                FeedbackOutcome::Forgotten(entry)
            }
        })
    }

    /// Apply a feedback event, consuming it
    pub async fn apply(&self, event: FeedbackEvent) -> KnowledgeResult<FeedbackOutcome> {
        self.apply_feedback(&event.target_key, event.signal).await
    }
}
