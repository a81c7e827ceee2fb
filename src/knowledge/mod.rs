//! Knowledge Learning & Retrieval Core
//!
//! Provides:
//! - Question normalization and lexical similarity
//! - A confidence-scored knowledge store with SQLite persistence
//! - Exact and fuzzy retrieval
//! - Acquisition of new knowledge from an external source on a miss
//! - Feedback-driven reinforcement, decay and forgetting
//! - The orchestrator that ties the above together per question and feedback

pub mod normalize;
pub mod similarity;
pub mod store;
pub mod retrieval;
pub mod acquisition;
pub mod feedback;
pub mod orchestrator;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use normalize::normalize;
pub use similarity::similarity;
pub use store::{KnowledgeStore, StoreSummary};
pub use retrieval::{RetrievalEngine, RetrievalResult};
pub use acquisition::{AcquisitionPipeline, AcquisitionResult, KnowledgeSource, LookupError, WikipediaSource};
pub use feedback::{FeedbackEngine, FeedbackOutcome};
pub use orchestrator::{Answer, AnswerOrigin, CoreStats, FeedbackReply, KnowledgeCore};

/// How an entry came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Curated knowledge, loaded or taught explicitly
    Seed,
    /// Fetched from the external knowledge source after a miss
    Acquired,
    /// Answer replaced by a later correction
    FeedbackCorrected,
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provenance::Seed => write!(f, "seed"),
            Provenance::Acquired => write!(f, "acquired"),
            Provenance::FeedbackCorrected => write!(f, "feedback_corrected"),
        }
    }
}

impl std::str::FromStr for Provenance {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "seed" => Ok(Provenance::Seed),
            "acquired" => Ok(Provenance::Acquired),
            "feedback_corrected" => Ok(Provenance::FeedbackCorrected),
            other => Err(format!("unknown provenance '{}'", other)),
        }
    }
}

/// A stored question/answer pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    /// Normalized question, unique within the store
    pub key: String,
    /// Question text as first asked or taught
    pub question: String,
    /// Stored response text
    pub answer: String,
    /// Belief that the answer is correct, always within [0, 1]
    pub confidence: f64,
    /// Times this entry was returned by retrieval
    pub hit_count: u64,
    pub positive_feedback: u64,
    pub negative_feedback: u64,
    /// Negative signals received since the last positive one
    #[serde(default)]
    pub negative_streak: u32,
    pub provenance: Provenance,
    /// Where acquired content came from
    #[serde(default)]
    pub source: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
}

impl KnowledgeEntry {
    /// Create an entry with zeroed counters
    pub fn new(
        key: impl Into<String>,
        question: impl Into<String>,
        answer: impl Into<String>,
        confidence: f64,
        provenance: Provenance,
    ) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            question: question.into(),
            answer: answer.into(),
            confidence: clamp_confidence(confidence),
            hit_count: 0,
            positive_feedback: 0,
            negative_feedback: 0,
            negative_streak: 0,
            provenance,
            source: None,
            created_at: now,
            last_used_at: now,
        }
    }

    /// Curated entry keyed by the normalized question
    pub fn seed(question: &str, answer: impl Into<String>) -> Self {
        Self::new(normalize(question), question, answer, 1.0, Provenance::Seed)
    }

    /// Attach the origin of acquired content
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Direction of a feedback signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackSignal {
    Positive,
    Negative,
}

impl std::str::FromStr for FeedbackSignal {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "positive" | "up" | "+" | "good" | "positivo" => Ok(FeedbackSignal::Positive),
            "negative" | "down" | "-" | "bad" | "negativo" => Ok(FeedbackSignal::Negative),
            other => Err(format!("unknown feedback signal '{}'", other)),
        }
    }
}

/// A feedback signal tied to a stored answer. Applied once, then dropped.
#[derive(Debug, Clone)]
pub struct FeedbackEvent {
    pub target_key: String,
    pub signal: FeedbackSignal,
    pub timestamp: DateTime<Utc>,
}

impl FeedbackEvent {
    pub fn new(target_key: impl Into<String>, signal: FeedbackSignal) -> Self {
        Self {
            target_key: target_key.into(),
            signal,
            timestamp: Utc::now(),
        }
    }
}

/// Clamp a confidence value into [0, 1]. NaN becomes 0.
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
