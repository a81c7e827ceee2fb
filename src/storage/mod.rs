//! Persistence boundaries for the knowledge core
//!
//! Provides:
//! - `PersistenceMedium`: whole-store load and save
//! - `InteractionLog`: append-only record of answered questions
//! - SQLite implementations of both

pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::KnowledgeResult;
use crate::knowledge::KnowledgeEntry;

pub use sqlite::SqlitePersistence;

/// Durable home of the knowledge store's contents
#[async_trait]
pub trait PersistenceMedium: Send + Sync {
    /// Read every stored entry. Fails rather than returning a partial set.
    async fn load_all(&self) -> KnowledgeResult<Vec<KnowledgeEntry>>;

    /// Replace the stored contents with `entries` as one unit
    async fn save_all(&self, entries: &[KnowledgeEntry]) -> KnowledgeResult<()>;
}

/// How a question interaction ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionOutcome {
    Retrieved,
    Acquired,
    Unanswerable,
}

impl std::fmt::Display for InteractionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InteractionOutcome::Retrieved => write!(f, "retrieved"),
            InteractionOutcome::Acquired => write!(f, "acquired"),
            InteractionOutcome::Unanswerable => write!(f, "unanswerable"),
        }
    }
}

/// One logged question and its answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub id: String,
    pub user_id: String,
    pub question: String,
    pub key: String,
    pub answer: Option<String>,
    pub outcome: InteractionOutcome,
    pub created_at: DateTime<Utc>,
}

impl InteractionRecord {
    pub fn new(
        user_id: impl Into<String>,
        question: impl Into<String>,
        key: impl Into<String>,
        answer: Option<String>,
        outcome: InteractionOutcome,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            question: question.into(),
            key: key.into(),
            answer,
            outcome,
            created_at: Utc::now(),
        }
    }
}

/// Append-only history of question interactions
#[async_trait]
pub trait InteractionLog: Send + Sync {
    async fn record(&self, record: &InteractionRecord) -> KnowledgeResult<()>;

    /// Most recent interactions first
    async fn recent(&self, limit: usize) -> KnowledgeResult<Vec<InteractionRecord>>;
}
