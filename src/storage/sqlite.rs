//! SQLite-based persistence for knowledge entries and the interaction log

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use super::{InteractionLog, InteractionOutcome, InteractionRecord, PersistenceMedium};
use crate::error::{KnowledgeError, KnowledgeResult};
use crate::knowledge::{KnowledgeEntry, Provenance};

/// SQLite-backed persistence medium
pub struct SqlitePersistence {
    conn: Arc<Mutex<Connection>>,
}

impl SqlitePersistence {
    /// Open (or create) the database at the given path
    pub async fn open<P: AsRef<Path>>(path: P) -> KnowledgeResult<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| KnowledgeError::Persistence(format!("create {}: {}", parent.display(), e)))?;
        }

        let conn = Connection::open(&path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::init_schema(&conn)?;

        debug!("Opened knowledge database at {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Database that lives only as long as this value
    pub fn in_memory() -> KnowledgeResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> KnowledgeResult<()> {
        conn.execute_batch(r#"
            CREATE TABLE IF NOT EXISTS knowledge (
                key TEXT PRIMARY KEY,
                question TEXT NOT NULL,
                answer TEXT NOT NULL,
                confidence REAL NOT NULL,
                hit_count INTEGER NOT NULL DEFAULT 0,
                positive_feedback INTEGER NOT NULL DEFAULT 0,
                negative_feedback INTEGER NOT NULL DEFAULT 0,
                negative_streak INTEGER NOT NULL DEFAULT 0,
                provenance TEXT NOT NULL,
                source TEXT,
                created_at TEXT NOT NULL,
                last_used_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS interactions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                question TEXT NOT NULL,
                key TEXT NOT NULL,
                answer TEXT,
                outcome TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_interactions_created ON interactions(created_at DESC);
        "#)?;
        Ok(())
    }

    fn read_entries(conn: &Connection) -> KnowledgeResult<Vec<KnowledgeEntry>> {
        let mut stmt = conn.prepare_cached(
            "SELECT key, question, answer, confidence, hit_count, positive_feedback,
                    negative_feedback, negative_streak, provenance, source, created_at, last_used_at
             FROM knowledge ORDER BY key",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok(RawEntry {
                    key: row.get(0)?,
                    question: row.get(1)?,
                    answer: row.get(2)?,
                    confidence: row.get(3)?,
                    hit_count: row.get(4)?,
                    positive_feedback: row.get(5)?,
                    negative_feedback: row.get(6)?,
                    negative_streak: row.get(7)?,
                    provenance: row.get(8)?,
                    source: row.get(9)?,
                    created_at: row.get(10)?,
                    last_used_at: row.get(11)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(RawEntry::decode).collect()
    }

    fn write_entries(conn: &mut Connection, entries: &[KnowledgeEntry]) -> KnowledgeResult<()> {
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM knowledge", [])?;
        {
            let mut stmt = tx.prepare_cached(
                r#"INSERT INTO knowledge
                   (key, question, answer, confidence, hit_count, positive_feedback,
                    negative_feedback, negative_streak, provenance, source, created_at, last_used_at)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"#,
            )?;
            for entry in entries {
                stmt.execute(params![
                    entry.key,
                    entry.question,
                    entry.answer,
                    entry.confidence,
                    entry.hit_count as i64,
                    entry.positive_feedback as i64,
                    entry.negative_feedback as i64,
                    entry.negative_streak as i64,
                    entry.provenance.to_string(),
                    entry.source,
                    entry.created_at.to_rfc3339(),
                    entry.last_used_at.to_rfc3339(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

/// Row as stored, before validation
struct RawEntry {
    key: String,
    question: String,
    answer: String,
    confidence: f64,
    hit_count: i64,
    positive_feedback: i64,
    negative_feedback: i64,
    negative_streak: i64,
    provenance: String,
    source: Option<String>,
    created_at: String,
    last_used_at: String,
}

impl RawEntry {
    fn decode(self) -> KnowledgeResult<KnowledgeEntry> {
        let provenance: Provenance = self
            .provenance
            .parse()
            .map_err(|e: String| KnowledgeError::Persistence(format!("entry '{}': {}", self.key, e)))?;

        let counter = |name: &str, value: i64| -> KnowledgeResult<u64> {
            u64::try_from(value).map_err(|_| {
                KnowledgeError::Persistence(format!("entry '{}': negative {} ({})", self.key, name, value))
            })
        };

        Ok(KnowledgeEntry {
            hit_count: counter("hit_count", self.hit_count)?,
            positive_feedback: counter("positive_feedback", self.positive_feedback)?,
            negative_feedback: counter("negative_feedback", self.negative_feedback)?,
            negative_streak: counter("negative_streak", self.negative_streak)? as u32,
            created_at: parse_timestamp(&self.key, &self.created_at)?,
            last_used_at: parse_timestamp(&self.key, &self.last_used_at)?,
            key: self.key,
            question: self.question,
            answer: self.answer,
            confidence: self.confidence,
            provenance,
            source: self.source,
        })
    }
}

fn parse_timestamp(key: &str, value: &str) -> KnowledgeResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| KnowledgeError::Persistence(format!("entry '{}': bad timestamp '{}': {}", key, value, e)))
}

#[async_trait]
impl PersistenceMedium for SqlitePersistence {
    async fn load_all(&self) -> KnowledgeResult<Vec<KnowledgeEntry>> {
        let conn = self.conn.lock().await;
        Self::read_entries(&conn)
    }

    async fn save_all(&self, entries: &[KnowledgeEntry]) -> KnowledgeResult<()> {
        let mut conn = self.conn.lock().await;
        Self::write_entries(&mut conn, entries)?;
        debug!("Saved {} knowledge entries", entries.len());
        Ok(())
    }
}

#[async_trait]
impl InteractionLog for SqlitePersistence {
    async fn record(&self, record: &InteractionRecord) -> KnowledgeResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT INTO interactions (id, user_id, question, key, answer, outcome, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
            params![
                record.id,
                record.user_id,
                record.question,
                record.key,
                record.answer,
                record.outcome.to_string(),
                record.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn recent(&self, limit: usize) -> KnowledgeResult<Vec<InteractionRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, user_id, question, key, answer, outcome, created_at
             FROM interactions ORDER BY created_at DESC LIMIT ?1",
        )?;

        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, user_id, question, key, answer, outcome, created_at)| {
                let outcome = match outcome.as_str() {
                    "retrieved" => InteractionOutcome::Retrieved,
                    "acquired" => InteractionOutcome::Acquired,
                    "unanswerable" => InteractionOutcome::Unanswerable,
                    other => {
                        return Err(KnowledgeError::Persistence(format!("unknown outcome '{}'", other)))
                    }
                };
                Ok(InteractionRecord {
                    created_at: parse_timestamp(&key, &created_at)?,
                    id,
                    user_id,
                    question,
                    key,
                    answer,
                    outcome,
                })
            })
            .collect()
    }
}
