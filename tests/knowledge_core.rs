//! End-to-end behavior of the knowledge core: retrieval, acquisition,
//! feedback and persistence across restarts

use async_trait::async_trait;
use learnbot::config::{AcquisitionConfig, KnowledgeConfig};
use learnbot::knowledge::acquisition::SourceDocument;
use learnbot::knowledge::{AcquisitionPipeline, AnswerOrigin, KnowledgeSource, LookupError};
use learnbot::{
    Answer, FeedbackReply, FeedbackSignal, KnowledgeCore, KnowledgeEntry, KnowledgeError, KnowledgeStore,
    PersistenceMedium, Provenance, SqlitePersistence,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::tempdir;

/// Knowledge source answering from a fixed table
struct FakeSource {
    answers: HashMap<&'static str, &'static str>,
    lookups: Arc<AtomicUsize>,
}

impl FakeSource {
    fn new(answers: &[(&'static str, &'static str)]) -> (Self, Arc<AtomicUsize>) {
        let lookups = Arc::new(AtomicUsize::new(0));
        let source = Self {
            answers: answers.iter().copied().collect(),
            lookups: lookups.clone(),
        };
        (source, lookups)
    }
}

#[async_trait]
impl KnowledgeSource for FakeSource {
    async fn lookup(&self, question: &str) -> Result<SourceDocument, LookupError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let key = learnbot::normalize(question);
        match self.answers.get(key.as_str()) {
            Some(text) => Ok(SourceDocument::new(*text)),
            None if key.contains("offline") => Err(LookupError::Network("connection refused".to_string())),
            None => Err(LookupError::NotFound(key)),
        }
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

fn core_with(store: KnowledgeStore, source: FakeSource) -> KnowledgeCore {
    let config = KnowledgeConfig::default();
    let pipeline = AcquisitionPipeline::new(Box::new(source), store.clone(), &config, &AcquisitionConfig::default());
    KnowledgeCore::new(store, &config).with_acquisition(pipeline)
}

const PENICILLIN: &str = "Alexander Fleming descobriu a penicilina em 1928, no St. Mary's Hospital. Foi o primeiro antibiótico.";

#[tokio::test]
async fn brasilia_is_answered_from_seed_without_lookup() {
    let store = KnowledgeStore::new();
    store
        .put(KnowledgeEntry::new(
            "qual a capital do brasil",
            "Qual a capital do Brasil?",
            "Brasília",
            1.0,
            Provenance::Seed,
        ))
        .await
        .unwrap();
    let (source, lookups) = FakeSource::new(&[]);
    let core = core_with(store.clone(), source);

    match core.ask("ana", "Qual é a capital do Brasil?").await {
        Answer::Answered { text, origin, .. } => {
            assert_eq!(text, "Brasília");
            assert_eq!(origin, AnswerOrigin::Retrieved { score: 1.0, exact: true });
        }
        other => panic!("unexpected answer: {:?}", other),
    }
    assert_eq!(lookups.load(Ordering::SeqCst), 0);
    assert_eq!(store.get("qual a capital do brasil").await.unwrap().hit_count, 1);
}

#[tokio::test]
async fn penicillin_is_acquired_once_then_retrieved() {
    let store = KnowledgeStore::new();
    let (source, lookups) = FakeSource::new(&[("quem descobriu a penicilina", PENICILLIN)]);
    let core = core_with(store.clone(), source);

    match core.ask("ana", "Quem descobriu a penicilina?").await {
        Answer::Answered { key, text, confidence, origin } => {
            assert_eq!(key, "quem descobriu a penicilina");
            assert_eq!(text, "Alexander Fleming descobriu a penicilina em 1928, no St. Mary's Hospital.");
            assert_eq!(confidence, 0.3);
            assert_eq!(origin, AnswerOrigin::Acquired);
        }
        other => panic!("unexpected answer: {:?}", other),
    }

    let stored = store.get("quem descobriu a penicilina").await.unwrap();
    assert_eq!(stored.provenance, Provenance::Acquired);
    assert_eq!(stored.confidence, 0.3);

    match core.ask("bruno", "quem descobriu a penicilina").await {
        Answer::Answered { origin, .. } => {
            assert_eq!(origin, AnswerOrigin::Retrieved { score: 1.0, exact: true })
        }
        other => panic!("unexpected answer: {:?}", other),
    }
    assert_eq!(lookups.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn exact_match_wins_over_more_confident_fuzzy_candidate() {
    let store = KnowledgeStore::new();
    store
        .put(KnowledgeEntry::new("qual a capital do brasil", "q", "exact", 0.25, Provenance::Acquired))
        .await
        .unwrap();
    store
        .put(KnowledgeEntry::new("qual a capital do brasil hoje", "q", "fuzzy", 1.0, Provenance::Seed))
        .await
        .unwrap();
    let (source, _) = FakeSource::new(&[]);
    let core = core_with(store, source);

    match core.ask("ana", "qual a capital do brasil").await {
        Answer::Answered { text, .. } => assert_eq!(text, "exact"),
        other => panic!("unexpected answer: {:?}", other),
    }
}

#[tokio::test]
async fn three_negatives_forget_and_the_next_question_relearns() {
    let store = KnowledgeStore::new();
    let (source, lookups) = FakeSource::new(&[("quem descobriu a penicilina", PENICILLIN)]);
    let core = core_with(store.clone(), source);

    let key = core.ask("ana", "Quem descobriu a penicilina?").await.key().unwrap().to_string();

    let first = core.feedback("ana", &key, FeedbackSignal::Negative).await;
    assert!(matches!(first, FeedbackReply::Adjusted { ref entry } if (entry.confidence - 0.15).abs() < 1e-9));
    let second = core.feedback("ana", &key, FeedbackSignal::Negative).await;
    assert!(matches!(second, FeedbackReply::Adjusted { ref entry } if entry.confidence == 0.0));
    let third = core.feedback("ana", &key, FeedbackSignal::Negative).await;
    assert_eq!(third, FeedbackReply::Forgotten { key: key.clone() });
    assert!(store.get(&key).await.is_none());

    match core.ask("ana", "Quem descobriu a penicilina?").await {
        Answer::Answered { origin, confidence, .. } => {
            assert_eq!(origin, AnswerOrigin::Acquired);
            assert_eq!(confidence, 0.3);
        }
        other => panic!("unexpected answer: {:?}", other),
    }
    assert_eq!(lookups.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn feedback_on_missing_key_changes_nothing() {
    let store = KnowledgeStore::new();
    store.put(KnowledgeEntry::seed("Qual a capital do Brasil?", "Brasília")).await.unwrap();
    let (source, _) = FakeSource::new(&[]);
    let core = core_with(store.clone(), source);
    let before = store.all().await;

    let reply = core.feedback("ana", "quem pintou a mona lisa", FeedbackSignal::Negative).await;
    assert_eq!(reply, FeedbackReply::NotFound { key: "quem pintou a mona lisa".to_string() });
    assert_eq!(store.all().await, before);
}

#[tokio::test]
async fn failed_lookups_are_unanswerable_and_store_nothing() {
    let store = KnowledgeStore::new();
    let (source, _) = FakeSource::new(&[]);
    let core = core_with(store.clone(), source);

    assert!(matches!(core.ask("ana", "o que e um quasar").await, Answer::Unanswerable { .. }));
    assert!(matches!(core.ask("ana", "modo offline ativo").await, Answer::Unanswerable { .. }));
    assert_eq!(core.ask("ana", "  ¿?  ").await, Answer::Rejected);
    assert!(store.is_empty().await);

    let stats = core.stats().await;
    assert_eq!(stats.interactions, 3);
    assert_eq!(stats.unanswerable, 2);
    assert_eq!(stats.rejected, 1);
}

#[tokio::test]
async fn knowledge_survives_a_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("knowledge.db");

    {
        let db = SqlitePersistence::open(&path).await.unwrap();
        let store = KnowledgeStore::new();
        let (source, _) = FakeSource::new(&[("quem descobriu a penicilina", PENICILLIN)]);
        let core = core_with(store.clone(), source);

        core.teach("Qual a capital do Brasil?", "Brasília").await.unwrap();
        core.ask("ana", "Quem descobriu a penicilina?").await;
        core.feedback("ana", "quem descobriu a penicilina", FeedbackSignal::Positive).await;

        assert_eq!(store.save_to(&db).await.unwrap(), 2);
    }

    let db = SqlitePersistence::open(&path).await.unwrap();
    let store = KnowledgeStore::new();
    assert_eq!(store.load_from(&db).await.unwrap(), 2);

    let acquired = store.get("quem descobriu a penicilina").await.unwrap();
    assert!((acquired.confidence - 0.4).abs() < 1e-9);
    assert_eq!(acquired.positive_feedback, 1);
    assert_eq!(store.get("qual a capital do brasil").await.unwrap().provenance, Provenance::Seed);
}

#[tokio::test]
async fn corrupt_database_loads_as_empty_with_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("knowledge.db");

    {
        let db = SqlitePersistence::open(&path).await.unwrap();
        let store = KnowledgeStore::new();
        store.put(KnowledgeEntry::seed("Qual a capital do Brasil?", "Brasília")).await.unwrap();
        store.save_to(&db).await.unwrap();
    }
    {
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute("UPDATE knowledge SET provenance = 'rumor'", []).unwrap();
    }

    let db = SqlitePersistence::open(&path).await.unwrap();
    assert!(db.load_all().await.is_err());

    let store = KnowledgeStore::new();
    store.put(KnowledgeEntry::seed("stale", "entry")).await.unwrap();
    let err = store.load_from(&db).await.unwrap_err();
    assert!(matches!(err, KnowledgeError::Persistence(_)));
    assert!(store.is_empty().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_questions_and_feedback_stay_consistent() {
    let store = KnowledgeStore::new();
    store.put(KnowledgeEntry::seed("Qual a capital do Brasil?", "Brasília")).await.unwrap();
    let (source, _) = FakeSource::new(&[]);
    let core = Arc::new(core_with(store.clone(), source));

    let mut handles = Vec::new();
    for i in 0..64 {
        let core = core.clone();
        handles.push(tokio::spawn(async move {
            let user = format!("user-{}", i);
            let answer = core.ask(&user, "Qual é a capital do Brasil?").await;
            let key = answer.key().expect("seeded question is answered").to_string();
            core.feedback(&user, &key, FeedbackSignal::Positive).await
        }));
    }
    for handle in handles {
        assert!(matches!(handle.await.unwrap(), FeedbackReply::Adjusted { .. }));
    }

    let entry = store.get("qual a capital do brasil").await.unwrap();
    assert_eq!(entry.hit_count, 64);
    assert_eq!(entry.positive_feedback, 64);
    assert_eq!(entry.confidence, 1.0);

    let stats = core.stats().await;
    assert_eq!(stats.answered_from_store, 64);
    assert_eq!(stats.positive_feedback, 64);
}
