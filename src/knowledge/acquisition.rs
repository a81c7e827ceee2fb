//! Acquisition Pipeline - grows the store after a retrieval miss
//!
//! Looks the question up in an external source, extracts a short answer
//! with a deterministic rule and stores it as low-confidence knowledge.
//! A single attempt is made; retrying is the caller's decision. Nothing is
//! written unless extraction produced an answer, so dropping the future
//! mid-lookup leaves the store untouched.

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::normalize::normalize;
use super::store::KnowledgeStore;
use super::{KnowledgeEntry, Provenance};
use crate::config::{AcquisitionConfig, KnowledgeConfig};
use crate::error::KnowledgeError;

/// Why an external lookup produced nothing
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LookupError {
    #[error("network error: {0}")]
    Network(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl From<LookupError> for KnowledgeError {
    fn from(err: LookupError) -> Self {
        match err {
            LookupError::Network(msg) => KnowledgeError::Network(msg),
            LookupError::NotFound(msg) => KnowledgeError::NotFound(msg),
        }
    }
}

/// Raw text returned by a knowledge source
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDocument {
    pub text: String,
    /// Where the text came from, kept as the entry's source
    pub origin: Option<String>,
}

impl SourceDocument {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            origin: None,
        }
    }
}

/// External knowledge source queried on a miss
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    async fn lookup(&self, question: &str) -> Result<SourceDocument, LookupError>;

    /// Source name for logs
    fn name(&self) -> &'static str;
}

/// Outcome of one acquisition attempt
#[derive(Debug)]
pub enum AcquisitionResult {
    /// Entry now stored under the question's key
    Success(KnowledgeEntry),
    Failure(KnowledgeError),
}

/// Looks up, extracts and stores new knowledge
pub struct AcquisitionPipeline {
    source: Box<dyn KnowledgeSource>,
    store: KnowledgeStore,
    initial_confidence: f64,
    max_answer_chars: usize,
}

impl AcquisitionPipeline {
    pub fn new(
        source: Box<dyn KnowledgeSource>,
        store: KnowledgeStore,
        knowledge: &KnowledgeConfig,
        acquisition: &AcquisitionConfig,
    ) -> Self {
        Self {
            source,
            store,
            initial_confidence: knowledge.initial_acquired_confidence,
            max_answer_chars: acquisition.max_answer_chars.max(1),
        }
    }

    /// Fetch, extract and store an answer for `question`
    pub async fn acquire(&self, question: &str) -> AcquisitionResult {
        let key = normalize(question);
        if key.is_empty() {
            return AcquisitionResult::Failure(KnowledgeError::Validation("question is empty".to_string()));
        }

        // No store lock is held while the source is queried
        let document = match self.source.lookup(question).await {
            Ok(document) => document,
            Err(e) => {
                warn!("Lookup of '{}' in {} failed: {}", question, self.source.name(), e);
                return AcquisitionResult::Failure(e.into());
            }
        };

        let answer = match extract_answer(&document.text, self.max_answer_chars) {
            Ok(answer) => answer,
            Err(reason) => {
                warn!("No answer extracted for '{}': {}", question, reason);
                return AcquisitionResult::Failure(KnowledgeError::Extraction(reason));
            }
        };

        let mut entry = KnowledgeEntry::new(
            key,
            question.trim(),
            answer,
            self.initial_confidence,
            Provenance::Acquired,
        );
        entry.source = document.origin;

        match self.store.put_if_absent(entry).await {
            Ok(stored) => {
                info!("Acquired knowledge for '{}' from {}", stored.key, self.source.name());
                AcquisitionResult::Success(stored)
            }
            Err(e) => AcquisitionResult::Failure(e),
        }
    }
}

static MARKUP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid markup regex"));
static PARENTHETICAL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s*\([^()]*\)").expect("valid parenthetical regex"));
static CITATION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[[^\[\]]*\]").expect("valid citation regex"));
static SPACE_BEFORE_PUNCT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+([,;:.!?])").expect("valid spacing regex"));

/// Phrases that mark error pages or non-answers, matched lowercase
const NON_ANSWER_MARKERS: &[&str] = &[
    "may refer to",
    "page not found",
    "error 404",
    "404 not found",
    "internal server error",
    "pode referir-se",
    "não existe",
    "página não encontrada",
    "does not have an article",
];

/// Abbreviations whose trailing period does not end a sentence
const ABBREVIATIONS: &[&str] = &["dr", "dra", "sr", "sra", "st", "mr", "mrs", "ms", "prof", "profa", "jr", "vs"];

/// Reduce raw source text to a concise answer.
///
/// Strips markup, citations and parenthetical asides, then keeps the first
/// sentence, cut on a word boundary when longer than `max_chars`. Only that
/// sentence is checked for non-answer phrases.
pub fn extract_answer(raw: &str, max_chars: usize) -> Result<String, String> {
    let text = MARKUP.replace_all(raw, " ");
    let text = CITATION.replace_all(&text, "");
    let mut text = text.into_owned();
    // Nested asides are removed innermost first
    loop {
        let next = PARENTHETICAL.replace_all(&text, "").into_owned();
        if next == text {
            break;
        }
        text = next;
    }
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let text = SPACE_BEFORE_PUNCT.replace_all(&text, "$1").into_owned();

    let sentence = first_sentence(&text);
    let lowered = sentence.to_lowercase();
    if let Some(marker) = NON_ANSWER_MARKERS.iter().find(|m| lowered.contains(*m)) {
        return Err(format!("source returned a non-answer ('{}')", marker));
    }
    let answer = truncate_on_word(sentence.trim(), max_chars);

    if !answer.chars().any(|c| c.is_alphanumeric()) {
        return Err("extraction produced no text".to_string());
    }
    Ok(answer)
}

fn first_sentence(text: &str) -> &str {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    for (i, &(pos, c)) in chars.iter().enumerate() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        let at_boundary = chars.get(i + 1).map_or(true, |&(_, next)| next.is_whitespace());
        if !at_boundary {
            continue;
        }
        if c == '.' {
            let word: String = text[..pos]
                .chars()
                .rev()
                .take_while(|ch| ch.is_alphabetic())
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            let is_initial = word.chars().count() == 1 && word.chars().all(char::is_uppercase);
            if is_initial || ABBREVIATIONS.contains(&word.to_lowercase().as_str()) {
                continue;
            }
        }
        return &text[..pos + c.len_utf8()];
    }
    text
}

fn truncate_on_word(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    let trimmed = match cut.rfind(char::is_whitespace) {
        Some(idx) if idx > 0 => &cut[..idx],
        _ => cut.as_str(),
    };
    format!("{}…", trimmed.trim_end_matches([',', ';', ':']))
}

/// Leading words that make a question but not a page title
const QUESTION_LEADS: &[&str] = &[
    "o que", "oque", "quem", "qual", "quais", "quando", "onde", "como", "por que", "porque",
    "what", "who", "which", "when", "where", "how", "why",
];

/// Question words and copulas dropped from search terms
const QUESTION_FILLERS: &[&str] = &["foi", "era", "sao", "is", "was", "are", "the", "a", "o", "as", "os"];

/// Wikipedia, through the search API and the REST summary endpoint
pub struct WikipediaSource {
    http: reqwest::Client,
    language: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    query: Option<SearchQuery>,
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    search: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    title: String,
}

#[derive(Debug, Deserialize)]
struct SummaryResponse {
    #[serde(rename = "type")]
    page_type: Option<String>,
    extract: Option<String>,
    content_urls: Option<ContentUrls>,
}

#[derive(Debug, Deserialize)]
struct ContentUrls {
    desktop: Option<PageUrl>,
}

#[derive(Debug, Deserialize)]
struct PageUrl {
    page: String,
}

impl WikipediaSource {
    pub fn new(config: &AcquisitionConfig) -> Result<Self, KnowledgeError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .user_agent(concat!("learnbot/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| KnowledgeError::Network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            language: config.language.clone(),
        })
    }

    fn search_url(&self, terms: &str) -> Result<url::Url, LookupError> {
        url::Url::parse_with_params(
            &format!("https://{}.wikipedia.org/w/api.php", self.language),
            &[
                ("action", "query"),
                ("list", "search"),
                ("srsearch", terms),
                ("srlimit", "1"),
                ("format", "json"),
            ],
        )
        .map_err(|e| LookupError::Network(format!("bad search URL: {}", e)))
    }

    fn summary_url(&self, title: &str) -> Result<url::Url, LookupError> {
        let mut url = url::Url::parse(&format!("https://{}.wikipedia.org/api/rest_v1/page/summary", self.language))
            .map_err(|e| LookupError::Network(format!("bad summary URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| LookupError::Network("summary URL cannot have segments".to_string()))?
            .push(&title.replace(' ', "_"));
        Ok(url)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: url::Url) -> Result<T, LookupError> {
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| LookupError::Network(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(LookupError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            return Err(LookupError::Network(format!("{} returned {}", url, status)));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| LookupError::Network(format!("invalid response from {}: {}", url, e)))
    }
}

/// Search terms for a question: leading question words and fillers removed
pub fn search_terms(question: &str) -> String {
    let mut key = normalize(question);
    if let Some(lead) = QUESTION_LEADS
        .iter()
        .find(|lead| key == **lead || key.starts_with(&format!("{} ", lead)))
    {
        key = key[lead.len()..].trim_start().to_string();
    }
    let terms: Vec<&str> = key
        .split_whitespace()
        .filter(|t| !QUESTION_FILLERS.contains(t))
        .collect();
    if terms.is_empty() {
        normalize(question)
    } else {
        terms.join(" ")
    }
}

fn summary_document(summary: SummaryResponse, title: &str) -> Result<SourceDocument, LookupError> {
    if summary.page_type.as_deref() == Some("disambiguation") {
        return Err(LookupError::NotFound(format!("'{}' is a disambiguation page", title)));
    }
    let text = summary
        .extract
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| LookupError::NotFound(format!("'{}' has no summary", title)))?;

    Ok(SourceDocument {
        text,
        origin: summary.content_urls.and_then(|u| u.desktop).map(|d| d.page),
    })
}

#[async_trait]
impl KnowledgeSource for WikipediaSource {
    async fn lookup(&self, question: &str) -> Result<SourceDocument, LookupError> {
        let terms = search_terms(question);
        if terms.is_empty() {
            return Err(LookupError::NotFound("empty question".to_string()));
        }

        let search: SearchResponse = self.get_json(self.search_url(&terms)?).await?;
        let title = search
            .query
            .and_then(|q| q.search.into_iter().next())
            .map(|hit| hit.title)
            .ok_or_else(|| LookupError::NotFound(format!("no article for '{}'", terms)))?;
        debug!("Wikipedia search '{}' -> '{}'", terms, title);

        let summary: SummaryResponse = self.get_json(self.summary_url(&title)?).await?;
        summary_document(summary, &title)
    }

    fn name(&self) -> &'static str {
        "wikipedia"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline(source: MockKnowledgeSource, store: KnowledgeStore) -> AcquisitionPipeline {
        AcquisitionPipeline::new(
            Box::new(source),
            store,
            &KnowledgeConfig::default(),
            &AcquisitionConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_success_stores_low_confidence_entry() {
        let mut source = MockKnowledgeSource::new();
        source
            .expect_lookup()
            .times(1)
            .returning(|_| Ok(SourceDocument::new("Alexander Fleming")));
        source.expect_name().return_const("mock");

        let store = KnowledgeStore::new();
        let result = pipeline(source, store.clone()).acquire("Quem descobriu a penicilina?").await;

        match result {
            AcquisitionResult::Success(entry) => {
                assert_eq!(entry.key, "quem descobriu a penicilina");
                assert_eq!(entry.answer, "Alexander Fleming");
                assert_eq!(entry.confidence, 0.3);
                assert_eq!(entry.provenance, Provenance::Acquired);
            }
            AcquisitionResult::Failure(e) => panic!("unexpected failure: {}", e),
        }
        assert!(store.get("quem descobriu a penicilina").await.is_some());
    }

    #[tokio::test]
    async fn test_network_failure_writes_nothing() {
        let mut source = MockKnowledgeSource::new();
        source
            .expect_lookup()
            .times(1)
            .returning(|_| Err(LookupError::Network("connection reset".to_string())));
        source.expect_name().return_const("mock");

        let store = KnowledgeStore::new();
        let result = pipeline(source, store.clone()).acquire("quem descobriu a penicilina").await;

        assert!(matches!(result, AcquisitionResult::Failure(KnowledgeError::Network(_))));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_error_page_is_rejected() {
        let mut source = MockKnowledgeSource::new();
        source
            .expect_lookup()
            .returning(|_| Ok(SourceDocument::new("Penicilina pode referir-se a: ...")));
        source.expect_name().return_const("mock");

        let store = KnowledgeStore::new();
        let result = pipeline(source, store.clone()).acquire("penicilina").await;

        assert!(matches!(result, AcquisitionResult::Failure(KnowledgeError::Extraction(_))));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_empty_question_skips_lookup() {
        let mut source = MockKnowledgeSource::new();
        source.expect_lookup().times(0);

        let result = pipeline(source, KnowledgeStore::new()).acquire("  ?? ").await;
        assert!(matches!(result, AcquisitionResult::Failure(KnowledgeError::Validation(_))));
    }

    #[tokio::test]
    async fn test_existing_entry_is_not_overwritten() {
        let mut source = MockKnowledgeSource::new();
        source.expect_lookup().returning(|_| Ok(SourceDocument::new("Something else.")));
        source.expect_name().return_const("mock");

        let store = KnowledgeStore::new();
        store.put(KnowledgeEntry::seed("qual a capital do brasil", "Brasília")).await.unwrap();

        match pipeline(source, store.clone()).acquire("qual a capital do brasil").await {
            AcquisitionResult::Success(entry) => assert_eq!(entry.answer, "Brasília"),
            AcquisitionResult::Failure(e) => panic!("unexpected failure: {}", e),
        }
    }

    #[test]
    fn test_extract_first_sentence() {
        let raw = "Alexander Fleming (Darvel, 6 de agosto de 1881 — Londres, 11 de março de 1955) foi um médico e bacteriologista escocês. Descobriu a penicilina em 1928.";
        assert_eq!(
            extract_answer(raw, 300).unwrap(),
            "Alexander Fleming foi um médico e bacteriologista escocês."
        );
    }

    #[test]
    fn test_extract_skips_abbreviations_and_initials() {
        let raw = "O Dr. House é um personagem criado por David S. Jacobs. Outra frase.";
        assert_eq!(
            extract_answer(raw, 300).unwrap(),
            "O Dr. House é um personagem criado por David S. Jacobs."
        );
    }

    #[test]
    fn test_extract_strips_markup_and_citations() {
        let raw = "<p>Brasília é a <b>capital</b> do Brasil[1] .</p>";
        assert_eq!(extract_answer(raw, 300).unwrap(), "Brasília é a capital do Brasil.");
    }

    #[test]
    fn test_extract_truncates_on_word_boundary() {
        let raw = "uma resposta bastante longa sem pontuação final";
        let answer = extract_answer(raw, 20).unwrap();
        assert_eq!(answer, "uma resposta…");
    }

    #[test]
    fn test_extract_rejects_empty_and_error_pages() {
        assert!(extract_answer("", 300).is_err());
        assert!(extract_answer("   <br/> ", 300).is_err());
        assert!(extract_answer("404 Not Found", 300).is_err());
        assert!(extract_answer("Mercury may refer to:", 300).is_err());
    }

    #[test]
    fn test_extract_ignores_markers_after_first_sentence() {
        let raw = "O unicórnio é uma criatura lendária com um chifre na testa. Na biologia, o animal não existe.";
        assert_eq!(
            extract_answer(raw, 300).unwrap(),
            "O unicórnio é uma criatura lendária com um chifre na testa."
        );
    }

    #[test]
    fn test_search_terms() {
        assert_eq!(search_terms("Quem descobriu a penicilina?"), "descobriu penicilina");
        assert_eq!(search_terms("O que é Python?"), "python");
        assert_eq!(search_terms("Brasília"), "brasilia");
        assert_eq!(search_terms("Quem?"), "quem");
    }

    #[test]
    fn test_wikipedia_urls() {
        let source = WikipediaSource::new(&AcquisitionConfig::default()).unwrap();
        let summary = source.summary_url("Alexander Fleming").unwrap();
        assert_eq!(
            summary.as_str(),
            "https://pt.wikipedia.org/api/rest_v1/page/summary/Alexander_Fleming"
        );

        let search = source.search_url("descobriu penicilina").unwrap();
        assert!(search.as_str().starts_with("https://pt.wikipedia.org/w/api.php?"));
        assert!(search.as_str().contains("srsearch=descobriu+penicilina"));
    }

    #[test]
    fn test_summary_document() {
        let summary: SummaryResponse = serde_json::from_value(serde_json::json!({
            "type": "standard",
            "extract": "Alexander Fleming foi um médico escocês.",
            "content_urls": { "desktop": { "page": "https://pt.wikipedia.org/wiki/Alexander_Fleming" } }
        }))
        .unwrap();
        let doc = summary_document(summary, "Alexander Fleming").unwrap();
        assert_eq!(doc.origin.as_deref(), Some("https://pt.wikipedia.org/wiki/Alexander_Fleming"));

        let disambiguation: SummaryResponse =
            serde_json::from_value(serde_json::json!({ "type": "disambiguation", "extract": "x" })).unwrap();
        assert!(matches!(
            summary_document(disambiguation, "Mercúrio"),
            Err(LookupError::NotFound(_))
        ));
    }
}
