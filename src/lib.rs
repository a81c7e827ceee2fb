//! learnbot - Knowledge Learning & Retrieval Library
//!
//! A self-learning question answering core with:
//! - Accent- and punctuation-insensitive question normalization
//! - A confidence-scored knowledge store persisted to SQLite
//! - Exact-then-fuzzy retrieval with a confidence floor
//! - Acquisition of unknown answers from Wikipedia
//! - Feedback-driven reinforcement, decay and forgetting
//! - Telegram and console chat transports
//!
//! # Example
//!
//! ```ignore
//! use learnbot::{Config, KnowledgeCore, KnowledgeStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let core = KnowledgeCore::new(KnowledgeStore::new(), &config.knowledge);
//!     core.teach("Qual a capital do Brasil?", "Brasília").await?;
//!     println!("{:?}", core.ask("me", "Qual é a capital do Brasil?").await);
//!     Ok(())
//! }
//! ```

// Core modules (order matters for cross-module dependencies)
pub mod error;
pub mod config;
pub mod storage;
pub mod knowledge;
pub mod transport;
pub mod cli;

// Re-export commonly used types for convenience
pub use error::{KnowledgeError, KnowledgeResult};

pub use config::Config;

pub use knowledge::{
    normalize,
    similarity,
    Answer,
    FeedbackReply,
    FeedbackSignal,
    KnowledgeCore,
    KnowledgeEntry,
    KnowledgeStore,
    Provenance,
};

pub use storage::{
    InteractionLog,
    PersistenceMedium,
    SqlitePersistence,
};

pub use transport::{
    Inbound,
    Reply,
    Transport,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Get the library info
pub fn info() -> String {
    format!("{} v{} - Knowledge Learning & Retrieval Library", NAME, VERSION)
}
