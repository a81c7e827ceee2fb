//! CLI interface for learnbot

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{self, Config};
use crate::knowledge::{
    normalize, AcquisitionPipeline, Answer, AnswerOrigin, FeedbackReply, FeedbackSignal, KnowledgeCore,
    KnowledgeEntry, KnowledgeStore, WikipediaSource,
};
use crate::storage::{InteractionLog, SqlitePersistence};
use crate::transport::{console::ConsoleTransport, serve, telegram::TelegramTransport, Transport};

const CLI_USER: &str = "cli";

#[derive(Parser)]
#[command(name = "learnbot")]
#[command(about = "Question answering bot that learns from lookups and feedback", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Use this config file instead of the default location
    #[arg(long, global = true, env = "LEARNBOT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Use this knowledge database instead of the configured one
    #[arg(long, global = true, env = "LEARNBOT_DB")]
    pub db: Option<PathBuf>,

    /// Answer only from stored knowledge, never look anything up
    #[arg(long, global = true)]
    pub offline: bool,

    /// Log at INFO level (RUST_LOG still applies)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a question
    Ask {
        /// Question text
        question: String,
    },
    /// Rate the stored answer to a question
    Feedback {
        /// Question whose answer is rated
        question: String,
        /// up/down (also positive/negative, +/-)
        signal: FeedbackSignal,
    },
    /// Teach or correct an answer
    Teach {
        question: String,
        answer: String,
    },
    /// Remove the stored answer to a question
    Forget {
        question: String,
    },
    /// Show learning statistics
    Stats {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// List stored knowledge
    List {
        /// Maximum entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Show recently asked questions
    History {
        /// Maximum interactions to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Write all knowledge to a JSON file
    Export {
        file: PathBuf,
    },
    /// Load knowledge from a JSON file written by `export`
    Import {
        file: PathBuf,
    },
    /// Start an interactive chat on the terminal
    Chat,
    /// Run the Telegram bot
    Telegram,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Print the config file location
    Path,
    /// Overwrite the config file with defaults
    Reset,
}

/// Loaded configuration, database and core for one command
struct Runtime {
    config: Config,
    db: Arc<SqlitePersistence>,
    core: KnowledgeCore,
    /// False when the stored knowledge could not be loaded. Nothing is
    /// written to the database then.
    persist: bool,
}

/// Aborts the background checkpoint when dropped
struct CheckpointGuard(Option<JoinHandle<()>>);

impl Drop for CheckpointGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.abort();
        }
    }
}

impl Runtime {
    async fn open(cli: &Cli) -> Result<Self> {
        let config = load_config(cli)?;
        let db_path = match &cli.db {
            Some(path) => path.clone(),
            None => config.storage.resolve_database_path()?,
        };

        let db = Arc::new(
            SqlitePersistence::open(&db_path)
                .await
                .with_context(|| format!("Failed to open knowledge database {}", db_path.display()))?,
        );

        let store = KnowledgeStore::new();
        let persist = match store.load_from(db.as_ref()).await {
            Ok(_) => true,
            Err(e) => {
                warn!("Knowledge in {} is unreadable, running without saving: {}", db_path.display(), e);
                eprintln!(
                    "⚠️  Could not load knowledge from {}: {}\n    Starting with an empty store. Nothing will be saved to this database.",
                    db_path.display(),
                    e
                );
                false
            }
        };

        let mut core = KnowledgeCore::new(store.clone(), &config.knowledge);
        if config.acquisition.enabled && !cli.offline {
            let source = WikipediaSource::new(&config.acquisition)?;
            core = core.with_acquisition(AcquisitionPipeline::new(
                Box::new(source),
                store,
                &config.knowledge,
                &config.acquisition,
            ));
        }
        if config.storage.log_interactions && persist {
            core = core.with_interaction_log(db.clone());
        }

        Ok(Self {
            config,
            db,
            core,
            persist,
        })
    }

    fn store(&self) -> &KnowledgeStore {
        self.core.store()
    }

    /// Background checkpoint for long-running sessions, stopped when the
    /// guard drops
    fn spawn_checkpoint(&self) -> CheckpointGuard {
        let secs = self.config.storage.checkpoint_interval_secs;
        if secs == 0 || !self.persist {
            return CheckpointGuard(None);
        }
        CheckpointGuard(Some(
            self.store().spawn_checkpoint(self.db.clone(), Duration::from_secs(secs)),
        ))
    }

    /// Save pending changes
    async fn close(self) -> Result<()> {
        if !self.persist {
            warn!("Discarding in-memory knowledge changes, the database was not loaded");
            return Ok(());
        }
        if self.store().is_dirty() {
            let saved = self
                .store()
                .save_to(self.db.as_ref())
                .await
                .context("Failed to save knowledge")?;
            info!("Saved {} knowledge entries", saved);
        }
        Ok(())
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}

fn config_file(cli: &Cli) -> Result<PathBuf> {
    match &cli.config {
        Some(path) => Ok(path.clone()),
        None => config::config_path(),
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    if let Commands::Config { command } = &cli.command {
        return run_config(&cli, command);
    }

    let runtime = Runtime::open(&cli).await?;
    let result = dispatch(&cli, &runtime).await;
    let closed = runtime.close().await;
    result.and(closed)
}

async fn dispatch(cli: &Cli, runtime: &Runtime) -> Result<()> {
    let core = &runtime.core;
    match &cli.command {
        Commands::Ask { question } => {
            print_answer(&core.ask(CLI_USER, question).await);
        }
        Commands::Feedback { question, signal } => {
            let key = core.resolve(question).await;
            match core.feedback(CLI_USER, &key, *signal).await {
                FeedbackReply::Adjusted { entry } => {
                    println!("Confidence for '{}' is now {:.2}", entry.key, entry.confidence);
                }
                FeedbackReply::Forgotten { key } => println!("Forgot the answer to '{}'", key),
                FeedbackReply::NotFound { key } => println!("No stored answer for '{}'", key),
            }
        }
        Commands::Teach { question, answer } => {
            let entry = core.teach(question, answer).await?;
            println!("Learned '{}' ({})", entry.key, entry.provenance);
        }
        Commands::Forget { question } => {
            if core.forget(question).await {
                println!("Forgot the answer to '{}'", normalize(question));
            } else {
                println!("No stored answer for '{}'", normalize(question));
            }
        }
        Commands::Stats { json } => {
            let stats = core.stats().await;
            if *json {
                println!("{}", serde_json::to_string_pretty(&stats.store)?);
            } else {
                let s = stats.store;
                println!("📊 Knowledge base");
                println!("  Entries:            {}", s.total);
                println!("    seed:             {}", s.seed);
                println!("    acquired:         {}", s.acquired);
                println!("    corrected:        {}", s.feedback_corrected);
                println!("  Mean confidence:    {:.2}", s.mean_confidence);
                println!("  Hits:               {}", s.total_hits);
                println!("  Positive feedback:  {}", s.positive_feedback);
                println!("  Negative feedback:  {}", s.negative_feedback);
            }
        }
        Commands::List { limit } => {
            let mut entries = runtime.store().all().await;
            entries.sort_by(|a, b| b.confidence.total_cmp(&a.confidence).then_with(|| a.key.cmp(&b.key)));
            if entries.is_empty() {
                println!("No knowledge stored yet.");
            }
            for entry in entries.iter().take(*limit) {
                println!(
                    "[{:.2}] {} -> {} ({}, {} hits)",
                    entry.confidence, entry.key, entry.answer, entry.provenance, entry.hit_count
                );
            }
        }
        Commands::History { limit } => {
            let records = runtime.db.recent(*limit).await?;
            if records.is_empty() {
                println!("No interactions recorded.");
            }
            for record in records {
                println!(
                    "{} [{}] {}: {} -> {}",
                    record.created_at.format("%Y-%m-%d %H:%M"),
                    record.outcome,
                    record.user_id,
                    record.question,
                    record.answer.as_deref().unwrap_or("-")
                );
            }
        }
        Commands::Export { file } => {
            let count = export_knowledge(runtime.store(), file).await?;
            println!("Exported {} entries to {}", count, file.display());
        }
        Commands::Import { file } => {
            let count = import_knowledge(runtime.store(), file).await?;
            println!("Imported {} entries from {}", count, file.display());
        }
        Commands::Chat => {
            println!("{}", crate::transport::START_TEXT);
            let _checkpoint = runtime.spawn_checkpoint();
            let mut console = ConsoleTransport::stdio();
            run_until_interrupted(core, &mut console).await?;
        }
        Commands::Telegram => {
            let mut telegram = TelegramTransport::from_config(&runtime.config.telegram)?;
            let me = telegram.get_me().await.context("Failed to reach the Telegram Bot API")?;
            println!(
                "🤖 Telegram bot @{} is running. Press Ctrl+C to stop.",
                me.username.as_deref().unwrap_or(&me.first_name)
            );
            let _checkpoint = runtime.spawn_checkpoint();
            run_until_interrupted(core, &mut telegram).await?;
        }
        Commands::Config { command } => run_config(cli, command)?,
    }
    Ok(())
}

async fn run_until_interrupted(core: &KnowledgeCore, transport: &mut dyn Transport) -> Result<()> {
    tokio::select! {
        result = serve(core, transport) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            Ok(())
        }
    }
}

fn print_answer(answer: &Answer) {
    match answer {
        Answer::Answered { text, confidence, origin, .. } => {
            println!("{}", text);
            match origin {
                AnswerOrigin::Retrieved { score, exact: true } => {
                    println!("  (from memory, confidence {:.2}, match {:.2})", confidence, score)
                }
                AnswerOrigin::Retrieved { score, exact: false } => {
                    println!("  (similar question, confidence {:.2}, match {:.2})", confidence, score)
                }
                AnswerOrigin::Acquired => println!("  (just learned, confidence {:.2})", confidence),
            }
        }
        Answer::Rejected => println!("Please ask a question."),
        Answer::Unanswerable { reason } => println!("I don't know yet ({}).", reason),
    }
}

/// Write every entry as a JSON array
pub async fn export_knowledge(store: &KnowledgeStore, file: &Path) -> Result<usize> {
    let entries = store.all().await;
    let json = serde_json::to_string_pretty(&entries).context("Failed to serialize knowledge")?;
    tokio::fs::write(file, json)
        .await
        .with_context(|| format!("Failed to write {}", file.display()))?;
    Ok(entries.len())
}

/// Read a JSON array of entries and store each one, replacing same keys
pub async fn import_knowledge(store: &KnowledgeStore, file: &Path) -> Result<usize> {
    let contents = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let entries: Vec<KnowledgeEntry> =
        serde_json::from_str(&contents).with_context(|| format!("Failed to parse {}", file.display()))?;

    let mut imported = 0;
    for entry in entries {
        let key = entry.key.clone();
        match store.put(entry).await {
            Ok(()) => imported += 1,
            Err(e) => warn!("Skipping imported entry '{}': {}", key, e),
        }
    }
    Ok(imported)
}

fn run_config(cli: &Cli, command: &ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Show => {
            let config = load_config(cli)?;
            print!("{}", toml::to_string_pretty(&config).context("Failed to serialize config")?);
        }
        ConfigCommands::Path => {
            println!("{}", config_file(cli)?.display());
        }
        ConfigCommands::Reset => {
            let path = config_file(cli)?;
            Config::default().save_to(&path)?;
            println!("Configuration reset to defaults at {}", path.display());
        }
    }
    Ok(())
}
