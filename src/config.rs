//! Configuration management
//!
//! Manages retrieval thresholds, feedback policy, storage location,
//! acquisition settings and the Telegram transport.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Retrieval and feedback policy
    #[serde(default)]
    pub knowledge: KnowledgeConfig,
    /// Persistence settings
    #[serde(default)]
    pub storage: StorageConfig,
    /// External lookup settings
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    /// Telegram bot settings
    #[serde(default)]
    pub telegram: TelegramConfig,
}

/// Retrieval and feedback policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    /// Minimum similarity for a fuzzy match to count as a hit
    #[serde(default = "default_acceptance_threshold")]
    pub acceptance_threshold: f64,
    /// Minimum confidence an entry needs to be returned by a fuzzy match
    #[serde(default = "default_min_confidence_floor")]
    pub min_confidence_floor: f64,
    /// Confidence given to freshly acquired entries
    #[serde(default = "default_initial_acquired_confidence")]
    pub initial_acquired_confidence: f64,
    /// Confidence given to taught entries
    #[serde(default = "default_seed_confidence")]
    pub seed_confidence: f64,
    /// Confidence added per positive signal
    #[serde(default = "default_feedback_step_positive")]
    pub feedback_step_positive: f64,
    /// Confidence removed per negative signal (positive number)
    #[serde(default = "default_feedback_step_negative")]
    pub feedback_step_negative: f64,
    /// Consecutive negatives at zero confidence before an entry is forgotten
    #[serde(default = "default_deletion_negative_threshold")]
    pub deletion_negative_threshold: u32,
    /// Number of fuzzy candidates considered per retrieval
    #[serde(default = "default_candidate_limit")]
    pub candidate_limit: usize,
}

fn default_acceptance_threshold() -> f64 {
    0.75
}

fn default_min_confidence_floor() -> f64 {
    0.2
}

fn default_initial_acquired_confidence() -> f64 {
    0.3
}

fn default_seed_confidence() -> f64 {
    1.0
}

fn default_feedback_step_positive() -> f64 {
    0.1
}

fn default_feedback_step_negative() -> f64 {
    0.15
}

fn default_deletion_negative_threshold() -> u32 {
    3
}

fn default_candidate_limit() -> usize {
    5
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            acceptance_threshold: default_acceptance_threshold(),
            min_confidence_floor: default_min_confidence_floor(),
            initial_acquired_confidence: default_initial_acquired_confidence(),
            seed_confidence: default_seed_confidence(),
            feedback_step_positive: default_feedback_step_positive(),
            feedback_step_negative: default_feedback_step_negative(),
            deletion_negative_threshold: default_deletion_negative_threshold(),
            candidate_limit: default_candidate_limit(),
        }
    }
}

impl KnowledgeConfig {
    /// Reject values outside their meaningful range
    pub fn validate(&self) -> Result<()> {
        let unit = [
            ("acceptance_threshold", self.acceptance_threshold),
            ("min_confidence_floor", self.min_confidence_floor),
            ("initial_acquired_confidence", self.initial_acquired_confidence),
            ("seed_confidence", self.seed_confidence),
            ("feedback_step_positive", self.feedback_step_positive),
            ("feedback_step_negative", self.feedback_step_negative),
        ];
        for (name, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                anyhow::bail!("knowledge.{} must be within [0, 1], got {}", name, value);
            }
        }
        if self.deletion_negative_threshold == 0 {
            anyhow::bail!("knowledge.deletion_negative_threshold must be at least 1");
        }
        if self.candidate_limit == 0 {
            anyhow::bail!("knowledge.candidate_limit must be at least 1");
        }
        Ok(())
    }
}

/// Persistence settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database file (defaults to the data directory)
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    /// Seconds between background checkpoints, 0 disables them
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval_secs: u64,
    /// Record every answered question in the interaction log
    #[serde(default = "default_true")]
    pub log_interactions: bool,
}

fn default_checkpoint_interval() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            checkpoint_interval_secs: default_checkpoint_interval(),
            log_interactions: true,
        }
    }
}

impl StorageConfig {
    /// Resolve the database file, falling back to the data directory
    pub fn resolve_database_path(&self) -> Result<PathBuf> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => Ok(data_dir()?.join("knowledge.db")),
        }
    }
}

/// External lookup settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Look up unknown questions at all
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Wikipedia language edition
    #[serde(default = "default_language")]
    pub language: String,
    /// Lookup timeout in seconds
    #[serde(default = "default_lookup_timeout")]
    pub timeout_secs: u64,
    /// Longest answer kept from a lookup
    #[serde(default = "default_max_answer_chars")]
    pub max_answer_chars: usize,
}

fn default_language() -> String {
    "pt".to_string()
}

fn default_lookup_timeout() -> u64 {
    5
}

fn default_max_answer_chars() -> usize {
    300
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            language: default_language(),
            timeout_secs: default_lookup_timeout(),
            max_answer_chars: default_max_answer_chars(),
        }
    }
}

/// Telegram bot settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot token from @BotFather; TELEGRAM_BOT_TOKEN takes precedence
    #[serde(default)]
    pub bot_token: Option<String>,
    /// Long polling timeout in seconds
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
    /// Answered messages remembered for feedback buttons
    #[serde(default = "default_feedback_window")]
    pub feedback_window: usize,
}

fn default_poll_timeout() -> u64 {
    30
}

fn default_feedback_window() -> usize {
    1024
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            poll_timeout_secs: default_poll_timeout(),
            feedback_window: default_feedback_window(),
        }
    }
}

impl TelegramConfig {
    /// Token from the environment, then from the config file
    pub fn resolve_token(&self) -> Result<String> {
        std::env::var("TELEGRAM_BOT_TOKEN")
            .ok()
            .filter(|t| !t.is_empty())
            .or_else(|| self.bot_token.clone())
            .context("Telegram bot token not configured. Set TELEGRAM_BOT_TOKEN or telegram.bot_token in config.")
    }
}

impl Config {
    /// Load configuration from the default location, creating it if missing
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path()?)
    }

    /// Load configuration from a specific file, creating it if missing
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            toml::from_str::<Config>(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?
        } else {
            let config = Config::default();
            config.save_to(path)?;
            config
        };
        config.knowledge.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&config_path()?)
    }

    /// Save configuration to a specific file
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        let parent = path.parent().context("Config path has no parent")?;
        std::fs::create_dir_all(parent).context("Failed to create config directory")?;

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }
}

/// Get the configuration file path
pub fn config_path() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "learnbot", "learnbot")
        .context("Failed to get project directories")?;
    Ok(base.config_dir().join("config.toml"))
}

/// Get the data directory path
pub fn data_dir() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "learnbot", "learnbot")
        .context("Failed to get project directories")?;
    Ok(base.data_dir().to_path_buf())
}

/// Get default configuration as TOML string
pub fn default_config_toml() -> String {
    toml::to_string_pretty(&Config::default()).unwrap_or_else(|_| "# Default configuration\n".to_string())
}
