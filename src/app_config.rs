use anyhow::{anyhow, Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::default::Default;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::translation::cache::ConflictPolicy;

/// Application configuration module
/// This module handles loading, validating and saving the pipeline settings.
/// Every field has a default so a partial `conf.json` is always accepted.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Default source language code (ISO)
    #[serde(default = "default_source_language")]
    pub source_language: String,

    /// Default target language code (ISO)
    #[serde(default = "default_target_language")]
    pub target_language: String,

    /// Translation adapter and batching settings
    #[serde(default)]
    pub translation: TranslationConfig,

    /// Retry budgets for batches and whole stages
    #[serde(default)]
    pub retry: RetryConfig,

    /// Flashcard ranking settings
    #[serde(default)]
    pub flashcards: FlashcardConfig,

    /// Database and artifact locations
    #[serde(default)]
    pub storage: StorageConfig,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,
}

/// Translation backend type
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Offline deterministic adapter that prefixes the target language
    #[default]
    Stub,
    /// OpenAI-compatible chat completions endpoint
    OpenAI,
}

impl ProviderKind {
    /// Lowercase provider identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stub => "stub",
            Self::OpenAI => "openai",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "stub" | "offline" => Ok(Self::Stub),
            "openai" => Ok(Self::OpenAI),
            _ => Err(anyhow!("Invalid provider type: {}", s)),
        }
    }
}

/// Translation service configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TranslationConfig {
    /// Translation provider to use
    #[serde(default)]
    pub provider: ProviderKind,

    /// Model name
    #[serde(default = "default_model")]
    pub model: String,

    /// API key for the service
    #[serde(default)]
    pub api_key: String,

    /// Service endpoint URL
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Maximum number of paragraphs sent in one request
    #[serde(default = "default_max_paragraphs_per_batch")]
    pub max_paragraphs_per_batch: usize,

    /// Model context size used for the batch size budget (estimated tokens)
    #[serde(default = "default_max_tokens_per_batch")]
    pub max_tokens_per_batch: usize,

    /// Tokens held back from the budget for the completion
    #[serde(default = "default_reserved_tokens")]
    pub reserved_tokens: usize,

    /// Maximum number of batches in flight for one job
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// What to do when a cache write disagrees with the stored entry
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,

    /// System prompt template.
    /// Placeholders: {source_language}, {target_language}
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Temperature parameter for text generation (0.0 to 1.0)
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            model: default_model(),
            api_key: String::new(),
            endpoint: default_endpoint(),
            timeout_secs: default_timeout_secs(),
            max_paragraphs_per_batch: default_max_paragraphs_per_batch(),
            max_tokens_per_batch: default_max_tokens_per_batch(),
            reserved_tokens: default_reserved_tokens(),
            worker_count: default_worker_count(),
            conflict_policy: ConflictPolicy::default(),
            system_prompt: default_system_prompt(),
            temperature: default_temperature(),
        }
    }
}

/// Exponential backoff settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RetrySettings {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt, in milliseconds
    pub base_delay_ms: u64,
    /// Factor applied to the delay after every failed attempt
    pub multiplier: f64,
    /// Upper bound for a single delay, in milliseconds
    pub max_delay_ms: u64,
}

/// Retry budgets
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RetryConfig {
    /// Retries of one translation batch inside the translation stage
    #[serde(default = "default_batch_retry")]
    pub batch: RetrySettings,

    /// Retries of a whole stage by the orchestrator
    #[serde(default = "default_stage_retry")]
    pub stage: RetrySettings,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            batch: default_batch_retry(),
            stage: default_stage_retry(),
        }
    }
}

/// Flashcard ranking settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FlashcardConfig {
    /// Number of lemmas selected per chapter
    #[serde(default = "default_top_n")]
    pub top_n: usize,

    /// Additive score boost for nouns, verbs and adjectives
    #[serde(default = "default_pos_boost")]
    pub pos_boost: f64,

    /// Directory holding `<lang>.tsv` lexicons (lemma, pos, rarity)
    #[serde(default)]
    pub lexicon_dir: Option<PathBuf>,
}

impl Default for FlashcardConfig {
    fn default() -> Self {
        Self {
            top_n: default_top_n(),
            pos_boost: default_pos_boost(),
            lexicon_dir: None,
        }
    }
}

/// Storage locations and input limits
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StorageConfig {
    /// SQLite database file; the user data directory is used when unset
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Root directory for per-job artifacts
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,

    /// Largest accepted input document, in megabytes
    #[serde(default = "default_max_input_mb")]
    pub max_input_mb: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            artifact_dir: default_artifact_dir(),
            max_input_mb: default_max_input_mb(),
        }
    }
}

/// Log verbosity level
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Matching `log` filter
    pub fn to_level_filter(&self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

fn default_source_language() -> String {
    "en".to_string()
}

fn default_target_language() -> String {
    "es".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_max_paragraphs_per_batch() -> usize {
    16
}

fn default_max_tokens_per_batch() -> usize {
    4000
}

fn default_reserved_tokens() -> usize {
    // Room for the translated output, which runs about as long as the input
    1800
}

fn default_worker_count() -> usize {
    4
}

fn default_system_prompt() -> String {
    "You are a professional literary translator. Translate every entry from {source_language} to {target_language}. Keep each <<ENTRY_n>> marker on its own line, do not merge or split entries, and reply with the markers followed by <<END>>.".to_string()
}

fn default_temperature() -> f32 {
    0.2
}

fn default_batch_retry() -> RetrySettings {
    RetrySettings {
        max_attempts: 4,
        base_delay_ms: 1000,
        multiplier: 2.0,
        max_delay_ms: 30_000,
    }
}

fn default_stage_retry() -> RetrySettings {
    RetrySettings {
        max_attempts: 3,
        base_delay_ms: 5000,
        multiplier: 3.0,
        max_delay_ms: 120_000,
    }
}

fn default_top_n() -> usize {
    20
}

fn default_pos_boost() -> f64 {
    0.5
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from("data").join("artifacts")
}

fn default_max_input_mb() -> u64 {
    100
}

impl Config {
    /// Validate the configuration for consistency and required values
    pub fn validate(&self) -> Result<()> {
        crate::language_utils::validate_language_code(&self.source_language)?;
        crate::language_utils::validate_language_code(&self.target_language)?;

        let t = &self.translation;
        if t.provider == ProviderKind::OpenAI {
            if t.api_key.trim().is_empty() {
                return Err(anyhow!("Translation API key is required for OpenAI provider"));
            }
            url::Url::parse(&t.endpoint)
                .with_context(|| format!("Invalid translation endpoint: {}", t.endpoint))?;
        }
        if t.worker_count == 0 {
            return Err(anyhow!("translation.worker_count must be at least 1"));
        }
        crate::translation::batch::BatchLimits::from_config(t).validate()?;

        for (name, settings) in [("batch", &self.retry.batch), ("stage", &self.retry.stage)] {
            if settings.max_attempts == 0 {
                return Err(anyhow!("retry.{}.max_attempts must be at least 1", name));
            }
            if settings.multiplier < 1.0 {
                return Err(anyhow!("retry.{}.multiplier must be >= 1.0", name));
            }
        }

        if self.flashcards.top_n == 0 {
            return Err(anyhow!("flashcards.top_n must be at least 1"));
        }
        if self.storage.max_input_mb == 0 {
            return Err(anyhow!("storage.max_input_mb must be at least 1"));
        }

        Ok(())
    }

    /// Load configuration from a JSON file, writing the defaults when it does not exist
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let file = File::open(path)
                .with_context(|| format!("Failed to open config file: {}", path.display()))?;
            let config: Config = serde_json::from_reader(BufReader::new(file))
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            return Ok(config);
        }

        warn!("Config file not found at '{}', creating default config.", path.display());
        let config = Config::default();
        let config_json = serde_json::to_string_pretty(&config)
            .context("Failed to serialize default config to JSON")?;
        std::fs::write(path, config_json)
            .with_context(|| format!("Failed to write default config to file: {}", path.display()))?;
        Ok(config)
    }

    /// Largest accepted input document, in bytes
    pub fn max_input_bytes(&self) -> u64 {
        self.storage.max_input_mb * 1024 * 1024
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            source_language: default_source_language(),
            target_language: default_target_language(),
            translation: TranslationConfig::default(),
            retry: RetryConfig::default(),
            flashcards: FlashcardConfig::default(),
            storage: StorageConfig::default(),
            log_level: LogLevel::default(),
        }
    }
}
