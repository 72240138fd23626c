//! TOML configuration parsing and validation.
//!
//! The whole configuration is read once at startup into a [`Config`] and
//! passed by reference into every command. [`load_config`] checks every
//! required field and cross-field constraint up front, so a bad model name
//! or a zero batch size fails before any repository, store, or network
//! access.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use commit_harness_core::corpus::Corpus;
use commit_harness_core::ids::IdScheme;
use commit_harness_core::prompt::ContextLimits;
use commit_harness_core::ConfigError;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub store: StoreConfig,
    pub repository: RepositoryConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    /// Label → question text. Asked in label order.
    #[serde(default)]
    pub questions: BTreeMap<String, String>,
    #[serde(default)]
    pub logs: LogsConfig,
}

impl Config {
    /// Collection a corpus is written to and queried from.
    pub fn collection_for(&self, corpus: Corpus) -> &str {
        match corpus {
            Corpus::Commits => &self.store.collection_name,
            Corpus::Logs => &self.logs.collection_name,
        }
    }

    /// Questions `chx ask` runs for a corpus when none is given.
    pub fn questions_for(&self, corpus: Corpus) -> &BTreeMap<String, String> {
        match corpus {
            Corpus::Commits => &self.questions,
            Corpus::Logs => &self.logs.questions,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub persist_dir: PathBuf,
    #[serde(default = "default_collection_name")]
    pub collection_name: String,
}

impl StoreConfig {
    /// Path of the SQLite file inside `persist_dir`.
    pub fn db_path(&self) -> PathBuf {
        self.persist_dir.join("commits.sqlite")
    }
}

fn default_collection_name() -> String {
    "git_commits".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RepositoryConfig {
    pub git_repo_dir: PathBuf,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default = "default_no_of_commits")]
    pub no_of_commits: usize,
}

fn default_branch() -> String {
    "main".to_string()
}
fn default_no_of_commits() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// Full URL of the generate endpoint, e.g. `http://localhost:11434/api/generate`.
    pub ollama_url: String,
    pub model_name: String,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    /// Model name → prompt token limit. Replaces the built-in table when set.
    #[serde(default)]
    pub context_limits: Option<BTreeMap<String, usize>>,
}

impl LlmConfig {
    pub fn limits(&self) -> ContextLimits {
        match &self.context_limits {
            Some(map) => ContextLimits::new(map.clone()),
            None => ContextLimits::default(),
        }
    }
}

fn default_llm_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_n_relevant_results")]
    pub n_relevant_results: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            n_relevant_results: default_n_relevant_results(),
        }
    }
}

fn default_n_relevant_results() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Concurrent store writes during ingestion.
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub id_scheme: IdScheme,
    /// Skip re-embedding entries whose id and content hash are already stored.
    #[serde(default = "default_skip_unchanged")]
    pub skip_unchanged: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            id_scheme: IdScheme::default(),
            skip_unchanged: default_skip_unchanged(),
        }
    }
}

fn default_workers() -> usize {
    4
}
fn default_skip_unchanged() -> bool {
    true
}

/// CI build logs, chunked by pipeline stage.
#[derive(Debug, Deserialize, Clone)]
pub struct LogsConfig {
    #[serde(default = "default_log_folder")]
    pub log_folder: PathBuf,
    #[serde(default = "default_log_collection_name")]
    pub collection_name: String,
    /// Files under `log_folder` with this extension are read.
    #[serde(default = "default_log_extension")]
    pub extension: String,
    /// Regex matching the line that starts a stage; group 1 is the stage name.
    #[serde(default = "default_stage_marker")]
    pub stage_marker: String,
    /// Files chunked in parallel.
    #[serde(default = "default_no_of_threads")]
    pub no_of_threads: usize,
    #[serde(default)]
    pub questions: BTreeMap<String, String>,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            log_folder: default_log_folder(),
            collection_name: default_log_collection_name(),
            extension: default_log_extension(),
            stage_marker: default_stage_marker(),
            no_of_threads: default_no_of_threads(),
            questions: BTreeMap::new(),
        }
    }
}

fn default_log_folder() -> PathBuf {
    PathBuf::from("data/logs")
}
fn default_log_collection_name() -> String {
    "jenkins_logs".to_string()
}
fn default_log_extension() -> String {
    "txt".to_string()
}
fn default_stage_marker() -> String {
    r"\[Pipeline\] stage: (.+)".to_string()
}
fn default_no_of_threads() -> usize {
    4
}

impl LogsConfig {
    /// Compile `stage_marker`.
    pub fn marker(&self) -> Result<regex::Regex, ConfigError> {
        let re = regex::Regex::new(&self.stage_marker).map_err(|e| {
            ConfigError::Invalid(format!("logs.stage_marker is not a valid regex: {}", e))
        })?;
        if re.captures_len() < 2 {
            return Err(ConfigError::Invalid(
                "logs.stage_marker must capture the stage name in group 1".to_string(),
            ));
        }
        Ok(re)
    }

    fn validate(&self, store: &StoreConfig) -> Result<(), ConfigError> {
        if self.collection_name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "logs.collection_name must not be empty".to_string(),
            ));
        }
        if self.collection_name == store.collection_name {
            return Err(ConfigError::Invalid(format!(
                "logs.collection_name and store.collection_name are both '{}'",
                self.collection_name
            )));
        }
        if self.no_of_threads == 0 {
            return Err(ConfigError::Invalid(
                "logs.no_of_threads must be >= 1".to_string(),
            ));
        }
        self.marker()?;
        Ok(())
    }
}

impl EmbeddingConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        match self.provider.as_str() {
            "local" | "hashing" => {}
            "ollama" | "openai" => {
                if self.model.is_none() {
                    return Err(ConfigError::Invalid(format!(
                        "embedding.model must be specified when provider is '{}'",
                        self.provider
                    )));
                }
            }
            other => {
                return Err(ConfigError::Invalid(format!(
                    "Unknown embedding provider: '{}'. Must be local, ollama, openai, or hashing.",
                    other
                )))
            }
        }
        if self.provider != "local" && matches!(self.dims, None | Some(0)) {
            return Err(ConfigError::Invalid(format!(
                "embedding.dims must be > 0 when provider is '{}'",
                self.provider
            )));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "embedding.batch_size must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parse and validate a config document.
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config =
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;

    if config.store.collection_name.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "store.collection_name must not be empty".to_string(),
        ));
    }

    if config.repository.branch.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "repository.branch must not be empty".to_string(),
        ));
    }

    config.embedding.validate()?;
    config.logs.validate(&config.store)?;

    if config.retrieval.n_relevant_results == 0 {
        return Err(ConfigError::Invalid(
            "retrieval.n_relevant_results must be >= 1".to_string(),
        ));
    }

    if config.ingest.workers == 0 {
        return Err(ConfigError::Invalid(
            "ingest.workers must be >= 1".to_string(),
        ));
    }

    if config.llm.ollama_url.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "llm.ollama_url must not be empty".to_string(),
        ));
    }

    // The target model must have a prompt budget before anything is sent.
    config.llm.limits().budget_for(&config.llm.model_name)?;

    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    parse_config(&content)
}
