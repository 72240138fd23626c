//! Error taxonomy shared by every pipeline stage.
//!
//! Each boundary owns one error type so callers can decide policy per stage:
//! repository failures abort an ingestion run, embedding and store-write
//! failures are collected per record, inference failures are fatal only for
//! the question being answered, and configuration errors surface before any
//! network call is made.

/// Reading commit history failed.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Not a git repository: {path}")]
    NotARepository { path: String },

    #[error("Branch '{branch}' does not exist in {path}")]
    UnknownBranch { branch: String, path: String },

    #[error("Failed to execute git: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("git {command} failed: {stderr}")]
    Git { command: String, stderr: String },

    #[error("Malformed git log record: {0}")]
    Parse(String),
}

/// The embedding backend could not produce vectors.
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Embedding backend is not initialized: {0}")]
    NotInitialized(String),

    #[error("Embedding backend failed: {0}")]
    Backend(String),

    #[error("Embedding batch size mismatch: sent {expected} texts, received {actual} vectors")]
    BatchMismatch { expected: usize, actual: usize },

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// A vector store operation failed.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store write failed: {0}")]
    Write(String),

    #[error("Store query failed: {0}")]
    Query(String),
}

/// The LLM endpoint could not be reached or rejected the request.
#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("LLM endpoint unreachable at {url}: {message}")]
    Transport { url: String, message: String },

    #[error("LLM endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("LLM endpoint returned an unreadable body: {0}")]
    Decode(String),
}

/// Configuration is missing, malformed, or inconsistent.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Model '{model}' has no entry in llm.context_limits (known: {known})")]
    UnknownModel { model: String, known: String },
}
