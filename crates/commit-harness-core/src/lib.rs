//! # Commit Harness Core
//!
//! Runtime-agnostic logic for Commit Harness: commit, CI log and index
//! models, the typed error taxonomy, entry id derivation, the embedder and
//! vector store traits, an in-memory store, and prompt assembly with budget
//! checks.
//!
//! This crate contains no tokio, sqlx, process spawning, or network code.
//! Concrete backends (git, SQLite, Ollama, fastembed) live in the
//! `commit-harness` application crate.

pub mod corpus;
pub mod embedding;
pub mod error;
pub mod ids;
pub mod models;
pub mod prompt;
pub mod store;

pub use error::{ConfigError, EmbeddingError, InferenceError, RepositoryError, StoreError};
