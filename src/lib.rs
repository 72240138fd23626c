//! # Commit Harness
//!
//! Embed a repository's commit history, or a folder of CI build logs, into a
//! local vector store and answer questions about it with an LLM.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────────┐
//! │  git log /  │──▶│   Ingest    │──▶│   SQLite     │
//! │  CI logs    │   │ id + embed  │   │ vector store │
//! └─────────────┘   └─────────────┘   └──────┬───────┘
//!                                            │
//!                   ┌─────────────┐   ┌──────▼───────┐
//!                   │  Ollama     │◀──│    Ask       │
//!                   │  generate   │   │ top-k+prompt │
//!                   └─────────────┘   └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! chx init                          # create the store
//! chx ingest                        # embed the configured branch
//! chx search "flaky test fix"       # nearest commits, no LLM
//! chx ask                           # answer every configured question
//! chx ask "Who fixed the login bug?"
//! chx ingest-logs                   # chunk and embed CI logs by stage
//! chx ask --corpus logs "Why did the build fail?"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`connector_git`] | Commit extraction via the git CLI |
//! | [`connector_logs`] | CI log discovery and stage chunking |
//! | [`embedding`] | Embedding backends |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite vector store |
//! | [`ingest`] | Ingestion pipeline |
//! | [`llm`] | LLM inference client |
//! | [`ask`] | Query pipeline, `ask` and `search` commands |
//! | [`stats`] | Store statistics |
//!
//! Pure logic (models, errors, ids, traits, prompt assembly) lives in the
//! `commit-harness-core` crate.

pub mod ask;
pub mod config;
pub mod connector_git;
pub mod connector_logs;
pub mod db;
pub mod embedding;
pub mod ingest;
pub mod llm;
pub mod logging;
pub mod migrate;
pub mod sqlite_store;
pub mod stats;
