//! Entry id derivation.
//!
//! Ids must be deterministic so that re-running ingestion upserts instead of
//! duplicating. Two schemes are supported:
//!
//! | Scheme | Commits | CI log chunks | Stable across different extraction windows |
//! |--------|---------|---------------|--------------------------------------------|
//! | [`IdScheme::Sequence`] | `commit_{index}_{hexsha}` | `log_chunk_{index}` | No |
//! | [`IdScheme::Hash`] | `commit_{hexsha}` | `log_chunk_{key}` | Yes |
//!
//! `Sequence` is the default because existing collections were written with
//! it. A run that extracts the same record at a different position under
//! `Sequence` writes a second entry for it.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::corpus::Corpus;
use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum IdScheme {
    #[default]
    Sequence,
    Hash,
}

impl IdScheme {
    /// Derive the entry id for the record at `index` in this run's
    /// extraction order. `key` is the record's order-independent identity.
    pub fn entry_id(self, corpus: Corpus, index: usize, key: &str) -> String {
        match (self, corpus) {
            (IdScheme::Sequence, Corpus::Commits) => format!("commit_{}_{}", index, key),
            (IdScheme::Sequence, Corpus::Logs) => format!("log_chunk_{}", index),
            (IdScheme::Hash, corpus) => format!("{}_{}", corpus.id_prefix(), key),
        }
    }
}

impl FromStr for IdScheme {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sequence" => Ok(IdScheme::Sequence),
            "hash" => Ok(IdScheme::Hash),
            other => Err(ConfigError::Invalid(format!(
                "ingest.id_scheme must be 'sequence' or 'hash', got '{}'",
                other
            ))),
        }
    }
}

impl TryFrom<String> for IdScheme {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for IdScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdScheme::Sequence => f.write_str("sequence"),
            IdScheme::Hash => f.write_str("hash"),
        }
    }
}
