//! The kinds of text Commit Harness indexes.
//!
//! Both corpora go through the same ingestion and query pipelines; they
//! differ only in how entry ids are spelled and in the prompt preamble.

use std::fmt;

use crate::prompt::{CI_LOG_PREAMBLE, GIT_PREAMBLE};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Corpus {
    /// Commit messages from `git log`.
    #[default]
    Commits,
    /// CI build logs, one entry per pipeline stage.
    Logs,
}

impl Corpus {
    pub fn id_prefix(self) -> &'static str {
        match self {
            Corpus::Commits => "commit",
            Corpus::Logs => "log_chunk",
        }
    }

    /// First lines of every prompt built from this corpus.
    pub fn preamble(self) -> &'static str {
        match self {
            Corpus::Commits => GIT_PREAMBLE,
            Corpus::Logs => CI_LOG_PREAMBLE,
        }
    }
}

impl fmt::Display for Corpus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Corpus::Commits => f.write_str("commits"),
            Corpus::Logs => f.write_str("logs"),
        }
    }
}
