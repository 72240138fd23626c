//! Prompt assembly and prompt-size budgeting.
//!
//! A prompt is a per-corpus preamble, the retrieved documents joined by
//! [`CONTEXT_DELIMITER`] in ranked order, and the literal question. Its size
//! is estimated with a pluggable [`TokenCounter`] and compared against the
//! target model's limit. Exceeding the limit is advisory: the prompt is
//! still sent.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::ConfigError;
use crate::models::SearchHit;

/// Separator placed between retrieved documents.
pub const CONTEXT_DELIMITER: &str = "\n-----------\n";

pub const GIT_PREAMBLE: &str =
    "You are a world class expert at analyzing git logs. Use the logs below to answer the question.";

pub const CI_LOG_PREAMBLE: &str =
    "You are a world class expert at analyzing Jenkins CI logs.\nUse the logs below to answer the question.";

/// Join retrieved documents in ranked order.
pub fn build_contexts(hits: &[SearchHit]) -> String {
    hits.iter()
        .map(|h| h.document.as_str())
        .collect::<Vec<_>>()
        .join(CONTEXT_DELIMITER)
}

/// Build the full prompt sent to the LLM.
pub fn build_prompt(preamble: &str, contexts: &str, question: &str) -> String {
    format!(
        "{}\n\nLogs:\n{}\n\nQuestion: {}\n",
        preamble, contexts, question
    )
}

/// Estimates how many tokens a text occupies for some model family.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// Coarse estimate: one token per `chars_per_token` characters, rounded down.
#[derive(Debug, Clone, Copy)]
pub struct CharHeuristic {
    pub chars_per_token: usize,
}

impl Default for CharHeuristic {
    fn default() -> Self {
        Self { chars_per_token: 4 }
    }
}

impl TokenCounter for CharHeuristic {
    fn count(&self, text: &str) -> usize {
        text.chars().count() / self.chars_per_token.max(1)
    }
}

/// Token limits keyed by model name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextLimits(BTreeMap<String, usize>);

impl ContextLimits {
    pub fn new(limits: BTreeMap<String, usize>) -> Self {
        Self(limits)
    }

    /// Resolve the budget for `model_name`, failing for unknown models.
    pub fn budget_for(&self, model_name: &str) -> Result<PromptBudget, ConfigError> {
        match self.0.get(model_name) {
            Some(&max_tokens) => Ok(PromptBudget {
                model_name: model_name.to_string(),
                max_tokens,
            }),
            None => Err(ConfigError::UnknownModel {
                model: model_name.to_string(),
                known: self.0.keys().cloned().collect::<Vec<_>>().join(", "),
            }),
        }
    }

    pub fn as_map(&self) -> &BTreeMap<String, usize> {
        &self.0
    }
}

impl Default for ContextLimits {
    fn default() -> Self {
        let limits = [
            ("llama3", 8000),
            ("llama2", 4000),
            ("mistral", 8000),
            ("gemma", 8000),
            ("phi3", 4000),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        Self(limits)
    }
}

/// Prompt-size policy for one model, recomputed per query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptBudget {
    pub model_name: String,
    pub max_tokens: usize,
}

/// Outcome of checking a prompt against its budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BudgetCheck {
    pub estimated_tokens: usize,
    pub limit: usize,
    pub exceeded: bool,
}

impl PromptBudget {
    pub fn check(&self, prompt: &str, counter: &dyn TokenCounter) -> BudgetCheck {
        let estimated_tokens = counter.count(prompt);
        BudgetCheck {
            estimated_tokens,
            limit: self.max_tokens,
            exceeded: estimated_tokens > self.max_tokens,
        }
    }
}
