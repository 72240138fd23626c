//! Question answering over embedded commits and CI logs.
//!
//! For each question:
//!
//! 1. Resolve the prompt budget for the target model. An unknown model is
//!    a configuration error raised before any embedding or LLM call.
//! 2. Embed the question and retrieve the `n_relevant_results` nearest
//!    entries from the corpus' collection. Lookup is read-only: a
//!    collection that was never ingested yields no hits, and one built
//!    with a different vector width is a query error.
//! 3. Join the retrieved documents in ranked order and build the prompt
//!    with the corpus' preamble.
//! 4. Estimate the prompt size; when it exceeds the model limit, log one
//!    warning. The prompt is sent regardless.
//! 5. Send it to the LLM and return its answer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use serde::Serialize;

use commit_harness_core::corpus::Corpus;
use commit_harness_core::embedding::Embedder;
use commit_harness_core::models::{EntryMetadata, SearchHit};
use commit_harness_core::prompt::{
    build_contexts, build_prompt, BudgetCheck, CharHeuristic, ContextLimits, TokenCounter,
};
use commit_harness_core::store::VectorStore;
use commit_harness_core::{ConfigError, EmbeddingError, InferenceError, StoreError};

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::llm::{LanguageModel, OllamaClient};
use crate::sqlite_store::SqliteStore;

/// Why a single question could not be answered.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub question: String,
    pub text: String,
    pub hits: Vec<SearchHit>,
    pub budget: BudgetCheck,
    /// Set when the prompt exceeded the model limit and a warning was logged.
    pub truncation_warned: bool,
}

#[derive(Debug, Clone)]
pub struct QuerySettings {
    pub corpus: Corpus,
    pub collection_name: String,
    pub model_name: String,
    pub n_relevant_results: usize,
    pub limits: ContextLimits,
}

impl QuerySettings {
    pub fn from_config(config: &Config, corpus: Corpus) -> Self {
        Self {
            corpus,
            collection_name: config.collection_for(corpus).to_string(),
            model_name: config.llm.model_name.clone(),
            n_relevant_results: config.retrieval.n_relevant_results,
            limits: config.llm.limits(),
        }
    }
}

pub struct QueryPipeline<'a> {
    embedder: &'a dyn Embedder,
    store: &'a dyn VectorStore,
    llm: &'a dyn LanguageModel,
    settings: QuerySettings,
    counter: Box<dyn TokenCounter>,
}

impl<'a> QueryPipeline<'a> {
    pub fn new(
        embedder: &'a dyn Embedder,
        store: &'a dyn VectorStore,
        llm: &'a dyn LanguageModel,
        settings: QuerySettings,
    ) -> Self {
        Self {
            embedder,
            store,
            llm,
            settings,
            counter: Box::new(CharHeuristic::default()),
        }
    }

    /// Replace the default 4-characters-per-token estimate.
    pub fn with_token_counter(mut self, counter: Box<dyn TokenCounter>) -> Self {
        self.counter = counter;
        self
    }

    /// Embed `question` and return the nearest entries, closest first.
    pub async fn retrieve(&self, question: &str, k: usize) -> Result<Vec<SearchHit>, QueryError> {
        let vector = self.embedder.embed(question).await?;
        search_collection(self.store, &self.settings.collection_name, &vector, k).await
    }

    pub async fn ask(&self, question: &str) -> Result<Answer, QueryError> {
        let budget = self.settings.limits.budget_for(&self.settings.model_name)?;

        let hits = self
            .retrieve(question, self.settings.n_relevant_results)
            .await?;
        if hits.is_empty() {
            tracing::warn!(
                collection = %self.settings.collection_name,
                corpus = %self.settings.corpus,
                "nothing retrieved; has the corpus been ingested?"
            );
        }

        let contexts = build_contexts(&hits);
        let prompt = build_prompt(self.settings.corpus.preamble(), &contexts, question);

        let check = budget.check(&prompt, self.counter.as_ref());
        if check.exceeded {
            tracing::warn!(
                model = %budget.model_name,
                estimated_tokens = check.estimated_tokens,
                limit = check.limit,
                "prompt exceeds the model's context limit and may be truncated"
            );
        }

        let text = self.llm.generate(&budget.model_name, &prompt).await?;

        Ok(Answer {
            question: question.to_string(),
            text,
            hits,
            budget: check,
            truncation_warned: check.exceeded,
        })
    }
}

/// Query an existing collection without creating it.
async fn search_collection(
    store: &dyn VectorStore,
    collection: &str,
    vector: &[f32],
    k: usize,
) -> Result<Vec<SearchHit>, QueryError> {
    match store.open_collection(collection).await? {
        Some(handle) => Ok(store.query(&handle, vector, k).await?),
        None => Ok(Vec::new()),
    }
}

/// Counts from one `chx ask` invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AskSummary {
    pub answered: usize,
    pub failed: usize,
}

/// Run `chx ask`: answer `question`, or every question configured for the
/// corpus in label order.
///
/// An inference failure is reported for its question and the remaining
/// questions still run. Any other failure aborts.
pub async fn run_ask(
    config: &Config,
    corpus: Corpus,
    question: Option<String>,
    stop: Arc<AtomicBool>,
) -> Result<AskSummary> {
    let questions: Vec<String> = match question {
        Some(q) => vec![q],
        None => config.questions_for(corpus).values().cloned().collect(),
    };
    if questions.is_empty() {
        let table = match corpus {
            Corpus::Commits => "[questions]",
            Corpus::Logs => "[logs.questions]",
        };
        bail!("No questions to ask. Pass a question or add a {} table to the config.", table);
    }

    let embedder = create_embedder(&config.embedding)?;
    let store = SqliteStore::open(config).await?;
    let llm = OllamaClient::new(&config.llm)?;
    let pipeline = QueryPipeline::new(
        embedder.as_ref(),
        &store,
        &llm,
        QuerySettings::from_config(config, corpus),
    );

    let mut summary = AskSummary::default();
    let mut result = Ok(());

    for q in &questions {
        if stop.load(Ordering::SeqCst) {
            tracing::warn!("interrupted; remaining questions skipped");
            break;
        }
        println!("Q.: {}", q);
        match pipeline.ask(q).await {
            Ok(answer) => {
                println!(">>ANS: {}\n", answer.text);
                summary.answered += 1;
            }
            Err(QueryError::Inference(e)) => {
                tracing::error!(error = %e, "question failed");
                println!(">>ERR: {}\n", e);
                summary.failed += 1;
            }
            Err(e) => {
                result = Err(e);
                break;
            }
        }
    }

    store.close().await;
    result?;
    Ok(summary)
}

/// Run `chx search`: print the nearest entries without calling the LLM.
pub async fn run_search(
    config: &Config,
    corpus: Corpus,
    query: &str,
    limit: Option<usize>,
    json: bool,
) -> Result<()> {
    let k = limit.unwrap_or(config.retrieval.n_relevant_results);
    if k == 0 {
        bail!("--limit must be at least 1");
    }

    let embedder = create_embedder(&config.embedding)?;
    let store = SqliteStore::open(config).await?;
    let vector = embedder.embed(query).await?;
    let hits = search_collection(&store, config.collection_for(corpus), &vector, k).await;
    store.close().await;
    let hits = hits?;

    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        let subject = hit.document.lines().next().unwrap_or("").trim();
        println!("{}. [{:.4}] {}", i + 1, hit.distance, subject);
        match &hit.metadata {
            EntryMetadata::Commit(m) => {
                println!("    author: {}", m.author);
                println!("    date: {}", m.committed_date);
                println!("    commit: {}", m.hexsha);
            }
            EntryMetadata::LogChunk(m) => {
                println!("    stage: {}", m.stage);
                println!("    source: {}", m.source);
            }
        }
        println!("    id: {}", hit.id);
        println!();
    }

    Ok(())
}
