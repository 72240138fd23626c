//! Ingestion pipeline.
//!
//! Extraction → id assignment → embedding → upsert, as one operation that is
//! safe to re-run over overlapping ranges. Commits and CI log chunks share
//! it through the [`SourceRecord`] trait:
//!
//! 1. Read records from the source (`git log` newest first, or log files
//!    chunked by stage). A failure here aborts the run before anything is
//!    written.
//! 2. Derive each entry id from its position and key (see [`IdScheme`]).
//! 3. With `skip_unchanged`, drop entries whose id is already stored with
//!    the same content hash.
//! 4. Embed the remaining texts batch by batch. Calls are serialised; a
//!    failed batch marks its records failed and the run moves on.
//! 5. Upsert one entry per call through a bounded pool of `workers`
//!    concurrent writes. Each write is atomic on its own.
//!
//! The stop flag is checked between records. Records not started when it
//! is raised are reported as interrupted; nothing is half-written. The
//! report lists every id by outcome, so after a partial run the caller
//! knows exactly which entries are in the store.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use serde::Serialize;

use commit_harness_core::corpus::Corpus;
use commit_harness_core::embedding::Embedder;
use commit_harness_core::ids::IdScheme;
use commit_harness_core::models::{content_hash, CollectionHandle, IndexEntry, SourceRecord};
use commit_harness_core::store::VectorStore;
use commit_harness_core::StoreError;

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::sqlite_store::SqliteStore;
use crate::{connector_git, connector_logs};

/// Pipeline stage at which a record failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    Embedding,
    Store,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordFailure {
    pub id: String,
    /// Commit hash or log chunk key.
    pub key: String,
    pub stage: FailureStage,
    pub error: String,
}

/// Partial-success result of one ingestion run, by entry id.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub extracted: usize,
    /// Upserted in this run.
    pub written: Vec<String>,
    /// Already stored with the same content hash.
    pub skipped: Vec<String>,
    pub failed: Vec<RecordFailure>,
    /// Not attempted because the stop flag was raised.
    pub interrupted: Vec<String>,
}

impl IngestReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.interrupted.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub collection_name: String,
    pub id_scheme: IdScheme,
    pub batch_size: usize,
    pub workers: usize,
    pub skip_unchanged: bool,
}

impl IngestOptions {
    pub fn from_config(config: &Config, corpus: Corpus) -> Self {
        Self {
            collection_name: config.collection_for(corpus).to_string(),
            id_scheme: config.ingest.id_scheme,
            batch_size: config.embedding.batch_size,
            workers: config.ingest.workers,
            skip_unchanged: config.ingest.skip_unchanged,
        }
    }
}

/// One record on its way into the store.
struct Pending<'r, R> {
    id: String,
    hash: String,
    record: &'r R,
}

enum WriteOutcome {
    Written(String),
    Failed(RecordFailure),
    Interrupted(String),
}

pub struct IngestPipeline<'a> {
    embedder: &'a dyn Embedder,
    store: &'a dyn VectorStore,
    options: IngestOptions,
    stop: Arc<AtomicBool>,
}

impl<'a> IngestPipeline<'a> {
    pub fn new(embedder: &'a dyn Embedder, store: &'a dyn VectorStore, options: IngestOptions) -> Self {
        Self {
            embedder,
            store,
            options,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share an externally owned stop flag (e.g. one raised by Ctrl-C).
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Ingest already-extracted records, in the order given.
    ///
    /// Only collection setup and the unchanged-entry lookup are fatal;
    /// per-record embedding and write failures land in the report.
    pub async fn ingest<R: SourceRecord>(&self, records: &[R]) -> Result<IngestReport, StoreError> {
        let handle = self
            .store
            .ensure_collection(&self.options.collection_name, self.embedder.dims())
            .await?;

        let mut report = IngestReport {
            extracted: records.len(),
            ..Default::default()
        };

        let model = self.embedder.model_name();
        let planned: Vec<Pending<R>> = records
            .iter()
            .enumerate()
            .map(|(index, record)| Pending {
                id: self.options.id_scheme.entry_id(R::CORPUS, index, &record.key()),
                hash: content_hash(model, record.text()),
                record,
            })
            .collect();

        let pending = if self.options.skip_unchanged && !planned.is_empty() {
            let ids: Vec<String> = planned.iter().map(|p| p.id.clone()).collect();
            let stored = self.store.content_hashes(&handle, &ids).await?;
            let (unchanged, changed): (Vec<Pending<R>>, Vec<Pending<R>>) = planned
                .into_iter()
                .partition(|p| stored.get(&p.id) == Some(&p.hash));
            report.skipped = unchanged.into_iter().map(|p| p.id).collect();
            changed
        } else {
            planned
        };

        if !report.skipped.is_empty() {
            tracing::info!(skipped = report.skipped.len(), "unchanged records skipped");
        }

        let batch_size = self.options.batch_size.max(1);
        let total_batches = pending.len().div_ceil(batch_size);

        for (batch_no, batch) in pending.chunks(batch_size).enumerate() {
            if self.stopped() {
                report.interrupted.extend(
                    pending[batch_no * batch_size..]
                        .iter()
                        .map(|p| p.id.clone()),
                );
                tracing::warn!(
                    remaining = report.interrupted.len(),
                    "ingestion interrupted; remaining records not written"
                );
                break;
            }

            tracing::debug!(batch = batch_no + 1, total_batches, size = batch.len(), "embedding batch");

            let texts: Vec<String> = batch.iter().map(|p| p.record.text().to_string()).collect();
            let vectors = match self.embedder.embed_many(&texts).await {
                Ok(v) => v,
                Err(e) => {
                    tracing::error!(batch = batch_no + 1, error = %e, "embedding batch failed");
                    report.failed.extend(batch.iter().map(|p| RecordFailure {
                        id: p.id.clone(),
                        key: p.record.key(),
                        stage: FailureStage::Embedding,
                        error: e.to_string(),
                    }));
                    continue;
                }
            };

            let entries: Vec<(IndexEntry, String)> = batch
                .iter()
                .zip(vectors)
                .map(|(p, embedding)| {
                    let entry = IndexEntry {
                        id: p.id.clone(),
                        document: p.record.text().to_string(),
                        embedding,
                        metadata: p.record.metadata(),
                        content_hash: p.hash.clone(),
                    };
                    (entry, p.record.key())
                })
                .collect();

            for outcome in self.write_entries(&handle, entries).await {
                match outcome {
                    WriteOutcome::Written(id) => report.written.push(id),
                    WriteOutcome::Failed(f) => {
                        tracing::error!(id = %f.id, error = %f.error, "store write failed");
                        report.failed.push(f);
                    }
                    WriteOutcome::Interrupted(id) => report.interrupted.push(id),
                }
            }
        }

        tracing::info!(
            extracted = report.extracted,
            written = report.written.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            interrupted = report.interrupted.len(),
            "ingestion finished"
        );
        Ok(report)
    }

    /// Upsert entries one per call, at most `workers` in flight.
    async fn write_entries(
        &self,
        handle: &CollectionHandle,
        entries: Vec<(IndexEntry, String)>,
    ) -> Vec<WriteOutcome> {
        stream::iter(entries)
            .map(|(entry, key)| async move {
                if self.stopped() {
                    return WriteOutcome::Interrupted(entry.id);
                }
                let result = self.store.upsert(handle, std::slice::from_ref(&entry)).await;
                match result {
                    Ok(()) => WriteOutcome::Written(entry.id),
                    Err(e) => WriteOutcome::Failed(RecordFailure {
                        id: entry.id,
                        key,
                        stage: FailureStage::Store,
                        error: e.to_string(),
                    }),
                }
            })
            .buffered(self.options.workers.max(1))
            .collect()
            .await
    }
}

/// Command-line overrides for `chx ingest`.
#[derive(Debug, Clone, Default)]
pub struct IngestArgs {
    pub repo: Option<PathBuf>,
    pub branch: Option<String>,
    pub max_count: Option<usize>,
    pub dry_run: bool,
}

/// Run `chx ingest`: extract commits from the configured repository and
/// write them into the SQLite store.
pub async fn run_ingest(
    config: &Config,
    args: &IngestArgs,
    stop: Arc<AtomicBool>,
) -> Result<IngestReport> {
    let repo = args
        .repo
        .clone()
        .unwrap_or_else(|| config.repository.git_repo_dir.clone());
    let branch = args
        .branch
        .clone()
        .unwrap_or_else(|| config.repository.branch.clone());
    let max_count = args.max_count.unwrap_or(config.repository.no_of_commits);

    let records = connector_git::extract_commits(&repo, &branch, max_count)
        .with_context(|| format!("Failed to read commits from {}", repo.display()))?;
    tracing::info!(count = records.len(), branch = %branch, "commits extracted");

    let options = IngestOptions::from_config(config, Corpus::Commits);

    if args.dry_run {
        println!("ingest {} (dry-run)", branch);
        println!("  commits found: {}", records.len());
        for (index, record) in records.iter().enumerate() {
            let subject = record.message.lines().next().unwrap_or("").trim();
            println!(
                "  {}  {}  {}  {}",
                options.id_scheme.entry_id(Corpus::Commits, index, &record.hexsha),
                record.committed_date(),
                record.author,
                subject
            );
        }
        return Ok(IngestReport {
            extracted: records.len(),
            ..Default::default()
        });
    }

    let report = write_records(config, options, &records, stop).await?;
    print_report(&format!("ingest {}", branch), config.collection_for(Corpus::Commits), &report);
    Ok(report)
}

/// Command-line overrides for `chx ingest-logs`.
#[derive(Debug, Clone, Default)]
pub struct LogIngestArgs {
    pub dir: Option<PathBuf>,
    pub dry_run: bool,
}

/// Run `chx ingest-logs`: chunk the configured CI logs by stage and write
/// the chunks into the SQLite store.
pub async fn run_ingest_logs(
    config: &Config,
    args: &LogIngestArgs,
    stop: Arc<AtomicBool>,
) -> Result<IngestReport> {
    let dir = args
        .dir
        .clone()
        .unwrap_or_else(|| config.logs.log_folder.clone());
    let marker = config.logs.marker()?;

    let chunks = connector_logs::chunk_all_logs(
        &dir,
        &config.logs.extension,
        &marker,
        config.logs.no_of_threads,
    )
    .await
    .with_context(|| format!("Failed to read logs from {}", dir.display()))?;

    let options = IngestOptions::from_config(config, Corpus::Logs);

    if args.dry_run {
        println!("ingest-logs {} (dry-run)", dir.display());
        println!("  chunks found: {}", chunks.len());
        for (index, chunk) in chunks.iter().enumerate() {
            println!(
                "  {}  {}  {}  ({} lines)",
                options.id_scheme.entry_id(Corpus::Logs, index, &chunk.key()),
                chunk.source,
                chunk.stage,
                chunk.text.lines().count()
            );
        }
        return Ok(IngestReport {
            extracted: chunks.len(),
            ..Default::default()
        });
    }

    let report = write_records(config, options, &chunks, stop).await?;
    print_report(
        &format!("ingest-logs {}", dir.display()),
        config.collection_for(Corpus::Logs),
        &report,
    );
    Ok(report)
}

async fn write_records<R: SourceRecord>(
    config: &Config,
    options: IngestOptions,
    records: &[R],
    stop: Arc<AtomicBool>,
) -> Result<IngestReport> {
    let embedder = create_embedder(&config.embedding)?;
    let store = SqliteStore::open(config).await?;

    let pipeline = IngestPipeline::new(embedder.as_ref(), &store, options).with_stop_flag(stop);
    let report = pipeline.ingest(records).await;
    store.close().await;
    Ok(report?)
}

fn print_report(title: &str, collection: &str, report: &IngestReport) {
    println!("{}", title);
    println!("  collection: {}", collection);
    println!("  extracted: {}", report.extracted);
    println!("  written: {}", report.written.len());
    println!("  skipped (unchanged): {}", report.skipped.len());
    println!("  failed: {}", report.failed.len());
    for f in &report.failed {
        println!("    {} [{}] {}", f.id, stage_label(f.stage), f.error);
    }
    if !report.interrupted.is_empty() {
        println!("  interrupted: {}", report.interrupted.len());
        for id in &report.interrupted {
            println!("    {}", id);
        }
    }
    if report.is_complete() {
        println!("ok");
    }
}

fn stage_label(stage: FailureStage) -> &'static str {
    match stage {
        FailureStage::Embedding => "embedding",
        FailureStage::Store => "store",
    }
}
