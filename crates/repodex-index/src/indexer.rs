//! Indexing run orchestrator: scan → plan → decompose → embed → merge → commit.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use repodex_llm::EmbeddingProvider;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::decomposer::decompose;
use crate::embedder::{Embedder, EmbedderConfig};
use crate::error::{IndexError, Result};
use crate::languages::detect_language;
use crate::planner::plan_update;
use crate::scanner::{IgnoreRules, scan};
use crate::snapshot::{Snapshot, SnapshotStore, merge};
use crate::unit::FileRecord;

/// Indexer configuration.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub embedder: EmbedderConfig,
    /// Parallel decomposition tasks.
    pub decompose_workers: usize,
    /// Ignore patterns applied on top of `.gitignore` and `.repodexignore`.
    pub extra_ignore: Vec<String>,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            embedder: EmbedderConfig::default(),
            decompose_workers: default_workers(),
            extra_ignore: Vec::new(),
        }
    }
}

/// Number of available CPUs, or 4 when it cannot be determined.
#[must_use]
pub fn default_workers() -> usize {
    std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get)
}

/// Summary of an indexing run.
#[derive(Debug, Default, Clone)]
pub struct IndexReport {
    pub files_scanned: usize,
    pub files_unchanged: usize,
    pub files_processed: usize,
    /// Files whose content was already indexed under another path.
    pub files_relocated: usize,
    pub files_skipped_empty: usize,
    pub units_created: usize,
    pub units_carried: usize,
    pub rows_removed: usize,
    /// `path: reason` for files that could not be read or parsed.
    pub parse_failures: Vec<String>,
    /// `path:unit: reason` for units dropped after embedding retries.
    pub embedding_failures: Vec<String>,
    pub duration_ms: u64,
}

impl IndexReport {
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.parse_failures.is_empty() || !self.embedding_failures.is_empty()
    }
}

/// Keeps a repository's snapshot in step with its files.
pub struct CodeIndexer<P> {
    store: Mutex<SnapshotStore>,
    embedder: Embedder<P>,
    config: IndexerConfig,
}

impl<P: EmbeddingProvider + 'static> CodeIndexer<P> {
    /// # Errors
    ///
    /// Returns an error if the tokenizer cannot be loaded.
    pub fn new(store: SnapshotStore, provider: Arc<P>, config: IndexerConfig) -> Result<Self> {
        Ok(Self {
            store: Mutex::new(store),
            embedder: Embedder::new(provider, config.embedder.clone())?,
            config,
        })
    }

    /// Open the snapshot at `snapshot_path` and build an indexer around it.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be read or the tokenizer fails.
    pub async fn open(
        snapshot_path: impl Into<PathBuf>,
        provider: Arc<P>,
        config: IndexerConfig,
    ) -> Result<Self> {
        let store = SnapshotStore::open(snapshot_path).await?;
        Self::new(store, provider, config)
    }

    /// Copy of the current snapshot.
    pub async fn snapshot(&self) -> Snapshot {
        self.store.lock().await.snapshot().clone()
    }

    /// Re-read the persisted snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot file cannot be read.
    pub async fn reload(&self) -> Result<()> {
        self.store.lock().await.reload().await.map(|_| ())
    }

    /// Bring the snapshot up to date with the tree under `root`.
    ///
    /// Runs are serialised. Per-file and per-unit failures are collected in the
    /// report; only storage failures and cancellation abort the run, and
    /// neither touches the previous snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the tree cannot be scanned, the run is cancelled,
    /// or the new snapshot cannot be written.
    pub async fn index_project(
        &self,
        root: &Path,
        cancel: &CancellationToken,
    ) -> Result<IndexReport> {
        let start = std::time::Instant::now();
        let mut report = IndexReport::default();
        let mut store = self.store.lock().await;

        let rules = IgnoreRules::load(root, &self.config.extra_ignore)?;
        let scan_root = root.to_path_buf();
        let scanned = tokio::task::spawn_blocking(move || scan(&scan_root, &rules)).await??;
        report.files_scanned = scanned.len();
        tracing::info!(total = scanned.len(), root = %root.display(), "indexing started");

        let previous = store.snapshot();
        let model = self.embedder.model_id();
        let plan = plan_update(&scanned, previous, &model);
        report.files_unchanged = plan.carried_forward.len();
        report.files_skipped_empty = plan.skipped_empty.len();

        let mut relocated = Vec::new();
        let mut to_decompose = Vec::new();
        for mut record in plan.files_to_process.iter().cloned() {
            let reusable = plan
                .reuse_embeddings
                .then(|| previous.embedded_units(&record.checksum))
                .flatten();
            match reusable {
                Some(units) => {
                    tracing::debug!(file = %record.filepath, checksum = %record.checksum, "reusing units of identical content");
                    record.units = units;
                    relocated.push(record);
                }
                None => to_decompose.push(record),
            }
        }
        report.files_relocated = relocated.len();
        report.files_processed = to_decompose.len();

        let decomposed = tokio::select! {
            () = cancel.cancelled() => return Err(IndexError::Cancelled),
            results = self.decompose_all(root, to_decompose) => results?,
        };

        let mut parsed = Vec::with_capacity(decomposed.len());
        for (filepath, outcome) in decomposed {
            match outcome {
                Ok(record) => parsed.push(record),
                Err(e) => {
                    tracing::warn!(file = %filepath, "skipping file: {e}");
                    report.parse_failures.push(format!("{filepath}: {e}"));
                }
            }
        }
        report.parse_failures.sort();

        let outcome = self.embedder.embed_records(parsed, cancel).await?;
        report.embedding_failures = outcome.failures.iter().map(ToString::to_string).collect();
        let incomplete: BTreeSet<(String, String)> = outcome
            .failures
            .iter()
            .map(|f| (f.filepath.clone(), f.file_checksum.clone()))
            .collect();

        let new_rows = Snapshot::from_records(outcome.records.into_iter().chain(relocated).collect()).rows;
        report.units_created = new_rows.len();
        report.units_carried = previous
            .rows
            .iter()
            .filter(|r| {
                plan.carried_forward
                    .contains(&(r.filepath.clone(), r.file_checksum.clone()))
            })
            .count();
        report.rows_removed = previous.len() - report.units_carried;

        let next = merge(previous, &plan.carried_forward, new_rows)
            .with_embedding_model(model)
            .with_incomplete_files(incomplete);

        if cancel.is_cancelled() {
            return Err(IndexError::Cancelled);
        }
        if next != *previous || !tokio::fs::try_exists(store.path()).await? {
            store.commit(next).await?;
        } else {
            tracing::debug!("snapshot unchanged, skipping write");
        }

        report.duration_ms = start.elapsed().as_millis().try_into().unwrap_or(u64::MAX);
        tracing::info!(
            scanned = report.files_scanned,
            unchanged = report.files_unchanged,
            processed = report.files_processed,
            relocated = report.files_relocated,
            created = report.units_created,
            removed = report.rows_removed,
            parse_failures = report.parse_failures.len(),
            embedding_failures = report.embedding_failures.len(),
            duration_ms = report.duration_ms,
            "indexing complete"
        );
        Ok(report)
    }

    /// Decompose files on the blocking pool, at most `decompose_workers` at once.
    async fn decompose_all(
        &self,
        root: &Path,
        records: Vec<FileRecord>,
    ) -> Result<Vec<(String, Result<FileRecord>)>> {
        let workers = self.config.decompose_workers.max(1);
        let tasks = records.into_iter().map(|record| {
            let path = root.join(&record.filepath);
            let filepath = record.filepath.clone();
            async move {
                let outcome = tokio::task::spawn_blocking(move || decompose_file(&path, record)).await;
                (filepath, outcome)
            }
        });

        let joined: Vec<_> = futures::stream::iter(tasks)
            .buffer_unordered(workers)
            .collect()
            .await;

        joined
            .into_iter()
            .map(|(filepath, outcome)| Ok((filepath, outcome?)))
            .collect()
    }
}

fn decompose_file(path: &Path, mut record: FileRecord) -> Result<FileRecord> {
    let lang = detect_language(path).ok_or(IndexError::UnsupportedLanguage)?;
    let source = std::fs::read_to_string(path)?;
    record.units = decompose(&source, &record.filepath, lang)?;
    Ok(record)
}
