//! The index build pipeline: discovery, barrier, extraction, store commit.

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use super::build::{unix_now_secs, BuildProgress, BuildState, ProgressSender};
use crate::cancel::CancellationToken;
use crate::config::CatalogueConfig;
use crate::discovery::{discover_series, WalkData};
use crate::error::{canonicalize_existing_path, CatalogueError, Result};
use crate::extract::{Extractor, HeaderReader, SeriesOutcome};
use crate::store::StagedStore;
use crate::tags::TagTable;
use crate::types::{IndexRow, ProvenanceRecord, SeriesDirectory};

/// Summary of a finished build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    /// Rows written to the store.
    pub rows: usize,
    /// Relative paths of series excluded because no reader could parse them.
    pub skipped: Vec<String>,
    /// Series directories found by discovery.
    pub series_dirs: usize,
    pub store_path: PathBuf,
}

/// Builds catalogue stores. One instance can run any number of builds, one
/// at a time.
#[derive(Debug)]
pub struct Indexer {
    config: CatalogueConfig,
    extractor: Extractor,
    progress: Arc<BuildProgress>,
    sender: Option<ProgressSender>,
    cancel: CancellationToken,
}

impl Indexer {
    pub fn new(config: CatalogueConfig, tags: Arc<TagTable>) -> Self {
        Self {
            config,
            extractor: Extractor::new(tags),
            progress: Arc::new(BuildProgress::default()),
            sender: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Creates an indexer using the tag table named by `config`.
    pub fn from_config(config: CatalogueConfig) -> Result<Self> {
        let tags = config.load_tag_table()?;
        Ok(Self::new(config, tags))
    }

    /// Replaces the header reader chain.
    pub fn with_readers(mut self, readers: Vec<Box<dyn HeaderReader>>) -> Self {
        self.extractor = self.extractor.with_readers(readers);
        self
    }

    pub fn with_progress_sender(mut self, sender: ProgressSender) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Shared progress counters, readable while a build runs.
    pub fn progress(&self) -> Arc<BuildProgress> {
        Arc::clone(&self.progress)
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn tags(&self) -> &TagTable {
        self.extractor.tags()
    }

    /// Runs a full rebuild of `input` into the store at `output`.
    ///
    /// Preconditions are checked before any directory is walked. The store
    /// is replaced only when every series was processed; a failed or
    /// cancelled build leaves an existing store untouched.
    pub fn build(&self, input: &Path, output: &Path) -> Result<BuildReport> {
        self.progress.reset_for_build(unix_now_secs());
        let result = self.run(input, output);
        match &result {
            Ok(_) => self.progress.set_state(BuildState::Finished),
            Err(error) => {
                self.progress.set_state(BuildState::Failed);
                tracing::warn!("catalogue build of {} failed: {}", input.display(), error);
            }
        }
        self.progress
            .finished_at
            .store(unix_now_secs(), Ordering::Relaxed);
        result
    }

    fn run(&self, input: &Path, output: &Path) -> Result<BuildReport> {
        if !input.is_dir() {
            return Err(CatalogueError::NotADirectory(input.to_path_buf()));
        }
        let input = canonicalize_existing_path(input.to_path_buf());
        let staged = StagedStore::stage(output)?;
        let pool = self.build_pool()?;

        self.progress.set_state(BuildState::Discovering);
        let walk_data = WalkData::new(&input, &self.config)
            .with_cancel(&self.cancel)
            .with_progress(&self.progress);
        let series = discover_series(&walk_data, &pool)?;

        // Barrier: extraction starts only once the full set is known.
        let total = series.len();
        self.progress.series_dirs.store(total, Ordering::Relaxed);
        if let Some(sender) = &self.sender {
            sender.discovered(total);
        }

        self.progress.set_state(BuildState::Extracting);
        let outcomes = self.extract_all(&input, &series, &pool);
        self.cancel.check()?;

        let mut rows: Vec<IndexRow> = Vec::with_capacity(total);
        let mut skipped = Vec::new();
        for outcome in outcomes.into_iter().flatten() {
            match outcome {
                SeriesOutcome::Indexed(row) => rows.push(row),
                SeriesOutcome::Invalid { path, reason } => {
                    tracing::warn!("skipping series {}: {}", path, reason);
                    skipped.push(path);
                }
            }
        }

        self.progress.set_state(BuildState::Writing);
        let provenance = ProvenanceRecord {
            input_path: input.clone(),
        };
        staged.commit(&provenance, &rows, self.extractor.tags())?;

        tracing::info!(
            "indexed {} series from {} into {} ({} skipped)",
            rows.len(),
            input.display(),
            output.display(),
            skipped.len()
        );
        if let Some(sender) = &self.sender {
            sender.finished(rows.len(), skipped.len());
        }

        Ok(BuildReport {
            rows: rows.len(),
            skipped,
            series_dirs: total,
            store_path: output.to_path_buf(),
        })
    }

    /// Extracts every series on the pool. Series not started before
    /// cancellation come back as `None`.
    fn extract_all(
        &self,
        input: &Path,
        series: &[SeriesDirectory],
        pool: &ThreadPool,
    ) -> Vec<Option<SeriesOutcome>> {
        let total = series.len();
        pool.install(|| {
            series
                .par_iter()
                .map(|directory| {
                    self.cancel.active()?;
                    let outcome = self.extractor.extract(input, directory);
                    if matches!(outcome, SeriesOutcome::Invalid { .. }) {
                        self.progress.skipped.fetch_add(1, Ordering::Relaxed);
                    }
                    self.progress.extracted.fetch_add(1, Ordering::Relaxed);
                    if let Some(sender) = &self.sender {
                        sender.extracted_one(total);
                    }
                    Some(outcome)
                })
                .collect()
        })
    }

    fn build_pool(&self) -> Result<ThreadPool> {
        let threads = self.config.worker_count();
        ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|index| format!("catalogue-worker-{index}"))
            .build()
            .map_err(|error| {
                CatalogueError::Internal(format!(
                    "failed to build worker pool with {threads} threads: {error}"
                ))
            })
    }
}

/// Builds a store at `output` from `input` with the default configuration
/// and the built-in tag table. Returns the number of rows written.
pub fn build(input: &Path, output: &Path) -> Result<usize> {
    Indexer::new(CatalogueConfig::default(), Arc::new(TagTable::standard()))
        .build(input, output)
        .map(|report| report.rows)
}
