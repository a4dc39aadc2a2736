//! Series discovery: finds every directory that directly holds imaging files.
//!
//! The walk is partitioned at the top-level subdirectories of the input root;
//! each partition is walked depth-first on one worker of the build pool and
//! the per-partition groups are merged by relative path afterwards.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use rayon::ThreadPool;

use crate::cancel::CancellationToken;
use crate::config::CatalogueConfig;
use crate::error::{CatalogueError, Result};
use crate::indexer::BuildProgress;
use crate::types::SeriesDirectory;

type Groups = BTreeMap<PathBuf, Vec<String>>;

/// Data shared by all discovery workers.
#[derive(Debug)]
pub struct WalkData<'a> {
    /// Root path being indexed.
    pub root_path: &'a Path,
    /// Decides which filenames are imaging files.
    pub config: &'a CatalogueConfig,
    /// Cancellation flag (checked at every directory).
    pub cancel: Option<&'a CancellationToken>,
    /// Optional progress tracker.
    pub progress: Option<&'a BuildProgress>,
    /// Directories that could not be read and were skipped.
    pub unreadable_dirs: AtomicUsize,
}

impl<'a> WalkData<'a> {
    pub fn new(root_path: &'a Path, config: &'a CatalogueConfig) -> Self {
        Self {
            root_path,
            config,
            cancel: None,
            progress: None,
            unreadable_dirs: AtomicUsize::new(0),
        }
    }

    pub fn with_cancel(mut self, cancel: &'a CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_progress(mut self, progress: &'a BuildProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.map(|c| c.is_cancelled()).unwrap_or(false)
    }

    fn relative(&self, path: &Path) -> PathBuf {
        path.strip_prefix(self.root_path)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

/// Discovers all series directories below `walk_data.root_path`.
///
/// Fails with [`CatalogueError::NotADirectory`] before any work when the root
/// is not a directory, and with [`CatalogueError::Cancelled`] when the token
/// fires mid-walk. Unreadable subdirectories are skipped.
pub fn discover_series(walk_data: &WalkData, pool: &ThreadPool) -> Result<Vec<SeriesDirectory>> {
    let root = walk_data.root_path;
    if !fs::metadata(root).map(|m| m.is_dir()).unwrap_or(false) {
        return Err(CatalogueError::NotADirectory(root.to_path_buf()));
    }

    let (root_files, partitions) = read_directory(root, walk_data)
        .ok_or_else(|| CatalogueError::NotADirectory(root.to_path_buf()))?;

    let mut groups = Groups::new();
    if !root_files.is_empty() {
        groups.insert(PathBuf::new(), root_files);
    }

    let partition_groups = pool.install(|| {
        partitions
            .par_iter()
            .map(|dir| walk_partition(dir, walk_data))
            .reduce(Groups::new, merge_groups)
    });

    if walk_data.is_cancelled() {
        return Err(CatalogueError::Cancelled);
    }

    let groups = merge_groups(groups, partition_groups);
    let unreadable = walk_data.unreadable_dirs.load(Ordering::Relaxed);
    tracing::info!(
        "discovered {} series directories under {} ({} unreadable directories skipped)",
        groups.len(),
        root.display(),
        unreadable
    );

    Ok(groups
        .into_iter()
        .map(|(relative, mut files)| {
            files.sort_unstable();
            files.dedup();
            SeriesDirectory { relative, files }
        })
        .collect())
}

/// Walks one top-level partition with an explicit stack, so depth is bounded
/// only by memory.
fn walk_partition(start: &Path, walk_data: &WalkData) -> Groups {
    let mut groups = Groups::new();
    let mut pending = vec![start.to_path_buf()];

    while let Some(dir) = pending.pop() {
        if walk_data.is_cancelled() {
            break;
        }
        let Some((files, subdirs)) = read_directory(&dir, walk_data) else {
            continue;
        };
        if !files.is_empty() {
            groups
                .entry(walk_data.relative(&dir))
                .or_default()
                .extend(files);
        }
        pending.extend(subdirs);
    }

    groups
}

/// Reads one directory, returning its imaging filenames and its subdirectories.
///
/// Returns `None` (and counts the directory as unreadable) when it cannot be listed.
fn read_directory(dir: &Path, walk_data: &WalkData) -> Option<(Vec<String>, Vec<PathBuf>)> {
    let read_dir = match fs::read_dir(dir) {
        Ok(iter) => iter,
        Err(error) => {
            walk_data.unreadable_dirs.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("skipping unreadable directory {}: {}", dir.display(), error);
            return None;
        }
    };

    if let Some(progress) = walk_data.progress {
        progress.scanned_dirs.fetch_add(1, Ordering::Relaxed);
    }

    let mut files = Vec::new();
    let mut subdirs = Vec::new();
    for entry in read_dir.filter_map(std::result::Result::ok) {
        // Symlinked directories are not followed.
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            subdirs.push(entry.path());
            continue;
        }
        let is_file = file_type.is_file()
            || (file_type.is_symlink() && entry.path().is_file());
        if !is_file {
            continue;
        }
        if let Some(progress) = walk_data.progress {
            progress.scanned_files.fetch_add(1, Ordering::Relaxed);
        }
        // Names that are not UTF-8 cannot be stored or reopened from the catalogue.
        let name = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(raw) => {
                tracing::debug!(
                    "skipping non UTF-8 file name {} in {}",
                    raw.to_string_lossy(),
                    dir.display()
                );
                continue;
            }
        };
        if walk_data.config.is_imaging_file(&name) {
            files.push(name);
        }
    }

    Some((files, subdirs))
}

fn merge_groups(mut left: Groups, right: Groups) -> Groups {
    for (path, files) in right {
        left.entry(path).or_default().extend(files);
    }
    left
}
