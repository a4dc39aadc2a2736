//! Imaging series catalogue: indexing and querying.
//!
//! This crate provides:
//! - Parallel discovery of series directories in nested imaging trees
//! - Per-series header extraction with an ordered reader fallback
//! - Atomic, compressed catalogue stores
//! - Substring selections with sibling expansion to whole studies

pub mod cancel;
pub mod config;
pub mod discovery;
pub mod error;
pub mod extract;
pub mod indexer;
pub mod query;
pub mod store;
pub mod tags;
pub mod types;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

// Re-export main types
pub use cancel::CancellationToken;
pub use config::{load_config, write_config, CatalogueConfig, FileNaming};
pub use error::{CatalogueError, Result};
pub use extract::{Extractor, HeaderReader, SeriesOutcome};
pub use indexer::{
    build, BuildProgress, BuildReport, Indexer, ProgressEvent, ProgressSender, ProgressSnapshot,
};
pub use query::{CatalogueTree, QueryEngine, SelectOptions, Selection, SelectionResult};
pub use store::{read_provenance, read_store, Catalogue};
pub use tags::TagTable;
pub use types::{FieldValue, IndexRow, ProvenanceRecord, SeriesDirectory};

/// All rows of `store` in canonical order, using the built-in tag table.
pub fn select_all(store: &Path) -> Result<Vec<IndexRow>> {
    QueryEngine::new(Arc::new(TagTable::standard())).select_all(store)
}

/// Runs a `field → "v1,v2"` selection against `store` with the built-in tag
/// table. Unknown fields fail before the store is opened.
pub fn select(store: &Path, criteria: &BTreeMap<String, String>) -> Result<SelectionResult> {
    let engine = QueryEngine::new(Arc::new(TagTable::standard()));
    let selection = engine.selection(criteria)?;
    engine.select(store, &selection)
}
