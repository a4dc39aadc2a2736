//! Selection and retrieval of catalogue rows.
//!
//! This module provides:
//! - Validated selections (field → substring lists)
//! - Per-field substring matching
//! - Canonical row ordering
//! - Sibling expansion from direct hits to whole studies
//! - Patient → study → series grouping of results

mod engine;
mod matcher;
mod order;
mod selection;
mod tree;

pub use engine::{expand_selection, QueryEngine, SelectOptions, SelectionResult};
pub use matcher::{matches_all, FieldMatcher};
pub use order::{canonical_cmp, sort_canonical, CANONICAL_ORDER};
pub use selection::Selection;
pub use tree::{CatalogueTree, PatientNode, SeriesNode, StudyNode};
