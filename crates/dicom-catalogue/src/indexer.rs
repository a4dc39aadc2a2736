//! Catalogue indexing.
//!
//! This module runs full rebuilds of a catalogue store:
//! - Walking the input tree for series directories
//! - Extracting one row per series on a bounded worker pool
//! - Committing the rows to the store atomically

mod build;
mod builder;

pub use build::{
    unix_now_secs, zero_to_none, BuildProgress, BuildState, ProgressEvent, ProgressSender,
    ProgressSnapshot, PROGRESS_CHANNEL_CAPACITY,
};
pub use builder::{build, BuildReport, Indexer};
