use std::fs;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum CatalogueError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Input is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("Cannot write catalogue to {path}: {reason}")]
    InvalidOutput { path: PathBuf, reason: String },

    #[error("Unreadable header in {path}: {reason}")]
    Header { path: PathBuf, reason: String },

    #[error("Store error: {0}")]
    Store(String),

    #[error("Store format version {found} is not supported (expected {expected})")]
    StoreVersion { found: u32, expected: u32 },

    #[error("Store has no collection named {0}")]
    MissingCollection(String),

    #[error("Unknown selection field: {0}")]
    UnknownField(String),

    #[error("Invalid selection: {0}")]
    InvalidSelection(String),

    #[error("Build cancelled")]
    Cancelled,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CatalogueError {
    /// Returns true for errors raised before any indexing work starts.
    pub fn is_fatal_precondition(&self) -> bool {
        matches!(self, Self::NotADirectory(_) | Self::InvalidOutput { .. })
    }

    /// Returns true for selection errors rejected before the store is opened.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::UnknownField(_) | Self::InvalidSelection(_))
    }
}

pub type Result<T> = std::result::Result<T, CatalogueError>;

/// Canonicalizes a path, returning the original if canonicalization fails.
pub fn canonicalize_existing_path(path: PathBuf) -> PathBuf {
    fs::canonicalize(&path).unwrap_or(path)
}
