//! Core row and record types shared by the indexer, the store, and the query engine.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::tags::{PATIENT_ID, SERIES_INSTANCE_UID, STUDY_INSTANCE_UID};

/// Column holding the series directory relative to the input root.
pub const PATH_COLUMN: &str = "Path";
/// Column holding the representative sample filename.
pub const SAMPLE_COLUMN: &str = "Sample";
/// Column holding the number of imaging files in the series.
pub const SERIES_LENGTH_COLUMN: &str = "SeriesLength";

/// Columns every index row carries in addition to the tag fields.
pub const SYNTHETIC_COLUMNS: [&str; 3] = [PATH_COLUMN, SAMPLE_COLUMN, SERIES_LENGTH_COLUMN];

/// A single non-null cell value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FieldValue {
    Text(String),
    Date(NaiveDate),
    Count(u64),
}

impl FieldValue {
    /// Text form used for substring matching and display.
    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            Self::Text(value) => Cow::Borrowed(value.as_str()),
            Self::Date(date) => Cow::Owned(date.format("%Y-%m-%d").to_string()),
            Self::Count(count) => Cow::Owned(count.to_string()),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_text())
    }
}

/// A leaf directory holding at least one imaging file.
///
/// Produced by discovery and consumed immediately by extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesDirectory {
    /// Directory relative to the input root (`.` for the root itself).
    pub relative: PathBuf,
    /// Imaging filenames, sorted lexicographically.
    pub files: Vec<String>,
}

impl SeriesDirectory {
    /// The lexicographically-last filename.
    ///
    /// Early files of a series are more often incomplete scout acquisitions,
    /// so the last one stands in for the series.
    pub fn sample(&self) -> Option<&str> {
        self.files.last().map(String::as_str)
    }

    /// Relative path in the `/`-separated form stored in the catalogue.
    pub fn relative_str(&self) -> String {
        relative_path_string(&self.relative)
    }
}

/// Renders a relative path with `/` separators regardless of platform.
pub fn relative_path_string(path: &Path) -> String {
    let parts: Vec<_> = path
        .components()
        .map(|component| component.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

/// One catalogue row: the flattened metadata of a single series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRow {
    /// Series directory relative to the input root. Never null.
    pub path: String,
    /// Representative sample filename.
    pub sample: Option<String>,
    /// Number of imaging files in the series.
    pub series_length: Option<u64>,
    /// Tag-mapped fields that were present and readable. Absent means null.
    pub fields: BTreeMap<String, FieldValue>,
}

impl IndexRow {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            sample: None,
            series_length: None,
            fields: BTreeMap::new(),
        }
    }

    /// Returns a tag field, `None` when null.
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Returns a tag field only when it holds text.
    pub fn text_field(&self, name: &str) -> Option<&str> {
        match self.fields.get(name)? {
            FieldValue::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    /// Returns any column (tag field or synthetic) as owned cell value.
    pub fn cell(&self, column: &str) -> Option<FieldValue> {
        match column {
            PATH_COLUMN => Some(FieldValue::Text(self.path.clone())),
            SAMPLE_COLUMN => self.sample.clone().map(FieldValue::Text),
            SERIES_LENGTH_COLUMN => self.series_length.map(FieldValue::Count),
            _ => self.fields.get(column).cloned(),
        }
    }

    /// Returns any column rendered as text for matching.
    pub fn cell_text(&self, column: &str) -> Option<Cow<'_, str>> {
        match column {
            PATH_COLUMN => Some(Cow::Borrowed(self.path.as_str())),
            SAMPLE_COLUMN => self.sample.as_deref().map(Cow::Borrowed),
            SERIES_LENGTH_COLUMN => self.series_length.map(|count| Cow::Owned(count.to_string())),
            _ => self.fields.get(column).map(FieldValue::as_text),
        }
    }

    pub fn study_uid(&self) -> Option<&str> {
        self.text_field(STUDY_INSTANCE_UID)
    }

    pub fn series_uid(&self) -> Option<&str> {
        self.text_field(SERIES_INSTANCE_UID)
    }

    pub fn patient_id(&self) -> Option<&str> {
        self.text_field(PATIENT_ID)
    }
}

/// The stored reference back to the input root used for a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvenanceRecord {
    /// Absolute input root.
    pub input_path: PathBuf,
}

impl ProvenanceRecord {
    /// Resolves a row's relative `Path` into the real series directory.
    pub fn series_dir(&self, row: &IndexRow) -> PathBuf {
        if row.path == "." {
            return self.input_path.clone();
        }
        row.path
            .split('/')
            .fold(self.input_path.clone(), |acc, part| acc.join(part))
    }

    /// Resolves a row's sample file. `None` when the row has no sample.
    ///
    /// The file may no longer exist; callers treat that as "preview unavailable".
    pub fn sample_path(&self, row: &IndexRow) -> Option<PathBuf> {
        row.sample
            .as_deref()
            .map(|sample| self.series_dir(row).join(sample))
    }
}
