//! Catalogue configuration, persisted as JSON.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{CatalogueError, Result};
use crate::tags::TagTable;

/// Hard cap on worker threads for discovery and extraction.
pub const MAX_WORKERS: usize = 32;

/// Filename convention for imaging files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileNaming {
    /// Any file with the imaging extension.
    #[default]
    Extension,
    /// Only names made of digits followed by the imaging extension, e.g. `0001.dcm`.
    Numbered,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CatalogueConfig {
    /// Imaging file extension without the dot, compared case-insensitively.
    pub imaging_extension: String,
    pub naming: FileNaming,
    /// Worker pool size override.
    pub max_workers: Option<usize>,
    /// JSON tag table replacing the built-in one.
    pub tag_table: Option<PathBuf>,
    /// Named selections: name → field → comma-separated values.
    pub saved_selections: BTreeMap<String, BTreeMap<String, String>>,
}

impl Default for CatalogueConfig {
    fn default() -> Self {
        Self {
            imaging_extension: "dcm".to_string(),
            naming: FileNaming::Extension,
            max_workers: None,
            tag_table: None,
            saved_selections: BTreeMap::new(),
        }
    }
}

impl CatalogueConfig {
    /// Worker pool size: `min(32, cores + 4)` unless overridden, clamped to `1..=32`.
    pub fn worker_count(&self) -> usize {
        match self.max_workers {
            Some(requested) => requested.clamp(1, MAX_WORKERS),
            None => default_worker_count(),
        }
    }

    /// Returns true when `name` is an imaging file under this configuration.
    pub fn is_imaging_file(&self, name: &str) -> bool {
        let Some((stem, extension)) = name.rsplit_once('.') else {
            return false;
        };
        if !extension.eq_ignore_ascii_case(&self.imaging_extension) {
            return false;
        }
        match self.naming {
            FileNaming::Extension => true,
            FileNaming::Numbered => !stem.is_empty() && stem.bytes().all(|b| b.is_ascii_digit()),
        }
    }

    /// Loads the configured tag table, or the built-in one.
    pub fn load_tag_table(&self) -> Result<Arc<TagTable>> {
        let table = match &self.tag_table {
            Some(path) => TagTable::from_json_file(path)?,
            None => TagTable::standard(),
        };
        Ok(Arc::new(table))
    }

    /// Looks up a saved selection by name.
    pub fn saved_selection(&self, name: &str) -> Result<&BTreeMap<String, String>> {
        self.saved_selections.get(name).ok_or_else(|| {
            CatalogueError::InvalidInput(format!("no saved selection named {name}"))
        })
    }
}

/// `min(32, available_parallelism + 4)`.
pub fn default_worker_count() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (cores + 4).min(MAX_WORKERS)
}

/// Loads a config file. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<CatalogueConfig> {
    if !path.exists() {
        return Ok(CatalogueConfig::default());
    }
    let data = std::fs::read_to_string(path).map_err(|error| {
        CatalogueError::InvalidInput(format!(
            "failed to read catalogue config {}: {error}",
            path.display()
        ))
    })?;
    serde_json::from_str(&data).map_err(|error| {
        CatalogueError::InvalidInput(format!(
            "failed to parse catalogue config {}: {error}",
            path.display()
        ))
    })
}

pub fn write_config(path: &Path, config: &CatalogueConfig) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|error| {
            CatalogueError::Internal(format!(
                "failed to create config directory {}: {error}",
                parent.display()
            ))
        })?;
    }
    let data = serde_json::to_string_pretty(config).map_err(|error| {
        CatalogueError::Internal(format!("failed to serialize catalogue config: {error}"))
    })?;
    std::fs::write(path, data).map_err(|error| {
        CatalogueError::Internal(format!(
            "failed to write catalogue config {}: {error}",
            path.display()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_worker_count_is_bounded() {
        let count = default_worker_count();
        assert!(count >= 5);
        assert!(count <= MAX_WORKERS);
    }

    #[test]
    fn worker_override_is_clamped() {
        let mut config = CatalogueConfig::default();
        config.max_workers = Some(0);
        assert_eq!(config.worker_count(), 1);
        config.max_workers = Some(500);
        assert_eq!(config.worker_count(), MAX_WORKERS);
        config.max_workers = Some(3);
        assert_eq!(config.worker_count(), 3);
    }

    #[test]
    fn extension_naming_accepts_any_stem() {
        let config = CatalogueConfig::default();
        assert!(config.is_imaging_file("0001.dcm"));
        assert!(config.is_imaging_file("IM_scan.DCM"));
        assert!(!config.is_imaging_file("notes.txt"));
        assert!(!config.is_imaging_file("dcm"));
    }

    #[test]
    fn numbered_naming_requires_digit_stem() {
        let config = CatalogueConfig {
            naming: FileNaming::Numbered,
            ..CatalogueConfig::default()
        };
        assert!(config.is_imaging_file("12.dcm"));
        assert!(!config.is_imaging_file("IM12.dcm"));
        assert!(!config.is_imaging_file(".dcm"));
    }

    #[test]
    fn missing_file_loads_defaults() {
        let temp = TempDir::new().unwrap();
        let config = load_config(&temp.path().join("absent.json")).expect("load");
        assert_eq!(config, CatalogueConfig::default());
    }

    #[test]
    fn config_round_trips_through_disk() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested/catalogue.json");
        let mut config = CatalogueConfig::default();
        config.naming = FileNaming::Numbered;
        config.saved_selections.insert(
            "needles".to_string(),
            BTreeMap::from([("SeriesDescription".to_string(), "naald,nld".to_string())]),
        );

        write_config(&path, &config).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, config);
        assert_eq!(
            loaded.saved_selection("needles").unwrap()["SeriesDescription"],
            "naald,nld"
        );
        assert!(loaded.saved_selection("missing").is_err());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("catalogue.json");
        std::fs::write(&path, r#"{ "imaging_extension": "dcm", "colour": "red" }"#).unwrap();
        assert!(matches!(
            load_config(&path),
            Err(CatalogueError::InvalidInput(_))
        ));
    }
}
