//! Query execution against a catalogue store.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use crate::error::Result;
use crate::store::read_store;
use crate::tags::TagTable;
use crate::types::{IndexRow, ProvenanceRecord};

use super::matcher::matches_all;
use super::order::sort_canonical;
use super::selection::Selection;

/// Options for a filtered selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectOptions {
    /// Return every series of each hit study, not only the hits.
    pub include_siblings: bool,
}

impl Default for SelectOptions {
    fn default() -> Self {
        Self {
            include_siblings: true,
        }
    }
}

/// Rows returned by a selection plus the series that matched directly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionResult {
    /// Rows in canonical order.
    pub rows: Vec<IndexRow>,
    /// Distinct `SeriesInstanceUID`s of the direct hits, in canonical order.
    pub direct_hits: Vec<String>,
    /// `Path`s of the direct hits. Covers hits without a series UID.
    hit_paths: BTreeSet<String>,
}

impl SelectionResult {
    /// A result with no direct hits, as returned for an empty selection.
    pub fn unfiltered(rows: Vec<IndexRow>) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }

    /// Returns true when `row` matched the selection itself rather than being
    /// pulled in as a sibling.
    pub fn is_direct_hit(&self, row: &IndexRow) -> bool {
        self.hit_paths.contains(&row.path)
    }

    pub fn hit_count(&self) -> usize {
        self.hit_paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Answers queries against catalogue stores.
///
/// The engine keeps no state between calls: each call opens the store,
/// reads it, and releases it before returning.
#[derive(Debug, Clone)]
pub struct QueryEngine {
    tags: Arc<TagTable>,
}

impl QueryEngine {
    pub fn new(tags: Arc<TagTable>) -> Self {
        Self { tags }
    }

    pub fn tags(&self) -> &TagTable {
        &self.tags
    }

    /// Validates `criteria` into a selection for this engine's tag table.
    pub fn selection<I, K, V>(&self, criteria: I) -> Result<Selection>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        Selection::parse(criteria, &self.tags)
    }

    /// All rows in canonical order.
    pub fn select_all(&self, store: &Path) -> Result<Vec<IndexRow>> {
        let mut rows = read_store(store)?.rows;
        sort_canonical(&mut rows);
        Ok(rows)
    }

    /// Direct hits of `selection` with their sibling series.
    pub fn select(&self, store: &Path, selection: &Selection) -> Result<SelectionResult> {
        self.select_with(store, selection, SelectOptions::default())
    }

    pub fn select_with(
        &self,
        store: &Path,
        selection: &Selection,
        options: SelectOptions,
    ) -> Result<SelectionResult> {
        selection.validate(&self.tags)?;
        let rows = read_store(store)?.rows;
        Ok(select_rows(rows, selection, options))
    }

    /// Like [`QueryEngine::select_with`], also returning the provenance
    /// record from the same read of the store.
    pub fn load_with(
        &self,
        store: &Path,
        selection: &Selection,
        options: SelectOptions,
    ) -> Result<(ProvenanceRecord, SelectionResult)> {
        selection.validate(&self.tags)?;
        let catalogue = read_store(store)?;
        let result = select_rows(catalogue.rows, selection, options);
        Ok((catalogue.provenance, result))
    }
}

fn select_rows(
    mut rows: Vec<IndexRow>,
    selection: &Selection,
    options: SelectOptions,
) -> SelectionResult {
    if selection.is_empty() {
        sort_canonical(&mut rows);
        return SelectionResult::unfiltered(rows);
    }
    expand_selection(rows, selection, options)
}

/// Two passes over `rows`: collect the direct hits and their studies, then
/// keep every row of those studies.
///
/// A hit without a `StudyInstanceUID` has no identifiable siblings and is
/// returned alone.
pub fn expand_selection(
    rows: Vec<IndexRow>,
    selection: &Selection,
    options: SelectOptions,
) -> SelectionResult {
    let matchers = selection.matchers();
    let hit_paths: BTreeSet<String> = rows
        .iter()
        .filter(|row| matches_all(matchers, row))
        .map(|row| row.path.clone())
        .collect();
    let studies: BTreeSet<String> = rows
        .iter()
        .filter(|row| hit_paths.contains(&row.path))
        .filter_map(|row| row.study_uid().map(str::to_string))
        .collect();

    let mut selected: Vec<IndexRow> = rows
        .into_iter()
        .filter(|row| {
            hit_paths.contains(&row.path)
                || (options.include_siblings
                    && row.study_uid().is_some_and(|uid| studies.contains(uid)))
        })
        .collect();
    sort_canonical(&mut selected);

    let mut seen = BTreeSet::new();
    let direct_hits: Vec<String> = selected
        .iter()
        .filter(|row| hit_paths.contains(&row.path))
        .filter_map(IndexRow::series_uid)
        .filter(|uid| seen.insert(*uid))
        .map(str::to_string)
        .collect();

    tracing::debug!(
        "selection hit {} series in {} studies, returning {} rows",
        hit_paths.len(),
        studies.len(),
        selected.len()
    );

    SelectionResult {
        rows: selected,
        direct_hits,
        hit_paths,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::write_store;
    use crate::types::{FieldValue, ProvenanceRecord};
    use crate::CatalogueError;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn tags() -> Arc<TagTable> {
        Arc::new(
            TagTable::new([
                ("0008|0031", "SeriesTime"),
                ("0008|103e", "SeriesDescription"),
                ("0010|0020", "PatientID"),
                ("0020|000d", "StudyInstanceUID"),
                ("0020|000e", "SeriesInstanceUID"),
            ])
            .unwrap(),
        )
    }

    fn row(
        path: &str,
        study: Option<&str>,
        series: &str,
        time: &str,
        description: &str,
    ) -> IndexRow {
        let mut row = IndexRow::new(path);
        let mut set = |field: &str, value: &str| {
            row.fields
                .insert(field.to_string(), FieldValue::Text(value.to_string()));
        };
        if let Some(study) = study {
            set("StudyInstanceUID", study);
        }
        set("SeriesInstanceUID", series);
        set("SeriesTime", time);
        set("SeriesDescription", description);
        row
    }

    fn rows() -> Vec<IndexRow> {
        vec![
            row("P1/S1/Se1", Some("U1"), "Se1", "3", "t2 foo"),
            row("P1/S1/Se2", Some("U1"), "Se2", "1", "dwi"),
            row("P1/S2/Se1", Some("U2"), "Se3", "2", "t1"),
            row("P2/S1/Se1", None, "Se4", "4", "foo orphan"),
            row("P2/S1/Se2", None, "Se5", "5", "bar orphan"),
        ]
    }

    fn store(temp: &TempDir) -> PathBuf {
        let path = temp.path().join("catalogue.bin");
        let provenance = ProvenanceRecord {
            input_path: PathBuf::from("/data"),
        };
        write_store(&path, &provenance, &rows(), &tags()).unwrap();
        path
    }

    fn paths(rows: &[IndexRow]) -> Vec<&str> {
        rows.iter().map(|row| row.path.as_str()).collect()
    }

    #[test]
    fn select_all_is_canonically_ordered() {
        let temp = TempDir::new().unwrap();
        let engine = QueryEngine::new(tags());
        let rows = engine.select_all(&store(&temp)).unwrap();
        assert_eq!(
            paths(&rows),
            vec!["P1/S1/Se2", "P1/S2/Se1", "P1/S1/Se1", "P2/S1/Se1", "P2/S1/Se2"]
        );
    }

    #[test]
    fn hits_pull_in_their_study() {
        let temp = TempDir::new().unwrap();
        let engine = QueryEngine::new(tags());
        let selection = engine
            .selection([("SeriesDescription", "t2")])
            .unwrap();
        let result = engine.select(&store(&temp), &selection).unwrap();

        assert_eq!(paths(&result.rows), vec!["P1/S1/Se2", "P1/S1/Se1"]);
        assert_eq!(result.direct_hits, vec!["Se1"]);
        assert!(result.is_direct_hit(&result.rows[1]));
        assert!(!result.is_direct_hit(&result.rows[0]));
    }

    #[test]
    fn hits_without_study_come_alone() {
        let temp = TempDir::new().unwrap();
        let engine = QueryEngine::new(tags());
        let selection = engine.selection([("SeriesDescription", "foo")]).unwrap();
        let result = engine.select(&store(&temp), &selection).unwrap();

        assert_eq!(
            paths(&result.rows),
            vec!["P1/S1/Se2", "P1/S1/Se1", "P2/S1/Se1"]
        );
        assert_eq!(result.direct_hits, vec!["Se1", "Se4"]);
        assert_eq!(result.hit_count(), 2);
    }

    #[test]
    fn siblings_can_be_left_out() {
        let temp = TempDir::new().unwrap();
        let engine = QueryEngine::new(tags());
        let selection = engine.selection([("SeriesDescription", "t2")]).unwrap();
        let result = engine
            .select_with(
                &store(&temp),
                &selection,
                SelectOptions {
                    include_siblings: false,
                },
            )
            .unwrap();
        assert_eq!(paths(&result.rows), vec!["P1/S1/Se1"]);
    }

    #[test]
    fn fields_are_and_ed() {
        let temp = TempDir::new().unwrap();
        let engine = QueryEngine::new(tags());
        let selection = engine
            .selection([("SeriesDescription", "orphan,t1"), ("Path", "P2/")])
            .unwrap();
        let result = engine.select(&store(&temp), &selection).unwrap();
        assert_eq!(paths(&result.rows), vec!["P2/S1/Se1", "P2/S1/Se2"]);
    }

    #[test]
    fn empty_selection_equals_select_all() {
        let temp = TempDir::new().unwrap();
        let path = store(&temp);
        let engine = QueryEngine::new(tags());
        let result = engine.select(&path, &Selection::all()).unwrap();
        assert_eq!(result.rows, engine.select_all(&path).unwrap());
        assert!(result.direct_hits.is_empty());
    }

    #[test]
    fn load_returns_provenance_with_result() {
        let temp = TempDir::new().unwrap();
        let path = store(&temp);
        let engine = QueryEngine::new(tags());
        let selection = engine.selection([("SeriesDescription", "t2")]).unwrap();

        let (provenance, result) = engine
            .load_with(&path, &selection, SelectOptions::default())
            .unwrap();
        assert_eq!(provenance.input_path, PathBuf::from("/data"));
        assert_eq!(result, engine.select(&path, &selection).unwrap());

        let (_, everything) = engine
            .load_with(&path, &Selection::all(), SelectOptions::default())
            .unwrap();
        assert_eq!(everything.rows, engine.select_all(&path).unwrap());
    }

    #[test]
    fn no_hits_yield_empty_result() {
        let temp = TempDir::new().unwrap();
        let engine = QueryEngine::new(tags());
        let selection = engine.selection([("SeriesDescription", "flair")]).unwrap();
        let result = engine.select(&store(&temp), &selection).unwrap();
        assert!(result.is_empty());
        assert!(result.direct_hits.is_empty());
    }

    #[test]
    fn foreign_fields_are_rejected_before_reading() {
        let temp = TempDir::new().unwrap();
        let wide = TagTable::new([("0008|0060", "Modality")]).unwrap();
        let selection = Selection::parse([("Modality", "MR")], &wide).unwrap();
        let engine = QueryEngine::new(tags());

        let result = engine.select(&temp.path().join("absent.bin"), &selection);
        assert!(matches!(result, Err(CatalogueError::UnknownField(_))));
    }
}
