//! Selections: validated field → substring lists.

use std::collections::BTreeMap;

use crate::error::{CatalogueError, Result};
use crate::tags::TagTable;

use super::matcher::FieldMatcher;

/// A validated selection.
///
/// Values within one field are OR-ed, fields are AND-ed. Field names are
/// checked against the tag table when the selection is built, so a
/// selection never reaches the store with an unknown column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    matchers: Vec<FieldMatcher>,
}

impl Selection {
    /// The empty selection, equivalent to selecting everything.
    pub fn all() -> Self {
        Self::default()
    }

    /// Builds a selection from `field → "v1,v2,..."` pairs.
    ///
    /// Values are split on `,` without trimming. Repeated fields merge their
    /// values.
    pub fn parse<I, K, V>(criteria: I, tags: &TagTable) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut merged: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (field, values) in criteria {
            let field = field.as_ref();
            if !tags.is_known_column(field) {
                return Err(CatalogueError::UnknownField(field.to_string()));
            }
            merged
                .entry(field.to_string())
                .or_default()
                .extend(values.as_ref().split(',').map(str::to_string));
        }

        Ok(Self {
            matchers: merged
                .into_iter()
                .map(|(field, needles)| FieldMatcher::new(field, needles))
                .collect(),
        })
    }

    /// Builds a selection from `Key=v1,v2` assignments. An assignment with
    /// nothing after `=` is rejected.
    pub fn from_assignments<I, S>(assignments: I, tags: &TagTable) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let pairs = assignments
            .into_iter()
            .map(|assignment| {
                let assignment = assignment.as_ref();
                match assignment.split_once('=') {
                    Some((field, "")) => Err(CatalogueError::InvalidSelection(format!(
                        "empty value for {}",
                        field.trim()
                    ))),
                    Some((field, values)) if !field.trim().is_empty() => {
                        Ok((field.trim().to_string(), values.to_string()))
                    }
                    _ => Err(CatalogueError::InvalidSelection(format!(
                        "expected Key=value, got {assignment:?}"
                    ))),
                }
            })
            .collect::<Result<Vec<_>>>()?;
        Self::parse(pairs, tags)
    }

    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }

    pub fn matchers(&self) -> &[FieldMatcher] {
        &self.matchers
    }

    /// Fields used by this selection, sorted.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.matchers.iter().map(FieldMatcher::field)
    }

    /// Re-checks the fields against `tags`.
    pub fn validate(&self, tags: &TagTable) -> Result<()> {
        match self.fields().find(|field| !tags.is_known_column(field)) {
            Some(field) => Err(CatalogueError::UnknownField(field.to_string())),
            None => Ok(()),
        }
    }
}
