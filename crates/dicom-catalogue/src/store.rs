//! Catalogue store: read/write of the persisted tables.
//!
//! A store is a single file holding two named tables, `InputPath` (one row,
//! the absolute input root) and `Series` (one row per indexed series). It is
//! postcard encoded and zstd compressed. Writes are staged in a temporary
//! file next to the destination and renamed into place only once the full
//! encode succeeded.

use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::thread::available_parallelism;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::{CatalogueError, Result};
use crate::indexer::unix_now_secs;
use crate::tags::TagTable;
use crate::types::{
    FieldValue, IndexRow, ProvenanceRecord, PATH_COLUMN, SAMPLE_COLUMN, SERIES_LENGTH_COLUMN,
};

/// Store format version. Increment when changing the layout.
pub const STORE_VERSION: u32 = 1;

/// Table holding the provenance row.
pub const INPUT_PATH_TABLE: &str = "InputPath";
/// Table holding the series rows.
pub const SERIES_TABLE: &str = "Series";

const ZSTD_LEVEL: i32 = 6;

#[derive(Debug, Serialize, Deserialize)]
struct StoreHeader {
    version: u32,
    saved_at: u64,
}

/// A named table: column names plus rows of nullable cells.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<FieldValue>>>,
}

impl Table {
    fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|name| name == column)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreBody {
    tables: Vec<Table>,
}

/// Everything a store holds, decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalogue {
    pub provenance: ProvenanceRecord,
    /// Rows in stored order.
    pub rows: Vec<IndexRow>,
    /// Column names of the `Series` table.
    pub columns: Vec<String>,
    pub saved_at: u64,
}

/// A store being written. Dropping it without [`StagedStore::commit`] removes
/// the staging file and leaves any existing store untouched.
#[derive(Debug)]
pub struct StagedStore {
    staging: NamedTempFile,
    destination: PathBuf,
}

impl StagedStore {
    /// Checks that `destination` can be written and creates the staging file.
    ///
    /// Missing parent directories are created.
    pub fn stage(destination: &Path) -> Result<Self> {
        if destination.is_dir() {
            return Err(CatalogueError::InvalidOutput {
                path: destination.to_path_buf(),
                reason: "output path is a directory".to_string(),
            });
        }
        let parent = match destination.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).map_err(|error| CatalogueError::InvalidOutput {
            path: destination.to_path_buf(),
            reason: format!("failed to create directory {}: {error}", parent.display()),
        })?;
        let staging =
            NamedTempFile::new_in(&parent).map_err(|error| CatalogueError::InvalidOutput {
                path: destination.to_path_buf(),
                reason: format!("failed to create staging file: {error}"),
            })?;

        Ok(Self {
            staging,
            destination: destination.to_path_buf(),
        })
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Encodes both tables and atomically replaces the destination.
    pub fn commit(
        self,
        provenance: &ProvenanceRecord,
        rows: &[IndexRow],
        tags: &TagTable,
    ) -> Result<()> {
        let header = StoreHeader {
            version: STORE_VERSION,
            saved_at: unix_now_secs(),
        };
        let body = StoreBody {
            tables: vec![provenance_table(provenance), series_table(rows, tags)],
        };

        {
            let mut encoder = zstd::Encoder::new(self.staging.as_file(), ZSTD_LEVEL)
                .map_err(|error| {
                    CatalogueError::Store(format!("failed to create zstd encoder: {error}"))
                })?;
            let threads = available_parallelism().map(|x| x.get() as u32).unwrap_or(4);
            encoder.multithread(threads).map_err(|error| {
                CatalogueError::Store(format!("failed to enable multi-threaded zstd: {error}"))
            })?;

            let mut output = BufWriter::new(encoder);
            postcard::to_io(&header, &mut output).map_err(|error| {
                CatalogueError::Store(format!("failed to encode store header: {error}"))
            })?;
            postcard::to_io(&body, &mut output).map_err(|error| {
                CatalogueError::Store(format!("failed to encode store tables: {error}"))
            })?;

            let encoder = output.into_inner().map_err(|error| {
                CatalogueError::Store(format!("failed to flush store: {}", error.error()))
            })?;
            let mut file = encoder.finish().map_err(|error| {
                CatalogueError::Store(format!("failed to finish zstd stream: {error}"))
            })?;
            file.flush()?;
            file.sync_all()?;
        }

        self.staging
            .persist(&self.destination)
            .map_err(|error| {
                CatalogueError::Store(format!(
                    "failed to finalize store {}: {}",
                    self.destination.display(),
                    error.error
                ))
            })?;

        tracing::debug!(
            "wrote catalogue store to {} ({} rows)",
            self.destination.display(),
            rows.len()
        );
        Ok(())
    }
}

/// Writes a complete store in one step.
pub fn write_store(
    destination: &Path,
    provenance: &ProvenanceRecord,
    rows: &[IndexRow],
    tags: &TagTable,
) -> Result<()> {
    StagedStore::stage(destination)?.commit(provenance, rows, tags)
}

/// Reads and validates a store.
pub fn read_store(path: &Path) -> Result<Catalogue> {
    let input = File::open(path).map_err(|error| match error.kind() {
        ErrorKind::NotFound => {
            CatalogueError::Store(format!("catalogue store {} does not exist", path.display()))
        }
        _ => CatalogueError::Store(format!(
            "failed to open catalogue store {}: {error}",
            path.display()
        )),
    })?;

    let mut bytes = Vec::new();
    zstd::Decoder::new(input)
        .and_then(|mut decoder| decoder.read_to_end(&mut bytes))
        .map_err(|error| {
            CatalogueError::Store(format!(
                "failed to decompress catalogue store {}: {error}",
                path.display()
            ))
        })?;

    let (header, rest): (StoreHeader, _) = postcard::take_from_bytes(&bytes).map_err(|error| {
        CatalogueError::Store(format!("failed to decode store header: {error}"))
    })?;
    if header.version != STORE_VERSION {
        return Err(CatalogueError::StoreVersion {
            found: header.version,
            expected: STORE_VERSION,
        });
    }

    let body: StoreBody = {
        let _span = tracing::info_span!("store_decode", path = %path.display()).entered();
        postcard::from_bytes(rest).map_err(|error| {
            CatalogueError::Store(format!("failed to decode store tables: {error}"))
        })?
    };

    let mut tables = body.tables;
    let provenance = take_table(&mut tables, INPUT_PATH_TABLE)
        .and_then(|table| provenance_from_table(&table))?;
    let series = take_table(&mut tables, SERIES_TABLE)?;
    let rows = rows_from_table(&series)?;

    tracing::debug!(
        "loaded catalogue store from {} ({} rows)",
        path.display(),
        rows.len()
    );

    Ok(Catalogue {
        provenance,
        rows,
        columns: series.columns,
        saved_at: header.saved_at,
    })
}

/// Reads only the provenance record of a store.
pub fn read_provenance(path: &Path) -> Result<ProvenanceRecord> {
    read_store(path).map(|catalogue| catalogue.provenance)
}

fn provenance_table(provenance: &ProvenanceRecord) -> Table {
    Table {
        name: INPUT_PATH_TABLE.to_string(),
        columns: vec![INPUT_PATH_TABLE.to_string()],
        rows: vec![vec![Some(FieldValue::Text(
            provenance.input_path.to_string_lossy().into_owned(),
        ))]],
    }
}

/// Builds the `Series` table: synthetic columns first, then every tag field
/// present in at least one row, in tag table order.
fn series_table(rows: &[IndexRow], tags: &TagTable) -> Table {
    let mut columns: Vec<String> = [PATH_COLUMN, SAMPLE_COLUMN, SERIES_LENGTH_COLUMN]
        .iter()
        .map(|column| column.to_string())
        .collect();
    columns.extend(
        tags.entries()
            .iter()
            .filter(|entry| rows.iter().any(|row| row.fields.contains_key(&entry.field)))
            .map(|entry| entry.field.clone()),
    );
    // Fields outside the table still survive the write.
    let mut extra: Vec<String> = rows
        .iter()
        .flat_map(|row| row.fields.keys())
        .filter(|field| !tags.contains_field(field))
        .cloned()
        .collect();
    extra.sort_unstable();
    extra.dedup();
    columns.extend(extra);

    let rows = rows
        .iter()
        .map(|row| columns.iter().map(|column| row.cell(column)).collect())
        .collect();

    Table {
        name: SERIES_TABLE.to_string(),
        columns,
        rows,
    }
}

fn take_table(tables: &mut Vec<Table>, name: &str) -> Result<Table> {
    let position = tables
        .iter()
        .position(|table| table.name == name)
        .ok_or_else(|| CatalogueError::MissingCollection(name.to_string()))?;
    Ok(tables.swap_remove(position))
}

fn provenance_from_table(table: &Table) -> Result<ProvenanceRecord> {
    let column = table
        .column_index(INPUT_PATH_TABLE)
        .ok_or_else(|| CatalogueError::Store(format!("{INPUT_PATH_TABLE} column missing")))?;
    match table.rows.as_slice() {
        [row] => match row.get(column) {
            Some(Some(FieldValue::Text(path))) => Ok(ProvenanceRecord {
                input_path: PathBuf::from(path),
            }),
            _ => Err(CatalogueError::Store(format!(
                "{INPUT_PATH_TABLE} row holds no path"
            ))),
        },
        rows => Err(CatalogueError::Store(format!(
            "{INPUT_PATH_TABLE} must hold exactly one row, found {}",
            rows.len()
        ))),
    }
}

fn rows_from_table(table: &Table) -> Result<Vec<IndexRow>> {
    let path_index = table
        .column_index(PATH_COLUMN)
        .ok_or_else(|| CatalogueError::Store(format!("{PATH_COLUMN} column missing")))?;

    table
        .rows
        .iter()
        .enumerate()
        .map(|(position, cells)| {
            if cells.len() != table.columns.len() {
                return Err(CatalogueError::Store(format!(
                    "row {position} has {} cells for {} columns",
                    cells.len(),
                    table.columns.len()
                )));
            }
            let path = match &cells[path_index] {
                Some(FieldValue::Text(path)) => path.clone(),
                _ => {
                    return Err(CatalogueError::Store(format!(
                        "row {position} has a null {PATH_COLUMN}"
                    )))
                }
            };

            let mut row = IndexRow::new(path);
            for (column, cell) in table.columns.iter().zip(cells) {
                let Some(value) = cell else {
                    continue;
                };
                match (column.as_str(), value) {
                    (PATH_COLUMN, _) => {}
                    (SAMPLE_COLUMN, FieldValue::Text(sample)) => row.sample = Some(sample.clone()),
                    (SERIES_LENGTH_COLUMN, FieldValue::Count(count)) => {
                        row.series_length = Some(*count)
                    }
                    (SAMPLE_COLUMN | SERIES_LENGTH_COLUMN, other) => {
                        return Err(CatalogueError::Store(format!(
                            "row {position} has a malformed {column} value {other:?}"
                        )))
                    }
                    (field, value) => {
                        row.fields.insert(field.to_string(), value.clone());
                    }
                }
            }
            Ok(row)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn tags() -> TagTable {
        TagTable::new([
            ("0008|0020", "StudyDate"),
            ("0008|0060", "Modality"),
            ("0020|000d", "StudyInstanceUID"),
        ])
        .unwrap()
    }

    fn rows() -> Vec<IndexRow> {
        let mut first = IndexRow::new("P1/S1/Se1");
        first.sample = Some("3.dcm".to_string());
        first.series_length = Some(3);
        first
            .fields
            .insert("Modality".to_string(), FieldValue::Text("MR".to_string()));
        first.fields.insert(
            "StudyDate".to_string(),
            FieldValue::Date(NaiveDate::from_ymd_opt(2014, 3, 9).unwrap()),
        );

        let mut second = IndexRow::new("P1/S1/Se2");
        second.sample = Some("1.dcm".to_string());
        second.series_length = Some(1);
        vec![first, second]
    }

    fn provenance() -> ProvenanceRecord {
        ProvenanceRecord {
            input_path: PathBuf::from("/data/input"),
        }
    }

    #[test]
    fn stored_rows_read_back_in_order() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("catalogue.bin");

        write_store(&path, &provenance(), &rows(), &tags()).expect("write");
        let catalogue = read_store(&path).expect("read");

        assert_eq!(catalogue.provenance, provenance());
        assert_eq!(catalogue.rows, rows());
        assert_eq!(
            catalogue.columns,
            vec!["Path", "Sample", "SeriesLength", "StudyDate", "Modality"]
        );
        assert_eq!(read_provenance(&path).unwrap(), provenance());
    }

    #[test]
    fn rewrite_replaces_previous_store() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("catalogue.bin");

        write_store(&path, &provenance(), &rows(), &tags()).expect("first write");
        write_store(&path, &provenance(), &rows()[..1], &tags()).expect("second write");

        assert_eq!(read_store(&path).unwrap().rows.len(), 1);
    }

    #[test]
    fn dropped_stage_leaves_existing_store() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("catalogue.bin");
        write_store(&path, &provenance(), &rows(), &tags()).expect("write");

        let staged = StagedStore::stage(&path).expect("stage");
        drop(staged);

        assert_eq!(read_store(&path).unwrap().rows.len(), 2);
        let leftovers: Vec<_> = fs::read_dir(temp.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn directory_output_is_rejected() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            StagedStore::stage(temp.path()),
            Err(CatalogueError::InvalidOutput { .. })
        ));
    }

    #[test]
    fn missing_store_is_a_store_error() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            read_store(&temp.path().join("absent.bin")),
            Err(CatalogueError::Store(_))
        ));
    }

    #[test]
    fn garbage_store_is_a_store_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("catalogue.bin");
        fs::write(&path, b"not a catalogue").unwrap();
        assert!(matches!(read_store(&path), Err(CatalogueError::Store(_))));
    }

    #[test]
    fn version_mismatch_is_reported() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("catalogue.bin");
        let header = StoreHeader {
            version: STORE_VERSION + 1,
            saved_at: 0,
        };
        let encoded = postcard::to_stdvec(&header).unwrap();
        fs::write(&path, zstd::encode_all(encoded.as_slice(), 1).unwrap()).unwrap();

        assert!(matches!(
            read_store(&path),
            Err(CatalogueError::StoreVersion { found, expected })
                if found == STORE_VERSION + 1 && expected == STORE_VERSION
        ));
    }

    #[test]
    fn null_path_is_rejected() {
        let table = Table {
            name: SERIES_TABLE.to_string(),
            columns: vec![PATH_COLUMN.to_string()],
            rows: vec![vec![None]],
        };
        assert!(matches!(
            rows_from_table(&table),
            Err(CatalogueError::Store(_))
        ));
    }

    #[test]
    fn missing_table_is_reported() {
        let mut tables = vec![provenance_table(&provenance())];
        assert!(matches!(
            take_table(&mut tables, SERIES_TABLE),
            Err(CatalogueError::MissingCollection(name)) if name == SERIES_TABLE
        ));
    }
}
