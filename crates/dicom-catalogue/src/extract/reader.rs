//! Header readers tried in order by the extractor.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use dicom::core::Tag;
use dicom::dictionary_std::tags;
use dicom::object::{InMemDicomObject, OpenFileOptions};
use dicom::transfer_syntax::entries::{EXPLICIT_VR_LITTLE_ENDIAN, IMPLICIT_VR_LITTLE_ENDIAN};

use crate::error::{CatalogueError, Result};

const PREAMBLE_LEN: u64 = 128;
const MAGIC: &[u8; 4] = b"DICM";

/// A parsed header of one sample file.
#[derive(Debug, Clone)]
pub struct Header {
    dataset: InMemDicomObject,
    reader: &'static str,
}

impl Header {
    pub fn new(dataset: InMemDicomObject, reader: &'static str) -> Self {
        Self { dataset, reader }
    }

    /// Name of the reader that produced this header.
    pub fn reader(&self) -> &'static str {
        self.reader
    }

    /// Raw string value of an element, `None` when absent or not convertible.
    ///
    /// Multi-valued elements are joined with `\`.
    pub fn raw_value(&self, tag: Tag) -> Option<String> {
        let element = self.dataset.element(tag).ok()?;
        element.to_str().ok().map(|value| value.into_owned())
    }
}

/// A way of reading a sample file's header.
pub trait HeaderReader: Send + Sync {
    fn name(&self) -> &'static str;

    fn read_header(&self, path: &Path) -> Result<Header>;
}

impl fmt::Debug for dyn HeaderReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Primary reader: standard Part-10 files (preamble, `DICM`, file meta group),
/// read up to the pixel data.
#[derive(Debug, Clone, Copy, Default)]
pub struct Part10Reader;

impl HeaderReader for Part10Reader {
    fn name(&self) -> &'static str {
        "part10"
    }

    fn read_header(&self, path: &Path) -> Result<Header> {
        let object = OpenFileOptions::new()
            .read_until(tags::PIXEL_DATA)
            .open_file(path)
            .map_err(|error| header_error(path, error))?;
        Ok(Header::new(object.into_inner(), self.name()))
    }
}

/// Secondary reader for files the primary reader rejects: bare datasets
/// without a file meta group, or Part-10 files whose declared transfer syntax
/// is unusable.
///
/// The stream is decoded as plain little-endian data (implicit VR, then
/// explicit VR); every element is kept, private vendor tags included.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawDatasetReader;

impl HeaderReader for RawDatasetReader {
    fn name(&self) -> &'static str {
        "raw-dataset"
    }

    fn read_header(&self, path: &Path) -> Result<Header> {
        let offset = dataset_offset(path)?;
        // A file carrying a meta group starts with explicit VR elements.
        let attempts = if offset > 0 {
            [EXPLICIT_VR_LITTLE_ENDIAN.erased(), IMPLICIT_VR_LITTLE_ENDIAN.erased()]
        } else {
            [IMPLICIT_VR_LITTLE_ENDIAN.erased(), EXPLICIT_VR_LITTLE_ENDIAN.erased()]
        };

        let mut reasons = Vec::new();
        for ts in attempts {
            let mut file = File::open(path).map_err(|error| header_error(path, error))?;
            file.seek(SeekFrom::Start(offset))
                .map_err(|error| header_error(path, error))?;

            match InMemDicomObject::read_dataset_with_ts(BufReader::new(file), &ts) {
                Ok(dataset) if (&dataset).into_iter().next().is_some() => {
                    return Ok(Header::new(dataset, self.name()));
                }
                Ok(_) => reasons.push(format!("{}: empty dataset", ts.name())),
                Err(error) => reasons.push(format!("{}: {error}", ts.name())),
            }
        }

        Err(CatalogueError::Header {
            path: path.to_path_buf(),
            reason: reasons.join("; "),
        })
    }
}

/// The default reader chain: Part-10 first, raw dataset second.
pub fn default_readers() -> Vec<Box<dyn HeaderReader>> {
    vec![Box::new(Part10Reader), Box::new(RawDatasetReader)]
}

/// Byte offset of the first dataset element, skipping an optional preamble
/// and `DICM` magic.
fn dataset_offset(path: &Path) -> Result<u64> {
    let mut head = Vec::with_capacity(132);
    File::open(path)
        .and_then(|file| file.take(PREAMBLE_LEN + 4).read_to_end(&mut head))
        .map_err(|error| header_error(path, error))?;

    if head.len() >= 132 && &head[128..132] == MAGIC {
        Ok(PREAMBLE_LEN + 4)
    } else if head.starts_with(MAGIC) {
        Ok(4)
    } else {
        Ok(0)
    }
}

fn header_error(path: &Path, error: impl fmt::Display) -> CatalogueError {
    CatalogueError::Header {
        path: path.to_path_buf(),
        reason: error.to_string(),
    }
}
