//! Typed on-disk pages in the `.npy` container format.
//!
//! Every page is a header prelude (magic, version, padded ASCII dict) whose
//! total length is a multiple of 64, followed by the raw body: a fixed-stride
//! array for BOOL / INT64 / FLOAT64 / UNICODE, or a pickle stream for OBJECT
//! (see [`crate::pickle`]). Pages are written once and never mutated.

use anyhow::{Context, Result, bail};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::pickle;

/// Storage discriminant of a page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageType {
    Bool,
    Int64,
    Float64,
    Unicode { width: usize },
    Object,
}

impl PageType {
    /// The numpy dtype string embedded in the page header.
    pub fn descr(&self) -> String {
        match self {
            PageType::Bool => "|b1".to_string(),
            PageType::Int64 => "<i8".to_string(),
            PageType::Float64 => "<f8".to_string(),
            PageType::Unicode { width } => format!("<U{width}"),
            PageType::Object => "|O".to_string(),
        }
    }
}

const MAGIC: [u8; 6] = [0x93, b'N', b'U', b'M', b'P', b'Y'];

/// Write the `.npy` prelude for a 1-D array of `n` elements.
///
/// The dict literal is padded with spaces so that magic + version + length
/// word + header is a multiple of 64 and ends with `\n`.
pub fn write_npy_header<W: Write>(w: &mut W, descr: &str, n: usize) -> Result<()> {
    let header = format!("{{'descr': '{descr}', 'fortran_order': False, 'shape': ({n},)}}");
    let header_len = header.len();
    let padding = 64 - ((10 + header_len) % 64);
    let padded: u16 = (header_len + padding)
        .try_into()
        .context("npy header too large")?;
    w.write_all(&MAGIC)?;
    w.write_all(&[1, 0])?;
    w.write_all(&padded.to_le_bytes())?;
    w.write_all(header.as_bytes())?;
    for _ in 0..padding - 1 {
        w.write_all(b" ")?;
    }
    w.write_all(b"\n")?;
    Ok(())
}

/// An open destination page. Created once per task and column, finalized
/// exactly once; dropping without finalizing leaves a partial page, which a
/// failed task is allowed to do.
pub struct ColumnPage {
    path: PathBuf,
    file: BufWriter<File>,
    page_type: PageType,
    rows: usize,
    /// BINPUT memo counter for object pages, advanced by every memoized
    /// pickle write.
    memo: u32,
}

impl ColumnPage {
    /// Create the page file, write its header, and for object pages the
    /// pickle prelude.
    pub fn create(path: &Path, page_type: PageType, rows: usize) -> Result<Self> {
        let file = File::create(path).with_context(|| format!("create page {}", path.display()))?;
        let mut file = BufWriter::new(file);
        write_npy_header(&mut file, &page_type.descr(), rows)?;
        let mut memo = 0u32;
        if page_type == PageType::Object {
            pickle::write_prelude(&mut file, &mut memo, rows)?;
        }
        Ok(Self {
            path: path.to_path_buf(),
            file,
            page_type,
            rows,
            memo,
        })
    }

    pub fn page_type(&self) -> PageType {
        self.page_type
    }

    /// Write one fixed-stride element from its raw field text.
    ///
    /// A value that passed inference in pass-1 but fails to re-parse here is
    /// an integrity error, never a silent fallback.
    pub fn write_element(&mut self, raw: &str) -> Result<()> {
        match self.page_type {
            PageType::Bool => {
                let byte = if raw.eq_ignore_ascii_case("true") { 1u8 } else { 0u8 };
                self.file.write_all(&[byte])?;
            }
            PageType::Int64 => {
                let value = crate::datatypes::parse_int(raw).with_context(|| {
                    format!("{}: {raw:?} no longer parses as INT64", self.path.display())
                })?;
                self.file.write_all(&value.to_le_bytes())?;
            }
            PageType::Float64 => {
                let value = crate::datatypes::parse_float(raw).with_context(|| {
                    format!("{}: {raw:?} no longer parses as FLOAT64", self.path.display())
                })?;
                self.file.write_all(&value.to_le_bytes())?;
            }
            PageType::Unicode { width } => {
                let chars = raw.chars().count();
                if chars > width {
                    bail!(
                        "{}: value {raw:?} exceeds unicode width {width}",
                        self.path.display()
                    );
                }
                for c in raw.chars() {
                    self.file.write_all(&(c as u32).to_le_bytes())?;
                }
                for _ in chars..width {
                    self.file.write_all(&0u32.to_le_bytes())?;
                }
            }
            PageType::Object => bail!("object pages take pickled values, not raw elements"),
        }
        Ok(())
    }

    /// Serialize one object-page value.
    pub fn write_object(&mut self, value: &crate::datatypes::Value<'_>) -> Result<()> {
        if self.page_type != PageType::Object {
            bail!("{}: not an object page", self.path.display());
        }
        pickle::write_value(&mut self.file, &mut self.memo, value)?;
        Ok(())
    }

    /// Write the pickle suffix (object pages) and flush.
    pub fn finalize(mut self) -> Result<()> {
        if self.page_type == PageType::Object {
            pickle::write_suffix(&mut self.file, self.rows)?;
        }
        self.file
            .flush()
            .with_context(|| format!("flush page {}", self.path.display()))?;
        Ok(())
    }
}
