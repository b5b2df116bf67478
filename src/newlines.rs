//! Newline index: byte offsets of every record boundary.
//!
//! The index is built with a single encoding-aware scan before any slicing,
//! so tasks can seek straight to their first record and workers never have
//! to coordinate.

use anyhow::{Context, Result};
use std::path::Path;

use crate::encoding::{EncodedReader, TextEncoding};

/// Scan `path` once and return the start-of-record byte offsets.
///
/// `offsets[i]` is where logical record `i` begins; `offsets[0]` sits just
/// past any BOM and the final entry is the end of file, so the vector holds
/// `records + 1` entries. An empty file yields a single entry and zero
/// records.
pub fn find_newlines(path: &Path, encoding: TextEncoding) -> Result<Vec<u64>> {
    let mut reader = EncodedReader::open(path, encoding)
        .with_context(|| format!("indexing {}", path.display()))?;
    let mut offsets = vec![reader.pos()];
    let mut line = String::new();
    while reader.read_line(&mut line)? {
        offsets.push(reader.pos());
    }
    Ok(offsets)
}

/// Number of records described by a newline index.
pub fn record_count(offsets: &[u64]) -> usize {
    offsets.len().saturating_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn offsets_are_record_starts() -> Result<()> {
        let mut tmp = tempfile::NamedTempFile::new()?;
        tmp.write_all(b"A,B\n1,2\n3,4\n")?;
        let offsets = find_newlines(tmp.path(), TextEncoding::Utf8)?;
        assert_eq!(offsets, vec![0, 4, 8, 12]);
        assert_eq!(record_count(&offsets), 3);
        Ok(())
    }

    #[test]
    fn empty_file_has_zero_records() -> Result<()> {
        let tmp = tempfile::NamedTempFile::new()?;
        let offsets = find_newlines(tmp.path(), TextEncoding::Utf8)?;
        assert_eq!(offsets, vec![0]);
        assert_eq!(record_count(&offsets), 0);
        Ok(())
    }

    #[test]
    fn bom_shifts_the_first_offset() -> Result<()> {
        let mut tmp = tempfile::NamedTempFile::new()?;
        tmp.write_all(b"\xEF\xBB\xBFA\n1\n")?;
        let offsets = find_newlines(tmp.path(), TextEncoding::Utf8)?;
        assert_eq!(offsets, vec![3, 5, 7]);
        Ok(())
    }

    #[test]
    fn monotonically_increasing() -> Result<()> {
        let mut tmp = tempfile::NamedTempFile::new()?;
        tmp.write_all(b"a\nbb\nccc\ndddd")?;
        let offsets = find_newlines(tmp.path(), TextEncoding::Utf8)?;
        assert!(offsets.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(record_count(&offsets), 4);
        Ok(())
    }
}
