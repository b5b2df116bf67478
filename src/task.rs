//! Work units and the two-pass slice processor.
//!
//! A [`Task`] is self-contained: source path, encoding, dialect, the byte
//! offset of its first record, a row count, and one destination page path
//! per kept column. Tasks own disjoint byte ranges and disjoint output
//! paths, so they can run in any order, in-process or in separate worker
//! processes, with no shared state.

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

use crate::datatypes::Ranks;
use crate::dialect::Dialect;
use crate::encoding::{EncodedReader, TextEncoding};
use crate::page::{ColumnPage, PageType};
use crate::parser::RecordParser;

/// One slice of the import: produces one page per kept column.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Task {
    pub source: PathBuf,
    pub encoding: TextEncoding,
    pub dialect: Dialect,
    /// Destination page per kept column, in output column order.
    pub pages: Vec<PathBuf>,
    /// Source field index per kept column, parallel to `pages`.
    pub import_fields: Vec<usize>,
    /// Byte offset of the slice's first record.
    pub offset: u64,
    /// Records in this slice; the final slice of a file may be shorter than
    /// the page size.
    pub row_count: usize,
    pub guess_dtypes: bool,
}

/// The full plan for one import.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskSet {
    pub source: PathBuf,
    pub encoding: TextEncoding,
    pub dialect: Dialect,
    pub page_size: usize,
    pub guess_dtypes: bool,
    pub import_fields: Vec<usize>,
    /// Output column name → its pages in slice order.
    pub columns: Vec<(String, Vec<PathBuf>)>,
    pub tasks: Vec<Task>,
}

impl TaskSet {
    pub fn total_rows(&self) -> usize {
        self.tasks.iter().map(|t| t.row_count).sum()
    }
}

/// Execute one task: two passes over the slice's records.
///
/// Pass 1 streams the records collecting per-column rank counters and
/// longest string lengths; the final page type for each column is chosen
/// from those and the page headers are written. Pass 2 re-seeks to the
/// slice start and materializes every element. Returns the number of rows
/// written to each page.
pub fn process_task(task: &Task) -> Result<usize> {
    ensure!(
        task.pages.len() == task.import_fields.len(),
        "task has {} pages but {} import fields",
        task.pages.len(),
        task.import_fields.len()
    );
    let n_cols = task.pages.len();

    let mut reader = EncodedReader::open(&task.source, task.encoding)
        .with_context(|| format!("task source {}", task.source.display()))?;
    reader.seek(task.offset)?;
    let mut parser = RecordParser::new(task.dialect.clone());
    let mut line = String::new();

    // pass 1: collect
    let mut longest = vec![0usize; n_cols];
    let mut ranks: Option<Vec<Ranks>> = task
        .guess_dtypes
        .then(|| vec![Ranks::new(); n_cols]);
    let mut n_rows = 0usize;
    while n_rows < task.row_count && reader.read_line(&mut line)? {
        parser
            .parse_line(&line)
            .with_context(|| format!("record {} of {}", n_rows, task.source.display()))?;
        for (slot, &field_ix) in task.import_fields.iter().enumerate() {
            let field = parser.field(field_ix).unwrap_or("");
            match &mut ranks {
                Some(ranks) => {
                    let dt = ranks[slot].update(field);
                    if dt == crate::datatypes::DataType::String {
                        longest[slot] = longest[slot].max(field.chars().count());
                    }
                }
                None => longest[slot] = longest[slot].max(field.chars().count()),
            }
        }
        n_rows += 1;
    }

    // choose page types and write headers
    let mut pages: Vec<ColumnPage> = Vec::with_capacity(n_cols);
    for slot in 0..n_cols {
        let page_type = match &mut ranks {
            Some(ranks) => ranks[slot].select_page_type(longest[slot]),
            None => PageType::Unicode {
                width: longest[slot].max(1),
            },
        };
        pages.push(ColumnPage::create(&task.pages[slot], page_type, n_rows)?);
    }
    debug!(
        source = %task.source.display(),
        offset = task.offset,
        rows = n_rows,
        "pass 1 complete"
    );

    // pass 2: dump
    reader.seek(task.offset)?;
    for row in 0..n_rows {
        ensure!(
            reader.read_line(&mut line)?,
            "{}: slice shrank between passes at record {row}",
            task.source.display()
        );
        parser.parse_line(&line)?;
        for (slot, &field_ix) in task.import_fields.iter().enumerate() {
            let field = parser.field(field_ix).unwrap_or("");
            let page = &mut pages[slot];
            if page.page_type() == PageType::Object {
                let ranks = ranks.as_ref().expect("object pages imply guessing");
                let value = ranks[slot].parse_first(field);
                page.write_object(&value)?;
            } else {
                page.write_element(field)
                    .with_context(|| format!("record {row}"))?;
            }
        }
    }
    for page in pages {
        page.finalize()?;
    }
    Ok(n_rows)
}
