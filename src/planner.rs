//! Task planner: turn a file and a column selection into a set of
//! self-contained, disjoint work units.
//!
//! The planner is the only place that allocates output paths, so workers
//! never need to synchronize: by the time a task exists, its byte range and
//! its page paths are exclusively its own.

use anyhow::{Context, Result, bail};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::dialect::Dialect;
use crate::encoding::{EncodedReader, TextEncoding};
use crate::newlines::{find_newlines, record_count};
use crate::parser::RecordParser;
use crate::task::{Task, TaskSet};
use crate::utils::unique_name;

/// Inputs to one planning run.
#[derive(Clone, Debug)]
pub struct PlanRequest {
    pub source: PathBuf,
    pub encoding: TextEncoding,
    pub dialect: Dialect,
    /// Columns to import, by header name; `None` keeps every column.
    pub columns: Option<Vec<String>>,
    /// Records per slice.
    pub page_size: usize,
    pub guess_dtypes: bool,
    /// Scratch directory; pages land in `<workdir>/pages/`.
    pub workdir: PathBuf,
}

/// Parse the header record and return the field names.
fn read_header(source: &Path, encoding: TextEncoding, dialect: &Dialect, offset: u64) -> Result<Vec<String>> {
    let mut reader = EncodedReader::open(source, encoding)?;
    reader.seek(offset)?;
    let mut line = String::new();
    if !reader.read_line(&mut line)? {
        bail!("{}: end of file", source.display());
    }
    let mut parser = RecordParser::new(dialect.clone());
    parser
        .parse_line(&line)
        .with_context(|| format!("{}: header record", source.display()))?;
    Ok(parser.fields().map(str::to_string).collect())
}

/// Allocate the next free `<dir>/<n>.npy`, skipping names that already
/// exist. `next` persists across calls so numbering is monotonic.
fn allocate_page_path(pages_dir: &Path, next: &mut u64) -> PathBuf {
    loop {
        let candidate = pages_dir.join(format!("{}.npy", *next));
        *next += 1;
        if !candidate.exists() {
            return candidate;
        }
    }
}

/// Build the full task set for an import.
///
/// Fails before any page allocation when the file is empty, the dialect is
/// invalid, or a requested column is missing from the header.
pub fn build_plan(req: &PlanRequest) -> Result<TaskSet> {
    req.dialect.validate()?;
    if req.page_size == 0 {
        bail!("page size must be at least 1");
    }

    let offsets = find_newlines(&req.source, req.encoding)?;
    let records = record_count(&offsets);
    if records == 0 {
        bail!("{}: end of file", req.source.display());
    }
    debug!(records, "newline index built");

    let header = read_header(&req.source, req.encoding, &req.dialect, offsets[0])?;

    // Resolve the requested columns against the header.
    let requested: Vec<String> = match &req.columns {
        Some(names) => names.clone(),
        None => header.clone(),
    };
    let mut import_fields = Vec::with_capacity(requested.len());
    let mut missing = Vec::new();
    for name in &requested {
        match header.iter().position(|h| h == name) {
            Some(ix) => import_fields.push(ix),
            None => missing.push(name.clone()),
        }
    }
    if !missing.is_empty() {
        bail!("Missing columns: {missing:?}");
    }

    // Output names: first come, first served; duplicates get _1, _2, …
    let mut taken: HashSet<String> = HashSet::new();
    let mut columns: Vec<(String, Vec<PathBuf>)> = Vec::with_capacity(requested.len());
    for name in &requested {
        let out = unique_name(name, &taken);
        taken.insert(out.clone());
        columns.push((out, Vec::new()));
    }

    let pages_dir = req.workdir.join("pages");
    std::fs::create_dir_all(&pages_dir)
        .with_context(|| format!("create {}", pages_dir.display()))?;

    // Slices over records 1..records; record 0 is the header.
    let mut tasks = Vec::new();
    let mut next_page = 0u64;
    let mut first = 1usize;
    while first < records {
        let row_count = req.page_size.min(records - first);
        let mut pages = Vec::with_capacity(columns.len());
        for (_, col_pages) in columns.iter_mut() {
            let path = allocate_page_path(&pages_dir, &mut next_page);
            col_pages.push(path.clone());
            pages.push(path);
        }
        tasks.push(Task {
            source: req.source.clone(),
            encoding: req.encoding,
            dialect: req.dialect.clone(),
            pages,
            import_fields: import_fields.clone(),
            offset: offsets[first],
            row_count,
            guess_dtypes: req.guess_dtypes,
        });
        first += row_count;
    }

    info!(
        source = %req.source.display(),
        columns = columns.len(),
        tasks = tasks.len(),
        rows = records - 1,
        "import planned"
    );

    Ok(TaskSet {
        source: req.source.clone(),
        encoding: req.encoding,
        dialect: req.dialect.clone(),
        page_size: req.page_size,
        guess_dtypes: req.guess_dtypes,
        import_fields,
        columns,
        tasks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("input.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        path
    }

    fn request(source: PathBuf, workdir: PathBuf) -> PlanRequest {
        PlanRequest {
            source,
            encoding: TextEncoding::Utf8,
            dialect: Dialect::default(),
            columns: None,
            page_size: 2,
            guess_dtypes: true,
            workdir,
        }
    }

    #[test]
    fn slices_cover_all_records_disjointly() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let source = write_csv(dir.path(), "A,B\n1,2\n3,4\n5,6\n7,8\n9,10\n");
        let set = build_plan(&request(source, dir.path().to_path_buf()))?;
        assert_eq!(set.tasks.len(), 3);
        assert_eq!(
            set.tasks.iter().map(|t| t.row_count).collect::<Vec<_>>(),
            [2, 2, 1]
        );
        // offsets strictly increase and all page paths are distinct
        let mut all_pages = HashSet::new();
        for task in &set.tasks {
            for page in &task.pages {
                assert!(all_pages.insert(page.clone()), "duplicate {page:?}");
            }
        }
        assert!(set.tasks.windows(2).all(|w| w[0].offset < w[1].offset));
        assert_eq!(set.total_rows(), 5);
        Ok(())
    }

    #[test]
    fn missing_columns_fail_before_allocation() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let source = write_csv(dir.path(), "A,B\n1,2\n");
        let mut req = request(source, dir.path().to_path_buf());
        req.columns = Some(vec!["A".into(), "Z".into()]);
        let err = build_plan(&req).unwrap_err();
        assert!(err.to_string().contains("Missing columns"), "{err}");
        assert!(!dir.path().join("pages").exists());
        Ok(())
    }

    #[test]
    fn requested_column_order_is_preserved() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let source = write_csv(dir.path(), "A,B,C\n1,2,3\n");
        let mut req = request(source, dir.path().to_path_buf());
        req.columns = Some(vec!["C".into(), "A".into()]);
        let set = build_plan(&req)?;
        assert_eq!(set.import_fields, [2, 0]);
        assert_eq!(set.columns[0].0, "C");
        assert_eq!(set.columns[1].0, "A");
        Ok(())
    }

    #[test]
    fn duplicate_headers_get_suffixes() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let source = write_csv(dir.path(), "X,X,X_1\n1,2,3\n");
        let set = build_plan(&request(source, dir.path().to_path_buf()))?;
        let names: Vec<&str> = set.columns.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["X", "X_1", "X_1_1"]);
        Ok(())
    }

    #[test]
    fn empty_file_fails_with_end_of_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let source = write_csv(dir.path(), "");
        let err = build_plan(&request(source, dir.path().to_path_buf())).unwrap_err();
        assert!(err.to_string().contains("end of file"), "{err}");
        Ok(())
    }

    #[test]
    fn header_only_file_plans_zero_tasks() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let source = write_csv(dir.path(), "A,B\n");
        let set = build_plan(&request(source, dir.path().to_path_buf()))?;
        assert!(set.tasks.is_empty());
        assert_eq!(set.columns.len(), 2);
        Ok(())
    }

    #[test]
    fn path_allocation_skips_existing_pages() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let source = write_csv(dir.path(), "A\n1\n2\n3\n");
        let pages_dir = dir.path().join("pages");
        std::fs::create_dir_all(&pages_dir)?;
        std::fs::write(pages_dir.join("0.npy"), b"occupied")?;
        let set = build_plan(&request(source, dir.path().to_path_buf()))?;
        let first = &set.tasks[0].pages[0];
        assert_eq!(first.file_name().unwrap(), "1.npy");
        Ok(())
    }

    #[test]
    fn replanning_produces_same_slices() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let source = write_csv(dir.path(), "A\n1\n2\n3\n4\n5\n");
        let req = request(source, dir.path().to_path_buf());
        let first = build_plan(&req)?;
        let second = build_plan(&req)?;
        let bounds = |s: &TaskSet| {
            s.tasks
                .iter()
                .map(|t| (t.offset, t.row_count))
                .collect::<Vec<_>>()
        };
        assert_eq!(bounds(&first), bounds(&second));
        assert_eq!(first.tasks.len(), second.tasks.len());
        Ok(())
    }
}
