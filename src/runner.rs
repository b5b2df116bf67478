//! Execution engine for planned imports.
//!
//! The `Runner` executes a [`TaskSet`] produced by the planner. It supports
//! both **sequential** and **parallel** execution modes:
//!
//! - **Sequential** runs every task in order, in-process.
//! - **Parallel** fans out to independent worker processes, one `task`
//!   invocation of this same binary per slice, at most one per CPU at a
//!   time. Workers share nothing: each owns a disjoint byte range of the
//!   source and a disjoint set of output paths, so no synchronization
//!   exists beyond waiting for exits.
//!
//! Either way a `tasks.txt` with one shell-escaped worker invocation per
//! line is written next to the pages, so an external process-per-line
//! scheduler can replay or resume-from-scratch the same plan.

use anyhow::{Context, Result, bail};
use rayon::prelude::*;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

use crate::dialect::{Dialect, escape_char};
use crate::task::{Task, TaskSet, process_task};
use crate::utils::shell_join;

/// Execution mode for a task set.
#[derive(Clone, Copy, Debug)]
pub enum ExecMode {
    /// Run every task in this process, in order.
    Sequential,
    /// Fan out to worker processes; `workers` caps concurrent children and
    /// defaults to the CPU count.
    Parallel { workers: Option<usize> },
}

/// Executes a planned import. A killed or failing worker aborts the whole
/// import; completed tasks' pages remain on disk.
pub struct Runner {
    pub mode: ExecMode,
}

impl Default for Runner {
    fn default() -> Self {
        Self {
            mode: ExecMode::Sequential,
        }
    }
}

impl Runner {
    pub fn new(mode: ExecMode) -> Self {
        Self { mode }
    }

    /// Execute every task in `set`. The `tasks.txt` replay file is written
    /// separately by [`write_tasks_file`], plan time, whether or not the
    /// plan is executed.
    pub fn run(&self, set: &TaskSet) -> Result<()> {
        match self.mode {
            ExecMode::Sequential => {
                for (ix, task) in set.tasks.iter().enumerate() {
                    let rows = process_task(task).with_context(|| format!("task {ix}"))?;
                    debug!(task = ix, rows, "task complete");
                }
            }
            ExecMode::Parallel { workers } => {
                let exe = std::env::current_exe().context("locate worker binary")?;
                let workers = workers.unwrap_or_else(num_cpus::get).max(1);
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(workers)
                    .build()
                    .context("build dispatch pool")?;
                info!(workers, tasks = set.tasks.len(), "spawning workers");
                pool.install(|| {
                    set.tasks
                        .par_iter()
                        .enumerate()
                        .try_for_each(|(ix, task)| run_worker(&exe, ix, task))
                })?;
            }
        }
        info!(tasks = set.tasks.len(), "import complete");
        Ok(())
    }
}

fn run_worker(exe: &Path, ix: usize, task: &Task) -> Result<()> {
    let args = worker_args(task);
    debug!(task = ix, "spawning {}", exe.display());
    let status = Command::new(exe)
        .args(&args)
        .status()
        .with_context(|| format!("spawn worker for task {ix}"))?;
    if !status.success() {
        bail!("worker for task {ix} failed: {status}");
    }
    Ok(())
}

/// The argument vector that makes a worker process execute `task`.
pub fn worker_args(task: &Task) -> Vec<String> {
    let d: &Dialect = &task.dialect;
    let mut args = vec![
        format!("--encoding={}", task.encoding),
        format!("--delimiter={}", escape_char(d.delimiter)),
        format!(
            "--quotechar={}",
            d.quotechar.map(escape_char).unwrap_or_default()
        ),
        format!(
            "--escapechar={}",
            d.escapechar.map(escape_char).unwrap_or_default()
        ),
        format!("--lineterminator={}", escape_char(d.lineterminator)),
        format!("--doublequote={}", d.doublequote),
        format!("--skipinitialspace={}", d.skipinitialspace),
        format!("--skiptrailingspace={}", d.skiptrailingspace),
        format!("--strict={}", d.strict),
        format!("--quoting={}", d.quoting),
        format!("--guess_dtypes={}", task.guess_dtypes),
        "task".to_string(),
        format!("--pages={}", join_paths(&task.pages)),
        format!(
            "--fields={}",
            task.import_fields
                .iter()
                .map(usize::to_string)
                .collect::<Vec<_>>()
                .join(",")
        ),
        task.source.display().to_string(),
    ];
    args.push(task.offset.to_string());
    args.push(task.row_count.to_string());
    args
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Write `<pages_dir>/tasks.txt`: one shell-escaped worker invocation per
/// line, for external fan-out runners.
pub fn write_tasks_file(set: &TaskSet, pages_dir: &Path) -> Result<()> {
    let exe = std::env::current_exe()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "pagemill".to_string());
    let path = pages_dir.join("tasks.txt");
    let mut file = std::fs::File::create(&path)
        .with_context(|| format!("create {}", path.display()))?;
    for task in &set.tasks {
        let mut line = vec![exe.clone()];
        line.extend(worker_args(task));
        writeln!(file, "{}", shell_join(&line))?;
    }
    debug!(path = %path.display(), lines = set.tasks.len(), "wrote tasks file");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::TextEncoding;

    fn sample_task() -> Task {
        Task {
            source: PathBuf::from("/data/in.csv"),
            encoding: TextEncoding::Utf8,
            dialect: Dialect::default(),
            pages: vec![PathBuf::from("/w/pages/0.npy"), PathBuf::from("/w/pages/1.npy")],
            import_fields: vec![0, 2],
            offset: 4,
            row_count: 100,
            guess_dtypes: true,
        }
    }

    #[test]
    fn worker_args_round_trip_the_dialect() {
        let args = worker_args(&sample_task());
        assert!(args.contains(&"--encoding=UTF8".to_string()));
        assert!(args.contains(&"--delimiter=,".to_string()));
        assert!(args.contains(&"--quoting=QUOTE_MINIMAL".to_string()));
        assert!(args.contains(&"task".to_string()));
        assert!(args.contains(&"--pages=/w/pages/0.npy,/w/pages/1.npy".to_string()));
        assert!(args.contains(&"--fields=0,2".to_string()));
        assert_eq!(args[args.len() - 2], "4");
        assert_eq!(args[args.len() - 1], "100");
    }

    #[test]
    fn tab_delimiter_survives_escaping() {
        let mut task = sample_task();
        task.dialect.delimiter = '\t';
        let args = worker_args(&task);
        assert!(args.contains(&"--delimiter=\\t".to_string()));
    }

    #[test]
    fn tasks_file_is_one_line_per_task() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let set = TaskSet {
            source: PathBuf::from("/data/in.csv"),
            encoding: TextEncoding::Utf8,
            dialect: Dialect::default(),
            page_size: 100,
            guess_dtypes: true,
            import_fields: vec![0, 2],
            columns: vec![("a".into(), vec![]), ("b".into(), vec![])],
            tasks: vec![sample_task(), sample_task()],
        };
        write_tasks_file(&set, dir.path())?;
        let text = std::fs::read_to_string(dir.path().join("tasks.txt"))?;
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("--pages=/w/pages/0.npy,/w/pages/1.npy"));
        assert!(lines[0].contains(" task "));
        Ok(())
    }
}
