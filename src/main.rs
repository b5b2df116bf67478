use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use tracing::debug;

use pagemill::dialect::unescape_char;
use pagemill::runner::write_tasks_file;
use pagemill::{
    Config, DEFAULT_PAGE_SIZE, Dialect, ExecMode, PlanRequest, Runner, Task, TextEncoding,
    build_plan, encoding, process_task,
};

#[derive(Parser)]
#[command(
    name = "pagemill",
    about = "Import delimited text files as typed .npy column pages"
)]
struct Cli {
    /// Text encoding: UTF8, UTF16 or WIN1252. Sniffed from the BOM when
    /// omitted.
    #[arg(long, global = true)]
    encoding: Option<String>,

    /// Field delimiter (single character, escapes like \t accepted).
    #[arg(long, global = true, default_value = ",")]
    delimiter: String,

    /// Quote character; empty disables quoting entirely.
    #[arg(long, global = true, default_value = "\"")]
    quotechar: String,

    /// Escape character; empty for none.
    #[arg(long, global = true, default_value = "")]
    escapechar: String,

    /// Line terminator character.
    #[arg(long, global = true, default_value = "\\n")]
    lineterminator: String,

    /// Treat two quote characters inside a quoted field as one literal.
    #[arg(long, global = true, default_value_t = true, action = ArgAction::Set)]
    doublequote: bool,

    /// Discard spaces immediately after a delimiter.
    #[arg(long, global = true, default_value_t = false, action = ArgAction::Set)]
    skipinitialspace: bool,

    /// Trim trailing spaces when a field is saved.
    #[arg(long, global = true, default_value_t = false, action = ArgAction::Set)]
    skiptrailingspace: bool,

    /// Fail on malformed quoting instead of recovering.
    #[arg(long, global = true, default_value_t = false, action = ArgAction::Set)]
    strict: bool,

    /// Quoting mode: QUOTE_MINIMAL, QUOTE_ALL, QUOTE_NONNUMERIC,
    /// QUOTE_NONE, QUOTE_STRINGS or QUOTE_NOTNULL.
    #[arg(long, global = true, default_value = "QUOTE_MINIMAL")]
    quoting: String,

    /// Infer a page type per column slice instead of storing text.
    #[arg(long = "guess_dtypes", global = true, default_value_t = true, action = ArgAction::Set)]
    guess_dtypes: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Plan an import and optionally execute it.
    Import {
        /// Source file.
        path: PathBuf,
        /// Execute the plan after writing it.
        #[arg(value_parser = clap::value_parser!(bool))]
        execute: bool,
        /// Fan out to one worker process per slice instead of running
        /// in-process.
        #[arg(value_parser = clap::value_parser!(bool))]
        multiprocess: bool,
        /// Columns to import, comma separated; default is every header
        /// column.
        #[arg(long, value_delimiter = ',')]
        columns: Option<Vec<String>>,
        /// Records per slice.
        #[arg(long = "page_size", alias = "page-size", default_value_t = DEFAULT_PAGE_SIZE)]
        page_size: usize,
        /// Scratch directory; pages land in <workdir>/pages/.
        #[arg(long)]
        workdir: Option<PathBuf>,
    },
    /// Run one planned slice (normally invoked by the dispatcher).
    Task {
        /// Destination pages, comma separated, one per imported column.
        #[arg(long, value_delimiter = ',', required = true)]
        pages: Vec<PathBuf>,
        /// Source field index per imported column, comma separated.
        #[arg(long, value_delimiter = ',', required = true)]
        fields: Vec<usize>,
        /// Source file.
        path: PathBuf,
        /// Byte offset of the slice's first record.
        offset: u64,
        /// Records in the slice.
        row_count: usize,
    },
}

impl Cli {
    fn dialect(&self) -> Result<Dialect> {
        let optional = |flag: &str, value: &str| -> Result<Option<char>> {
            if value.is_empty() {
                Ok(None)
            } else {
                unescape_char(flag, value).map(Some)
            }
        };
        let dialect = Dialect {
            delimiter: unescape_char("delimiter", &self.delimiter)?,
            quotechar: optional("quotechar", &self.quotechar)?,
            escapechar: optional("escapechar", &self.escapechar)?,
            lineterminator: unescape_char("lineterminator", &self.lineterminator)?,
            doublequote: self.doublequote,
            skipinitialspace: self.skipinitialspace,
            skiptrailingspace: self.skiptrailingspace,
            strict: self.strict,
            quoting: self.quoting.parse()?,
        };
        dialect.validate()?;
        Ok(dialect)
    }

    fn encoding_for(&self, path: &std::path::Path) -> Result<TextEncoding> {
        match &self.encoding {
            Some(name) => name.parse(),
            None => encoding::sniff(path),
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(err) = run() {
        eprintln!("pagemill: {err:#}");
        process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let dialect = cli.dialect()?;

    match &cli.command {
        Command::Import {
            path,
            execute,
            multiprocess,
            columns,
            page_size,
            workdir,
        } => {
            let encoding = cli.encoding_for(path)?;
            let workdir = workdir
                .clone()
                .unwrap_or_else(|| Config::default().workdir);
            let request = PlanRequest {
                source: path.clone(),
                encoding,
                dialect,
                columns: columns.clone(),
                page_size: *page_size,
                guess_dtypes: cli.guess_dtypes,
                workdir: workdir.clone(),
            };
            let set = build_plan(&request).context("planning failed")?;
            write_tasks_file(&set, &workdir.join("pages"))?;

            let plan_path = workdir.join("plan.json");
            let plan_file = std::fs::File::create(&plan_path)
                .with_context(|| format!("create {}", plan_path.display()))?;
            serde_json::to_writer_pretty(plan_file, &set)?;

            if *execute {
                let mode = if *multiprocess {
                    ExecMode::Parallel { workers: None }
                } else {
                    ExecMode::Sequential
                };
                Runner::new(mode).run(&set)?;
            }

            println!(
                "{}: {} rows, {} tasks",
                path.display(),
                set.total_rows(),
                set.tasks.len()
            );
            for (name, pages) in &set.columns {
                println!("  {name}: {} page(s)", pages.len());
            }
        }
        Command::Task {
            pages,
            fields,
            path,
            offset,
            row_count,
        } => {
            let encoding = cli.encoding_for(path)?;
            let task = Task {
                source: path.clone(),
                encoding,
                dialect,
                pages: pages.clone(),
                import_fields: fields.clone(),
                offset: *offset,
                row_count: *row_count,
                guess_dtypes: cli.guess_dtypes,
            };
            let rows = process_task(&task)?;
            debug!(rows, "slice complete");
        }
    }
    Ok(())
}
