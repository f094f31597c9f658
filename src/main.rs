//! CLI for refmark - Normalize reference lists and inline citation markers in Markdown documents.

use std::fmt;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use refmark::{
    build_sections, check_document, load_labels, process_document, CitationStyle, PipelineOptions,
    Replacement, ReviewItem, SectionMode, DEFAULT_LOOKAHEAD,
};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// Normalize reference lists and inline citation markers in Markdown documents
#[derive(Parser)]
#[command(name = "refmark")]
#[command(version)]
#[command(after_help = "\
Examples:
  refmark scan notes.md
  refmark check report.md --multi --strict
  refmark rewrite report.md --labels labels.json -o report.out.md
  cat report.md | refmark rewrite - --labels labels.jsonl --dry-run")]
struct Cli {
    /// Log debug details (skipped lines, rejected headers) to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print reference sections and parsed references as JSON
    Scan {
        /// Input Markdown file (use '-' for stdin)
        input: PathBuf,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },

    /// Report used, unused and undefined citations per section
    Check {
        /// Input Markdown file (use '-' for stdin)
        input: PathBuf,

        #[command(flatten)]
        pipeline: PipelineArgs,

        /// Fail when any citation has no matching reference
        #[arg(long)]
        strict: bool,
    },

    /// Replace citation markers and reference entries with final labels
    #[command(after_help = "\
Label files:
  JSON object   {\"1\": \"[^Smith-2020]\", \"2\": {\"label\": \"[^Doe-2019]\", \"citation\": \"...\"}}
  JSON array    one such object per reference section, in document order
  JSONL         {\"number\": 1, \"label\": \"[^Smith-2020]\", \"section\": 0} per line")]
    Rewrite {
        /// Input Markdown file (use '-' for stdin)
        input: PathBuf,

        /// Label file (JSON object, JSON array per section, or JSONL)
        #[arg(short, long)]
        labels: PathBuf,

        #[command(flatten)]
        pipeline: PipelineArgs,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print the replacement log instead of the rewritten document
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Args)]
struct PipelineArgs {
    /// Process every reference section instead of only the last one
    #[arg(long)]
    multi: bool,

    /// Inline citation style
    #[arg(long, value_enum, default_value_t = StyleArg::Auto)]
    style: StyleArg,

    /// Lines searched below a header for a reference entry
    #[arg(long, default_value_t = DEFAULT_LOOKAHEAD)]
    lookahead: usize,
}

#[derive(Clone, Copy, ValueEnum)]
enum StyleArg {
    Auto,
    Numeric,
    Footnote,
}

impl PipelineArgs {
    fn options(&self) -> PipelineOptions {
        PipelineOptions {
            mode: if self.multi { SectionMode::Multi } else { SectionMode::Single },
            style: match self.style {
                StyleArg::Auto => CitationStyle::Auto,
                StyleArg::Numeric => CitationStyle::Numeric,
                StyleArg::Footnote => CitationStyle::Footnote,
            },
            lookahead: self.lookahead,
        }
    }
}

// ---------------------------------------------------------------------------
// AppError — semantic exit codes
// ---------------------------------------------------------------------------

enum AppError {
    /// Exit 10 — input file not found / unreadable
    InputFile(String),
    /// Exit 11 — label file not found / invalid
    LabelFile(String),
    /// Exit 13 — citations without a reference definition (--strict)
    UndefinedCitations(String),
    /// Exit 15 — cannot write output
    OutputFile(String),
}

impl AppError {
    fn exit_code(&self) -> i32 {
        match self {
            AppError::InputFile(_) => 10,
            AppError::LabelFile(_) => 11,
            AppError::UndefinedCitations(_) => 13,
            AppError::OutputFile(_) => 15,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::InputFile(msg) => {
                write!(f, "{}\n  hint: verify the file path is correct", msg)
            }
            AppError::LabelFile(msg) => {
                write!(
                    f,
                    "{}\n  hint: the file must map reference numbers to labels as a JSON object, an array of objects (one per section), or JSONL",
                    msg
                )
            }
            AppError::UndefinedCitations(msg) => {
                write!(
                    f,
                    "{}\n  hint: add the missing entries to the reference list or fix the citation numbers",
                    msg
                )
            }
            AppError::OutputFile(msg) => {
                write!(
                    f,
                    "{}\n  hint: check that the output directory exists and is writable",
                    msg
                )
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        process::exit(e.exit_code());
    }
}

fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Scan { input, pipeline } => scan_command(&input, &pipeline.options()),
        Commands::Check {
            input,
            pipeline,
            strict,
        } => check_command(&input, &pipeline.options(), strict),
        Commands::Rewrite {
            input,
            labels,
            pipeline,
            output,
            dry_run,
        } => rewrite_command(&input, &labels, &pipeline.options(), output.as_deref(), dry_run),
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Print the located sections and their parsed references.
fn scan_command(input: &Path, options: &PipelineOptions) -> Result<(), AppError> {
    let markdown = read_input(input)?;
    let lines: Vec<&str> = markdown.lines().collect();
    let sections = build_sections(&lines, options);
    print_json(&sections)
}

/// Print usage sets per section, failing under --strict on undefined citations.
fn check_command(input: &Path, options: &PipelineOptions, strict: bool) -> Result<(), AppError> {
    let markdown = read_input(input)?;
    let reports = check_document(&markdown, options);
    print_json(&reports)?;

    let undefined: Vec<String> = reports
        .iter()
        .flat_map(|r| r.usage.undefined.iter().map(move |n| format!("[{}] in section {}", n, r.section_index)))
        .collect();
    if strict && !undefined.is_empty() {
        return Err(AppError::UndefinedCitations(format!(
            "{} undefined citation(s): {}",
            undefined.len(),
            undefined.join(", ")
        )));
    }

    Ok(())
}

#[derive(Serialize)]
struct DryRunSection<'a> {
    section_index: usize,
    replacement_count: usize,
    replacements: &'a [Replacement],
    review: &'a [ReviewItem],
}

/// Apply a label file to the document.
fn rewrite_command(
    input: &Path,
    labels_path: &Path,
    options: &PipelineOptions,
    output: Option<&Path>,
    dry_run: bool,
) -> Result<(), AppError> {
    // 1. Read the Markdown file (support '-' for stdin)
    let markdown = read_input(input)?;

    // 2. Load labels
    let mut labels = load_labels(labels_path)
        .map_err(|e| AppError::LabelFile(format!("'{}': {}", labels_path.display(), e)))?;

    // 3. Run the pipeline
    let processed = process_document(&markdown, options, &mut labels);

    if dry_run {
        let preview: Vec<DryRunSection> = processed
            .sections
            .iter()
            .map(|s| DryRunSection {
                section_index: s.section.section_index,
                replacement_count: s.rewrite.replacement_count,
                replacements: &s.rewrite.log,
                review: &s.review,
            })
            .collect();
        return print_json(&preview);
    }

    // 4. Write to file or stdout
    if let Some(output_path) = output {
        fs::write(output_path, &processed.text)
            .map_err(|e| AppError::OutputFile(format!("'{}': {}", output_path.display(), e)))?;
        eprintln!(
            "rewrote {} citation marker(s) in {} section(s), wrote {}",
            processed.replacement_count(),
            processed.sections.len(),
            output_path.display()
        );
    } else {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        write!(handle, "{}", processed.text)
            .map_err(|e| AppError::OutputFile(format!("stdout: {}", e)))?;
    }

    Ok(())
}

fn read_input(input: &Path) -> Result<String, AppError> {
    if input == Path::new("-") {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .map_err(|e| AppError::InputFile(format!("failed to read from stdin: {}", e)))?;
        Ok(buf)
    } else {
        fs::read_to_string(input).map_err(|e| AppError::InputFile(format!("'{}': {}", input.display(), e)))
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), AppError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| AppError::OutputFile(format!("failed to serialize report: {}", e)))?;
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    writeln!(handle, "{}", json).map_err(|e| AppError::OutputFile(format!("stdout: {}", e)))
}
