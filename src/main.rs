// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2025 Brian Hetro <whee@smaertness.net>

//! Command-line interface for portus-unpack.
//!
//! This binary provides the `portus-unpack` command, which reads ChatGPT
//! `conversations.json` exports and writes every conversation as a JSON list
//! of token-bounded parts.

use lexopt::prelude::*;
use portus_unpack::export::{self, ConversationMeta};
use portus_unpack::flatten::FlattenOptions;
use portus_unpack::split::{self, Part, PartRecord};
use portus_unpack::tokens::{self, TiktokenCounter};
use snafu::{ensure, prelude::*};
use std::path::{Path, PathBuf};
use portus_unpack::Summary;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

/// File name looked for when an input is a directory.
const EXPORT_FILE_NAME: &str = "conversations.json";

/// Where to write the rendered output.
#[derive(Clone)]
enum OutputTarget {
    /// Write to the specified file.
    File(PathBuf),
    /// Write to stdout.
    Stdout,
}

struct Cli {
    input: Vec<PathBuf>,
    output: OutputTarget,
    flatten: FlattenOptions,
    max_tokens: Option<usize>,
    quiet: bool,
    verbose: bool,
    force: bool,
}

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("failed to parse arguments: {source}"))]
    ParseArgs { source: lexopt::Error },

    #[snafu(display("failed to initialize logging: {message}"))]
    InitLogging { message: String },

    #[snafu(display("at least one input file or directory is required"))]
    NoInputFiles,

    #[snafu(display("{} is an archive; extract it and pass the folder instead", path.display()))]
    UnsupportedArchive { path: PathBuf },

    #[snafu(display("no {EXPORT_FILE_NAME} found in the given inputs"))]
    NoExportsFound,

    #[snafu(display("failed to load tokenizer: {source}"))]
    LoadTokenizer { source: tokens::TokenError },

    #[snafu(display("failed to create output directory: {source}"))]
    CreateOutputDir { source: std::io::Error },

    #[snafu(display("failed to read {}: {source}", path.display()))]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("failed to parse {}: {source}", path.display()))]
    ParseFile {
        path: PathBuf,
        source: export::ParseError,
    },

    #[snafu(display("failed to serialize output: {source}"))]
    Serialize { source: serde_json::Error },

    #[snafu(display("failed to write {}: {source}", path.display()))]
    WriteFile {
        path: PathBuf,
        source: std::io::Error,
    },
}

fn print_help() {
    println!(
        "\
{name} {version}
Flatten ChatGPT conversation exports and split them into token-bounded parts

Usage: {name} [OPTIONS] -o <OUTPUT> <INPUT>...

Arguments:
  <INPUT>...  {EXPORT_FILE_NAME} files, or directories containing them

Options:
  -o, --output <OUTPUT>     Output JSON file (or - for stdout)
      --message-time        Include each message's creation time
      --model               Include the model that produced each message
      --split [<N>]         Split parts at N tokens, e.g. 4k or 10.5k (default: 8k)
      --no-split            Put each conversation in a single part

Other options:
  -q, --quiet               Suppress progress messages
  -v, --verbose             Log debug diagnostics (RUST_LOG overrides)
  -f, --force               Overwrite an existing output file
  -h, --help                Print help
  -V, --version             Print version",
        name = env!("CARGO_PKG_NAME"),
        version = env!("CARGO_PKG_VERSION"),
    );
}

fn parse_args() -> Result<Cli, lexopt::Error> {
    // Show help if no arguments provided
    if std::env::args().len() == 1 {
        print_help();
        std::process::exit(0);
    }

    let mut input = Vec::new();
    let mut output: Option<OutputTarget> = None;
    let mut flatten = FlattenOptions::default();
    let mut max_tokens = Some(split::DEFAULT_MAX_TOKENS);
    let mut quiet = false;
    let mut verbose = false;
    let mut force = false;

    let mut parser = lexopt::Parser::from_env();
    while let Some(arg) = parser.next()? {
        match arg {
            Short('o') | Long("output") => {
                let val: PathBuf = parser.value()?.parse()?;
                output = Some(if val == Path::new("-") {
                    OutputTarget::Stdout
                } else {
                    OutputTarget::File(val)
                });
            }
            Long("message-time") => flatten.include_time = true,
            Long("model") => flatten.include_model = true,
            // Split flags - last one wins
            Long("split") => {
                let value = match parser.optional_value() {
                    Some(val) => Some(val.string()?),
                    None => next_budget(&mut parser),
                };
                max_tokens = Some(match value {
                    Some(val) => split::parse_budget(&val).map_err(|e| e.to_string())?,
                    None => split::DEFAULT_MAX_TOKENS,
                });
            }
            Long("no-split") => max_tokens = None,
            Short('q') | Long("quiet") => quiet = true,
            Short('v') | Long("verbose") => verbose = true,
            Short('f') | Long("force") => force = true,
            Short('h') | Long("help") => {
                print_help();
                std::process::exit(0);
            }
            Short('V') | Long("version") => {
                println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            Value(val) => input.push(val.parse()?),
            _ => return Err(arg.unexpected()),
        }
    }

    Ok(Cli {
        input,
        output: output.ok_or("missing required option: --output")?,
        flatten,
        max_tokens,
        quiet,
        verbose,
        force,
    })
}

/// Takes the argument after a bare `--split` when it reads as a budget.
///
/// Anything else (an input path, another flag) is left for the main loop, so
/// `--split 4k` and `--split <INPUT>` both work.
fn next_budget(parser: &mut lexopt::Parser) -> Option<String> {
    let mut raw = parser.try_raw_args()?;
    raw.next_if(|arg| arg.to_str().is_some_and(|s| split::parse_budget(s).is_ok()))
        .and_then(|arg| arg.into_string().ok())
}

/// Installs the stderr log subscriber, keeping stdout free for JSON output.
fn init_logging(verbose: bool) -> Result<(), Error> {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose)
        .compact()
        .try_init()
        .map_err(|err| Error::InitLogging {
            message: err.to_string(),
        })
}

fn main() -> Result<(), Error> {
    let cli = parse_args().context(ParseArgsSnafu)?;
    init_logging(cli.verbose)?;

    ensure!(!cli.input.is_empty(), NoInputFilesSnafu);

    // Collect all input files first
    let files = collect_input_files(&cli.input)?;
    ensure!(!files.is_empty(), NoExportsFoundSnafu);

    if let OutputTarget::File(path) = &cli.output
        && path.exists()
        && !cli.force
    {
        eprintln!(
            "Skipping {} (already exists, use --force to overwrite)",
            path.display()
        );
        return Ok(());
    }

    let counter = TiktokenCounter::for_model(tokens::TOKENIZER_MODEL).context(LoadTokenizerSnafu)?;
    debug!(model = counter.model(), "tokenizer loaded");

    let mut summary = Summary::default();
    let mut exported = Vec::new();
    for file in &files {
        exported.extend(process_file(file, &cli, &counter, &mut summary)?);
    }

    let records: Vec<PartRecord<'_>> = exported
        .iter()
        .flat_map(|(meta, parts)| parts.iter().map(move |part| PartRecord::new(meta, part)))
        .collect();
    let json = serde_json::to_string_pretty(&records).context(SerializeSnafu)?;

    write_output(&cli, &json)?;

    if !cli.quiet {
        eprintln!(
            "Exported {} part(s) from {} conversation(s). Skipped {}. Failed {}.",
            summary.parts, summary.conversations, summary.skipped, summary.failed
        );
    }
    Ok(())
}

/// Collects all export files from the given inputs (files and directories).
fn collect_input_files(inputs: &[PathBuf]) -> Result<Vec<PathBuf>, Error> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            for entry in WalkDir::new(input)
                .sort_by_file_name()
                .into_iter()
                .filter_map(Result::ok)
                .filter(|e| e.file_type().is_file() && e.file_name() == EXPORT_FILE_NAME)
            {
                files.push(entry.path().to_path_buf());
            }
        } else {
            ensure!(
                !input
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("zip")),
                UnsupportedArchiveSnafu { path: input }
            );
            files.push(input.clone());
        }
    }
    Ok(files)
}

/// Reads, parses and unpacks one export file.
fn process_file(
    input: &Path,
    cli: &Cli,
    counter: &TiktokenCounter,
    summary: &mut Summary,
) -> Result<Vec<(ConversationMeta, Vec<Part>)>, Error> {
    let json = std::fs::read_to_string(input).context(ReadFileSnafu { path: input })?;
    let conversations = export::parse_export(&json).context(ParseFileSnafu { path: input })?;
    debug!(path = %input.display(), conversations = conversations.len(), "parsed export");

    Ok(portus_unpack::unpack_all(
        conversations,
        &cli.flatten,
        cli.max_tokens,
        counter,
        summary,
    ))
}

fn write_output(cli: &Cli, json: &str) -> Result<(), Error> {
    match &cli.output {
        OutputTarget::Stdout => println!("{json}"),
        OutputTarget::File(path) => {
            // Create parent directory if needed
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent).context(CreateOutputDirSnafu)?;
            }
            std::fs::write(path, json).context(WriteFileSnafu { path })?;
            if !cli.quiet {
                eprintln!("Wrote {}", path.display());
            }
        }
    }
    Ok(())
}
