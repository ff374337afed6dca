//! threadlens command line interface
//!
//! Thin front-end over `threadlens-core`: reads dump files (or stdin),
//! runs the analysis pipeline, and renders the result tree. All analysis
//! logic lives in the core crate.
//!
//! # Usage
//!
//! ```bash
//! # Parse one dump and print the typed model
//! threadlens parse dump.txt
//!
//! # Analyze a sequence of dumps and print the verdict
//! threadlens diff dump1.txt dump2.txt dump3.txt
//!
//! # JSON output for tooling
//! threadlens diff -o json dumps.txt
//! ```
//!
//! Exit codes for `diff`: 0 healthy or minor issues, 1 suspected stall,
//! 2 deadlock, 3 operational error.

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use threadlens_core::analyzers::verdict::VerdictStatus;
use threadlens_core::{
    parse_all, AnalysisContext, AnalysisEngine, AnalysisOptions, AnalysisResult, RenderFormat,
    RendererRegistry, ResultPayload, ThreadDump,
};

#[derive(Parser)]
#[command(name = "threadlens")]
#[command(version)]
#[command(about = "Parse and analyze JVM thread dumps: healthy, stalled, or deadlocked")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, short = 'o', global = true, default_value = "text", value_enum)]
    format: OutputFormat,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
    Yaml,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse dumps and print the typed model (no analysis)
    Parse {
        /// Input file (reads stdin if not provided)
        file: Option<PathBuf>,
    },

    /// Run the analysis pipeline over one or more dumps
    Diff {
        /// Input files, each may contain several concatenated dumps
        /// (reads stdin if none provided)
        files: Vec<PathBuf>,

        /// Hide daemon threads from analysis
        #[arg(long)]
        no_daemon: bool,

        /// Also analyze runtime GC worker threads
        #[arg(long)]
        include_gc: bool,

        /// Also analyze runtime-internal VM threads
        #[arg(long)]
        include_vm: bool,

        /// Exclude threads whose name matches this regex (repeatable)
        #[arg(long = "ignore")]
        ignore_patterns: Vec<String>,

        /// Problem percentage at which the process counts as stalled
        #[arg(long, default_value_t = 90.0)]
        stall_threshold: f64,

        /// Waiter count from which a contended lock is hot
        #[arg(long, default_value_t = 3)]
        hot_lock_waiters: usize,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::from(3)
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Parse { file } => {
            let dumps = read_dumps(&file.into_iter().collect::<Vec<_>>())?;
            print_model(&dumps, cli.format)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Diff {
            files,
            no_daemon,
            include_gc,
            include_vm,
            ignore_patterns,
            stall_threshold,
            hot_lock_waiters,
        } => {
            let dumps = read_dumps(&files)?;
            let mut builder = AnalysisOptions::builder()
                .include_daemon(!no_daemon)
                .include_gc(include_gc)
                .include_vm(include_vm)
                .stall_threshold_percent(stall_threshold)
                .hot_lock_waiter_threshold(hot_lock_waiters);
            for pattern in &ignore_patterns {
                builder = builder.ignore_pattern(pattern);
            }

            let ctx = AnalysisContext::new(dumps, builder.build());
            let result = AnalysisEngine::with_default_analyzers().analyze_all(&ctx);
            print_result(&result, cli.format)?;
            Ok(exit_code_for(&result))
        }
    }
}

/// Read and parse every input; no files means stdin. A file containing
/// several concatenated dumps contributes one snapshot per dump.
fn read_dumps(files: &[PathBuf]) -> Result<Vec<ThreadDump>> {
    let mut dumps = vec![];
    if files.is_empty() {
        let mut buffer = Vec::new();
        std::io::stdin()
            .read_to_end(&mut buffer)
            .context("reading stdin")?;
        dumps.extend(parse_all(&String::from_utf8_lossy(&buffer)));
    } else {
        for file in files {
            let bytes = std::fs::read(file)
                .with_context(|| format!("reading {}", file.display()))?;
            dumps.extend(parse_all(&String::from_utf8_lossy(&bytes)));
        }
    }
    debug!(count = dumps.len(), "parsed input dumps");
    Ok(dumps)
}

fn print_model(dumps: &[ThreadDump], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(dumps)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(dumps)?),
        OutputFormat::Text => {
            for (index, dump) in dumps.iter().enumerate() {
                println!(
                    "dump {}: {} threads, source {}, {} deadlock section(s)",
                    index,
                    dump.threads.len(),
                    dump.source_type,
                    dump.deadlocks.len()
                );
                for thread in &dump.threads {
                    println!(
                        "  \"{}\" {} {} frames",
                        thread.name,
                        thread
                            .state
                            .map(|s| format!("{:?}", s))
                            .unwrap_or_else(|| "?".to_string()),
                        thread.stack.len()
                    );
                }
            }
        }
    }
    Ok(())
}

fn print_result(result: &AnalysisResult, format: OutputFormat) -> Result<()> {
    let registry = RendererRegistry::with_defaults();
    match format {
        OutputFormat::Text => {
            if let Some(text) = registry.render(result, RenderFormat::Text) {
                print!("{}", text);
            }
        }
        OutputFormat::Json => {
            if let Some(json) = registry.render(result, RenderFormat::Json) {
                println!("{}", json);
            }
        }
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(result)?),
    }
    Ok(())
}

/// Map the verdict to the documented exit codes.
fn exit_code_for(result: &AnalysisResult) -> ExitCode {
    let status = result.children.iter().find_map(|child| match &child.payload {
        Some(ResultPayload::Verdict(report)) => Some(report.status),
        _ => None,
    });
    match status {
        Some(VerdictStatus::Deadlock) => ExitCode::from(2),
        Some(VerdictStatus::SuspectedStall) => ExitCode::from(1),
        _ => ExitCode::SUCCESS,
    }
}
