mod analysis;
mod bytecode;
mod cfg;
mod classpath;
mod descriptor;
mod disjoint_set;
mod error;
mod filter;
mod insn;
mod ir;
mod library;
mod opcodes;
mod partition;
mod profile;
mod reader;
mod remap;
mod report;
#[cfg(test)]
mod test_support;
mod transform;

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};

use crate::classpath::ClassPath;
use crate::profile::Profile;
use crate::remap::name_map::NameMap;
use crate::report::{Rule, build_invocation, build_sarif};
use crate::transform::PassContext;

/// CLI arguments for classdeob execution.
#[derive(Parser, Debug)]
#[command(
    name = "classdeob",
    about = "Deobfuscates JVM class files and JAR files: removes dead code and restores readable names.",
    version
)]
struct Cli {
    /// Libraries to transform (`.jar`, `.class` or a directory of classes).
    #[arg(long, value_name = "PATH", required = true, num_args = 1..)]
    input: Vec<PathBuf>,
    /// Read-only libraries consulted for resolution.
    #[arg(long, value_name = "PATH")]
    dependency: Vec<PathBuf>,
    /// Platform jar backing the runtime lookup.
    #[arg(long, value_name = "PATH")]
    runtime: Option<PathBuf>,
    #[arg(long, value_name = "PATH")]
    profile: Option<PathBuf>,
    /// Curated names to apply when renaming.
    #[arg(long, value_name = "PATH")]
    names: Option<PathBuf>,
    /// Where to write the names chosen by this run.
    #[arg(long, value_name = "PATH")]
    mapping: Option<PathBuf>,
    /// SARIF report destination; `-` or absent means stdout.
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
    /// Where to write the transformed libraries as JSON.
    #[arg(long, value_name = "PATH")]
    dump: Option<PathBuf>,
    #[arg(long)]
    quiet: bool,
    #[arg(long)]
    timing: bool,
    #[arg(long, value_enum, default_value_t = LogLevel::Warn)]
    log_level: LogLevel,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn to_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.quiet {
        LogLevel::Error
    } else {
        cli.log_level
    };
    init_tracing(level);
    run(cli)
}

fn init_tracing(level: LogLevel) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_tracing_level().to_string()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let started_at = Instant::now();
    let profile = match &cli.profile {
        Some(path) => Profile::load(path)?,
        None => Profile::builtin()?,
    };
    let names = match &cli.names {
        Some(path) => NameMap::load(path)?,
        None => NameMap::default(),
    };
    let transformers = transform::configured(&profile)?;

    let mut classpath = reader::read_classpath(&cli.input, &cli.dependency, cli.runtime.as_deref())?;
    let class_count: usize = classpath.libraries().iter().map(|library| library.len()).sum();
    tracing::info!(
        libraries = classpath.libraries().len(),
        classes = class_count,
        members = classpath.all_own_members().count(),
        "loaded class path"
    );

    let mut context = PassContext::new(&profile, &names);
    transform::run_transformers(&mut classpath, &transformers, &mut context)?;

    let suspicious = context.diagnostics.count(Rule::SuspiciousRename);
    if suspicious > 0 {
        tracing::warn!(count = suspicious, "renamed names that look unobfuscated");
    }

    if let Some(path) = &cli.mapping {
        match &context.mapping {
            Some(mapping) => mapping.save(path)?,
            None => tracing::warn!(path = %path.display(), "remap did not run; no mapping written"),
        }
    }
    if let Some(path) = &cli.dump {
        write_dump(&classpath, path)?;
    }

    let sarif = build_sarif(&context.diagnostics, build_invocation());
    let mut writer = output_writer(cli.output.as_deref())?;
    serde_json::to_writer_pretty(&mut writer, &sarif)
        .context("failed to serialize SARIF output")?;
    writer
        .write_all(b"\n")
        .context("failed to write SARIF output")?;
    writer.flush().context("failed to write SARIF output")?;

    if cli.timing && !cli.quiet {
        eprintln!(
            "timing: total_ms={} classes={} diagnostics={}",
            started_at.elapsed().as_millis(),
            class_count,
            context.diagnostics.len()
        );
    }

    Ok(())
}

fn write_dump(classpath: &ClassPath, path: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, classpath.libraries())
        .with_context(|| format!("failed to write dump {}", path.display()))?;
    writer
        .flush()
        .with_context(|| format!("failed to write dump {}", path.display()))
}

fn output_writer(output: Option<&Path>) -> Result<Box<dyn Write>> {
    match output {
        Some(path) if path == Path::new("-") => Ok(Box::new(io::stdout())),
        Some(path) => Ok(Box::new(
            File::create(path).with_context(|| format!("failed to open {}", path.display()))?,
        )),
        None => Ok(Box::new(io::stdout())),
    }
}
