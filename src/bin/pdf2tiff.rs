//! CLI binary for pdf2tiff.
//!
//! A thin shim over the library crate: maps CLI flags to `JobConfig`, runs
//! one invocation per named source, and prints the outcome of each.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use pdf2tiff::{
    JobConfig, JobError, JobProgressCallback, JobReport, JobRunner, JobState, Location,
    ObjectStoreStorage, PdfiumRasterizer, ProgressCallback, SourceRef, StorageSettings,
};
use serde::Serialize;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress: one spinner for the whole batch plus a log line per
/// published page and per finished source. Invocations run concurrently, so
/// lines from different sources interleave.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new(total_sources: usize) -> Arc<Self> {
        let bar = ProgressBar::new(total_sources as u64);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:30.green/238}] {pos}/{len} sources  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Converting");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self { bar })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl JobProgressCallback for CliProgressCallback {
    fn on_state_change(&self, source: &str, state: &JobState) {
        if !state.is_terminal() {
            self.bar.set_message(format!("{source}: {state}"));
        }
    }

    fn on_page_published(&self, _source: &str, _index: usize, object: &str) {
        self.bar.println(format!("  {} {}", green("✓"), dim(object)));
    }

    fn on_job_complete(&self, report: &JobReport) {
        self.bar.println(format!(
            "{} {}  {} pages  {}ms",
            green("✔"),
            bold(&report.source),
            report.page_count(),
            report.total_duration_ms,
        ));
        self.bar.inc(1);
    }

    fn on_job_failed(&self, source: &str, error: &JobError) {
        self.bar
            .println(format!("{} {}  {}", red("✘"), bold(source), red(&error.to_string())));
        self.bar.inc(1);
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert one PDF from the default input container
  pdf2tiff invoice.pdf

  # Trigger paths may carry the input container prefix
  pdf2tiff docurefattachmenttest/invoice.pdf

  # Several sources, two at a time, JSON reports on stdout
  pdf2tiff --concurrency 2 --json a.pdf b.pdf c.pdf > reports.json

  # Against the local storage emulator
  PDF2TIFF_STORAGE="UseDevelopmentStorage=true" pdf2tiff invoice.pdf

ENVIRONMENT VARIABLES:
  PDF2TIFF_STORAGE            Storage connection string (name set by --storage-env)
  PDF2TIFF_INPUT_CONTAINER    Input container
  PDF2TIFF_OUTPUT_CONTAINER   Output container for page images
  PDF2TIFF_ARCHIVE_CONTAINER  Archive container for processed sources
  PDF2TIFF_SCRATCH_DIR        Root for per-invocation scratch directories
  PDF2TIFF_TIMEOUT            Per-invocation timeout in seconds
  PDFIUM_LIB_PATH             Path to libpdfium (file or directory)
  RUST_LOG                    Log filter, overrides --verbose/--quiet

OUTPUT NAMING:
  invoice.pdf (3 pages) ──▶ output/invoice_page_1.tiff … invoice_page_3.tiff
                        ──▶ archive/invoice.pdf (removed from input)
"#;

/// Convert PDFs in blob storage to per-page 300 DPI TIFFs and archive them.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2tiff",
    version,
    about = "Convert PDFs in blob storage to per-page TIFF images and archive the source",
    long_about = "Runs one conversion invocation per named PDF: renders every page at the \
configured DPI, publishes `{stem}_page_{n}.tiff` to the output container, copies the source \
to the archive container and deletes it from the input container.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Source object names in the input container.
    #[arg(required = true)]
    names: Vec<String>,

    /// Input container holding the source PDFs.
    #[arg(long, env = "PDF2TIFF_INPUT_CONTAINER", default_value = pdf2tiff::config::DEFAULT_INPUT_CONTAINER)]
    input_container: String,

    /// Output container receiving page images.
    #[arg(long, env = "PDF2TIFF_OUTPUT_CONTAINER", default_value = pdf2tiff::config::DEFAULT_OUTPUT_CONTAINER)]
    output_container: String,

    /// Archive container receiving processed sources.
    #[arg(long, env = "PDF2TIFF_ARCHIVE_CONTAINER", default_value = pdf2tiff::config::DEFAULT_ARCHIVE_CONTAINER)]
    archive_container: String,

    /// Name of the environment variable holding the storage connection string.
    #[arg(long, default_value = "PDF2TIFF_STORAGE")]
    storage_env: String,

    /// Root directory for per-invocation scratch space.
    #[arg(long, env = "PDF2TIFF_SCRATCH_DIR")]
    scratch_dir: Option<PathBuf>,

    /// Rendering DPI (72–1200).
    #[arg(long, env = "PDF2TIFF_DPI", default_value_t = pdf2tiff::config::DEFAULT_DPI,
          value_parser = clap::value_parser!(u32).range(72..=1200))]
    dpi: u32,

    /// Per-invocation timeout in seconds.
    #[arg(long, env = "PDF2TIFF_TIMEOUT")]
    timeout: Option<u64>,

    /// Path to libpdfium, or a directory containing it.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// Maximum concurrent invocations.
    #[arg(short, long, env = "PDF2TIFF_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Print one JSON record per source on stdout.
    #[arg(long, env = "PDF2TIFF_JSON")]
    json: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2TIFF_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2TIFF_QUIET")]
    quiet: bool,
}

/// Per-source line of `--json` output.
#[derive(Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum Outcome<'a> {
    Done {
        report: &'a JobReport,
    },
    Failed {
        source: &'a str,
        kind: pdf2tiff::JobErrorKind,
        error: String,
        source_preserved: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar carries the per-page feedback, so library INFO logs
    // are only shown when it is off.
    let show_progress = !cli.quiet && !cli.json && !cli.verbose;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress = show_progress.then(|| CliProgressCallback::new(cli.names.len()));
    let config = build_config(
        &cli,
        progress
            .clone()
            .map(|cb| cb as ProgressCallback),
    )?;

    // ── Storage + pdfium ─────────────────────────────────────────────────
    let settings = StorageSettings::from_env(&cli.storage_env)
        .with_context(|| format!("Failed to read storage settings from ${}", cli.storage_env))?;
    let storage = ObjectStoreStorage::azure(&settings, config.locations.containers())
        .context("Failed to initialise blob storage")?;
    let rasterizer = PdfiumRasterizer::new(config.pdfium_library.as_deref())
        .context("Failed to load pdfium")?;

    // ── Run ──────────────────────────────────────────────────────────────
    let sources: Vec<SourceRef> = cli
        .names
        .iter()
        .map(|name| SourceRef::from_trigger_path(name, &cli.input_container))
        .collect();

    let runner = JobRunner::new(Arc::new(storage), Arc::new(rasterizer), config);
    let results = runner.run_batch(sources).await;

    if let Some(ref cb) = progress {
        cb.finish();
    }

    let failed = results.iter().filter(|(_, r)| r.is_err()).count();

    if cli.json {
        for (source, result) in &results {
            let outcome = match result {
                Ok(report) => Outcome::Done { report },
                Err(e) => Outcome::Failed {
                    source: &source.name,
                    kind: e.kind(),
                    error: e.to_string(),
                    source_preserved: e.source_preserved(),
                },
            };
            println!(
                "{}",
                serde_json::to_string(&outcome).context("Failed to serialise report")?
            );
        }
    } else if !cli.quiet {
        let pages: usize = results
            .iter()
            .filter_map(|(_, r)| r.as_ref().ok())
            .map(JobReport::page_count)
            .sum();
        eprintln!(
            "{}  {}/{} sources  {} pages",
            if failed == 0 { green("✔") } else { red("✘") },
            results.len() - failed,
            results.len(),
            pages,
        );
        if !show_progress {
            for (source, result) in &results {
                if let Err(e) = result {
                    eprintln!("  {} {}: {}", red("✗"), source, e);
                }
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} invocations failed", results.len());
    }
    Ok(())
}

/// Map CLI args to `JobConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<JobConfig> {
    let mut builder = JobConfig::builder()
        .dpi(cli.dpi)
        .input(Location::new(&cli.input_container))
        .output(Location::new(&cli.output_container))
        .archive(Location::new(&cli.archive_container))
        .concurrency(cli.concurrency);

    if let Some(ref dir) = cli.scratch_dir {
        builder = builder.scratch_root(dir);
    }
    if let Some(secs) = cli.timeout {
        builder = builder.timeout_secs(secs);
    }
    if let Some(ref lib) = cli.pdfium_lib {
        builder = builder.pdfium_library(lib);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
