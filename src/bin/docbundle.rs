//! CLI binary for docbundle.
//!
//! A thin shim over the library crate: maps flags to `PipelineConfig`,
//! converts every input into `--out-dir`, and optionally merges the results
//! into one bundle.

use anyhow::{Context, Result};
use clap::Parser;
use docbundle::{
    accept_supported, write_atomic, ArtifactRecord, JobState, Measurement, PageSize, PipelineConfig,
    PipelineManager, PipelineObserver, SharedObserver, StageError, UploadItem,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI observer using indicatif ─────────────────────────────────────────────

/// Renders one bar tick per finished file and a log line per outcome.
struct CliObserver {
    bar: ProgressBar,
}

impl CliObserver {
    fn new(total: usize) -> Arc<Self> {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} files  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        let bar = ProgressBar::new(total as u64);
        bar.set_style(style);
        bar.set_prefix("Converting");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self { bar })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl PipelineObserver for CliObserver {
    fn on_job_state_changed(&self, _job: docbundle::JobId, file_name: &str, state: JobState) {
        if matches!(state, JobState::Reading | JobState::Converting) {
            self.bar.set_message(format!("{state} {file_name}"));
        }
    }

    fn on_job_complete(&self, artifact: &ArtifactRecord) {
        self.bar.println(format!(
            "  {} {}  →  {}  {}",
            green("✓"),
            artifact.source_name,
            bold(&artifact.name),
            dim(&format!("{} pages, {} bytes", artifact.page_count, artifact.byte_len())),
        ));
        self.bar.inc(1);
    }

    fn on_job_failed(&self, _job: docbundle::JobId, error: &StageError) {
        let msg = error.to_string();
        // Truncate very long error messages to keep output tidy.
        let msg = if msg.chars().count() > 100 {
            format!("{}\u{2026}", msg.chars().take(99).collect::<String>())
        } else {
            msg
        };
        self.bar.println(format!("  {} {}", red("✗"), red(&msg)));
        self.bar.inc(1);
    }

    fn on_merge_complete(&self, bundle: &docbundle::Bundle) {
        self.bar.println(format!(
            "  {} bundle of {} files  {}",
            cyan("◆"),
            bundle.artifacts.len(),
            dim(&format!("{} pages", bundle.page_count)),
        ));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert a scan and a photo into ./out
  docbundle scan.tiff photo.jpg -o out

  # Convert and merge everything, in argument order, into one PDF
  docbundle cover.pdf scan.tiff photo.png --bundle bundle.pdf

  # US Letter pages for JPEG/PNG inputs, JSON summary on stdout
  docbundle --page-size letter --json *.jpg > summary.json

  # Per-file stage timings
  docbundle --timings big-scan.tif

SUPPORTED INPUTS:
  .pdf            passed through unchanged
  .jpg .jpeg      one page, image scaled to fit the page size
  .png            one page, image scaled to fit the page size
  .tif .tiff      one page per frame, each page sized to its frame

  Anything else is skipped with a warning.

ENVIRONMENT VARIABLES:
  DOCBUNDLE_OUT_DIR          Output directory (default: .)
  DOCBUNDLE_BUNDLE           Merge successful artifacts into this file
  DOCBUNDLE_PAGE_SIZE        a4 | letter | <width>x<height> in points
  DOCBUNDLE_CHUNK_SIZE       Ingestion chunk size in bytes
  DOCBUNDLE_CONVERT_WORKERS  Concurrent conversions
  RUST_LOG                   Overrides the log filter (e.g. docbundle=debug)
"#;

/// Convert PDF, JPEG, PNG and TIFF files to PDFs and bundle them.
#[derive(Parser, Debug)]
#[command(
    name = "docbundle",
    version,
    about = "Convert PDF, JPEG, PNG and multi-frame TIFF files to PDFs and merge them into a bundle",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Input files, in bundle order.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Directory for the converted PDFs.
    #[arg(short, long, env = "DOCBUNDLE_OUT_DIR", default_value = ".")]
    out_dir: PathBuf,

    /// Merge every successful artifact, in input order, into this file.
    #[arg(short, long, env = "DOCBUNDLE_BUNDLE")]
    bundle: Option<PathBuf>,

    /// Page size for JPEG and PNG inputs: a4, letter, or WIDTHxHEIGHT in points.
    #[arg(long, env = "DOCBUNDLE_PAGE_SIZE", default_value = "a4")]
    page_size: String,

    /// Bytes read per ingestion step.
    #[arg(long, env = "DOCBUNDLE_CHUNK_SIZE", default_value_t = docbundle::config::DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Number of read workers.
    #[arg(long, env = "DOCBUNDLE_READ_WORKERS", default_value_t = 1)]
    read_workers: usize,

    /// Number of concurrent conversions.
    #[arg(short, long, env = "DOCBUNDLE_CONVERT_WORKERS", default_value_t = 2)]
    convert_workers: usize,

    /// Number of merge workers.
    #[arg(long, env = "DOCBUNDLE_MERGE_WORKERS", default_value_t = 1)]
    merge_workers: usize,

    /// Print a JSON summary on stdout.
    #[arg(long, env = "DOCBUNDLE_JSON")]
    json: bool,

    /// Report per-file stage timings.
    #[arg(long, env = "DOCBUNDLE_TIMINGS")]
    timings: bool,

    /// Disable progress bar.
    #[arg(long, env = "DOCBUNDLE_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DOCBUNDLE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DOCBUNDLE_QUIET")]
    quiet: bool,
}

#[derive(Serialize)]
struct Summary {
    files: Vec<FileSummary>,
    bundle: Option<BundleSummary>,
    timings: Vec<Measurement>,
}

#[derive(Serialize)]
struct FileSummary {
    source: String,
    state: JobState,
    output: Option<PathBuf>,
    page_count: Option<usize>,
    error: Option<StageError>,
}

#[derive(Serialize)]
struct BundleSummary {
    path: PathBuf,
    page_count: usize,
    files: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let started = Instant::now();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level logs unless -v is given.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    // ── Inputs ───────────────────────────────────────────────────────────
    let items = cli
        .inputs
        .iter()
        .map(|p| UploadItem::from_path(p).with_context(|| format!("Cannot use input {}", p.display())))
        .collect::<Result<Vec<_>>>()?;
    let files = accept_supported(items);
    if files.is_empty() {
        anyhow::bail!("None of the inputs is a supported type (PDF, JPEG, PNG, TIFF)");
    }

    // ── Pipeline ─────────────────────────────────────────────────────────
    let config = build_config(&cli)?;
    let cli_observer = show_progress.then(|| CliObserver::new(files.len()));
    let observer: SharedObserver = match &cli_observer {
        Some(o) => o.clone(),
        None => Arc::new(docbundle::NoopObserver),
    };

    let mut manager = PipelineManager::start(config, observer).context("Failed to start pipeline")?;
    let ids = manager.submit_batch(files).context("Failed to submit inputs")?;
    manager.wait_idle().await.context("Pipeline stopped unexpectedly")?;

    // ── Write artifacts ──────────────────────────────────────────────────
    let mut summaries = Vec::with_capacity(ids.len());
    let mut artifacts = Vec::new();
    for id in ids {
        let Some(job) = manager.job(id) else { continue };
        let mut summary = FileSummary {
            source: job.file_name.clone(),
            state: job.state,
            output: None,
            page_count: None,
            error: job.failure.clone(),
        };
        if let Some(artifact) = job.artifact {
            let path = cli.out_dir.join(&artifact.name);
            write_atomic(&path, &artifact.bytes)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            summary.output = Some(path);
            summary.page_count = Some(artifact.page_count);
            artifacts.push(artifact);
        }
        summaries.push(summary);
    }

    // ── Bundle ───────────────────────────────────────────────────────────
    let bundle = match (&cli.bundle, artifacts.is_empty()) {
        (Some(path), false) => {
            let bundle = manager.merge(&artifacts).await.context("Merge failed")?;
            write_atomic(path, &bundle.bytes)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            Some(BundleSummary {
                path: path.clone(),
                page_count: bundle.page_count,
                files: bundle.artifacts.len(),
            })
        }
        (Some(_), true) => {
            tracing::warn!("No file converted; skipping bundle");
            None
        }
        (None, _) => None,
    };

    if let Some(o) = &cli_observer {
        o.finish();
    }
    let timings = if cli.timings { manager.report_timings() } else { Vec::new() };
    manager.shutdown();

    // ── Report ───────────────────────────────────────────────────────────
    let failed = summaries.iter().filter(|s| s.state == JobState::Failed).count();
    let total = summaries.len();

    if cli.json {
        let summary = Summary {
            files: summaries,
            bundle,
            timings,
        };
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to serialise summary")?
        );
    } else if !cli.quiet {
        if !show_progress {
            for s in &summaries {
                match (&s.output, &s.error) {
                    (Some(out), _) => eprintln!("{} → {}", s.source, out.display()),
                    (None, Some(e)) => eprintln!("{e}"),
                    (None, None) => {}
                }
            }
        }
        if cli.timings {
            for m in &timings {
                eprintln!("   {:<48} {}", m.name, dim(&format!("{:.3}s", m.duration.as_secs_f64())));
            }
        }
        if let Some(b) = &bundle {
            eprintln!(
                "{}  bundle  {} pages  →  {}",
                cyan("◆"),
                b.page_count,
                bold(&b.path.display().to_string())
            );
        }
        eprintln!(
            "{}  {}/{} files converted  {}ms",
            if failed == 0 { green("✔") } else { cyan("⚠") },
            total - failed,
            total,
            started.elapsed().as_millis(),
        );
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {total} files failed");
    }
    Ok(())
}

/// Map CLI args to `PipelineConfig`.
fn build_config(cli: &Cli) -> Result<PipelineConfig> {
    PipelineConfig::builder()
        .chunk_size(cli.chunk_size)
        .read_workers(cli.read_workers)
        .convert_workers(cli.convert_workers)
        .merge_workers(cli.merge_workers)
        .page_size(parse_page_size(&cli.page_size)?)
        .build()
        .context("Invalid configuration")
}

/// Parse `--page-size`: `a4`, `letter`, or `WIDTHxHEIGHT` in points.
fn parse_page_size(s: &str) -> Result<PageSize> {
    let s = s.trim().to_lowercase();
    match s.as_str() {
        "a4" => return Ok(PageSize::A4),
        "letter" => return Ok(PageSize::Letter),
        _ => {}
    }

    let (w, h) = s
        .split_once('x')
        .with_context(|| format!("Invalid page size '{s}': expected a4, letter or WIDTHxHEIGHT"))?;
    let width: f32 = w.trim().parse().context("Invalid page width")?;
    let height: f32 = h.trim().parse().context("Invalid page height")?;
    Ok(PageSize::Custom { width, height })
}
