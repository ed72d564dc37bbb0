//! CLI binary for edgequake-doc2md.
//!
//! A thin shim over the library crate that maps CLI flags to `BatchConfig`
//! and `VisionConfig`, wires Ctrl-C to the abort flag and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_doc2md::{
    convert_batch, convert_file, BatchConfig, BatchProgressCallback, BatchSummary, FileAction,
    FileOutcome, LibreOfficeConverter, Plan, ProgressCallback, SkipReason, VisionConfig,
    VisionParser,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

/// Exit status after Ctrl-C.
const EXIT_INTERRUPTED: u8 = 130;

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar for the batch plus a log line per
/// file. Lines may arrive out of order when `--concurrency` > 1.
struct CliProgressCallback {
    bar: ProgressBar,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(spinner_style);
        bar.set_prefix("Scanning");
        bar.set_message("Looking for documents…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} files  \
             ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Converting");
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_files: usize) {
        self.activate_bar(total_files);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("{total_files} candidate file(s)"))
        ));
    }

    fn on_file_start(&self, key: &str, plan: Plan) {
        self.bar.set_message(format!("{key} ({plan})"));
    }

    fn on_file_skipped(&self, key: &str, reason: SkipReason) {
        let label = match reason {
            SkipReason::UpToDate => "up to date",
            SkipReason::SatisfiedByCompanion => "markdown present",
            SkipReason::Moved => "moved, record updated",
            SkipReason::ConverterUnavailable => "no office converter",
        };
        self.bar
            .println(format!("  {} {}  {}", dim("·"), key, dim(label)));
        self.bar.inc(1);
    }

    fn on_file_complete(&self, key: &str, output: Option<&Path>) {
        let target = output
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        self.bar.println(format!(
            "  {} {}  {}",
            green("✓"),
            key,
            dim(&format!("→ {target}"))
        ));
        self.bar.inc(1);
    }

    fn on_file_error(&self, key: &str, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        // Keep one line per file.
        let first = error.lines().next().unwrap_or_default();
        let msg = if first.chars().count() > 80 {
            format!("{}\u{2026}", first.chars().take(79).collect::<String>())
        } else {
            first.to_string()
        };
        self.bar
            .println(format!("  {} {}  {}", red("✗"), key, red(&msg)));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, summary: &BatchSummary) {
        self.bar.finish_and_clear();
        let mark = if summary.failed == 0 && !summary.interrupted {
            green("✔")
        } else if summary.converted == 0 && summary.failed > 0 {
            red("✘")
        } else {
            cyan("⚠")
        };
        eprintln!("{} {}", mark, summary.headline());
        if self.errors.load(Ordering::SeqCst) > 0 {
            eprintln!(
                "   {}",
                dim("failed files are retried on the next run")
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert everything new or changed in ./source into ./md
  doc2md

  # Mirror a directory tree
  doc2md --source docs --output md -r

  # Reconvert everything, ignoring the store
  doc2md -f

  # One file, keeping its intermediate PDF
  doc2md --file slides.pptx --keep-tmp

  # Machine-readable summary
  doc2md --json > summary.json

CHANGE DETECTION:
  Each source file is fingerprinted (SHA-256 of its bytes) and recorded in
  the conversion store (default ./file_hashes.json). A later run skips files
  whose fingerprint and outputs are unchanged, retries failures, and follows
  renamed or moved files by content.

ENVIRONMENT VARIABLES:
  INPUT_FOLDER            Source directory (default: source)
  OUTPUT_FOLDER           Markdown directory (default: md)
  TMP_PDF_FOLDER          Intermediate PDF directory (default: tmp_pdf)
  DOC2MD_HASH_DB          Conversion store path (default: ./file_hashes.json)
  DOC2MD_IMAGES           Image directory (default: <output>/images)
  OPENAI_API_KEY          OpenAI API key (scanned pages)
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium (file or directory)

EXIT STATUS:
  0    batch finished (per-file failures are reported, not fatal)
  1    setup error (missing file, unsupported type, missing converter)
  130  interrupted with Ctrl-C
"#;

/// Convert PDF and office documents to Markdown, skipping unchanged files.
#[derive(Parser, Debug)]
#[command(
    name = "doc2md",
    version,
    about = "Incrementally convert PDF and office documents to Markdown",
    long_about = "Convert a folder of PDF, Word and PowerPoint documents to Markdown. \
Office files go through LibreOffice to PDF first. Text pages are extracted with pdfium; \
scanned pages are transcribed by a vision LLM. Unchanged files are skipped on later runs.",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Source directory to scan.
    #[arg(long, env = "INPUT_FOLDER", default_value = "source")]
    source: PathBuf,

    /// Directory for Markdown output.
    #[arg(long, env = "OUTPUT_FOLDER", default_value = "md")]
    output: PathBuf,

    /// Directory for extracted images. Default: <output>/images.
    #[arg(long, env = "DOC2MD_IMAGES")]
    images: Option<PathBuf>,

    /// Directory for intermediate PDFs from office files.
    #[arg(long, env = "TMP_PDF_FOLDER", default_value = "tmp_pdf")]
    tmp_pdf: PathBuf,

    /// Conversion store document.
    #[arg(long, env = "DOC2MD_HASH_DB", default_value = "./file_hashes.json")]
    hash_db: PathBuf,

    /// Descend into subdirectories, mirroring them under the output.
    #[arg(short, long)]
    recursive: bool,

    /// Convert everything; do not read or write the store.
    #[arg(short, long)]
    force: bool,

    /// Keep intermediate PDFs after the run.
    #[arg(long)]
    keep_tmp: bool,

    /// Convert a single file instead of scanning the source directory.
    #[arg(long, value_name = "PATH")]
    file: Option<PathBuf>,

    /// Files processed at once.
    #[arg(short, long, env = "DOC2MD_CONCURRENCY", default_value_t = 1)]
    concurrency: usize,

    /// Vision LLM model ID for scanned pages.
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_LLM_PROVIDER")]
    provider: Option<String>,

    /// Rendering DPI for scanned pages (72–400).
    #[arg(long, env = "DOC2MD_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DOC2MD_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DOC2MD_QUIET")]
    quiet: bool,

    /// Disable progress bar.
    #[arg(long, env = "DOC2MD_NO_PROGRESS")]
    no_progress: bool,

    /// Print the run summary as JSON on stdout.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar carries per-file feedback, so library INFO logs are
    // muted while it is shown.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
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

    // ── Ctrl-C ───────────────────────────────────────────────────────────
    let abort = Arc::new(AtomicBool::new(false));
    {
        let abort = Arc::clone(&abort);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nInterrupted: finishing files in progress…");
                abort.store(true, Ordering::SeqCst);
            }
        });
    }

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress && cli.file.is_none() {
        Some(CliProgressCallback::new() as Arc<dyn BatchProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb, Arc::clone(&abort))?;
    let vision = build_vision_config(&cli)?;
    let parser = Arc::new(VisionParser::new(vision));
    let converter = Arc::new(LibreOfficeConverter::detect());

    // ── Single-file mode ─────────────────────────────────────────────────
    if let Some(ref path) = cli.file {
        let outcome = convert_file(path, &config, parser, converter)
            .await
            .with_context(|| format!("Cannot convert {}", path.display()))?;
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&outcome).context("Failed to serialise outcome")?
            );
        } else if !cli.quiet {
            print_outcome(&outcome);
        }
        return Ok(ExitCode::SUCCESS);
    }

    // ── Batch mode ───────────────────────────────────────────────────────
    let summary = convert_batch(&config, parser, converter)
        .await
        .context("Batch conversion failed")?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to serialise summary")?
        );
    } else if !cli.quiet && !show_progress {
        for outcome in &summary.files {
            print_outcome(outcome);
        }
        eprintln!("{} ({}ms)", summary.headline(), summary.duration_ms);
    }

    if summary.interrupted {
        return Ok(ExitCode::from(EXIT_INTERRUPTED));
    }
    Ok(ExitCode::SUCCESS)
}

/// Map CLI args to `BatchConfig`.
fn build_config(
    cli: &Cli,
    progress: Option<ProgressCallback>,
    abort: Arc<AtomicBool>,
) -> Result<BatchConfig> {
    let mut builder = BatchConfig::builder()
        .source_dir(&cli.source)
        .output_dir(&cli.output)
        .intermediate_dir(&cli.tmp_pdf)
        .store_path(&cli.hash_db)
        .force(cli.force)
        .recursive(cli.recursive)
        .keep_intermediates(cli.keep_tmp)
        .concurrency(cli.concurrency)
        .abort_flag(abort);

    if let Some(ref images) = cli.images {
        builder = builder.image_dir(images);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    builder.build().context("Invalid configuration")
}

/// Map CLI args to `VisionConfig`.
fn build_vision_config(cli: &Cli) -> Result<VisionConfig> {
    let mut builder = VisionConfig::builder().dpi(cli.dpi);
    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    builder.build().context("Invalid vision configuration")
}

fn print_outcome(outcome: &FileOutcome) {
    let line = match &outcome.action {
        FileAction::Converted { reason } => format!(
            "{} {}  {}",
            green("✓"),
            outcome.key,
            dim(&format!("converted ({reason:?})"))
        ),
        FileAction::ParsedOnly => format!(
            "{} {}  {}",
            green("✓"),
            outcome.key,
            dim("parsed from intermediate PDF")
        ),
        FileAction::Skipped { reason } => format!(
            "{} {}  {}",
            dim("·"),
            outcome.key,
            dim(&format!("skipped ({reason:?})"))
        ),
        FileAction::Failed { detail } => {
            format!("{} {}  {}", red("✗"), outcome.key, red(detail))
        }
        FileAction::Errored { error } => {
            format!("{} {}  {}", red("✗"), outcome.key, red(&error.to_string()))
        }
    };
    eprintln!("{line}");
}
