//! CLI binary for edgequake-doc2json.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ExtractionConfig` and prints the recovered JSON.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_doc2json::pipeline::input::media_type_from_extension;
use edgequake_doc2json::{
    load_upload, write_json, Availability, ExtractionConfig, ExtractionProgressCallback, Extractor,
    ProgressCallback, RecoveryStage,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
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

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress: one spinner line plus a log line per file and page.
struct CliProgressCallback {
    bar: ProgressBar,
    skipped: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(style);
        bar.set_prefix("Preparing");
        bar.set_message("Reading files…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            skipped: AtomicUsize::new(0),
        })
    }
}

// Early exits (`--pages-only`, a failed page preparation) never reach
// `on_extraction_complete`; the spinner line must still go away.
impl Drop for CliProgressCallback {
    fn drop(&mut self) {
        if !self.bar.is_finished() {
            self.bar.finish_and_clear();
        }
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_file_start(&self, index: usize, name: &str) {
        self.bar.set_message(format!("file {} · {}", index + 1, name));
    }

    fn on_file_skipped(&self, name: &str, reason: &str) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
        // Truncate very long reasons to keep output tidy.
        let reason = match reason.char_indices().nth(80) {
            Some((idx, _)) => format!("{}\u{2026}", &reason[..idx]),
            None => reason.to_string(),
        };
        self.bar
            .println(format!("  {} {}  {}", red("✗"), name, dim(&reason)));
    }

    fn on_page_ready(&self, label: &str, ordinal: usize, budget: usize) {
        self.bar.println(format!(
            "  {} Page {:>2}/{:<2}  {}",
            green("✓"),
            ordinal + 1,
            budget,
            label
        ));
    }

    fn on_availability(&self, status: Availability) {
        self.bar.set_prefix("Model");
        self.bar.set_message(format!("status: {status}"));
    }

    fn on_recovery_stage(&self, stage: RecoveryStage) {
        self.bar.set_prefix("Recovering");
        self.bar.set_message(stage.to_string());
    }

    fn on_extraction_complete(&self, success: bool) {
        self.bar.finish_and_clear();
        let skipped = self.skipped.load(Ordering::SeqCst);
        if success && skipped > 0 {
            eprintln!(
                "{} {}  {}",
                cyan("⚠"),
                bold("Extraction complete"),
                red(&format!("{skipped} file(s) skipped")),
            );
        } else if success {
            eprintln!("{} {}", green("✔"), bold("Extraction complete"));
        } else {
            eprintln!("{} {}", red("✘"), bold("Extraction failed"));
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Invoice fields from a scanned PDF (stdout)
  doc2json invoice.pdf --prompt "invoice number, date, total and line items"

  # Several photos of one form, written to a file
  doc2json p1.jpg p2.jpg --prompt "applicant name and every checkbox" -o form.json

  # Allow up to 10 pages
  doc2json --max-pages 10 report.pdf --prompt "every table as rows" -o tables.json

  # Use a specific model
  doc2json --model gpt-4.1 --provider openai receipt.png --prompt "merchant and total"

  # From a URL
  doc2json https://example.com/statement.pdf --prompt "closing balance"

  # Show which page images would be sent (no API key needed)
  doc2json --pages-only a.pdf b.png --prompt unused

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to an existing libpdfium; skips auto-download
  PDFIUM_AUTO_CACHE_DIR   Override the default pdfium cache directory

LIMITS:
  Accepted types: PNG, JPEG, WebP, GIF, BMP images and PDF documents.
  Files over --max-file-mb, empty files and other types are skipped.
  At most --max-pages page images (1–10) are sent; later pages are dropped.
"#;

/// Extract structured JSON from documents and images using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "doc2json",
    version,
    about = "Extract structured JSON from documents and images using Vision LLMs",
    long_about = "Send scanned documents, photos and PDF pages to a Vision Language Model \
together with a plain-language request and get valid JSON back. Supports OpenAI, Anthropic, \
Google Gemini, Azure OpenAI, and any OpenAI-compatible endpoint (Ollama, vLLM, LiteLLM, etc.).",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local files or HTTP/HTTPS URLs, in page order.
    #[arg(required = true)]
    inputs: Vec<String>,

    /// What to extract, in plain language.
    #[arg(short, long, env = "DOC2JSON_PROMPT")]
    prompt: String,

    /// Write JSON to this file instead of stdout (`.json` is enforced).
    #[arg(short, long, env = "DOC2JSON_OUTPUT")]
    output: Option<PathBuf>,

    /// Page budget across all inputs (1–10).
    #[arg(long, env = "DOC2JSON_MAX_PAGES", default_value_t = 3,
          value_parser = clap::value_parser!(u8).range(1..=10))]
    max_pages: u8,

    /// Per-file size limit in MiB.
    #[arg(long, env = "DOC2JSON_MAX_FILE_MB", default_value_t = 50)]
    max_file_mb: usize,

    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "DOC2JSON_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Max LLM output tokens.
    #[arg(long, env = "DOC2JSON_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "DOC2JSON_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Do not ask the model to repair its own invalid JSON.
    #[arg(long, env = "DOC2JSON_NO_REPAIR")]
    no_repair: bool,

    /// Print the page images that would be sent, then exit.
    #[arg(long)]
    pages_only: bool,

    /// Print extraction statistics as JSON on stderr.
    #[arg(long)]
    stats: bool,

    /// Disable progress output.
    #[arg(long, env = "DOC2JSON_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DOC2JSON_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DOC2JSON_QUIET")]
    quiet: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "DOC2JSON_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress spinner replaces INFO-level library logs.
    let show_progress = !cli.quiet && !cli.no_progress;
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

    // ── Ensure PDFium engine is available ────────────────────────────────
    // Skipped only when every input is recognisably an image.
    let needs_pdfium = !cli.inputs.iter().all(|i| {
        media_type_from_extension(i).is_some_and(|m| m.starts_with("image/"))
    });
    if needs_pdfium {
        ensure_pdfium(cli.quiet)?;
    }

    // ── Load inputs ──────────────────────────────────────────────────────
    let mut files = Vec::with_capacity(cli.inputs.len());
    for input in &cli.inputs {
        let file = load_upload(input, cli.download_timeout)
            .await
            .with_context(|| format!("Failed to load '{input}'"))?;
        files.push(file);
    }

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new();
        Some(cb as Arc<dyn ExtractionProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb).await?;
    let extractor = Extractor::new(config);

    // ── Pages-only mode ──────────────────────────────────────────────────
    if cli.pages_only {
        let pages = extractor
            .process_files(&files)
            .await
            .context("Failed to prepare page images")?;
        println!(
            "{}",
            serde_json::to_string_pretty(&pages).context("Failed to serialise pages")?
        );
        return Ok(());
    }

    // ── Run extraction ───────────────────────────────────────────────────
    let output = extractor
        .extract_files(&cli.prompt, &files)
        .await
        .context("Extraction failed")?;

    if let Some(ref output_path) = cli.output {
        let written = write_json(output_path, &output.document)
            .await
            .context("Failed to write output")?;
        if !cli.quiet {
            eprintln!(
                "{}  {} page(s)  {}  {}ms  →  {}",
                green("✔"),
                output.stats.page_count,
                dim(&output.stats.stage.to_string()),
                output.stats.duration_ms,
                bold(&written.display().to_string()),
            );
        }
    } else {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(output.to_pretty_json().as_bytes())
            .context("Failed to write to stdout")?;
    }

    if !cli.quiet {
        if let Some(usage) = output.stats.usage {
            eprintln!(
                "   {} / {} tokens  ({})",
                dim(&usage.consumed.to_string()),
                usage.quota,
                cyan(&format!("{:.1}%", usage.percent_used)),
            );
        }
    }

    if cli.stats {
        eprintln!(
            "{}",
            serde_json::to_string_pretty(&output.stats).context("Failed to serialise stats")?
        );
    }

    Ok(())
}

/// Download (or extract, with `bundled`) pdfium before the first render.
fn ensure_pdfium(quiet: bool) -> Result<()> {
    if pdfium_auto::is_pdfium_cached() {
        return Ok(());
    }

    if quiet {
        tokio::task::block_in_place(|| pdfium_auto::ensure_pdfium_library(None))
            .context("Failed to download PDFium engine")?;
        return Ok(());
    }

    let dl_bar = ProgressBar::new(0);
    dl_bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {bytes}/{total_bytes}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS),
    );
    dl_bar.set_prefix("PDF engine");
    dl_bar.set_message("Connecting…");
    dl_bar.enable_steady_tick(Duration::from_millis(80));

    let bar = dl_bar.clone();
    tokio::task::block_in_place(|| {
        pdfium_auto::ensure_pdfium_library(Some(&|downloaded, total| {
            if let Some(t) = total {
                if bar.length().unwrap_or(0) != t {
                    bar.set_length(t);
                }
            }
            bar.set_position(downloaded);
        }))
    })
    .context("Failed to download PDFium engine")?;

    dl_bar.finish_with_message("ready ✓");
    Ok(())
}

/// Map CLI args to `ExtractionConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let system_prompt = if let Some(ref path) = cli.system_prompt {
        Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read system prompt from {:?}", path))?,
        )
    } else {
        None
    };

    let mut builder = ExtractionConfig::builder()
        .max_pages(cli.max_pages as usize)
        .max_file_bytes(cli.max_file_mb.saturating_mul(1024 * 1024))
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .model_repair(!cli.no_repair)
        .download_timeout_secs(cli.download_timeout);

    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    if let Some(prompt) = system_prompt {
        builder = builder.system_prompt(prompt);
    }

    let mut config = builder.build().context("Invalid configuration")?;

    // Provider selection is resolved lazily from these two fields.
    config.model = cli.model.clone();
    config.provider_name = cli.provider.clone();

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spinner_is_cleared_when_callback_is_dropped() {
        let cb = CliProgressCallback::new();
        let bar = cb.bar.clone();
        cb.on_file_start(0, "scan.pdf");
        assert!(!bar.is_finished());

        drop(cb);
        assert!(bar.is_finished());
    }

    #[test]
    fn completion_finishes_spinner_once() {
        let cb = CliProgressCallback::new();
        cb.on_extraction_complete(false);
        assert!(cb.bar.is_finished());
        drop(cb);
    }
}
