//! CLI binary for mathscribe.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `AnalysisConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use mathscribe::{
    write_json, AnalysisConfig, AnalysisProgressCallback, AnalysisRequest, CancelToken,
    ConfidencePolicy, ImageRef, MathExercise, MathExerciseAnalyzer, ProgressCallback,
};
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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback. One bar counts pages across every exercise
/// in flight, so `--each` batches grow its length as each one starts.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        bar.set_style(style);
        bar.set_prefix("Loading");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self { bar })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl AnalysisProgressCallback for CliProgressCallback {
    fn on_analysis_start(&self, total_pages: usize) {
        self.bar.inc_length(total_pages as u64);
        self.bar.set_prefix("Analysing");
    }

    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        self.bar.set_message(format!("page {page_num}/{total_pages}"));
    }

    fn on_page_complete(&self, page_num: usize, total_pages: usize, confidence: Option<f64>) {
        let confidence = confidence
            .map(|c| format!("confidence {c:.2}"))
            .unwrap_or_else(|| "no confidence".to_string());
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}",
            green("✓"),
            page_num,
            total_pages,
            dim(&confidence),
        ));
        self.bar.inc(1);
    }

    fn on_combine_start(&self, total_pages: usize) {
        self.bar.set_message(format!("merging {total_pages} pages"));
    }

    fn on_analysis_error(&self, error: &str) {
        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!("  {} {}", red("✗"), red(&msg)));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # One exercise photographed on two pages
  mathscribe page1.jpg page2.jpg

  # JSON to a file
  mathscribe page1.jpg page2.jpg -o exercise.json

  # Every image is its own exercise, four at a time
  mathscribe --each --concurrency 4 scans/*.png --json

  # Images from URLs, give up after two minutes
  mathscribe --deadline 120 https://example.com/hw/p1.jpg https://example.com/hw/p2.jpg

  # Use a specific model
  mathscribe --provider anthropic --model claude-sonnet-4-20250514 page.jpg

SUPPORTED IMAGES:
  JPEG, PNG, BMP, TIFF, WebP up to --max-image-mb megabytes.

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  RUST_LOG                Override the log filter (e.g. mathscribe=debug)
"#;

/// Extract structured math exercises from photographed handwriting.
#[derive(Parser, Debug)]
#[command(
    name = "mathscribe",
    version,
    about = "Extract structured math exercises from photographed handwriting using Vision LLMs",
    long_about = "Read one handwritten math exercise spread over one or more photographed \
pages and print its statement, worked response, domain, level, and a confidence score. \
Supports OpenAI, Anthropic, Google Gemini, Azure OpenAI, and any OpenAI-compatible endpoint.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Image files or HTTP/HTTPS URLs, in page order.
    #[arg(required = true)]
    images: Vec<String>,

    /// Treat every image as a separate exercise.
    #[arg(long, env = "MATHSCRIBE_EACH")]
    each: bool,

    /// Exercises analysed at once with --each.
    #[arg(short, long, env = "MATHSCRIBE_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Write JSON to this file instead of printing.
    #[arg(short, long, env = "MATHSCRIBE_OUTPUT")]
    output: Option<PathBuf>,

    /// Print JSON instead of a summary.
    #[arg(long, env = "MATHSCRIBE_JSON")]
    json: bool,

    /// Correlation id attached to every log line of the run.
    #[arg(long)]
    session_id: Option<String>,

    /// Abandon the analysis after this many seconds.
    #[arg(long, env = "MATHSCRIBE_DEADLINE")]
    deadline: Option<u64>,

    /// LLM model ID (e.g. gpt-4o, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "MATHSCRIBE_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// Max LLM output tokens per call.
    #[arg(long, env = "MATHSCRIBE_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// Combine page confidences by mean or minimum.
    #[arg(long, env = "MATHSCRIBE_CONFIDENCE", value_enum, default_value = "mean")]
    confidence: ConfidenceArg,

    /// Path to a text file containing a custom vision prompt.
    #[arg(long, env = "MATHSCRIBE_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Largest accepted image in megabytes.
    #[arg(long, env = "MATHSCRIBE_MAX_IMAGE_MB", default_value_t = 20)]
    max_image_mb: usize,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "MATHSCRIBE_DOWNLOAD_TIMEOUT", default_value_t = 60)]
    download_timeout: u64,

    /// Per-call LLM timeout in seconds.
    #[arg(long, env = "MATHSCRIBE_API_TIMEOUT", default_value_t = 90)]
    api_timeout: u64,

    /// Disable progress bar.
    #[arg(long, env = "MATHSCRIBE_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "MATHSCRIBE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "MATHSCRIBE_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum ConfidenceArg {
    Mean,
    Min,
}

impl From<ConfidenceArg> for ConfidencePolicy {
    fn from(v: ConfidenceArg) -> Self {
        match v {
            ConfidenceArg::Mean => ConfidencePolicy::Mean,
            ConfidenceArg::Min => ConfidencePolicy::Minimum,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level library logs.
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

    // ── Cancellation ─────────────────────────────────────────────────────
    let cancel = match cli.deadline {
        Some(secs) => CancelToken::with_timeout(Duration::from_secs(secs)),
        None => CancelToken::new(),
    };
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    // ── Build config ─────────────────────────────────────────────────────
    let progress = show_progress.then(CliProgressCallback::new);
    let config = build_config(
        &cli,
        progress
            .clone()
            .map(|cb| cb as Arc<dyn AnalysisProgressCallback>),
    )
    .await?;
    let analyzer = MathExerciseAnalyzer::new(config).context("Failed to set up the model provider")?;

    // ── Run ──────────────────────────────────────────────────────────────
    let result = if cli.each {
        run_each(&cli, &analyzer, &cancel).await
    } else {
        run_single(&cli, &analyzer, &cancel).await
    };

    if let Some(ref cb) = progress {
        cb.finish();
    }
    result
}

async fn run_single(cli: &Cli, analyzer: &MathExerciseAnalyzer, cancel: &CancelToken) -> Result<()> {
    let mut request = AnalysisRequest::new(cli.images.iter().map(String::as_str));
    request.session_id = cli.session_id.clone();

    let output = analyzer
        .analyze_detailed(request, cancel)
        .await
        .context("Analysis failed")?;
    let exercise = &output.exercise;

    if let Some(ref path) = cli.output {
        write_json(exercise, path).await.context("Failed to write output")?;
    } else if cli.json {
        let json = serde_json::to_string_pretty(exercise).context("Failed to serialise output")?;
        println!("{json}");
    } else {
        print_exercise(exercise);
    }

    if !cli.quiet {
        eprintln!(
            "{}  {} pages  {} model calls  {}ms{}",
            green("✔"),
            output.stats.total_images,
            output.stats.model_calls,
            output.stats.total_duration_ms,
            cli.output
                .as_ref()
                .map(|p| format!("  →  {}", bold(&p.display().to_string())))
                .unwrap_or_default(),
        );
        eprintln!(
            "   {} tokens in  /  {} tokens out  {}",
            dim(&output.stats.total_input_tokens.to_string()),
            dim(&output.stats.total_output_tokens.to_string()),
            dim(&format!("session {}", output.session_id)),
        );
    }
    Ok(())
}

async fn run_each(cli: &Cli, analyzer: &MathExerciseAnalyzer, cancel: &CancelToken) -> Result<()> {
    let requests: Vec<AnalysisRequest> = cli
        .images
        .iter()
        .enumerate()
        .map(|(i, image)| {
            let request = AnalysisRequest::new([ImageRef::parse(image)]);
            match cli.session_id {
                Some(ref id) => request.with_session_id(format!("{id}-{}", i + 1)),
                None => request,
            }
        })
        .collect();

    let results = analyzer
        .analyze_batch(requests, cli.concurrency, cancel)
        .await;

    let mut exercises: Vec<MathExercise> = Vec::with_capacity(results.len());
    let mut failed = 0usize;
    for (image, result) in cli.images.iter().zip(results) {
        match result {
            Ok(exercise) => exercises.push(exercise),
            Err(e) => {
                failed += 1;
                eprintln!("{} {}: {}", red("✗"), image, e);
            }
        }
    }

    if let Some(ref path) = cli.output {
        write_json(&exercises, path).await.context("Failed to write output")?;
    } else if cli.json {
        let json = serde_json::to_string_pretty(&exercises).context("Failed to serialise output")?;
        println!("{json}");
    } else {
        for exercise in &exercises {
            print_exercise(exercise);
            println!();
        }
    }

    if !cli.quiet {
        eprintln!(
            "{} {}/{} exercises analysed{}",
            if failed == 0 { green("✔") } else { cyan("⚠") },
            bold(&exercises.len().to_string()),
            cli.images.len(),
            if failed > 0 {
                format!("  ({} failed)", red(&failed.to_string()))
            } else {
                String::new()
            },
        );
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} exercises failed", cli.images.len());
    }
    Ok(())
}

fn print_exercise(exercise: &MathExercise) {
    println!("{}", bold(&exercise.title));
    println!("{} {}  {} {}", dim("Domain:"), exercise.domain, dim("Level:"), exercise.level);
    println!("{} {:.2}", dim("Confidence:"), exercise.confidence_score);
    println!("{} {}", dim("Images:"), exercise.image_paths.join(", "));
    println!();
    println!("{}", cyan("Statement"));
    println!("{}", exercise.statement);
    println!();
    println!("{}", cyan("Response"));
    println!("{}", exercise.response);
}

/// Map CLI args to `AnalysisConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<AnalysisConfig> {
    let mut builder = AnalysisConfig::builder()
        .temperature(cli.temperature)
        .max_tokens(cli.max_tokens)
        .confidence_policy(cli.confidence.clone().into())
        .max_image_bytes(cli.max_image_mb.saturating_mul(1024 * 1024))
        .download_timeout_secs(cli.download_timeout)
        .api_timeout_secs(cli.api_timeout);

    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.analysis_prompt(prompt);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
