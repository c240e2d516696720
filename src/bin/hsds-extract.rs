//! CLI binary for hsds-extract.
//!
//! A thin shim over the library crate that maps CLI flags to `Settings`,
//! runs the pipeline and prints the summary.

use anyhow::{Context, Result};
use clap::Parser;
use hsds_extract::config::{credential_env_var, credential_read_from_env, DEFAULT_IMAGE_PATH};
use hsds_extract::{
    render_summary, run_ocr_only, verify_setup, HsdsError, HttpOcrEngine, OcrPreset, Pipeline,
    PipelineObserver, ProgressCallback, Settings, Stage, Strategy,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Characters of OCR text shown by `--ocr-only`.
const OCR_PREVIEW_CHARS: usize = 500;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress observer using indicatif ────────────────────────────────────

/// Spinner on stderr plus one log line per finished stage.
struct CliObserver {
    bar: ProgressBar,
}

impl CliObserver {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("hsds-extract");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl PipelineObserver for CliObserver {
    fn on_stage_start(&self, stage: Stage) {
        self.bar.set_message(format!("{stage}…"));
    }

    fn on_stage_complete(&self, stage: Stage, elapsed_ms: u64) {
        self.bar.println(format!(
            "  {} {:<22} {}",
            green("✓"),
            stage.to_string(),
            dim(&format!("{:.1}s", elapsed_ms as f64 / 1000.0)),
        ));
    }

    fn on_stage_error(&self, stage: Stage, error: &str) {
        // Keep the line short; the full error is printed on exit.
        let msg: String = match error.char_indices().nth(80) {
            Some((idx, _)) => format!("{}\u{2026}", &error[..idx]),
            None => error.to_string(),
        };
        self.bar
            .println(format!("  {} {:<22} {}", red("✗"), stage.to_string(), red(&msg)));
    }

    fn on_ocr_saved(&self, path: &Path, chars: usize) {
        self.bar.println(format!(
            "  {} OCR text ({chars} chars) saved to {}",
            dim("·"),
            path.display()
        ));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Vision LLM reads the flyer directly (needs OPENAI_API_KEY)
  hsds-extract flyer.jpg

  # DeepSeek-OCR first, then a local Ollama model
  hsds-extract --strategy ocr-then-text flyer.jpg

  # Higher-fidelity OCR preset
  hsds-extract --strategy ocr-then-text --ocr-preset base flyer.jpg

  # OCR only, no extraction
  hsds-extract --ocr-only --ocr-preset small flyer.jpg

  # Verify the environment
  hsds-extract --check --strategy ocr-then-text

OCR PRESETS:
  Preset   base_size  image_size  crop_mode
  ───────  ─────────  ──────────  ─────────
  tiny     512        512         no   (default)
  small    640        640         no
  base     1024       1024        no
  gundam   1024       640         yes

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key (direct strategy default)
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  OLLAMA_HOST             Ollama base URL (default http://localhost:11434)
  EDGEQUAKE_PROVIDER      Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  HSDS_STRATEGY           direct | ocr-then-text
  HSDS_OCR_ENDPOINT       DeepSeek-OCR server URL
  HSDS_OCR_PRESET         tiny | small | base | gundam
"#;

/// Extract HSDS records from community-services flyers.
#[derive(Parser, Debug)]
#[command(
    name = "hsds-extract",
    version,
    about = "Extract HSDS organization/service/location data from a flyer image",
    long_about = "Extract structured HSDS-style data (organization, services, schedules, \
phones, locations, addresses) from a photo of a community-services flyer. Either a vision \
LLM reads the image directly, or DeepSeek-OCR transcribes it and a text LLM structures it.",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Flyer image (jpg, png, gif, webp).
    #[arg(default_value = DEFAULT_IMAGE_PATH)]
    image: PathBuf,

    /// Pipeline strategy.
    #[arg(long, env = "HSDS_STRATEGY", value_enum, default_value = "direct")]
    strategy: StrategyArg,

    /// OCR preset: tiny, small, base, gundam. Unknown names fall back to tiny.
    #[arg(long, env = "HSDS_OCR_PRESET", default_value = "tiny")]
    ocr_preset: String,

    /// DeepSeek-OCR server endpoint.
    #[arg(long, env = "HSDS_OCR_ENDPOINT")]
    ocr_endpoint: Option<String>,

    /// LLM provider: openai, anthropic, gemini, mistral, ollama.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// LLM model ID.
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// API key for the provider. Defaults to the provider's environment variable.
    #[arg(long)]
    api_key: Option<String>,

    /// Ollama base URL.
    #[arg(long, env = "OLLAMA_HOST")]
    ollama_host: Option<String>,

    /// Where to write the extracted JSON record.
    #[arg(short, long, env = "HSDS_OUTPUT")]
    output: Option<PathBuf>,

    /// Where to write the raw OCR text.
    #[arg(long, env = "HSDS_OCR_OUTPUT")]
    ocr_output: Option<PathBuf>,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "HSDS_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// Max LLM output tokens.
    #[arg(long, env = "HSDS_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// LLM call timeout in seconds.
    #[arg(long, env = "HSDS_API_TIMEOUT", default_value_t = 300)]
    api_timeout: u64,

    /// OCR call timeout in seconds.
    #[arg(long, env = "HSDS_OCR_TIMEOUT", default_value_t = 600)]
    ocr_timeout: u64,

    /// Path to a text file replacing the default system prompt.
    #[arg(long, env = "HSDS_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Verify credentials, endpoints and models, then exit.
    #[arg(long, conflicts_with = "ocr_only")]
    check: bool,

    /// Run OCR only and save `ocr_result_<preset>.txt`.
    #[arg(long)]
    ocr_only: bool,

    /// Disable the progress spinner.
    #[arg(long, env = "HSDS_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "HSDS_VERBOSE")]
    verbose: bool,

    /// Suppress everything except the summary and errors.
    #[arg(short, long, env = "HSDS_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum StrategyArg {
    Direct,
    #[value(alias = "ocr")]
    OcrThenText,
}

impl From<StrategyArg> for Strategy {
    fn from(v: StrategyArg) -> Self {
        match v {
            StrategyArg::Direct => Strategy::Direct,
            StrategyArg::OcrThenText => Strategy::OcrThenText,
        }
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Mistral and Azure are configured by edgequake-llm from the environment.
    // The key is exported here, before any runtime thread exists.
    let provider = provider_for(&cli);
    if let (Some(key), Some(var)) = (&cli.api_key, credential_env_var(&provider)) {
        if credential_read_from_env(&provider) {
            std::env::set_var(var, key);
        }
    }

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?
        .block_on(run(cli))
}

async fn run(cli: Cli) -> Result<ExitCode> {

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner replaces INFO logs; --verbose brings them all back.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.check;
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

    let observer = show_progress.then(CliObserver::new);
    let settings = build_settings(&cli, observer.clone().map(|o| o as ProgressCallback)).await?;

    // ── Setup check ──────────────────────────────────────────────────────
    if cli.check {
        let report = verify_setup(&settings, &cli.image).await;
        for check in &report.checks {
            println!("{check}");
        }
        println!();
        println!("Passed {}/{} checks", report.passed(), report.total());
        return Ok(if report.all_passed() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        });
    }

    // ── OCR-only mode ────────────────────────────────────────────────────
    if cli.ocr_only {
        let engine = HttpOcrEngine::new(settings.ocr_endpoint.clone(), settings.ocr_timeout_secs)?;
        let result = run_ocr_only(&settings, &engine, &cli.image, ctrl_c()).await;
        if let Some(ref o) = observer {
            o.finish();
        }
        let output = match result {
            Err(e) if e.is_cancellation() => return Ok(cancellation_exit(&e).unwrap_or(ExitCode::SUCCESS)),
            other => other.context("OCR failed")?,
        };

        let preview: String = output.text.as_str().chars().take(OCR_PREVIEW_CHARS).collect();
        println!("{preview}");
        if output.text.char_count() > OCR_PREVIEW_CHARS {
            println!("{}", dim("…"));
        }
        if !cli.quiet {
            eprintln!(
                "{}  preset {}  {} chars  {:.1}s  →  {}",
                green("✔"),
                output.preset,
                output.text.char_count(),
                output.elapsed_ms as f64 / 1000.0,
                bold(&output.path.display().to_string()),
            );
        }
        return Ok(ExitCode::SUCCESS);
    }

    // ── Full pipeline ────────────────────────────────────────────────────
    let pipeline = Pipeline::from_settings(settings).context("Invalid configuration")?;
    let result = pipeline.run(&cli.image).await;
    if let Some(ref o) = observer {
        o.finish();
    }

    let output = match result {
        Err(e) => return cancellation_exit(&e).ok_or(e).context("Extraction failed"),
        Ok(output) => output,
    };

    print!("{}", render_summary(&output.record));

    if let Some(err) = output.persist_error {
        return Err(anyhow::Error::new(err).context("Record extracted but not saved"));
    }

    if !cli.quiet {
        if let Some(ref path) = output.ocr_path {
            eprintln!("   OCR text:  {}", path.display());
        }
        eprintln!(
            "{}  {} service(s)  {}ms  →  {}",
            green("✔"),
            output.record.services_at_locations.len(),
            output.stats.total_ms,
            bold(&output.json_path.display().to_string()),
        );
    }

    Ok(ExitCode::SUCCESS)
}

/// Ctrl-C is a normal stop: exit 0 with a note on stderr. Any other error is
/// handed back to the caller.
fn cancellation_exit(err: &HsdsError) -> Option<ExitCode> {
    err.is_cancellation().then(|| {
        eprintln!("{}", yellow("cancelled by user"));
        ExitCode::SUCCESS
    })
}

async fn ctrl_c() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn provider_for(cli: &Cli) -> String {
    let strategy: Strategy = cli.strategy.into();
    cli.provider
        .clone()
        .unwrap_or_else(|| strategy.default_provider().to_string())
}

/// `--api-key` wins over the provider's variable; keyless providers get none.
fn api_key_for(
    flag: Option<String>,
    provider: &str,
    env: impl Fn(&str) -> Option<String>,
) -> Option<String> {
    match credential_env_var(provider) {
        Some(var) => flag.or_else(|| env(var)),
        None => flag,
    }
}

/// Map CLI args to `Settings`.
async fn build_settings(cli: &Cli, progress: Option<ProgressCallback>) -> Result<Settings> {
    let strategy: Strategy = cli.strategy.into();
    let provider = provider_for(cli);
    let api_key = api_key_for(cli.api_key.clone(), &provider, |var| std::env::var(var).ok());

    let system_prompt = match cli.system_prompt {
        Some(ref path) => Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read system prompt from {:?}", path))?,
        ),
        None => None,
    };

    let mut builder = Settings::builder()
        .strategy(strategy)
        .ocr_preset(OcrPreset::resolve(&cli.ocr_preset))
        .ocr_timeout_secs(cli.ocr_timeout)
        .provider_name(provider)
        .api_key(api_key)
        .temperature(cli.temperature)
        .max_tokens(cli.max_tokens)
        .api_timeout_secs(cli.api_timeout);

    if let Some(ref endpoint) = cli.ocr_endpoint {
        builder = builder.ocr_endpoint(endpoint.clone());
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref host) = cli.ollama_host {
        builder = builder.ollama_host(host.clone());
    }
    if let Some(ref path) = cli.output {
        builder = builder.json_output(path.clone());
    }
    if let Some(ref path) = cli.ocr_output {
        builder = builder.ocr_output(path.clone());
    }
    if let Some(prompt) = system_prompt {
        builder = builder.system_prompt(prompt);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_exits_zero() {
        assert_eq!(cancellation_exit(&HsdsError::Cancelled), Some(ExitCode::SUCCESS));
    }

    #[test]
    fn other_errors_are_not_swallowed() {
        assert!(cancellation_exit(&HsdsError::InvalidConfig("bad".into())).is_none());
        assert!(cancellation_exit(&HsdsError::OcrFailed {
            endpoint: "http://localhost:8000".into(),
            detail: "refused".into(),
        }).is_none());
    }

    #[test]
    fn api_key_flag_wins_over_environment() {
        let env = |_: &str| Some("from-env".to_string());
        assert_eq!(
            api_key_for(Some("from-flag".into()), "openai", env).as_deref(),
            Some("from-flag")
        );
        assert_eq!(api_key_for(None, "openai", env).as_deref(), Some("from-env"));
        assert_eq!(api_key_for(None, "ollama", env), None);
    }

    #[test]
    fn provider_flag_overrides_strategy_default() {
        let cli = Cli::try_parse_from([
            "hsds-extract",
            "--strategy",
            "ocr-then-text",
            "--provider",
            "mistral",
        ])
        .unwrap();
        assert_eq!(provider_for(&cli), "mistral");
        assert!(credential_read_from_env(&provider_for(&cli)));
    }
}
