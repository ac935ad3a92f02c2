//! CLI binary for rxplain.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig` and prints the result JSON.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use rxplain::{
    pipeline::input, process, ErrorKind, ModelCandidate, PipelineConfig, PipelineInput,
    PipelineObserver,
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "rxplain",
    version,
    about = "Interpret a photographed medical prescription into structured, translated instructions"
)]
struct Args {
    /// Path or HTTP(S) URL of the prescription photograph
    input: String,

    /// Target language for the translated instructions
    #[arg(short, long, default_value = "Hindi", env = "RXPLAIN_LANGUAGE")]
    language: String,

    /// Provider name (e.g. gemini, openai); auto-detected from API keys when omitted
    #[arg(short, long, env = "RXPLAIN_PROVIDER")]
    provider: Option<String>,

    /// Override the vision fallback chain (repeatable, tried in order)
    #[arg(short, long = "model")]
    models: Vec<String>,

    /// Override the OCR-fallback text chain (repeatable, tried in order)
    #[arg(long = "text-model")]
    text_models: Vec<String>,

    /// Overall wall-clock budget in seconds
    #[arg(short = 't', long, default_value_t = 180)]
    timeout: u64,

    /// Skip the contrast/sharpness enhancement pass
    #[arg(long)]
    no_enhance: bool,

    /// Pretty-print the result JSON
    #[arg(long)]
    pretty: bool,
}

/// Feed the spinner with failover-chain events so long backoffs do not
/// look like a hang.
struct SpinnerObserver {
    bar: ProgressBar,
}

impl PipelineObserver for SpinnerObserver {
    fn on_attempt(&self, model: &str, attempt: u32) {
        if attempt == 0 {
            self.bar.set_message(format!("asking {model}…"));
        } else {
            self.bar
                .set_message(format!("asking {model} (attempt {})…", attempt + 1));
        }
    }

    fn on_attempt_failed(&self, model: &str, _attempt: u32, kind: ErrorKind, _detail: &str) {
        self.bar.set_message(format!("{model}: {kind}, backing off…"));
    }

    fn on_model_advance(&self, exhausted_model: &str) {
        self.bar
            .println(format!("  ✗ {exhausted_model} exhausted, trying next model"));
    }

    fn on_fallback_started(&self) {
        self.bar
            .println("  ↪ vision chain exhausted, running local OCR fallback");
        self.bar.set_message("running OCR…");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    bar.enable_steady_tick(Duration::from_millis(80));
    bar.set_message("reading input…");

    let bytes = input::resolve_input(&args.input, 60)
        .await
        .with_context(|| format!("could not resolve input '{}'", args.input))?;

    let mut builder = PipelineConfig::builder()
        .overall_timeout_secs(args.timeout)
        .enhance(!args.no_enhance)
        .observer(Arc::new(SpinnerObserver { bar: bar.clone() }));

    if let Some(provider) = args.provider {
        builder = builder.provider_name(provider);
    }
    if !args.models.is_empty() {
        builder = builder.vision_models(
            args.models
                .iter()
                .enumerate()
                .map(|(i, id)| ModelCandidate::vision(id.as_str(), i as u8))
                .collect(),
        );
    }
    if !args.text_models.is_empty() {
        builder = builder.text_models(
            args.text_models
                .iter()
                .enumerate()
                .map(|(i, id)| ModelCandidate::vision(id.as_str(), i as u8))
                .collect(),
        );
    }

    let config = builder.build()?;

    let result = process(PipelineInput::Image(bytes), args.language.as_str(), &config).await;
    bar.finish_and_clear();

    let result = result?;
    let json = if args.pretty {
        serde_json::to_string_pretty(&result)?
    } else {
        serde_json::to_string(&result)?
    };
    println!("{json}");

    eprintln!(
        "✓ {} medicine(s), {} interaction warning(s)",
        result.english.len(),
        result.dangerous_combinations.len()
    );

    Ok(())
}
