use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chek_ocr::{
    compose_parser_input, save_lines, OcrBackend, PipelineConfig, ReceiptPipeline,
    TesseractRecognizer,
};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod watch;

#[derive(Parser, Debug)]
#[command(name = "chek")]
#[command(version, about = "Best-effort text extraction from photographed receipts", long_about = None)]
struct Cli {
    /// Config file (defaults to the platform config dir, then built-in defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Tesseract languages, e.g. rus+eng
    #[arg(long, global = true)]
    lang: Option<String>,

    /// Path to the tesseract executable
    #[arg(long, global = true)]
    tesseract: Option<PathBuf>,

    /// Seconds to wait for one receipt before giving up
    #[arg(long, global = true, default_value_t = 120)]
    timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the cleaned transcription of one receipt
    Text {
        image: PathBuf,

        /// Hint prepended to the text, as handed to the downstream parser
        #[arg(long)]
        hint: Option<String>,
    },

    /// Transcribe one receipt and save the lines to a file
    Parse {
        image: PathBuf,

        /// Output file (default: receipt_text.txt)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Keep blank lines
        #[arg(long)]
        keep_empty: bool,

        /// Also print the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Transcribe every image dropped into a folder
    Watch {
        dir: PathBuf,

        /// Where transcriptions go (default: the watched folder)
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    block_on_abandoning(execute(cli))?
}

/// Drive `future` to completion, then drop the runtime without joining its
/// blocking threads, so a receipt abandoned by `--timeout` cannot hold the
/// process open.
fn block_on_abandoning<F: Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let output = runtime.block_on(future);
    runtime.shutdown_background();
    Ok(output)
}

async fn execute(cli: Cli) -> Result<()> {
    let config = resolve_config(&cli)?;
    let pipeline = Arc::new(build_pipeline(&config)?);
    let timeout = Duration::from_secs(cli.timeout);

    match cli.command {
        Command::Text { image, hint } => {
            let text = run_blocking(&pipeline, timeout, move |p| p.extract_text(&image)).await?;
            println!("{}", compose_parser_input(hint.as_deref(), &text));
        }
        Command::Parse { image, output, keep_empty, json } => {
            let report = run_blocking(&pipeline, timeout, move |p| p.run(&image)).await?;
            let lines: Vec<&str> = report
                .lines
                .iter()
                .map(String::as_str)
                .filter(|l| keep_empty || !l.is_empty())
                .collect();
            let destination = save_lines(&lines, output.as_deref())?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            println!("Parsed text saved to {}", destination.display());
        }
        Command::Watch { dir, out_dir } => {
            let out_dir = out_dir.unwrap_or_else(|| dir.clone());
            watch::run(pipeline, &dir, &out_dir, timeout).await?;
        }
    }

    Ok(())
}

/// `--config`, else `<config dir>/chek/config.toml` when present, else
/// defaults. Command-line overrides are applied last.
fn resolve_config(cli: &Cli) -> Result<PipelineConfig> {
    let path = cli.config.clone().or_else(|| {
        directories::ProjectDirs::from("com", "chek", "chek")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .filter(|p| p.is_file())
    });

    let mut config = match path {
        Some(path) => PipelineConfig::load(&path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    apply_overrides(&mut config, cli.lang.as_deref(), cli.tesseract.as_deref());
    Ok(config)
}

fn apply_overrides(config: &mut PipelineConfig, lang: Option<&str>, tesseract: Option<&Path>) {
    if let Some(lang) = lang {
        config.language = lang.to_string();
    }
    if let Some(cmd) = tesseract {
        config.tesseract_cmd = Some(cmd.to_path_buf());
    }
}

fn build_pipeline(config: &PipelineConfig) -> Result<ReceiptPipeline<TesseractRecognizer>> {
    let recognizer = TesseractRecognizer::new(config.tesseract_cmd.clone())
        .with_tessdata_dir(config.tessdata_dir.clone())
        .with_dpi(config.dpi);
    ReceiptPipeline::from_config(recognizer, config).context("Failed to build receipt pipeline")
}

/// Run a blocking pipeline call off the async runtime, abandoning it after
/// `timeout`.
pub(crate) async fn run_blocking<R, T, F>(
    pipeline: &Arc<ReceiptPipeline<R>>,
    timeout: Duration,
    f: F,
) -> Result<T>
where
    R: OcrBackend + 'static,
    T: Send + 'static,
    F: FnOnce(&ReceiptPipeline<R>) -> Result<T, chek_ocr::PipelineError> + Send + 'static,
{
    let pipeline = Arc::clone(pipeline);
    let task = tokio::task::spawn_blocking(move || f(&pipeline));
    let joined = tokio::time::timeout(timeout, task)
        .await
        .with_context(|| format!("Receipt processing timed out after {timeout:?}"))?;
    let result = joined.context("Receipt worker panicked")?;
    Ok(result?)
}
