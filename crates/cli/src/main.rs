use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kanjo_ocr::{
    spawn_intake_watcher, EngineHandle, EngineSettings, PipelineConfig, ProgressSink, ReceiptPipeline,
    RecognitionResult,
};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// Read dates and totals off receipt images.
#[derive(Parser, Debug)]
#[command(name = "kanjo", version)]
struct Cli {
    /// Config file; defaults to `<config dir>/kanjo/config.toml` when present
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Skip tilt correction
    #[arg(long, global = true)]
    no_tilt: bool,

    /// Skip the focused second pass over date/amount regions
    #[arg(long, global = true)]
    single_pass: bool,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Recognize one or more receipt files and print the results
    Scan {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Watch a folder and recognize every receipt dropped into it
    Watch { dir: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let engine = build_engine(&config.engine)?;
    let pipeline = ReceiptPipeline::new(engine, config);

    match &cli.command {
        Command::Scan { files } => scan(&pipeline, files, cli.pretty).await,
        Command::Watch { dir } => watch(&pipeline, dir, cli.pretty).await,
    }
}

fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("com", "kanjo", "Kanjo").map(|dirs| dirs.config_dir().join("config.toml"))
}

fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load(path).with_context(|| format!("loading config {}", path.display()))?,
        None => match default_config_path().filter(|p| p.is_file()) {
            Some(path) => {
                tracing::debug!("Using config {}", path.display());
                PipelineConfig::load(&path).with_context(|| format!("loading config {}", path.display()))?
            }
            None => PipelineConfig::default(),
        },
    };
    if cli.no_tilt {
        config.options.enable_tilt_correction = false;
    }
    if cli.single_pass {
        config.options.enable_two_pass = false;
    }
    Ok(config)
}

#[cfg(feature = "tesseract")]
fn build_engine(settings: &EngineSettings) -> Result<EngineHandle> {
    let data_path = settings.data_path.as_ref().map(|p| p.display().to_string());
    let backend = kanjo_ocr::TesseractRecognizer::new(data_path, &settings.language);
    EngineHandle::spawn(backend, settings.clone()).context("starting OCR engine")
}

#[cfg(not(feature = "tesseract"))]
fn build_engine(_settings: &EngineSettings) -> Result<EngineHandle> {
    anyhow::bail!("kanjo was built without an OCR engine; rebuild with `--features tesseract`")
}

/// Forward pipeline progress to the log for the lifetime of one run.
fn log_progress(path: &Path) -> ProgressSink {
    let (sink, mut rx) = ProgressSink::channel();
    let name = path.display().to_string();
    tokio::spawn(async move {
        while let Some(p) = rx.recv().await {
            tracing::debug!(file = %name, percent = p.percent, stage = %p.stage, "progress");
        }
    });
    sink
}

fn render(path: &Path, result: &RecognitionResult, pretty: bool) -> Result<String> {
    let value = serde_json::json!({
        "file": path.display().to_string(),
        "needs_review": result.needs_review(),
        "result": result,
    });
    let out = if pretty { serde_json::to_string_pretty(&value)? } else { serde_json::to_string(&value)? };
    Ok(out)
}

async fn process(pipeline: &ReceiptPipeline, path: &Path, pretty: bool) -> Result<()> {
    tracing::info!("Processing receipt: {}", path.display());
    let result = pipeline
        .process_file(path, log_progress(path))
        .await
        .with_context(|| format!("recognizing {}", path.display()))?;
    println!("{}", render(path, &result, pretty)?);
    Ok(())
}

async fn scan(pipeline: &ReceiptPipeline, files: &[PathBuf], pretty: bool) -> Result<()> {
    let mut failures = 0usize;
    for path in files {
        if let Err(e) = process(pipeline, path, pretty).await {
            tracing::warn!("{e:#}");
            failures += 1;
        }
    }
    pipeline.engine().release().await.context("releasing OCR engine")?;
    anyhow::ensure!(failures == 0, "{failures} of {} receipts failed", files.len());
    Ok(())
}

async fn watch(pipeline: &ReceiptPipeline, dir: &Path, pretty: bool) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating intake folder {}", dir.display()))?;

    // The channel bridges the notify watcher thread and the async processor.
    let (tx, mut rx) = mpsc::channel::<PathBuf>(64);
    // The watcher must be kept alive for the duration of the command.
    let _watcher = spawn_intake_watcher(dir, tx).context("starting intake folder watcher")?;
    tracing::info!("Watching intake folder: {}", dir.display());

    loop {
        tokio::select! {
            Some(path) = rx.recv() => {
                if let Err(e) = process(pipeline, &path, pretty).await {
                    tracing::warn!("Receipt pipeline error: {e:#}");
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    pipeline.engine().release().await.context("releasing OCR engine")?;
    Ok(())
}
