use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{Local, NaiveDate};
use image::{imageops, DynamicImage, GrayImage};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::boundary;
use crate::config::PipelineConfig;
use crate::engine::EngineHandle;
use crate::extract;
use crate::preprocess::{self, PreprocessError};
use crate::progress::ProgressSink;
use crate::recognizer::{OcrError, RecognizeParams};
use crate::roi::{self, RoiExtractor, RoiText};
use crate::types::{PageText, RecognitionResult};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image preprocessing failed: {0}")]
    Preprocess(#[from] PreprocessError),
    #[error("OCR recognition failed: {0}")]
    Ocr(#[from] OcrError),
    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// File extensions the pipeline accepts.
const SUPPORTED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "tif", "tiff", "bmp", "gif", "pdf"];

pub fn is_supported_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SUPPORTED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Renders the first page of a PDF for recognition.
pub trait PdfRenderer: Send + Sync {
    fn render_first_page(&self, data: &[u8]) -> Result<DynamicImage, PreprocessError>;
}

/// Orchestrates: preprocess → boundary → full-page pass → region passes → post-process.
pub struct ReceiptPipeline {
    engine: EngineHandle,
    config: PipelineConfig,
    roi_extractor: RoiExtractor,
    pdf_renderer: Option<Arc<dyn PdfRenderer>>,
}

impl ReceiptPipeline {
    pub fn new(engine: EngineHandle, config: PipelineConfig) -> Self {
        let roi_extractor = RoiExtractor::new(&config.keywords);
        Self { engine, config, roi_extractor, pdf_renderer: None }
    }

    pub fn with_pdf_renderer(mut self, renderer: Arc<dyn PdfRenderer>) -> Self {
        self.pdf_renderer = Some(renderer);
        self
    }

    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Process a file on disk.
    pub async fn process_file(&self, path: &Path, progress: ProgressSink) -> Result<RecognitionResult, PipelineError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                progress.report(100, "error");
                return Err(e.into());
            }
        };
        self.process_bytes(&bytes, progress).await
    }

    /// Process raw bytes (from camera capture or file read).
    pub async fn process_bytes(&self, data: &[u8], progress: ProgressSink) -> Result<RecognitionResult, PipelineError> {
        let decoded = if data.starts_with(b"%PDF") {
            match &self.pdf_renderer {
                Some(renderer) => renderer.render_first_page(data),
                None => Err(PreprocessError::Unsupported("PDF input needs a renderer".into())),
            }
        } else {
            image::load_from_memory(data).map_err(PreprocessError::from)
        };
        match decoded {
            Ok(img) => self.process_image(img, progress).await,
            Err(e) => {
                progress.report(100, "error");
                Err(e.into())
            }
        }
    }

    /// Process an already decoded image.
    pub async fn process_image(&self, img: DynamicImage, progress: ProgressSink) -> Result<RecognitionResult, PipelineError> {
        let today = Local::now().date_naive();
        match self.run(img, &progress, today).await {
            Ok(result) => Ok(result),
            Err(e) => {
                warn!(error = %e, "receipt recognition failed");
                progress.report(100, "error");
                Err(e)
            }
        }
    }

    async fn run(&self, img: DynamicImage, progress: &ProgressSink, today: NaiveDate) -> Result<RecognitionResult, PipelineError> {
        let started = Instant::now();
        progress.report(0, "start");

        // 1. Normalize the canvas.
        let options = self.config.options.clone();
        let canvas = tokio::task::spawn_blocking(move || preprocess::preprocess_image(img, &options)).await??;
        progress.report(10, "preprocessed");

        // 2. Crop to the receipt when its outline is visible.
        let canvas = if self.config.options.enable_boundary_detection {
            tokio::task::spawn_blocking(move || match boundary::locate(&canvas) {
                Some(bounds) => {
                    debug!(?bounds, "receipt bounds");
                    boundary::crop(&canvas, bounds)
                }
                None => canvas,
            })
            .await?
        } else {
            canvas
        };
        progress.report(20, "boundary located");

        // 3. Full-page pass.
        let page = self
            .engine
            .recognize(canvas.clone(), RecognizeParams::full_page(), progress.scoped(20, 60))
            .await?;

        // 4. Focused re-reads of likely date/amount regions.
        let regions = if self.config.options.enable_two_pass {
            self.read_regions(&canvas, &page, progress.scoped(60, 90)).await
        } else {
            Vec::new()
        };
        progress.report(90, "regions read");

        // 5. Typed fields.
        progress.report(95, "post-processing");
        let extraction = extract::postprocess(&page.text, &regions, today);
        let processing_time_ms = started.elapsed().as_millis() as u64;
        progress.report(100, "done");

        info!(
            date = ?extraction.date,
            amount = ?extraction.amount,
            confidence = extraction.confidence,
            regions = regions.len(),
            processing_time_ms,
            "receipt recognized"
        );

        Ok(RecognitionResult {
            raw_text: extraction.raw_text,
            date: extraction.date,
            amount: extraction.amount,
            confidence: extraction.confidence,
            processing_time_ms,
        })
    }

    /// Failed regions are logged and skipped.
    async fn read_regions(&self, canvas: &GrayImage, page: &PageText, progress: ProgressSink) -> Vec<RoiText> {
        let found = self.roi_extractor.extract(&page.words, canvas.width(), canvas.height());
        let top = roi::prioritize(found, self.config.options.max_rois);
        let total = top.len();
        let mut texts = Vec::with_capacity(total);

        for (i, region) in top.into_iter().enumerate() {
            let b = region.bbox;
            let crop = imageops::crop_imm(canvas, b.x, b.y, b.width, b.height).to_image();
            let params = RecognizeParams::single_line(region.kind.whitelist());
            let step = progress.scoped((i * 100 / total) as u8, ((i + 1) * 100 / total) as u8);
            match self.engine.recognize(crop, params, step).await {
                Ok(read) => texts.push(RoiText { kind: region.kind, confidence: region.confidence, text: read.text }),
                Err(e) => warn!(kind = ?region.kind, bbox = ?region.bbox, error = %e, "skipping region"),
            }
        }
        texts
    }
}

// ── Watch-folder integration ──────────────────────────────────────────────────

/// Spawn a notify watcher on `watch_dir` that sends newly created receipt
/// files to `tx`. Returns the watcher; it must be kept alive for watching
/// to continue.
pub fn spawn_intake_watcher(
    watch_dir: &Path,
    tx: mpsc::Sender<PathBuf>,
) -> notify::Result<impl notify::Watcher> {
    use notify::{EventKind, RecursiveMode, Watcher};

    let mut watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| match event {
        Ok(ev) if matches!(ev.kind, EventKind::Create(_)) => {
            for path in ev.paths.into_iter().filter(|p| is_supported_file(p)) {
                if tx.try_send(path).is_err() {
                    warn!("intake queue full or closed, dropping file");
                }
            }
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "intake watcher error"),
    })?;

    watcher.watch(watch_dir, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
