use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use image::GrayImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{BoundingBox, PageText, RecognizedWord};

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("OCR engine failed to initialize during '{stage}': {message}")]
    Init { stage: &'static str, message: String },
    #[error("Recognition failed: {0}")]
    Recognition(String),
    /// The engine itself is unusable; the manager moves to `Error`.
    #[error("OCR engine fault: {0}")]
    Engine(String),
    #[error("OCR engine is in the error state; reset it before further use")]
    EngineFailed,
    #[error("Tesseract not available: build with `tesseract` feature")]
    NotAvailable,
    #[error("OCR engine worker has stopped")]
    WorkerStopped,
}

impl OcrError {
    pub(crate) fn init(stage: &'static str, cause: OcrError) -> Self {
        match cause {
            OcrError::Init { .. } => cause,
            other => OcrError::Init { stage, message: other.to_string() },
        }
    }
}

/// Tesseract page segmentation modes used by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageSegMode {
    /// Fully automatic layout analysis.
    Auto,
    /// A single uniform block of text.
    SingleBlock,
    /// A single text line; used for region-scoped passes.
    SingleLine,
}

impl PageSegMode {
    pub fn as_tesseract_value(self) -> &'static str {
        match self {
            PageSegMode::Auto => "3",
            PageSegMode::SingleBlock => "6",
            PageSegMode::SingleLine => "7",
        }
    }
}

/// Engine-wide settings applied during initialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Tesseract language spec; receipts mix Latin and Japanese glyphs.
    pub language: String,
    /// Directory holding `*.traineddata`; `None` uses the system default.
    pub data_path: Option<PathBuf>,
    /// Glyph whitelist applied to every pass unless overridden.
    pub whitelist: Option<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self { language: "jpn+eng".to_string(), data_path: None, whitelist: None }
    }
}

/// Per-call recognition parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognizeParams {
    pub page_seg_mode: PageSegMode,
    /// Replaces the engine whitelist for this call only.
    pub whitelist: Option<String>,
}

impl RecognizeParams {
    pub fn full_page() -> Self {
        Self { page_seg_mode: PageSegMode::Auto, whitelist: None }
    }

    pub fn single_line(whitelist: impl Into<String>) -> Self {
        Self { page_seg_mode: PageSegMode::SingleLine, whitelist: Some(whitelist.into()) }
    }
}

/// Abstraction over a text-recognition engine with a staged lifecycle.
///
/// Implementations are driven from a single worker thread, so `&mut self`
/// is never shared between concurrent calls.
pub trait OcrBackend: Send + 'static {
    fn load_core(&mut self) -> Result<(), OcrError>;
    fn load_language(&mut self, language: &str) -> Result<(), OcrError>;
    fn configure(&mut self, settings: &EngineSettings) -> Result<(), OcrError>;
    fn recognize(&mut self, image: &GrayImage, params: &RecognizeParams) -> Result<PageText, OcrError>;
    /// Release engine resources; the next use starts again at `load_core`.
    fn unload(&mut self);
}

// ── Mock backend (always available, used for tests) ───────────────────────────

/// Scripted reply for one region-scoped call of [`MockRecognizer`].
#[derive(Debug, Clone)]
pub enum MockResponse {
    Text(String),
    Fail(String),
    Crash(String),
}

/// Returns pre-set text, useful for exercising the pipeline without an
/// installed engine. Full-page calls return the page; single-line calls pop
/// the next scripted region response (empty text once exhausted).
#[derive(Debug)]
pub struct MockRecognizer {
    page: PageText,
    regions: VecDeque<MockResponse>,
    failing_loads: usize,
    loads: Arc<AtomicUsize>,
    calls: Arc<AtomicUsize>,
    page_sizes: Arc<Mutex<Vec<(u32, u32)>>>,
    loaded: bool,
}

impl MockRecognizer {
    pub fn new(text: impl Into<String>) -> Self {
        Self::with_page(PageText::from_text(text))
    }

    pub fn with_page(page: PageText) -> Self {
        Self {
            page,
            regions: VecDeque::new(),
            failing_loads: 0,
            loads: Arc::new(AtomicUsize::new(0)),
            calls: Arc::new(AtomicUsize::new(0)),
            page_sizes: Arc::new(Mutex::new(Vec::new())),
            loaded: false,
        }
    }

    pub fn with_region_responses(mut self, responses: impl IntoIterator<Item = MockResponse>) -> Self {
        self.regions.extend(responses);
        self
    }

    /// Make the first `n` language loads fail.
    pub fn failing_loads(mut self, n: usize) -> Self {
        self.failing_loads = n;
        self
    }

    /// Shared counter of completed core loads.
    pub fn load_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.loads)
    }

    /// Shared counter of recognize calls.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    /// Dimensions of every canvas handed to a full-page call.
    pub fn page_sizes(&self) -> Arc<Mutex<Vec<(u32, u32)>>> {
        Arc::clone(&self.page_sizes)
    }
}

impl OcrBackend for MockRecognizer {
    fn load_core(&mut self) -> Result<(), OcrError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn load_language(&mut self, language: &str) -> Result<(), OcrError> {
        if self.failing_loads > 0 {
            self.failing_loads -= 1;
            return Err(OcrError::Engine(format!("language data '{language}' missing")));
        }
        Ok(())
    }

    fn configure(&mut self, _settings: &EngineSettings) -> Result<(), OcrError> {
        self.loaded = true;
        Ok(())
    }

    fn recognize(&mut self, image: &GrayImage, params: &RecognizeParams) -> Result<PageText, OcrError> {
        if !self.loaded {
            return Err(OcrError::Engine("recognize called before initialization".into()));
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        if params.page_seg_mode != PageSegMode::SingleLine {
            if let Ok(mut sizes) = self.page_sizes.lock() {
                sizes.push(image.dimensions());
            }
            return Ok(self.page.clone());
        }
        match self.regions.pop_front() {
            None => Ok(PageText::default()),
            Some(MockResponse::Text(t)) => Ok(PageText::from_text(t)),
            Some(MockResponse::Fail(msg)) => Err(OcrError::Recognition(msg)),
            Some(MockResponse::Crash(msg)) => Err(OcrError::Engine(msg)),
        }
    }

    fn unload(&mut self) {
        self.loaded = false;
    }
}

/// Parse Tesseract TSV output into word boxes. Only level-5 (word) rows with
/// non-empty text are kept; confidence is rescaled from 0–100 to 0–1.
pub fn parse_tsv_words(tsv: &str) -> Vec<RecognizedWord> {
    tsv.lines()
        .filter_map(|line| {
            let cols: Vec<&str> = line.split('\t').collect();
            if cols.len() < 12 || cols[0] != "5" {
                return None;
            }
            let text = cols[11].trim();
            if text.is_empty() {
                return None;
            }
            let num = |i: usize| cols[i].trim().parse::<u32>().ok();
            let bbox = BoundingBox::new(num(6)?, num(7)?, num(8)?, num(9)?);
            let conf: f32 = cols[10].trim().parse().ok()?;
            Some(RecognizedWord::new(text, bbox, conf / 100.0))
        })
        .collect()
}

// ── Tesseract backend (optional, gated behind `tesseract` feature) ─────────────

#[cfg(feature = "tesseract")]
pub mod tesseract_backend {
    use super::{parse_tsv_words, EngineSettings, OcrBackend, OcrError, RecognizeParams};
    use crate::types::PageText;
    use image::{DynamicImage, GrayImage};
    use leptess::{LepTess, Variable};
    use std::io::Cursor;

    /// Tesseract via `leptess`. A fresh `LepTess` is created per call so the
    /// backend stays `Send`; initialization validates that the language data
    /// actually loads.
    pub struct TesseractRecognizer {
        data_path: Option<String>,
        lang: String,
        whitelist: Option<String>,
        ready: bool,
    }

    impl TesseractRecognizer {
        pub fn new(data_path: Option<String>, lang: &str) -> Self {
            Self { data_path, lang: lang.to_string(), whitelist: None, ready: false }
        }

        fn open(&self) -> Result<LepTess, OcrError> {
            LepTess::new(self.data_path.as_deref(), &self.lang)
                .map_err(|e| OcrError::Engine(e.to_string()))
        }
    }

    impl OcrBackend for TesseractRecognizer {
        fn load_core(&mut self) -> Result<(), OcrError> {
            if let Some(path) = &self.data_path {
                if !std::path::Path::new(path).is_dir() {
                    return Err(OcrError::Engine(format!("tessdata directory not found: {path}")));
                }
            }
            Ok(())
        }

        fn load_language(&mut self, language: &str) -> Result<(), OcrError> {
            self.lang = language.to_string();
            self.open().map(|_| ())
        }

        fn configure(&mut self, settings: &EngineSettings) -> Result<(), OcrError> {
            self.whitelist = settings.whitelist.clone();
            self.ready = true;
            Ok(())
        }

        fn recognize(&mut self, image: &GrayImage, params: &RecognizeParams) -> Result<PageText, OcrError> {
            if !self.ready {
                return Err(OcrError::NotAvailable);
            }
            let mut lt = self.open()?;

            let psm = params.page_seg_mode.as_tesseract_value();
            lt.set_variable(Variable::TesseditPagesegMode, psm)
                .map_err(|e| OcrError::Recognition(e.to_string()))?;
            if let Some(whitelist) = params.whitelist.as_ref().or(self.whitelist.as_ref()) {
                lt.set_variable(Variable::TesseditCharWhitelist, whitelist)
                    .map_err(|e| OcrError::Recognition(e.to_string()))?;
            }

            let png = encode_png(image)?;
            lt.set_image_from_mem(&png)
                .map_err(|e| OcrError::Recognition(e.to_string()))?;

            let text = lt.get_utf8_text().map_err(|e| OcrError::Recognition(e.to_string()))?;
            let tsv = lt.get_tsv_text(0).map_err(|e| OcrError::Recognition(e.to_string()))?;
            Ok(PageText { text, words: parse_tsv_words(&tsv) })
        }

        fn unload(&mut self) {
            self.ready = false;
        }
    }

    fn encode_png(image: &GrayImage) -> Result<Vec<u8>, OcrError> {
        let mut buf = Vec::new();
        DynamicImage::ImageLuma8(image.clone())
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .map_err(|e| OcrError::Recognition(e.to_string()))?;
        Ok(buf)
    }
}
