pub mod boundary;
pub mod config;
pub mod engine;
pub mod extract;
pub mod normalize;
pub mod pipeline;
pub mod preprocess;
pub mod progress;
pub mod recognizer;
pub mod roi;
pub mod types;

pub use boundary::ReceiptBounds;
pub use config::{ConfigError, KeywordConfig, PipelineConfig, RecognizeOptions};
pub use engine::{EngineHandle, EngineState};
pub use extract::{extract_amount, extract_date, postprocess, Extraction};
pub use normalize::normalize;
pub use pipeline::{is_supported_file, spawn_intake_watcher, PdfRenderer, PipelineError, ReceiptPipeline};
pub use preprocess::{preprocess, PreprocessError};
pub use progress::{Progress, ProgressSink};
pub use recognizer::{EngineSettings, MockRecognizer, OcrBackend, OcrError, PageSegMode, RecognizeParams};
pub use roi::{RegionKind, RegionOfInterest, RoiExtractor, RoiText};
pub use types::{BoundingBox, PageText, RecognitionResult, RecognizedWord};

#[cfg(feature = "tesseract")]
pub use recognizer::tesseract_backend::TesseractRecognizer;
