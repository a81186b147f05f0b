//! Lifecycle manager for the shared recognition engine.
//!
//! The engine is owned by one worker thread that drains a command queue.
//! Initialization is therefore never run twice concurrently, and recognition
//! calls from concurrent pipeline runs are serialized in arrival order.

use std::fmt;

use image::GrayImage;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::progress::ProgressSink;
use crate::recognizer::{EngineSettings, OcrBackend, OcrError, RecognizeParams};
use crate::types::PageText;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Initializing,
    Ready,
    Recognizing,
    /// Terminal until [`EngineHandle::reset`].
    Error,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Uninitialized => write!(f, "uninitialized"),
            EngineState::Initializing => write!(f, "initializing"),
            EngineState::Ready => write!(f, "ready"),
            EngineState::Recognizing => write!(f, "recognizing"),
            EngineState::Error => write!(f, "error"),
        }
    }
}

type Reply<T> = oneshot::Sender<Result<T, OcrError>>;

enum Command {
    Initialize {
        progress: ProgressSink,
        reply: Reply<()>,
    },
    Recognize {
        image: GrayImage,
        params: RecognizeParams,
        progress: ProgressSink,
        reply: Reply<PageText>,
    },
    Terminate {
        reply: Reply<()>,
    },
    Reset {
        reply: Reply<()>,
    },
}

/// Cloneable handle to the engine worker. All clones share one engine.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<EngineState>,
}

impl fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineHandle").field("state", &self.state()).finish()
    }
}

impl EngineHandle {
    /// Move `backend` onto a dedicated worker thread. The engine is loaded
    /// lazily on the first `initialize` or `recognize`.
    pub fn spawn<B: OcrBackend>(backend: B, settings: EngineSettings) -> Result<Self, OcrError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(EngineState::Uninitialized);

        let worker = Worker { backend: Box::new(backend), settings, state: state_tx };
        std::thread::Builder::new()
            .name("kanjo-ocr-engine".into())
            .spawn(move || worker.run(rx))
            .map_err(|e| OcrError::Engine(format!("failed to start engine worker: {e}")))?;

        Ok(Self { tx, state: state_rx })
    }

    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    /// Load the engine if needed. Idempotent: an engine that is already
    /// `Ready` returns immediately, and a request queued behind an in-flight
    /// load observes its result instead of loading again.
    pub async fn initialize(&self, progress: ProgressSink) -> Result<(), OcrError> {
        if self.state() == EngineState::Ready {
            progress.report(100, "engine ready");
            return Ok(());
        }
        self.request(|reply| Command::Initialize { progress, reply }).await
    }

    /// Alias of [`initialize`](Self::initialize) for callers that pair it with
    /// [`release`](Self::release).
    pub async fn acquire(&self, progress: ProgressSink) -> Result<(), OcrError> {
        self.initialize(progress).await
    }

    /// Run recognition, initializing first if necessary.
    pub async fn recognize(
        &self,
        image: GrayImage,
        params: RecognizeParams,
        progress: ProgressSink,
    ) -> Result<PageText, OcrError> {
        self.request(|reply| Command::Recognize { image, params, progress, reply }).await
    }

    /// Unload the engine. The next call re-initializes.
    pub async fn terminate(&self) -> Result<(), OcrError> {
        self.request(|reply| Command::Terminate { reply }).await
    }

    pub async fn release(&self) -> Result<(), OcrError> {
        self.terminate().await
    }

    /// Leave the `Error` state; the engine is unloaded and must re-initialize.
    pub async fn reset(&self) -> Result<(), OcrError> {
        self.request(|reply| Command::Reset { reply }).await
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, OcrError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(make(reply)).map_err(|_| OcrError::WorkerStopped)?;
        rx.await.map_err(|_| OcrError::WorkerStopped)?
    }
}

struct Worker {
    backend: Box<dyn OcrBackend>,
    settings: EngineSettings,
    state: watch::Sender<EngineState>,
}

impl Worker {
    fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(cmd) = rx.blocking_recv() {
            match cmd {
                Command::Initialize { progress, reply } => {
                    let _ = reply.send(self.ensure_ready(&progress));
                }
                Command::Recognize { image, params, progress, reply } => {
                    let _ = reply.send(self.recognize(&image, &params, &progress));
                }
                Command::Terminate { reply } => {
                    self.unload();
                    debug!("OCR engine terminated");
                    let _ = reply.send(Ok(()));
                }
                Command::Reset { reply } => {
                    if self.current() == EngineState::Error {
                        info!("OCR engine reset after failure");
                    }
                    self.unload();
                    let _ = reply.send(Ok(()));
                }
            }
        }
        // Every handle is gone.
        self.backend.unload();
        debug!("OCR engine worker stopped");
    }

    fn current(&self) -> EngineState {
        *self.state.borrow()
    }

    fn set(&self, state: EngineState) {
        self.state.send_replace(state);
    }

    fn ensure_ready(&mut self, progress: &ProgressSink) -> Result<(), OcrError> {
        match self.current() {
            EngineState::Ready => {
                progress.report(100, "engine ready");
                Ok(())
            }
            EngineState::Error => Err(OcrError::EngineFailed),
            _ => self.load(progress),
        }
    }

    fn load(&mut self, progress: &ProgressSink) -> Result<(), OcrError> {
        self.set(EngineState::Initializing);
        match self.load_stages(progress) {
            Ok(()) => {
                self.set(EngineState::Ready);
                info!(language = %self.settings.language, "OCR engine ready");
                Ok(())
            }
            Err(e) => {
                self.backend.unload();
                self.set(EngineState::Uninitialized);
                warn!("OCR engine initialization failed: {e}");
                Err(e)
            }
        }
    }

    fn load_stages(&mut self, progress: &ProgressSink) -> Result<(), OcrError> {
        progress.report(0, "loading engine");
        self.backend.load_core().map_err(|e| OcrError::init("load core", e))?;

        progress.report(30, "loading language data");
        self.backend
            .load_language(&self.settings.language)
            .map_err(|e| OcrError::init("load language", e))?;

        progress.report(80, "configuring engine");
        self.backend
            .configure(&self.settings)
            .map_err(|e| OcrError::init("configure", e))?;

        progress.report(100, "engine ready");
        Ok(())
    }

    fn recognize(
        &mut self,
        image: &GrayImage,
        params: &RecognizeParams,
        progress: &ProgressSink,
    ) -> Result<PageText, OcrError> {
        self.ensure_ready(&progress.scoped(0, 40))?;

        self.set(EngineState::Recognizing);
        progress.report(40, "recognizing text");
        match self.backend.recognize(image, params) {
            Ok(page) => {
                self.set(EngineState::Ready);
                progress.report(100, "recognition complete");
                Ok(page)
            }
            Err(OcrError::Engine(msg)) => {
                error!("OCR engine fault: {msg}");
                self.set(EngineState::Error);
                Err(OcrError::Engine(msg))
            }
            Err(e) => {
                self.set(EngineState::Ready);
                Err(e)
            }
        }
    }

    fn unload(&mut self) {
        self.backend.unload();
        self.set(EngineState::Uninitialized);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::Progress;
    use crate::recognizer::{MockRecognizer, MockResponse};
    use std::sync::atomic::Ordering;

    fn blank() -> GrayImage {
        GrayImage::new(8, 8)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Progress>) -> Vec<Progress> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[tokio::test]
    async fn initialize_reports_stages_and_becomes_ready() {
        let engine = EngineHandle::spawn(MockRecognizer::new("x"), EngineSettings::default()).unwrap();
        assert_eq!(engine.state(), EngineState::Uninitialized);

        let (sink, mut rx) = ProgressSink::channel();
        engine.initialize(sink).await.unwrap();
        assert_eq!(engine.state(), EngineState::Ready);

        let stages: Vec<String> = drain(&mut rx).into_iter().map(|p| p.stage).collect();
        assert_eq!(
            stages,
            vec!["loading engine", "loading language data", "configuring engine", "engine ready"]
        );
    }

    #[tokio::test]
    async fn concurrent_initialize_loads_once() {
        let mock = MockRecognizer::new("x");
        let loads = mock.load_counter();
        let engine = EngineHandle::spawn(mock, EngineSettings::default()).unwrap();
        let other = engine.clone();

        let (a, b, c) = tokio::join!(
            engine.initialize(ProgressSink::none()),
            engine.initialize(ProgressSink::none()),
            other.initialize(ProgressSink::none()),
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(loads.load(Ordering::SeqCst), 1);

        engine.initialize(ProgressSink::none()).await.unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_initialization_can_be_retried() {
        let engine = EngineHandle::spawn(MockRecognizer::new("x").failing_loads(1), EngineSettings::default())
            .unwrap();

        let err = engine.initialize(ProgressSink::none()).await.unwrap_err();
        assert!(matches!(err, OcrError::Init { stage: "load language", .. }), "{err}");
        assert_eq!(engine.state(), EngineState::Uninitialized);

        engine.initialize(ProgressSink::none()).await.unwrap();
        assert_eq!(engine.state(), EngineState::Ready);
    }

    #[tokio::test]
    async fn recognize_initializes_lazily() {
        let mock = MockRecognizer::new("合計 ¥1,234");
        let loads = mock.load_counter();
        let engine = EngineHandle::spawn(mock, EngineSettings::default()).unwrap();

        let page = engine
            .recognize(blank(), RecognizeParams::full_page(), ProgressSink::none())
            .await
            .unwrap();
        assert_eq!(page.text, "合計 ¥1,234");
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(engine.state(), EngineState::Ready);
    }

    #[tokio::test]
    async fn recognition_error_returns_to_ready() {
        let mock = MockRecognizer::new("x").with_region_responses([MockResponse::Fail("blur".into())]);
        let engine = EngineHandle::spawn(mock, EngineSettings::default()).unwrap();

        let err = engine
            .recognize(blank(), RecognizeParams::single_line("0123456789"), ProgressSink::none())
            .await
            .unwrap_err();
        assert!(matches!(err, OcrError::Recognition(_)));
        assert_eq!(engine.state(), EngineState::Ready);
    }

    #[tokio::test]
    async fn engine_fault_is_terminal_until_reset() {
        let mock = MockRecognizer::new("page").with_region_responses([MockResponse::Crash("segv".into())]);
        let engine = EngineHandle::spawn(mock, EngineSettings::default()).unwrap();

        let err = engine
            .recognize(blank(), RecognizeParams::single_line("0"), ProgressSink::none())
            .await
            .unwrap_err();
        assert!(matches!(err, OcrError::Engine(_)));
        assert_eq!(engine.state(), EngineState::Error);

        let err = engine
            .recognize(blank(), RecognizeParams::full_page(), ProgressSink::none())
            .await
            .unwrap_err();
        assert!(matches!(err, OcrError::EngineFailed));
        assert!(matches!(engine.initialize(ProgressSink::none()).await, Err(OcrError::EngineFailed)));

        engine.reset().await.unwrap();
        assert_eq!(engine.state(), EngineState::Uninitialized);
        let page = engine
            .recognize(blank(), RecognizeParams::full_page(), ProgressSink::none())
            .await
            .unwrap();
        assert_eq!(page.text, "page");
    }

    #[tokio::test]
    async fn terminate_forces_reinitialization() {
        let mock = MockRecognizer::new("x");
        let loads = mock.load_counter();
        let engine = EngineHandle::spawn(mock, EngineSettings::default()).unwrap();

        engine.acquire(ProgressSink::none()).await.unwrap();
        engine.release().await.unwrap();
        assert_eq!(engine.state(), EngineState::Uninitialized);

        engine
            .recognize(blank(), RecognizeParams::full_page(), ProgressSink::none())
            .await
            .unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn lazy_init_progress_stays_in_lower_range() {
        let engine = EngineHandle::spawn(MockRecognizer::new("x"), EngineSettings::default()).unwrap();
        let (sink, mut rx) = ProgressSink::channel();
        engine.recognize(blank(), RecognizeParams::full_page(), sink).await.unwrap();

        let events = drain(&mut rx);
        assert_eq!(events.first().map(|p| p.percent), Some(0));
        assert_eq!(events.last().map(|p| p.percent), Some(100));
        assert!(events.windows(2).all(|w| w[0].percent <= w[1].percent));
    }
}
