use serde::Serialize;
use tokio::sync::mpsc;

/// A single progress update for one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Progress {
    /// 0–100.
    pub percent: u8,
    pub stage: String,
}

/// Per-run progress channel.
///
/// Each run gets its own sender, so concurrent runs never share a handler.
/// A sink can be narrowed with [`ProgressSink::scoped`] so that a sub-stage
/// reporting 0–100 lands inside its parent's range.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    tx: Option<mpsc::UnboundedSender<Progress>>,
    start: u8,
    end: u8,
}

impl Default for ProgressSink {
    fn default() -> Self {
        Self::none()
    }
}

impl ProgressSink {
    /// A sink that drops every update.
    pub fn none() -> Self {
        Self { tx: None, start: 0, end: 100 }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Progress>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx), start: 0, end: 100 }, rx)
    }

    pub fn report(&self, percent: u8, stage: impl Into<String>) {
        if let Some(tx) = &self.tx {
            // A dropped receiver only means nobody is listening.
            let _ = tx.send(Progress { percent: self.map(percent), stage: stage.into() });
        }
    }

    /// A child sink whose 0–100 maps onto `start..=end` of this sink.
    pub fn scoped(&self, start: u8, end: u8) -> Self {
        Self {
            tx: self.tx.clone(),
            start: self.map(start),
            end: self.map(end.max(start)),
        }
    }

    fn map(&self, percent: u8) -> u8 {
        let percent = percent.min(100) as u32;
        let span = self.end.saturating_sub(self.start) as u32;
        (self.start as u32 + span * percent / 100) as u8
    }
}
