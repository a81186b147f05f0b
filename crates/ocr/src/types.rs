use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Axis-aligned box in canvas pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Exclusive right edge.
    pub fn right(&self) -> u32 {
        self.x.saturating_add(self.width)
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> u32 {
        self.y.saturating_add(self.height)
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn center(&self) -> (f32, f32) {
        (
            self.x as f32 + self.width as f32 / 2.0,
            self.y as f32 + self.height as f32 / 2.0,
        )
    }

    /// True when the two boxes share at least one pixel.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        BoundingBox {
            x,
            y,
            width: self.right().max(other.right()) - x,
            height: self.bottom().max(other.bottom()) - y,
        }
    }

    /// Scale the box around its center by `factor`, clipped to a
    /// `max_width`×`max_height` canvas. Returns `None` when nothing is left.
    pub fn expand(&self, factor: f32, max_width: u32, max_height: u32) -> Option<BoundingBox> {
        let (cx, cy) = self.center();
        let half_w = self.width as f32 * factor / 2.0;
        let half_h = self.height as f32 * factor / 2.0;

        let left = (cx - half_w).floor().max(0.0) as u32;
        let top = (cy - half_h).floor().max(0.0) as u32;
        let right = ((cx + half_w).ceil().max(0.0) as u32).min(max_width);
        let bottom = ((cy + half_h).ceil().max(0.0) as u32).min(max_height);

        if right <= left || bottom <= top {
            return None;
        }
        Some(BoundingBox::new(left, top, right - left, bottom - top))
    }
}

/// One word reported by the recognition engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizedWord {
    pub text: String,
    pub bbox: BoundingBox,
    /// Engine confidence for this word (0.0–1.0).
    pub confidence: f32,
}

impl RecognizedWord {
    pub fn new(text: impl Into<String>, bbox: BoundingBox, confidence: f32) -> Self {
        Self {
            text: text.into(),
            bbox,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// Output of a single recognition pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageText {
    pub text: String,
    pub words: Vec<RecognizedWord>,
}

impl PageText {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self { text: text.into(), words: Vec::new() }
    }
}

/// The pipeline's only durable output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionResult {
    pub raw_text: String,
    /// Transaction date, serialized as `YYYY-MM-DD`.
    pub date: Option<NaiveDate>,
    /// Total in whole currency units.
    pub amount: Option<i64>,
    /// Aggregate confidence (0.0–1.0).
    pub confidence: f32,
    pub processing_time_ms: u64,
}

impl RecognitionResult {
    /// Whether a person should confirm the fields before a record is created.
    pub fn needs_review(&self) -> bool {
        self.confidence < 0.7 || self.date.is_none() || self.amount.is_none()
    }

    pub fn date_string(&self) -> Option<String> {
        self.date.map(|d| d.format("%Y-%m-%d").to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognized_word_clamps_confidence() {
        let w = RecognizedWord::new("合計", BoundingBox::new(0, 0, 10, 10), 1.5);
        assert_eq!(w.confidence, 1.0);
        let w = RecognizedWord::new("合計", BoundingBox::new(0, 0, 10, 10), -0.1);
        assert_eq!(w.confidence, 0.0);
    }

    #[test]
    fn edges_saturate_on_huge_boxes() {
        let b = BoundingBox::new(u32::MAX - 5, 10, 100, u32::MAX);
        assert_eq!(b.right(), u32::MAX);
        assert_eq!(b.bottom(), u32::MAX);
        let u = b.union(&BoundingBox::new(0, 0, 10, 10));
        assert_eq!((u.width, u.height), (u32::MAX, u32::MAX));
        assert!(b.intersects(&BoundingBox::new(u32::MAX - 1, 20, 1, 1)));
    }

    #[test]
    fn intersects_requires_shared_pixels() {
        let a = BoundingBox::new(0, 0, 10, 10);
        assert!(a.intersects(&BoundingBox::new(5, 5, 10, 10)));
        // Touching edges do not overlap.
        assert!(!a.intersects(&BoundingBox::new(10, 0, 5, 5)));
        assert!(!a.intersects(&BoundingBox::new(20, 20, 5, 5)));
    }

    #[test]
    fn union_covers_both() {
        let u = BoundingBox::new(0, 0, 10, 10).union(&BoundingBox::new(5, 8, 10, 10));
        assert_eq!(u, BoundingBox::new(0, 0, 15, 18));
    }

    #[test]
    fn expand_keeps_center_and_clips() {
        let b = BoundingBox::new(40, 40, 20, 10);
        assert_eq!(b.expand(2.0, 200, 200), Some(BoundingBox::new(30, 35, 40, 20)));

        let edge = BoundingBox::new(0, 0, 20, 10);
        let clipped = edge.expand(2.0, 25, 200).unwrap();
        assert_eq!(clipped.x, 0);
        assert_eq!(clipped.right(), 25);

        let outside = BoundingBox::new(300, 300, 10, 10);
        assert_eq!(outside.expand(1.5, 100, 100), None);
    }

    #[test]
    fn needs_review_threshold() {
        let mut r = RecognitionResult {
            raw_text: String::new(),
            date: NaiveDate::from_ymd_opt(2024, 7, 24),
            amount: Some(1234),
            confidence: 0.5,
            processing_time_ms: 12,
        };
        assert!(r.needs_review());
        r.confidence = 0.9;
        assert!(!r.needs_review());
        r.amount = None;
        assert!(r.needs_review());
    }

    #[test]
    fn result_serializes_date_as_iso_string() {
        let r = RecognitionResult {
            raw_text: "x".into(),
            date: NaiveDate::from_ymd_opt(2024, 7, 24),
            amount: Some(1234),
            confidence: 0.8,
            processing_time_ms: 5,
        };
        let json = serde_json::to_string(&r).unwrap();
        assert!(json.contains("\"date\":\"2024-07-24\""), "{json}");
        assert_eq!(r.date_string().as_deref(), Some("2024-07-24"));
    }
}
