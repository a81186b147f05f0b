use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::KeywordConfig;
use crate::normalize::normalize;
use crate::types::{BoundingBox, RecognizedWord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionKind {
    Amount,
    Date,
}

impl RegionKind {
    /// Glyphs allowed in a single-line pass over a region of this kind.
    pub fn whitelist(self) -> &'static str {
        match self {
            RegionKind::Amount => "0123456789,.¥$円",
            RegionKind::Date => "0123456789/-.年月日令和平成昭大正明治元RHSTM",
        }
    }

    /// Growth factor applied around the cue word's center.
    fn expansion(self) -> f32 {
        match self {
            RegionKind::Amount => 2.0,
            RegionKind::Date => 1.5,
        }
    }
}

/// A canvas region likely to contain a date or an amount.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegionOfInterest {
    pub bbox: BoundingBox,
    pub kind: RegionKind,
    pub confidence: f32,
}

/// Text read back from one region during the focused pass.
#[derive(Debug, Clone, PartialEq)]
pub struct RoiText {
    pub kind: RegionKind,
    pub confidence: f32,
    pub text: String,
}

// ── Cue tables ───────────────────────────────────────────────────────────────

const AMOUNT_KEYWORDS: &[&str] = &[
    "合計", "小計", "total", "subtotal", "¥", "￥", "$", "円", "税込", "税抜", "内税", "外税", "お会計",
    "お支払",
];

const DATE_KEYWORDS: &[&str] = &["日付", "date", "年", "月", "日"];

const KEYWORD_CONFIDENCE: f32 = 0.7;

/// `(pattern, confidence)`; the strongest match decides the region confidence.
const AMOUNT_PATTERNS: &[(&str, f32)] = &[
    (r"[¥$]\s*\d{1,3}(?:,\d{3})+(?:\.\d+)?|[¥$]\s*\d+(?:\.\d+)?", 0.9),
    (r"(?i)^total\s*:", 0.9),
    (r"^\d{3,12}$", 0.8),
];

const DATE_PATTERNS: &[(&str, f32)] = &[
    (r"\d{4}[-/.]\d{1,2}[-/.]\d{1,2}", 0.9),
    (r"\d{4}年\d{1,2}月\d{1,2}日", 0.9),
    (r"(?:令和|平成|昭和|大正|明治|[RHSTM])\s*(?:\d{1,2}|元)\s*[年./-]", 0.9),
    (r"^\d{1,2}[-/]\d{1,2}[-/]\d{2,4}$", 0.8),
    (r"^\d{1,2}(?:[-/]\d{1,2}|月\d{1,2}日?)$", 0.8),
];

fn compile(table: &[(&str, f32)]) -> Vec<(Regex, f32)> {
    table
        .iter()
        .map(|(pat, conf)| (Regex::new(pat).expect("invalid regex"), *conf))
        .collect()
}

fn amount_patterns() -> &'static [(Regex, f32)] {
    static P: OnceLock<Vec<(Regex, f32)>> = OnceLock::new();
    P.get_or_init(|| compile(AMOUNT_PATTERNS))
}

fn date_patterns() -> &'static [(Regex, f32)] {
    static P: OnceLock<Vec<(Regex, f32)>> = OnceLock::new();
    P.get_or_init(|| compile(DATE_PATTERNS))
}

// ── Extraction ───────────────────────────────────────────────────────────────

/// Finds date/amount regions from the words of a first recognition pass.
#[derive(Debug, Clone)]
pub struct RoiExtractor {
    amount_keywords: Vec<String>,
    date_keywords: Vec<String>,
}

impl Default for RoiExtractor {
    fn default() -> Self {
        Self::new(&KeywordConfig::default())
    }
}

impl RoiExtractor {
    /// Built-in cue words plus any configured extras.
    pub fn new(extra: &KeywordConfig) -> Self {
        let build = |base: &[&str], extra: &[String]| -> Vec<String> {
            base.iter()
                .map(|k| k.to_lowercase())
                .chain(extra.iter().map(|k| k.to_lowercase()))
                .collect()
        };
        Self {
            amount_keywords: build(AMOUNT_KEYWORDS, &extra.amount),
            date_keywords: build(DATE_KEYWORDS, &extra.date),
        }
    }

    /// Candidate regions for every word that looks like, or sits next to,
    /// a date or an amount. Same-kind overlaps are already merged.
    pub fn extract(&self, words: &[RecognizedWord], canvas_width: u32, canvas_height: u32) -> Vec<RegionOfInterest> {
        let mut rois = Vec::new();
        for word in words {
            let text = normalize(&word.text);
            if text.is_empty() {
                continue;
            }
            for kind in [RegionKind::Amount, RegionKind::Date] {
                let Some(confidence) = self.classify(&text, kind) else {
                    continue;
                };
                if let Some(bbox) = word.bbox.expand(kind.expansion(), canvas_width, canvas_height) {
                    rois.push(RegionOfInterest { bbox, kind, confidence });
                }
            }
        }
        let merged = merge_overlapping(rois);
        debug!(words = words.len(), regions = merged.len(), "regions of interest");
        merged
    }

    fn classify(&self, text: &str, kind: RegionKind) -> Option<f32> {
        let (patterns, keywords) = match kind {
            RegionKind::Amount => (amount_patterns(), &self.amount_keywords),
            RegionKind::Date => (date_patterns(), &self.date_keywords),
        };
        let pattern_conf = patterns
            .iter()
            .filter(|(re, _)| re.is_match(text))
            .map(|(_, conf)| *conf)
            .fold(None, |best: Option<f32>, c| Some(best.map_or(c, |b| b.max(c))));
        if pattern_conf.is_some() {
            return pattern_conf;
        }
        let lower = text.to_lowercase();
        keywords
            .iter()
            .any(|k| lower.contains(k.as_str()))
            .then_some(KEYWORD_CONFIDENCE)
    }
}

/// Merge same-kind overlapping regions into their union (max confidence)
/// until no same-kind pair overlaps. Regions of different kinds never merge.
pub fn merge_overlapping(mut rois: Vec<RegionOfInterest>) -> Vec<RegionOfInterest> {
    'scan: loop {
        for i in 0..rois.len() {
            for j in i + 1..rois.len() {
                if rois[i].kind == rois[j].kind && rois[i].bbox.intersects(&rois[j].bbox) {
                    let other = rois.remove(j);
                    let keep = &mut rois[i];
                    keep.bbox = keep.bbox.union(&other.bbox);
                    keep.confidence = keep.confidence.max(other.confidence);
                    continue 'scan;
                }
            }
        }
        return rois;
    }
}

/// Ranking score: confidence blended with a size score that peaks at
/// 10 000 px², boosted for amounts.
pub fn priority(roi: &RegionOfInterest) -> f32 {
    const IDEAL_AREA: f64 = 10_000.0;
    let area = roi.bbox.area() as f64;
    let size_score = if area == 0.0 { 0.0 } else { (area.min(IDEAL_AREA) / area.max(IDEAL_AREA)) as f32 };
    let score = 0.6 * roi.confidence + 0.4 * size_score;
    match roi.kind {
        RegionKind::Amount => score * 1.2,
        RegionKind::Date => score,
    }
}

/// The `max` highest-priority regions, best first.
pub fn prioritize(mut rois: Vec<RegionOfInterest>, max: usize) -> Vec<RegionOfInterest> {
    rois.sort_by(|a, b| priority(b).total_cmp(&priority(a)));
    rois.truncate(max);
    rois
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(text: &str, x: u32, y: u32, w: u32, h: u32) -> RecognizedWord {
        RecognizedWord::new(text, BoundingBox::new(x, y, w, h), 0.9)
    }

    fn roi(kind: RegionKind, x: u32, y: u32, w: u32, h: u32, confidence: f32) -> RegionOfInterest {
        RegionOfInterest { bbox: BoundingBox::new(x, y, w, h), kind, confidence }
    }

    #[test]
    fn every_cue_pattern_compiles() {
        assert_eq!(amount_patterns().len(), AMOUNT_PATTERNS.len());
        assert_eq!(date_patterns().len(), DATE_PATTERNS.len());
    }

    #[test]
    fn date_whitelist_covers_every_era() {
        let allowed = RegionKind::Date.whitelist();
        for glyph in "令和平成昭和大正明治元RHSTM年月日".chars() {
            assert!(allowed.contains(glyph), "{glyph}");
        }
    }

    #[test]
    fn keyword_word_becomes_expanded_amount_region() {
        let rois = RoiExtractor::default().extract(&[word("合計", 100, 100, 40, 20)], 1000, 1000);
        assert_eq!(rois, vec![roi(RegionKind::Amount, 80, 90, 80, 40, 0.7)]);
    }

    #[test]
    fn patterns_outrank_keywords() {
        let ex = RoiExtractor::default();
        let rois = ex.extract(&[word("¥1,234", 10, 10, 60, 20)], 500, 500);
        assert_eq!(rois.len(), 1);
        assert_eq!(rois[0].kind, RegionKind::Amount);
        assert_eq!(rois[0].confidence, 0.9);

        let rois = ex.extract(&[word("1234", 10, 10, 60, 20)], 500, 500);
        assert_eq!(rois[0].confidence, 0.8);
    }

    #[test]
    fn date_word_uses_smaller_expansion() {
        let rois = RoiExtractor::default().extract(&[word("2024/07/24", 100, 100, 100, 20)], 1000, 1000);
        assert_eq!(rois, vec![roi(RegionKind::Date, 75, 95, 150, 30, 0.9)]);
    }

    #[test]
    fn era_and_kanji_dates_are_recognized() {
        let ex = RoiExtractor::default();
        for text in ["R6.07.24", "令和6年7月24日", "2024年7月24日"] {
            let rois = ex.extract(&[word(text, 100, 100, 100, 20)], 1000, 1000);
            assert!(
                rois.iter().any(|r| r.kind == RegionKind::Date && r.confidence == 0.9),
                "{text}: {rois:?}"
            );
        }
    }

    #[test]
    fn word_matching_both_kinds_yields_two_regions() {
        let rois = RoiExtractor::default().extract(&[word("合計7月", 100, 100, 40, 20)], 1000, 1000);
        assert_eq!(rois.len(), 2);
        assert!(rois.iter().any(|r| r.kind == RegionKind::Amount));
        assert!(rois.iter().any(|r| r.kind == RegionKind::Date));
    }

    #[test]
    fn unrelated_words_are_ignored() {
        let rois = RoiExtractor::default().extract(&[word("コーヒー", 0, 0, 40, 20), word("  ", 50, 0, 5, 5)], 200, 200);
        assert!(rois.is_empty());
    }

    #[test]
    fn configured_keywords_extend_the_tables() {
        let cfg = KeywordConfig { amount: vec!["ご請求額".into()], date: vec![] };
        let rois = RoiExtractor::new(&cfg).extract(&[word("ご請求額", 100, 100, 40, 20)], 1000, 1000);
        assert_eq!(rois.len(), 1);
        assert_eq!(rois[0].kind, RegionKind::Amount);
    }

    #[test]
    fn overlapping_amount_regions_merge_with_max_confidence() {
        let merged = merge_overlapping(vec![
            roi(RegionKind::Amount, 0, 0, 10, 10, 0.7),
            roi(RegionKind::Amount, 5, 5, 10, 10, 0.9),
        ]);
        assert_eq!(merged, vec![roi(RegionKind::Amount, 0, 0, 15, 15, 0.9)]);
    }

    #[test]
    fn different_kinds_never_merge() {
        let merged = merge_overlapping(vec![
            roi(RegionKind::Amount, 0, 0, 10, 10, 0.7),
            roi(RegionKind::Date, 5, 5, 10, 10, 0.9),
        ]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn merging_repeats_until_stable() {
        // The second region only overlaps once the first has absorbed the third.
        let merged = merge_overlapping(vec![
            roi(RegionKind::Date, 0, 0, 10, 10, 0.8),
            roi(RegionKind::Date, 30, 0, 10, 10, 0.7),
            roi(RegionKind::Date, 8, 0, 24, 10, 0.9),
        ]);
        assert_eq!(merged, vec![roi(RegionKind::Date, 0, 0, 40, 10, 0.9)]);
    }

    #[test]
    fn priority_blends_confidence_size_and_kind() {
        let amount = roi(RegionKind::Amount, 0, 0, 100, 100, 0.9);
        assert!((priority(&amount) - 1.128).abs() < 1e-5);
        let date = roi(RegionKind::Date, 0, 0, 200, 100, 0.9);
        assert!((priority(&date) - 0.74).abs() < 1e-5);
    }

    #[test]
    fn prioritize_keeps_the_best() {
        let rois = vec![
            roi(RegionKind::Date, 0, 0, 10, 10, 0.7),
            roi(RegionKind::Amount, 0, 0, 100, 100, 0.9),
            roi(RegionKind::Date, 0, 0, 100, 100, 0.9),
        ];
        let top = prioritize(rois, 2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].kind, RegionKind::Amount);
        assert_eq!(top[1], roi(RegionKind::Date, 0, 0, 100, 100, 0.9));
        assert!(prioritize(Vec::new(), 5).is_empty());
    }
}
