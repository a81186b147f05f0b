use std::ops::Range;
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::{Datelike, NaiveDate};
use kanjo_core::{kanji_to_number, validate_date, Amount, Era};
use regex::{Captures, Match, Regex};

use crate::normalize::normalize;
use crate::roi::{RegionKind, RoiText};

// ── Compiled regex cache ─────────────────────────────────────────────────────

macro_rules! re {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static Regex {
            static R: OnceLock<Regex> = OnceLock::new();
            R.get_or_init(|| Regex::new($pat).expect("invalid regex"))
        }
    };
}

/// Cue words that introduce a total, as a non-capturing alternation.
macro_rules! total_keywords {
    () => {
        "(?:合計|小計|総計|お会計|お支払|税込|税抜|total|subtotal)"
    };
}

re!(re_date_iso,
    r"(\d{4})[-/.](\d{1,2})[-/.](\d{1,2})");
re!(re_date_era,
    r"(令和|平成|昭和|大正|明治|[RHSTM])\s*(\d{1,2}|元)\s*[年./-]\s*(\d{1,2})\s*[月./-]\s*(\d{1,2})日?");
re!(re_date_ymd_kanji,
    r"(\d{4})年\s*(\d{1,2})月\s*(\d{1,2})日");
re!(re_date_kanji_numerals,
    r"(令和|平成|昭和|大正|明治)?\s*(元|[〇零一二三四五六七八九十百千]+)年\s*([〇一二三四五六七八九十]+)月\s*([〇一二三四五六七八九十]+)日");
re!(re_date_month_day,
    r"(\d{1,2})[-/.](\d{1,2})");
re!(re_date_md_kanji,
    r"(\d{1,2})月\s*(\d{1,2})日");

re!(re_amount_lead,
    concat!(r"(?i)(?:[¥$]|", total_keywords!(), r"[^\d\n]{0,6})$"));

re!(re_amount_keyword_currency,
    concat!("(?i)", total_keywords!(), r"[^\d\n]{0,6}?[¥$]\s*(\d[\d,]*(?:\.\d+)?)"));
re!(re_amount_keyword_yen,
    concat!("(?i)", total_keywords!(), r"[^\d\n]{0,6}?(\d[\d,]*(?:\.\d+)?)\s*円"));
re!(re_amount_currency_prefix,
    r"[¥$]\s*(\d[\d,]*(?:\.\d+)?)");
re!(re_amount_yen_suffix,
    r"(\d[\d,]*(?:\.\d+)?)\s*円");
re!(re_amount_keyword,
    concat!("(?i)", total_keywords!(), r"[^\d\n]{0,6}?(\d[\d,]*(?:\.\d+)?)"));
re!(re_numeric_token,
    r"\d[\d,.]*");
re!(re_comma_grouped,
    r"^\d{1,3}(?:,\d{3})+(?:\.\d+)?$");
re!(re_bare_digits,
    r"^\d{3,12}$");

/// Extraction confidence contributed by each field that was found.
const FIELD_CONFIDENCE: f32 = 0.8;

/// Lines carrying these (lowercased) cues list cash handed over or change
/// given back, never the total.
const TENDER_CUES: &[&str] = &["預り", "預かり", "釣", "おつり", "change", "cash", "tender"];

// ── Types ────────────────────────────────────────────────────────────────────

/// A parsed amount and where it came from in its source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmountCandidate {
    pub value: i64,
    /// Tier of the rule that produced it; higher wins.
    pub priority: u8,
    pub span: Range<usize>,
}

/// A parsed date and its closeness to the reference day.
#[derive(Debug, Clone, PartialEq)]
pub struct DateCandidate {
    pub date: NaiveDate,
    pub score: f32,
}

/// Typed fields recovered from one receipt.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub raw_text: String,
    pub date: Option<NaiveDate>,
    pub amount: Option<i64>,
    pub confidence: f32,
}

// ── Dates ────────────────────────────────────────────────────────────────────

struct DateRule {
    pattern: fn() -> &'static Regex,
    parse: fn(&Captures<'_>, NaiveDate) -> Option<NaiveDate>,
    /// Digits-only form that reads as a price after a currency or total cue.
    price_like: bool,
}

const fn rule(
    pattern: fn() -> &'static Regex,
    parse: fn(&Captures<'_>, NaiveDate) -> Option<NaiveDate>,
    price_like: bool,
) -> DateRule {
    DateRule { pattern, parse, price_like }
}

/// Year-qualified forms come before the ones that borrow the current year.
const DATE_RULES: &[DateRule] = &[
    rule(re_date_iso, ymd_digits, false),
    rule(re_date_era, era_digits, false),
    rule(re_date_ymd_kanji, ymd_digits, false),
    rule(re_date_kanji_numerals, kanji_numerals, false),
    rule(re_date_month_day, month_day, true),
    rule(re_date_md_kanji, month_day, false),
];

fn num(caps: &Captures<'_>, i: usize) -> Option<u32> {
    caps.get(i)?.as_str().parse().ok()
}

fn ymd_digits(caps: &Captures<'_>, _today: NaiveDate) -> Option<NaiveDate> {
    validate_date(num(caps, 1)? as i32, num(caps, 2)?, num(caps, 3)?)
}

fn era_year(era: Option<&str>, year: &str) -> Option<i32> {
    let era_year = if year == "元" {
        1
    } else {
        year.parse().ok().or_else(|| kanji_to_number(year))?
    };
    match era {
        Some(prefix) => Era::from_prefix(prefix)?.to_gregorian(era_year),
        None => Some(era_year as i32),
    }
}

fn era_digits(caps: &Captures<'_>, _today: NaiveDate) -> Option<NaiveDate> {
    let year = era_year(Some(caps.get(1)?.as_str()), caps.get(2)?.as_str())?;
    validate_date(year, num(caps, 3)?, num(caps, 4)?)
}

fn kanji_numerals(caps: &Captures<'_>, _today: NaiveDate) -> Option<NaiveDate> {
    let era = caps.get(1).map(|m| m.as_str());
    let year_text = caps.get(2)?.as_str();
    if era.is_none() && year_text == "元" {
        return None;
    }
    let year = era_year(era, year_text)?;
    let month = kanji_to_number(caps.get(3)?.as_str())?;
    let day = kanji_to_number(caps.get(4)?.as_str())?;
    validate_date(year, month, day)
}

fn month_day(caps: &Captures<'_>, today: NaiveDate) -> Option<NaiveDate> {
    validate_date(today.year(), num(caps, 1)?, num(caps, 2)?)
}

/// Rejects matches that are a slice of a longer number or word,
/// e.g. `4/07` inside `2024/07`.
fn standalone(text: &str, m: &Match<'_>) -> bool {
    let mut before = text[..m.start()].chars().rev();
    let prev = before.next();
    let prev2 = before.next();
    let after = text[m.end()..].chars().next();
    let starts_alnum = m.as_str().starts_with(|c: char| c.is_ascii_alphanumeric());
    let ends_digit = m.as_str().ends_with(|c: char| c.is_ascii_digit());

    let glued_start = starts_alnum
        && match prev {
            Some(p) if p.is_ascii_alphanumeric() => true,
            // `<digit><separator>` right before: the tail of a longer date.
            Some('-' | '/' | '.') => prev2.is_some_and(|c| c.is_ascii_digit()),
            _ => false,
        };
    let glued_end = ends_digit && after.is_some_and(|c| c.is_ascii_digit());
    !glued_start && !glued_end
}

/// The line of `text` that contains `span`.
fn line_around<'t>(text: &'t str, span: &Range<usize>) -> &'t str {
    let start = text[..span.start].rfind('\n').map_or(0, |i| i + 1);
    let end = text[span.end..].find('\n').map_or(text.len(), |i| span.end + i);
    &text[start..end]
}

/// `$9.30` or `合計 12.05` is a price, not September 30th or December 5th.
fn follows_amount_cue(text: &str, m: &Match<'_>) -> bool {
    let line_start = text[..m.start()].rfind('\n').map_or(0, |i| i + 1);
    re_amount_lead().is_match(&text[line_start..m.start()])
}

/// Every valid date in `text`, in rule order and then by position.
fn date_matches(text: &str, today: NaiveDate) -> Vec<(NaiveDate, Range<usize>)> {
    let mut found = Vec::new();
    for rule in DATE_RULES {
        for caps in (rule.pattern)().captures_iter(text) {
            let Some(whole) = caps.get(0) else { continue };
            if !standalone(text, &whole) || (rule.price_like && follows_amount_cue(text, &whole)) {
                continue;
            }
            if let Some(date) = (rule.parse)(&caps, today) {
                found.push((date, whole.range()));
            }
        }
    }
    found
}

fn first_date(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    date_matches(text, today).into_iter().next().map(|(d, _)| d)
}

/// First valid date in `text`. Year-less forms take the year of `today`.
pub fn extract_date(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    first_date(&normalize(text), today)
}

/// `1.0` for `today`, falling toward 0 as the calendar distance grows.
pub fn date_closeness(date: NaiveDate, today: NaiveDate) -> f32 {
    let years = (date.year() - today.year()).unsigned_abs() as f32;
    let months = (date.month() as i32 - today.month() as i32).unsigned_abs() as f32;
    let days = (date.day() as i32 - today.day() as i32).unsigned_abs() as f32;
    let gap_days = years * 365.0 + months * 30.0 + days;
    1.0 / (1.0 + gap_days / 30.0)
}

// ── Amounts ──────────────────────────────────────────────────────────────────

/// `(pattern, tier)` for rules whose first capture group is the number.
/// A currency amount on a total line outranks a currency amount alone.
const CAPTURED_AMOUNT_RULES: &[(fn() -> &'static Regex, u8)] = &[
    (re_amount_keyword_currency, 5),
    (re_amount_keyword_yen, 5),
    (re_amount_currency_prefix, 4),
    (re_amount_yen_suffix, 4),
    (re_amount_keyword, 3),
];

/// `(token shape, tier)` for bare numeric tokens.
const TOKEN_AMOUNT_RULES: &[(fn() -> &'static Regex, u8)] = &[
    (re_comma_grouped, 2),
    (re_bare_digits, 1),
];

fn parse_amount(s: &str) -> Option<i64> {
    Amount::from_str(s).ok().map(i64::from)
}

fn overlaps(a: &Range<usize>, b: &Range<usize>) -> bool {
    a.start < b.end && b.start < a.end
}

fn on_tender_line(text: &str, span: &Range<usize>) -> bool {
    let line = line_around(text, span).to_lowercase();
    TENDER_CUES.iter().any(|cue| line.contains(cue))
}

fn amount_candidates_in(text: &str, date_spans: &[Range<usize>]) -> Vec<AmountCandidate> {
    let clear_of_dates = |span: &Range<usize>| {
        !date_spans.iter().any(|d| overlaps(d, span)) && !on_tender_line(text, span)
    };
    let mut found = Vec::new();

    for (pattern, priority) in CAPTURED_AMOUNT_RULES {
        for caps in pattern().captures_iter(text) {
            let Some(m) = caps.get(1) else { continue };
            let span = m.range();
            if !clear_of_dates(&span) {
                continue;
            }
            if let Some(value) = parse_amount(m.as_str()) {
                found.push(AmountCandidate { value, priority: *priority, span });
            }
        }
    }

    for token in re_numeric_token().find_iter(text) {
        let trimmed = token.as_str().trim_end_matches([',', '.']);
        let span = token.start()..token.start() + trimmed.len();
        if !clear_of_dates(&span) {
            continue;
        }
        let Some(priority) = TOKEN_AMOUNT_RULES
            .iter()
            .find(|(shape, _)| shape().is_match(trimmed))
            .map(|(_, p)| *p)
        else {
            continue;
        };
        if let Some(value) = parse_amount(trimmed) {
            found.push(AmountCandidate { value, priority, span });
        }
    }
    found
}

/// All amount candidates in `text`, skipping numbers that belong to a date.
pub fn amount_candidates(text: &str, today: NaiveDate) -> Vec<AmountCandidate> {
    let text = normalize(text);
    let spans: Vec<_> = date_matches(&text, today).into_iter().map(|(_, s)| s).collect();
    amount_candidates_in(&text, &spans)
}

/// Highest tier wins; inside the tier, the largest value.
fn best_amount(candidates: &[AmountCandidate]) -> Option<i64> {
    candidates
        .iter()
        .max_by_key(|c| (c.priority, c.value))
        .map(|c| c.value)
}

fn amount_in(text: &str, today: NaiveDate) -> Option<i64> {
    let spans: Vec<_> = date_matches(text, today).into_iter().map(|(_, s)| s).collect();
    best_amount(&amount_candidates_in(text, &spans))
}

/// Most likely total in `text`, in whole currency units.
pub fn extract_amount(text: &str, today: NaiveDate) -> Option<i64> {
    amount_in(&normalize(text), today)
}

/// Lower median; `None` for an empty slice.
pub fn lower_median(values: &[i64]) -> Option<i64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    Some(sorted[(sorted.len() - 1) / 2])
}

// ── Post-processing ──────────────────────────────────────────────────────────

/// Combine the whole-page text with the region re-reads into typed fields.
///
/// Dates: every source contributes its first valid date, and the one closest
/// to `today` wins (earlier sources win ties). Amounts: the lower median of
/// the per-source picks.
pub fn postprocess(raw_text: &str, regions: &[RoiText], today: NaiveDate) -> Extraction {
    let page = normalize(raw_text);
    let regions: Vec<(&RoiText, String)> = regions.iter().map(|r| (r, normalize(&r.text))).collect();

    let page_date = first_date(&page, today);
    let region_dates: Vec<(&RoiText, Option<NaiveDate>)> = regions
        .iter()
        .filter(|(r, _)| r.kind == RegionKind::Date)
        .map(|(r, text)| (*r, first_date(text, today)))
        .collect();

    let mut best: Option<DateCandidate> = None;
    for date in std::iter::once(page_date).chain(region_dates.iter().map(|(_, d)| *d)).flatten() {
        let score = date_closeness(date, today);
        if best.as_ref().map_or(true, |b| score > b.score) {
            best = Some(DateCandidate { date, score });
        }
    }
    let date = best.map(|b| b.date);

    let page_amount = amount_in(&page, today);
    let region_amounts: Vec<(&RoiText, Option<i64>)> = regions
        .iter()
        .filter(|(r, _)| r.kind == RegionKind::Amount)
        .map(|(r, text)| (*r, amount_in(text, today)))
        .collect();
    let amounts: Vec<i64> = std::iter::once(page_amount)
        .chain(region_amounts.iter().map(|(_, a)| *a))
        .flatten()
        .collect();
    let amount = lower_median(&amounts);

    let mut inputs: Vec<f32> = Vec::new();
    if date.is_some() {
        inputs.push(FIELD_CONFIDENCE);
    }
    if amount.is_some() {
        inputs.push(FIELD_CONFIDENCE);
    }
    if !inputs.is_empty() {
        inputs.extend(
            region_dates
                .iter()
                .filter(|(_, d)| d.is_some() && *d == date)
                .map(|(r, _)| r.confidence),
        );
        inputs.extend(
            region_amounts
                .iter()
                .filter(|(_, a)| a.is_some() && *a == amount)
                .map(|(r, _)| r.confidence),
        );
    }
    let confidence = if inputs.is_empty() {
        0.0
    } else {
        (inputs.iter().sum::<f32>() / inputs.len() as f32).clamp(0.0, 1.0)
    };

    Extraction { raw_text: raw_text.trim().to_string(), date, amount, confidence }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
