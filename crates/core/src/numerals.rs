//! Kanji numeral conversion.
//!
//! Receipts print kanji numbers two ways: positionally, one glyph per digit
//! (`二〇二四`), and with place values (`二千二十四`). Both are accepted.

fn digit_value(c: char) -> Option<u32> {
    match c {
        '〇' | '零' => Some(0),
        '一' => Some(1),
        '二' => Some(2),
        '三' => Some(3),
        '四' => Some(4),
        '五' => Some(5),
        '六' => Some(6),
        '七' => Some(7),
        '八' => Some(8),
        '九' => Some(9),
        _ => None,
    }
}

fn unit_value(c: char) -> Option<u32> {
    match c {
        '十' => Some(10),
        '百' => Some(100),
        '千' => Some(1_000),
        _ => None,
    }
}

pub fn is_kanji_numeral(c: char) -> bool {
    digit_value(c).is_some() || unit_value(c).is_some() || c == '万'
}

/// Convert a kanji numeral string to an integer.
///
/// Returns `None` for an empty string, any non-numeral glyph, or overflow.
pub fn kanji_to_number(s: &str) -> Option<u32> {
    if s.is_empty() || !s.chars().all(is_kanji_numeral) {
        return None;
    }

    if !s.chars().any(|c| unit_value(c).is_some() || c == '万') {
        return s
            .chars()
            .try_fold(0u32, |acc, c| acc.checked_mul(10)?.checked_add(digit_value(c)?));
    }

    let mut total: u32 = 0;
    let mut section: u32 = 0;
    let mut current: Option<u32> = None;

    for c in s.chars() {
        if let Some(d) = digit_value(c) {
            current = Some(current.unwrap_or(0).checked_mul(10)?.checked_add(d)?);
        } else if let Some(unit) = unit_value(c) {
            section = section.checked_add(current.unwrap_or(1).checked_mul(unit)?)?;
            current = None;
        } else {
            // 万
            let block = section.checked_add(current.unwrap_or(0))?;
            let block = if block == 0 { 1 } else { block };
            total = total.checked_add(block.checked_mul(10_000)?)?;
            section = 0;
            current = None;
        }
    }

    total.checked_add(section)?.checked_add(current.unwrap_or(0))
}
