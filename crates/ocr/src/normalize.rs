//! Text cleanup applied to every recognized string before field extraction.

/// Letters the engine tends to emit in place of digits.
fn confusable_digit(c: char) -> Option<char> {
    match c {
        'O' | 'o' | 'D' | 'Q' => Some('0'),
        'l' | 'I' | '|' => Some('1'),
        'S' | 's' => Some('5'),
        'B' => Some('8'),
        _ => None,
    }
}

fn to_half_width(c: char) -> char {
    match c {
        '\u{3000}' => ' ',
        '￥' => '¥',
        '\u{FF01}'..='\u{FF5E}' => char::from_u32(c as u32 - 0xFEE0).unwrap_or(c),
        _ => c,
    }
}

/// Confusable runs bounded by digits on both sides become digits.
fn fix_confusables(line: &[char]) -> Vec<char> {
    let mut out = line.to_vec();
    let mut i = 0;
    while i < line.len() {
        if confusable_digit(line[i]).is_none() {
            i += 1;
            continue;
        }
        let start = i;
        while i < line.len() && confusable_digit(line[i]).is_some() {
            i += 1;
        }
        let before = start > 0 && line[start - 1].is_ascii_digit();
        let after = i < line.len() && line[i].is_ascii_digit();
        if before && after {
            for (slot, &c) in out[start..i].iter_mut().zip(&line[start..i]) {
                *slot = confusable_digit(c).unwrap_or(c);
            }
        }
    }
    out
}

fn normalize_line(line: &str) -> String {
    let chars: Vec<char> = line.chars().map(to_half_width).collect();
    let chars = fix_confusables(&chars);

    let mut out = String::with_capacity(chars.len());
    let mut prev: Option<char> = None;
    for c in chars {
        let c = if c.is_whitespace() { ' ' } else { c };
        let repeated_separator = matches!(c, ',' | '.' | '-' | '/' | ' ') && prev == Some(c);
        if !repeated_separator {
            out.push(c);
        }
        prev = Some(c);
    }
    out.trim().to_string()
}

/// Normalize recognized text: half-width ASCII, digit look-alikes fixed,
/// duplicate separators and whitespace collapsed, blank lines dropped.
///
/// `normalize(&normalize(s)) == normalize(s)` for every input.
pub fn normalize(text: &str) -> String {
    text.lines()
        .map(normalize_line)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
