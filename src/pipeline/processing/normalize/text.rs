//! Non-destructive text cleaning for review bodies.

use once_cell::sync::Lazy;
use regex::Regex;

static MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r" {2,}").unwrap());
static MULTI_NEWLINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

/// Longest entity body we look for between `&` and `;`. The longest HTML5
/// name is `CounterClockwiseContourIntegral`.
const MAX_ENTITY_LEN: usize = 32;

/// Produces the cleaned form of a review body. The input is never modified.
///
/// Steps: one pass of HTML entity decoding, line break normalization, tab to
/// space, space and blank-line collapsing, outer trim. Decoding is not
/// repeated, so `&amp;lt;` becomes `&lt;` and not `<`.
pub fn clean_text(raw: &str) -> String {
    let decoded = decode_entities(raw);
    let text = decoded.replace("\r\n", "\n").replace('\r', "\n").replace('\t', " ");
    let text = MULTI_SPACE.replace_all(&text, " ");
    let text = MULTI_NEWLINE.replace_all(&text, "\n\n");
    text.trim().to_string()
}

/// Number of characters (not bytes) in `text`.
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Count of non-whitespace characters, used for low-information checks
pub fn content_char_count(text: &str) -> usize {
    text.chars().filter(|c| !c.is_whitespace()).count()
}

/// Decodes named and numeric references in a single left-to-right scan.
/// Decoded output is never rescanned.
fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];
        let decoded = after
            .char_indices()
            .take(MAX_ENTITY_LEN + 1)
            .find(|(_, c)| *c == ';')
            .and_then(|(semi, _)| decode_entity(&after[..semi]).map(|s| (s, semi)));

        match decoded {
            Some((replacement, semi)) => {
                out.push_str(&replacement);
                rest = &after[semi + 1..];
            }
            None => {
                out.push('&');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(body: &str) -> Option<String> {
    if let Some(num) = body.strip_prefix('#') {
        let code = if let Some(hex) = num.strip_prefix('x').or_else(|| num.strip_prefix('X')) {
            u32::from_str_radix(hex, 16).ok()?
        } else {
            num.parse::<u32>().ok()?
        };
        return Some(decode_char_ref(code).map(String::from).unwrap_or_default());
    }

    if body.is_empty() || !body.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    let reference = format!("&{};", body);
    let decoded = html_escape::decode_html_entities(&reference);
    if decoded == reference {
        return None;
    }
    Some(decoded.into_owned())
}

/// Maps a numeric character reference the way HTML5 parsers do: NUL,
/// surrogates and out-of-range values become U+FFFD, 0x80..=0x9F are read as
/// windows-1252, and control or noncharacter code points are dropped.
fn decode_char_ref(code: u32) -> Option<char> {
    if (0x80..=0x9f).contains(&code) {
        return Some(WINDOWS_1252_C1[(code - 0x80) as usize]);
    }
    if code == 0 || code > 0x10ffff || (0xd800..=0xdfff).contains(&code) {
        return Some(char::REPLACEMENT_CHARACTER);
    }
    let dropped = matches!(code, 0x1..=0x8 | 0xb | 0xe..=0x1f | 0x7f | 0xfdd0..=0xfdef)
        || code & 0xfffe == 0xfffe;
    if dropped {
        return None;
    }
    char::from_u32(code)
}

/// windows-1252 reading of 0x80..=0x9F. Undefined slots keep their code point.
const WINDOWS_1252_C1: [char; 32] = [
    '\u{20ac}', '\u{81}', '\u{201a}', '\u{192}', '\u{201e}', '\u{2026}', '\u{2020}', '\u{2021}',
    '\u{2c6}', '\u{2030}', '\u{160}', '\u{2039}', '\u{152}', '\u{8d}', '\u{17d}', '\u{8f}',
    '\u{90}', '\u{2018}', '\u{2019}', '\u{201c}', '\u{201d}', '\u{2022}', '\u{2013}', '\u{2014}',
    '\u{2dc}', '\u{2122}', '\u{161}', '\u{203a}', '\u{153}', '\u{9d}', '\u{17e}', '\u{178}',
];
