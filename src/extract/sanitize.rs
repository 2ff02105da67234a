// Byte-level cleanup applied to raw value spans before they become strings.
// Every step works on `&[u8]`; only `clean_printable` produces a `String`.

use lazy_static::lazy_static;
use regex::bytes::Regex;
use unicode_general_category::{get_general_category, GeneralCategory};

lazy_static! {
    // one letter or punctuation byte followed by exactly three low control bytes
    static ref STYLE_RUN: Regex =
        Regex::new(r"(?-u)[A-Za-z[:punct:]][\x00-\x0F]{3}").expect("style run pattern");
    static ref COLOR_CODE: Regex =
        Regex::new(r"(?i-u)#[0-9A-F]{6}").expect("color code pattern");
}

const WHISPER: &[u8] = b"Whisper";
const CHANNEL_MARK: u8 = 0x02;

/// First byte offset of `needle` inside `haystack`.
pub fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}

/// Decodes the UTF-8 scalar starting at `bytes[0]`, returning it with its width.
///
/// Returns `None` when the first byte does not begin a complete, valid sequence.
pub fn decode_char(bytes: &[u8]) -> Option<(char, usize)> {
    let width = match *bytes.first()? {
        0x00..=0x7F => 1,
        0xC2..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF4 => 4,
        _ => return None,
    };
    let chunk = bytes.get(..width)?;
    std::str::from_utf8(chunk)
        .ok()?
        .chars()
        .next()
        .map(|c| (c, width))
}

/// Decodes the UTF-8 scalar that ends exactly at the end of `bytes`.
fn decode_last_char(bytes: &[u8]) -> Option<(char, usize)> {
    (1..=4.min(bytes.len())).find_map(|width| {
        let start = bytes.len() - width;
        match decode_char(&bytes[start..]) {
            Some((c, w)) if w == width => Some((c, w)),
            _ => None,
        }
    })
}

/// Cuts the whisper-target annotation: when "Whisper" appears past the start,
/// keep only what precedes the character right before it.
pub fn truncate_at_whisper(value: &[u8]) -> &[u8] {
    match find(value, WHISPER) {
        Some(idx) if idx > 0 => {
            let head = &value[..idx];
            let width = decode_last_char(head).map_or(1, |(_, w)| w);
            &head[..head.len() - width]
        }
        _ => value,
    }
}

pub fn strip_style_runs(value: &[u8]) -> Vec<u8> {
    STYLE_RUN.replace_all(value, &b""[..]).into_owned()
}

pub fn strip_color_codes(value: &[u8]) -> Vec<u8> {
    COLOR_CODE.replace_all(value, &b""[..]).into_owned()
}

/// Trims Unicode whitespace from both ends.
pub fn trim_whitespace(mut value: &[u8]) -> &[u8] {
    while let Some((c, width)) = decode_char(value) {
        if !c.is_whitespace() {
            break;
        }
        value = &value[width..];
    }
    while let Some((c, width)) = decode_last_char(value) {
        if !c.is_whitespace() {
            break;
        }
        value = &value[..value.len() - width];
    }
    value
}

fn is_trim_control(byte: u8) -> bool {
    byte <= 0x0F || byte == 0xF4
}

/// Trims bytes from the control set `0x00..=0x0F` plus `0xF4` at both ends.
pub fn trim_control(value: &[u8]) -> &[u8] {
    let start = value
        .iter()
        .position(|&b| !is_trim_control(b))
        .unwrap_or(value.len());
    let end = value
        .iter()
        .rposition(|&b| !is_trim_control(b))
        .map_or(start, |idx| idx + 1);
    &value[start..end]
}

/// Drops everything from the first channel-marker byte past the start.
pub fn truncate_at_channel_mark(value: &[u8]) -> &[u8] {
    match value.iter().position(|&b| b == CHANNEL_MARK) {
        Some(idx) if idx > 0 => &value[..idx],
        _ => value,
    }
}

/// Letters, marks, numbers, punctuation, symbols and the ASCII space.
pub fn is_printable(c: char) -> bool {
    use GeneralCategory as G;

    c == ' '
        || matches!(
            get_general_category(c),
            G::UppercaseLetter
                | G::LowercaseLetter
                | G::TitlecaseLetter
                | G::ModifierLetter
                | G::OtherLetter
                | G::NonspacingMark
                | G::SpacingMark
                | G::EnclosingMark
                | G::DecimalNumber
                | G::LetterNumber
                | G::OtherNumber
                | G::ConnectorPunctuation
                | G::DashPunctuation
                | G::OpenPunctuation
                | G::ClosePunctuation
                | G::InitialPunctuation
                | G::FinalPunctuation
                | G::OtherPunctuation
                | G::MathSymbol
                | G::CurrencySymbol
                | G::ModifierSymbol
                | G::OtherSymbol
        )
}

/// Decodes byte by byte, skipping bytes that do not start a valid sequence and
/// dropping control and non-printable characters.
pub fn clean_printable(value: &[u8]) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while !rest.is_empty() {
        match decode_char(rest) {
            Some((c, width)) => {
                if is_printable(c) {
                    out.push(c);
                }
                rest = &rest[width..];
            }
            None => rest = &rest[1..],
        }
    }
    out
}
