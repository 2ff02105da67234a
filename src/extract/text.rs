use super::message::{ParsedMessage, MARKER, NICKNAME, PROFILE_CODE, TEXT, TYPE, USER_ID};
use super::sanitize;

/// Field literals searched for after the marker. Order here only decides which
/// literal wins a tie; values are bounded by source order.
pub const FIELD_LITERALS: [&str; 5] = [TYPE, NICKNAME, TEXT, USER_ID, PROFILE_CODE];

/// Extracts megaphone fields from a payload by segmenting it on the known field
/// literals.
///
/// Never fails: a payload with no recognizable literal yields a header-only
/// message.
pub fn extract_fields(payload: &[u8]) -> ParsedMessage {
    let mut message = ParsedMessage::new();

    let body = match sanitize::find(payload, MARKER.as_bytes()) {
        Some(idx) => &payload[idx + MARKER.len()..],
        None => payload,
    };

    let mut found: Vec<(usize, &str)> = FIELD_LITERALS
        .iter()
        .filter_map(|&key| sanitize::find(body, key.as_bytes()).map(|pos| (pos, key)))
        .collect();
    if found.is_empty() {
        return message;
    }
    // stable sort keeps declaration order for literals sharing an offset
    found.sort_by_key(|&(pos, _)| pos);

    for (i, &(pos, key)) in found.iter().enumerate() {
        let mut start = pos + key.len();
        while start < body.len() && body[start] < 0x20 {
            start += 1;
        }

        let mut end = found.get(i + 1).map_or(body.len(), |&(next, _)| next);
        while end > start && body[end - 1] < 0x20 {
            end -= 1;
        }

        if start >= end {
            message.insert(key, String::new());
            continue;
        }

        message.insert(key, clean_value(&body[start..end]));
    }

    message
}

/// Runs the post-processing chain over one raw value span.
fn clean_value(raw: &[u8]) -> String {
    let value = sanitize::truncate_at_whisper(raw);
    let value = sanitize::strip_style_runs(value);
    let value = sanitize::strip_color_codes(&value);
    let value = sanitize::trim_control(sanitize::trim_whitespace(&value));
    let value = sanitize::truncate_at_channel_mark(value);
    sanitize::clean_printable(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::corpus;
    use crate::extract::message::{HEADER, PROFILE_CODE_LEN};

    #[test]
    fn test_plain_text_megaphone() {
        let message = extract_fields(corpus::PLAIN_TEXT.as_bytes());
        corpus::assert_plain_text_fields(&message);
        assert_eq!(message.get(TYPE), Some("5120011"));
        assert_eq!(message.get(USER_ID), Some("20372100006036330"));
        assert_eq!(message.len(), 6);
    }

    #[test]
    fn test_second_plain_text_megaphone() {
        let message = extract_fields(corpus::PLAIN_TEXT_SECOND.as_bytes());
        corpus::assert_second_fields(&message);
        assert_eq!(message.get(TYPE), Some("5120011"));
    }

    #[test]
    fn test_control_byte_megaphone() {
        let message = extract_fields(corpus::CONTROL_BYTES.as_bytes());
        corpus::assert_second_fields(&message);
        assert_eq!(message.get(TYPE), Some("5120011"));
        assert_eq!(message.len(), 6);
    }

    #[test]
    fn test_out_of_order_fields() {
        let message = extract_fields(corpus::OUT_OF_ORDER.as_bytes());
        assert_eq!(message.get(TEXT), Some("M●收弓手套5-8/1/5/15/25●手攻10/7.5/收眼力100%私/克洛斧97/5/10"));
        assert_eq!(message.get(USER_ID), Some("20372100006213311"));
        assert_eq!(message.get(NICKNAME), Some("帥展EX"));
        assert_eq!(message.get(PROFILE_CODE), Some("4xBuF"));
        assert_eq!(message.get(TYPE), Some("5120010"));
    }

    #[test]
    fn test_whisper_takes_preceding_character() {
        let message = extract_fields("MegaphoneDataType5120010WhisperI#c597d4".as_bytes());
        assert_eq!(message.get(TYPE), Some("512001"));
    }

    #[test]
    fn test_marker_without_fields() {
        let message = extract_fields(b"MegaphoneData\x06\x04 nothing to see");
        assert!(message.is_header_only());
        assert_eq!(message.get(HEADER), Some("MegaphoneData"));
    }

    #[test]
    fn test_missing_marker_scans_whole_payload() {
        let message = extract_fields("Nickname紙槍神人".as_bytes());
        assert_eq!(message.get(NICKNAME), Some("紙槍神人"));
    }

    #[test]
    fn test_empty_span_keeps_field() {
        let message = extract_fields(b"MegaphoneDataNickname\x04\x04TextHi");
        assert_eq!(message.get(NICKNAME), Some(""));
        assert_eq!(message.get(TEXT), Some("Hi"));

        let message = extract_fields(b"MegaphoneDataText");
        assert_eq!(message.get(TEXT), Some(""));
    }

    #[test]
    fn test_style_runs_and_colors_removed() {
        let message = extract_fields(b"MegaphoneDataText\x04hello R\x01\x02\x03world #A0B1C2!");
        assert_eq!(message.get(TEXT), Some("hello world !"));
    }

    #[test]
    fn test_profile_code_never_exceeds_limit() {
        for input in [
            corpus::PLAIN_TEXT.as_bytes(),
            corpus::PLAIN_TEXT_SECOND.as_bytes(),
            corpus::CONTROL_BYTES.as_bytes(),
            "MegaphoneDataProfileCode澄澄把拔澄澄把拔".as_bytes(),
        ] {
            let message = extract_fields(input);
            let code = message.get(PROFILE_CODE).unwrap_or_default();
            assert!(code.chars().count() <= PROFILE_CODE_LEN, "{code}");
        }
    }

    #[test]
    fn test_extraction_is_pure() {
        let first = extract_fields(corpus::CONTROL_BYTES.as_bytes());
        let second = extract_fields(corpus::CONTROL_BYTES.as_bytes());
        assert_eq!(first, second);
    }
}
