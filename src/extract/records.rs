use chrono::{DateTime, Local};

use super::message::{
    ParsedMessage, CHANNEL, COLOR1, COLOR2, NICKNAME, PROFILE_CODE, TEXT, TIMESTAMP, TYPE, USER_ID,
};

/// Length of the leading section that precedes the record stream.
pub const LEADING_SECTION_LEN: usize = 8;

const MAX_NAME_LEN: usize = 64;
const MAX_VALUE_LEN: usize = 256;
const TEXT_TAG: u16 = 4;
const COLOR_NAME_LEN: usize = 7;
const CHANNEL_RANGE: std::ops::RangeInclusive<u32> = 1..=9999;

const KNOWN_FIELDS: [&str; 6] = [NICKNAME, CHANNEL, TEXT, TYPE, PROFILE_CODE, USER_ID];

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One length-prefixed record located in the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record<'a> {
    pub name: String,
    pub tag: u16,
    pub value: &'a [u8],
}

fn read_u16_le(data: &[u8], at: usize) -> Option<u16> {
    let bytes = data.get(at..at.checked_add(2)?)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

fn read_u32_le(data: &[u8], at: usize) -> Option<u32> {
    let bytes = data.get(at..at.checked_add(4)?)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn decode_name(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(name) => name.to_string(),
        Err(_) => bytes
            .iter()
            .map(|&b| if b.is_ascii() { b as char } else { '?' })
            .collect(),
    }
}

/// Tries to read a record at `at`, returning it with the offset just past it.
fn record_at(data: &[u8], at: usize) -> Option<(Record<'_>, usize)> {
    let name_len = read_u32_le(data, at)? as usize;
    if name_len == 0 || name_len > MAX_NAME_LEN {
        return None;
    }
    let name_start = at + 4;
    let name_end = name_start + name_len;
    let name = data.get(name_start..name_end)?;

    let tag = read_u16_le(data, name_end)?;
    let value_len = read_u32_le(data, name_end + 2)? as usize;
    if value_len > MAX_VALUE_LEN {
        return None;
    }
    let value_start = name_end + 6;
    let value_end = value_start + value_len;
    let value = data.get(value_start..value_end)?;

    Some((
        Record {
            name: decode_name(name),
            tag,
            value,
        },
        value_end,
    ))
}

/// Walks the buffer as a sequence of length-prefixed records.
///
/// Whenever a sanity check fails at an offset the walk moves forward by one
/// byte and tries again, so misaligned or corrupt stretches are skipped rather
/// than ending the scan.
pub fn scan_records(data: &[u8]) -> Vec<Record<'_>> {
    let mut records = Vec::new();
    let mut i = 0;
    while i + 4 <= data.len() {
        match record_at(data, i) {
            Some((record, next)) => {
                records.push(record);
                i = next;
            }
            None => i += 1,
        }
    }
    records
}

/// Finds the first `0x02 <u32 LE> 0x04` pattern whose number is a valid channel.
pub fn find_channel(data: &[u8]) -> Option<u32> {
    data.windows(6)
        .filter(|window| window[0] == 0x02 && window[5] == 0x04)
        .map(|window| u32::from_le_bytes([window[1], window[2], window[3], window[4]]))
        .find(|channel| CHANNEL_RANGE.contains(channel))
}

/// Decodes a record stream into the shared message schema, stamped with the
/// current local time.
pub fn decode_records(data: &[u8]) -> ParsedMessage {
    decode_records_at(data, Local::now())
}

pub fn decode_records_at(data: &[u8], now: DateTime<Local>) -> ParsedMessage {
    let mut message = ParsedMessage::new();
    let mut colors = Vec::new();

    for record in scan_records(data) {
        if record.name == CHANNEL {
            continue;
        }
        if KNOWN_FIELDS.contains(&record.name.as_str()) {
            if record.tag == TEXT_TAG {
                message.insert(&record.name, String::from_utf8_lossy(record.value).into_owned());
            }
        } else if record.name.starts_with('#') && record.name.len() == COLOR_NAME_LEN {
            colors.push(record.name);
        }
    }

    let mut colors = colors.into_iter();
    if let Some(color) = colors.next() {
        message.insert(COLOR1, color);
    }
    if let Some(color) = colors.next() {
        message.insert(COLOR2, color);
    }

    message.insert(TIMESTAMP, now.format(TIMESTAMP_FORMAT).to_string());

    if let Some(channel) = find_channel(data) {
        message.insert(CHANNEL, format!("CH{}", channel));
    }

    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::corpus::{self, record};
    use chrono::TimeZone;

    fn fixed_time() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 9, 14, 21, 5, 30).unwrap()
    }

    #[test]
    fn test_decodes_corpus_stream() {
        let stream = corpus::record_stream();
        let message = decode_records_at(&stream[LEADING_SECTION_LEN..], fixed_time());

        corpus::assert_second_fields(&message);
        assert_eq!(message.get(TYPE), Some("5120011"));
        assert_eq!(message.get(COLOR1), Some("#5F0738"));
        assert_eq!(message.get(COLOR2), Some("#edb0ce"));
        assert_eq!(message.get(CHANNEL), Some("CH7"));
        assert_eq!(message.get(TIMESTAMP), Some("2025-09-14 21:05:30"));
    }

    #[test]
    fn test_non_text_tags_are_ignored() {
        let mut data = record("Nickname", 2, b"skipped");
        data.extend(record("Text", 4, b"kept"));
        let message = decode_records_at(&data, fixed_time());
        assert!(!message.contains(NICKNAME));
        assert_eq!(message.get(TEXT), Some("kept"));
    }

    #[test]
    fn test_channel_record_does_not_set_channel() {
        let data = record("Channel", 4, b"CH99");
        let message = decode_records_at(&data, fixed_time());
        assert!(!message.contains(CHANNEL));
    }

    #[test]
    fn test_oversized_lengths_resynchronize() {
        // name length 65 and value length 257 both fail the sanity checks
        let mut data = 65u32.to_le_bytes().to_vec();
        data.extend(record("Text", 4, &[b'x'; 257]));
        data.extend(record("UserId", 4, b"42"));
        let records = scan_records(&data);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "UserId");
        assert_eq!(records[0].value, b"42");
    }

    #[test]
    fn test_invalid_value_bytes_replaced() {
        let data = record("Nickname", 4, &[b'a', 0xFF, b'b']);
        let message = decode_records_at(&data, fixed_time());
        assert_eq!(message.get(NICKNAME), Some("a\u{FFFD}b"));
    }

    #[test]
    fn test_invalid_name_falls_back_to_ascii() {
        let data = record_with_raw_name(&[b'N', 0xC3, b'k']);
        let records = scan_records(&data);
        assert_eq!(records[0].name, "N?k");
    }

    fn record_with_raw_name(name: &[u8]) -> Vec<u8> {
        let mut out = (name.len() as u32).to_le_bytes().to_vec();
        out.extend_from_slice(name);
        out.extend_from_slice(&4u16.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out
    }

    #[test]
    fn test_find_channel_bounds() {
        let mut data = vec![0x02];
        data.extend_from_slice(&0u32.to_le_bytes());
        data.push(0x04);
        data.push(0x02);
        data.extend_from_slice(&10_000u32.to_le_bytes());
        data.push(0x04);
        assert_eq!(find_channel(&data), None);

        data.push(0x02);
        data.extend_from_slice(&9999u32.to_le_bytes());
        data.push(0x04);
        assert_eq!(find_channel(&data), Some(9999));
    }

    #[test]
    fn test_short_buffer_yields_header_and_timestamp() {
        let message = decode_records_at(b"abc", fixed_time());
        assert_eq!(message.len(), 2);
        assert!(message.contains(TIMESTAMP));
    }
}
