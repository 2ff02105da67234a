// Captured megaphone payloads shared by the tests of both extraction strategies.

use super::message::{ParsedMessage, NICKNAME, PROFILE_CODE, TEXT, USER_ID};

pub const PLAIN_TEXT: &str = "MegaphoneDataType 5120011Nickname紙槍神人 Whisper Textm72收耳敏60/110雪乾淨火尖槍上衣力量30趴劍士8/9力上衣7力褲裙槍攻10/3雪5力以上手套UserId20372100006036330ProfileCodeM0JXRH #5F0738 #edb0ce";

pub const PLAIN_TEXT_SECOND: &str = "MegaphoneDataType 5120011Nickname澄澄把拔 Whisper TextN收乾淨香菇112-115ap 120.150.200.250雪/收58-78等法師套11屬+15雪起UserId20372100005723305ProfileCode4kNJRr #5F0738 #edb0ce";

/// Same message as [`PLAIN_TEXT_SECOND`] with the in-protocol tag bytes intact.
pub const CONTROL_BYTES: &str = "MegaphoneData\x06\x04Type\x04 5120011\x08Nickname\x04\x0c澄澄把拔 Whisper \x01\x04Text\x04N收乾淨香菇112-115ap 120.150.200.250雪/收58-78等法師套11屬+15雪起\x06UserId\x04\x1120372100005723305\x0bProfileCode\x04\x054kNJR\x02r\x04 #5F0738\x04 #edb0ce";

/// Field literals in the order Text, UserId, Nickname, ProfileCode, Type.
pub const OUT_OF_ORDER: &str = "MegaphoneDataTextM●收弓手套5-8/1/5/15/25●手攻10/7.5/收眼力100%私/克洛斧97/5/10UserId20372100006213311Nickname帥展EXProfileCode4xBuFType5120010 WhisperI#c597d4";

pub fn assert_plain_text_fields(message: &ParsedMessage) {
    assert_eq!(message.get(NICKNAME), Some("紙槍神人"));
    assert_eq!(
        message.get(TEXT),
        Some("m72收耳敏60/110雪乾淨火尖槍上衣力量30趴劍士8/9力上衣7力褲裙槍攻10/3雪5力以上手套")
    );
    assert_eq!(message.get(PROFILE_CODE), Some("M0JXR"));
}

pub fn assert_second_fields(message: &ParsedMessage) {
    assert_eq!(message.get(NICKNAME), Some("澄澄把拔"));
    assert_eq!(
        message.get(TEXT),
        Some("N收乾淨香菇112-115ap 120.150.200.250雪/收58-78等法師套11屬+15雪起")
    );
    assert_eq!(message.get(USER_ID), Some("20372100005723305"));
    assert_eq!(message.get(PROFILE_CODE), Some("4kNJR"));
}

/// Encodes one length-prefixed record the way the game client lays them out.
pub fn record(name: &str, tag: u16, value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(10 + name.len() + value.len());
    out.extend_from_slice(&(name.len() as u32).to_le_bytes());
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(&tag.to_le_bytes());
    out.extend_from_slice(&(value.len() as u32).to_le_bytes());
    out.extend_from_slice(value);
    out
}

/// The second corpus message as a record stream on channel 7, including the
/// 8-byte leading section the binary strategy strips.
pub fn record_stream() -> Vec<u8> {
    let mut out = b"Megaphon".to_vec();
    out.extend(record("Type", 4, b"5120011"));
    out.extend(record("Nickname", 4, "澄澄把拔".as_bytes()));
    // stray bytes between records
    out.extend_from_slice(&[0xFF, 0x00, 0x13]);
    out.extend(record(
        "Text",
        4,
        "N收乾淨香菇112-115ap 120.150.200.250雪/收58-78等法師套11屬+15雪起".as_bytes(),
    ));
    out.extend(record("UserId", 4, b"20372100005723305"));
    out.extend(record("ProfileCode", 4, b"4kNJR"));
    out.extend(record("#5F0738", 4, b""));
    out.extend(record("#edb0ce", 4, b""));
    out.push(0x02);
    out.extend_from_slice(&7u32.to_le_bytes());
    out.push(0x04);
    out
}
