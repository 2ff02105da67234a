pub mod message;
pub mod records;
pub mod sanitize;
pub mod text;

#[cfg(test)]
pub(crate) mod corpus;

use serde::{Deserialize, Serialize};

pub use message::{OutboundMessage, ParsedMessage, MARKER};
pub use records::{decode_records, scan_records, Record};
pub use text::extract_fields;

/// A way of turning the bytes that follow the marker into message fields.
///
/// Both strategies fill the same [`ParsedMessage`] schema so they can be swapped
/// by configuration and checked against the same payloads.
pub trait FieldExtractionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn extract(&self, payload: &[u8]) -> ParsedMessage;
}

/// Segments the payload on known field literals and cleans each value.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextHeuristic;

impl FieldExtractionStrategy for TextHeuristic {
    fn name(&self) -> &'static str {
        "text"
    }

    fn extract(&self, payload: &[u8]) -> ParsedMessage {
        extract_fields(payload)
    }
}

/// Walks length-prefixed records after the fixed leading section.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryRecords;

impl FieldExtractionStrategy for BinaryRecords {
    fn name(&self) -> &'static str {
        "binary"
    }

    fn extract(&self, payload: &[u8]) -> ParsedMessage {
        let data = payload.get(records::LEADING_SECTION_LEN..).unwrap_or_default();
        decode_records(data)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractorKind {
    #[default]
    Text,
    Binary,
}

impl ExtractorKind {
    pub fn strategy(self) -> Box<dyn FieldExtractionStrategy> {
        match self {
            ExtractorKind::Text => Box::new(TextHeuristic),
            ExtractorKind::Binary => Box::new(BinaryRecords),
        }
    }
}

impl std::fmt::Display for ExtractorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractorKind::Text => write!(f, "text"),
            ExtractorKind::Binary => write!(f, "binary"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::message::{CHANNEL, TIMESTAMP};

    #[test]
    fn test_kind_selects_strategy() {
        assert_eq!(ExtractorKind::Text.strategy().name(), "text");
        assert_eq!(ExtractorKind::Binary.strategy().name(), "binary");
        assert_eq!(ExtractorKind::default(), ExtractorKind::Text);
    }

    #[test]
    fn test_strategies_agree_on_corpus_message() {
        let text = TextHeuristic.extract(corpus::CONTROL_BYTES.as_bytes());
        let binary = BinaryRecords.extract(&corpus::record_stream());

        corpus::assert_second_fields(&text);
        corpus::assert_second_fields(&binary);
        assert_eq!(text.get(message::HEADER), binary.get(message::HEADER));
        assert!(binary.contains(TIMESTAMP));
        assert_eq!(binary.get(CHANNEL), Some("CH7"));
    }

    #[test]
    fn test_binary_strategy_tolerates_short_payload() {
        let message = BinaryRecords.extract(b"Mega");
        assert!(message.contains(TIMESTAMP));
        assert!(!message.contains(CHANNEL));
    }
}
