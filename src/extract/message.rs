use std::collections::BTreeMap;
use std::fmt;

/// Marker literal that identifies a megaphone broadcast inside a TCP payload.
pub const MARKER: &str = "MegaphoneData";

pub const HEADER: &str = "Header";
pub const TYPE: &str = "Type";
pub const NICKNAME: &str = "Nickname";
pub const TEXT: &str = "Text";
pub const USER_ID: &str = "UserId";
pub const PROFILE_CODE: &str = "ProfileCode";
pub const CHANNEL: &str = "Channel";
pub const COLOR1: &str = "color1";
pub const COLOR2: &str = "color2";
pub const TIMESTAMP: &str = "timestamp";

/// Maximum number of characters kept for a profile code.
pub const PROFILE_CODE_LEN: usize = 5;

/// Field-name to value mapping produced by an extraction strategy.
///
/// Always carries `Header = "MegaphoneData"`; every other key is present only
/// when the strategy found it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMessage {
    fields: BTreeMap<String, String>,
}

impl ParsedMessage {
    pub fn new() -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(HEADER.to_string(), MARKER.to_string());
        Self { fields }
    }

    pub(crate) fn insert(&mut self, key: &str, value: String) {
        let value = if key == PROFILE_CODE {
            value.chars().take(PROFILE_CODE_LEN).collect()
        } else {
            value
        };
        self.fields.insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// True when nothing beyond the header was recovered.
    pub fn is_header_only(&self) -> bool {
        self.fields.len() == 1
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn into_map(self) -> BTreeMap<String, String> {
        self.fields
    }
}

impl Default for ParsedMessage {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ParsedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (key, value)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {:?}", key, value)?;
        }
        write!(f, "}}")
    }
}

/// The part of a parsed message that gets delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub nickname: String,
    pub profile_code: String,
    pub text: String,
    pub channel: Option<String>,
}

impl From<ParsedMessage> for OutboundMessage {
    fn from(message: ParsedMessage) -> Self {
        let mut fields = message.into_map();
        Self {
            nickname: fields.remove(NICKNAME).unwrap_or_default(),
            profile_code: fields.remove(PROFILE_CODE).unwrap_or_default(),
            text: fields.remove(TEXT).unwrap_or_default(),
            channel: fields.remove(CHANNEL).filter(|c| !c.is_empty()),
        }
    }
}
