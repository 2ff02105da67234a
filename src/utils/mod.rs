pub mod formatting;

pub use formatting::{format_bytes, format_duration, hex_preview, truncate_string};
