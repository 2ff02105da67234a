// Library exports for megaphone-relay
pub mod capture;
pub mod config;
pub mod dispatch;
pub mod extract;
pub mod utils;

pub use capture::{interface, pcap_engine, pipeline};
pub use config::settings;
pub use dispatch::{dispatcher, policy, sink};
pub use extract::{ExtractorKind, FieldExtractionStrategy, OutboundMessage, ParsedMessage};
pub use utils::formatting;

// Error types
pub use anyhow::{Error, Result};
