use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};

use super::pcap_engine::{CaptureError, CapturedPacket, LiveCapture};
use crate::dispatch::{DispatchError, MessageSender};
use crate::extract::{sanitize, FieldExtractionStrategy, OutboundMessage, ParsedMessage, MARKER};
use crate::utils::formatting::hex_preview;

pub const PREFIX_RING_CAPACITY: usize = 32;
const MAX_PREFIX_LEN: usize = 256;
const PREFIX_REPORT_INTERVAL: u64 = 10;
const PREFIX_PREVIEW_BYTES: usize = 48;

/// Anything that yields captured TCP payloads one at a time.
pub trait PacketSource {
    /// `Ok(None)` means the source is exhausted.
    fn next_packet(&mut self) -> Result<Option<CapturedPacket>, CaptureError>;
}

impl PacketSource for LiveCapture {
    fn next_packet(&mut self) -> Result<Option<CapturedPacket>, CaptureError> {
        self.next_segment()
    }
}

/// Where parsed messages go after extraction.
pub trait Forward {
    fn forward(&mut self, message: OutboundMessage) -> Result<(), DispatchError>;
}

impl Forward for MessageSender {
    fn forward(&mut self, message: OutboundMessage) -> Result<(), DispatchError> {
        self.blocking_enqueue(message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    InterfaceSelected,
    CaptureOpen,
    Running,
    Stopped,
    Fatal,
}

impl PipelineState {
    pub fn advance(&mut self, next: PipelineState) {
        debug!("Pipeline state: {} -> {}", self, next);
        *self = next;
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Stopped | PipelineState::Fatal)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::InterfaceSelected => "interface selected",
            PipelineState::CaptureOpen => "capture open",
            PipelineState::Running => "running",
            PipelineState::Stopped => "stopped",
            PipelineState::Fatal => "fatal",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub packets_seen: u64,
    pub payload_packets: u64,
    pub marker_hits: u64,
    pub forwarded: u64,
}

/// Bounded history of the bytes that preceded the marker in recent packets.
#[derive(Debug, Clone)]
pub struct PrefixRing {
    prefixes: VecDeque<Vec<u8>>,
    capacity: usize,
    recorded: u64,
}

impl PrefixRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            prefixes: VecDeque::with_capacity(capacity),
            capacity,
            recorded: 0,
        }
    }

    /// Keeps at most the last 256 bytes of `prefix`, evicting the oldest entry
    /// when full.
    pub fn record(&mut self, prefix: &[u8]) {
        let kept = &prefix[prefix.len().saturating_sub(MAX_PREFIX_LEN)..];
        if self.prefixes.len() == self.capacity {
            self.prefixes.pop_front();
        }
        self.prefixes.push_back(kept.to_vec());
        self.recorded += 1;

        if self.recorded % PREFIX_REPORT_INTERVAL == 0 {
            debug!(
                "Marker prefix #{} ({} bytes): {}",
                self.recorded,
                kept.len(),
                hex_preview(kept, PREFIX_PREVIEW_BYTES)
            );
        }
    }

    pub fn len(&self) -> usize {
        self.prefixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    /// Total prefixes seen, including evicted ones.
    pub fn recorded(&self) -> u64 {
        self.recorded
    }

    pub fn latest(&self) -> Option<&[u8]> {
        self.prefixes.back().map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.prefixes.iter().map(Vec::as_slice)
    }
}

impl Default for PrefixRing {
    fn default() -> Self {
        Self::new(PREFIX_RING_CAPACITY)
    }
}

/// Pulls packets from a source, extracts megaphone messages and forwards them.
pub struct CapturePipeline<S> {
    source: S,
    strategy: Box<dyn FieldExtractionStrategy>,
    stop: Arc<AtomicBool>,
    prefixes: PrefixRing,
    stats: PipelineStats,
    state: PipelineState,
}

impl<S: PacketSource> CapturePipeline<S> {
    pub fn new(source: S, strategy: Box<dyn FieldExtractionStrategy>) -> Self {
        Self {
            source,
            strategy,
            stop: Arc::new(AtomicBool::new(false)),
            prefixes: PrefixRing::default(),
            stats: PipelineStats::default(),
            state: PipelineState::CaptureOpen,
        }
    }

    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    /// Setting the returned flag ends [`run`](Self::run) before the next packet.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn prefixes(&self) -> &PrefixRing {
        &self.prefixes
    }

    /// Extracts a message from one TCP payload. Empty payloads and payloads
    /// without the marker give `None`.
    pub fn process_payload(&mut self, payload: &[u8]) -> Option<ParsedMessage> {
        if payload.is_empty() {
            return None;
        }
        self.stats.payload_packets += 1;

        let index = sanitize::find(payload, MARKER.as_bytes())?;
        self.stats.marker_hits += 1;
        self.prefixes.record(&payload[..index]);

        Some(self.strategy.extract(&payload[index..]))
    }

    /// Runs until the source ends, the stop flag is raised or the forward
    /// target closes. A source read error is returned and leaves the pipeline
    /// in [`PipelineState::Fatal`].
    pub fn run<F: Forward>(&mut self, forward: &mut F) -> Result<PipelineStats, CaptureError> {
        self.state.advance(PipelineState::Running);
        info!("Capture loop running with {} extractor", self.strategy.name());

        loop {
            if self.stop.load(Ordering::Relaxed) {
                info!("Stop requested, leaving capture loop");
                break;
            }

            let packet = match self.source.next_packet() {
                Ok(Some(packet)) => packet,
                Ok(None) => {
                    info!("Packet source exhausted");
                    break;
                }
                Err(e) => {
                    self.state.advance(PipelineState::Fatal);
                    return Err(e);
                }
            };
            self.stats.packets_seen += 1;

            let Some(parsed) = self.process_payload(&packet.payload) else {
                continue;
            };
            info!("{}", parsed);

            if let Err(e) = forward.forward(OutboundMessage::from(parsed)) {
                warn!("Dispatcher no longer accepts messages ({}), stopping capture", e);
                break;
            }
            self.stats.forwarded += 1;
        }

        self.state.advance(PipelineState::Stopped);
        info!(
            "Capture loop stopped: {} packets, {} with payload, {} markers, {} forwarded",
            self.stats.packets_seen,
            self.stats.payload_packets,
            self.stats.marker_hits,
            self.stats.forwarded
        );
        Ok(self.stats)
    }
}
