pub mod interface;
pub mod pcap_engine;
pub mod pipeline;

pub use interface::{
    select_interface, InterfaceDescriptor, InterfaceSelector, NetworkProbe, PcapProbe, SelectError,
    Selection, SelectionTier,
};
pub use pcap_engine::{CaptureError, CaptureStats, CapturedPacket, LiveCapture};
pub use pipeline::{
    CapturePipeline, Forward, PacketSource, PipelineState, PipelineStats, PrefixRing,
};
